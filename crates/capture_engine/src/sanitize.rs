use capture_core::CaptureOptions;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

use engine_logging::{engine_debug, engine_warn};

use crate::serialize::DocumentEdits;

/// Removal rules for one sanitization category. Matching is case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuleSet {
    /// `<script src>` values containing any of these are removed.
    pub script_sources: Vec<String>,
    /// Inline scripts containing any of these are removed. Entries with `.*`
    /// are treated as regular expressions.
    pub inline_keywords: Vec<String>,
    /// `<noscript>` blocks whose raw content mentions any of these are removed.
    pub noscript_sources: Vec<String>,
    /// Extra CSS selectors whose matches are removed.
    pub element_selectors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MaliciousRules {
    pub meta_http_equiv: Vec<String>,
    pub meta_names: Vec<String>,
    pub inline_keywords: Vec<String>,
    /// Regular expressions matched against inline script text.
    pub patterns: Vec<String>,
}

/// Sanitization policy. Substring and regex heuristics: they will over- and
/// under-match, so treat them as a cleanup aid and not a security boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SanitizerRules {
    pub analytics: RuleSet,
    pub tracking: RuleSet,
    pub ads: RuleSet,
    pub tag_manager: RuleSet,
    pub malicious: MaliciousRules,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

impl Default for SanitizerRules {
    fn default() -> Self {
        Self {
            analytics: RuleSet {
                script_sources: strings(&[
                    "google-analytics.com",
                    "googletagmanager.com/gtag",
                    "gtag/js",
                    "analytics.js",
                    "gtag.js",
                    "ga.js",
                    "hm.baidu.com",
                    "cnzz.com",
                    "mixpanel.com",
                    "segment.com",
                    "segment.io",
                ]),
                inline_keywords: strings(&[
                    "google-analytics.com",
                    "gtag(",
                    "ga(",
                    "_gaq",
                    "GoogleAnalyticsObject",
                    "hm.baidu.com",
                    "_hmt",
                    "mixpanel",
                    "analytics.track",
                    "segment.com",
                ]),
                ..RuleSet::default()
            },
            tracking: RuleSet {
                script_sources: strings(&[
                    "connect.facebook.net",
                    "analytics.tiktok.com",
                    "snapchat.com/web-sdk",
                    "hotjar.com",
                    "crazyegg.com",
                    "clarity.ms",
                    "mouseflow.com",
                    "fullstory.com",
                ]),
                inline_keywords: strings(&[
                    "fbq(",
                    "facebook.net",
                    "ttq.track",
                    "tiktok",
                    "snaptr(",
                    "hotjar",
                    "hj(",
                    "crazyegg",
                    "clarity",
                    "mouseflow",
                    "fullstory",
                ]),
                ..RuleSet::default()
            },
            ads: RuleSet {
                script_sources: strings(&[
                    "googlesyndication.com",
                    "doubleclick.net",
                    "taboola.com",
                    "outbrain.com",
                    "popads.net",
                    "propellerads.com",
                    "adcash.com",
                    "affiliate.js",
                    "redirect.js",
                ]),
                inline_keywords: strings(&[
                    "googlesyndication",
                    "adsbygoogle",
                    "doubleclick",
                    "taboola",
                    "outbrain",
                    "popads",
                    "propellerads",
                    "adcash",
                    "affiliate",
                    "redirect",
                ]),
                element_selectors: strings(&["ins.adsbygoogle"]),
                ..RuleSet::default()
            },
            tag_manager: RuleSet {
                script_sources: strings(&["googletagmanager.com/gtm.js"]),
                inline_keywords: strings(&["googletagmanager.com", "dataLayer", "GTM-"]),
                noscript_sources: strings(&["googletagmanager.com"]),
                element_selectors: strings(&["noscript iframe[src*=\"googletagmanager.com\"]"]),
            },
            malicious: MaliciousRules {
                meta_http_equiv: strings(&["refresh", "location", "redirect"]),
                meta_names: strings(&["referrer", "redirect", "location"]),
                inline_keywords: strings(&[
                    "window.location.href",
                    "window.location.replace",
                    "window.location.assign",
                    "document.location.href",
                    "document.location.replace",
                    "location.href",
                    "location.replace",
                    "top.location",
                    "parent.location",
                    "setTimeout.*location",
                    "setInterval.*location",
                    "document.createElement.*base",
                    "<base",
                    "http-equiv.*refresh",
                    "meta.*refresh",
                ]),
                patterns: strings(&[
                    r#"location\s*=\s*['"][^'"]*['"]"#,
                    r"location\s*\.\s*href\s*=",
                    r"window\s*\.\s*open\s*\(",
                    r"document\s*\.\s*write.*<base",
                    r"setTimeout\s*\(.*location",
                    r"setInterval\s*\(.*location",
                ]),
            },
        }
    }
}

#[derive(Debug, Default)]
struct TextMatcher {
    substrings: Vec<String>,
    patterns: Vec<Regex>,
}

impl TextMatcher {
    fn new(keywords: &[String], patterns: &[String]) -> Self {
        let mut matcher = TextMatcher::default();
        for keyword in keywords {
            if keyword.contains(".*") {
                matcher.push_pattern(keyword);
            } else if !keyword.is_empty() {
                matcher.substrings.push(keyword.to_lowercase());
            }
        }
        for pattern in patterns {
            matcher.push_pattern(pattern);
        }
        matcher
    }

    fn push_pattern(&mut self, pattern: &str) {
        match Regex::new(&format!("(?i){pattern}")) {
            Ok(regex) => self.patterns.push(regex),
            Err(err) => engine_warn!("ignoring sanitizer pattern {pattern:?}: {err}"),
        }
    }

    fn matches(&self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }
        let lower = text.to_lowercase();
        self.substrings.iter().any(|needle| lower.contains(needle))
            || self.patterns.iter().any(|regex| regex.is_match(text))
    }
}

#[derive(Debug)]
struct CompiledRules {
    script_sources: Vec<String>,
    inline: TextMatcher,
    noscript_sources: Vec<String>,
    selectors: Vec<Selector>,
}

impl CompiledRules {
    fn new(rules: &RuleSet) -> Self {
        Self {
            script_sources: lowercase_all(&rules.script_sources),
            inline: TextMatcher::new(&rules.inline_keywords, &[]),
            noscript_sources: lowercase_all(&rules.noscript_sources),
            selectors: rules
                .element_selectors
                .iter()
                .filter_map(|raw| match Selector::parse(raw) {
                    Ok(selector) => Some(selector),
                    Err(err) => {
                        engine_warn!("ignoring sanitizer selector {raw:?}: {err}");
                        None
                    }
                })
                .collect(),
        }
    }
}

fn lowercase_all(items: &[String]) -> Vec<String> {
    items
        .iter()
        .filter(|item| !item.is_empty())
        .map(|item| item.to_lowercase())
        .collect()
}

/// Compiled form of [`SanitizerRules`]; marks removals in a [`DocumentEdits`]
/// overlay.
#[derive(Debug)]
pub struct Sanitizer {
    analytics: CompiledRules,
    tracking: CompiledRules,
    ads: CompiledRules,
    tag_manager: CompiledRules,
    meta_http_equiv: Vec<String>,
    meta_names: Vec<String>,
    malicious_inline: TextMatcher,
    script: Option<Selector>,
    noscript: Option<Selector>,
    base: Option<Selector>,
    meta: Option<Selector>,
}

impl Sanitizer {
    /// Invalid selectors and patterns are logged and skipped.
    pub fn new(rules: &SanitizerRules) -> Self {
        Self {
            analytics: CompiledRules::new(&rules.analytics),
            tracking: CompiledRules::new(&rules.tracking),
            ads: CompiledRules::new(&rules.ads),
            tag_manager: CompiledRules::new(&rules.tag_manager),
            meta_http_equiv: lowercase_all(&rules.malicious.meta_http_equiv),
            meta_names: lowercase_all(&rules.malicious.meta_names),
            malicious_inline: TextMatcher::new(
                &rules.malicious.inline_keywords,
                &rules.malicious.patterns,
            ),
            script: Selector::parse("script").ok(),
            noscript: Selector::parse("noscript").ok(),
            base: Selector::parse("base").ok(),
            meta: Selector::parse("meta").ok(),
        }
    }

    /// Mark every element the enabled categories reject. Returns how many
    /// elements were newly marked.
    pub(crate) fn apply(
        &self,
        html: &Html,
        options: &CaptureOptions,
        edits: &mut DocumentEdits,
    ) -> usize {
        let before = edits.removed_count();
        let categories = [
            (options.remove_analytics, "analytics", &self.analytics),
            (options.remove_tracking, "tracking", &self.tracking),
            (options.remove_ads, "ads", &self.ads),
            (options.remove_tag_manager, "tag manager", &self.tag_manager),
        ];
        for (enabled, label, rules) in categories {
            if enabled {
                let removed = self.apply_rules(html, rules, edits);
                engine_debug!("sanitizer: {removed} {label} element(s) removed");
            }
        }
        if options.remove_malicious_tags {
            let removed = self.apply_malicious(html, edits);
            engine_debug!("sanitizer: {removed} suspicious element(s) removed");
        }
        edits.removed_count() - before
    }

    fn apply_rules(&self, html: &Html, rules: &CompiledRules, edits: &mut DocumentEdits) -> usize {
        let mut removed = 0;
        for script in select(html, &self.script) {
            let by_source = script.value().attr("src").is_some_and(|src| {
                let src = src.to_lowercase();
                rules.script_sources.iter().any(|needle| src.contains(needle))
            });
            if by_source || rules.inline.matches(&text_of(script)) {
                removed += mark(edits, script);
            }
        }
        if !rules.noscript_sources.is_empty() {
            for noscript in select(html, &self.noscript) {
                let text = text_of(noscript).to_lowercase();
                if rules.noscript_sources.iter().any(|needle| text.contains(needle)) {
                    removed += mark(edits, noscript);
                }
            }
        }
        for selector in &rules.selectors {
            for element in html.select(selector) {
                removed += mark(edits, element);
            }
        }
        removed
    }

    fn apply_malicious(&self, html: &Html, edits: &mut DocumentEdits) -> usize {
        let mut removed = 0;
        for base in select(html, &self.base) {
            removed += mark(edits, base);
        }
        for meta in select(html, &self.meta) {
            let listed = |attr: &str, values: &[String]| {
                meta.value()
                    .attr(attr)
                    .is_some_and(|value| values.contains(&value.trim().to_lowercase()))
            };
            if listed("http-equiv", &self.meta_http_equiv) || listed("name", &self.meta_names) {
                removed += mark(edits, meta);
            }
        }
        for script in select(html, &self.script) {
            if self.malicious_inline.matches(&text_of(script)) {
                removed += mark(edits, script);
            }
        }
        removed
    }
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new(&SanitizerRules::default())
    }
}

fn select<'a>(html: &'a Html, selector: &'a Option<Selector>) -> Vec<ElementRef<'a>> {
    selector
        .as_ref()
        .map(|selector| html.select(selector).collect())
        .unwrap_or_default()
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect()
}

fn mark(edits: &mut DocumentEdits, element: ElementRef<'_>) -> usize {
    if edits.is_removed(element.id()) {
        return 0;
    }
    edits.remove(element.id());
    1
}
