use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::LazyLock;

use capture_core::{CaptureOptions, ResourceCategory};
use regex::{Captures, Regex};
use scraper::{Html, Selector};
use url::Url;

use engine_logging::{engine_debug, engine_warn};

use crate::filename::local_path_for;
use crate::resolve::resolve_reference;
use crate::sanitize::Sanitizer;
use crate::scheduler::TaskOutcome;
use crate::serialize::{render_pretty, DocumentEdits};
use crate::store::ResourceStore;
use crate::{AttrTarget, DownloadTask};

static CSS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"url\s*\(\s*['"]?([^'")]+)['"]?\s*\)"#).expect("css url pattern")
});

static FONT_FACE_SRC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@font-face\s*\{[^}]*src\s*:\s*([^;}]+)[;}]").expect("font-face pattern")
});

const FONT_MARKERS: &[&str] = &[".woff", ".woff2", ".ttf", ".otf", ".eot"];

/// Reference attributes scanned per category, in discovery order.
const REFERENCE_RULES: &[(ResourceCategory, &str, &str)] = &[
    (ResourceCategory::Css, "link[rel~=stylesheet][href]", "href"),
    (ResourceCategory::Js, "script[src]", "src"),
    (ResourceCategory::Images, "img[src]", "src"),
    (ResourceCategory::Videos, "video[src]", "src"),
    (ResourceCategory::Videos, "video source[src]", "src"),
    (ResourceCategory::Videos, "audio[src]", "src"),
    (ResourceCategory::Videos, "audio source[src]", "src"),
    (ResourceCategory::Fonts, "link[rel=preload][as=font][href]", "href"),
];

/// Collect one download task per unique resolvable reference.
///
/// Node ids in the returned targets refer to a parse of `text`; parsing the
/// same text again yields the same ids.
pub(crate) fn plan_assets(text: &str, base: &Url, options: &CaptureOptions) -> Vec<DownloadTask> {
    let html = Html::parse_document(text);
    let mut tasks: Vec<DownloadTask> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for &(category, selector, attr) in REFERENCE_RULES {
        if !options.includes(category) {
            continue;
        }
        let Ok(selector) = Selector::parse(selector) else {
            engine_warn!("skipping unparsable selector {selector}");
            continue;
        };
        for element in html.select(&selector) {
            let Some(raw) = element.value().attr(attr) else {
                continue;
            };
            let Some(url) = resolve_reference(raw, Some(base)) else {
                engine_debug!("unresolvable {category} reference {raw:?}");
                continue;
            };
            let target = AttrTarget {
                node: element.id(),
                attr,
            };
            match index.get(&url) {
                Some(&slot) => tasks[slot].targets.push(target),
                None => {
                    index.insert(url.clone(), tasks.len());
                    let mut task = DownloadTask::new(url, category);
                    task.targets.push(target);
                    tasks.push(task);
                }
            }
        }
    }
    tasks
}

/// Point every target of a successful download at its local copy. Failed
/// downloads keep their original reference. Returns the success count.
pub(crate) fn apply_downloads(outcomes: &[TaskOutcome], edits: &mut DocumentEdits) -> usize {
    let mut succeeded = 0;
    for outcome in outcomes {
        let Some(path) = &outcome.local_path else {
            continue;
        };
        succeeded += 1;
        for target in &outcome.task.targets {
            edits.set_attr(target.node, target.attr, path.clone());
        }
    }
    succeeded
}

/// Rewrite `url(...)` references inside inline `<style>` blocks.
///
/// Stored resources reuse their path. Other references get a reserved local
/// path and, unless `attempted` already holds them, a follow-up task that
/// must download into exactly that path. References are left alone once the
/// store is full.
pub(crate) fn plan_inline_styles(
    text: &str,
    base: &Url,
    options: &CaptureOptions,
    store: &ResourceStore,
    attempted: &HashSet<String>,
    edits: &mut DocumentEdits,
) -> Vec<DownloadTask> {
    if !options.include_images && !options.include_fonts {
        return Vec::new();
    }
    let Ok(selector) = Selector::parse("style") else {
        return Vec::new();
    };
    let html = Html::parse_document(text);
    let mut planner = StylePlanner {
        base,
        options,
        store,
        attempted,
        planned: HashMap::new(),
        tasks: Vec::new(),
    };
    for style in html.select(&selector) {
        let css: String = style.text().collect();
        if let Some(rewritten) = planner.rewrite(&css) {
            edits.set_contents(style.id(), rewritten);
        }
    }
    planner.tasks
}

struct StylePlanner<'a> {
    base: &'a Url,
    options: &'a CaptureOptions,
    store: &'a ResourceStore,
    attempted: &'a HashSet<String>,
    planned: HashMap<String, String>,
    tasks: Vec<DownloadTask>,
}

impl StylePlanner<'_> {
    /// Returns `None` when nothing in `css` changed.
    fn rewrite(&mut self, css: &str) -> Option<String> {
        let font_sources: Vec<Range<usize>> = FONT_FACE_SRC
            .captures_iter(css)
            .filter_map(|caps| caps.get(1).map(|src| src.range()))
            .collect();

        let mut changed = false;
        let rewritten = CSS_URL.replace_all(css, |caps: &Captures<'_>| {
            let whole = &caps[0];
            let Some(reference) = caps.get(1) else {
                return whole.to_string();
            };
            let in_font_face = font_sources
                .iter()
                .any(|range| range.contains(&reference.start()));
            let Some(category) = self.category_for(reference.as_str(), in_font_face) else {
                return whole.to_string();
            };
            match self.local_path(reference.as_str(), category) {
                Some(path) => {
                    changed = true;
                    whole.replacen(reference.as_str(), &path, 1)
                }
                None => whole.to_string(),
            }
        });
        changed.then(|| rewritten.into_owned())
    }

    fn category_for(&self, reference: &str, in_font_face: bool) -> Option<ResourceCategory> {
        if in_font_face && self.options.include_fonts && looks_like_font(reference) {
            Some(ResourceCategory::Fonts)
        } else if self.options.include_images {
            Some(ResourceCategory::Images)
        } else {
            None
        }
    }

    fn local_path(&mut self, reference: &str, category: ResourceCategory) -> Option<String> {
        let url = resolve_reference(reference, Some(self.base))?;
        if let Some(path) = self.store.local_path(&url) {
            return Some(path);
        }
        if let Some(path) = self.planned.get(&url) {
            return Some(path.clone());
        }
        if self.store.is_full() {
            engine_debug!("resource limit reached, leaving {url} remote");
            return None;
        }
        let wanted = local_path_for(&url, category, self.options.correct_file_names, None);
        let path = self.store.reserve_path(&url, &wanted);
        self.planned.insert(url.clone(), path.clone());
        if !self.attempted.contains(&url) {
            self.tasks
                .push(DownloadTask::new(url, category).with_local_path(path.clone()));
        }
        Some(path)
    }
}

fn looks_like_font(reference: &str) -> bool {
    let lower = reference.to_ascii_lowercase();
    FONT_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Serialize the edited document, sanitized when any removal is enabled.
pub(crate) fn render_document(
    text: &str,
    options: &CaptureOptions,
    sanitizer: &Sanitizer,
    mut edits: DocumentEdits,
) -> String {
    let html = Html::parse_document(text);
    if options.any_sanitization() {
        let removed = sanitizer.apply(&html, options, &mut edits);
        engine_debug!("sanitizer removed {removed} element(s)");
    }
    render_pretty(&html, &edits)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://ex.com/x/y").unwrap()
    }

    #[test]
    fn duplicate_references_share_one_task() {
        let text = r#"<html><head><link rel="stylesheet" href="/a.css"></head><body><img src="logo.png"><img src="./logo.png"><img src="data:image/png;base64,AAAA"></body></html>"#;
        let tasks = plan_assets(text, &base(), &CaptureOptions::default());
        let urls: Vec<_> = tasks.iter().map(|t| t.url.as_str()).collect();
        assert_eq!(urls, vec!["https://ex.com/a.css", "https://ex.com/x/logo.png"]);
        assert_eq!(tasks[1].targets.len(), 2);
        assert_eq!(tasks[1].category, ResourceCategory::Images);
    }

    #[test]
    fn disabled_categories_are_not_scanned() {
        let text = r#"<html><body><script src="app.js"></script><video src="v.mp4"></video></body></html>"#;
        let tasks = plan_assets(text, &base(), &CaptureOptions::default());
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].category, ResourceCategory::Js);

        let options = CaptureOptions {
            include_videos: true,
            ..CaptureOptions::default()
        };
        assert_eq!(plan_assets(text, &base(), &options).len(), 2);
    }

    #[test]
    fn inline_css_gets_local_paths_and_follow_up_tasks() {
        let text = r#"<html><head><style>body { background: url("/img/bg.png"); } @font-face { font-family: F; src: url(/f/a.woff2) format("woff2"); }</style></head><body></body></html>"#;
        let options = CaptureOptions {
            include_fonts: true,
            ..CaptureOptions::default()
        };
        let store = ResourceStore::new(200);
        let mut edits = DocumentEdits::default();
        let tasks = plan_inline_styles(
            text,
            &base(),
            &options,
            &store,
            &HashSet::new(),
            &mut edits,
        );
        let planned: Vec<_> = tasks
            .iter()
            .map(|t| (t.url.as_str(), t.category, t.local_path.as_deref()))
            .collect();
        assert_eq!(
            planned,
            vec![
                ("https://ex.com/img/bg.png", ResourceCategory::Images, Some("static/images/bg.png")),
                ("https://ex.com/f/a.woff2", ResourceCategory::Fonts, Some("static/fonts/a.woff2")),
            ]
        );

        let rendered = render_document(text, &options, &Sanitizer::default(), edits);
        assert!(rendered.contains(r#"url("static/images/bg.png")"#));
        assert!(rendered.contains("url(static/fonts/a.woff2)"));
    }

    #[test]
    fn attempted_urls_are_rewritten_without_a_new_task() {
        let text = "<html><head><style>.a { background: url(/img/bg.png) }</style></head></html>";
        let attempted: HashSet<String> = ["https://ex.com/img/bg.png".to_string()].into();
        let mut edits = DocumentEdits::default();
        let tasks = plan_inline_styles(
            text,
            &base(),
            &CaptureOptions::default(),
            &ResourceStore::new(200),
            &attempted,
            &mut edits,
        );
        assert!(tasks.is_empty());
        let rendered = render_document(text, &CaptureOptions::default(), &Sanitizer::default(), edits);
        assert!(rendered.contains("url(static/images/bg.png)"));
    }
}
