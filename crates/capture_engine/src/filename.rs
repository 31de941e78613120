use std::fmt::Write as _;

use capture_core::ResourceCategory;
use sha2::{Digest, Sha256};
use url::Url;

const MAX_NAME_LEN: usize = 120;

/// Suffixes that hide the real extension, stripped repeatedly.
const INCORRECT_SUFFIXES: &[&str] = &[
    ".download", ".tmp", ".temp", ".backup", ".bak", ".old", ".new", ".gz", ".zip", ".tar",
    ".rar", ".7z", ".bz2", ".map", ".dev", ".prod", ".test", ".debug", ".release", ".cache",
    ".lock", ".log", ".out", ".err", ".下载", ".临时", ".备份", ".缓存", ".测试", "下载", "临时",
    "备份", "缓存", "测试", ".part", ".crdownload", ".downloading", ".1", ".2", ".3", ".copy",
    ".orig",
];

/// Dotted name parts that describe a build rather than the file.
const MODIFIERS: &[&str] = &[
    "min", "minified", "compressed", "bundle", "bundled", "dev", "development", "debug", "prod",
    "production", "release", "latest", "stable", "beta", "alpha", "full", "lite", "slim", "es5",
    "es6", "es2015", "es2017", "es2018", "umd", "cjs", "esm", "amd",
];

/// Filename fragments mapped to canonical extensions, longest match first.
const EXTENSION_HINTS: &[(&str, &str)] = &[
    (".woff2", ".woff2"),
    (".woff", ".woff"),
    (".jpeg", ".jpg"),
    (".jpg", ".jpg"),
    (".png", ".png"),
    (".gif", ".gif"),
    (".webp", ".webp"),
    (".svg", ".svg"),
    (".css", ".css"),
    (".js", ".js"),
    (".ttf", ".ttf"),
    (".otf", ".otf"),
    (".eot", ".eot"),
    (".mp4", ".mp4"),
    (".webm", ".webm"),
    (".avi", ".avi"),
    (".mov", ".mov"),
];

const VIDEO_EXTENSIONS: &[&str] = &[
    ".mp4", ".avi", ".mov", ".wmv", ".flv", ".webm", ".mkv", ".m4v", ".3gp", ".ogv", ".ts",
    ".m3u8", ".f4v", ".asf", ".rm", ".rmvb", ".vob", ".mpg", ".mpeg", ".m2v", ".divx", ".xvid",
    ".mp3", ".ogg", ".wav", ".m4a", ".aac", ".flac", ".opus",
];

const IMAGE_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".webp", ".svg", ".ico", ".bmp", ".avif",
];

const FONT_EXTENSIONS: &[&str] = &[".woff2", ".woff", ".ttf", ".otf", ".eot"];

const CSS_INDICATORS: &[&str] = &[
    "{", "}", "color:", "background:", "font-", "margin:", "padding:", "@import", "@media",
    "@keyframes", "display:", "position:", "width:", "height:", "border:", "text-",
    "line-height:",
];

const JS_INDICATORS: &[&str] = &[
    "function", "var ", "let ", "const ", "return", "if(", "else", "document.", "window.",
    "console.", "alert(", "typeof", "null", "undefined", "true", "false", "this.", "prototype",
    "addeventlistener", "getelementbyid", "queryselector",
];

const KEYWORD_THRESHOLD: usize = 3;
const SNIFF_LIMIT: usize = 2000;

/// What is known about a downloaded body when choosing its extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentProbe<'a> {
    pub content: &'a [u8],
    pub content_type: Option<&'a str>,
}

/// Archive-relative path for a resource: `static/<category>/<file>`.
///
/// With `correct_names` the file name is cleaned and its extension chosen by
/// [`detect_extension`]; `probe` carries the body when it is already known.
pub fn local_path_for(
    url: &str,
    category: ResourceCategory,
    correct_names: bool,
    probe: Option<ContentProbe<'_>>,
) -> String {
    let raw = raw_file_name(url);
    let file_name = match raw {
        Some(raw) if correct_names => {
            let stem = clean_file_name(&raw, category);
            let ext = detect_extension(category, probe.unwrap_or_default(), &raw);
            format!("{stem}{ext}")
        }
        Some(raw) => with_category_extension(raw, category),
        None => format!("{}{}", short_hash(url), category.default_extension()),
    };
    format!("static/{}/{}", category.dir_name(), file_name)
}

/// `static/images/a.png` + url -> `static/images/a-1a2b3c4d.png`.
pub fn with_hash_suffix(path: &str, url: &str) -> String {
    let hash = short_hash(url);
    let (dir, file) = match path.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, path),
    };
    let file = match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}-{hash}.{ext}"),
        _ => format!("{file}-{hash}"),
    };
    match dir {
        Some(dir) => format!("{dir}/{file}"),
        None => file,
    }
}

/// Ordered extension classifiers; the first confident answer wins.
type Classifier = fn(ResourceCategory, &ContentProbe<'_>, &str) -> Option<&'static str>;

const CLASSIFIERS: &[Classifier] = &[
    by_content_type,
    by_magic_bytes,
    by_keyword_score,
    by_markup,
    by_file_name,
    by_library_hint,
];

/// Extension for a resource, falling back to the category default.
pub fn detect_extension(
    category: ResourceCategory,
    probe: ContentProbe<'_>,
    file_name: &str,
) -> &'static str {
    let lower_name = file_name.to_lowercase();
    CLASSIFIERS
        .iter()
        .find_map(|classify| classify(category, &probe, &lower_name))
        .unwrap_or_else(|| category.default_extension())
}

pub fn by_content_type(
    _category: ResourceCategory,
    probe: &ContentProbe<'_>,
    _name: &str,
) -> Option<&'static str> {
    let ct = probe.content_type?.to_ascii_lowercase();
    let mapping: &[(&[&str], &'static str)] = &[
        (&["text/css"], ".css"),
        (
            &["text/javascript", "application/javascript", "application/x-javascript"],
            ".js",
        ),
        (&["image/jpeg"], ".jpg"),
        (&["image/png"], ".png"),
        (&["image/gif"], ".gif"),
        (&["image/webp"], ".webp"),
        (&["image/svg"], ".svg"),
        (&["font/woff2"], ".woff2"),
        (&["font/woff"], ".woff"),
        (&["font/ttf", "application/x-font-ttf"], ".ttf"),
        (&["video/mp4"], ".mp4"),
        (&["video/webm"], ".webm"),
    ];
    mapping
        .iter()
        .find(|(needles, _)| needles.iter().any(|needle| ct.contains(needle)))
        .map(|(_, ext)| *ext)
}

pub fn by_magic_bytes(
    _category: ResourceCategory,
    probe: &ContentProbe<'_>,
    _name: &str,
) -> Option<&'static str> {
    let bytes = probe.content;
    if bytes.starts_with(&[0xFF, 0xD8]) {
        Some(".jpg")
    } else if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        Some(".png")
    } else if bytes.starts_with(b"GIF8") {
        Some(".gif")
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some(".webp")
    } else if bytes.starts_with(b"wOF2") {
        Some(".woff2")
    } else if bytes.starts_with(b"wOFF") {
        Some(".woff")
    } else {
        None
    }
}

pub fn by_keyword_score(
    category: ResourceCategory,
    probe: &ContentProbe<'_>,
    _name: &str,
) -> Option<&'static str> {
    if probe.content.is_empty() {
        return None;
    }
    let text = sniff_text(probe.content);
    let css = keyword_score(&text, CSS_INDICATORS);
    let js = keyword_score(&text, JS_INDICATORS);
    if css >= KEYWORD_THRESHOLD {
        Some(".css")
    } else if js >= KEYWORD_THRESHOLD {
        Some(".js")
    } else if category == ResourceCategory::Css && css > 0 {
        Some(".css")
    } else if category == ResourceCategory::Js && js > 0 {
        Some(".js")
    } else {
        None
    }
}

pub fn by_markup(
    _category: ResourceCategory,
    probe: &ContentProbe<'_>,
    _name: &str,
) -> Option<&'static str> {
    if probe.content.is_empty() {
        return None;
    }
    let text = sniff_text(probe.content);
    if text.contains("<svg") || text.contains("xmlns=\"http://www.w3.org/2000/svg\"") {
        Some(".svg")
    } else if text.contains("<html") || text.contains("<!doctype") {
        Some(".html")
    } else {
        None
    }
}

pub fn by_file_name(
    _category: ResourceCategory,
    _probe: &ContentProbe<'_>,
    name: &str,
) -> Option<&'static str> {
    EXTENSION_HINTS
        .iter()
        .find(|(hint, _)| name.contains(hint))
        .map(|(_, ext)| *ext)
}

pub fn by_library_hint(
    category: ResourceCategory,
    _probe: &ContentProbe<'_>,
    name: &str,
) -> Option<&'static str> {
    const SCRIPT_LIBRARIES: &[&str] = &["jquery", "angular", "react", "vue", "lodash"];
    const STYLE_HINTS: &[&str] = &["style", "theme"];
    if name.contains("bootstrap") {
        return Some(if category == ResourceCategory::Css { ".css" } else { ".js" });
    }
    if SCRIPT_LIBRARIES.iter().any(|lib| name.contains(lib)) {
        Some(".js")
    } else if STYLE_HINTS.iter().any(|hint| name.contains(hint)) {
        Some(".css")
    } else {
        None
    }
}

/// Strip misleading suffixes, the current extension and build modifiers.
/// Never returns an empty name.
pub fn clean_file_name(file_name: &str, category: ResourceCategory) -> String {
    let mut name = file_name.to_string();
    loop {
        let before = name.len();
        if let Some(cut) = INCORRECT_SUFFIXES
            .iter()
            .find_map(|suffix| suffix_start(&name, suffix))
        {
            name.truncate(cut);
        }
        name = name.trim_end_matches(['.', ' ']).to_string();
        if name.len() == before {
            break;
        }
    }

    if let Some((stem, ext)) = name.rsplit_once('.') {
        let ext = format!(".{}", ext.to_lowercase());
        if is_known_extension(&ext) && !stem.is_empty() {
            name = stem.to_string();
        }
    }

    let name = strip_modifiers(&name);
    if name.chars().count() < 2 || name.starts_with('.') {
        format!("{}_{}", category.dir_name(), short_hash(file_name))
    } else {
        name
    }
}

/// Byte offset where `suffix` starts in `name`, ASCII case-insensitively.
fn suffix_start(name: &str, suffix: &str) -> Option<usize> {
    let cut = name.len().checked_sub(suffix.len())?;
    (name.is_char_boundary(cut) && name[cut..].eq_ignore_ascii_case(suffix)).then_some(cut)
}

fn strip_modifiers(name: &str) -> String {
    let kept: Vec<&str> = name
        .split('.')
        .filter(|part| !is_version_or_modifier(&part.to_lowercase()))
        .collect();
    let joined = if kept.is_empty() {
        name.to_string()
    } else {
        kept.join(".")
    };
    // `jquery-3.5.1` leaves `jquery-3` behind after the dotted parts go.
    match joined.rsplit_once('-') {
        Some((head, tail)) if head.len() > 2 && is_version_or_modifier(&tail.to_lowercase()) => {
            head.to_string()
        }
        _ => joined,
    }
}

fn is_version_or_modifier(part: &str) -> bool {
    let version = !part.is_empty()
        && part
            .trim_start_matches('v')
            .split('.')
            .all(|piece| !piece.is_empty() && piece.chars().all(|c| c.is_ascii_digit()))
        && part != "v";
    version || MODIFIERS.contains(&part)
}

fn is_known_extension(ext: &str) -> bool {
    EXTENSION_HINTS.iter().any(|(hint, _)| *hint == ext)
        || VIDEO_EXTENSIONS.contains(&ext)
        || IMAGE_EXTENSIONS.contains(&ext)
        || ext == ".html"
        || ext == ".htm"
}

fn with_category_extension(name: String, category: ResourceCategory) -> String {
    let lower = name.to_lowercase();
    let keeps = |known: &[&str]| known.iter().any(|ext| lower.ends_with(ext));
    match category {
        ResourceCategory::Videos if keeps(VIDEO_EXTENSIONS) || name.contains('.') => name,
        ResourceCategory::Images if keeps(IMAGE_EXTENSIONS) => name,
        ResourceCategory::Fonts if keeps(FONT_EXTENSIONS) => name,
        _ if lower.ends_with(category.default_extension()) => name,
        _ => format!("{name}{}", category.default_extension()),
    }
}

/// Last URL path segment, made filesystem safe. `None` for directory URLs.
fn raw_file_name(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")?;
    let cleaned = sanitize_segment(segment);
    (!cleaned.is_empty()).then_some(cleaned)
}

fn sanitize_segment(input: &str) -> String {
    let mut cleaned: String = input
        .chars()
        .map(|c| if is_forbidden(c) { '_' } else { c })
        .collect();
    cleaned = cleaned.trim_matches(&['_', ' '][..]).to_string();
    if cleaned.chars().count() > MAX_NAME_LEN {
        let tail: String = cleaned.chars().rev().take(MAX_NAME_LEN).collect();
        cleaned = tail.chars().rev().collect();
    }
    if is_reserved_windows_name(cleaned.split('.').next().unwrap_or_default()) {
        cleaned.insert(0, '_');
    }
    cleaned
}

fn is_forbidden(c: char) -> bool {
    matches!(c,
        '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '%' | '\0'..='\u{1F}'
    )
}

fn is_reserved_windows_name(name: &str) -> bool {
    const RESERVED: &[&str] = &[
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(name))
}

fn sniff_text(content: &[u8]) -> String {
    String::from_utf8_lossy(&content[..content.len().min(SNIFF_LIMIT)]).to_lowercase()
}

fn keyword_score(text: &str, indicators: &[&str]) -> usize {
    indicators.iter().filter(|needle| text.contains(*needle)).count()
}

pub(crate) fn short_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(8);
    for byte in digest.iter().take(4) {
        let _ = write!(&mut hex, "{byte:02x}");
    }
    hex
}
