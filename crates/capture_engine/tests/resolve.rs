use capture_engine::{normalize_target, resolve_reference};
use pretty_assertions::assert_eq;
use url::Url;

fn base() -> Url {
    Url::parse("https://ex.com/x/y").unwrap()
}

#[test]
fn root_relative_references_use_the_host() {
    assert_eq!(
        resolve_reference("/a/b.css", Some(&base())).as_deref(),
        Some("https://ex.com/a/b.css")
    );
}

#[test]
fn dot_relative_references_use_the_directory() {
    assert_eq!(
        resolve_reference("./c.js", Some(&base())).as_deref(),
        Some("https://ex.com/x/c.js")
    );
    assert_eq!(
        resolve_reference("img/logo.png", Some(&base())).as_deref(),
        Some("https://ex.com/x/img/logo.png")
    );
}

#[test]
fn protocol_relative_references_take_the_base_scheme() {
    assert_eq!(
        resolve_reference("//cdn.ex.com/lib.js", Some(&base())).as_deref(),
        Some("https://cdn.ex.com/lib.js")
    );
}

#[test]
fn absolute_references_are_kept() {
    assert_eq!(
        resolve_reference("http://other.test/a.png?v=2", Some(&base())).as_deref(),
        Some("http://other.test/a.png?v=2")
    );
}

#[test]
fn unfetchable_references_are_skipped() {
    for reference in [
        "",
        "   ",
        "#top",
        "data:image/png;base64,AAAA",
        "javascript:void(0)",
        "mailto:someone@ex.com",
    ] {
        assert_eq!(resolve_reference(reference, Some(&base())), None, "{reference:?}");
    }
    assert_eq!(resolve_reference("/a.css", None), None);
}

#[test]
fn targets_are_normalized_before_capture() {
    assert_eq!(
        normalize_target("ex.com/page").unwrap().as_str(),
        "https://ex.com/page"
    );
    assert!(normalize_target("ftp://ex.com/file").is_err());
}
