use capture_core::{CaptureOptions, ResourceCategory};
use pretty_assertions::assert_eq;

#[test]
fn bounds_are_clamped() {
    let low = CaptureOptions {
        timeout: 5,
        max_files: 3,
        max_concurrency: 0,
        ..CaptureOptions::default()
    }
    .normalized();
    assert_eq!(low.timeout, 60);
    assert_eq!(low.max_files, 200);
    assert_eq!(low.max_concurrency, 10);

    let high = CaptureOptions {
        timeout: 10_000,
        max_files: 50_000,
        max_concurrency: 32,
        ..CaptureOptions::default()
    }
    .normalized();
    assert_eq!(high.timeout, 300);
    assert_eq!(high.max_files, 1000);
    assert_eq!(high.max_concurrency, 32);
}

#[test]
fn values_inside_the_bounds_survive() {
    let opts = CaptureOptions {
        timeout: 90,
        max_files: 500,
        ..CaptureOptions::default()
    }
    .normalized();
    assert_eq!(opts.timeout, 90);
    assert_eq!(opts.max_files, 500);
}

#[test]
fn archive_creation_is_always_forced_on() {
    let opts = CaptureOptions {
        create_zip: false,
        ..CaptureOptions::default()
    }
    .normalized();
    assert!(opts.create_zip);
}

#[test]
fn blank_encoding_means_auto() {
    let opts = CaptureOptions {
        force_encoding: "  ".to_string(),
        ..CaptureOptions::default()
    }
    .normalized();
    assert_eq!(opts.forced_encoding(), None);

    let forced = CaptureOptions {
        force_encoding: "GBK".to_string(),
        ..CaptureOptions::default()
    }
    .normalized();
    assert_eq!(forced.forced_encoding(), Some("GBK"));
}

#[test]
fn json_uses_camel_case_and_fills_defaults() {
    let opts: CaptureOptions =
        serde_json::from_str(r#"{"includeVideos": true, "removeAds": true, "maxFiles": 400}"#)
            .unwrap();
    assert!(opts.include_videos);
    assert!(opts.include_images);
    assert!(opts.remove_ads);
    assert!(opts.any_sanitization());
    assert_eq!(opts.max_files, 400);
    assert_eq!(
        opts.enabled_categories(),
        vec![
            ResourceCategory::Css,
            ResourceCategory::Js,
            ResourceCategory::Images,
            ResourceCategory::Videos,
        ]
    );
}

#[test]
fn all_categories_can_be_disabled() {
    let opts = CaptureOptions {
        include_images: false,
        include_styles: false,
        include_scripts: false,
        include_fonts: false,
        include_videos: false,
        ..CaptureOptions::default()
    };
    assert!(opts.enabled_categories().is_empty());
    assert!(!opts.any_sanitization());
}
