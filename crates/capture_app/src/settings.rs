use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use capture_core::CaptureOptions;
use capture_engine::{ensure_output_dir, SanitizerRules};
use engine_logging::engine_info;
use serde::de::DeserializeOwned;

/// Read a settings file. Files ending in `.ron` are parsed as RON, anything
/// else as JSON.
fn load<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let is_ron = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("ron"));
    let value = if is_ron {
        ron::from_str(&content).with_context(|| format!("invalid RON in {}", path.display()))?
    } else {
        serde_json::from_str(&content)
            .with_context(|| format!("invalid JSON in {}", path.display()))?
    };
    engine_info!("Loaded settings from {:?}", path);
    Ok(value)
}

pub(crate) fn load_options(path: Option<&Path>) -> Result<CaptureOptions> {
    match path {
        Some(path) => load(path),
        None => Ok(CaptureOptions::default()),
    }
}

pub(crate) fn load_rules(path: Option<&Path>) -> Result<SanitizerRules> {
    match path {
        Some(path) => load(path),
        None => Ok(SanitizerRules::default()),
    }
}

/// Copy a finished archive into `dir`, keeping its file name.
pub(crate) fn save_archive_to(archive: &Path, dir: &Path) -> Result<PathBuf> {
    ensure_output_dir(dir).with_context(|| format!("cannot use {} as target", dir.display()))?;
    let name = archive
        .file_name()
        .with_context(|| format!("{} has no file name", archive.display()))?;
    let target = dir.join(name);
    fs::copy(archive, &target).with_context(|| {
        format!(
            "failed to copy {} to {}",
            archive.display(),
            target.display()
        )
    })?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_path_gives_defaults() {
        assert_eq!(load_options(None).unwrap(), CaptureOptions::default());
    }

    #[test]
    fn json_options_use_camel_case_and_default_the_rest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("options.json");
        fs::write(&path, r#"{"includeVideos": true, "removeAds": true, "timeout": 90}"#).unwrap();

        let options = load_options(Some(&path)).unwrap();
        assert!(options.include_videos);
        assert!(options.remove_ads);
        assert_eq!(options.timeout, 90);
        assert!(options.include_images);
        assert!(!options.include_fonts);
    }

    #[test]
    fn ron_options_are_recognised_by_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("options.ron");
        fs::write(&path, "(includeFonts: true, forceEncoding: \"gbk\")").unwrap();

        let options = load_options(Some(&path)).unwrap();
        assert!(options.include_fonts);
        assert_eq!(options.forced_encoding(), Some("gbk"));
    }

    #[test]
    fn malformed_file_reports_its_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();

        let err = load_options(Some(&path)).unwrap_err();
        assert!(format!("{err:#}").contains("broken.json"));
    }

    #[test]
    fn archive_is_copied_under_its_own_name() {
        let source = TempDir::new().unwrap();
        let archive = source.path().join("webpage_20240101_000000_000.zip");
        fs::write(&archive, b"PK").unwrap();
        let target = TempDir::new().unwrap();
        let nested = target.path().join("saved");

        let copied = save_archive_to(&archive, &nested).unwrap();
        assert_eq!(copied, nested.join("webpage_20240101_000000_000.zip"));
        assert_eq!(fs::read(copied).unwrap(), b"PK");
    }
}
