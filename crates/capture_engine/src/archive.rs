use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use walkdir::WalkDir;

use engine_logging::{engine_debug, engine_warn};

use crate::persist::{ensure_output_dir, AtomicFileWriter, PersistError};
use crate::ResourceInfo;

pub const INDEX_FILE: &str = "index.html";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive directory unusable")]
    OutputDir(#[source] PersistError),
    #[error("failed to write archive {path}")]
    Write {
        path: String,
        #[source]
        source: PersistError,
    },
    #[error("failed to read archive size")]
    Metadata(#[source] io::Error),
}

/// Lay out the rewritten document and every stored resource under `root`.
///
/// The document is mandatory; a resource that cannot be written is logged
/// and left out. Returns the relative paths actually written, document first.
pub fn stage_capture(
    root: &Path,
    document: &str,
    resources: &[Arc<ResourceInfo>],
) -> Result<Vec<String>, PersistError> {
    let writer = AtomicFileWriter::new(root.to_path_buf());
    writer.write(INDEX_FILE, document.as_bytes())?;

    let mut written = vec![INDEX_FILE.to_string()];
    for resource in resources {
        match writer.write(&resource.local_path, &resource.content) {
            Ok(_) => written.push(resource.local_path.clone()),
            Err(err) => engine_warn!(
                "skipping {} ({}): {err}",
                resource.local_path,
                resource.url
            ),
        }
    }
    engine_debug!("staged {} file(s) in {}", written.len(), root.display());
    Ok(written)
}

/// Zip everything below `staging` into `output_dir` and return the archive
/// path with its size in bytes.
pub fn write_archive(staging: &Path, output_dir: &Path) -> Result<(PathBuf, u64), ArchiveError> {
    ensure_output_dir(output_dir).map_err(ArchiveError::OutputDir)?;
    let name = archive_file_name();
    let writer = AtomicFileWriter::new(output_dir.to_path_buf());
    let path = writer
        .write_with(&name, |file| zip_tree(staging, file))
        .map_err(|source| ArchiveError::Write {
            path: name.clone(),
            source,
        })?;
    let size = std::fs::metadata(&path)
        .map_err(ArchiveError::Metadata)?
        .len();
    Ok((path, size))
}

fn zip_tree(staging: &Path, file: &mut File) -> io::Result<()> {
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    for entry in WalkDir::new(staging).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(staging) else {
            continue;
        };
        let name = entry_name(relative);
        zip.start_file(name, options).map_err(io::Error::other)?;
        zip.write_all(&std::fs::read(entry.path())?)?;
    }
    zip.finish().map_err(io::Error::other)?;
    Ok(())
}

/// Archive entries always use `/`, whatever the host separator.
fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn archive_file_name() -> String {
    format!(
        "webpage_{}.zip",
        chrono::Local::now().format("%Y%m%d_%H%M%S_%3f")
    )
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use bytes::Bytes;
    use capture_core::ResourceCategory;

    use super::*;

    fn resource(url: &str, path: &str, body: &'static [u8]) -> Arc<ResourceInfo> {
        Arc::new(ResourceInfo {
            url: url.to_string(),
            local_path: path.to_string(),
            category: ResourceCategory::Css,
            content: Bytes::from_static(body),
        })
    }

    #[test]
    fn archive_holds_the_staged_tree() {
        let staging = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let written = stage_capture(
            staging.path(),
            "<html></html>",
            &[resource("https://a.test/s.css", "static/css/s.css", b"body{}")],
        )
        .unwrap();
        assert_eq!(written, vec!["index.html", "static/css/s.css"]);

        let (path, size) = write_archive(staging.path(), output.path()).unwrap();
        assert!(path.starts_with(output.path()));
        assert_eq!(size, std::fs::metadata(&path).unwrap().len());

        let mut archive = zip::ZipArchive::new(File::open(&path).unwrap()).unwrap();
        let mut names: Vec<_> = archive.file_names().map(str::to_string).collect();
        names.sort();
        assert_eq!(names, vec!["index.html", "static/css/s.css"]);
        let mut css = String::new();
        archive
            .by_name("static/css/s.css")
            .unwrap()
            .read_to_string(&mut css)
            .unwrap();
        assert_eq!(css, "body{}");
    }

    #[test]
    fn unwritable_resources_are_skipped() {
        let staging = tempfile::tempdir().unwrap();
        let written = stage_capture(
            staging.path(),
            "<p>x</p>",
            &[resource("https://a.test/x", "../outside.css", b"x")],
        )
        .unwrap();
        assert_eq!(written, vec!["index.html"]);
    }
}
