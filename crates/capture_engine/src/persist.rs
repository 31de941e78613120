use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("output directory missing or not writable: {0}")]
    OutputDir(String),
    #[error("refusing to write outside the output directory: {0}")]
    UnsafePath(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Ensure output directory exists; create if missing.
pub fn ensure_output_dir(dir: &Path) -> Result<(), PersistError> {
    if dir.exists() {
        let meta = fs::metadata(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
        if !meta.is_dir() {
            return Err(PersistError::OutputDir(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
    } else {
        fs::create_dir_all(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
    }
    // Writability probe.
    NamedTempFile::new_in(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
    Ok(())
}

/// Writes files under a root directory through a temp file and a rename, so a
/// reader never observes a partial file.
pub struct AtomicFileWriter {
    dir: PathBuf,
}

impl AtomicFileWriter {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        &self.dir
    }

    /// Write `content` to `{root}/{relative}`, creating parent directories.
    pub fn write(&self, relative: &str, content: &[u8]) -> Result<PathBuf, PersistError> {
        self.write_with(relative, |file| file.write_all(content))
    }

    /// Like [`write`](Self::write) but lets the caller stream into the file.
    pub fn write_with<F>(&self, relative: &str, fill: F) -> Result<PathBuf, PersistError>
    where
        F: FnOnce(&mut fs::File) -> io::Result<()>,
    {
        let target = self.target_for(relative)?;
        let parent = target.parent().unwrap_or(&self.dir).to_path_buf();
        fs::create_dir_all(&parent)?;

        let mut tmp = NamedTempFile::new_in(&parent)?;
        fill(tmp.as_file_mut())?;
        tmp.flush()?;
        tmp.as_file_mut().sync_all()?;

        if target.exists() {
            fs::remove_file(&target)?;
        }
        tmp.persist(&target).map_err(|e| PersistError::Io(e.error))?;
        Ok(target)
    }

    fn target_for(&self, relative: &str) -> Result<PathBuf, PersistError> {
        let path = Path::new(relative);
        let normal = path
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if relative.is_empty() || !normal {
            return Err(PersistError::UnsafePath(relative.to_string()));
        }
        Ok(self.dir.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_paths_get_their_directories() {
        let dir = tempfile::tempdir().unwrap();
        let writer = AtomicFileWriter::new(dir.path().to_path_buf());
        let written = writer.write("static/css/site.css", b"body{}").unwrap();
        assert_eq!(written, dir.path().join("static/css/site.css"));
        assert_eq!(fs::read(written).unwrap(), b"body{}");
    }

    #[test]
    fn existing_files_are_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let writer = AtomicFileWriter::new(dir.path().to_path_buf());
        writer.write("index.html", b"old").unwrap();
        writer.write("index.html", b"new").unwrap();
        assert_eq!(fs::read(dir.path().join("index.html")).unwrap(), b"new");
    }

    #[test]
    fn escaping_paths_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let writer = AtomicFileWriter::new(dir.path().to_path_buf());
        for bad in ["../evil", "/etc/passwd", "", "a/../../b"] {
            assert!(matches!(
                writer.write(bad, b"x"),
                Err(PersistError::UnsafePath(_))
            ));
        }
    }

    #[test]
    fn a_file_in_place_of_the_output_dir_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(
            ensure_output_dir(&file),
            Err(PersistError::OutputDir(_))
        ));
    }
}
