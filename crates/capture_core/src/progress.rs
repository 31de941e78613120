use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::ResourceCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Idle,
    Analyzing,
    Downloading,
    Saving,
    Complete,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    #[default]
    Pending,
    Downloading,
    Completed,
    Failed,
}

impl FileStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, FileStatus::Completed | FileStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub name: String,
    pub kind: ResourceCategory,
    /// Human readable size; a placeholder until the size is known.
    pub size: String,
    pub total_size: u64,
    pub downloaded_size: u64,
    pub status: FileStatus,
    /// 0-100.
    pub progress: u8,
    pub url: String,
}

impl FileInfo {
    pub fn pending(url: impl Into<String>, kind: ResourceCategory) -> Self {
        let url = url.into();
        Self {
            name: file_name_from_url(&url),
            kind,
            size: PENDING_SIZE_LABEL.to_string(),
            total_size: 0,
            downloaded_size: 0,
            status: FileStatus::Pending,
            progress: 0,
            url,
        }
    }
}

pub const PENDING_SIZE_LABEL: &str = "waiting";

/// Copy of the progress state handed to observers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressInfo {
    pub phase: Phase,
    pub total_files: usize,
    pub completed_files: usize,
    pub failed_files: usize,
    pub downloading_files: usize,
    pub pending_files: usize,
    pub current_file: String,
    pub file_progress: u8,
    pub file_list: Vec<FileInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileCounts {
    pub pending: usize,
    pub downloading: usize,
    pub completed: usize,
    pub failed: usize,
}

impl FileCounts {
    pub fn total(&self) -> usize {
        self.pending + self.downloading + self.completed + self.failed
    }
}

/// Authoritative capture progress. Aggregates are always derived from the
/// file list, never tracked separately.
#[derive(Debug, Clone, Default)]
pub struct ProgressState {
    phase: Phase,
    current_file: String,
    file_progress: u8,
    files: Vec<FileInfo>,
    index: HashMap<String, usize>,
}

impl ProgressState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh state for a new capture.
    pub fn reset(&mut self) {
        *self = Self {
            phase: Phase::Analyzing,
            current_file: "preparing".to_string(),
            ..Self::default()
        };
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: Phase, current_file: impl Into<String>, file_progress: u8) {
        self.phase = phase;
        self.current_file = current_file.into();
        self.file_progress = file_progress.min(100);
    }

    pub fn set_current_file(&mut self, current_file: impl Into<String>) {
        self.current_file = current_file.into();
    }

    /// Registers discovered files as pending and enters the download phase.
    /// URLs already present are left untouched.
    pub fn begin_downloads<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (String, ResourceCategory)>,
    {
        for (url, kind) in entries {
            if self.index.contains_key(&url) {
                continue;
            }
            self.index.insert(url.clone(), self.files.len());
            self.files.push(FileInfo::pending(url, kind));
        }
        if self.files.iter().any(|f| !f.status.is_terminal()) {
            self.phase = Phase::Downloading;
            self.file_progress = 0;
        }
    }

    /// Returns `false` when the URL is unknown; nothing changes in that case.
    pub fn set_file_status(&mut self, url: &str, status: FileStatus, progress: u8) -> bool {
        let Some(file) = self.file_mut(url) else {
            return false;
        };
        file.status = status;
        file.progress = progress.min(100);
        self.advance_if_settled();
        true
    }

    pub fn set_file_download_progress(
        &mut self,
        url: &str,
        downloaded: u64,
        total: Option<u64>,
        progress: u8,
    ) -> bool {
        let Some(file) = self.file_mut(url) else {
            return false;
        };
        file.status = FileStatus::Downloading;
        file.progress = progress.min(100);
        file.downloaded_size = downloaded;
        if let Some(total) = total.filter(|t| *t > 0) {
            file.total_size = total;
        }
        true
    }

    /// Final size of a finished download.
    pub fn set_file_size(&mut self, url: &str, size: u64) -> bool {
        let Some(file) = self.file_mut(url) else {
            return false;
        };
        file.size = format_file_size(size);
        file.total_size = size;
        file.downloaded_size = size;
        true
    }

    pub fn mark_stopped(&mut self) {
        self.phase = Phase::Stopped;
        self.current_file = "stopped".to_string();
    }

    pub fn counts(&self) -> FileCounts {
        let mut counts = FileCounts::default();
        for file in &self.files {
            match file.status {
                FileStatus::Pending => counts.pending += 1,
                FileStatus::Downloading => counts.downloading += 1,
                FileStatus::Completed => counts.completed += 1,
                FileStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn snapshot(&self) -> ProgressInfo {
        let counts = self.counts();
        ProgressInfo {
            phase: self.phase,
            total_files: self.files.len(),
            completed_files: counts.completed,
            failed_files: counts.failed,
            downloading_files: counts.downloading,
            pending_files: counts.pending,
            current_file: self.current_file.clone(),
            file_progress: self.file_progress,
            file_list: self.files.clone(),
        }
    }

    fn file_mut(&mut self, url: &str) -> Option<&mut FileInfo> {
        let idx = *self.index.get(url)?;
        self.files.get_mut(idx)
    }

    fn advance_if_settled(&mut self) {
        if self.phase != Phase::Downloading || self.files.is_empty() {
            return;
        }
        if self.files.iter().all(|f| f.status.is_terminal()) {
            self.phase = Phase::Saving;
            self.current_file = "saving files".to_string();
        }
    }
}

/// `0 B`, `512 B`, `1.5 KB`, ... up to TB.
pub fn format_file_size(bytes: u64) -> String {
    const UNIT: f64 = 1024.0;
    const SIZES: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut exp = 0;
    while value >= UNIT && exp < SIZES.len() - 1 {
        value /= UNIT;
        exp += 1;
    }
    format!("{value:.1} {}", SIZES[exp])
}

/// Last path segment of a URL, `index` for directory URLs.
pub fn file_name_from_url(raw: &str) -> String {
    let Ok(url) = Url::parse(raw) else {
        return "unknown".to_string();
    };
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| "index".to_string())
}
