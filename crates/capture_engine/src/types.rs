use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use bytes::Bytes;
use capture_core::{FileInfo, ProgressInfo, ResourceCategory};
use ego_tree::NodeId;
use serde::Serialize;

use crate::archive::ArchiveError;
use crate::persist::PersistError;

#[derive(Debug)]
pub enum EngineEvent {
    Progress(ProgressInfo),
    Completed(Result<CaptureResult, CaptureError>),
}

/// Final report of one capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureResult {
    pub status_code: u16,
    pub content_type: String,
    /// Length in bytes of the decoded main document.
    pub content_length: u64,
    /// The rewritten document.
    pub content: String,
    pub headers: BTreeMap<String, Vec<String>>,
    pub final_url: String,
    pub duration_ms: u64,
    pub zip_path: PathBuf,
    pub zip_size: u64,
    pub files_count: usize,
    pub downloaded_files: Vec<String>,
    pub file_details: Vec<FileInfo>,
    pub success_count: usize,
    pub failed_count: usize,
}

/// A completed download. Content never changes once stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceInfo {
    pub url: String,
    pub local_path: String,
    pub category: ResourceCategory,
    pub content: Bytes,
}

/// Attribute of a parsed document node that points at a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrTarget {
    pub node: NodeId,
    pub attr: &'static str,
}

/// One unique resource reference discovered in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub url: String,
    pub category: ResourceCategory,
    /// Every attribute referencing `url`; all are rewritten on success.
    pub targets: Vec<AttrTarget>,
    /// Path already written into the document; the download must land there.
    pub local_path: Option<String>,
}

impl DownloadTask {
    pub fn new(url: impl Into<String>, category: ResourceCategory) -> Self {
        Self {
            url: url.into(),
            category,
            targets: Vec::new(),
            local_path: None,
        }
    }

    pub fn with_local_path(mut self, local_path: impl Into<String>) -> Self {
        self.local_path = Some(local_path.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: FailureKind,
    pub message: String,
}

impl FetchError {
    pub(crate) fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "capture stopped")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    HttpStatus(u16),
    Timeout,
    RedirectLimitExceeded,
    BotBlocked,
    EmptyBody,
    RangeUnsupported,
    CapacityReached,
    Cancelled,
    Decode,
    Network,
}

impl FailureKind {
    /// Permanent failures are never retried.
    pub fn is_permanent(&self) -> bool {
        matches!(self, FailureKind::BotBlocked)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::RedirectLimitExceeded => write!(f, "redirect limit exceeded"),
            FailureKind::BotBlocked => write!(f, "blocked by the site"),
            FailureKind::EmptyBody => write!(f, "empty body"),
            FailureKind::RangeUnsupported => write!(f, "range request not honoured"),
            FailureKind::CapacityReached => write!(f, "resource limit reached"),
            FailureKind::Cancelled => write!(f, "cancelled"),
            FailureKind::Decode => write!(f, "decode error"),
            FailureKind::Network => write!(f, "network error"),
        }
    }
}

/// Fatal errors that abort a whole capture.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("main document failed after {attempts} attempt(s)")]
    MainDocument {
        attempts: usize,
        #[source]
        source: FetchError,
    },
    #[error("site refused access, likely an anti-bot page")]
    Blocked {
        #[source]
        source: FetchError,
    },
    #[error("failed to stage capture files")]
    Staging(#[source] PersistError),
    #[error("failed to build archive")]
    Archive(#[source] ArchiveError),
    #[error("capture stopped")]
    Cancelled,
    #[error("engine runtime failure: {0}")]
    Runtime(String),
}
