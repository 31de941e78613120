//! Capture core: IO-free options, categories and the progress state machine.
mod category;
mod options;
mod progress;

pub use category::ResourceCategory;
pub use options::{
    CaptureOptions, AUTO_ENCODING, DEFAULT_CONCURRENCY, MAX_MAX_FILES, MAX_TIMEOUT_SECS,
    MIN_MAX_FILES, MIN_TIMEOUT_SECS,
};
pub use progress::{
    file_name_from_url, format_file_size, FileCounts, FileInfo, FileStatus, Phase, ProgressInfo,
    ProgressState, PENDING_SIZE_LABEL,
};
