//! Capture engine: fetches a page and its assets, rewrites the document to
//! local copies and packs everything into a zip archive.
mod archive;
mod capture;
mod decode;
mod document;
mod engine;
mod fetch;
mod filename;
mod format;
mod http;
mod media;
mod persist;
mod progress;
mod resolve;
mod sanitize;
mod scheduler;
mod serialize;
mod store;
mod types;

pub use archive::{stage_capture, write_archive, ArchiveError, INDEX_FILE};
pub use capture::CaptureEngine;
pub use decode::{decode_with_label, decompress_body, transcode, DecodeError, DecodedText};
pub use engine::EngineHandle;
pub use fetch::FetchedDocument;
pub use filename::{clean_file_name, detect_extension, local_path_for, with_hash_suffix, ContentProbe};
pub use http::{EngineConfig, FetchSettings, DEFAULT_USER_AGENT};
pub use media::{inspect_video, VideoContainer, VideoVerdict};
pub use persist::{ensure_output_dir, AtomicFileWriter, PersistError};
pub use progress::{ChannelProgressSink, ProgressReporter, ProgressSink};
pub use resolve::{normalize_target, resolve_reference};
pub use sanitize::{MaliciousRules, RuleSet, Sanitizer, SanitizerRules};
pub use store::{ResourceStore, StoreOutcome};
pub use types::{
    AttrTarget, CaptureError, CaptureResult, DownloadTask, EngineEvent, FailureKind, FetchError,
    ResourceInfo,
};
