use std::sync::{mpsc, Arc, PoisonError, RwLock};

use capture_core::{FileStatus, Phase, ProgressInfo, ProgressState, ResourceCategory};

use crate::EngineEvent;

/// Receives progress snapshots. Called without any engine lock held; it must
/// not call back into the engine that is reporting.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

pub struct ChannelProgressSink {
    tx: mpsc::Sender<EngineEvent>,
}

impl ChannelProgressSink {
    pub fn new(tx: mpsc::Sender<EngineEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelProgressSink {
    fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

/// Thread-safe wrapper around [`ProgressState`] that pushes a snapshot to the
/// sink after each effective change.
pub struct ProgressReporter {
    state: RwLock<ProgressState>,
    sink: Option<Arc<dyn ProgressSink>>,
}

impl ProgressReporter {
    pub fn new(sink: Option<Arc<dyn ProgressSink>>) -> Self {
        Self {
            state: RwLock::new(ProgressState::new()),
            sink,
        }
    }

    pub fn snapshot(&self) -> ProgressInfo {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    pub fn phase(&self) -> Phase {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .phase()
    }

    pub fn reset(&self) {
        self.update(|state| {
            state.reset();
            true
        });
    }

    pub fn set_phase(&self, phase: Phase, current_file: impl Into<String>, file_progress: u8) {
        let current_file = current_file.into();
        self.update(|state| {
            // Once stopped, late stage transitions must not revive the capture.
            if state.phase() == Phase::Stopped && phase != Phase::Stopped {
                return false;
            }
            state.set_phase(phase, current_file, file_progress);
            true
        });
    }

    pub fn set_current_file(&self, current_file: impl Into<String>) {
        let current_file = current_file.into();
        self.update(|state| {
            state.set_current_file(current_file);
            true
        });
    }

    pub fn begin_downloads<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (String, ResourceCategory)>,
    {
        self.update(|state| {
            if state.phase() == Phase::Stopped {
                return false;
            }
            state.begin_downloads(entries);
            true
        });
    }

    pub fn set_file_status(&self, url: &str, status: FileStatus, progress: u8) {
        self.update(|state| state.set_file_status(url, status, progress));
    }

    pub fn set_file_download_progress(
        &self,
        url: &str,
        downloaded: u64,
        total: Option<u64>,
        progress: u8,
    ) {
        self.update(|state| state.set_file_download_progress(url, downloaded, total, progress));
    }

    pub fn set_file_size(&self, url: &str, size: u64) {
        self.update(|state| state.set_file_size(url, size));
    }

    pub fn mark_stopped(&self) {
        self.update(|state| {
            state.mark_stopped();
            true
        });
    }

    fn update(&self, apply: impl FnOnce(&mut ProgressState) -> bool) {
        let snapshot = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if !apply(&mut state) {
                return;
            }
            self.sink.as_ref().map(|_| state.snapshot())
        };
        if let (Some(sink), Some(snapshot)) = (self.sink.as_ref(), snapshot) {
            sink.emit(EngineEvent::Progress(snapshot));
        }
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_urls_do_not_emit() {
        let (tx, rx) = mpsc::channel();
        let reporter = ProgressReporter::new(Some(Arc::new(ChannelProgressSink::new(tx))));
        reporter.reset();
        assert!(rx.try_recv().is_ok());
        reporter.set_file_status("https://nowhere.test/x", FileStatus::Completed, 100);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn stopped_phase_sticks() {
        let reporter = ProgressReporter::default();
        reporter.reset();
        reporter.mark_stopped();
        reporter.set_phase(Phase::Saving, "saving", 90);
        assert_eq!(reporter.phase(), Phase::Stopped);
    }
}
