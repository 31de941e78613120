use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use capture_core::{CaptureOptions, ProgressInfo};

use engine_logging::engine_error;

use crate::capture::CaptureEngine;
use crate::http::EngineConfig;
use crate::progress::ChannelProgressSink;
use crate::sanitize::SanitizerRules;
use crate::{CaptureError, CaptureResult, EngineEvent};

enum EngineCommand {
    Capture { url: String, options: CaptureOptions },
}

/// Drives a [`CaptureEngine`] on a background tokio runtime for synchronous
/// callers. Progress and results arrive as [`EngineEvent`]s.
pub struct EngineHandle {
    engine: Arc<CaptureEngine>,
    cmd_tx: mpsc::Sender<EngineCommand>,
    event_rx: mpsc::Receiver<EngineEvent>,
}

impl EngineHandle {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_rules(config, &SanitizerRules::default())
    }

    pub fn with_rules(config: EngineConfig, rules: &SanitizerRules) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        let engine = Arc::new(
            CaptureEngine::new(config)
                .with_rules(rules)
                .with_sink(Arc::new(ChannelProgressSink::new(event_tx.clone()))),
        );

        let worker = engine.clone();
        thread::spawn(move || {
            let runtime = match tokio::runtime::Runtime::new() {
                Ok(runtime) => runtime,
                Err(err) => {
                    engine_error!("failed to start the capture runtime: {err}");
                    while cmd_rx.recv().is_ok() {
                        let _ = event_tx.send(EngineEvent::Completed(Err(CaptureError::Runtime(
                            err.to_string(),
                        ))));
                    }
                    return;
                }
            };
            while let Ok(command) = cmd_rx.recv() {
                let engine = worker.clone();
                let event_tx = event_tx.clone();
                runtime.spawn(handle_command(engine, command, event_tx));
            }
        });

        Self {
            engine,
            cmd_tx,
            event_rx,
        }
    }

    /// Queue a capture. A capture already running is cancelled.
    pub fn start(&self, url: impl Into<String>, options: CaptureOptions) {
        let _ = self.cmd_tx.send(EngineCommand::Capture {
            url: url.into(),
            options,
        });
    }

    pub fn stop(&self) {
        self.engine.stop();
    }

    pub fn current_progress(&self) -> ProgressInfo {
        self.engine.current_progress()
    }

    pub fn try_recv(&self) -> Option<EngineEvent> {
        self.event_rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<EngineEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }
}

async fn handle_command(
    engine: Arc<CaptureEngine>,
    command: EngineCommand,
    event_tx: mpsc::Sender<EngineEvent>,
) {
    match command {
        EngineCommand::Capture { url, options } => {
            let result = run_capture(engine, url, options).await;
            let _ = event_tx.send(EngineEvent::Completed(result));
        }
    }
}

/// Run one capture on its own task so a panic inside it still yields a
/// result for the caller.
async fn run_capture(
    engine: Arc<CaptureEngine>,
    url: String,
    options: CaptureOptions,
) -> Result<CaptureResult, CaptureError> {
    let task = tokio::spawn(async move { engine.capture(&url, options).await });
    task.await.unwrap_or_else(|err| {
        engine_error!("capture task ended abnormally: {err}");
        Err(CaptureError::Runtime(err.to_string()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProgressSink;

    struct PanickingSink;

    impl ProgressSink for PanickingSink {
        fn emit(&self, _event: EngineEvent) {
            panic!("sink failure");
        }
    }

    #[tokio::test]
    async fn a_panicking_capture_still_completes_with_an_error() {
        let out = tempfile::tempdir().unwrap();
        let engine = Arc::new(
            CaptureEngine::new(EngineConfig::default_with_output(out.path()))
                .with_sink(Arc::new(PanickingSink)),
        );
        let (event_tx, event_rx) = mpsc::channel();

        handle_command(
            engine,
            EngineCommand::Capture {
                url: "https://page.test/".to_string(),
                options: CaptureOptions::default(),
            },
            event_tx,
        )
        .await;

        match event_rx.try_recv() {
            Ok(EngineEvent::Completed(Err(CaptureError::Runtime(message)))) => {
                assert!(message.contains("panic"), "{message}");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
