use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use capture_core::{CaptureOptions, Phase, ProgressInfo};
use tokio_util::sync::CancellationToken;

use engine_logging::{engine_error, engine_info, engine_warn};

use crate::archive::{stage_capture, write_archive, INDEX_FILE};
use crate::document::{apply_downloads, plan_assets, plan_inline_styles, render_document};
use crate::fetch::fetch_document_with_retry;
use crate::http::{build_client, EngineConfig, FetchSettings};
use crate::persist::PersistError;
use crate::progress::{ProgressReporter, ProgressSink};
use crate::resolve::normalize_target;
use crate::sanitize::{Sanitizer, SanitizerRules};
use crate::scheduler::{run_downloads, TaskOutcome};
use crate::serialize::DocumentEdits;
use crate::store::ResourceStore;
use crate::{CaptureError, CaptureResult, DownloadTask};

/// Everything one capture shares with its download workers. Built fresh for
/// every capture and dropped with it.
pub(crate) struct CaptureContext {
    pub client: reqwest::Client,
    pub settings: FetchSettings,
    pub options: CaptureOptions,
    pub store: ResourceStore,
    pub progress: Arc<ProgressReporter>,
    pub cancel: CancellationToken,
}

/// Runs captures one at a time. Starting a capture cancels the one in flight.
pub struct CaptureEngine {
    config: EngineConfig,
    sanitizer: Sanitizer,
    progress: Arc<ProgressReporter>,
    active: Mutex<Option<(u64, CancellationToken)>>,
    next_run: AtomicU64,
    run_lock: tokio::sync::Mutex<()>,
}

impl CaptureEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            sanitizer: Sanitizer::default(),
            progress: Arc::new(ProgressReporter::default()),
            active: Mutex::new(None),
            next_run: AtomicU64::new(0),
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_rules(mut self, rules: &SanitizerRules) -> Self {
        self.sanitizer = Sanitizer::new(rules);
        self
    }

    /// Push a snapshot to `sink` on every progress change.
    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Arc::new(ProgressReporter::new(Some(sink)));
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn current_progress(&self) -> ProgressInfo {
        self.progress.snapshot()
    }

    /// Cancel the capture in flight, if any, and report it stopped. Safe to
    /// call from any thread at any time.
    pub fn stop(&self) {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((run, token)) = active.as_ref() {
            engine_info!("stopping capture #{run}");
            token.cancel();
            self.progress.mark_stopped();
        }
    }

    pub async fn capture(
        &self,
        url: &str,
        options: CaptureOptions,
    ) -> Result<CaptureResult, CaptureError> {
        let run = self.next_run.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();
        {
            let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some((previous, token)) = active.replace((run, cancel.clone())) {
                engine_info!("capture #{run} supersedes #{previous}");
                token.cancel();
            }
        }

        // Wait for a superseded capture to unwind before touching shared state.
        let _running = self.run_lock.lock().await;
        let result = if cancel.is_cancelled() {
            Err(CaptureError::Cancelled)
        } else {
            self.run(url, options, &cancel).await
        };

        match &result {
            Ok(done) => engine_info!(
                "capture #{run} finished: {} file(s), {} failed, {}",
                done.files_count,
                done.failed_count,
                done.zip_path.display()
            ),
            Err(CaptureError::Cancelled) => {
                engine_warn!("capture #{run} stopped");
                self.progress.mark_stopped();
            }
            Err(err) => engine_error!("capture #{run} failed: {err}"),
        }

        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.as_ref().is_some_and(|(current, _)| *current == run) {
            *active = None;
        }
        result
    }

    async fn run(
        &self,
        url: &str,
        options: CaptureOptions,
        cancel: &CancellationToken,
    ) -> Result<CaptureResult, CaptureError> {
        let started = Instant::now();
        let options = options.normalized();
        let target = normalize_target(url).map_err(|reason| CaptureError::InvalidUrl {
            url: url.to_string(),
            reason,
        })?;

        self.progress.reset();
        engine_info!("capturing {target}");
        let settings = self.config.fetch.clone();
        let client = build_client(&settings, options.timeout_duration(), options.follow_redirects)
            .map_err(|err| CaptureError::Runtime(err.to_string()))?;

        self.progress
            .set_phase(Phase::Analyzing, "fetching main document", 0);
        let document = fetch_document_with_retry(
            &client,
            &settings,
            &target,
            options.forced_encoding(),
            cancel,
        )
        .await?;
        let base = document.final_url.clone();
        if base != target {
            engine_info!("redirected to {base}, resolving references against it");
        }

        self.progress
            .set_phase(Phase::Analyzing, "collecting resources", 10);
        let tasks = plan_assets(&document.text, &base, &options);
        engine_info!("{} resource(s) referenced", tasks.len());

        let ctx = Arc::new(CaptureContext {
            client,
            settings,
            options: options.clone(),
            store: ResourceStore::new(options.max_files),
            progress: self.progress.clone(),
            cancel: cancel.clone(),
        });

        let attempted: HashSet<String> = tasks.iter().map(|task| task.url.clone()).collect();
        let mut planned = tasks.len();
        let mut outcomes = self.download(&ctx, tasks).await?;

        let mut edits = DocumentEdits::default();
        apply_downloads(&outcomes, &mut edits);

        let follow_up = plan_inline_styles(
            &document.text,
            &base,
            &options,
            &ctx.store,
            &attempted,
            &mut edits,
        );
        if !follow_up.is_empty() {
            engine_info!("{} resource(s) referenced from inline styles", follow_up.len());
            planned += follow_up.len();
            outcomes.extend(self.download(&ctx, follow_up).await?);
        }

        let content = render_document(&document.text, &options, &self.sanitizer, edits);
        if cancel.is_cancelled() {
            return Err(CaptureError::Cancelled);
        }

        self.progress.set_phase(Phase::Saving, "saving files", 90);
        let resources = ctx.store.snapshot();
        let output_dir = self.config.output_dir.clone();
        let staged_content = content.clone();
        let (zip_path, zip_size) = tokio::task::spawn_blocking(move || {
            package(&staged_content, &resources, &output_dir)
        })
        .await
        .map_err(|err| CaptureError::Runtime(err.to_string()))??;

        if cancel.is_cancelled() {
            return Err(CaptureError::Cancelled);
        }
        self.progress.set_phase(Phase::Complete, "done", 100);

        let stored = ctx.store.snapshot();
        let success_count = outcomes
            .iter()
            .filter(|outcome| outcome.local_path.is_some())
            .count();
        let mut downloaded_files = vec![INDEX_FILE.to_string()];
        downloaded_files.extend(stored.iter().map(|resource| resource.local_path.clone()));

        Ok(CaptureResult {
            status_code: document.status,
            content_type: document.content_type.unwrap_or_default(),
            content_length: document.text.len() as u64,
            content,
            headers: document.headers,
            final_url: base.to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
            zip_path,
            zip_size,
            files_count: stored.len() + 1,
            downloaded_files,
            file_details: self.progress.snapshot().file_list,
            success_count,
            failed_count: planned.saturating_sub(success_count),
        })
    }

    /// One scheduler pass. An empty task list is not an error.
    async fn download(
        &self,
        ctx: &Arc<CaptureContext>,
        tasks: Vec<DownloadTask>,
    ) -> Result<Vec<TaskOutcome>, CaptureError> {
        if tasks.is_empty() {
            return Ok(Vec::new());
        }
        self.progress
            .begin_downloads(tasks.iter().map(|task| (task.url.clone(), task.category)));
        let outcomes = run_downloads(ctx.clone(), tasks, ctx.options.max_concurrency).await;
        if ctx.cancel.is_cancelled() {
            return Err(CaptureError::Cancelled);
        }
        Ok(outcomes)
    }
}

/// Stage the capture in a scratch directory and zip it into `output_dir`.
/// The scratch directory is removed on return.
fn package(
    content: &str,
    resources: &[Arc<crate::ResourceInfo>],
    output_dir: &std::path::Path,
) -> Result<(PathBuf, u64), CaptureError> {
    let staging = tempfile::tempdir().map_err(|err| CaptureError::Staging(PersistError::Io(err)))?;
    let staged = stage_capture(staging.path(), content, resources).map_err(CaptureError::Staging)?;
    if staged.len() < resources.len() + 1 {
        engine_warn!(
            "{} resource(s) could not be staged",
            resources.len() + 1 - staged.len()
        );
    }
    write_archive(staging.path(), output_dir).map_err(CaptureError::Archive)
}
