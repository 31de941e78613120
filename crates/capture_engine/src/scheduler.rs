use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use capture_core::{file_name_from_url, FileStatus};
use tokio::task::JoinSet;

use engine_logging::{engine_debug, engine_warn};

use crate::capture::CaptureContext;
use crate::fetch::fetch_resource;
use crate::DownloadTask;

/// What happened to one task. `local_path` is `None` on failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TaskOutcome {
    pub task: DownloadTask,
    pub local_path: Option<String>,
}

/// Drain `tasks` with at most `workers` concurrent downloads and wait for all
/// of them. Tasks left in the queue after cancellation are not reported.
pub(crate) async fn run_downloads(
    ctx: Arc<CaptureContext>,
    tasks: Vec<DownloadTask>,
    workers: usize,
) -> Vec<TaskOutcome> {
    if tasks.is_empty() {
        return Vec::new();
    }
    let worker_count = workers.clamp(1, tasks.len());
    let queue = Arc::new(Mutex::new(VecDeque::from(tasks)));

    let mut joinset = JoinSet::new();
    for worker in 0..worker_count {
        let ctx = ctx.clone();
        let queue = queue.clone();
        joinset.spawn(async move { drain(worker, &ctx, &queue).await });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = joinset.join_next().await {
        match joined {
            Ok(mut finished) => outcomes.append(&mut finished),
            Err(err) => engine_warn!("download worker ended abnormally: {err}"),
        }
    }
    outcomes
}

async fn drain(
    worker: usize,
    ctx: &CaptureContext,
    queue: &Mutex<VecDeque<DownloadTask>>,
) -> Vec<TaskOutcome> {
    let mut outcomes = Vec::new();
    loop {
        if ctx.cancel.is_cancelled() {
            engine_debug!("worker {worker} stopping: capture cancelled");
            break;
        }
        let next = queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let Some(task) = next else {
            break;
        };
        let local_path = process(worker, ctx, &task).await;
        outcomes.push(TaskOutcome { task, local_path });
    }
    outcomes
}

async fn process(worker: usize, ctx: &CaptureContext, task: &DownloadTask) -> Option<String> {
    let url = task.url.as_str();
    if let Some(path) = ctx.store.local_path(url) {
        ctx.progress.set_file_status(url, FileStatus::Completed, 100);
        return Some(path);
    }
    if ctx.store.is_full() {
        engine_debug!("skipping {url}: resource limit reached");
        ctx.progress.set_file_status(url, FileStatus::Failed, 0);
        return None;
    }

    ctx.progress.set_file_status(url, FileStatus::Downloading, 0);
    ctx.progress.set_current_file(file_name_from_url(url));
    match fetch_resource(ctx, task).await {
        Ok(path) => {
            engine_debug!("worker {worker}: {url} -> {path}");
            ctx.progress.set_file_status(url, FileStatus::Completed, 100);
            Some(path)
        }
        Err(err) => {
            engine_debug!("worker {worker}: {url} failed: {err}");
            ctx.progress.set_file_status(url, FileStatus::Failed, 0);
            None
        }
    }
}
