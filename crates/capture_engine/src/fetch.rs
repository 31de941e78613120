use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, ACCEPT_RANGES, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::StatusCode;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

use engine_logging::{engine_debug, engine_info, engine_warn};

use crate::capture::CaptureContext;
use crate::decode::{decompress_body, transcode};
use crate::filename::{local_path_for, ContentProbe};
use crate::http::{
    asset_headers, chunk_headers, document_headers, map_reqwest_error, video_headers,
    FetchSettings,
};
use crate::media::inspect_video;
use crate::store::StoreOutcome;
use crate::{CaptureError, DownloadTask, FailureKind, FetchError, ResourceInfo};

/// Case-insensitive markers of an anti-bot or access-denied page.
const BOT_BLOCK_MARKERS: &[&str] = &["access denied", "forbidden", "blocked", "captcha"];

/// Progress is reported each time a streamed read advances this many percent.
const PROGRESS_STEP: u8 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedDocument {
    pub status: u16,
    pub final_url: Url,
    pub headers: BTreeMap<String, Vec<String>>,
    pub content_type: Option<String>,
    pub text: String,
    pub encoding_label: String,
}

/// Fetch the main document with bounded retries.
///
/// Attempt `n` waits `(n - 1) * backoff` first. A bot-block page is permanent
/// and ends the loop at once.
pub(crate) async fn fetch_document_with_retry(
    client: &reqwest::Client,
    settings: &FetchSettings,
    target: &Url,
    forced_encoding: Option<&str>,
    cancel: &CancellationToken,
) -> Result<FetchedDocument, CaptureError> {
    let attempts = settings.document_attempts.max(1);
    let mut attempt = 1;
    loop {
        if attempt > 1 {
            let backoff = settings.retry_backoff * (attempt as u32 - 1);
            tokio::select! {
                _ = cancel.cancelled() => return Err(CaptureError::Cancelled),
                _ = tokio::time::sleep(backoff) => {}
            }
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(CaptureError::Cancelled),
            result = fetch_document(client, settings, target, forced_encoding) => result,
        };

        match result {
            Ok(document) => return Ok(document),
            Err(err) if err.kind.is_permanent() => {
                engine_warn!("main document blocked: {err}");
                return Err(CaptureError::Blocked { source: err });
            }
            Err(err) if attempt >= attempts => {
                return Err(CaptureError::MainDocument {
                    attempts,
                    source: err,
                });
            }
            Err(err) => {
                engine_warn!("main document attempt {attempt}/{attempts} failed: {err}");
                attempt += 1;
            }
        }
    }
}

/// One attempt at the main document.
pub(crate) async fn fetch_document(
    client: &reqwest::Client,
    settings: &FetchSettings,
    target: &Url,
    forced_encoding: Option<&str>,
) -> Result<FetchedDocument, FetchError> {
    let response = client
        .get(target.clone())
        .headers(document_headers(settings, target))
        .send()
        .await
        .map_err(map_reqwest_error)?;

    let status = response.status();
    if !(200..400).contains(&status.as_u16()) {
        return Err(FetchError::new(
            FailureKind::HttpStatus(status.as_u16()),
            status.to_string(),
        ));
    }

    let final_url = response.url().clone();
    let headers = collect_headers(response.headers());
    let content_type = header_str(response.headers(), CONTENT_TYPE);
    let content_encoding = header_str(response.headers(), CONTENT_ENCODING);

    let body = response.bytes().await.map_err(map_reqwest_error)?;
    if body.is_empty() {
        return Err(FetchError::new(FailureKind::EmptyBody, "empty response body"));
    }
    let body = decompress_body(body.to_vec(), content_encoding.as_deref())
        .map_err(|err| FetchError::new(FailureKind::Decode, err.to_string()))?;

    let decoded = transcode(&body, content_type.as_deref(), forced_encoding);
    let lower = decoded.text.to_lowercase();
    if let Some(marker) = BOT_BLOCK_MARKERS.iter().find(|marker| lower.contains(*marker)) {
        return Err(FetchError::new(
            FailureKind::BotBlocked,
            format!("response body mentions {marker:?}"),
        ));
    }

    engine_debug!(
        "document {} -> {} ({} bytes, {})",
        target,
        final_url,
        decoded.text.len(),
        decoded.encoding_label
    );
    Ok(FetchedDocument {
        status: status.as_u16(),
        final_url,
        headers,
        content_type,
        text: decoded.text,
        encoding_label: decoded.encoding_label,
    })
}

/// Download one resource into the store and return its local path.
///
/// Errors are per-resource; the caller marks the task failed and moves on.
pub(crate) async fn fetch_resource(
    ctx: &CaptureContext,
    task: &DownloadTask,
) -> Result<String, FetchError> {
    if ctx.cancel.is_cancelled() {
        return Err(FetchError::cancelled());
    }
    let url = task.url.as_str();
    let category = task.category;
    let is_video = category.is_video();
    let headers = if is_video {
        video_headers(&ctx.settings)
    } else {
        asset_headers(&ctx.settings)
    };

    let mut response = send(ctx, url, headers).await?;
    if is_video && response.status() == StatusCode::PARTIAL_CONTENT {
        engine_info!("{url} answered 206 to a plain request, refetching the whole file");
        drop(response);
        response = send(ctx, url, video_headers(&ctx.settings)).await?;
    }
    if response.status() != StatusCode::OK {
        let status = response.status();
        return Err(FetchError::new(
            FailureKind::HttpStatus(status.as_u16()),
            status.to_string(),
        ));
    }

    let content_type = header_str(response.headers(), CONTENT_TYPE);
    let accepts_ranges = header_str(response.headers(), ACCEPT_RANGES)
        .is_some_and(|value| value.eq_ignore_ascii_case("bytes"));
    let total = response.content_length().filter(|len| *len > 0);
    if let Some(total) = total {
        ctx.progress
            .set_file_download_progress(url, 0, Some(total), 0);
    }

    let settings = &ctx.settings;
    let wants_chunks = total.is_some_and(|len| {
        (is_video && len > settings.video_chunk_threshold) || len > settings.large_body_threshold
    });
    let content = match total {
        Some(total) if wants_chunks && accepts_ranges => {
            drop(response);
            download_chunked(ctx, url, total).await?
        }
        Some(total) if total <= settings.streaming_threshold => {
            let body = response.bytes().await.map_err(map_reqwest_error)?;
            ctx.progress
                .set_file_download_progress(url, body.len() as u64, Some(body.len() as u64), 100);
            body
        }
        _ => read_streaming(ctx, url, response, total).await?,
    };

    if ctx.cancel.is_cancelled() {
        return Err(FetchError::cancelled());
    }

    if is_video {
        let verdict = inspect_video(&content);
        if verdict.is_acceptable() {
            engine_debug!("{url}: {verdict:?}");
        } else {
            engine_warn!("{url}: video validation failed ({verdict:?}), keeping it anyway");
        }
    }

    let content = if category.is_text() && std::str::from_utf8(&content).is_err() {
        let decoded = transcode(&content, content_type.as_deref(), None);
        engine_debug!("{url}: transcoded from {}", decoded.encoding_label);
        Bytes::from(decoded.text)
    } else {
        content
    };

    let local_path = match &task.local_path {
        Some(path) => path.clone(),
        None => local_path_for(
            url,
            category,
            ctx.options.correct_file_names,
            Some(ContentProbe {
                content: &content,
                content_type: content_type.as_deref(),
            }),
        ),
    };

    let size = content.len() as u64;
    let outcome = ctx.store.put_if_absent(ResourceInfo {
        url: url.to_string(),
        local_path,
        category,
        content,
    });
    match outcome {
        StoreOutcome::Inserted(path) => {
            ctx.progress.set_file_size(url, size);
            Ok(path)
        }
        StoreOutcome::Existing(path) => Ok(path),
        StoreOutcome::Full => Err(FetchError::new(
            FailureKind::CapacityReached,
            format!("store holds {} resources", ctx.store.capacity()),
        )),
    }
}

async fn send(
    ctx: &CaptureContext,
    url: &str,
    headers: HeaderMap,
) -> Result<reqwest::Response, FetchError> {
    let request = ctx.client.get(url).headers(headers).send();
    tokio::select! {
        _ = ctx.cancel.cancelled() => Err(FetchError::cancelled()),
        response = request => response.map_err(map_reqwest_error),
    }
}

/// Read a body while reporting progress every few percent of `total`.
async fn read_streaming(
    ctx: &CaptureContext,
    url: &str,
    response: reqwest::Response,
    total: Option<u64>,
) -> Result<Bytes, FetchError> {
    let capacity = total.unwrap_or(0).min(ctx.settings.large_body_threshold) as usize;
    let mut buffer = Vec::with_capacity(capacity);
    let mut steps = ProgressSteps::default();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        if ctx.cancel.is_cancelled() {
            return Err(FetchError::cancelled());
        }
        let chunk = chunk.map_err(map_reqwest_error)?;
        buffer.extend_from_slice(&chunk);
        let downloaded = buffer.len() as u64;
        match total {
            Some(total) => {
                if let Some(percent) = steps.advance(downloaded, total) {
                    ctx.progress
                        .set_file_download_progress(url, downloaded, Some(total), percent);
                }
            }
            None => ctx
                .progress
                .set_file_download_progress(url, downloaded, None, 0),
        }
    }
    let downloaded = buffer.len() as u64;
    ctx.progress
        .set_file_download_progress(url, downloaded, Some(downloaded), 100);
    Ok(Bytes::from(buffer))
}

/// Fetch `total` bytes as ordered ranges with bounded parallelism.
async fn download_chunked(ctx: &CaptureContext, url: &str, total: u64) -> Result<Bytes, FetchError> {
    let chunk_size = ctx.settings.chunk_size.max(1);
    let chunk_count = total.div_ceil(chunk_size) as usize;
    engine_info!("{url}: downloading {total} bytes in {chunk_count} chunks");

    let semaphore = Arc::new(Semaphore::new(ctx.settings.chunk_concurrency.max(1)));
    let mut joinset = JoinSet::new();
    for index in 0..chunk_count {
        let start = index as u64 * chunk_size;
        let end = (start + chunk_size).min(total) - 1;
        let client = ctx.client.clone();
        let headers = chunk_headers(&ctx.settings, start, end);
        let cancel = ctx.cancel.clone();
        let semaphore = semaphore.clone();
        let url = url.to_string();
        joinset.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| FetchError::cancelled())?;
            let body = fetch_chunk(&client, &url, headers, end - start + 1, &cancel).await?;
            Ok::<_, FetchError>((index, body))
        });
    }

    let mut chunks: Vec<Option<Bytes>> = vec![None; chunk_count];
    let mut downloaded = 0u64;
    let mut finished = 0usize;
    while let Some(joined) = joinset.join_next().await {
        let result = joined
            .map_err(|err| FetchError::new(FailureKind::Network, err.to_string()))
            .and_then(|inner| inner);
        let (index, body) = match result {
            Ok(chunk) => chunk,
            Err(err) => {
                joinset.abort_all();
                return Err(err);
            }
        };
        downloaded += body.len() as u64;
        finished += 1;
        chunks[index] = Some(body);
        let percent = (finished * 100 / chunk_count) as u8;
        ctx.progress
            .set_file_download_progress(url, downloaded, Some(total), percent);
    }

    let mut assembled = Vec::with_capacity(total as usize);
    for chunk in chunks {
        let chunk = chunk.ok_or_else(|| FetchError::new(FailureKind::Network, "missing chunk"))?;
        assembled.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(assembled))
}

async fn fetch_chunk(
    client: &reqwest::Client,
    url: &str,
    headers: HeaderMap,
    expected: u64,
    cancel: &CancellationToken,
) -> Result<Bytes, FetchError> {
    if cancel.is_cancelled() {
        return Err(FetchError::cancelled());
    }
    let request = async {
        let response = client
            .get(url)
            .headers(headers)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        if response.status() != StatusCode::PARTIAL_CONTENT {
            return Err(FetchError::new(
                FailureKind::RangeUnsupported,
                format!("chunk answered {}", response.status()),
            ));
        }
        response.bytes().await.map_err(map_reqwest_error)
    };
    let body = tokio::select! {
        _ = cancel.cancelled() => return Err(FetchError::cancelled()),
        body = request => body?,
    };
    if cancel.is_cancelled() {
        return Err(FetchError::cancelled());
    }
    if body.len() as u64 != expected {
        return Err(FetchError::new(
            FailureKind::RangeUnsupported,
            format!("chunk returned {} of {expected} bytes", body.len()),
        ));
    }
    Ok(body)
}

/// Decides when a streamed read is worth another progress report.
#[derive(Debug, Default)]
struct ProgressSteps {
    last: u8,
}

impl ProgressSteps {
    /// Returns the percentage to report once at least `PROGRESS_STEP` points
    /// have passed since the last report, or when the body is complete.
    fn advance(&mut self, downloaded: u64, total: u64) -> Option<u8> {
        let percent = percent(downloaded, total);
        let due = percent >= self.last.saturating_add(PROGRESS_STEP)
            || (percent == 100 && self.last < 100);
        if due {
            self.last = percent;
        }
        due.then_some(percent)
    }
}

fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    (done.saturating_mul(100) / total).min(100) as u8
}

fn header_str(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

fn collect_headers(headers: &HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut collected: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        collected.entry(name.as_str().to_string()).or_default().push(value);
    }
    collected
}

#[cfg(test)]
mod tests {
    use super::ProgressSteps;

    #[test]
    fn streamed_progress_is_reported_in_steps() {
        let mut steps = ProgressSteps::default();
        let reported: Vec<u8> = (1..=100u64)
            .filter_map(|downloaded| steps.advance(downloaded * 10, 1000))
            .collect();
        let expected: Vec<u8> = (1..=20).map(|step| step * 5).collect();
        assert_eq!(reported, expected);
    }

    #[test]
    fn a_single_large_read_reports_completion_once() {
        let mut steps = ProgressSteps::default();
        assert_eq!(steps.advance(1000, 1000), Some(100));
        assert_eq!(steps.advance(1000, 1000), None);
    }
}
