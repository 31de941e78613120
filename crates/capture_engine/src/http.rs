use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, CACHE_CONTROL,
    PRAGMA, RANGE, REFERER, UPGRADE_INSECURE_REQUESTS, USER_AGENT,
};
use url::Url;

use crate::{FailureKind, FetchError};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const DOCUMENT_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8";
const VIDEO_ACCEPT: &str =
    "video/webm,video/ogg,video/*;q=0.9,application/ogg;q=0.7,audio/*;q=0.6,*/*;q=0.5";
const ACCEPT_LANGUAGES: &str = "en-US,en;q=0.9,zh-CN;q=0.8,zh;q=0.7";

/// Static HTTP behaviour of an engine. Per-capture knobs live in
/// `CaptureOptions`.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub connect_timeout: Duration,
    /// The client timeout never drops below this, whatever the options say.
    pub request_timeout_floor: Duration,
    pub redirect_limit: usize,
    pub user_agent: String,
    pub chunk_size: u64,
    pub chunk_concurrency: usize,
    /// Videos larger than this are fetched in ranged chunks.
    pub video_chunk_threshold: u64,
    /// Any body larger than this is fetched in ranged chunks.
    pub large_body_threshold: u64,
    /// Bodies larger than this (or of unknown size) use the monitored reader.
    pub streaming_threshold: u64,
    pub document_attempts: usize,
    pub retry_backoff: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            request_timeout_floor: Duration::from_secs(120),
            redirect_limit: 10,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            chunk_size: 2 * 1024 * 1024,
            chunk_concurrency: 4,
            video_chunk_threshold: 5 * 1024 * 1024,
            large_body_threshold: 10 * 1024 * 1024,
            streaming_threshold: 1024 * 1024,
            document_attempts: 3,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

impl FetchSettings {
    pub fn effective_timeout(&self, requested: Duration) -> Duration {
        requested.max(self.request_timeout_floor)
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub fetch: FetchSettings,
    /// Where finished archives are written.
    pub output_dir: PathBuf,
}

impl EngineConfig {
    pub fn default_with_output(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            fetch: FetchSettings::default(),
            output_dir: output_dir.into(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::default_with_output(std::env::temp_dir())
    }
}

/// One client per capture; its timeout and redirect policy follow the options.
pub(crate) fn build_client(
    settings: &FetchSettings,
    timeout: Duration,
    follow_redirects: bool,
) -> Result<reqwest::Client, FetchError> {
    let policy = if follow_redirects {
        let limit = settings.redirect_limit;
        reqwest::redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= limit {
                attempt.error("redirect limit exceeded")
            } else {
                attempt.follow()
            }
        })
    } else {
        reqwest::redirect::Policy::none()
    };

    reqwest::Client::builder()
        .connect_timeout(settings.connect_timeout)
        .timeout(settings.effective_timeout(timeout))
        .redirect(policy)
        .build()
        .map_err(|err| FetchError::new(FailureKind::Network, err.to_string()))
}

/// Browser-like headers for the main document.
pub(crate) fn document_headers(settings: &FetchSettings, target: &Url) -> HeaderMap {
    let mut headers = HeaderMap::new();
    insert(&mut headers, USER_AGENT, &settings.user_agent);
    insert(&mut headers, ACCEPT, DOCUMENT_ACCEPT);
    insert(&mut headers, ACCEPT_LANGUAGE, ACCEPT_LANGUAGES);
    insert(&mut headers, ACCEPT_ENCODING, "gzip, deflate");
    insert(&mut headers, CACHE_CONTROL, "no-cache");
    insert(&mut headers, PRAGMA, "no-cache");
    insert(&mut headers, UPGRADE_INSECURE_REQUESTS, "1");
    for (name, value) in [
        ("sec-fetch-dest", "document"),
        ("sec-fetch-mode", "navigate"),
        ("sec-fetch-site", "none"),
        ("sec-fetch-user", "?1"),
    ] {
        insert(&mut headers, HeaderName::from_static(name), value);
    }
    if let Some(host) = target.host_str() {
        let referer = match target.port() {
            Some(port) => format!("{}://{host}:{port}/", target.scheme()),
            None => format!("{}://{host}/", target.scheme()),
        };
        insert(&mut headers, REFERER, &referer);
    }
    headers
}

pub(crate) fn asset_headers(settings: &FetchSettings) -> HeaderMap {
    let mut headers = HeaderMap::new();
    insert(&mut headers, USER_AGENT, &settings.user_agent);
    insert(&mut headers, ACCEPT, "*/*");
    headers
}

/// Media requests disable compression and never send `Range`, so servers
/// answer with the whole body.
pub(crate) fn video_headers(settings: &FetchSettings) -> HeaderMap {
    let mut headers = HeaderMap::new();
    insert(&mut headers, USER_AGENT, &settings.user_agent);
    insert(&mut headers, ACCEPT, VIDEO_ACCEPT);
    insert(&mut headers, ACCEPT_ENCODING, "identity");
    insert(&mut headers, ACCEPT_LANGUAGE, ACCEPT_LANGUAGES);
    insert(&mut headers, CACHE_CONTROL, "no-cache");
    headers
}

pub(crate) fn chunk_headers(settings: &FetchSettings, start: u64, end: u64) -> HeaderMap {
    let mut headers = HeaderMap::new();
    insert(&mut headers, USER_AGENT, &settings.user_agent);
    insert(&mut headers, ACCEPT, "video/*,*/*;q=0.8");
    insert(&mut headers, ACCEPT_ENCODING, "identity");
    insert(&mut headers, RANGE, &format!("bytes={start}-{end}"));
    headers
}

fn insert(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => engine_logging::engine_warn!("dropping invalid header value for {name}"),
    }
}

pub(crate) fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::new(FailureKind::Timeout, err.to_string());
    }
    if err.is_redirect() {
        return FetchError::new(FailureKind::RedirectLimitExceeded, err.to_string());
    }
    if err.is_builder() {
        return FetchError::new(FailureKind::InvalidUrl, err.to_string());
    }
    FetchError::new(FailureKind::Network, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_never_drops_below_the_floor() {
        let settings = FetchSettings::default();
        assert_eq!(
            settings.effective_timeout(Duration::from_secs(60)),
            Duration::from_secs(120)
        );
        assert_eq!(
            settings.effective_timeout(Duration::from_secs(300)),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn referer_is_the_site_root() {
        let url = Url::parse("http://127.0.0.1:8080/a/b?c=d").unwrap();
        let headers = document_headers(&FetchSettings::default(), &url);
        assert_eq!(headers[REFERER], "http://127.0.0.1:8080/");
        assert_eq!(headers[ACCEPT_ENCODING], "gzip, deflate");
    }

    #[test]
    fn video_requests_never_ask_for_ranges() {
        let headers = video_headers(&FetchSettings::default());
        assert!(headers.get(RANGE).is_none());
        assert_eq!(headers[ACCEPT_ENCODING], "identity");
    }
}
