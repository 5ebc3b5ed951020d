//! Remote image download.
//!
//! Every fetch lands in its own uniquely named temporary file owned by a
//! `FetchedImage`. Dropping the handle deletes the file, so cleanup happens
//! on every exit path including task cancellation.

use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::NamedTempFile;
use url::Url;

const USER_AGENT_DEFAULT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:124.0) Gecko/20100101 Firefox/124.0";

const TEMP_FILE_PREFIX: &str = "visearch-";

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("request timed out")]
    Timeout,

    #[error("request failed: {0}")]
    Request(reqwest::Error),

    #[error("image exceeds {0} bytes")]
    TooLarge(u64),

    #[error("empty response body")]
    EmptyBody,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Request(err)
        }
    }
}

impl FetchError {
    /// Errors worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout => true,
            FetchError::Request(err) => err.is_connect() || err.is_timeout(),
            FetchError::Status(code) => *code == 429 || (500..600).contains(code),
            _ => false,
        }
    }
}

/// A downloaded image, exclusively owned by one candidate.
#[derive(Debug)]
pub struct FetchedImage {
    file: NamedTempFile,
    len: u64,
}

impl FetchedImage {
    fn create_temp_file(dir: Option<&Path>) -> std::io::Result<NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(TEMP_FILE_PREFIX).suffix(".img");
        match dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
    }

    /// Store `bytes` in a new temporary file inside `dir`.
    #[cfg(test)]
    pub fn from_bytes_in(dir: &Path, bytes: &[u8]) -> std::io::Result<Self> {
        let mut file = Self::create_temp_file(Some(dir))?;
        file.write_all(bytes)?;
        file.flush()?;
        Ok(Self {
            file,
            len: bytes.len() as u64,
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bytes(&self) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.path())
    }
}

/// Retrieves remote images.
pub trait ImageFetcher: Send + Sync + 'static {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<FetchedImage, FetchError>> + Send;
}

/// Fetcher backed by a shared async reqwest client.
pub struct HttpFetcher {
    client: reqwest::Client,
    max_bytes: u64,
    temp_dir: Option<PathBuf>,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, max_bytes: u64) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT_DEFAULT)
            .timeout(timeout)
            .connect_timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            max_bytes,
            temp_dir: None,
        })
    }

    /// Place downloads in `dir` instead of the system temp directory.
    pub fn with_temp_dir(mut self, dir: PathBuf) -> Self {
        self.temp_dir = Some(dir);
        self
    }

    fn parse_url(url: &str) -> Result<Url, FetchError> {
        let parsed =
            Url::parse(url.trim()).map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))?;

        match parsed.scheme() {
            "http" | "https" => Ok(parsed),
            scheme => Err(FetchError::InvalidUrl(format!(
                "{url}: scheme '{scheme}' not allowed"
            ))),
        }
    }
}

impl ImageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedImage, FetchError> {
        let parsed = Self::parse_url(url)?;
        let host = parsed.host_str().unwrap_or_default().to_string();

        log::debug!("{host}: requesting {}", parsed.path());
        let mut resp = self.client.get(parsed).send().await?;

        let status = resp.status();
        if !status.is_success() {
            log::debug!("{host}: {status}");
            return Err(FetchError::Status(status.as_u16()));
        }

        if resp.content_length().is_some_and(|len| len > self.max_bytes) {
            return Err(FetchError::TooLarge(self.max_bytes));
        }

        let mut file = FetchedImage::create_temp_file(self.temp_dir.as_deref())?;
        let mut written = 0u64;
        while let Some(chunk) = resp.chunk().await? {
            written += chunk.len() as u64;
            if written > self.max_bytes {
                return Err(FetchError::TooLarge(self.max_bytes));
            }
            file.write_all(&chunk)?;
        }
        file.flush()?;

        let image = FetchedImage { file, len: written };
        if image.is_empty() {
            return Err(FetchError::EmptyBody);
        }
        log::debug!("{host}: {} bytes", image.len());

        Ok(image)
    }
}

/// Retry policy for transient fetch failures. Zero retries by default.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u8,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn should_retry(&self, attempt: u8, err: &FetchError) -> bool {
        attempt < self.max_retries && err.is_transient()
    }

    /// Linear backoff; `attempt` starts at 1.
    pub fn delay(&self, attempt: u8) -> Duration {
        self.backoff * attempt as u32
    }
}

/// Fetch `url`, retrying transient failures as `policy` allows.
pub async fn fetch_with_retry<F: ImageFetcher>(
    fetcher: &F,
    url: &str,
    policy: RetryPolicy,
) -> Result<FetchedImage, FetchError> {
    let mut attempt = 0u8;
    loop {
        match fetcher.fetch(url).await {
            Err(err) if policy.should_retry(attempt, &err) => {
                attempt += 1;
                let delay = policy.delay(attempt);
                log::info!(
                    "{url}: retrying (attempt {}/{}) after error: {}, backoff {}ms",
                    attempt,
                    policy.max_retries,
                    err,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}
