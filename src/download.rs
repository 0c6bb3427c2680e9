use crate::browser::PageDriver;
use crate::models::BrowserCookie;
use backoff::ExponentialBackoffBuilder;
use reqwest::{header, Client, StatusCode};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

const FALLBACK_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Unexpected status {status} for {url}")]
    Status { status: StatusCode, url: String },
    #[error("Failed to write image: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    /// Network failures, 5xx and 429 are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            DownloadError::Request(e) => !e.is_builder() && !e.is_redirect(),
            DownloadError::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            DownloadError::Io(_) => false,
        }
    }
}

/// Downloads images the way the browser session would request them.
#[derive(Debug, Clone)]
pub struct ImageDownloader {
    client: Client,
    user_agent: String,
    cookie_header: Option<String>,
    initial_retry_interval: Duration,
    max_retry_time: Duration,
}

impl ImageDownloader {
    pub fn new(user_agent: &str, cookies: &[BrowserCookie]) -> Result<Self, DownloadError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        let cookie_header = if cookies.is_empty() {
            None
        } else {
            Some(
                cookies
                    .iter()
                    .map(|c| format!("{}={}", c.name, c.value))
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        };
        Ok(Self {
            client,
            user_agent: user_agent.to_string(),
            cookie_header,
            initial_retry_interval: Duration::from_millis(500),
            max_retry_time: Duration::from_secs(30),
        })
    }

    /// Borrow the user agent and cookies of the live page.
    pub async fn from_page(page: &dyn PageDriver) -> Result<Self, DownloadError> {
        let user_agent = match page.user_agent().await {
            Ok(ua) if !ua.is_empty() => ua,
            Ok(_) => FALLBACK_USER_AGENT.to_string(),
            Err(e) => {
                warn!("Could not read the browser user agent: {}", e);
                FALLBACK_USER_AGENT.to_string()
            }
        };
        let cookies = page.cookies().await.unwrap_or_else(|e| {
            warn!("Could not read browser cookies: {}", e);
            Vec::new()
        });
        Self::new(&user_agent, &cookies)
    }

    #[cfg(test)]
    pub fn with_retry_window(mut self, initial_interval: Duration, max_elapsed: Duration) -> Self {
        self.initial_retry_interval = initial_interval;
        self.max_retry_time = max_elapsed;
        self
    }

    async fn fetch_once(&self, url: &str, referer: &str) -> Result<Vec<u8>, DownloadError> {
        let mut request = self
            .client
            .get(url)
            .header(header::USER_AGENT, &self.user_agent)
            .header(header::REFERER, referer)
            .header(header::CACHE_CONTROL, "max-age=2592000");
        if let Some(cookies) = &self.cookie_header {
            request = request.header(header::COOKIE, cookies);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                status,
                url: url.to_string(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Fetch `url` into `dest`, retrying transient failures. Returns the byte count.
    #[instrument(skip(self, dest), fields(dest = %dest.display()))]
    pub async fn download(&self, url: &str, referer: &str, dest: &Path) -> Result<usize, DownloadError> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_retry_interval)
            .with_max_elapsed_time(Some(self.max_retry_time))
            .build();

        let bytes = backoff::future::retry(policy, || async {
            self.fetch_once(url, referer).await.map_err(|e| {
                if e.is_transient() {
                    debug!("Transient download failure, retrying: {}", e);
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        })
        .await
        .map_err(|e| {
            error!("Failed to download {}: {}", url, e);
            e
        })?;

        tokio::fs::write(dest, &bytes).await?;
        info!("Saved {} bytes to {}", bytes.len(), dest.display());
        Ok(bytes.len())
    }
}
