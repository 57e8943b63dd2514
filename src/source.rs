//! Remote holiday feed.

use crate::config::SourceConfig;
use crate::error::{SyncError, SyncResult};
use reqwest::blocking::Client;
use thiserror::Error;
use tracing::debug;

const USER_AGENT: &str = concat!("dcalendar/", env!("CARGO_PKG_VERSION"));

/// Soft fetch failures. Neither is fatal: the sync is skipped and retried at
/// the next scheduled check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Timeout, unreachable host, or an interrupted body.
    #[error("holiday feed unreachable: {0}")]
    Connectivity(String),
    #[error("holiday feed responded with HTTP {status}")]
    UpstreamUnavailable { status: u16 },
}

/// Anything that can produce the decoded text of the holiday dataset.
pub trait DatasetSource {
    fn fetch(&self) -> Result<String, FetchError>;
}

impl<S: DatasetSource + ?Sized> DatasetSource for &S {
    fn fetch(&self) -> Result<String, FetchError> {
        (**self).fetch()
    }
}

impl<S: DatasetSource + ?Sized> DatasetSource for Box<S> {
    fn fetch(&self) -> Result<String, FetchError> {
        (**self).fetch()
    }
}

/// Blocking HTTP GET of the configured feed URL.
pub struct HttpSource {
    client: Client,
    config: SourceConfig,
}

impl HttpSource {
    pub fn new(config: SourceConfig) -> SyncResult<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(config.connect_timeout())
            .timeout(config.read_timeout())
            .build()
            .map_err(|err| SyncError::Client(err.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }
}

impl DatasetSource for HttpSource {
    fn fetch(&self) -> Result<String, FetchError> {
        debug!("fetching holiday feed from {}", self.config.url);
        let response = self
            .client
            .get(&self.config.url)
            .send()
            .map_err(connectivity)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::UpstreamUnavailable {
                status: status.as_u16(),
            });
        }

        // The declared charset wins; the configured encoding covers feeds
        // that omit it.
        response
            .text_with_charset(&self.config.encoding)
            .map_err(connectivity)
    }
}

fn connectivity(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Connectivity(format!("timed out: {err}"))
    } else {
        FetchError::Connectivity(err.to_string())
    }
}
