//! Page fetching.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::ScrapeError;

/// Retrieves the body of a page. Implementations must observe the
/// cancellation token so shutdown unblocks in-flight fetches.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, cancel: &CancellationToken, url: &str) -> Result<String, ScrapeError>;
}

/// [`Fetcher`] backed by a shared [`reqwest::Client`].
///
/// The body is returned as-is regardless of HTTP status; deciding what a
/// non-2xx page means is the analyzer's business.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, cancel: &CancellationToken, url: &str) -> Result<String, ScrapeError> {
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ScrapeError::Cancelled),
            response = self.client.get(url).send() => {
                response.map_err(|source| ScrapeError::Fetch {
                    url: url.to_string(),
                    message: source.to_string(),
                })?
            }
        };
        tracing::debug!(url, status = %response.status(), "fetched page");

        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(ScrapeError::Cancelled),
            body = response.text() => {
                body.map_err(|source| ScrapeError::Fetch {
                    url: url.to_string(),
                    message: source.to_string(),
                })?
            }
        };
        Ok(body)
    }
}
