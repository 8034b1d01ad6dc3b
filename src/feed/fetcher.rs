use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;
use crate::feed::parser::ParseError;
use crate::reaper::FeedStore;

const CONNECT_TIMEOUT_SECS: u64 = 10;
const MAX_REDIRECTS: usize = 5;

/// Errors that can occur while refreshing a source.
///
/// All of them are treated alike by the refresh engine: logged, recorded
/// against the source, and the source keeps its previous items.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Response body exceeded the configured size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// Payload could not be parsed as a feed
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
}

/// Retrieves the raw bytes of a feed.
///
/// The refresh engine only talks to this trait, so tests can swap in a
/// deterministic stub for the network.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Production [`Fetcher`] backed by `reqwest`.
///
/// Every request carries a `User-Agent` naming the service. When the store
/// knows the URL, the header also carries the feed's id and subscriber count
/// so upstream operators can tell who is polling them and how many readers
/// sit behind it.
pub struct HttpFetcher {
    client: reqwest::Client,
    user_agent: String,
    max_bytes: usize,
    store: Option<Arc<dyn FeedStore>>,
}

impl HttpFetcher {
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;

        Ok(Self {
            client,
            user_agent: config.user_agent.clone(),
            max_bytes: config.max_feed_bytes,
            store: None,
        })
    }

    /// Decorate the `User-Agent` with identity details looked up in `store`.
    pub fn with_store(mut self, store: Arc<dyn FeedStore>) -> Self {
        self.store = Some(store);
        self
    }

    async fn user_agent_for(&self, url: &str) -> String {
        let Some(store) = &self.store else {
            return self.user_agent.clone();
        };

        match store.feed_identity(url).await {
            Ok(Some(identity)) => format!(
                "{} feed-id:{} - {} subscribers",
                self.user_agent, identity.id, identity.subscribers
            ),
            Ok(None) => self.user_agent.clone(),
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Feed identity lookup failed, using plain user agent");
                self.user_agent.clone()
            }
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let user_agent = self.user_agent_for(url).await;

        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, user_agent)
            .send()
            .await
            .map_err(classify)?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        read_limited_bytes(response, self.max_bytes).await
    }
}

fn classify(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Network(err)
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(classify)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
