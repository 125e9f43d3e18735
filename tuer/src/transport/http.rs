use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::Client;
use tokio::time::timeout;
use tracing::{debug, warn};
use url::Url;

use tuer_api::limits::enforce_max_response_size;
use tuer_api::{decode_envelope, EnvelopeShape, SearchEnvelope};

use super::{SearchTransport, TransportError};
use crate::config::ClientConfig;

/// Characters left as-is in the `query` parameter; matches `encodeURIComponent`
/// closely enough for the engine's decoder.
const QUERY_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineHealth {
    Ok,
    Status(u16),
    Unreachable(String),
}

/// Talks to the engine's `GET /search?query=...` endpoint.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: Url,
    shape: EnvelopeShape,
    /// Per attempt; `None` waits as long as the engine takes.
    pub req_timeout: Option<Duration>,
    pub retries: u32,
    pub retry_backoff: Duration,
}

impl HttpTransport {
    pub fn new(endpoint: Url, shape: EnvelopeShape) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            shape,
            req_timeout: None,
            retries: 0,
            retry_backoff: Duration::from_millis(200),
        }
    }

    pub fn from_config(cfg: &ClientConfig) -> Self {
        let mut transport = Self::new(cfg.endpoint.clone(), cfg.shape);
        transport.req_timeout = cfg.request_timeout;
        transport.retries = cfg.retries;
        transport.retry_backoff = Duration::from_millis(cfg.retry_backoff_ms);
        transport
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn shape(&self) -> EnvelopeShape {
        self.shape
    }

    pub fn search_url(&self, query: &str) -> String {
        format!(
            "{}/search?query={}",
            self.endpoint.as_str().trim_end_matches('/'),
            utf8_percent_encode(query, QUERY_COMPONENT)
        )
    }

    /// Probe the engine root. Uses the request timeout when one is set.
    pub async fn health_check(&self) -> EngineHealth {
        let probe = self.client.get(self.endpoint.clone()).send();
        let result = match self.req_timeout {
            Some(t) => match timeout(t, probe).await {
                Ok(inner) => inner,
                Err(_) => return EngineHealth::Unreachable("health check timed out".to_string()),
            },
            None => probe.await,
        };
        match result {
            Ok(resp) if resp.status().is_success() => EngineHealth::Ok,
            Ok(resp) => EngineHealth::Status(resp.status().as_u16()),
            Err(e) => EngineHealth::Unreachable(e.to_string()),
        }
    }

    async fn fetch_with_retries(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        let max = self.retries.saturating_add(1);
        let mut attempt = 1u32;
        loop {
            match self.fetch_once(url).await {
                Ok(body) => {
                    debug!(target: "tuer::transport", "fetched {} bytes on attempt {}", body.len(), attempt);
                    return Ok(body);
                }
                Err(e) if e.is_retryable() && attempt < max => {
                    let delay = compute_backoff_ms(self.retry_backoff.as_millis() as u64, attempt);
                    warn!(
                        target: "tuer::transport",
                        "search attempt {}/{} failed: {} ; retrying in {} ms",
                        attempt,
                        max,
                        e,
                        delay
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        let exchange = async {
            let mut resp = self.client.get(url).send().await.map_err(map_reqwest)?;
            let status = resp.status();
            if !status.is_success() {
                return Err(TransportError::Status(status.as_u16()));
            }
            if let Some(len) = resp.content_length() {
                enforce_max_response_size(usize::try_from(len).unwrap_or(usize::MAX))?;
            }
            // read in chunks so an undeclared oversize body is cut off early
            let mut body = Vec::new();
            while let Some(chunk) = resp.chunk().await.map_err(map_reqwest)? {
                body.extend_from_slice(&chunk);
                enforce_max_response_size(body.len())?;
            }
            Ok::<Vec<u8>, TransportError>(body)
        };
        match self.req_timeout {
            Some(t) => timeout(t, exchange)
                .await
                .map_err(|_| TransportError::Timeout)?,
            None => exchange.await,
        }
    }
}

#[async_trait]
impl SearchTransport for HttpTransport {
    async fn search(&self, query: &str) -> Result<SearchEnvelope, TransportError> {
        let url = self.search_url(query);
        debug!(target: "tuer::transport", "GET {}", url);
        let body = self.fetch_with_retries(&url).await?;
        decode_envelope(&body, self.shape, query)
            .map_err(|e| TransportError::Malformed(e.to_string()))
    }
}

fn map_reqwest(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Connection(e.to_string())
    }
}

fn compute_backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    let mut factor = 1u64;
    for _ in 1..attempt {
        factor = factor.saturating_mul(2);
    }
    let capped = (base_ms.saturating_mul(factor)).min(30_000);
    let jitter = fastrand::u64(0..(base_ms / 2 + 1));
    capped.saturating_add(jitter)
}
