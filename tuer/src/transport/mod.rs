use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use tuer_api::limits::LimitError;
use tuer_api::SearchEnvelope;

pub mod http;

pub use http::{EngineHealth, HttpTransport};

/// Why a search request did not produce a usable envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("engine unreachable: {0}")]
    Connection(String),

    #[error("request timed out")]
    Timeout,

    #[error("engine answered with status {0}")]
    Status(u16),

    #[error("response too large: {actual} bytes (max {max})")]
    TooLarge { max: usize, actual: usize },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Only failures that may go away on their own are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Connection(_) | TransportError::Timeout)
    }
}

impl From<LimitError> for TransportError {
    fn from(e: LimitError) -> Self {
        match e {
            LimitError::TooLarge { max, actual } => TransportError::TooLarge { max, actual },
        }
    }
}

/// Remote search call. Implementations decode the engine's envelope and map
/// every failure to a [`TransportError`].
#[async_trait]
pub trait SearchTransport: Send + Sync {
    async fn search(&self, query: &str) -> Result<SearchEnvelope, TransportError>;
}

#[async_trait]
impl<T: SearchTransport + ?Sized> SearchTransport for Arc<T> {
    async fn search(&self, query: &str) -> Result<SearchEnvelope, TransportError> {
        (**self).search(query).await
    }
}
