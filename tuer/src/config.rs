use std::time::Duration;

use url::Url;

use tuer_api::{EnvelopeShape, UnknownShape};
use tuer_prefs::PrefsConfig;

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:5000";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("TUER_ENGINE_ENDPOINT is not a valid http(s) URL: {0:?}")]
    InvalidEndpoint(String),

    #[error("TUER_RESPONSE_SHAPE: {0}")]
    InvalidShape(#[from] UnknownShape),
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub endpoint: Url,
    pub shape: EnvelopeShape, // envelope

    /// None: a hung engine keeps the search pending until it answers.
    pub request_timeout: Option<Duration>, // None
    pub retries: u32,                      // 0
    pub retry_backoff_ms: u64,             // 200

    pub prefs: PrefsConfig,
}

impl ClientConfig {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            shape: EnvelopeShape::default(),
            request_timeout: None,
            retries: 0,
            retry_backoff_ms: 200,
            prefs: PrefsConfig::default(),
        }
    }

    /// Read once at startup.
    /// - TUER_ENGINE_ENDPOINT (default http://127.0.0.1:5000)
    /// - TUER_RESPONSE_SHAPE (envelope | bare, default envelope)
    /// - TUER_REQUEST_TIMEOUT_MS (optional, 0 disables)
    /// - TUER_RETRIES (default 0)
    /// - TUER_RETRY_BACKOFF_MS (default 200)
    /// - TUER_DATA_DIR, TUER_PREFS_EPHEMERAL (see `PrefsConfig::from_env`)
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw_endpoint = std::env::var("TUER_ENGINE_ENDPOINT")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let mut cfg = Self::new(parse_endpoint(&raw_endpoint)?);

        if let Ok(shape) = std::env::var("TUER_RESPONSE_SHAPE") {
            if !shape.trim().is_empty() {
                cfg.shape = shape.parse()?;
            }
        }

        cfg.request_timeout = std::env::var("TUER_REQUEST_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);

        cfg.retries = parse_env_u32("TUER_RETRIES", cfg.retries);
        cfg.retry_backoff_ms = parse_env_u64("TUER_RETRY_BACKOFF_MS", cfg.retry_backoff_ms);

        cfg.prefs = PrefsConfig::from_env();

        Ok(cfg)
    }
}

pub fn parse_endpoint(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|_| ConfigError::InvalidEndpoint(raw.to_string()))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        _ => Err(ConfigError::InvalidEndpoint(raw.to_string())),
    }
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

fn parse_env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(default)
}
