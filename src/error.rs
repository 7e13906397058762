//! Typed error taxonomy for the gateway.
//!
//! Each subsystem gets its own error enum; `GatewayError` composes them and
//! is the only error type the router needs to map to a status code.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid socket address: {0}")]
    InvalidAddr(String),
    #[error("invalid environment override {name}: {reason}")]
    BadEnvOverride { name: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache metadata corrupt: {0}")]
    Corrupt(String),
    #[error("cache directory not writable: {0}")]
    NotWritable(String),
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render admission denied: at capacity")]
    AtCapacity,
    #[error("browser launch failed: {0}")]
    LaunchFailed(String),
    #[error("navigation failed: {0}")]
    NavigationFailed(String),
    #[error("content extraction failed: {0}")]
    ExtractFailed(String),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid Origin header")]
    InvalidOrigin,
    #[error("unknown host")]
    UnknownHost,
    #[error("path traversal rejected")]
    PathTraversal,
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("missing required parameter: {0}")]
    MissingParam(&'static str),
    #[error("unsafe render target: {0}")]
    UnsafeRenderTarget(String),
    #[error("not found")]
    NotFound,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("host inactive or unreachable")]
    ServiceUnavailable,
    #[error("request timed out")]
    Timeout,
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl GatewayError {
    /// Maps a gateway error to the HTTP status it should surface as, per the
    /// propagation policy: only client/config errors reach the end user
    /// directly, everything transient degrades upstream instead.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Client(ClientError::InvalidOrigin | ClientError::MissingParam(_) | ClientError::UnsafeRenderTarget(_)) => 400,
            Self::Client(ClientError::UnknownHost) => 403,
            Self::Client(ClientError::PathTraversal | ClientError::NotFound) => 404,
            Self::Client(ClientError::RateLimited) => 429,
            Self::ServiceUnavailable => 503,
            Self::Timeout => 504,
            Self::Render(_) => 500,
            Self::Cache(_) => 500,
        }
    }
}
