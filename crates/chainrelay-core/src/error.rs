//! Transport-level error types.

use thiserror::Error;

use crate::classify::{classify, ErrorKind};
use crate::request::JsonRpcError;

/// Errors that can occur while sending a request through the core.
///
/// Every variant keeps the original error content; [`TransportError::kind`]
/// is the only classification retry and fallback act on.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed (connection refused, bad status, etc.).
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON-RPC protocol-level error returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// Provider answered with a throttling status.
    #[error("Rate limit exceeded (provider: {provider})")]
    RateLimited { provider: String },

    /// The attempt exceeded its deadline.
    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Every endpoint failed on every pass.
    #[error("All endpoints failed after {attempts} attempts; last error: {last}")]
    Exhausted {
        attempts: usize,
        last: Box<TransportError>,
    },

    /// The fallback chain has no endpoints configured.
    #[error("No endpoints configured")]
    NoEndpoints,

    /// Response could not be deserialized.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An unexpected error.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Exhausted { last, .. } => last.kind(),
            Self::Rpc(err) => classify(&err.message),
            Self::Http(msg) => match classify(msg) {
                ErrorKind::Other => ErrorKind::Connection,
                kind => kind,
            },
            Self::Other(msg) => classify(msg),
            Self::NoEndpoints | Self::Deserialization(_) | Self::Config(_) => ErrorKind::Other,
        }
    }

    /// Returns `true` if retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::NoEndpoints | Self::Config(_)) && !self.kind().is_fatal()
    }
}

/// Configuration errors, raised while building the core.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("method cost for '{method}' must be positive")]
    ZeroCost { method: String },

    #[error("budget per second must be positive, got {0}")]
    InvalidBudget(f64),

    #[error("could not read config file '{path}': {reason}")]
    Io { path: String, reason: String },

    #[error("invalid config: {0}")]
    Parse(String),
}
