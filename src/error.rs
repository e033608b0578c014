use std::sync::Arc;

use thiserror::Error;

/// Errors that can occur while resolving or using a pub-sub connection
#[derive(Error, Debug)]
pub enum PubSubError {
    /// No entry for the requested name in `connections`
    #[error("The pub-sub connection [{0}] is not configured.")]
    NotConfigured(String),

    /// The connection config has no `driver` and no override resolver covers it
    #[error("The pub-sub connection [{0}] is missing a \"driver\" config var.")]
    MissingDriver(String),

    /// The driver identifier is not in the dispatch table
    #[error("The driver [{0}] is not supported.")]
    UnsupportedDriver(String),

    /// A driver-specific config field is missing or has the wrong type
    #[error("invalid {driver} config: {reason}")]
    InvalidConfig {
        driver: &'static str,
        reason: String,
    },

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Reading a credentials file (or other local resource) failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Redis client error
    #[cfg(feature = "driver_redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// HTTP client error
    #[cfg(any(feature = "driver_http", feature = "driver_gcloud"))]
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Service account key could not be used to sign a token
    #[cfg(feature = "driver_gcloud")]
    #[error("credentials error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// Any other backend failure reported by an adapter
    #[error("backend error: {0}")]
    Backend(String),

    /// A failed construction observed by a caller that waited on it
    /// rather than running it. Displays as the underlying error.
    #[error(transparent)]
    Shared(Arc<PubSubError>),
}

impl PubSubError {
    /// True for errors caused by the registry configuration itself
    /// (unknown connection name or missing driver).
    pub fn is_configuration(&self) -> bool {
        matches!(
            self.root(),
            PubSubError::NotConfigured(_) | PubSubError::MissingDriver(_)
        )
    }

    /// The error itself, or the one it shares.
    pub fn root(&self) -> &PubSubError {
        match self {
            PubSubError::Shared(inner) => inner.root(),
            other => other,
        }
    }

    pub(crate) fn invalid_config(driver: &'static str, reason: impl Into<String>) -> Self {
        PubSubError::InvalidConfig {
            driver,
            reason: reason.into(),
        }
    }
}

/// Result type alias for pub-sub operations
pub type Result<T> = std::result::Result<T, PubSubError>;
