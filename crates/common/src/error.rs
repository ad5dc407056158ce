//! Error types for ArbFlow infrastructure
//!
//! One error enum for everything the substrate layer can fail with. Service
//! crates wrap these with `anyhow::Context` at their boundaries.

use thiserror::Error;

/// Main error type for ArbFlow substrate operations
#[derive(Debug, Error)]
pub enum Error {
    /// Redis stayed unreachable past the retry budget. The current loop
    /// iteration halts without acknowledging; redelivery is the retry.
    #[error("substrate unavailable: {0}")]
    SubstrateUnavailable(String),

    /// Non-transient Redis errors (bad command, type mismatch)
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// JSON serialization/deserialization errors
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Payload validation errors
    #[error("validation error: {0}")]
    Validation(String),

    /// Lock/lease protocol violations
    #[error("lock error: {0}")]
    Lock(String),

    /// Generic errors
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// True when the substrate retry budget was exhausted; callers must not
    /// acknowledge in-flight entries on this error.
    pub fn is_substrate_unavailable(&self) -> bool {
        matches!(self, Error::SubstrateUnavailable(_))
    }
}

/// Result type alias for ArbFlow substrate operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::SubstrateUnavailable("XADD stream:opportunities".to_string());
        assert_eq!(
            err.to_string(),
            "substrate unavailable: XADD stream:opportunities"
        );
        assert!(err.is_substrate_unavailable());
    }

    #[test]
    fn test_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let our_err: Error = json_err.into();
        assert!(matches!(our_err, Error::Json(_)));
        assert!(!our_err.is_substrate_unavailable());
    }
}
