//! Unified error types for Keepsake.

use thiserror::Error;

/// Result type alias using KeepsakeError.
pub type Result<T> = std::result::Result<T, KeepsakeError>;

#[derive(Error, Debug)]
pub enum KeepsakeError {
    // Store errors
    #[error("Store error: {0}")]
    Store(String),

    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    // Transport errors
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Recipient opted out: {0}")]
    RecipientOptedOut(String),

    #[error("Retryable provider error: {0}")]
    RetryableProvider(String),

    #[error("Recipient permanently undeliverable: {0}")]
    Undeliverable(String),

    // Config errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    #[error("Invalid quiet window: {0}")]
    InvalidWindow(String),

    // General errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

impl KeepsakeError {
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::RetryableProvider(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True for errors worth retrying within the same tick.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RetryableProvider(_) | Self::Timeout(_) | Self::Transport(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KeepsakeError::Store("disk full".into());
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_error_constructors() {
        let e1 = KeepsakeError::store("test");
        assert!(matches!(e1, KeepsakeError::Store(_)));

        let e2 = KeepsakeError::transport("test");
        assert!(matches!(e2, KeepsakeError::Transport(_)));

        let e3 = KeepsakeError::retryable("test");
        assert!(matches!(e3, KeepsakeError::RetryableProvider(_)));
    }

    #[test]
    fn test_retryable_predicate() {
        assert!(KeepsakeError::retryable("throttled").is_retryable());
        assert!(KeepsakeError::Timeout("send".into()).is_retryable());
        assert!(!KeepsakeError::RecipientOptedOut("u1".into()).is_retryable());
        assert!(!KeepsakeError::Undeliverable("bad number".into()).is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: KeepsakeError = io_err.into();
        assert!(matches!(err, KeepsakeError::Io(_)));
    }
}
