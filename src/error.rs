//! Common error types for the generation orchestrator

use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection to backend failed: {0}")]
    TransientConnectivity(String),

    #[error("Backend contract violation: {0}")]
    BackendContract(String),

    #[error("Generation did not complete within {0} poll attempts")]
    TimeoutExceeded(u32),

    #[error("Backend rejected the job: {0}")]
    UpstreamRejection(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error is a transient connectivity failure worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientConnectivity(_))
    }
}

/// Message-text classification for errors that reach us as strings,
/// complementing the connect/timeout checks on `reqwest::Error`.
fn looks_like_connection_failure(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("connection") || message.contains("timeout") || message.contains("refused")
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() || looks_like_connection_failure(&e.to_string()) {
            Error::TransientConnectivity(e.to_string())
        } else {
            Error::BackendContract(e.to_string())
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::TransientConnectivity("connection refused".into()).is_transient());
        assert!(!Error::BackendContract("empty image list".into()).is_transient());
        assert!(!Error::TimeoutExceeded(180).is_transient());
        assert!(!Error::UpstreamRejection("node failed".into()).is_transient());
    }

    #[test]
    fn test_message_classification() {
        assert!(looks_like_connection_failure("Connection refused (os error 111)"));
        assert!(looks_like_connection_failure("operation Timeout"));
        assert!(!looks_like_connection_failure("422 Unprocessable Entity"));
    }
}
