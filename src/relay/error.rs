//! Relay error types

/// Error type for relay control operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// Transport failure (connect, TLS, body read)
    #[error("HTTP transport error: {0}")]
    Http(String),

    /// Non-2xx HTTP status
    #[error("Relay returned HTTP {0}: {1}")]
    Status(u16, String),

    /// Relay-level error response
    #[error("Relay error {code}: {reason}")]
    Rejected { code: i64, reason: String },

    /// Response did not have the expected shape
    #[error("Unexpected relay response: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        RelayError::Http(e.to_string())
    }
}
