use std::time::Duration;

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    /// Network failure that persisted through every retry attempt.
    #[error("request failed after {attempts} attempts: {source}")]
    Transport {
        /// Attempts made, including the first one.
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },
    /// Every attempt ran into the per-attempt timeout.
    #[error("request timed out after {timeout:?} per attempt and {attempts} attempts ({elapsed:?} total)")]
    Timeout {
        timeout: Duration,
        attempts: u32,
        elapsed: Duration,
    },
    /// The caller's cancellation token fired. Never retried.
    #[error("operation cancelled")]
    Cancelled,
    /// Non-retryable request error from `reqwest`.
    #[error("request failed: {0}")]
    Request(reqwest::Error),
    /// Base address rejected by the connection pool.
    #[error("invalid endpoint '{0}'")]
    InvalidEndpoint(String),
    /// Error from the SQLite engine, passed through unchanged.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Filesystem error while preparing the database file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Record shape does not match the table or the row.
    #[error("schema error: {0}")]
    Schema(String),
    /// Invalid dispatcher registration or application settings.
    #[error("configuration error: {0}")]
    Config(String),
    /// Response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl LoaderError {
    /// Whether the error came from the caller's cancellation token.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
