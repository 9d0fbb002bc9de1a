use std::time::Duration;

/// Timeout and exponential backoff applied by [`crate::ResilientClient`].
///
/// The delay doubles after every failed attempt, so attempt `n` (1-based)
/// waits `initial_backoff * 2^(n-1)` before attempt `n + 1` is issued.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Maximum attempts, counting the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub const BACKOFF_MULTIPLIER: u32 = 2;

    pub fn new(timeout: Duration, max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            timeout,
            max_attempts,
            initial_backoff,
        }
    }

    /// Attempt budget with the zero case folded into a single attempt.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay slept after failed attempt `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(Self::BACKOFF_MULTIPLIER.saturating_pow(exp))
    }

    /// Total sleep when every attempt fails: `initial * (2^(attempts-1) - 1)`.
    pub fn worst_case_backoff(&self) -> Duration {
        (1..self.attempts()).fold(Duration::ZERO, |total, attempt| {
            total.saturating_add(self.backoff_for(attempt))
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

/// Endpoint, credentials and retry behavior for a [`crate::ResilientClient`].
#[derive(Clone, Eq, PartialEq)]
pub struct ClientOptions {
    /// Absolute base address; also the connection pool key.
    pub base_address: String,
    /// API key sent on every request when non-empty.
    pub api_key: Option<String>,
    /// Header carrying the API key.
    pub api_key_header: String,
    pub retry: RetryPolicy,
}

impl ClientOptions {
    pub const DEFAULT_API_KEY_HEADER: &'static str = "X-API-KEY";

    pub fn new(base_address: impl Into<String>) -> Self {
        Self {
            base_address: base_address.into(),
            api_key: None,
            api_key_header: Self::DEFAULT_API_KEY_HEADER.to_owned(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        self.api_key = (!api_key.trim().is_empty()).then_some(api_key);
        self
    }

    pub fn with_api_key_header(mut self, header: impl Into<String>) -> Self {
        self.api_key_header = header.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl std::fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOptions")
            .field("base_address", &self.base_address)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_key_header", &self.api_key_header)
            .field("retry", &self.retry)
            .finish()
    }
}
