use std::{
    fmt,
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use reqwest::{header, Response};
use serde::Serialize;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::{
    pool::{ConnectionPool, EndpointHandle},
    query::with_query,
    ClientOptions, LoaderError, Result, RetryPolicy,
};

/// HTTP client that retries server errors, timeouts and transport failures.
///
/// Every client built against the same base address shares one pooled
/// [`EndpointHandle`]. Each attempt runs under the policy's timeout and the
/// client's cancellation token; cancellation wins over everything else and
/// is never retried.
#[derive(Clone)]
pub struct ResilientClient {
    endpoint: Arc<EndpointHandle>,
    api_key: Option<(header::HeaderName, header::HeaderValue)>,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientClient")
            .field("base", &self.endpoint.base().as_str())
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("retry", &self.retry)
            .finish()
    }
}

enum Attempt {
    Response(Response),
    Transport(reqwest::Error),
    TimedOut,
}

impl ResilientClient {
    /// Builds a client whose endpoint handle comes from `pool`.
    ///
    /// Fails with [`LoaderError::InvalidEndpoint`] when the base address
    /// cannot be parsed, and with [`LoaderError::Config`] when the API key
    /// header or value is not a valid HTTP header.
    pub fn new(
        pool: &ConnectionPool,
        options: &ClientOptions,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let endpoint = pool.get_or_create(&options.base_address, options.retry.timeout)?;
        let api_key = match &options.api_key {
            Some(key) => {
                let name = header::HeaderName::from_bytes(options.api_key_header.as_bytes())
                    .map_err(|err| {
                        LoaderError::Config(format!(
                            "invalid api key header '{}': {err}",
                            options.api_key_header
                        ))
                    })?;
                let mut value = header::HeaderValue::from_str(key)
                    .map_err(|err| LoaderError::Config(format!("invalid api key: {err}")))?;
                value.set_sensitive(true);
                Some((name, value))
            }
            None => None,
        };

        Ok(Self {
            endpoint,
            api_key,
            retry: options.retry,
            cancel,
        })
    }

    /// Issues a GET for `path`, resolved against the base address.
    pub async fn get(&self, path: &str) -> Result<Response> {
        let url = self.endpoint.join(path)?;
        self.send_with_retry(|| self.endpoint.http().get(url.clone()))
            .await
    }

    /// Issues a GET with `request` encoded as the query string.
    pub async fn get_query<Q: Serialize>(&self, path: &str, request: &Q) -> Result<Response> {
        let path = with_query(path, request)?;
        self.get(&path).await
    }

    /// Issues a POST with `body` serialized as JSON.
    pub async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<Response> {
        let url = self.endpoint.join(path)?;
        let payload = serde_json::to_vec(body)
            .map_err(|err| LoaderError::Decode(format!("could not encode request body: {err}")))?;
        self.send_with_retry(|| {
            self.endpoint
                .http()
                .post(url.clone())
                .header(header::CONTENT_TYPE, "application/json")
                .body(payload.clone())
        })
        .await
    }

    async fn send_with_retry<F>(&self, build: F) -> Result<Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let max_attempts = self.retry.attempts();
        let started = Instant::now();
        let mut attempt = 1u32;
        let mut delay = self.retry.initial_backoff;

        loop {
            let mut request = build();
            if let Some((name, value)) = &self.api_key {
                request = request.header(name.clone(), value.clone());
            }

            match self.attempt(request).await? {
                Attempt::Response(response) => {
                    let status = response.status();
                    if status.is_success() || attempt >= max_attempts || !status.is_server_error()
                    {
                        return Ok(response);
                    }
                    tracing::debug!(
                        attempt,
                        status = status.as_u16(),
                        delay_ms = delay.as_millis() as u64,
                        "server error, retrying"
                    );
                }
                Attempt::TimedOut => {
                    if attempt >= max_attempts {
                        return Err(LoaderError::Timeout {
                            timeout: self.retry.timeout,
                            attempts: attempt,
                            elapsed: started.elapsed(),
                        });
                    }
                    tracing::debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "request timed out, retrying"
                    );
                }
                Attempt::Transport(err) => {
                    if attempt >= max_attempts {
                        return Err(LoaderError::Transport {
                            attempts: attempt,
                            source: err,
                        });
                    }
                    tracing::debug!(
                        attempt,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "transport error, retrying"
                    );
                }
            }

            self.wait_before_retry(delay).await?;
            delay = delay.saturating_mul(RetryPolicy::BACKOFF_MULTIPLIER);
            attempt += 1;
        }
    }

    /// Sends one attempt under the per-attempt timeout and the cancellation
    /// token. Errors returned here are terminal; retryable outcomes come back
    /// as [`Attempt`] variants.
    async fn attempt(&self, request: reqwest::RequestBuilder) -> Result<Attempt> {
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(LoaderError::Cancelled),
            outcome = timeout(self.retry.timeout, request.send()) => outcome,
        };

        match outcome {
            Ok(Ok(response)) => Ok(Attempt::Response(response)),
            Ok(Err(err)) if err.is_timeout() => Ok(Attempt::TimedOut),
            Ok(Err(err)) if is_transport_error(&err) => Ok(Attempt::Transport(err)),
            Ok(Err(err)) => Err(LoaderError::Request(err)),
            Err(_elapsed) => Ok(Attempt::TimedOut),
        }
    }

    /// Awaits a body read such as [`Response::bytes`], aborting with
    /// [`LoaderError::Cancelled`] when the token fires first.
    pub async fn read_body<T, F>(&self, body: F) -> Result<T>
    where
        F: Future<Output = reqwest::Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(LoaderError::Cancelled),
            body = body => body.map_err(LoaderError::Request),
        }
    }

    async fn wait_before_retry(&self, delay: Duration) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(LoaderError::Cancelled),
            _ = sleep(delay) => Ok(()),
        }
    }
}

fn is_transport_error(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_request() || err.is_body()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::ResilientClient;
    use crate::{ClientOptions, ConnectionPool, LoaderError, RetryPolicy};

    #[test]
    fn debug_redacts_api_key() {
        let pool = ConnectionPool::new();
        let options = ClientOptions::new("https://api.example.dev").with_api_key("secret-token");
        let client =
            ResilientClient::new(&pool, &options, CancellationToken::new()).expect("must build");
        let debug = format!("{client:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("secret-token"));
    }

    #[test]
    fn clients_share_pooled_endpoint() {
        let pool = ConnectionPool::new();
        let options = ClientOptions::new("https://api.example.dev");
        let _first = ResilientClient::new(&pool, &options, CancellationToken::new())
            .expect("must build");
        let _second = ResilientClient::new(
            &pool,
            &options.clone().with_retry(RetryPolicy::new(
                Duration::from_secs(1),
                1,
                Duration::ZERO,
            )),
            CancellationToken::new(),
        )
        .expect("must build");
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn invalid_header_name_is_a_config_error() {
        let pool = ConnectionPool::new();
        let options = ClientOptions::new("https://api.example.dev")
            .with_api_key("key")
            .with_api_key_header("bad header");
        let err = ResilientClient::new(&pool, &options, CancellationToken::new())
            .expect_err("must fail");
        assert!(matches!(err, LoaderError::Config(_)));
    }
}
