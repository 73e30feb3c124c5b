//! Rate-limited, deadline-bounded access to the provider over a shared transport.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::http_client::{HttpClient, HttpError, HttpRequest, HttpResponse};
use crate::rate_limiter::RateLimiter;

/// Raw body of a successful provider response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPayload {
    body: String,
}

impl RawPayload {
    pub fn new(body: impl Into<String>) -> Self {
        Self { body: body.into() }
    }

    pub fn body(&self) -> &str {
        &self.body
    }
}

/// Classified failure of one provider call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out: {message}")]
    Timeout { message: String },

    #[error("connection failure: {message}")]
    ConnectionFailure { message: String },

    #[error("throttled by provider (retry after {retry_after:?})")]
    RateLimitedByServer { retry_after: Option<Duration> },

    #[error("provider rejected request with status {status}: {message}")]
    ClientError { status: u16, message: String },

    #[error("provider failed with status {status}")]
    ServerError { status: u16 },

    #[error("request cancelled")]
    Cancelled,
}

impl FetchError {
    /// Stable label used in logs and reports.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::ConnectionFailure { .. } => "connection_failure",
            Self::RateLimitedByServer { .. } => "rate_limited",
            Self::ClientError { .. } => "client_error",
            Self::ServerError { .. } => "server_error",
            Self::Cancelled => "cancelled",
        }
    }

    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::ConnectionFailure { .. }
                | Self::RateLimitedByServer { .. }
                | Self::ServerError { .. }
        )
    }
}

/// Shared pool of provider sessions.
///
/// Connection reuse is the transport's job; the pool gates every call through
/// the [`RateLimiter`] and bounds it with a deadline. Clones share the
/// limiter and transport.
#[derive(Clone)]
pub struct HttpClientPool {
    transport: Arc<dyn HttpClient>,
    limiter: RateLimiter,
    request_timeout: Duration,
}

impl HttpClientPool {
    pub fn new(
        transport: Arc<dyn HttpClient>,
        limiter: RateLimiter,
        request_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            limiter,
            request_timeout,
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub const fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Perform one request once admitted by the limiter.
    ///
    /// Cancellation during admission or while the request is in flight drops
    /// the transport future, which aborts the connection.
    pub async fn fetch(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<RawPayload, FetchError> {
        let permit = self
            .limiter
            .acquire(cancel)
            .await
            .map_err(|_| FetchError::Cancelled)?;

        let request = request.with_timeout(self.request_timeout);
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            result = tokio::time::timeout(self.request_timeout, self.transport.execute(request)) => {
                match result {
                    Err(_) => Err(FetchError::Timeout {
                        message: format!("no response within {:?}", self.request_timeout),
                    }),
                    Ok(Err(HttpError::Timeout(message))) => Err(FetchError::Timeout { message }),
                    Ok(Err(HttpError::Connect(message) | HttpError::Transport(message))) => {
                        Err(FetchError::ConnectionFailure { message })
                    }
                    Ok(Ok(response)) => classify_response(response),
                }
            }
        };

        self.limiter.release(permit);
        outcome
    }
}

/// Map an HTTP response to a payload or a classified failure.
pub fn classify_response(response: HttpResponse) -> Result<RawPayload, FetchError> {
    match response.status {
        429 => Err(FetchError::RateLimitedByServer {
            retry_after: response.retry_after,
        }),
        status if (200..300).contains(&status) => {
            if body_signals_throttle(&response.body) {
                return Err(FetchError::RateLimitedByServer {
                    retry_after: response.retry_after,
                });
            }
            Ok(RawPayload::new(response.body))
        }
        status if (500..600).contains(&status) => Err(FetchError::ServerError { status }),
        status => Err(FetchError::ClientError {
            status,
            message: excerpt(&response.body),
        }),
    }
}

#[derive(Deserialize)]
struct StatusEnvelope {
    status: Option<StatusBlock>,
}

#[derive(Deserialize)]
struct StatusBlock {
    code: Option<i64>,
}

// The provider sometimes answers 200 with `{"status": {"code": 429, ...}}`.
fn body_signals_throttle(body: &str) -> bool {
    if !body.trim_start().starts_with('{') || !body.contains("\"status\"") {
        return false;
    }

    serde_json::from_str::<StatusEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.status)
        .and_then(|status| status.code)
        == Some(429)
}

fn excerpt(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((index, _)) => format!("{}...", &body[..index]),
        None => body.to_owned(),
    }
}
