//! Transport seam between the client pool and the network.
//!
//! [`HttpClient`] is the only thing the pool knows about HTTP. Production code
//! uses [`ReqwestHttpClient`]; tests script responses behind the same trait.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Boxed future returned by [`HttpClient::execute`].
pub type HttpFuture<'a> = Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Credentials attached to provider requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HttpAuth {
    #[default]
    None,
    /// `Authorization: Bearer <token>`.
    BearerToken(String),
    /// A provider-specific header carrying the token.
    Header { name: String, value: String },
}

impl HttpAuth {
    /// Header name (lowercase) and value to send, if any.
    pub fn header(&self) -> Option<(String, String)> {
        match self {
            Self::None => None,
            Self::BearerToken(token) => {
                Some((String::from("authorization"), format!("Bearer {token}")))
            }
            Self::Header { name, value } => Some((name.to_ascii_lowercase(), value.clone())),
        }
    }
}

/// One outgoing request. Header names are stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    /// Deadline handed to the transport; the pool enforces its own as well.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: impl Into<String>) -> Self {
        let mut request = Self::get(url).with_header("content-type", "application/json");
        request.method = HttpMethod::Post;
        request.body = Some(body.into());
        request
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_auth(self, auth: &HttpAuth) -> Self {
        match auth.header() {
            Some((name, value)) => self.with_header(name, value),
            None => self,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    /// `Retry-After` in its delta-seconds form.
    pub retry_after: Option<Duration>,
}

impl HttpResponse {
    pub fn ok_json(body: impl Into<String>) -> Self {
        Self::with_status(200, body)
    }

    pub fn with_status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}

/// Failure below the HTTP status layer: no response was received.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HttpError {
    #[error("timed out: {0}")]
    Timeout(String),

    #[error("could not connect: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for HttpError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout(error.to_string())
        } else if error.is_connect() {
            Self::Connect(error.to_string())
        } else {
            Self::Transport(error.to_string())
        }
    }
}

/// Executes requests. Dropping the returned future must abort the request.
pub trait HttpClient: Send + Sync {
    fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a>;
}

/// reqwest-backed transport. Idle connections are kept per host and reused
/// by every request of the run.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: Arc<reqwest::Client>,
}

impl ReqwestHttpClient {
    pub fn new(max_idle_per_host: usize) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("ferrometric/", env!("CARGO_PKG_VERSION")))
            .pool_max_idle_per_host(max_idle_per_host.max(1))
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|error| {
                tracing::warn!(%error, "falling back to default http client");
                reqwest::Client::new()
            });
        Self {
            client: Arc::new(client),
        }
    }
}

impl HttpClient for ReqwestHttpClient {
    fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a> {
        Box::pin(async move {
            let HttpRequest {
                method,
                url,
                headers,
                body,
                timeout,
            } = request;

            let mut builder = match method {
                HttpMethod::Get => self.client.get(&url),
                HttpMethod::Post => self.client.post(&url),
            };
            for (name, value) in &headers {
                builder = builder.header(name, value);
            }
            if let Some(timeout) = timeout {
                builder = builder.timeout(timeout);
            }
            if let Some(body) = body {
                builder = builder.body(body);
            }

            let response = builder.send().await?;
            let status = response.status().as_u16();
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_retry_after);

            Ok(HttpResponse {
                status,
                body: response.text().await?,
                retry_after,
            })
        })
    }
}

/// Parse `Retry-After: <seconds>`. The HTTP-date form yields `None` and the
/// caller falls back to its own cool-down.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
