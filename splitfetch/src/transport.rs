//! Transport abstraction for size probes and range requests.
//!
//! The download core only needs two operations from the network:
//!
//! - [`Transport::probe`]: total content length of a URL (HTTP `HEAD`)
//! - [`Transport::fetch_range`]: body stream for one byte range (HTTP `GET`
//!   with a `Range` header)
//!
//! [`HttpTransport`] implements both with reqwest. Everything a request
//! depends on (timeout, TLS validation, pool limits, user agent) lives in its
//! [`TransportConfig`], so two jobs with different policies never share
//! state. Tests substitute in-memory transports through the trait.
//!
//! # Dyn Compatibility
//!
//! Methods return [`BoxFuture`] so the coordinator can hold an
//! `Arc<dyn Transport>` and share it across spawned fetch tasks.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderValue, CONNECTION, CONTENT_LENGTH, RANGE};
use reqwest::StatusCode;

use crate::error::TransportError;
use crate::plan::ByteRange;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Stream of body chunks for one range.
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Default maximum idle connections kept per host.
pub const DEFAULT_MAX_IDLE_PER_HOST: usize = 100;

/// Default time an idle pooled connection is kept (1 second).
pub const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(1);

/// Network operations required by the download core.
pub trait Transport: Send + Sync {
    /// Return the total content length of `url` without fetching its body.
    fn probe<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<u64, TransportError>>;

    /// Start a retrieval of exactly `range` from `url`.
    ///
    /// The returned stream yields the body. Callers verify the byte count.
    fn fetch_range<'a>(
        &'a self,
        url: &'a str,
        range: ByteRange,
    ) -> BoxFuture<'a, Result<ByteStream, TransportError>>;
}

/// Per-instance HTTP transport settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Request timeout covering connect, headers and body. `None` is unbounded.
    pub timeout: Option<Duration>,

    /// Whether to reject invalid TLS certificates.
    pub validate_tls: bool,

    /// Value sent in the `User-Agent` header.
    pub user_agent: String,

    /// Maximum idle pooled connections per host.
    pub max_idle_per_host: usize,

    /// How long an idle pooled connection is kept.
    pub pool_idle_timeout: Duration,

    /// Send `Connection: close` and avoid connection reuse.
    pub connection_close: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            validate_tls: true,
            user_agent: default_user_agent(),
            max_idle_per_host: DEFAULT_MAX_IDLE_PER_HOST,
            pool_idle_timeout: DEFAULT_POOL_IDLE_TIMEOUT,
            connection_close: false,
        }
    }
}

impl TransportConfig {
    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Enable or disable TLS certificate validation.
    pub fn with_validate_tls(mut self, validate: bool) -> Self {
        self.validate_tls = validate;
        self
    }

    /// Set the user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the maximum idle connections per host.
    pub fn with_max_idle_per_host(mut self, max: usize) -> Self {
        self.max_idle_per_host = max;
        self
    }

    /// Set the pool idle timeout.
    pub fn with_pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_idle_timeout = timeout;
        self
    }

    /// Enable or disable `Connection: close`.
    pub fn with_connection_close(mut self, close: bool) -> Self {
        self.connection_close = close;
        self
    }
}

/// `splitfetch/<crate version>`.
pub fn default_user_agent() -> String {
    format!("splitfetch/{}", env!("CARGO_PKG_VERSION"))
}

/// reqwest-backed [`Transport`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: TransportConfig,
}

impl HttpTransport {
    /// Build a client from `config`.
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .danger_accept_invalid_certs(!config.validate_tls)
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_idle_timeout(config.pool_idle_timeout);

        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        if config.connection_close {
            let mut headers = HeaderMap::new();
            headers.insert(CONNECTION, HeaderValue::from_static("close"));
            builder = builder.default_headers(headers);
        }

        let client = builder
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }
}

impl Transport for HttpTransport {
    fn probe<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<u64, TransportError>> {
        Box::pin(async move {
            let response = self.client.head(url).send().await.map_err(request_error)?;

            let status = response.status();
            if !status.is_success() {
                return Err(TransportError::Status {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }

            parse_content_length(response.headers().get(CONTENT_LENGTH))
        })
    }

    fn fetch_range<'a>(
        &'a self,
        url: &'a str,
        range: ByteRange,
    ) -> BoxFuture<'a, Result<ByteStream, TransportError>> {
        Box::pin(async move {
            let mut request = self.client.get(url);
            if let Some(value) = range.header_value() {
                request = request.header(RANGE, value);
            }

            let response = request.send().await.map_err(request_error)?;

            // A plain 200 is only usable when the range starts at zero; the
            // fetcher then rejects any bytes past the range end.
            let status = response.status();
            let honoured = status == StatusCode::PARTIAL_CONTENT
                || (status == StatusCode::OK && range.start() == 0);
            if !honoured {
                return Err(TransportError::Status {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }

            Ok(response
                .bytes_stream()
                .map_err(|e| TransportError::Body(e.to_string()))
                .boxed())
        })
    }
}

fn request_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else {
        TransportError::Request(e.to_string())
    }
}

/// Parse a `Content-Length` header value.
pub(crate) fn parse_content_length(value: Option<&HeaderValue>) -> Result<u64, TransportError> {
    let value = value.ok_or(TransportError::MissingLength)?;
    let text = value
        .to_str()
        .map_err(|_| TransportError::InvalidLength(String::from_utf8_lossy(value.as_bytes()).into_owned()))?;

    text.trim()
        .parse::<u64>()
        .map_err(|_| TransportError::InvalidLength(text.to_string()))
}
