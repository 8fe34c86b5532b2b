//! Transport client
//!
//! One HTTP GET through Tor per call. Each call gets a single timeout and is
//! never retried here; retry budgets belong to the callers (see [`crate::RetryPolicy`]).

use async_trait::async_trait;
use reqwest::Client;
use std::error::Error as _;
use std::io;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::{create_probe_client, create_tor_client, TorConfig, TorError};

/// A completed HTTP exchange
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body as text; empty for [`Transport::fetch_status`]
    pub body: String,
    /// Wall-clock time from send to end of body, or to the headers for
    /// [`Transport::fetch_status`]
    pub elapsed: Duration,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirection(&self) -> bool {
        (300..400).contains(&self.status)
    }
}

/// Why a fetch did not produce a response
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Response body failed: {0}")]
    Body(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Proxy error: {0}")]
    Proxy(String),

    #[error("Request failed: {0}")]
    Request(String),
}

impl TransportError {
    /// Connection-level failures: the target may simply be down, so retrying can help
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            TransportError::Connect(_) | TransportError::Timeout(_) | TransportError::Body(_)
        )
    }
}

/// Anything that can fetch a URL
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch `url` once, giving up after `timeout`
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchResponse, TransportError>;

    /// Fetch `url` once without following redirects and stop at the status
    /// line; the body is never read.
    async fn fetch_status(&self, url: &str, timeout: Duration) -> Result<FetchResponse, TransportError> {
        self.fetch(url, timeout).await
    }
}

/// Transport that sends every request through the Tor SOCKS proxy
#[derive(Debug, Clone)]
pub struct TorTransport {
    client: Client,
    probe_client: Client,
}

impl TorTransport {
    pub fn new(config: &TorConfig) -> Result<Self, TorError> {
        Ok(Self {
            client: create_tor_client(config)?,
            probe_client: create_probe_client(config)?,
        })
    }
}

#[async_trait]
impl Transport for TorTransport {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchResponse, TransportError> {
        let start = Instant::now();

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(timeout)
            } else {
                TransportError::Body(e.to_string())
            }
        })?;

        Ok(FetchResponse {
            status,
            body,
            elapsed: start.elapsed(),
        })
    }

    async fn fetch_status(&self, url: &str, timeout: Duration) -> Result<FetchResponse, TransportError> {
        let start = Instant::now();

        let response = self
            .probe_client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        // Dropping the response closes the connection with the body unread
        Ok(FetchResponse {
            status: response.status().as_u16(),
            body: String::new(),
            elapsed: start.elapsed(),
        })
    }
}

/// Map a reqwest failure onto the transport taxonomy
fn classify(err: reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        return TransportError::Timeout(timeout);
    }
    if err.is_builder() {
        return TransportError::InvalidUrl(describe(&err));
    }
    if err.is_connect() {
        // With socks5h every TCP connection goes to the proxy, so a refused
        // connection means the proxy itself is down, not the target.
        if refused(&err) {
            return TransportError::Proxy(describe(&err));
        }
        return TransportError::Connect(describe(&err));
    }
    if dropped(&err) {
        return TransportError::Connect(describe(&err));
    }
    TransportError::Request(describe(&err))
}

fn refused(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<io::Error>() {
            if io.kind() == io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        // The socks connector flattens its io errors into strings
        if cause.to_string().contains("Connection refused (os error") {
            return true;
        }
        source = cause.source();
    }
    false
}

/// The connection was established but closed or reset before a full response
fn dropped(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<io::Error>() {
            if matches!(
                io.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::BrokenPipe
            ) {
                return true;
            }
        }
        if let Some(hyper) = cause.downcast_ref::<hyper::Error>() {
            if hyper.is_incomplete_message() || hyper.is_canceled() {
                return true;
            }
        }
        source = cause.source();
    }
    false
}

/// The full cause chain on one line; reqwest's top-level message is terse
fn describe(err: &reqwest::Error) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        parts.push(cause.to_string());
        source = cause.source();
    }
    parts.join(": ")
}
