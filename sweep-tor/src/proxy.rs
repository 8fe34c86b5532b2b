//! Tor SOCKS5h proxy client
//!
//! Creates HTTP clients that route through Tor for .onion access, and
//! checks once at startup that the proxy actually works.

use reqwest::redirect::Policy;
use reqwest::{Client, ClientBuilder, Proxy};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Tor proxy configuration
#[derive(Debug, Clone)]
pub struct TorConfig {
    /// SOCKS5 proxy address (default: 127.0.0.1:9050)
    pub socks_addr: String,
    /// Timeout for the startup connectivity check, in seconds
    pub check_timeout_secs: u64,
    /// Endpoint used by the connectivity check
    pub check_url: String,
}

/// Tor Project endpoint reporting whether the caller exits through Tor
pub const DEFAULT_CHECK_URL: &str = "https://check.torproject.org/api/ip";

impl Default for TorConfig {
    fn default() -> Self {
        Self {
            socks_addr: "socks5h://127.0.0.1:9050".to_string(),
            check_timeout_secs: 30,
            check_url: DEFAULT_CHECK_URL.to_string(),
        }
    }
}

impl TorConfig {
    pub fn with_socks_addr(mut self, addr: &str) -> Self {
        // Bare host:port means socks5h so DNS stays inside Tor
        self.socks_addr = if addr.contains("://") {
            addr.to_string()
        } else {
            format!("socks5h://{}", addr)
        };
        self
    }
}

/// Errors from Tor networking
#[derive(Debug, Error)]
pub enum TorError {
    #[error("Failed to build Tor client: {0}")]
    ClientBuild(String),

    #[error("Tor proxy unavailable: {0}")]
    ProxyUnavailable(String),

    #[error("Invalid CSS selector: {0}")]
    InvalidSelector(String),
}

/// User agents for rotation
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:137.0) Gecko/20100101 Firefox/137.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.7; rv:137.0) Gecko/20100101 Firefox/137.0",
];

/// Get a random user agent
pub fn random_user_agent() -> &'static str {
    use rand::Rng;
    let idx = rand::thread_rng().gen_range(0..USER_AGENTS.len());
    USER_AGENTS[idx]
}

/// Create a Tor-enabled HTTP client.
///
/// Follows redirects. Timeouts are set per request by the caller.
pub fn create_tor_client(config: &TorConfig) -> Result<Client, TorError> {
    tor_client_builder(config)?
        .build()
        .map_err(|e| TorError::ClientBuild(e.to_string()))
}

/// Create a Tor-enabled client that hands 3xx responses back unfollowed.
///
/// A 3xx is the target's own answer; the host it points at is not probed.
pub fn create_probe_client(config: &TorConfig) -> Result<Client, TorError> {
    tor_client_builder(config)?
        .redirect(Policy::none())
        .build()
        .map_err(|e| TorError::ClientBuild(e.to_string()))
}

fn tor_client_builder(config: &TorConfig) -> Result<ClientBuilder, TorError> {
    let proxy = Proxy::all(&config.socks_addr)
        .map_err(|e| TorError::ClientBuild(e.to_string()))?;

    Ok(Client::builder()
        .proxy(proxy)
        .user_agent(random_user_agent())
        .danger_accept_invalid_certs(true)) // Many .onion sites have self-signed certs
}

/// What the check endpoint reported
#[derive(Debug, Clone, PartialEq)]
pub struct TorStatus {
    /// `None` when the endpoint does not say
    pub is_tor: Option<bool>,
    /// Exit address as seen by the endpoint
    pub exit_ip: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    #[serde(rename = "IsTor", default)]
    is_tor: Option<bool>,
    #[serde(rename = "IP", alias = "origin", default)]
    ip: Option<String>,
}

/// Check that the Tor proxy is reachable and routes traffic through Tor.
///
/// Any failure is `ProxyUnavailable`; the crawl must not start without it.
pub async fn check_tor_connection(config: &TorConfig) -> Result<TorStatus, TorError> {
    let client = create_tor_client(config)?;

    debug!("Checking Tor via {} through {}", config.check_url, config.socks_addr);

    let response = client
        .get(&config.check_url)
        .timeout(Duration::from_secs(config.check_timeout_secs))
        .send()
        .await
        .map_err(|e| TorError::ProxyUnavailable(e.to_string()))?;

    if !response.status().is_success() {
        return Err(TorError::ProxyUnavailable(format!(
            "check endpoint returned {}",
            response.status()
        )));
    }

    let body = response
        .text()
        .await
        .map_err(|e| TorError::ProxyUnavailable(e.to_string()))?;

    let status = parse_check_response(&body);
    if status.is_tor == Some(false) {
        return Err(TorError::ProxyUnavailable(
            "proxy answered but traffic is not exiting through Tor".to_string(),
        ));
    }

    Ok(status)
}

/// Endpoints that are not JSON still count as reachable
fn parse_check_response(body: &str) -> TorStatus {
    match serde_json::from_str::<CheckResponse>(body) {
        Ok(check) => TorStatus {
            is_tor: check.is_tor,
            exit_ip: check.ip,
        },
        Err(_) => TorStatus {
            is_tor: None,
            exit_ip: None,
        },
    }
}
