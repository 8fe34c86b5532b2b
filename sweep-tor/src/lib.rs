//! onion-sweep Tor layer
//!
//! Provides Tor-based networking for the crawl:
//! - SOCKS5h proxy client (DNS resolution via Tor) and startup check
//! - Transport abstraction with a single timeout per request
//! - Retry policy shared by listing fetches and probes
//! - Listing page fetching and parsing
//! - Accessibility probing

pub mod proxy;
pub mod transport;
pub mod retry;
pub mod listing;
pub mod prober;

pub use proxy::*;
pub use transport::*;
pub use retry::*;
pub use listing::*;
pub use prober::*;
