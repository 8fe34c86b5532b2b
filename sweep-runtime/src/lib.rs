//! onion-sweep runtime
//!
//! Drives the crawl: walks listing pages, probes unseen domains, and keeps
//! the snapshot of accessible sites on disk.

pub mod store;
pub mod state;
pub mod driver;

pub use store::*;
pub use state::*;
pub use driver::*;
