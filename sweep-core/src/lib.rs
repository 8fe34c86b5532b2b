//! onion-sweep core - domain model for the crawl-and-probe engine
//!
//! This crate provides the types shared by every layer:
//! - Listing entries and probe results
//! - The persisted snapshot of accessible sites
//! - Onion address recognition
//! - Listing sources, page tokens and delay ranges

pub mod onion;
pub mod target;
pub mod result;
pub mod snapshot;
pub mod listing;
pub mod delay;

pub use onion::*;
pub use target::*;
pub use result::*;
pub use snapshot::*;
pub use listing::*;
pub use delay::*;

/// Default minimum delay between probes, in seconds
pub const DEFAULT_MIN_DELAY: f64 = 5.0;

/// Default maximum delay between probes, in seconds
pub const DEFAULT_MAX_DELAY: f64 = 15.0;

/// Default number of listing pages per run
pub const DEFAULT_MAX_PAGES: u32 = 10;

/// Default snapshot file name
pub const DEFAULT_OUTPUT_PATH: &str = "accessible_onion_sites.json";
