//! Listing entries

use serde::{Deserialize, Serialize};

/// One candidate site extracted from a listing page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetEntry {
    /// Normalized onion host, unique across a run
    pub domain: String,
    /// Display text from the listing (may be empty)
    pub label: String,
}

impl TargetEntry {
    pub fn new(domain: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            label: label.into(),
        }
    }

    /// URL to probe. Plain HTTP: onion addressing already authenticates the host.
    pub fn url(&self) -> String {
        format!("http://{}/", self.domain)
    }
}
