//! Persisted snapshot of accessible sites
//!
//! The snapshot is the only durable artifact of a run. It is always
//! written whole, and loading it repairs the invariants:
//! - `total_accessible_sites == accessible_sites.len()`
//! - no domain appears twice

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::ProbeResult;

/// Errors reading a snapshot
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Malformed snapshot JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Complete persisted state of the result store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(with = "crate::result::timestamp")]
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub total_accessible_sites: usize,
    pub accessible_sites: Vec<ProbeResult>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl Snapshot {
    /// An empty snapshot
    pub fn new() -> Self {
        Self {
            last_updated: Utc::now(),
            total_accessible_sites: 0,
            accessible_sites: Vec::new(),
        }
    }

    /// Parse a snapshot file, collapsing duplicates and recomputing the total.
    ///
    /// Accepts the object layout or a bare list of results.
    pub fn from_json(raw: &str) -> Result<Self, SnapshotError> {
        let mut snapshot = if raw.trim_start().starts_with('[') {
            let sites: Vec<ProbeResult> = serde_json::from_str(raw)?;
            Self {
                last_updated: Utc::now(),
                total_accessible_sites: sites.len(),
                accessible_sites: sites,
            }
        } else {
            serde_json::from_str::<Snapshot>(raw)?
        };

        let mut seen = HashSet::new();
        snapshot
            .accessible_sites
            .retain(|site| seen.insert(site.domain.clone()));
        snapshot.total_accessible_sites = snapshot.accessible_sites.len();

        Ok(snapshot)
    }

    /// Pretty-printed JSON, the on-disk format
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Append an accessible result. Returns false if the domain is already present.
    pub fn push(&mut self, result: ProbeResult) -> bool {
        if self.contains(&result.domain) {
            return false;
        }
        self.accessible_sites.push(result);
        self.touch();
        true
    }

    /// Recompute the total and bump `last_updated`
    pub fn touch(&mut self) {
        self.total_accessible_sites = self.accessible_sites.len();
        self.last_updated = Utc::now();
    }

    pub fn contains(&self, domain: &str) -> bool {
        self.accessible_sites.iter().any(|s| s.domain == domain)
    }

    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.accessible_sites.iter().map(|s| s.domain.as_str())
    }

    pub fn len(&self) -> usize {
        self.accessible_sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accessible_sites.is_empty()
    }
}
