//! Probe outcomes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::TargetEntry;

/// Outcome of one accessibility probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    /// A response came back through Tor
    Accessible,
    /// Connection-level failure or a failing HTTP status after all retries
    Inaccessible,
    /// Anything else: bad URL, proxy failure
    Error,
}

impl std::fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProbeStatus::Accessible => "accessible",
            ProbeStatus::Inaccessible => "inaccessible",
            ProbeStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Result of probing a single target. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub domain: String,
    pub url: String,
    /// Listing label; older snapshots call this `text`
    #[serde(default, alias = "text")]
    pub label: String,
    pub status: ProbeStatus,
    #[serde(with = "timestamp")]
    pub tested_at: DateTime<Utc>,
    /// Seconds taken by the final attempt
    #[serde(default)]
    pub response_time: f64,
    /// Final HTTP status, when a response was received
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl ProbeResult {
    /// Start a result for `entry`; fill in the outcome with the `with_*` helpers.
    pub fn new(entry: &TargetEntry, status: ProbeStatus) -> Self {
        Self {
            domain: entry.domain.clone(),
            url: entry.url(),
            label: entry.label.clone(),
            status,
            tested_at: Utc::now(),
            response_time: 0.0,
            http_status: None,
            error_detail: None,
        }
    }

    pub fn with_response_time(mut self, secs: f64) -> Self {
        self.response_time = secs;
        self
    }

    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_error(mut self, detail: impl Into<String>) -> Self {
        self.error_detail = Some(detail.into());
        self
    }

    pub fn is_accessible(&self) -> bool {
        self.status == ProbeStatus::Accessible
    }
}

/// RFC 3339 on write; RFC 3339 or naive ISO-8601 (taken as UTC) on read.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub fn parse(raw: &str) -> Result<DateTime<Utc>, String> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Ok(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|e| format!("invalid timestamp {:?}: {}", raw, e))
    }
}
