//! Configuration file support
//!
//! Settings come from three layers: command-line flags, then an optional
//! TOML file, then built-in defaults.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use sweep_core::{ConfigError, DelayRange, ListingSource, PageToken, DEFAULT_OUTPUT_PATH};
use sweep_runtime::CrawlConfig;
use sweep_tor::{RetryPolicy, TorConfig};

/// Errors loading or resolving configuration
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

/// Contents of a config file. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub tor: TorSection,
    #[serde(default)]
    pub listing: ListingSection,
    #[serde(default)]
    pub crawl: CrawlSection,
    #[serde(default)]
    pub retry: RetrySection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TorSection {
    pub socks_addr: Option<String>,
    pub check_url: Option<String>,
    pub check_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListingSection {
    pub url_template: Option<String>,
    pub container: Option<String>,
    pub stride: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CrawlSection {
    pub start_page: Option<PageToken>,
    pub max_pages: Option<u32>,
    pub output: Option<PathBuf>,
    pub min_delay: Option<f64>,
    pub max_delay: Option<f64>,
    pub page_delay_min: Option<f64>,
    pub page_delay_max: Option<f64>,
    pub max_fetch_failure_streak: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySection {
    pub listing: Option<RetryEntry>,
    pub probe: Option<RetryEntry>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryEntry {
    pub attempts: u32,
    pub timeout_secs: u64,
    #[serde(default)]
    pub backoff_secs: u64,
}

impl From<RetryEntry> for RetryPolicy {
    fn from(entry: RetryEntry) -> Self {
        RetryPolicy::new(
            entry.attempts,
            Duration::from_secs(entry.timeout_secs),
            Duration::from_secs(entry.backoff_secs),
        )
    }
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Tor settings, with an optional command-line socks address on top
    pub fn tor_config(&self, socks_addr: Option<&str>) -> TorConfig {
        let mut tor = TorConfig::default();
        if let Some(addr) = socks_addr.or(self.tor.socks_addr.as_deref()) {
            tor = tor.with_socks_addr(addr);
        }
        if let Some(url) = &self.tor.check_url {
            tor.check_url = url.clone();
        }
        if let Some(secs) = self.tor.check_timeout_secs {
            tor.check_timeout_secs = secs;
        }
        tor
    }
}

/// Command-line overrides for a crawl
#[derive(Debug, Default, Clone)]
pub struct CrawlOverrides {
    pub start_page: Option<PageToken>,
    pub max_pages: Option<u32>,
    pub output: Option<PathBuf>,
    pub min_delay: Option<f64>,
    pub max_delay: Option<f64>,
    pub page_stride: Option<u128>,
    pub listing_url: Option<String>,
    pub container: Option<String>,
    pub no_page_delay: bool,
}

/// Everything a crawl needs, fully resolved
#[derive(Debug, Clone)]
pub struct CrawlSettings {
    pub crawl: CrawlConfig,
    pub output: PathBuf,
}

impl CrawlSettings {
    pub fn resolve(file: &FileConfig, cli: &CrawlOverrides) -> Result<Self, SettingsError> {
        let defaults = CrawlConfig::default();

        let mut listing = match cli.listing_url.as_ref().or(file.listing.url_template.as_ref()) {
            Some(template) => ListingSource::new(template.clone()),
            None => ListingSource::default(),
        };
        if let Some(container) = cli.container.as_ref().or(file.listing.container.as_ref()) {
            // An empty selector means scan the whole page
            listing.container = (!container.is_empty()).then(|| container.clone());
        }
        if let Some(stride) = cli.page_stride.or(file.listing.stride.map(u128::from)) {
            listing.stride = stride;
        }

        let min_delay = cli
            .min_delay
            .or(file.crawl.min_delay)
            .unwrap_or(sweep_core::DEFAULT_MIN_DELAY);
        let max_delay = cli
            .max_delay
            .or(file.crawl.max_delay)
            .unwrap_or(sweep_core::DEFAULT_MAX_DELAY);
        let probe_delay = DelayRange::from_secs(min_delay, max_delay)?;

        let page_delay = if cli.no_page_delay {
            DelayRange::zero()
        } else {
            match (file.crawl.page_delay_min, file.crawl.page_delay_max) {
                (None, None) => defaults.page_delay,
                (min, max) => DelayRange::from_secs(
                    min.unwrap_or(defaults.page_delay.min().as_secs_f64()),
                    max.unwrap_or(defaults.page_delay.max().as_secs_f64()),
                )?,
            }
        };

        let crawl = CrawlConfig {
            listing,
            start_page: cli
                .start_page
                .or(file.crawl.start_page)
                .unwrap_or(defaults.start_page),
            max_pages: cli
                .max_pages
                .or(file.crawl.max_pages)
                .unwrap_or(defaults.max_pages),
            probe_delay,
            page_delay,
            listing_retry: file
                .retry
                .listing
                .map(RetryPolicy::from)
                .unwrap_or(defaults.listing_retry),
            probe_retry: file
                .retry
                .probe
                .map(RetryPolicy::from)
                .unwrap_or(defaults.probe_retry),
            max_fetch_failure_streak: file
                .crawl
                .max_fetch_failure_streak
                .unwrap_or(defaults.max_fetch_failure_streak),
        };
        crawl.validate()?;

        let output = cli
            .output
            .clone()
            .or_else(|| file.crawl.output.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_PATH));

        Ok(Self { crawl, output })
    }
}
