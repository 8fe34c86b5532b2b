//! Listing pages: fetching and parsing
//!
//! The parser is pure. It reads anchors inside the listing's link container
//! and keeps those pointing at a well-formed onion address.

use scraper::{Html, Selector};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, warn};

use sweep_core::{onion_domain, ListingSource, PageToken, TargetEntry};

use crate::{RetryPolicy, TorError, Transport, TransportError};

/// Extracts target entries from listing markup
#[derive(Debug, Clone)]
pub struct ListingParser {
    container: Option<Selector>,
    anchor: Selector,
}

impl ListingParser {
    /// Parser scoped to `container`, or to the whole document when `None`
    pub fn new(container: Option<&str>) -> Result<Self, TorError> {
        let container = container
            .map(|sel| {
                Selector::parse(sel)
                    .map_err(|e| TorError::InvalidSelector(format!("{}: {}", sel, e)))
            })
            .transpose()?;

        Ok(Self {
            container,
            anchor: Selector::parse("a[href]").unwrap(),
        })
    }

    pub fn for_source(source: &ListingSource) -> Result<Self, TorError> {
        Self::new(source.container.as_deref())
    }

    /// Ordered, de-duplicated entries. First label wins for repeated domains.
    pub fn parse(&self, html: &str) -> Vec<TargetEntry> {
        let document = Html::parse_document(html);

        let anchors: Vec<_> = match &self.container {
            Some(container) => document
                .select(container)
                .flat_map(|el| el.select(&self.anchor))
                .collect(),
            None => document.select(&self.anchor).collect(),
        };

        let mut seen = HashSet::new();
        let mut entries = Vec::new();

        for element in anchors {
            let Some(domain) = element.value().attr("href").and_then(onion_domain) else {
                continue;
            };

            if !seen.insert(domain.clone()) {
                continue;
            }

            let label = normalize_whitespace(&element.text().collect::<String>());
            entries.push(TargetEntry { domain, label });
        }

        entries
    }
}

/// Normalize whitespace in text
fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A listing page that could not be fetched within its retry budget
#[derive(Debug, Error)]
#[error("Listing page {page} failed after {attempts} attempt(s): {reason}")]
pub struct PageFetchError {
    pub page: PageToken,
    pub attempts: u32,
    pub reason: String,
}

/// Fetch one listing page's markup.
///
/// Any failure, including a non-2xx status, is retried up to the policy's budget.
pub async fn fetch_listing_page(
    transport: &dyn Transport,
    source: &ListingSource,
    page: PageToken,
    policy: &RetryPolicy,
) -> Result<String, PageFetchError> {
    let url = source.page_url(page);
    debug!("Fetching listing page {}: {}", page, url);

    let attempted = policy
        .run(
            |timeout| {
                let url = url.clone();
                async move {
                    match transport.fetch(&url, timeout).await {
                        Ok(response) if response.is_success() => Ok(response.body),
                        Ok(response) => Err(ListingFailure::Status(response.status)),
                        Err(e) => Err(ListingFailure::Transport(e)),
                    }
                }
            },
            |result| {
                if let Err(e) = result {
                    warn!("Listing page {} attempt failed: {}", page, e);
                }
                result.is_err()
            },
        )
        .await;

    attempted.result.map_err(|e| PageFetchError {
        page,
        attempts: attempted.attempts,
        reason: e.to_string(),
    })
}

#[derive(Debug, Error)]
enum ListingFailure {
    #[error(transparent)]
    Transport(TransportError),

    #[error("HTTP {0}")]
    Status(u16),
}
