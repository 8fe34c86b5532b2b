//! Listing source definition and page token arithmetic
//!
//! A listing is addressed by a page token substituted into a URL template.
//! Tokens can be far larger than `u64` and advance by a configured stride.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Configuration errors for listing sources and delays
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Listing URL template must contain {{page}}: {0}")]
    MissingPagePlaceholder(String),

    #[error("Page stride must be at least 1")]
    ZeroStride,

    #[error("Invalid page token: {0}")]
    InvalidPageToken(String),

    #[error("max_pages must be at least 1")]
    ZeroMaxPages,

    #[error("Invalid delay range: min {min}s, max {max}s")]
    InvalidDelay { min: f64, max: f64 },
}

/// Opaque listing page identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageToken(pub u128);

impl PageToken {
    /// The token `stride` pages further on, or `None` past the end of the token space
    pub fn advance(self, stride: u128) -> Option<PageToken> {
        self.0.checked_add(stride).map(PageToken)
    }
}

impl fmt::Display for PageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PageToken {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u128>()
            .map(PageToken)
            .map_err(|_| ConfigError::InvalidPageToken(s.to_string()))
    }
}

impl From<u128> for PageToken {
    fn from(value: u128) -> Self {
        PageToken(value)
    }
}

// Strings on the wire: TOML and JSON integers cannot hold every token.
impl Serialize for PageToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PageToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TokenVisitor;

        impl serde::de::Visitor<'_> for TokenVisitor {
            type Value = PageToken;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a non-negative page number or a string holding one")
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<PageToken, E> {
                Ok(PageToken(v as u128))
            }

            fn visit_u128<E: serde::de::Error>(self, v: u128) -> Result<PageToken, E> {
                Ok(PageToken(v))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<PageToken, E> {
                u128::try_from(v)
                    .map(PageToken)
                    .map_err(|_| E::custom(format!("negative page token: {}", v)))
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<PageToken, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(TokenVisitor)
    }
}

/// An onion directory that enumerates sites page by page
#[derive(Debug, Clone, PartialEq)]
pub struct ListingSource {
    /// URL template with a {page} placeholder
    pub url_template: String,
    /// CSS selector of the element holding the site links; `None` scans the whole page
    pub container: Option<String>,
    /// Token increment between consecutive pages
    pub stride: u128,
}

const DEFAULT_STRIDE: u128 = 1;

/// Listing the tool was built around
pub const DEFAULT_LISTING_TEMPLATE: &str =
    "http://jptvwdeyknkv6oiwjtr2kxzehfnmcujl7rf7vytaikmwlvze773uiyyd.onion/?page={page}";

/// Element id wrapping the site links on the default listing
pub const DEFAULT_LISTING_CONTAINER: &str = "#link_list";

/// First page of the default listing
pub const DEFAULT_START_PAGE: PageToken = PageToken(1_072_722_848_287_667_155_967);

impl Default for ListingSource {
    fn default() -> Self {
        Self {
            url_template: DEFAULT_LISTING_TEMPLATE.to_string(),
            container: Some(DEFAULT_LISTING_CONTAINER.to_string()),
            stride: DEFAULT_STRIDE,
        }
    }
}

impl ListingSource {
    pub fn new(url_template: impl Into<String>) -> Self {
        Self {
            url_template: url_template.into(),
            container: None,
            stride: DEFAULT_STRIDE,
        }
    }

    pub fn with_container(mut self, selector: impl Into<String>) -> Self {
        self.container = Some(selector.into());
        self
    }

    pub fn with_stride(mut self, stride: u128) -> Self {
        self.stride = stride;
        self
    }

    /// Check the template and stride
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.url_template.contains("{page}") {
            return Err(ConfigError::MissingPagePlaceholder(self.url_template.clone()));
        }
        if self.stride == 0 {
            return Err(ConfigError::ZeroStride);
        }
        Ok(())
    }

    /// Build the URL of one listing page
    pub fn page_url(&self, page: PageToken) -> String {
        self.url_template.replace("{page}", &page.to_string())
    }
}
