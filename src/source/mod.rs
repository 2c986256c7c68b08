//! Source adapters
//!
//! This module handles:
//! - The [`SourceAdapter`] trait every crawled site implements
//! - Crawl targets, filters and crawled items
//! - The registry mapping source ids to adapter constructors

mod craft;
mod cursor;
mod filter;
pub mod html;
mod indeed;
mod item;
mod yelp;

pub use craft::CraftAdapter;
pub use cursor::{push_new, ListingCursor};
pub use filter::{Filter, FilterSet};
pub use indeed::IndeedAdapter;
pub use item::{filter_tags, Item, ItemKey, ItemKind, KnownItems};
pub use yelp::YelpAdapter;

use crate::config::SourceEntry;
use crate::{ConfigError, ConfigResult, DragnetError};
use async_trait::async_trait;
use reqwest::Client;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Cities rotated through by adapters when the filter names none
pub const CITIES: &[&str] = &[
    "San Francisco, CA",
    "Los Angeles, CA",
    "New York",
    "Boston, MA",
    "Chicago, IL",
    "Houston, TX",
    "Phoenix, AZ",
    "Seattle, WA",
    "Austin, TX",
    "Dallas, TX",
    "San Diego, CA",
    "Sacramento, CA",
    "San Jose, CA",
    "Oakland, CA",
    "Santa Barbara, CA",
    "Santa Monica, CA",
    "Philadelphia, PA",
    "San Antonio, TX",
    "Jacksonville",
    "Indianapolis",
    "Columbus",
    "Fort Worth",
    "Charlotte",
    "Denver",
    "El Paso",
    "Detroit",
    "Washington",
    "Memphis",
    "Nashville",
    "Portland",
    "Oklahoma City",
    "Las Vegas",
    "Baltimore",
    "Louisville",
    "Milwaukee",
    "Albuquerque",
    "Tucson",
    "Fresno",
    "Kansas City",
    "Long Beach",
    "Mesa",
    "Atlanta",
    "Colorado Springs",
    "Virginia Beach",
    "Raleigh",
    "Omaha",
    "Miami",
    "Minneapolis",
    "Tulsa",
    "Wichita",
    "New Orleans",
    "Arlington",
    "Cleveland",
    "Bakersfield",
    "Tampa",
    "Aurora",
    "Honolulu",
    "Anaheim",
    "Santa Ana",
    "Corpus Christi",
    "Riverside",
    "St. Louis, MO",
    "Lexington",
    "Stockton",
    "Pittsburgh",
    "Saint Paul",
    "Anchorage",
    "Cincinnati",
    "Henderson",
    "Greensboro",
    "Plano",
    "Newark",
];

/// A unit of work produced by discovery and consumed exactly once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlTarget {
    /// URL identifying the target; fetched unless `content` is present
    pub key: String,

    /// Name seen on the listing, used for early deduplication
    pub name: Option<String>,

    /// Markup already captured during discovery
    pub content: Option<String>,

    /// Listing data needed by `parse_detail` (city, category, thumbnail...)
    pub context: BTreeMap<String, String>,
}

impl CrawlTarget {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: None,
            content: None,
            context: BTreeMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !name.trim().is_empty() {
            self.name = Some(name);
        }
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Adds a listing field; empty values are dropped
    pub fn with_context(mut self, key: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            self.context.insert(key.to_string(), value);
        }
        self
    }

    pub fn context(&self, key: &str) -> Option<&str> {
        self.context.get(key).map(String::as_str)
    }
}

/// Per-source crawl constants
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceProfile {
    /// Targets requested per discovery call
    pub batch_size: usize,

    /// Wait before retrying discovery after a failure or an empty result
    pub retry_delay: Duration,

    /// Route detail fetches through the proxy pool
    pub use_proxies: bool,

    /// CSS selector of the part of a detail page kept for parsing
    pub content_root: Option<String>,
}

impl SourceProfile {
    /// Applies the overrides configured for this source
    pub fn with_overrides(mut self, entry: Option<&SourceEntry>) -> Self {
        if let Some(entry) = entry {
            if let Some(batch_size) = entry.batch_size {
                self.batch_size = batch_size as usize;
            }
            if let Some(secs) = entry.retry_delay_secs {
                self.retry_delay = Duration::from_secs(secs);
            }
            if let Some(use_proxies) = entry.use_proxies {
                self.use_proxies = use_proxies;
            }
        }
        self
    }
}

/// Errors that can occur while discovering targets
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("listing request to {url} failed: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("listing {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("invalid listing URL: {0}")]
    InvalidUrl(String),
}

/// A detail page that lacks the structure an item needs
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseFailure {
    #[error("missing {0}")]
    Missing(String),

    #[error("target has no content")]
    NoContent,
}

/// A crawled site
///
/// Adapters own their pagination state; discovery resumes where the previous
/// call stopped for as long as it is called with the same filter.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Stable identifier stored with every item
    fn id(&self) -> &str;

    fn profile(&self) -> SourceProfile;

    /// Returns up to `count` targets that match nothing in `known`
    ///
    /// Fewer than `count` targets means the source is exhausted for `filter`.
    async fn discover_targets(
        &mut self,
        known: &KnownItems,
        filter: &Filter,
        count: usize,
    ) -> Result<Vec<CrawlTarget>, DiscoveryError>;

    /// Turns fetched (or pre-fetched) content into an item, without I/O
    fn parse_detail(&self, content: &str, target: &CrawlTarget) -> Result<Item, ParseFailure>;
}

/// Everything an adapter constructor needs
#[derive(Debug, Clone)]
pub struct AdapterContext {
    /// Client used for listing requests
    pub client: Client,

    /// Overrides the adapter's default site root
    pub base_url: Option<String>,
}

/// Constructor stored in the registry
pub type AdapterFactory = fn(AdapterContext) -> ConfigResult<Box<dyn SourceAdapter>>;

/// Maps source ids to adapter constructors
pub struct AdapterRegistry {
    factories: BTreeMap<String, AdapterFactory>,
}

impl AdapterRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Creates a registry holding the built-in adapters
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(craft::SOURCE_ID, |ctx| {
            Ok(Box::new(CraftAdapter::new(ctx.client, ctx.base_url.as_deref())?))
        });
        registry.register(yelp::SOURCE_ID, |ctx| {
            Ok(Box::new(YelpAdapter::new(ctx.client, ctx.base_url.as_deref())?))
        });
        registry.register(indeed::SOURCE_ID, |ctx| {
            Ok(Box::new(IndeedAdapter::new(ctx.client, ctx.base_url.as_deref())?))
        });
        registry
    }

    pub fn register(&mut self, id: &str, factory: AdapterFactory) {
        self.factories.insert(id.to_lowercase(), factory);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(&id.to_lowercase())
    }

    /// Registered ids in sorted order
    pub fn ids(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Builds the adapter registered under `id`
    pub fn build(
        &self,
        id: &str,
        context: AdapterContext,
    ) -> Result<Box<dyn SourceAdapter>, DragnetError> {
        let factory = self
            .factories
            .get(&id.to_lowercase())
            .ok_or_else(|| DragnetError::UnknownSource(id.to_string()))?;
        Ok(factory(context)?)
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Parses an adapter's base URL, making sure it ends with a slash
pub(crate) fn parse_base_url(base_url: &str) -> ConfigResult<Url> {
    let normalized = if base_url.ends_with('/') {
        base_url.to_string()
    } else {
        format!("{}/", base_url)
    };
    Url::parse(&normalized)
        .map_err(|e| ConfigError::InvalidUrl(format!("base-url '{}': {}", base_url, e)))
}

/// Fetches a listing page as text
pub(crate) async fn fetch_listing(client: &Client, url: &Url) -> Result<String, DiscoveryError> {
    tracing::debug!(url = %url, "Fetching listing page");

    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|source| DiscoveryError::Http {
            url: url.to_string(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(DiscoveryError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    response.text().await.map_err(|source| DiscoveryError::Http {
        url: url.to_string(),
        source,
    })
}

/// Reads the total from pagination text such as `Showing 1-10 of 1,240`
pub(crate) fn parse_result_count(text: &str) -> Option<u32> {
    let (_, tail) = text.rsplit_once("of")?;
    let digits: String = tail
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ',')
        .filter(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}
