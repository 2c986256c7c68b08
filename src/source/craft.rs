//! Company directory adapter
//!
//! Listing pages are tables with one company per row: name, link and logo in
//! the first cell, then description, headquarters city and employee count.
//! Detail pages carry status, social links, finances, key people and offices.

use crate::source::html::{
    all, doc_all, doc_first, doc_text, element_text, first, first_attr, first_text,
    resolve_link,
};
use crate::source::{
    fetch_listing, parse_base_url, push_new, CrawlTarget, DiscoveryError, Filter, Item,
    ItemKind, KnownItems, ListingCursor, ParseFailure, SourceAdapter, SourceProfile,
};
use crate::ConfigResult;
use async_trait::async_trait;
use reqwest::Client;
use scraper::Html;
use serde_json::{json, Map, Value};
use std::time::Duration;
use url::Url;

pub const SOURCE_ID: &str = "craft";
const DEFAULT_BASE_URL: &str = "https://craft.co/";
const MAX_PAGE: u32 = 100;
const RESULTS_PER_PAGE: u32 = 8;
const RESULTS_PER_INDUSTRY_PAGE: u32 = 15;

pub struct CraftAdapter {
    client: Client,
    base_url: Url,
    cursor: ListingCursor,
}

impl CraftAdapter {
    pub fn new(client: Client, base_url: Option<&str>) -> ConfigResult<Self> {
        Ok(Self {
            client,
            base_url: parse_base_url(base_url.unwrap_or(DEFAULT_BASE_URL))?,
            cursor: ListingCursor::new(),
        })
    }

    /// `search/industry/<category>?page=N&view=table&section=companies`
    pub fn listing_url(&self, filter: &Filter, page: u32) -> Result<Url, DiscoveryError> {
        let path = match filter.category() {
            Some(category) => format!("search/industry/{}", category.to_lowercase()),
            None => "search".to_string(),
        };

        let mut url = self
            .base_url
            .join(&path)
            .map_err(|e| DiscoveryError::InvalidUrl(format!("{}: {}", path, e)))?;
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("view", "table")
            .append_pair("section", "companies");
        Ok(url)
    }
}

#[async_trait]
impl SourceAdapter for CraftAdapter {
    fn id(&self) -> &str {
        SOURCE_ID
    }

    fn profile(&self) -> SourceProfile {
        SourceProfile {
            batch_size: 30,
            retry_delay: Duration::from_secs(5),
            use_proxies: true,
            content_root: Some(".container-page".to_string()),
        }
    }

    async fn discover_targets(
        &mut self,
        known: &KnownItems,
        filter: &Filter,
        count: usize,
    ) -> Result<Vec<CrawlTarget>, DiscoveryError> {
        self.cursor.seek(filter);
        let mut collected = self.cursor.take_carry(known);

        let (seen, per_page) = match filter.category() {
            Some(category) => (
                known.count_tagged(&[("category", category)]),
                RESULTS_PER_INDUSTRY_PAGE,
            ),
            None => (known.len(), RESULTS_PER_PAGE),
        };
        self.cursor.seed_page(seen, per_page, MAX_PAGE, 0);

        while collected.len() < count && !self.cursor.exhausted {
            if self.cursor.page >= MAX_PAGE {
                self.cursor.exhausted = true;
                break;
            }

            let url = self.listing_url(filter, self.cursor.page)?;
            let html = match fetch_listing(&self.client, &url).await {
                Ok(html) => html,
                Err(e) => {
                    self.cursor.stash(collected);
                    return Err(e);
                }
            };

            let rows = parse_listing(&html, &self.base_url);
            if rows.is_empty() {
                tracing::debug!(source = SOURCE_ID, filter = %filter, page = self.cursor.page, "Listing exhausted");
                self.cursor.exhausted = true;
                break;
            }

            self.cursor.page += 1;
            for target in rows {
                push_new(&mut collected, known, target);
            }
        }

        if collected.len() > count {
            let rest = collected.split_off(count);
            self.cursor.stash(rest);
        }
        Ok(collected)
    }

    fn parse_detail(&self, content: &str, target: &CrawlTarget) -> Result<Item, ParseFailure> {
        parse_company(content, target)
    }
}

/// Reads the company rows of a listing table
pub fn parse_listing(html: &str, base_url: &Url) -> Vec<CrawlTarget> {
    let document = Html::parse_document(html);
    let mut targets = Vec::new();

    for row in doc_all(&document, "table.table-hover tbody tr") {
        let cells = all(row, "td");
        let Some(first_cell) = cells.first().copied() else {
            continue;
        };
        let Some(url) = first_attr(first_cell, "a", "href").and_then(|h| resolve_link(&h, base_url))
        else {
            continue;
        };

        let cell_text = |i: usize| cells.get(i).map(|c| element_text(*c)).unwrap_or_default();

        targets.push(
            CrawlTarget::new(url)
                .with_name(element_text(first_cell))
                .with_context("logo", first_attr(first_cell, "img", "src").unwrap_or_default())
                .with_context("description", cell_text(1))
                .with_context("headquarters", cell_text(2))
                .with_context("employees", cell_text(3)),
        );
    }

    targets
}

/// Builds a company item from a detail page
pub fn parse_company(content: &str, target: &CrawlTarget) -> Result<Item, ParseFailure> {
    let document = Html::parse_document(content);

    let top = doc_first(&document, "div.top")
        .ok_or_else(|| ParseFailure::Missing("company header (div.top)".to_string()))?;

    let name = target
        .name
        .clone()
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| first_text(top, "h1"));
    if name.is_empty() {
        return Err(ParseFailure::Missing("company name".to_string()));
    }

    let category = doc_text(&document, "ul.breadcrumb li")
        .replace('!', "")
        .trim()
        .to_lowercase();

    let mut social = Map::new();
    for link in all(top, "div.social-links a") {
        let (Some(title), Some(href)) = (link.value().attr("title"), link.value().attr("href"))
        else {
            continue;
        };
        let key = match title.trim().to_lowercase().as_str() {
            "site" => "website",
            "crunchbase" => "crunchbase",
            "linkedin" => "linkedin",
            "youtube" => "youtube",
            "facebook" => "facebook",
            "instagram" => "instagram",
            _ => continue,
        };
        social.insert(key.to_string(), Value::String(href.trim().to_string()));
    }
    let twitter = doc_text(&document, "#twitter-block .active-handle");
    if let Some(handle) = twitter.strip_prefix('@') {
        social.insert(
            "twitter".to_string(),
            Value::String(format!("https://twitter.com/{}", handle)),
        );
    }

    let mut founded = String::new();
    let mut funding_amount = String::new();
    let mut last_funding = String::new();
    for row in doc_all(&document, "table.table-finance tr") {
        let cells = all(row, "td");
        let (Some(key), Some(value)) = (cells.first(), cells.get(1)) else {
            continue;
        };
        let value = element_text(*value);
        match element_text(*key).replace(':', "").trim().to_lowercase().as_str() {
            "founding date" => founded = value,
            "total funding" => funding_amount = value,
            "time since last funding" => last_funding = value,
            _ => {}
        }
    }

    let mut people = Vec::new();
    let mut founders = Vec::new();
    for person in doc_all(&document, ".positions .profile-blog") {
        let person_name = first_text(person, ".name");
        let title = first_text(person, ".job-title");
        let mut links = Map::new();
        for link in all(person, "ul.share-list li a") {
            if let (Some(kind), Some(href)) = (link.value().attr("title"), link.value().attr("href"))
            {
                links.insert(kind.trim().to_lowercase(), Value::String(href.to_string()));
            }
        }
        if title.to_lowercase().contains("founder") {
            founders.push(person_name.clone());
        }
        people.push(json!({ "name": person_name, "title": title, "links": links }));
    }

    let mut headquarters = target.context("headquarters").unwrap_or_default().to_string();
    let mut other_locations = Vec::new();
    for location in doc_all(&document, ".container-locations-scroll p") {
        let text = element_text(location);
        if text.contains("(HQ)") {
            headquarters = text.replace("(HQ)", "").trim().to_string();
        } else if !text.is_empty() {
            other_locations.push(text);
        }
    }

    let status = first(top, "span.company-type-label")
        .map(element_text)
        .unwrap_or_default();

    Ok(Item::new(SOURCE_ID, ItemKind::Company, name, target.key.clone())
        .with_field("categories", if category.is_empty() { vec![] } else { vec![category] })
        .with_field("status", status)
        .with_field("description", target.context("description").unwrap_or_default())
        .with_field("employees", target.context("employees").unwrap_or_default())
        .with_field("logo", target.context("logo").unwrap_or_default())
        .with_field("headquarters", headquarters)
        .with_field("other_locations", other_locations)
        .with_field("founded", founded)
        .with_field("funding_amount", funding_amount)
        .with_field("last_funding", last_funding)
        .with_field("social", Value::Object(social))
        .with_field("key_people", people)
        .with_field("founders", founders))
}
