//! Local business adapter
//!
//! Search results are paged ten at a time per city and category. When the
//! filter names no city, discovery walks through [`CITIES`] and moves to the
//! next city once the current one runs out of pages.

use crate::source::html::{all, doc_all, doc_first, doc_text, element_text, first, first_attr};
use crate::source::{
    fetch_listing, parse_base_url, parse_result_count, push_new, CrawlTarget, DiscoveryError,
    Filter, Item, ItemKind, KnownItems, ListingCursor, ParseFailure, SourceAdapter,
    SourceProfile, CITIES,
};
use crate::ConfigResult;
use async_trait::async_trait;
use reqwest::Client;
use scraper::Html;
use serde_json::{json, Map, Value};
use std::time::Duration;
use url::Url;

pub const SOURCE_ID: &str = "yelp";
const DEFAULT_BASE_URL: &str = "http://www.yelp.com/";
const RESULTS_PER_PAGE: u32 = 10;
const MAX_PAGE: u32 = 99;

/// Pages re-read before the seeded start page when a category is set
const CATEGORY_BACK_OFF: u32 = 5;

pub struct YelpAdapter {
    client: Client,
    base_url: Url,
    cursor: ListingCursor,
}

/// One page of search results
#[derive(Debug, Default)]
pub struct SearchPage {
    pub targets: Vec<CrawlTarget>,

    /// Total results reported by the pagination widget
    pub total: Option<u32>,
}

impl YelpAdapter {
    pub fn new(client: Client, base_url: Option<&str>) -> ConfigResult<Self> {
        Ok(Self {
            client,
            base_url: parse_base_url(base_url.unwrap_or(DEFAULT_BASE_URL))?,
            cursor: ListingCursor::new(),
        })
    }

    /// `search?find_loc=<city>&start=<page*10>[&cflt=<category>]`
    pub fn listing_url(
        &self,
        city: &str,
        category: Option<&str>,
        page: u32,
    ) -> Result<Url, DiscoveryError> {
        let mut url = self
            .base_url
            .join("search")
            .map_err(|e| DiscoveryError::InvalidUrl(e.to_string()))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("find_loc", city)
                .append_pair("start", &(page * RESULTS_PER_PAGE).to_string());
            if let Some(category) = category {
                query.append_pair("cflt", &category.to_lowercase());
            }
        }
        Ok(url)
    }

    fn current_city(&self, filter: &Filter) -> Option<String> {
        match filter.city() {
            Some(city) => Some(city.to_string()),
            None => CITIES.get(self.cursor.city_index).map(|c| c.to_string()),
        }
    }

    /// Moves past the current city, or ends the filter if it pins one
    fn finish_city(&mut self, filter: &Filter) {
        if filter.city().is_some() {
            self.cursor.exhausted = true;
        } else {
            self.cursor.next_city();
        }
    }
}

#[async_trait]
impl SourceAdapter for YelpAdapter {
    fn id(&self) -> &str {
        SOURCE_ID
    }

    fn profile(&self) -> SourceProfile {
        SourceProfile {
            batch_size: 30,
            retry_delay: Duration::from_secs(10),
            use_proxies: true,
            content_root: None,
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

        while collected.len() < count && !self.cursor.exhausted {
            let Some(city) = self.current_city(filter) else {
                tracing::info!(source = SOURCE_ID, "Done with all cities");
                self.cursor.exhausted = true;
                break;
            };

            let mut wanted = vec![("city", city.as_str())];
            wanted.extend(filter.category().map(|category| ("category", category)));
            let back_off = if filter.category().is_some() { CATEGORY_BACK_OFF } else { 0 };
            self.cursor
                .seed_page(known.count_tagged(&wanted), RESULTS_PER_PAGE, MAX_PAGE, back_off);

            if self.cursor.page > self.cursor.max_page.unwrap_or(MAX_PAGE) {
                self.finish_city(filter);
                continue;
            }

            let url = self.listing_url(&city, filter.category(), self.cursor.page)?;
            let html = match fetch_listing(&self.client, &url).await {
                Ok(html) => html,
                Err(e) => {
                    self.cursor.stash(collected);
                    return Err(e);
                }
            };

            let page = parse_search_page(&html, &self.base_url, &city);
            if let Some(total) = page.total {
                self.cursor.max_page = Some((total / RESULTS_PER_PAGE).min(MAX_PAGE));
            }

            if page.targets.is_empty() {
                tracing::debug!(source = SOURCE_ID, city = %city, page = self.cursor.page, "No more results for city");
                self.finish_city(filter);
                continue;
            }

            self.cursor.page += 1;
            for target in page.targets {
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
        parse_business(content, target)
    }
}

/// Reads the business links of a search results page
pub fn parse_search_page(html: &str, base_url: &Url, city: &str) -> SearchPage {
    let document = Html::parse_document(html);

    let total = parse_result_count(&doc_text(&document, ".pagination-results-window"));

    let targets = doc_all(&document, "li.regular-search-result")
        .into_iter()
        .filter_map(|row| {
            let link = first(row, "a.biz-name")?;
            let href = link.value().attr("href")?;
            let url = crate::source::html::resolve_link(href, base_url)?;
            Some(
                CrawlTarget::new(url)
                    .with_name(element_text(link))
                    .with_context("city", city)
                    .with_context(
                        "avatar",
                        first_attr(row, ".main-attributes .photo-box-img", "src")
                            .unwrap_or_default(),
                    ),
            )
        })
        .collect();

    SearchPage { targets, total }
}

/// Builds a business item from a detail page
///
/// Fails when the page has no address block, which is what blocked or
/// captcha pages look like.
pub fn parse_business(content: &str, target: &CrawlTarget) -> Result<Item, ParseFailure> {
    let document = Html::parse_document(content);

    let mapbox = doc_first(&document, ".mapbox")
        .ok_or_else(|| ParseFailure::Missing("address block (.mapbox)".to_string()))?;

    let mut name = doc_text(&document, ".biz-page-title");
    if name.is_empty() {
        name = target.name.clone().unwrap_or_default();
    }
    if name.is_empty() {
        return Err(ParseFailure::Missing("business name".to_string()));
    }

    let mut address = Map::new();
    for span in all(mapbox, ".map-box-address span") {
        let key = if span.value().classes().any(|c| c == "neighborhood-str-list") {
            "neighborhood"
        } else {
            match span.value().attr("itemprop") {
                Some("streetAddress") => "street",
                Some("addressLocality") => "city",
                Some("addressRegion") => "state",
                Some("postalCode") => "postal_code",
                _ => continue,
            }
        };
        let text = element_text(span);
        if !text.is_empty() {
            address.insert(key.to_string(), Value::String(text));
        }
    }
    if !address.contains_key("street") {
        let street = first(mapbox, ".map-box-address .street-address")
            .map(element_text)
            .unwrap_or_default();
        if !street.is_empty() {
            address.insert("street".to_string(), Value::String(street));
        }
    }
    if !address.contains_key("city") {
        if let Some(city) = target.context("city") {
            address.insert("city".to_string(), Value::String(city.to_string()));
        }
    }
    if let Some(country) = first(mapbox, ".map-box-address meta[itemprop=\"addressCountry\"]")
        .and_then(|m| m.value().attr("content"))
    {
        address.insert("country".to_string(), Value::String(country.to_string()));
    }

    let phone = first(mapbox, ".biz-phone").map(element_text).unwrap_or_default();
    let website = first_attr(mapbox, ".biz-website a", "href")
        .map(|href| unwrap_redirect(&href))
        .unwrap_or_default();
    let coordinates = first_attr(mapbox, ".mapbox-map img", "src")
        .map(|src| parse_map_center(&src))
        .unwrap_or_default();

    let categories: Vec<String> = doc_text(&document, ".category-str-list")
        .split(',')
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();

    let mut hours = Map::new();
    for row in doc_all(&document, ".hours-table tbody tr") {
        let day = doc_row_text(row, "th").to_lowercase();
        if !day.is_empty() {
            hours.insert(day, Value::String(doc_row_text(row, "td").to_lowercase()));
        }
    }

    let review_labels = ["five", "four", "three", "two", "one"];
    let mut reviews = Map::new();
    for (label, row) in review_labels
        .iter()
        .zip(doc_all(&document, "table.histogram tr.histogram_row"))
    {
        reviews.insert(
            label.to_string(),
            Value::String(doc_row_text(row, "td.histogram_count")),
        );
    }

    let additional_info: Vec<Value> = doc_all(&document, ".short-def-list dl")
        .into_iter()
        .map(|row| json!({ "key": doc_row_text(row, "dt"), "value": doc_row_text(row, "dd") }))
        .collect();

    let ratings_info = doc_text(&document, ".rating-details-ratings-info");
    let yelping_since = ratings_info
        .split_once("Yelping since")
        .map(|(_, rest)| rest.trim().chars().take(4).collect::<String>())
        .unwrap_or_default();

    Ok(Item::new(SOURCE_ID, ItemKind::Business, name, target.key.clone())
        .with_field("address", Value::Object(address))
        .with_field("phone", phone)
        .with_field("website", website)
        .with_field("coordinates", coordinates)
        .with_field("categories", categories)
        .with_field("price_range", doc_text(&document, ".island.summary .price-range"))
        .with_field(
            "price_description",
            doc_text(&document, ".island.summary .price-description"),
        )
        .with_field(
            "health_inspection",
            doc_text(&document, ".island.summary .health-score .score-block"),
        )
        .with_field("hours", Value::Object(hours))
        .with_field("reviews", Value::Object(reviews))
        .with_field("additional_info", additional_info)
        .with_field("yelping_since", yelping_since)
        .with_field("avatar", target.context("avatar").unwrap_or_default()))
}

fn doc_row_text(row: scraper::ElementRef<'_>, css: &str) -> String {
    first(row, css).map(element_text).unwrap_or_default()
}

/// Extracts the destination of a `/biz_redir?url=...` link
fn unwrap_redirect(href: &str) -> String {
    match href.split_once("biz_redir?") {
        Some((_, query)) => url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == "url")
            .map(|(_, value)| value.into_owned())
            .unwrap_or_else(|| href.to_string()),
        None => href.to_string(),
    }
}

/// Reads `[lat, lng]` from the `center=` parameter of a static map URL
fn parse_map_center(src: &str) -> Vec<String> {
    let Some((_, rest)) = src.split_once("center=") else {
        return Vec::new();
    };
    let center = rest.split('&').next().unwrap_or_default();
    let parts: Vec<String> = center
        .split("%2C")
        .flat_map(|p| p.split(','))
        .map(str::to_string)
        .collect();
    if parts.len() == 2 {
        parts
    } else {
        Vec::new()
    }
}
