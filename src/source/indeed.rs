//! Job board adapter
//!
//! Every search result row already holds the whole job card, so targets carry
//! the row markup as pre-fetched content and never need a detail fetch.

use crate::source::html::{doc_all, doc_first, doc_text, first, resolve_link};
use crate::source::{
    fetch_listing, parse_base_url, parse_result_count, push_new, CrawlTarget, DiscoveryError,
    Filter, Item, ItemKind, KnownItems, ListingCursor, ParseFailure, SourceAdapter,
    SourceProfile, CITIES,
};
use crate::ConfigResult;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, Months, NaiveDate, Utc};
use reqwest::Client;
use scraper::Html;
use std::time::Duration;
use url::Url;

pub const SOURCE_ID: &str = "indeed";
const DEFAULT_BASE_URL: &str = "http://www.indeed.com/";
const RESULTS_PER_PAGE: u32 = 10;
const MAX_PAGE: u32 = 100;
const EARLIEST_POSTING_YEAR: i32 = 1970;

pub struct IndeedAdapter {
    client: Client,
    base_url: Url,
    cursor: ListingCursor,
}

impl IndeedAdapter {
    pub fn new(client: Client, base_url: Option<&str>) -> ConfigResult<Self> {
        Ok(Self {
            client,
            base_url: parse_base_url(base_url.unwrap_or(DEFAULT_BASE_URL))?,
            cursor: ListingCursor::new(),
        })
    }

    /// `jobs?q=<category>&l=<city>&start=<page*10>`
    pub fn listing_url(
        &self,
        city: &str,
        category: Option<&str>,
        page: u32,
    ) -> Result<Url, DiscoveryError> {
        let mut url = self
            .base_url
            .join("jobs")
            .map_err(|e| DiscoveryError::InvalidUrl(e.to_string()))?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(category) = category {
                query.append_pair("q", category);
            }
            query
                .append_pair("l", city)
                .append_pair("start", &(page * RESULTS_PER_PAGE).to_string());
        }
        Ok(url)
    }

    fn current_city(&self, filter: &Filter) -> Option<String> {
        match filter.city() {
            Some(city) => Some(city.to_string()),
            None => CITIES.get(self.cursor.city_index).map(|c| c.to_string()),
        }
    }

    fn finish_city(&mut self, filter: &Filter) {
        if filter.city().is_some() {
            self.cursor.exhausted = true;
        } else {
            self.cursor.next_city();
        }
    }
}

#[async_trait]
impl SourceAdapter for IndeedAdapter {
    fn id(&self) -> &str {
        SOURCE_ID
    }

    fn profile(&self) -> SourceProfile {
        SourceProfile {
            batch_size: 10,
            retry_delay: Duration::from_secs(10),
            use_proxies: false,
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
            self.cursor
                .seed_page(known.count_tagged(&wanted), RESULTS_PER_PAGE, MAX_PAGE, 0);

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

            let (targets, total) =
                parse_results(&html, &self.base_url, &city, filter.category());
            if let Some(total) = total {
                self.cursor.max_page = Some((total / RESULTS_PER_PAGE).min(MAX_PAGE));
            }

            if targets.is_empty() {
                tracing::debug!(source = SOURCE_ID, city = %city, page = self.cursor.page, "No more results for city");
                self.finish_city(filter);
                continue;
            }

            self.cursor.page += 1;
            for target in targets {
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
        parse_job(content, target, &self.base_url, Utc::now())
    }
}

/// Reads the result rows of a search page together with the reported total
///
/// Job titles repeat across employers, so targets carry no name hint and are
/// deduplicated on their link alone at this stage.
pub fn parse_results(
    html: &str,
    base_url: &Url,
    city: &str,
    category: Option<&str>,
) -> (Vec<CrawlTarget>, Option<u32>) {
    let document = Html::parse_document(html);
    let total = parse_result_count(&doc_text(&document, "#searchCount"));

    let targets = doc_all(&document, ".row.result")
        .into_iter()
        .filter_map(|row| {
            let href = first(row, "a")?.value().attr("href")?;
            let url = resolve_link(href, base_url)?;
            Some(
                CrawlTarget::new(url)
                    .with_content(row.html())
                    .with_context("city", city)
                    .with_context("category", category.unwrap_or_default()),
            )
        })
        .collect();

    (targets, total)
}

/// Builds a job item from a result row
///
/// The item name is `<title> at <company>` so that the same opening posted
/// twice by one employer collides while equal titles at different employers
/// do not.
pub fn parse_job(
    content: &str,
    target: &CrawlTarget,
    base_url: &Url,
    now: DateTime<Utc>,
) -> Result<Item, ParseFailure> {
    if content.trim().is_empty() {
        return Err(ParseFailure::NoContent);
    }
    let document = Html::parse_document(content);

    let city = target.context("city").unwrap_or_default();
    let title = doc_first(&document, "a[title]")
        .and_then(|a| a.value().attr("title"))
        .map(|t| t.replace(city, "").trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ParseFailure::Missing("job title".to_string()))?;

    let company = doc_text(&document, ".company");
    let company_link = doc_first(&document, ".company a")
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| resolve_link(href, base_url))
        .unwrap_or_default();

    let name = if company.is_empty() {
        title.clone()
    } else {
        format!("{} at {}", title, company)
    };

    let posted = time_ago_to_date(&doc_text(&document, ".date"), now)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default();

    Ok(Item::new(SOURCE_ID, ItemKind::Job, name, target.key.clone())
        .with_field("title", title)
        .with_field("company", company)
        .with_field("company_link", company_link)
        .with_field("location", doc_text(&document, ".location"))
        .with_field("description", doc_text(&document, ".summary"))
        .with_field("wage", doc_text(&document, "td.snip nobr"))
        .with_field("posted", posted)
        .with_field("city", city)
        .with_field("category", target.context("category").unwrap_or_default()))
}

/// Converts relative dates such as `3 days ago` or `30+ days ago`
pub fn time_ago_to_date(text: &str, now: DateTime<Utc>) -> Option<NaiveDate> {
    let text = text.trim().to_lowercase();
    if text == "just posted" || text == "today" {
        return Some(now.date_naive());
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    let [count, unit, "ago"] = words.as_slice() else {
        return None;
    };
    let count: u32 = count.trim_end_matches('+').parse().ok()?;

    let count = i64::from(count);
    let then = if unit.starts_with("second") {
        now.checked_sub_signed(ChronoDuration::try_seconds(count)?)?
    } else if unit.starts_with("minute") {
        now.checked_sub_signed(ChronoDuration::try_minutes(count)?)?
    } else if unit.starts_with("hour") {
        now.checked_sub_signed(ChronoDuration::try_hours(count)?)?
    } else if unit.starts_with("day") {
        now.checked_sub_signed(ChronoDuration::try_days(count)?)?
    } else if unit.starts_with("month") {
        now.checked_sub_months(Months::new(u32::try_from(count).ok()?))?
    } else if unit.starts_with("year") {
        now.checked_sub_months(Months::new(u32::try_from(count).ok()?.checked_mul(12)?))?
    } else {
        return None;
    };

    // Postings older than the epoch are garbage on the page
    Some(then.date_naive()).filter(|date| date.year() >= EARLIEST_POSTING_YEAR)
}
