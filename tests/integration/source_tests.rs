//! Integration tests for the built-in source adapters
//!
//! Listing and detail pages are served by wiremock; sessions store into a
//! temporary SQLite database.

use crate::common::{test_user_agent, TrackingFetcher};
use dragnet::config::parse_config;
use dragnet::crawler::{build_http_client, build_orchestrator, Orchestrator, SessionOutcome};
use dragnet::source::{
    AdapterContext, AdapterRegistry, CraftAdapter, Filter, FilterSet, IndeedAdapter, ItemKind,
    KnownItems, SourceAdapter, SourceProfile, YelpAdapter,
};
use dragnet::storage::SqliteSink;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CRAFT_LISTING: &str = r#"
    <html><body>
      <table class="table table-hover">
        <tbody>
          <tr>
            <td><img src="/logos/acme.png"><a href="/acme">Acme</a></td>
            <td>Rockets and anvils</td><td>Phoenix, AZ</td><td>51-200</td>
          </tr>
          <tr>
            <td><a href="/globex">Globex</a></td>
            <td>Everything</td><td>Cypress Creek</td><td>1000+</td>
          </tr>
        </tbody>
      </table>
    </body></html>
"#;

const CRAFT_EMPTY: &str = r#"<html><body><table class="table table-hover"><tbody></tbody></table></body></html>"#;

fn craft_company(title: &str) -> String {
    format!(
        r#"<html><body>
          <nav>Sign in</nav>
          <div class="container-page">
            <ul class="breadcrumb"><li>Fintech!</li></ul>
            <div class="top">
              <h1>{title}</h1>
              <span class="company-type-label">Private</span>
            </div>
          </div>
        </body></html>"#
    )
}

#[tokio::test]
async fn test_craft_session_end_to_end() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search/industry/fintech"))
        .and(query_param("page", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_string(CRAFT_LISTING))
        .with_priority(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search/industry/fintech"))
        .respond_with(ResponseTemplate::new(200).set_body_string(CRAFT_EMPTY))
        .mount(&mock_server)
        .await;
    for (slug, title) in [("acme", "Acme Corporation"), ("globex", "Globex Corporation")] {
        Mock::given(method("GET"))
            .and(path(format!("/{}", slug)))
            .respond_with(ResponseTemplate::new(200).set_body_string(craft_company(title)))
            .expect(1)
            .mount(&mock_server)
            .await;
    }

    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("dragnet.db");
    let config = parse_config(&format!(
        r#"
[crawler]
hits-per-loop = 5
stagger-ms = 0
fetch-timeout-secs = 5
max-idle-discoveries = 1

[user-agent]
crawler-name = "TestBot"
crawler-version = "1.0.0"
contact-url = "https://example.com/contact"

[proxy]
enabled = false

[output]
database-path = "{db}"

[[source]]
id = "craft"
base-url = "{base}"
batch-size = 10
"#,
        db = db_path.display(),
        base = mock_server.uri()
    ))
    .unwrap();

    let sink = Arc::new(SqliteSink::new(&db_path).unwrap());
    let orchestrator = build_orchestrator(
        &config,
        &AdapterRegistry::with_defaults(),
        "craft",
        sink.clone(),
        false,
    )
    .unwrap();
    assert_eq!(orchestrator.profile().batch_size, 10);
    assert!(!orchestrator.profile().use_proxies);
    assert!(orchestrator.pool().is_none());

    let filters = FilterSet::parse("category=fintech").unwrap();
    let report = orchestrator
        .run_session(filters.clone(), Some(10), CancellationToken::new(), |_| {})
        .await
        .unwrap();

    assert_eq!(report.outcome, SessionOutcome::Exhausted);
    assert_eq!(report.inserted_count, 2);

    let items = sink.items_for_source("craft").unwrap();
    assert_eq!(items.len(), 2);
    let acme = items.iter().find(|i| i.name == "Acme").unwrap();
    assert_eq!(acme.kind, ItemKind::Company);
    assert_eq!(acme.url, format!("{}/acme", mock_server.uri()));
    assert_eq!(acme.field_str("headquarters"), Some("Phoenix, AZ"));
    assert_eq!(acme.field_str("status"), Some("Private"));

    let sessions = sink.recent_sessions(5).unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].outcome, Some(SessionOutcome::Exhausted));
    assert_eq!(sessions[0].inserted_count, 2);

    // A second run finds everything already stored
    let report = orchestrator
        .run_session(filters, Some(10), CancellationToken::new(), |_| {})
        .await
        .unwrap();
    assert_eq!(report.items_at_start, 2);
    assert_eq!(report.inserted_count, 0);
}

#[tokio::test]
async fn test_craft_discovery_starts_past_stored_companies() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search/industry/fintech"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(CRAFT_LISTING))
        .expect(1)
        .mount(&mock_server)
        .await;

    // 31 stored fintech companies at 15 per industry page, plus unrelated ones
    let mut known = KnownItems::new();
    for i in 0..31 {
        known.insert_tagged(
            &format!("Fintech {}", i),
            &format!("https://craft.co/fintech-{}", i),
            vec![("category".to_string(), "fintech".to_string())],
        );
    }
    for i in 0..40 {
        known.insert(&format!("Other {}", i), &format!("https://craft.co/other-{}", i));
    }

    let client = build_http_client(&test_user_agent(), Duration::from_secs(5)).unwrap();
    let mut adapter = CraftAdapter::new(client, Some(&mock_server.uri())).unwrap();
    let filter = Filter::parse("category=fintech").unwrap();

    let found = adapter.discover_targets(&known, &filter, 2).await.unwrap();
    assert_eq!(found.len(), 2);
}

fn yelp_page(total: u32, slugs: &[&str]) -> String {
    let rows: String = slugs
        .iter()
        .map(|slug| {
            format!(
                r#"<li class="regular-search-result"><a class="biz-name" href="/biz/{slug}">{slug}</a></li>"#
            )
        })
        .collect();
    format!(
        r#"<div class="pagination-results-window">Showing 1-10 of {total}</div>
           <ul>{rows}</ul>"#
    )
}

#[tokio::test]
async fn test_yelp_discovery_resumes_across_calls() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("find_loc", "Boston, MA"))
        .and(query_param("start", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_string(yelp_page(
            15,
            &["the-tavern", "joes-bar", "corner-pub"],
        )))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("find_loc", "Boston, MA"))
        .and(query_param("start", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_string(yelp_page(15, &["night-owl"])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = build_http_client(&test_user_agent(), Duration::from_secs(5)).unwrap();
    let mut adapter = YelpAdapter::new(client, Some(&mock_server.uri())).unwrap();
    let filter = Filter::parse("city=Boston, MA").unwrap();
    let known: KnownItems = [("joes-bar", "unused")].into_iter().collect();

    let first = adapter.discover_targets(&known, &filter, 1).await.unwrap();
    assert_eq!(first.len(), 1);
    assert!(first[0].key.ends_with("/biz/the-tavern"));
    assert_eq!(first[0].context("city"), Some("Boston, MA"));

    let second = adapter.discover_targets(&known, &filter, 5).await.unwrap();
    let keys: Vec<_> = second.iter().map(|t| t.key.rsplit('/').next().unwrap()).collect();
    assert_eq!(keys, vec!["corner-pub", "night-owl"]);

    let third = adapter.discover_targets(&known, &filter, 5).await.unwrap();
    assert!(third.is_empty(), "The pinned city is exhausted");
}

#[tokio::test]
async fn test_yelp_discovery_skips_pages_covered_by_stored_items() {
    let mock_server = MockServer::start().await;

    // 25 stored Boston businesses cover two pages
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("find_loc", "Boston, MA"))
        .and(query_param("start", "20"))
        .respond_with(ResponseTemplate::new(200).set_body_string(yelp_page(300, &["fresh-spot"])))
        .expect(1)
        .mount(&mock_server)
        .await;
    // 80 stored Boston pizzerias cover eight pages, five of which are re-read
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("find_loc", "Boston, MA"))
        .and(query_param("cflt", "pizza"))
        .and(query_param("start", "30"))
        .respond_with(ResponseTemplate::new(200).set_body_string(yelp_page(300, &["new-pizza"])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut known = KnownItems::new();
    for i in 0..80 {
        known.insert_tagged(
            &format!("pizzeria-{}", i),
            &format!("http://yelp.com/biz/pizzeria-{}", i),
            vec![
                ("city".to_string(), "boston, ma".to_string()),
                ("category".to_string(), "pizza".to_string()),
            ],
        );
    }
    for i in 0..20 {
        known.insert_tagged(
            &format!("elsewhere-{}", i),
            &format!("http://yelp.com/biz/elsewhere-{}", i),
            vec![("city".to_string(), "austin, tx".to_string())],
        );
    }
    assert_eq!(known.count_tagged(&[("city", "Boston, MA")]), 80);

    let client = build_http_client(&test_user_agent(), Duration::from_secs(5)).unwrap();
    let mut adapter = YelpAdapter::new(client, Some(&mock_server.uri())).unwrap();

    let pizza = Filter::parse("city=Boston, MA;category=Pizza").unwrap();
    let found = adapter.discover_targets(&known, &pizza, 1).await.unwrap();
    assert!(found[0].key.ends_with("/biz/new-pizza"));

    let mut boston_only = KnownItems::new();
    for i in 0..25 {
        boston_only.insert_tagged(
            &format!("place-{}", i),
            &format!("http://yelp.com/biz/place-{}", i),
            vec![("city".to_string(), "boston, ma".to_string())],
        );
    }
    let boston = Filter::parse("city=Boston, MA").unwrap();
    let found = adapter.discover_targets(&boston_only, &boston, 1).await.unwrap();
    assert!(found[0].key.ends_with("/biz/fresh-spot"));
}

#[tokio::test]
async fn test_yelp_listing_failure_is_a_discovery_error() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let client = build_http_client(&test_user_agent(), Duration::from_secs(5)).unwrap();
    let mut adapter = YelpAdapter::new(client, Some(&mock_server.uri())).unwrap();

    let result = adapter
        .discover_targets(&KnownItems::new(), &Filter::any(), 5)
        .await;
    assert!(matches!(
        result,
        Err(dragnet::source::DiscoveryError::Status { status: 503, .. })
    ));
}

const INDEED_RESULTS: &str = r#"
    <td id="resultsCol">
      <div id="searchCount">Jobs 1 to 2 of 2</div>
      <div class="row result">
        <a href="/rc/clk?jk=abc" title="iOS Developer Boston, MA">iOS Developer</a>
        <span class="company">Acme</span>
        <span class="location">Boston, MA</span>
        <span class="date">Just posted</span>
      </div>
      <div class="row result">
        <a href="/rc/clk?jk=def" title="iOS Developer">iOS Developer</a>
        <span class="company">Globex</span>
      </div>
    </td>
"#;

#[tokio::test]
async fn test_indeed_jobs_are_stored_without_detail_fetches() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jobs"))
        .and(query_param("l", "Boston, MA"))
        .and(query_param("start", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_string(INDEED_RESULTS))
        .mount(&mock_server)
        .await;

    let client = build_http_client(&test_user_agent(), Duration::from_secs(5)).unwrap();
    let adapter = AdapterRegistry::with_defaults()
        .build(
            "indeed",
            AdapterContext {
                client,
                base_url: Some(mock_server.uri()),
            },
        )
        .unwrap();

    let sink = Arc::new(SqliteSink::in_memory().unwrap());
    let fetcher = Arc::new(TrackingFetcher::default());
    let orchestrator = Orchestrator::new(adapter, sink.clone(), fetcher.clone())
        .with_settings(crate::common::fast_settings(5))
        .with_profile(SourceProfile {
            retry_delay: Duration::from_millis(10),
            ..IndeedAdapter::new(reqwest::Client::new(), None).unwrap().profile()
        });

    let report = orchestrator
        .run_session(
            FilterSet::parse("city=Boston, MA;category=ios").unwrap(),
            Some(10),
            CancellationToken::new(),
            |_| {},
        )
        .await
        .unwrap();

    assert_eq!(report.outcome, SessionOutcome::Exhausted);
    assert_eq!(report.inserted_count, 2);
    assert_eq!(fetcher.call_count(), 0);

    let mut names: Vec<_> = report.inserted.iter().map(|i| i.name.clone()).collect();
    names.sort();
    assert_eq!(names, vec!["iOS Developer at Acme", "iOS Developer at Globex"]);

    let acme = report.inserted.iter().find(|i| i.name.ends_with("Acme")).unwrap();
    assert_eq!(acme.kind, ItemKind::Job);
    assert_eq!(acme.field_str("category"), Some("ios"));
    assert_eq!(acme.field_str("city"), Some("Boston, MA"));
}
