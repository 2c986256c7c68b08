//! Integration tests for proxy discovery and pool feedback
//!
//! Proxy-list providers are served by wiremock; sessions use spy adapters
//! and a fetcher that fails through chosen proxies.

use crate::common::{fast_settings, spy_profile, test_user_agent, SpyAdapter, SpySink, TrackingFetcher};
use dragnet::config::parse_config;
use dragnet::crawler::{build_http_client, Orchestrator, OrchestratorSettings, SessionOutcome};
use dragnet::proxy::{
    build_providers, GimmeProxyProvider, HtmlTableProvider, InvalidationPolicy,
    PlainListProvider, ProxyPool, ProxyProvider, ProxyRecord,
};
use dragnet::source::FilterSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PROXY_TABLE: &str = r#"
    <table id="proxylisttable">
      <thead><tr><th>IP Address</th><th>Port</th></tr></thead>
      <tbody>
        <tr><td>10.0.0.1</td><td>8080</td><td>US</td></tr>
        <tr><td>10.0.0.2</td><td>3128</td><td>US</td></tr>
        <tr><td>not an ip</td><td>port</td></tr>
      </tbody>
    </table>
"#;

async fn mount_providers(mock_server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/table"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PROXY_TABLE))
        .mount(mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/list"))
        .respond_with(ResponseTemplate::new(200).set_body_string("10.0.0.3:80\n10.0.0.4:8000\n\n"))
        .mount(mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("10.0.0.9:80")
                .set_delay(Duration::from_secs(10)),
        )
        .mount(mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/gimme"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"ipPort":"10.0.0.5:8000","protocol":"http"}"#),
        )
        .mount(mock_server)
        .await;
}

fn client() -> reqwest::Client {
    build_http_client(&test_user_agent(), Duration::from_secs(30)).unwrap()
}

#[tokio::test]
async fn test_replenish_isolates_failing_providers() {
    let mock_server = MockServer::start().await;
    mount_providers(&mock_server).await;
    let base = mock_server.uri();

    let providers: Vec<Arc<dyn ProxyProvider>> = vec![
        Arc::new(HtmlTableProvider::new("table", format!("{}/table", base), client())),
        Arc::new(PlainListProvider::new("broken", format!("{}/broken", base), client())),
        Arc::new(PlainListProvider::new("slow", format!("{}/slow", base), client())),
        Arc::new(PlainListProvider::new("list", format!("{}/list", base), client())),
    ];

    let pool = ProxyPool::empty(InvalidationPolicy::default());
    let added = pool.replenish(&providers, Duration::from_millis(500)).await;

    assert_eq!(added, 4);
    assert_eq!(pool.valid_count(), 4);
    assert!(pool.get("10.0.0.9:80").is_none());
    assert_eq!(pool.get("10.0.0.1:8080").unwrap().source, "table");
    assert_eq!(pool.get("10.0.0.3:80").unwrap().source, "list");

    let added_again = pool.replenish(&providers, Duration::from_millis(500)).await;
    assert_eq!(added_again, 0, "Known addresses are not added twice");
}

#[tokio::test]
async fn test_providers_built_from_config() {
    let mock_server = MockServer::start().await;
    mount_providers(&mock_server).await;
    let base = mock_server.uri();

    let config = parse_config(&format!(
        r#"
[user-agent]
crawler-name = "TestBot"
crawler-version = "1.0.0"
contact-url = "https://example.com/contact"

[proxy]
provider-timeout-secs = 1

[[proxy.provider]]
name = "table"
kind = "html-table"
url = "{base}/table"

[[proxy.provider]]
name = "gimme"
kind = "gimme"
url = "{base}/gimme"

[output]
database-path = "./unused.db"
"#
    ))
    .unwrap();

    let providers = build_providers(&config.proxy, &client());
    assert_eq!(providers.len(), 2);
    assert_eq!(providers[1].name(), "gimme");

    let pool = ProxyPool::new(InvalidationPolicy::from(&config.proxy));
    let added = pool
        .replenish(&providers, Duration::from_secs(config.proxy.provider_timeout_secs))
        .await;

    assert_eq!(added, 3);
    assert_eq!(pool.len(), 4, "Direct record plus three proxies");
}

#[tokio::test]
async fn test_broken_proxy_is_invalidated_during_session() {
    let pool = Arc::new(ProxyPool::with_records(
        InvalidationPolicy::default(),
        vec![
            ProxyRecord::new("10.0.0.1:8080", "test"),
            ProxyRecord::new("10.0.0.2:8080", "test"),
        ],
    ));
    let fetcher = Arc::new(TrackingFetcher::with_broken_proxies(&["10.0.0.1:8080"]));

    let orchestrator = Orchestrator::new(
        Box::new(SpyAdapter::endless("https://example.com/", 5)),
        Arc::new(SpySink::default()),
        fetcher.clone(),
    )
    .with_settings(fast_settings(2))
    .with_profile(spy_profile(true))
    .with_pool(Arc::clone(&pool), Vec::new());

    let report = orchestrator
        .run_session(FilterSet::default(), Some(4), CancellationToken::new(), |_| {})
        .await
        .unwrap();

    assert_eq!(report.outcome, SessionOutcome::LimitReached);
    assert_eq!(report.fetch_failures, 1);

    let broken = pool.get("10.0.0.1:8080").unwrap();
    assert!(!broken.valid);
    assert_eq!(broken.used_count, 1);

    let working = pool.get("10.0.0.2:8080").unwrap();
    assert!(working.valid);
    assert_eq!(working.success_count as usize, report.inserted_count);

    // Only the invalidated proxy is handed back to the fetcher
    assert_eq!(*fetcher.released.lock().unwrap(), vec!["10.0.0.1:8080".to_string()]);

    let stats = report.pool.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.valid, 1);
    assert_eq!(stats.expired, 0);
}

#[tokio::test]
async fn test_session_replenishes_below_low_water_mark() {
    let mock_server = MockServer::start().await;
    mount_providers(&mock_server).await;

    let pool = Arc::new(ProxyPool::new(InvalidationPolicy::default()));
    let providers: Vec<Arc<dyn ProxyProvider>> = vec![Arc::new(PlainListProvider::new(
        "list",
        format!("{}/list", mock_server.uri()),
        client(),
    ))];

    let orchestrator = Orchestrator::new(
        Box::new(SpyAdapter::endless("https://example.com/", 2)),
        Arc::new(SpySink::default()),
        Arc::new(TrackingFetcher::default()),
    )
    .with_settings(OrchestratorSettings {
        low_water_mark: 5,
        provider_timeout: Duration::from_secs(2),
        ..fast_settings(2)
    })
    .with_profile(spy_profile(true))
    .with_pool(Arc::clone(&pool), providers);

    orchestrator
        .run_session(FilterSet::default(), Some(2), CancellationToken::new(), |_| {})
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while (pool.len() < 3 || pool.is_replenishing()) && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(pool.len(), 3);
    assert!(pool.get("10.0.0.4:8000").is_some());
}

#[tokio::test]
async fn test_trickle_feeds_pool_until_cancelled() {
    let mock_server = MockServer::start().await;
    mount_providers(&mock_server).await;

    let pool = Arc::new(ProxyPool::empty(InvalidationPolicy::default()));
    let provider = Arc::new(GimmeProxyProvider::new(
        "gimme",
        format!("{}/gimme", mock_server.uri()),
        client(),
    ));

    let cancel = CancellationToken::new();
    let handle = pool.spawn_trickle(provider, 20, cancel.clone());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while pool.is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(pool.len(), 1);
    assert_eq!(pool.get("10.0.0.5:8000").unwrap().source, "gimme");

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("Trickle task should stop once cancelled")
        .unwrap();
}
