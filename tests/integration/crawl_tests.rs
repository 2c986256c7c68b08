//! Integration tests for crawl sessions
//!
//! These tests drive the orchestrator with spy adapters, sinks and fetchers,
//! and with wiremock servers standing in for detail pages.

use crate::common::{
    fast_settings, spy_profile, test_user_agent, EchoPath, SpyAdapter, SpySink, StalledFetcher,
    TrackingFetcher,
};
use dragnet::crawler::{HttpFetcher, Orchestrator, OrchestratorSettings, Progress, SessionOutcome};
use dragnet::proxy::{InvalidationPolicy, ProxyPool, ProxyRecord};
use dragnet::source::{CrawlTarget, FilterSet};
use dragnet::storage::SqliteSink;
use dragnet::DragnetError;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer};

fn named(url: &str, name: &str) -> CrawlTarget {
    CrawlTarget::new(url).with_name(name)
}

#[tokio::test]
async fn test_limit_is_respected_over_http() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/detail/\d+$"))
        .respond_with(EchoPath)
        .mount(&mock_server)
        .await;

    let temp_dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(SqliteSink::new(&temp_dir.path().join("items.db")).unwrap());
    let fetcher = Arc::new(HttpFetcher::new(&test_user_agent(), Duration::from_secs(5)).unwrap());

    let hits = 2;
    let orchestrator = Orchestrator::new(
        Box::new(SpyAdapter::endless(format!("{}/detail/", mock_server.uri()), 5)),
        sink.clone(),
        fetcher,
    )
    .with_settings(fast_settings(hits));

    let report = orchestrator
        .run_session(FilterSet::default(), Some(3), CancellationToken::new(), |_| {})
        .await
        .unwrap();

    assert_eq!(report.outcome, SessionOutcome::LimitReached);
    assert!(report.inserted_count >= 3);
    assert!(report.inserted_count <= 3 + hits - 1);
    assert_eq!(sink.count_items().unwrap() as usize, report.inserted_count);

    let names: HashSet<_> = report.inserted.iter().map(|i| i.name.clone()).collect();
    assert_eq!(names.len(), report.inserted.len(), "Names must be unique");
}

#[tokio::test]
async fn test_known_targets_are_never_parsed_or_upserted() {
    let adapter = SpyAdapter::scripted(vec![vec![
        named("https://example.com/a", "A"),
        named("https://example.com/b", "B"),
        named("https://example.com/c", "C"),
        named("https://example.com/d", "D"),
        named("https://example.com/e", "E"),
    ]]);
    let parsed = Arc::clone(&adapter.parsed);

    let sink = Arc::new(SpySink::with_known(&[
        ("A", "https://example.com/a"),
        ("Other name", "https://example.com/b"),
    ]));
    let fetcher = Arc::new(TrackingFetcher::default());

    let orchestrator = Orchestrator::new(Box::new(adapter), sink.clone(), fetcher.clone())
        .with_settings(fast_settings(5));

    let report = orchestrator
        .run_session(FilterSet::default(), Some(10), CancellationToken::new(), |_| {})
        .await
        .unwrap();

    assert_eq!(report.outcome, SessionOutcome::Exhausted);
    assert_eq!(report.items_at_start, 2);
    assert_eq!(report.inserted_count, 3);

    let parsed = parsed.lock().unwrap().clone();
    assert_eq!(
        parsed,
        vec![
            "https://example.com/c",
            "https://example.com/d",
            "https://example.com/e"
        ]
    );

    let upserted = sink.upserted_urls();
    assert!(!upserted.contains(&"https://example.com/a".to_string()));
    assert!(!upserted.contains(&"https://example.com/b".to_string()));

    let fetched = fetcher.fetched_urls();
    assert!(!fetched.contains(&"https://example.com/a".to_string()));
    assert!(!fetched.contains(&"https://example.com/b".to_string()));
}

#[tokio::test]
async fn test_all_proxies_invalid_fetches_directly() {
    let mut dead = ProxyRecord::new("10.0.0.1:8080", "test");
    dead.valid = false;
    let mut also_dead = ProxyRecord::new("10.0.0.2:8080", "test");
    also_dead.valid = false;

    let pool = Arc::new(ProxyPool::with_records(
        InvalidationPolicy::default(),
        vec![dead, also_dead],
    ));
    assert!(pool.select_next().is_none());

    let fetcher = Arc::new(TrackingFetcher::default());
    let orchestrator = Orchestrator::new(
        Box::new(SpyAdapter::endless("https://example.com/", 3)),
        Arc::new(SpySink::default()),
        fetcher.clone(),
    )
    .with_settings(fast_settings(3))
    .with_profile(spy_profile(true))
    .with_pool(Arc::clone(&pool), Vec::new());

    let report = orchestrator
        .run_session(FilterSet::default(), Some(3), CancellationToken::new(), |_| {})
        .await
        .unwrap();

    assert_eq!(report.outcome, SessionOutcome::LimitReached);
    assert_eq!(report.inserted_count, 3);
    assert!(fetcher
        .calls
        .lock()
        .unwrap()
        .iter()
        .all(|(_, proxy)| proxy.is_none()));
    assert!(pool.records().iter().all(|r| r.used_count == 0));
}

#[tokio::test]
async fn test_in_flight_fetches_never_exceed_hits_per_loop() {
    let fetcher = Arc::new(TrackingFetcher::with_delay(Duration::from_millis(30)));
    let orchestrator = Orchestrator::new(
        Box::new(SpyAdapter::endless("https://example.com/", 10)),
        Arc::new(SpySink::default()),
        fetcher.clone(),
    )
    .with_settings(fast_settings(3));

    let report = orchestrator
        .run_session(FilterSet::default(), Some(12), CancellationToken::new(), |_| {})
        .await
        .unwrap();

    assert_eq!(report.outcome, SessionOutcome::LimitReached);
    let max = fetcher.max_in_flight.load(Ordering::SeqCst);
    assert!(max <= 3, "Saw {} fetches in flight", max);
    assert!(max >= 2);
}

#[tokio::test]
async fn test_duplicate_names_are_persisted_once() {
    let page = "<html><body><h1>Acme</h1></body></html>";
    let adapter = SpyAdapter::scripted(vec![vec![
        CrawlTarget::new("https://example.com/acme").with_content(page),
        CrawlTarget::new("https://example.com/acme-inc").with_content(page),
        CrawlTarget::new("https://example.com/globex")
            .with_content("<html><body><h1>Globex</h1></body></html>"),
    ]]);

    let sink = Arc::new(SqliteSink::in_memory().unwrap());
    let fetcher = Arc::new(TrackingFetcher::default());
    let orchestrator = Orchestrator::new(Box::new(adapter), sink.clone(), fetcher.clone())
        .with_settings(fast_settings(5));

    let report = orchestrator
        .run_session(FilterSet::default(), Some(10), CancellationToken::new(), |_| {})
        .await
        .unwrap();

    assert_eq!(report.inserted_count, 2);
    assert_eq!(sink.count_items().unwrap(), 2);
    assert_eq!(fetcher.call_count(), 0, "Pre-fetched targets skip the network");
}

#[tokio::test]
async fn test_parse_failure_credits_proxy() {
    let pool = Arc::new(ProxyPool::with_records(
        InvalidationPolicy::default(),
        vec![ProxyRecord::new("10.0.0.1:8080", "test")],
    ));
    let fetcher = Arc::new(TrackingFetcher::blank());

    let orchestrator = Orchestrator::new(
        Box::new(SpyAdapter::scripted(vec![vec![CrawlTarget::new(
            "https://example.com/blocked",
        )]])),
        Arc::new(SpySink::default()),
        fetcher,
    )
    .with_settings(fast_settings(1))
    .with_profile(spy_profile(true))
    .with_pool(Arc::clone(&pool), Vec::new());

    let report = orchestrator
        .run_session(FilterSet::default(), Some(1), CancellationToken::new(), |_| {})
        .await
        .unwrap();

    assert_eq!(report.outcome, SessionOutcome::Exhausted);
    assert_eq!(report.parse_failures, 1);

    let record = pool.get("10.0.0.1:8080").unwrap();
    assert!(record.valid);
    assert_eq!(record.used_count, 1);
    assert_eq!(record.success_count, 1);
}

#[tokio::test]
async fn test_second_session_is_rejected_while_running() {
    let orchestrator = Arc::new(
        Orchestrator::new(
            Box::new(SpyAdapter::endless("https://example.com/", 5)),
            Arc::new(SpySink::default()),
            Arc::new(TrackingFetcher::with_delay(Duration::from_millis(20))),
        )
        .with_settings(fast_settings(2)),
    );

    let first = orchestrator
        .start_scrape_service(FilterSet::default(), Some(1000), |_| {})
        .unwrap();

    let second = orchestrator.start_scrape_service(FilterSet::default(), Some(10), |_| {});
    assert!(matches!(
        second,
        Err(DragnetError::SessionActive { ref source_id }) if source_id == "spy"
    ));

    first.cancel();
    let report = first.join().await.unwrap();
    assert_eq!(report.outcome, SessionOutcome::Cancelled);

    let third = orchestrator
        .start_scrape_service(FilterSet::default(), Some(1), |_| {})
        .unwrap();
    let report = third.join().await.unwrap();
    assert_eq!(report.outcome, SessionOutcome::LimitReached);
}

#[tokio::test]
async fn test_cancel_interrupts_throttle_wait() {
    let orchestrator = Arc::new(
        Orchestrator::new(
            Box::new(SpyAdapter::scripted(Vec::new())),
            Arc::new(SpySink::default()),
            Arc::new(TrackingFetcher::default()),
        )
        .with_settings(OrchestratorSettings {
            max_idle_discoveries: 0,
            ..fast_settings(2)
        })
        .with_profile(dragnet::source::SourceProfile {
            retry_delay: Duration::from_secs(3600),
            ..spy_profile(false)
        }),
    );

    let handle = orchestrator
        .start_scrape_service(FilterSet::default(), Some(5), |_| {})
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!handle.is_finished());

    handle.cancel();
    let report = tokio::time::timeout(Duration::from_secs(5), handle.join())
        .await
        .expect("Cancellation should end the session promptly")
        .unwrap();

    assert_eq!(report.outcome, SessionOutcome::Cancelled);
    assert_eq!(report.inserted_count, 0);
}

#[tokio::test]
async fn test_filters_run_in_sequence() {
    let adapter = SpyAdapter::scripted(vec![
        vec![named("https://example.com/1", "One")],
        Vec::new(),
        vec![named("https://example.com/2", "Two")],
    ]);
    let discoveries = Arc::clone(&adapter.discoveries);

    let orchestrator = Orchestrator::new(
        Box::new(adapter),
        Arc::new(SpySink::default()),
        Arc::new(TrackingFetcher::default()),
    )
    .with_settings(fast_settings(5));

    let filters = FilterSet::parse("city=Boston, MA;category=bars,city=Austin, TX").unwrap();
    assert_eq!(filters.len(), 2);

    let report = orchestrator
        .run_session(filters, Some(2), CancellationToken::new(), |_| {})
        .await
        .unwrap();

    assert_eq!(report.outcome, SessionOutcome::LimitReached);
    assert_eq!(report.inserted_count, 2);
    assert_eq!(discoveries.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_progress_events_bracket_the_session() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink_events = Arc::clone(&events);

    let orchestrator = Orchestrator::new(
        Box::new(SpyAdapter::endless("https://example.com/", 2)),
        Arc::new(SpySink::default()),
        Arc::new(TrackingFetcher::with_delay(Duration::from_millis(40))),
    )
    .with_settings(OrchestratorSettings {
        report_interval: Duration::from_millis(10),
        ..fast_settings(2)
    });

    let report = orchestrator
        .run_session(FilterSet::default(), Some(4), CancellationToken::new(), move |event| {
            let label = match event {
                Progress::Started { .. } => "started",
                Progress::Report(_) => "report",
                Progress::Finished(_) => "finished",
            };
            sink_events.lock().unwrap().push(label);
        })
        .await
        .unwrap();

    let events = events.lock().unwrap().clone();
    assert_eq!(events.first(), Some(&"started"));
    assert_eq!(events.last(), Some(&"finished"));
    assert!(events.contains(&"report"));
    assert_eq!(events.iter().filter(|e| **e == "finished").count(), 1);
    assert_eq!(report.inserted_count, 4);
}

#[tokio::test]
async fn test_stalled_fetch_times_out_and_fails_its_proxy() {
    let pool = Arc::new(ProxyPool::with_records(
        InvalidationPolicy::default(),
        vec![ProxyRecord::new("10.0.0.1:8080", "test")],
    ));
    let fetcher = Arc::new(StalledFetcher::default());

    let orchestrator = Orchestrator::new(
        Box::new(SpyAdapter::scripted(vec![vec![CrawlTarget::new(
            "https://example.com/stuck",
        )]])),
        Arc::new(SpySink::default()),
        fetcher.clone(),
    )
    .with_settings(OrchestratorSettings {
        fetch_timeout: Duration::from_millis(200),
        ..fast_settings(1)
    })
    .with_profile(spy_profile(true))
    .with_pool(Arc::clone(&pool), Vec::new());

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator.run_session(FilterSet::default(), Some(5), CancellationToken::new(), |_| {}),
    )
    .await
    .expect("A stalled fetch must not stall the session")
    .unwrap();

    assert_eq!(report.outcome, SessionOutcome::Exhausted);
    assert_eq!(report.fetch_failures, 1);
    assert_eq!(report.inserted_count, 0);
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

    let record = pool.get("10.0.0.1:8080").unwrap();
    assert_eq!(record.used_count, 1);
    assert_eq!(record.fail_count, 1);
    assert!(!record.valid);
}

#[tokio::test(start_paused = true)]
async fn test_batch_fetches_are_staggered() {
    let fetcher = Arc::new(TrackingFetcher::default());

    let orchestrator = Orchestrator::new(
        Box::new(SpyAdapter::endless("https://example.com/", 3)),
        Arc::new(SpySink::default()),
        fetcher.clone(),
    )
    .with_settings(OrchestratorSettings {
        stagger: Duration::from_secs(1),
        ..fast_settings(3)
    });

    let report = orchestrator
        .run_session(FilterSet::default(), Some(3), CancellationToken::new(), |_| {})
        .await
        .unwrap();

    assert_eq!(report.outcome, SessionOutcome::LimitReached);
    assert_eq!(
        fetcher.issue_offsets(),
        vec![Duration::ZERO, Duration::from_secs(1), Duration::from_secs(2)]
    );
}
