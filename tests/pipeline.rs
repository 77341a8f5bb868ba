mod common;

use axum::routing::get;
use axum::Router;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use common::{fast_transport, spawn_fixture, FEED_XML};
use osintwatch::alerts::{AlertDispatcher, AlertSink};
use osintwatch::enrich::NoopEnricher;
use osintwatch::evidence::EvidenceStore;
use osintwatch::ingest::Pipeline;
use osintwatch::matcher::{content_hash, Watchlist};
use osintwatch::models::AlertEvent;
use osintwatch::scheduler::JobRunner;
use osintwatch::source_onion::{OnionSource, TorControl};
use osintwatch::source_feed::FeedSource;
use osintwatch::source_page::PageSource;
use osintwatch::sources::Source;

const PAGE_HTML: &str = "<html><head><title>Status</title></head>\
    <body><h1>Incident</h1><p>Exploit observed against CVE-2024-3094</p></body></html>";

async fn fixture() -> String {
    let router = Router::new()
        .route(
            "/feed.xml",
            get(|| async { ([("content-type", "application/rss+xml")], FEED_XML) }),
        )
        .route("/page", get(|| async { axum::response::Html(PAGE_HTML) }))
        .route("/broken", get(|| async { "definitely not xml" }));
    spawn_fixture(router).await
}

#[derive(Default)]
struct Recorder {
    events: std::sync::Mutex<Vec<AlertEvent>>,
}

#[async_trait::async_trait]
impl AlertSink for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    async fn send(&self, event: &AlertEvent) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

async fn pipeline(tmp: &TempDir, recorder: Arc<Recorder>) -> Pipeline {
    let store = EvidenceStore::open(&tmp.path().join("evidence.sqlite"))
        .await
        .unwrap();
    Pipeline::new(
        store,
        Watchlist::new(
            &["ransomware".to_string(), "exploit".to_string()],
            &["CVE-\\d{4}-\\d+".to_string()],
        ),
        280,
        Arc::new(NoopEnricher),
        AlertDispatcher::new(vec![recorder as Arc<dyn AlertSink>]),
    )
}

#[tokio::test]
async fn test_feed_refetch_stores_nothing_new() {
    let base = fixture().await;
    let tmp = TempDir::new().unwrap();
    let recorder = Arc::new(Recorder::default());
    let p = pipeline(&tmp, recorder.clone()).await;
    let feed = FeedSource::new("advisories", &format!("{}/feed.xml", base), fast_transport(0));

    let first = p.process_source(&feed).await.unwrap();
    assert_eq!(first.items, 3);
    assert_eq!(first.inserted, 2, "duplicate entry within one pass is stored once");

    let second = p.process_source(&feed).await.unwrap();
    assert_eq!(second.items, 3);
    assert_eq!(second.inserted, 0);

    assert_eq!(p.store().count().await.unwrap(), 2);
    assert!(p.store().verify_chain().await.unwrap().is_intact());

    let text = "Operators use 203.0.113.7 for staging";
    let history = p
        .store()
        .history("advisories", "https://advisories.example/post-1", 10)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content_hash, content_hash(text));
}

#[tokio::test]
async fn test_hits_are_alerted_with_indicators() {
    let base = fixture().await;
    let tmp = TempDir::new().unwrap();
    let recorder = Arc::new(Recorder::default());
    let p = pipeline(&tmp, recorder.clone()).await;
    let feed = FeedSource::new("advisories", &format!("{}/feed.xml", base), fast_transport(0));

    let summary = p.process_source(&feed).await.unwrap();
    // Both copies of post-1 carry an IOC; post-2 matches nothing.
    assert_eq!(summary.hits, 2);
    assert_eq!(summary.alerts_delivered, 2);

    let events = recorder.events.lock().unwrap();
    assert_eq!(events[0].origin, "https://advisories.example/post-1");
    assert!(events[0].keywords.is_empty());
    let json = serde_json::to_value(&events[0]).unwrap();
    assert_eq!(json["iocs"]["ipv4"], serde_json::json!(["203.0.113.7"]));
}

#[tokio::test]
async fn test_page_source_single_item() {
    let base = fixture().await;
    let tmp = TempDir::new().unwrap();
    let recorder = Arc::new(Recorder::default());
    let p = pipeline(&tmp, recorder.clone()).await;
    let url = format!("{}/page", base);
    let page = PageSource::new("status", &url, fast_transport(0));

    let summary = p.process_source(&page).await.unwrap();
    assert_eq!((summary.items, summary.inserted, summary.hits), (1, 1, 1));

    let events = recorder.events.lock().unwrap();
    assert_eq!(events[0].origin, url);
    assert_eq!(events[0].title.as_deref(), Some("Status"));
    assert_eq!(events[0].keywords, vec!["exploit"]);
    assert_eq!(events[0].regexes, vec!["CVE-\\d{4}-\\d+"]);
}

#[tokio::test]
async fn test_parse_failure_aborts_pass() {
    let base = fixture().await;
    let tmp = TempDir::new().unwrap();
    let p = pipeline(&tmp, Arc::new(Recorder::default())).await;
    let feed = FeedSource::new("broken", &format!("{}/broken", base), fast_transport(0));

    assert!(p.process_source(&feed).await.is_err());
    assert_eq!(p.store().count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_failing_source_does_not_stop_other_jobs() {
    let base = fixture().await;
    let tmp = TempDir::new().unwrap();
    let p = Arc::new(pipeline(&tmp, Arc::new(Recorder::default())).await);
    let runner = JobRunner::new();

    let good = Arc::new(FeedSource::new(
        "advisories",
        &format!("{}/feed.xml", base),
        fast_transport(0),
    ));
    let bad = Arc::new(FeedSource::new("broken", &format!("{}/broken", base), fast_transport(0)));
    let good_runs = Arc::new(AtomicUsize::new(0));
    let bad_runs = Arc::new(AtomicUsize::new(0));

    {
        let (p, source, runs) = (p.clone(), good.clone(), good_runs.clone());
        runner
            .add_interval_job("rss:advisories", Duration::from_millis(100), move || {
                let (p, source, runs) = (p.clone(), source.clone(), runs.clone());
                async move {
                    p.process_source(&*source).await?;
                    runs.fetch_add(1, Ordering::SeqCst);
                    anyhow::Ok(())
                }
            })
            .unwrap();
    }
    {
        let (p, source, runs) = (p.clone(), bad.clone(), bad_runs.clone());
        runner
            .add_interval_job("rss:broken", Duration::from_millis(100), move || {
                let (p, source, runs) = (p.clone(), source.clone(), runs.clone());
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    p.process_source(&*source).await?;
                    anyhow::Ok(())
                }
            })
            .unwrap();
    }

    tokio::time::sleep(Duration::from_millis(750)).await;
    runner.shutdown();

    assert!(good_runs.load(Ordering::SeqCst) >= 3);
    assert!(bad_runs.load(Ordering::SeqCst) >= 3);
    assert_eq!(p.store().count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_onion_fetch_proceeds_after_failed_renewal() {
    // The fixture plays the proxy: requests arrive in absolute form and are
    // answered regardless of path.
    let hosts = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
    let seen = hosts.clone();
    let proxy = spawn_fixture(Router::new().fallback(
        move |headers: axum::http::HeaderMap| {
            let seen = seen.clone();
            async move {
                if let Some(host) = headers.get("host").and_then(|h| h.to_str().ok()) {
                    seen.lock().unwrap().push(host.to_string());
                }
                axum::response::Html(
                    "<html><head><title>Leak</title></head><body><p>dump posted</p></body></html>",
                )
            }
        },
    ))
    .await;

    // Nothing listens on port 1, so renewal fails before the fetch.
    let control = TorControl::new(("127.0.0.1", 1), None, Duration::ZERO);
    let source = OnionSource::new(
        "leak",
        "http://abcdefabcdef.onion/",
        &proxy,
        Some(control),
        fast_transport(0),
    );

    let items = source.fetch().await.unwrap();
    assert_eq!(items.len(), 1);
    let item = &items[0];
    assert_eq!(item.origin, "http://abcdefabcdef.onion/");
    assert_eq!(item.title.as_deref(), Some("Leak"));
    assert!(item.text.contains("dump posted"));
    assert_eq!(item.extra["type"], "onion");
    assert_eq!(item.extra["proxy"], serde_json::json!(proxy));
    assert_eq!(*hosts.lock().unwrap(), vec!["abcdefabcdef.onion".to_string()]);
}
