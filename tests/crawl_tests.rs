//! Integration tests for the coordinator
//!
//! The HTTP tests run the real fetcher, extractor and robots.txt source
//! against wiremock servers. The lifecycle tests use in-process stub
//! collaborators so timing stays under the test's control.

use async_trait::async_trait;
use crawl_warden::config::Config;
use crawl_warden::crawler::{
    build_http_client, Collaborators, Coordinator, CrawlParts, FetchError, Fetcher, HtmlExtractor,
    HttpFetcher, PageHandle,
};
use crawl_warden::notify::{ChannelNotifier, NotificationKind, Notifier, TracingNotifier};
use crawl_warden::robots::{HttpRobotsSource, PolitenessCache};
use crawl_warden::TaskStatus;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a configuration tuned for fast tests
fn create_test_config(seeds: Vec<String>) -> Config {
    let mut config = Config::default();
    config.crawler.seeds = seeds;
    config.user_agent.crawler_name = "TestBot".to_string();
    config.delay.default_delay = 0.01;
    config.delay.min_delay = 0.01;
    config.retry.enabled = false;
    config.retry.max_backoff = 0.05;
    config.retry.max_jitter = 0.0;
    config.retry.url_pause = 0.0;
    config
}

fn html_page(title: &str, body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_string(format!(
            "<html><head><title>{}</title></head><body>{}</body></html>",
            title, body
        ))
        .insert_header("content-type", "text/html")
}

/// Wires the HTTP collaborators around `config`
fn create_http_coordinator(config: Config, with_robots: bool) -> Arc<Coordinator> {
    let timeout = config.orchestration.navigation_timeout();
    let client = build_http_client(&config.user_agent, timeout).unwrap();
    let politeness = with_robots.then(|| {
        Arc::new(PolitenessCache::new(
            Arc::new(HttpRobotsSource::new(client.clone())),
            &config.politeness,
            config.user_agent.crawler_name.clone(),
        ))
    });
    let parts = CrawlParts::from_config(&config, None, "http-session", politeness).unwrap();

    Arc::new(Coordinator::new(
        config,
        "http-task",
        parts,
        Collaborators {
            fetcher: Arc::new(HttpFetcher::new(client, timeout)),
            extractor: Arc::new(HtmlExtractor),
            notifier: Arc::new(TracingNotifier),
            sessions: None,
        },
    ))
}

#[tokio::test]
async fn test_full_crawl_respects_robots() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("User-agent: *\nDisallow: /private\n"),
        )
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_page(
            "Home",
            &format!(
                r#"<a href="{0}/page1">1</a> <a href="{0}/page2">2</a> <a href="{0}/private">p</a>"#,
                base_url
            ),
        ))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/page1"))
        .respond_with(html_page("Page 1", r#"<a href="/">home</a>"#))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/page2"))
        .respond_with(html_page("Page 2", "content"))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/private"))
        .respond_with(html_page("Secret", ""))
        .expect(0)
        .mount(&mock_server)
        .await;

    let config = create_test_config(vec![format!("{}/", base_url)]);
    let coordinator = create_http_coordinator(config, true);

    let result = coordinator.run().await.unwrap();

    assert!(result.success);
    assert_eq!(result.status, TaskStatus::Completed);
    assert_eq!(result.urls_successful, 3);
    // the disallowed page counts as processed but is never retried
    assert_eq!(result.urls_processed, 4);
    assert!(result.failed_urls.is_empty());
    assert_eq!(result.data_extracted, 3);
    assert!(coordinator
        .parts()
        .frontier
        .is_visited(&format!("{}/private", base_url)));
}

#[tokio::test]
async fn test_server_errors_open_circuit() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&mock_server)
        .await;

    let seeds = (1..=4).map(|i| format!("{}/item/{}", base_url, i)).collect();
    let mut config = create_test_config(seeds);
    config.circuit_breaker.threshold = 2;
    config.orchestration.max_concurrent_pages = 1;
    let coordinator = create_http_coordinator(config, false);

    let result = coordinator.run().await.unwrap();

    assert!(result.success);
    assert_eq!(result.urls_processed, 4);
    // two real 500s; the other two never reached the server
    assert_eq!(result.urls_failed, 2);
    assert_eq!(result.urls_circuit_skipped, 2);
    assert_eq!(result.urls_successful, 0);
    assert_eq!(result.failed_urls.len(), 4);

    let domain = Url::parse(&base_url)
        .ok()
        .as_ref()
        .and_then(crawl_warden::extract_domain)
        .unwrap();
    assert!(coordinator.parts().circuit_breaker.is_open(&domain));
}

#[tokio::test]
async fn test_retry_pass_recovers_transient_failure() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(html_page("Back", "ok"))
        .mount(&mock_server)
        .await;

    let mut config = create_test_config(vec![format!("{}/flaky", base_url)]);
    config.retry.enabled = true;
    config.retry.max_retries = 2;
    let coordinator = create_http_coordinator(config, false);

    let result = coordinator.run().await.unwrap();

    assert!(result.success);
    assert_eq!(result.urls_recovered, 1);
    assert_eq!(result.urls_successful, 1);
    assert_eq!(result.urls_failed, 0);
    assert!(result.failed_urls.is_empty());
}

/// Serves empty pages after a fixed delay and records what it visited
struct SlowFetcher {
    delay: Duration,
    visited: Mutex<Vec<String>>,
    released_all: AtomicBool,
}

impl SlowFetcher {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            visited: Mutex::new(Vec::new()),
            released_all: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Fetcher for SlowFetcher {
    async fn navigate(&self, url: &Url) -> Result<PageHandle, FetchError> {
        tokio::time::sleep(self.delay).await;
        if url.path() == "/fatal" {
            return Err(FetchError::Fatal("browser process exited".to_string()));
        }
        self.visited.lock().push(url.to_string());
        Ok(PageHandle {
            id: uuid::Uuid::new_v4(),
            requested_url: url.clone(),
            final_url: url.clone(),
            status_code: 200,
            content_type: Some("text/html".to_string()),
            body: "<html><body></body></html>".to_string(),
        })
    }

    async fn wait_ready(&self, _page: &PageHandle) -> Result<(), FetchError> {
        Ok(())
    }

    async fn release(&self, _page: &PageHandle) {}

    async fn release_all(&self) {
        self.released_all.store(true, Ordering::SeqCst);
    }

    fn active_handles(&self) -> usize {
        0
    }
}

fn create_stub_coordinator(
    config: Config,
    fetcher: Arc<SlowFetcher>,
    notifier: Arc<dyn Notifier>,
) -> Arc<Coordinator> {
    let parts = CrawlParts::from_config(&config, None, "stub-session", None).unwrap();
    Arc::new(Coordinator::new(
        config,
        "stub-task",
        parts,
        Collaborators {
            fetcher,
            extractor: Arc::new(HtmlExtractor),
            notifier,
            sessions: None,
        },
    ))
}

/// Distinct hosts so no seed waits on another's delay
fn distinct_host_seeds(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("http://site{}.test/", i)).collect()
}

async fn wait_for_status(coordinator: &Coordinator, status: TaskStatus) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while coordinator.progress().status != status {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_pause_lets_in_flight_finish_then_resumes() {
    let mut config = create_test_config(distinct_host_seeds(10));
    config.orchestration.max_concurrent_pages = 1;
    let fetcher = Arc::new(SlowFetcher::new(Duration::from_millis(30)));
    let (notifier, mut notifications) = ChannelNotifier::new();
    let coordinator = create_stub_coordinator(config, fetcher.clone(), Arc::new(notifier));

    let running = Arc::clone(&coordinator);
    let handle = tokio::spawn(async move { running.run().await });

    tokio::time::sleep(Duration::from_millis(40)).await;
    coordinator.pause();
    wait_for_status(&coordinator, TaskStatus::Paused).await;

    let processed_at_pause = coordinator.progress().urls_processed;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(coordinator.progress().urls_processed, processed_at_pause);
    assert!(processed_at_pause < 10);

    coordinator.resume();
    let result = handle.await.unwrap().unwrap();

    assert_eq!(result.status, TaskStatus::Completed);
    assert_eq!(result.urls_processed, 10);
    assert_eq!(fetcher.visited.lock().len(), 10);

    let mut kinds = Vec::new();
    while let Ok(notification) = notifications.try_recv() {
        kinds.push(notification.kind);
    }
    assert_eq!(kinds.first(), Some(&NotificationKind::TaskStarted));
    assert!(kinds.contains(&NotificationKind::TaskPaused));
    assert_eq!(kinds.last(), Some(&NotificationKind::TaskCompleted));
}

#[tokio::test]
async fn test_cancel_aborts_in_flight_pages() {
    let config = create_test_config(distinct_host_seeds(3));
    let fetcher = Arc::new(SlowFetcher::new(Duration::from_secs(30)));
    let coordinator =
        create_stub_coordinator(config, fetcher.clone(), Arc::new(TracingNotifier));

    let running = Arc::clone(&coordinator);
    let handle = tokio::spawn(async move { running.run().await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    coordinator.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.status, TaskStatus::Cancelled);
    assert_eq!(result.urls_processed, 0);
    assert!(fetcher.released_all.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_fatal_error_ends_session() {
    let mut config = create_test_config(vec!["http://broken.test/fatal".to_string()]);
    config.retry.enabled = true;
    let fetcher = Arc::new(SlowFetcher::new(Duration::from_millis(1)));
    let coordinator = create_stub_coordinator(config, fetcher, Arc::new(TracingNotifier));

    let result = coordinator.run().await.unwrap();

    assert!(!result.success);
    assert_eq!(result.status, TaskStatus::Failed);
    assert!(result
        .error_message
        .as_deref()
        .unwrap_or_default()
        .contains("browser process exited"));
}

/// First visit of every URL fails to connect; later visits wait `retry_delay`
/// and then succeed
struct FailOnceFetcher {
    retry_delay: Duration,
    calls: AtomicUsize,
    seen: Mutex<HashMap<String, u32>>,
    released_all: AtomicBool,
}

impl FailOnceFetcher {
    fn new(retry_delay: Duration) -> Self {
        Self {
            retry_delay,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(HashMap::new()),
            released_all: AtomicBool::new(false),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for FailOnceFetcher {
    async fn navigate(&self, url: &Url) -> Result<PageHandle, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let visits = {
            let mut seen = self.seen.lock();
            let count = seen.entry(url.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        if visits == 1 {
            return Err(FetchError::Connection {
                url: url.to_string(),
                message: "connection reset".to_string(),
            });
        }

        tokio::time::sleep(self.retry_delay).await;
        Ok(PageHandle {
            id: uuid::Uuid::new_v4(),
            requested_url: url.clone(),
            final_url: url.clone(),
            status_code: 200,
            content_type: Some("text/html".to_string()),
            body: "<html><body></body></html>".to_string(),
        })
    }

    async fn wait_ready(&self, _page: &PageHandle) -> Result<(), FetchError> {
        Ok(())
    }

    async fn release(&self, _page: &PageHandle) {}

    async fn release_all(&self) {
        self.released_all.store(true, Ordering::SeqCst);
    }

    fn active_handles(&self) -> usize {
        0
    }
}

fn create_retry_coordinator(
    config: Config,
    fetcher: Arc<FailOnceFetcher>,
    notifier: Arc<dyn Notifier>,
) -> Arc<Coordinator> {
    let parts = CrawlParts::from_config(&config, None, "retry-session", None).unwrap();
    Arc::new(Coordinator::new(
        config,
        "retry-task",
        parts,
        Collaborators {
            fetcher,
            extractor: Arc::new(HtmlExtractor),
            notifier,
            sessions: None,
        },
    ))
}

async fn wait_for_calls(fetcher: &FailOnceFetcher, calls: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while fetcher.calls() < calls {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_cancel_during_retry_releases_pages() {
    let mut config = create_test_config(vec!["http://retry.test/slow".to_string()]);
    config.retry.enabled = true;
    config.retry.max_retries = 2;
    let fetcher = Arc::new(FailOnceFetcher::new(Duration::from_secs(30)));
    let coordinator =
        create_retry_coordinator(config, fetcher.clone(), Arc::new(TracingNotifier));

    let running = Arc::clone(&coordinator);
    let handle = tokio::spawn(async move { running.run().await });

    // the second call is the retry, which hangs
    wait_for_calls(&fetcher, 2).await;
    assert!(!fetcher.released_all.load(Ordering::SeqCst));
    coordinator.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(result.status, TaskStatus::Cancelled);
    assert_eq!(result.urls_recovered, 0);
    assert!(fetcher.released_all.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_pause_holds_retry_pass() {
    let mut config = create_test_config(vec![
        "http://retry.test/a".to_string(),
        "http://retry.test/b".to_string(),
    ]);
    config.retry.enabled = true;
    config.retry.max_retries = 2;
    let fetcher = Arc::new(FailOnceFetcher::new(Duration::from_millis(100)));
    let (notifier, mut notifications) = ChannelNotifier::new();
    let coordinator = create_retry_coordinator(config, fetcher.clone(), Arc::new(notifier));

    let running = Arc::clone(&coordinator);
    let handle = tokio::spawn(async move { running.run().await });

    // two failed first visits, then the first retry is in flight
    wait_for_calls(&fetcher, 3).await;
    coordinator.pause();
    wait_for_status(&coordinator, TaskStatus::Paused).await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(fetcher.calls(), 3);
    assert_eq!(coordinator.progress().status, TaskStatus::Paused);

    coordinator.resume();
    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(result.status, TaskStatus::Completed);
    assert_eq!(result.urls_recovered, 2);
    assert_eq!(result.urls_failed, 0);
    assert_eq!(fetcher.calls(), 4);

    let mut kinds = Vec::new();
    while let Ok(notification) = notifications.try_recv() {
        kinds.push(notification.kind);
    }
    assert!(kinds.contains(&NotificationKind::TaskPaused));
    assert_eq!(kinds.last(), Some(&NotificationKind::TaskCompleted));
}
