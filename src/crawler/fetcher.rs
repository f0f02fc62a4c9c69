//! Page-fetching collaborator
//!
//! The orchestrator only sees the `Fetcher` trait: open a page, wait until it
//! is ready, release it. `HttpFetcher` is the built-in implementation on top
//! of reqwest; a headless-browser pool would implement the same trait.

use crate::config::UserAgentConfig;
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{redirect::Policy, Client};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

/// Failures reported by page collaborators
///
/// Everything except `Fatal` is transient: it counts against the domain's
/// circuit breaker and the URL stays eligible for retry.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("Timed out after {seconds:.1}s: {url}")]
    Timeout { url: String, seconds: f64 },

    #[error("Connection failed for {url}: {message}")]
    Connection { url: String, message: String },

    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Page not ready: {url}")]
    NotReady { url: String },

    #[error("Extraction failed for {url}: {message}")]
    Extraction { url: String, message: String },

    #[error("Collaborator unavailable: {0}")]
    Fatal(String),
}

impl FetchError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// An opened page
#[derive(Debug, Clone)]
pub struct PageHandle {
    pub id: Uuid,
    pub requested_url: Url,
    /// URL after redirects
    pub final_url: Url,
    pub status_code: u16,
    pub content_type: Option<String>,
    pub body: String,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn navigate(&self, url: &Url) -> Result<PageHandle, FetchError>;

    async fn wait_ready(&self, page: &PageHandle) -> Result<(), FetchError>;

    async fn release(&self, page: &PageHandle);

    /// Drops every open handle; used on cancel and shutdown
    async fn release_all(&self);

    fn active_handles(&self) -> usize;
}

/// Builds the HTTP client shared by page and robots.txt fetches
///
/// User agent format: `Name/Version (+ContactURL; ContactEmail)`.
pub fn build_http_client(
    config: &UserAgentConfig,
    timeout: Duration,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.header_value())
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
        .build()
}

pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
    open: Mutex<HashSet<Uuid>>,
}

impl HttpFetcher {
    /// `timeout` should match the one the client was built with
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            open: Mutex::new(HashSet::new()),
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn navigate(&self, url: &Url) -> Result<PageHandle, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| classify_error(url, e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|e| classify_error(url, e, self.timeout))?;

        let page = PageHandle {
            id: Uuid::new_v4(),
            requested_url: url.clone(),
            final_url,
            status_code: status.as_u16(),
            content_type,
            body,
        };
        self.open.lock().insert(page.id);
        Ok(page)
    }

    async fn wait_ready(&self, page: &PageHandle) -> Result<(), FetchError> {
        // the body is fully read by navigate
        if self.open.lock().contains(&page.id) {
            Ok(())
        } else {
            Err(FetchError::NotReady {
                url: page.requested_url.to_string(),
            })
        }
    }

    async fn release(&self, page: &PageHandle) {
        self.open.lock().remove(&page.id);
    }

    async fn release_all(&self) {
        let mut open = self.open.lock();
        if !open.is_empty() {
            tracing::debug!("releasing {} open pages", open.len());
        }
        open.clear();
    }

    fn active_handles(&self) -> usize {
        self.open.lock().len()
    }
}

fn classify_error(url: &Url, error: reqwest::Error, timeout: Duration) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
            seconds: timeout.as_secs_f64(),
        }
    } else if let Some(status) = error.status() {
        FetchError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        }
    } else {
        FetchError::Connection {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_fetcher() -> HttpFetcher {
        let timeout = Duration::from_secs(5);
        let client = build_http_client(&UserAgentConfig::default(), timeout).unwrap();
        HttpFetcher::new(client, timeout)
    }

    #[tokio::test]
    async fn test_navigate_and_release() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .and(header_exists("user-agent"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html><title>Hi</title></html>")
                    .insert_header("content-type", "text/html"),
            )
            .mount(&server)
            .await;

        let fetcher = create_test_fetcher();
        let url = Url::parse(&format!("{}/page", server.uri())).unwrap();
        let page = fetcher.navigate(&url).await.unwrap();

        assert_eq!(page.status_code, 200);
        assert_eq!(page.content_type.as_deref(), Some("text/html"));
        assert!(page.body.contains("<title>Hi</title>"));
        assert_eq!(fetcher.active_handles(), 1);
        assert!(fetcher.wait_ready(&page).await.is_ok());

        fetcher.release(&page).await;
        assert_eq!(fetcher.active_handles(), 0);
        assert!(fetcher.wait_ready(&page).await.is_err());
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let fetcher = create_test_fetcher();
        let url = Url::parse(&format!("{}/gone", server.uri())).unwrap();
        let err = fetcher.navigate(&url).await.unwrap_err();

        assert!(matches!(err, FetchError::HttpStatus { status: 500, .. }));
        assert!(!err.is_fatal());
        assert_eq!(fetcher.active_handles(), 0);
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let fetcher = create_test_fetcher();
        let url = Url::parse("http://127.0.0.1:1/").unwrap();
        let err = fetcher.navigate(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::Connection { .. }));
    }

    #[tokio::test]
    async fn test_release_all() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let fetcher = create_test_fetcher();
        for i in 0..3 {
            let url = Url::parse(&format!("{}/{}", server.uri(), i)).unwrap();
            fetcher.navigate(&url).await.unwrap();
        }
        assert_eq!(fetcher.active_handles(), 3);

        fetcher.release_all().await;
        assert_eq!(fetcher.active_handles(), 0);
    }
}
