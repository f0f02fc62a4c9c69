//! End-of-pass retry of failed URLs
//!
//! Failed URLs are grouped by domain and retried with exponential backoff
//! seeded from the domain's adaptive delay. A domain whose circuit is open is
//! skipped, and the circuit is checked again before every attempt.

use crate::config::RetryConfig;
use crate::crawler::{CircuitBreaker, RateLimiter};
use crate::url::extract_domain;
use crate::{Result, WardenError};
use async_trait::async_trait;
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Result of re-running one URL through the page pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failed(String),
    /// The domain's circuit opened while the attempt was in flight
    CircuitOpen,
    /// Unrecoverable; the whole retry pass stops
    Fatal(String),
}

#[async_trait]
pub trait RetryAttempt: Send + Sync {
    async fn attempt(&self, url: &str) -> AttemptOutcome;
}

pub struct RetryManager {
    config: RetryConfig,
    circuit_breaker: Arc<CircuitBreaker>,
    rate_limiter: Arc<RateLimiter>,
}

impl RetryManager {
    pub fn new(
        config: RetryConfig,
        circuit_breaker: Arc<CircuitBreaker>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            config,
            circuit_breaker,
            rate_limiter,
        }
    }

    /// Wait before retry number `attempt` (1-based) against `domain`
    pub fn backoff_delay(&self, domain: &str, attempt: u32) -> Duration {
        let base = self.rate_limiter.current_delay(domain).as_secs_f64();
        let jitter = if self.config.max_jitter > 0.0 {
            rand::thread_rng().gen_range(0.0..self.config.max_jitter)
        } else {
            0.0
        };

        let exponent = attempt.min(32) as i32;
        let wait = (base * 2f64.powi(exponent) + jitter).min(self.config.max_backoff);
        Duration::from_secs_f64(wait.max(0.0))
    }

    /// Retries each URL up to `max_retries` times.
    ///
    /// Returns whether each URL eventually succeeded. URLs that were never
    /// attempted (open circuit, malformed) map to `false`.
    pub async fn retry_failed<A>(
        &self,
        urls: &[String],
        max_retries: u32,
        attempt: &A,
    ) -> Result<HashMap<String, bool>>
    where
        A: RetryAttempt + ?Sized,
    {
        let mut results = HashMap::with_capacity(urls.len());
        let mut by_domain: BTreeMap<String, Vec<&String>> = BTreeMap::new();

        for url in urls {
            match Url::parse(url).ok().as_ref().and_then(extract_domain) {
                Some(domain) => by_domain.entry(domain).or_default().push(url),
                None => {
                    tracing::debug!("not retrying malformed url {}", url);
                    results.insert(url.clone(), false);
                }
            }
        }

        let pause = Duration::from_secs_f64(self.config.url_pause.max(0.0));

        for (domain, domain_urls) in by_domain {
            if self.circuit_breaker.is_open(&domain) {
                tracing::info!(
                    "skipping retry of {} urls for {}: circuit open",
                    domain_urls.len(),
                    domain
                );
                for url in domain_urls {
                    results.insert(url.clone(), false);
                }
                continue;
            }

            let count = domain_urls.len();
            for (index, url) in domain_urls.into_iter().enumerate() {
                let recovered = self.retry_one(&domain, url, max_retries, attempt).await?;
                results.insert(url.clone(), recovered);

                if !recovered && index + 1 < count && !pause.is_zero() {
                    tokio::time::sleep(pause).await;
                }
            }
        }

        let recovered = results.values().filter(|ok| **ok).count();
        tracing::info!("retry pass recovered {}/{} urls", recovered, results.len());
        Ok(results)
    }

    async fn retry_one<A>(
        &self,
        domain: &str,
        url: &str,
        max_retries: u32,
        attempt: &A,
    ) -> Result<bool>
    where
        A: RetryAttempt + ?Sized,
    {
        for number in 1..=max_retries {
            if self.circuit_breaker.is_open(domain) {
                tracing::debug!("circuit open for {}, giving up on {}", domain, url);
                return Ok(false);
            }

            let wait = self.backoff_delay(domain, number);
            tracing::debug!(
                "retry {}/{} for {} in {:.2}s",
                number,
                max_retries,
                url,
                wait.as_secs_f64()
            );
            tokio::time::sleep(wait).await;

            if self.circuit_breaker.is_open(domain) {
                return Ok(false);
            }
            self.rate_limiter.record_access(domain);

            match attempt.attempt(url).await {
                AttemptOutcome::Success => {
                    self.circuit_breaker.record_success(domain);
                    tracing::info!("recovered {} on retry {}", url, number);
                    return Ok(true);
                }
                AttemptOutcome::Failed(error) => {
                    self.circuit_breaker.record_failure(domain);
                    tracing::debug!("retry {} of {} failed: {}", number, url, error);
                }
                AttemptOutcome::CircuitOpen => return Ok(false),
                AttemptOutcome::Fatal(message) => return Err(WardenError::Fatal(message)),
            }
        }

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CircuitBreakerConfig, DelayConfig};
    use parking_lot::Mutex;

    /// Fails every URL `failures` times, then succeeds
    struct FlakyAttempt {
        failures: u32,
        calls: Mutex<HashMap<String, u32>>,
    }

    impl FlakyAttempt {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: Mutex::new(HashMap::new()),
            }
        }

        fn calls(&self, url: &str) -> u32 {
            self.calls.lock().get(url).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl RetryAttempt for FlakyAttempt {
        async fn attempt(&self, url: &str) -> AttemptOutcome {
            let mut calls = self.calls.lock();
            let count = calls.entry(url.to_string()).or_insert(0);
            *count += 1;
            if *count > self.failures {
                AttemptOutcome::Success
            } else {
                AttemptOutcome::Failed("boom".to_string())
            }
        }
    }

    struct FatalAttempt;

    #[async_trait]
    impl RetryAttempt for FatalAttempt {
        async fn attempt(&self, _url: &str) -> AttemptOutcome {
            AttemptOutcome::Fatal("browser crashed".to_string())
        }
    }

    fn create_test_manager(threshold: u32) -> RetryManager {
        let delay = DelayConfig {
            default_delay: 0.001,
            min_delay: 0.001,
            ..DelayConfig::default()
        };
        let retry = RetryConfig {
            max_backoff: 0.01,
            max_jitter: 0.0,
            url_pause: 0.0,
            ..RetryConfig::default()
        };
        RetryManager::new(
            retry,
            Arc::new(CircuitBreaker::new(&CircuitBreakerConfig {
                threshold,
                timeout: 60,
            })),
            Arc::new(RateLimiter::new(delay)),
        )
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let manager = RetryManager::new(
            RetryConfig {
                max_jitter: 0.0,
                ..RetryConfig::default()
            },
            Arc::new(CircuitBreaker::new(&CircuitBreakerConfig::default())),
            Arc::new(RateLimiter::new(DelayConfig::default())),
        );

        assert_eq!(manager.backoff_delay("a.com", 1), Duration::from_secs(2));
        assert_eq!(manager.backoff_delay("a.com", 2), Duration::from_secs(4));
        assert_eq!(manager.backoff_delay("a.com", 3), Duration::from_secs(8));
        assert_eq!(manager.backoff_delay("a.com", 4), Duration::from_secs(10));
        assert_eq!(manager.backoff_delay("a.com", 40), Duration::from_secs(10));
    }

    #[test]
    fn test_backoff_jitter_is_bounded() {
        let manager = RetryManager::new(
            RetryConfig::default(),
            Arc::new(CircuitBreaker::new(&CircuitBreakerConfig::default())),
            Arc::new(RateLimiter::new(DelayConfig::default())),
        );

        for _ in 0..20 {
            let wait = manager.backoff_delay("a.com", 1).as_secs_f64();
            assert!((2.0..2.5).contains(&wait));
        }
    }

    #[tokio::test]
    async fn test_recovers_after_failures() {
        let manager = create_test_manager(10);
        let attempt = FlakyAttempt::new(1);
        let urls = vec![
            "https://a.com/1".to_string(),
            "https://b.com/2".to_string(),
        ];

        let results = manager.retry_failed(&urls, 3, &attempt).await.unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.values().all(|ok| *ok));
        assert_eq!(attempt.calls("https://a.com/1"), 2);
        assert_eq!(manager.circuit_breaker.failure_count("a.com"), 0);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let manager = create_test_manager(10);
        let attempt = FlakyAttempt::new(5);
        let urls = vec!["https://a.com/1".to_string()];

        let results = manager.retry_failed(&urls, 2, &attempt).await.unwrap();

        assert_eq!(results["https://a.com/1"], false);
        assert_eq!(attempt.calls("https://a.com/1"), 2);
        assert_eq!(manager.circuit_breaker.failure_count("a.com"), 2);
    }

    #[tokio::test]
    async fn test_open_circuit_skips_domain() {
        let manager = create_test_manager(1);
        manager.circuit_breaker.record_failure("a.com");
        let attempt = FlakyAttempt::new(0);
        let urls = vec![
            "https://a.com/1".to_string(),
            "https://b.com/1".to_string(),
        ];

        let results = manager.retry_failed(&urls, 3, &attempt).await.unwrap();

        assert_eq!(results["https://a.com/1"], false);
        assert_eq!(results["https://b.com/1"], true);
        assert_eq!(attempt.calls("https://a.com/1"), 0);
    }

    #[tokio::test]
    async fn test_circuit_opening_mid_pass_stops_domain() {
        let manager = create_test_manager(2);
        let attempt = FlakyAttempt::new(10);
        let urls = vec![
            "https://a.com/1".to_string(),
            "https://a.com/2".to_string(),
        ];

        let results = manager.retry_failed(&urls, 3, &attempt).await.unwrap();

        assert_eq!(results["https://a.com/1"], false);
        assert_eq!(results["https://a.com/2"], false);
        assert_eq!(attempt.calls("https://a.com/1"), 2);
        assert_eq!(attempt.calls("https://a.com/2"), 0);
    }

    #[tokio::test]
    async fn test_fatal_aborts() {
        let manager = create_test_manager(10);
        let urls = vec!["https://a.com/1".to_string()];

        let err = manager
            .retry_failed(&urls, 3, &FatalAttempt)
            .await
            .unwrap_err();
        assert!(matches!(err, WardenError::Fatal(_)));
    }

    #[tokio::test]
    async fn test_malformed_url_not_attempted() {
        let manager = create_test_manager(10);
        let attempt = FlakyAttempt::new(0);
        let urls = vec!["not a url".to_string()];

        let results = manager.retry_failed(&urls, 3, &attempt).await.unwrap();
        assert_eq!(results["not a url"], false);
        assert_eq!(attempt.calls("not a url"), 0);
    }
}
