use crate::config::types::{
    CircuitBreakerConfig, Config, CrawlerConfig, DelayConfig, HealthConfig, OrchestrationConfig,
    OutputConfig, RetryConfig, SessionConfig, UserAgentConfig,
};
use crate::ConfigError;
use regex::Regex;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_delay_config(&config.delay)?;
    validate_circuit_breaker_config(&config.circuit_breaker)?;
    validate_retry_config(&config.retry)?;
    validate_orchestration_config(&config.orchestration)?;
    validate_session_config(&config.session)?;
    validate_health_config(&config.health)?;
    validate_output_config(&config.output)?;
    Ok(())
}

fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.max_urls_per_domain < 1 {
        return Err(ConfigError::Validation(format!(
            "max_urls_per_domain must be >= 1, got {}",
            config.max_urls_per_domain
        )));
    }

    for pattern in config
        .allowed_domains
        .iter()
        .chain(config.blocked_domains.iter())
    {
        validate_domain_pattern(pattern)?;
    }

    for pattern in &config.ignore_patterns {
        Regex::new(pattern).map_err(|e| {
            ConfigError::InvalidPattern(format!("Invalid ignore pattern '{}': {}", pattern, e))
        })?;
    }

    for seed in &config.seeds {
        let url = Url::parse(seed)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::Validation(format!(
                "Seed URL '{}' must use http or https",
                seed
            )));
        }
    }

    Ok(())
}

fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)
}

fn validate_delay_config(config: &DelayConfig) -> Result<(), ConfigError> {
    require_finite("default_delay", config.default_delay)?;
    require_finite("min_delay", config.min_delay)?;
    require_finite("max_delay", config.max_delay)?;
    require_finite("high_latency_threshold", config.high_latency_threshold)?;
    require_finite("low_latency_threshold", config.low_latency_threshold)?;
    require_finite("growth_factor", config.growth_factor)?;
    require_finite("shrink_factor", config.shrink_factor)?;

    if config.min_delay <= 0.0 {
        return Err(ConfigError::Validation(format!(
            "min_delay must be > 0, got {}",
            config.min_delay
        )));
    }

    if config.default_delay < config.min_delay || config.default_delay > config.max_delay {
        return Err(ConfigError::Validation(format!(
            "default_delay must lie within [{}, {}], got {}",
            config.min_delay, config.max_delay, config.default_delay
        )));
    }

    if config.growth_factor <= 1.0 {
        return Err(ConfigError::Validation(format!(
            "growth_factor must be > 1, got {}",
            config.growth_factor
        )));
    }

    if config.shrink_factor <= 0.0 || config.shrink_factor >= 1.0 {
        return Err(ConfigError::Validation(format!(
            "shrink_factor must be in (0, 1), got {}",
            config.shrink_factor
        )));
    }

    if config.low_latency_threshold >= config.high_latency_threshold {
        return Err(ConfigError::Validation(format!(
            "low_latency_threshold ({}) must be below high_latency_threshold ({})",
            config.low_latency_threshold, config.high_latency_threshold
        )));
    }

    Ok(())
}

fn validate_circuit_breaker_config(config: &CircuitBreakerConfig) -> Result<(), ConfigError> {
    if config.threshold < 1 {
        return Err(ConfigError::Validation(
            "circuit breaker threshold must be >= 1".to_string(),
        ));
    }

    if config.timeout == 0 {
        return Err(ConfigError::Validation(
            "circuit breaker timeout must be > 0".to_string(),
        ));
    }

    Ok(())
}

fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_retries > 10 {
        return Err(ConfigError::Validation(format!(
            "max_retries must be <= 10, got {}",
            config.max_retries
        )));
    }

    require_finite("max_backoff", config.max_backoff)?;
    require_finite("max_jitter", config.max_jitter)?;
    require_finite("url_pause", config.url_pause)?;

    if config.max_backoff <= 0.0 || config.max_jitter < 0.0 || config.url_pause < 0.0 {
        return Err(ConfigError::Validation(
            "max_backoff must be > 0; max_jitter and url_pause must be >= 0".to_string(),
        ));
    }

    Ok(())
}

fn validate_orchestration_config(config: &OrchestrationConfig) -> Result<(), ConfigError> {
    if config.max_concurrent_pages < 1 || config.max_concurrent_pages > 100 {
        return Err(ConfigError::Validation(format!(
            "max_concurrent_pages must be between 1 and 100, got {}",
            config.max_concurrent_pages
        )));
    }

    require_finite("navigation_timeout", config.navigation_timeout)?;
    require_finite("extraction_timeout", config.extraction_timeout)?;

    if config.navigation_timeout <= 0.0 || config.extraction_timeout <= 0.0 {
        return Err(ConfigError::Validation(
            "navigation and extraction timeouts must be > 0".to_string(),
        ));
    }

    if config.progress_report_interval == 0 {
        return Err(ConfigError::Validation(
            "progress_report_interval must be > 0".to_string(),
        ));
    }

    Ok(())
}

fn validate_session_config(config: &SessionConfig) -> Result<(), ConfigError> {
    if config.checkpoint_interval == 0 {
        return Err(ConfigError::Validation(
            "checkpoint_interval must be > 0".to_string(),
        ));
    }

    if config.restart_after > config.max_session_duration {
        return Err(ConfigError::Validation(format!(
            "restart_after ({}) cannot exceed max_session_duration ({})",
            config.restart_after, config.max_session_duration
        )));
    }

    Ok(())
}

fn validate_health_config(config: &HealthConfig) -> Result<(), ConfigError> {
    require_finite("max_memory_mb", config.max_memory_mb)?;
    require_finite("throttle_below", config.throttle_below)?;
    require_finite("recover_above", config.recover_above)?;

    if config.check_interval == 0 || config.max_memory_mb <= 0.0 {
        return Err(ConfigError::Validation(
            "health check_interval and max_memory_mb must be > 0".to_string(),
        ));
    }

    if config.max_active_pages == 0 || config.failure_ceiling == 0 {
        return Err(ConfigError::Validation(
            "health max_active_pages and failure_ceiling must be > 0".to_string(),
        ));
    }

    if config.throttle_below > config.recover_above {
        return Err(ConfigError::Validation(format!(
            "throttle_below ({}) cannot exceed recover_above ({})",
            config.throttle_below, config.recover_above
        )));
    }

    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Rejects `inf` and `nan`, which TOML accepts as float literals
fn require_finite(name: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() {
        return Err(ConfigError::Validation(format!(
            "{} must be a finite number, got {}",
            name, value
        )));
    }
    Ok(())
}

/// Validates a domain pattern (supports `*.` wildcards)
fn validate_domain_pattern(pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain pattern cannot be empty".to_string(),
        ));
    }

    let domain = pattern.strip_prefix("*.").unwrap_or(pattern);

    if domain.is_empty()
        || !domain
            .chars()
            .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' contains invalid characters",
            pattern
        )));
    }

    if domain.starts_with(['.', '-']) || domain.ends_with(['.', '-']) || domain.contains("..") {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' is malformed",
            pattern
        )));
    }

    Ok(())
}

fn validate_email(email: &str) -> Result<(), ConfigError> {
    let Some((local, domain)) = email.split_once('@') else {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    };

    if local.is_empty() || domain.is_empty() || domain.contains('@') || !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_domain_pattern() {
        assert!(validate_domain_pattern("example.com").is_ok());
        assert!(validate_domain_pattern("*.example.com").is_ok());
        assert!(validate_domain_pattern("localhost").is_ok());

        assert!(validate_domain_pattern("").is_err());
        assert!(validate_domain_pattern("*.").is_err());
        assert!(validate_domain_pattern(".example.com").is_err());
        assert!(validate_domain_pattern("example..com").is_err());
        assert!(validate_domain_pattern("exa mple.com").is_err());
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("user@example.com").is_ok());

        assert!(validate_email("").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("user@").is_err());
        assert!(validate_email("user@domain").is_err());
        assert!(validate_email("a@b@c.com").is_err());
    }

    #[test]
    fn test_delay_bounds() {
        let mut config = Config::default();
        config.delay.default_delay = 20.0;
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.delay.shrink_factor = 1.2;
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.delay.low_latency_threshold = 6.0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_bad_ignore_pattern() {
        let mut config = Config::default();
        config.crawler.ignore_patterns = vec!["(unclosed".to_string()];
        assert!(matches!(
            validate(&config),
            Err(ConfigError::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_seed_scheme() {
        let mut config = Config::default();
        config.crawler.seeds = vec!["ftp://example.com/".to_string()];
        assert!(validate(&config).is_err());

        config.crawler.seeds = vec!["http://localhost:8080/".to_string()];
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_non_finite_delays_rejected() {
        let mut config = Config::default();
        config.delay.max_delay = f64::INFINITY;
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));

        let mut config = Config::default();
        config.delay.high_latency_threshold = f64::NAN;
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.delay.growth_factor = f64::INFINITY;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_non_finite_retry_values_rejected() {
        let mut config = Config::default();
        config.retry.max_jitter = f64::INFINITY;
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));

        let mut config = Config::default();
        config.retry.max_backoff = f64::NAN;
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.retry.url_pause = f64::INFINITY;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_non_finite_timeouts_rejected() {
        let mut config = Config::default();
        config.orchestration.navigation_timeout = f64::NAN;
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));

        let mut config = Config::default();
        config.orchestration.extraction_timeout = f64::INFINITY;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_non_finite_health_values_rejected() {
        let mut config = Config::default();
        config.health.recover_above = f64::NAN;
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));

        let mut config = Config::default();
        config.health.max_memory_mb = f64::INFINITY;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_session_windows() {
        let mut config = Config::default();
        config.session.restart_after = config.session.max_session_duration + 1;
        assert!(validate(&config).is_err());
    }
}
