//! Configuration module for Crawl-Warden
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! Every section except `[user-agent]` and `[output]` may be omitted.
//!
//! # Example
//!
//! ```no_run
//! use crawl_warden::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("warden.toml")).unwrap();
//! println!("Circuit threshold: {}", config.circuit_breaker.threshold);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{
    CircuitBreakerConfig, Config, CrawlerConfig, DelayConfig, HealthConfig, OrchestrationConfig,
    OutputConfig, PolitenessConfig, RetryConfig, SessionConfig, UserAgentConfig,
};

pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::validate;
