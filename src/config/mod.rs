//! Configuration module for Dragnet
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use dragnet::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("dragnet.toml")).unwrap();
//! println!("Fetches per batch: {}", config.crawler.hits_per_loop);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, CrawlerConfig, OutputConfig, ProviderEntry, ProviderKind, ProxyConfig, SourceEntry,
    UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
