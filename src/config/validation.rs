use crate::config::types::{
    Config, CrawlerConfig, OutputConfig, ProviderEntry, ProxyConfig, SourceEntry, UserAgentConfig,
};
use crate::ConfigError;
use url::Url;

/// Upper bound on fetches in flight
const MAX_HITS_PER_LOOP: u32 = 30;

/// Single-proxy APIs throttle beyond this
const MAX_TRICKLE_PER_MINUTE: u32 = 20;

/// Checks every section, stopping at the first problem
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_proxy_config(&config.proxy)?;
    validate_output_config(&config.output)?;
    validate_sources(&config.sources)?;
    Ok(())
}

/// Batch size, timeouts and the report interval must be usable
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.hits_per_loop < 1 || config.hits_per_loop > MAX_HITS_PER_LOOP {
        return Err(ConfigError::Validation(format!(
            "hits-per-loop must be between 1 and {}, got {}",
            MAX_HITS_PER_LOOP, config.hits_per_loop
        )));
    }

    if config.fetch_timeout_secs < 1 || config.fetch_timeout_secs > 120 {
        return Err(ConfigError::Validation(format!(
            "fetch-timeout-secs must be between 1 and 120, got {}",
            config.fetch_timeout_secs
        )));
    }

    if config.report_interval_secs < 1 {
        return Err(ConfigError::Validation(
            "report-interval-secs must be >= 1".to_string(),
        ));
    }

    if config.default_limit < 1 {
        return Err(ConfigError::Validation(
            "default-limit must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// The crawler name goes into `User-Agent` and must be a plain token
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler-name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler-name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact-url: {}", e)))?;

    Ok(())
}

/// Validates proxy pool configuration
fn validate_proxy_config(config: &ProxyConfig) -> Result<(), ConfigError> {
    if config.provider_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "provider-timeout-secs must be >= 1".to_string(),
        ));
    }

    if config.trickle_per_minute > MAX_TRICKLE_PER_MINUTE {
        return Err(ConfigError::Validation(format!(
            "trickle-per-minute must be at most {}, got {}",
            MAX_TRICKLE_PER_MINUTE, config.trickle_per_minute
        )));
    }

    if config.trickle_per_minute > 0 {
        match &config.trickle_url {
            Some(url) => validate_http_url("trickle-url", url)?,
            None => {
                return Err(ConfigError::Validation(
                    "trickle-per-minute is set but trickle-url is missing".to_string(),
                ))
            }
        }
    }

    for provider in &config.providers {
        validate_provider(provider)?;
    }

    Ok(())
}

fn validate_provider(provider: &ProviderEntry) -> Result<(), ConfigError> {
    if provider.name.trim().is_empty() {
        return Err(ConfigError::Validation(
            "proxy provider name cannot be empty".to_string(),
        ));
    }

    if provider.address_column == provider.port_column {
        return Err(ConfigError::Validation(format!(
            "proxy provider '{}' uses column {} for both address and port",
            provider.name, provider.port_column
        )));
    }

    validate_http_url(&format!("proxy provider '{}'", provider.name), &provider.url)
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates per-source overrides
fn validate_sources(sources: &[SourceEntry]) -> Result<(), ConfigError> {
    for (i, entry) in sources.iter().enumerate() {
        if entry.id.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "source #{} has an empty id",
                i + 1
            )));
        }

        if sources[..i]
            .iter()
            .any(|other| other.id.eq_ignore_ascii_case(&entry.id))
        {
            return Err(ConfigError::Validation(format!(
                "source '{}' is configured twice",
                entry.id
            )));
        }

        if let Some(base_url) = &entry.base_url {
            validate_http_url(&format!("source '{}' base-url", entry.id), base_url)?;
        }

        if entry.batch_size == Some(0) {
            return Err(ConfigError::Validation(format!(
                "source '{}' batch-size must be >= 1",
                entry.id
            )));
        }
    }

    Ok(())
}

/// Checks that `value` parses as an http(s) URL
fn validate_http_url(what: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("{} '{}': {}", what, value, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "{} '{}' must use http or https",
            what, value
        )));
    }

    Ok(())
}
