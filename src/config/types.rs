use serde::Deserialize;

/// Main configuration structure for Dragnet
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    pub output: OutputConfig,
    #[serde(default, rename = "source")]
    pub sources: Vec<SourceEntry>,
}

impl Config {
    /// Returns the per-source overrides for `id`, if any were configured
    pub fn source_entry(&self, id: &str) -> Option<&SourceEntry> {
        self.sources.iter().find(|s| s.id.eq_ignore_ascii_case(id))
    }
}

/// Crawl loop tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Maximum number of detail fetches in flight per batch
    #[serde(rename = "hits-per-loop")]
    pub hits_per_loop: u32,

    /// Delay between the starts of two fetches in the same batch (milliseconds)
    #[serde(rename = "stagger-ms")]
    pub stagger_ms: u64,

    /// Hard wall-clock limit for a single fetch
    #[serde(rename = "fetch-timeout-secs")]
    pub fetch_timeout_secs: u64,

    /// Interval of the periodic progress report
    #[serde(rename = "report-interval-secs")]
    pub report_interval_secs: u64,

    /// Item limit used when the caller does not pass one
    #[serde(rename = "default-limit")]
    pub default_limit: u32,

    /// Consecutive empty discoveries tolerated before the session ends (0 = never)
    #[serde(rename = "max-idle-discoveries")]
    pub max_idle_discoveries: u32,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            hits_per_loop: 5,
            stagger_ms: 1000,
            fetch_timeout_secs: 10,
            report_interval_secs: 60,
            default_limit: 10_000,
            max_idle_discoveries: 0,
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,
}

impl UserAgentConfig {
    /// Formats the header value: `Name/Version (+ContactURL)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{})",
            self.crawler_name, self.crawler_version, self.contact_url
        )
    }
}

/// Proxy pool configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Route detail fetches through the pool at all
    pub enabled: bool,

    /// Replenish when fewer valid proxies than this remain
    #[serde(rename = "low-water-mark")]
    pub low_water_mark: usize,

    /// Failures tolerated by a proxy that never succeeded
    #[serde(rename = "untested-fail-threshold")]
    pub untested_fail_threshold: u32,

    /// Consecutive failures tolerated by a proxy that succeeded before
    #[serde(rename = "proven-fail-threshold")]
    pub proven_fail_threshold: u32,

    /// Per-provider deadline during replenishment
    #[serde(rename = "provider-timeout-secs")]
    pub provider_timeout_secs: u64,

    /// Single proxies pulled per minute from `trickle-url` (0 disables)
    #[serde(rename = "trickle-per-minute")]
    pub trickle_per_minute: u32,

    /// Single-proxy JSON endpoint used by the trickle feed
    #[serde(rename = "trickle-url")]
    pub trickle_url: Option<String>,

    /// Proxy-list providers queried on replenish
    #[serde(rename = "provider")]
    pub providers: Vec<ProviderEntry>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            low_water_mark: 10,
            untested_fail_threshold: 0,
            proven_fail_threshold: 2,
            provider_timeout_secs: 20,
            trickle_per_minute: 0,
            trickle_url: None,
            providers: Vec::new(),
        }
    }
}

/// One proxy-list provider
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEntry {
    /// Name recorded as the `source` of every proxy it supplies
    pub name: String,

    /// How the provider's response is parsed
    pub kind: ProviderKind,

    /// Page or API endpoint to query
    pub url: String,

    /// Table column holding the host (html-table only)
    #[serde(rename = "address-column", default)]
    pub address_column: usize,

    /// Table column holding the port (html-table only)
    #[serde(rename = "port-column", default = "default_port_column")]
    pub port_column: usize,
}

fn default_port_column() -> usize {
    1
}

/// Response formats understood by the built-in providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    HtmlTable,
    PlainList,
    Gimme,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// Per-source overrides of the adapter's built-in profile
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceEntry {
    /// Source identifier, e.g. "craft"
    pub id: String,

    /// Replaces the adapter's default site root
    #[serde(rename = "base-url")]
    pub base_url: Option<String>,

    /// Targets requested per discovery call
    #[serde(rename = "batch-size")]
    pub batch_size: Option<u32>,

    /// Wait before retrying an empty or failed discovery
    #[serde(rename = "retry-delay-secs")]
    pub retry_delay_secs: Option<u64>,

    /// Whether detail fetches for this source go through the proxy pool
    #[serde(rename = "use-proxies")]
    pub use_proxies: Option<bool>,
}
