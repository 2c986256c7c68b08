//! Proxy-list providers
//!
//! A provider is an independent fetch-and-parse routine that returns zero or
//! more proxy addresses. Providers know nothing about the pool; the pool fans
//! out to all of them and merges whatever comes back.

use crate::config::{ProviderEntry, ProviderKind, ProxyConfig};
use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

/// A proxy address found by a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredProxy {
    pub address: String,
    pub source: String,
}

/// Errors a single provider can hit; never escalated past the pool
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider}: request failed: {source}")]
    Http {
        provider: String,
        source: reqwest::Error,
    },

    #[error("{provider}: HTTP {status}")]
    Status { provider: String, status: u16 },

    #[error("{provider}: unexpected response: {message}")]
    Malformed { provider: String, message: String },

    #[error("{provider}: timed out")]
    Timeout { provider: String },
}

/// A source of proxy addresses
#[async_trait]
pub trait ProxyProvider: Send + Sync {
    /// Label recorded as the `source` of every proxy this provider returns
    fn name(&self) -> &str;

    /// Fetches the provider's current list
    async fn fetch(&self) -> Result<Vec<DiscoveredProxy>, ProviderError>;
}

/// Free-proxy tables: one `<tr>` per proxy, host and port in separate cells
pub struct HtmlTableProvider {
    name: String,
    url: String,
    client: Client,
    address_column: usize,
    port_column: usize,
}

impl HtmlTableProvider {
    pub fn new(name: impl Into<String>, url: impl Into<String>, client: Client) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            client,
            address_column: 0,
            port_column: 1,
        }
    }

    /// Reads host and port from other columns than the first two
    pub fn with_columns(mut self, address_column: usize, port_column: usize) -> Self {
        self.address_column = address_column;
        self.port_column = port_column;
        self
    }
}

#[async_trait]
impl ProxyProvider for HtmlTableProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<DiscoveredProxy>, ProviderError> {
        let html = get_text(&self.client, &self.url, &self.name).await?;
        Ok(parse_proxy_table(
            &html,
            self.address_column,
            self.port_column,
            &self.name,
        ))
    }
}

/// Plain text dumps with one `host:port` per line
pub struct PlainListProvider {
    name: String,
    url: String,
    client: Client,
}

impl PlainListProvider {
    pub fn new(name: impl Into<String>, url: impl Into<String>, client: Client) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl ProxyProvider for PlainListProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<DiscoveredProxy>, ProviderError> {
        let text = get_text(&self.client, &self.url, &self.name).await?;
        Ok(parse_plain_list(&text, &self.name))
    }
}

/// JSON APIs that hand out a single proxy per request
pub struct GimmeProxyProvider {
    name: String,
    url: String,
    client: Client,
}

impl GimmeProxyProvider {
    pub fn new(name: impl Into<String>, url: impl Into<String>, client: Client) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl ProxyProvider for GimmeProxyProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<DiscoveredProxy>, ProviderError> {
        let body = get_text(&self.client, &self.url, &self.name).await?;
        let proxy =
            parse_gimme_response(&body, &self.name).map_err(|message| ProviderError::Malformed {
                provider: self.name.clone(),
                message,
            })?;
        Ok(vec![proxy])
    }
}

/// Builds the configured providers, sharing one HTTP client
pub fn build_providers(config: &ProxyConfig, client: &Client) -> Vec<Arc<dyn ProxyProvider>> {
    config
        .providers
        .iter()
        .map(|entry| build_provider(entry, client))
        .collect()
}

fn build_provider(entry: &ProviderEntry, client: &Client) -> Arc<dyn ProxyProvider> {
    match entry.kind {
        ProviderKind::HtmlTable => Arc::new(
            HtmlTableProvider::new(&entry.name, &entry.url, client.clone())
                .with_columns(entry.address_column, entry.port_column),
        ),
        ProviderKind::PlainList => Arc::new(PlainListProvider::new(
            &entry.name,
            &entry.url,
            client.clone(),
        )),
        ProviderKind::Gimme => Arc::new(GimmeProxyProvider::new(
            &entry.name,
            &entry.url,
            client.clone(),
        )),
    }
}

async fn get_text(client: &Client, url: &str, provider: &str) -> Result<String, ProviderError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|source| ProviderError::Http {
            provider: provider.to_string(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(ProviderError::Status {
            provider: provider.to_string(),
            status: status.as_u16(),
        });
    }

    response.text().await.map_err(|source| ProviderError::Http {
        provider: provider.to_string(),
        source,
    })
}

/// Extracts `host:port` pairs from the rows of every `<tbody>` in `html`
///
/// Rows whose cells do not form a valid address (headers, ads, pagination
/// rows) are skipped. Duplicates within one page are dropped.
pub fn parse_proxy_table(
    html: &str,
    address_column: usize,
    port_column: usize,
    source: &str,
) -> Vec<DiscoveredProxy> {
    let document = Html::parse_document(html);
    let (Ok(row_selector), Ok(cell_selector)) = (Selector::parse("tbody tr"), Selector::parse("td"))
    else {
        return Vec::new();
    };

    let mut proxies: Vec<DiscoveredProxy> = Vec::new();
    for row in document.select(&row_selector) {
        let cells: Vec<String> = row
            .select(&cell_selector)
            .map(|cell| cell.text().collect::<String>().trim().to_string())
            .collect();

        let (Some(host), Some(port)) = (cells.get(address_column), cells.get(port_column)) else {
            continue;
        };

        let address = format!("{}:{}", host, port);
        if is_proxy_address(&address) && !proxies.iter().any(|p| p.address == address) {
            proxies.push(DiscoveredProxy {
                address,
                source: source.to_string(),
            });
        }
    }

    proxies
}

/// Extracts one `host:port` per line, ignoring anything else
pub fn parse_plain_list(text: &str, source: &str) -> Vec<DiscoveredProxy> {
    let mut proxies: Vec<DiscoveredProxy> = Vec::new();
    for line in text.lines() {
        let address = line.trim();
        if is_proxy_address(address) && !proxies.iter().any(|p| p.address == address) {
            proxies.push(DiscoveredProxy {
                address: address.to_string(),
                source: source.to_string(),
            });
        }
    }
    proxies
}

#[derive(Deserialize)]
struct GimmeResponse {
    #[serde(rename = "ipPort")]
    ip_port: Option<String>,
}

/// Reads the `ipPort` field of a single-proxy API response
pub fn parse_gimme_response(body: &str, source: &str) -> Result<DiscoveredProxy, String> {
    let response: GimmeResponse = serde_json::from_str(body).map_err(|e| e.to_string())?;
    match response.ip_port {
        Some(address) if is_proxy_address(address.trim()) => Ok(DiscoveredProxy {
            address: address.trim().to_string(),
            source: source.to_string(),
        }),
        Some(address) => Err(format!("invalid ipPort '{}'", address)),
        None => Err("response has no ipPort".to_string()),
    }
}

/// Returns true for `host:port` with a non-empty host and a non-zero port
pub fn is_proxy_address(candidate: &str) -> bool {
    let Some((host, port)) = candidate.rsplit_once(':') else {
        return false;
    };

    !host.is_empty()
        && !host.chars().any(|c| c.is_whitespace() || c == '/')
        && port.parse::<u16>().map(|p| p > 0).unwrap_or(false)
}
