//! Detail-page fetching
//!
//! Every outcome is folded into a [`FetchResult`] whose variant decides the
//! feedback given to the proxy that carried the request.

use crate::config::UserAgentConfig;
use async_trait::async_trait;
use reqwest::{Client, Proxy};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Outcome of one GET, as seen by the proxy pool
#[derive(Debug)]
pub enum FetchResult {
    /// A 2xx answer with a readable body
    Success {
        final_url: String,
        status_code: u16,
        body: String,
    },

    /// The server answered with a non-success status
    HttpError { status_code: u16 },

    /// The request did not finish in time
    Timeout,

    /// Connection refused, proxy handshake failure, unreadable body...
    NetworkError { error: String },
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchResult::Success { .. })
    }
}

/// Performs single GET requests, optionally through a proxy
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetches `url`, routing through `proxy` (`host:port` or a proxy URL) when set
    async fn fetch(&self, url: &str, proxy: Option<&str>) -> FetchResult;

    /// Drops any per-proxy state kept for `proxy` once the pool gave up on it
    fn release(&self, _proxy: &str) {}
}

/// Builds a direct (unproxied) client identifying as the configured crawler
///
/// # Arguments
///
/// * `config` - Name, version and contact URL sent in `User-Agent`
/// * `timeout` - Total request timeout; connecting is capped at 10 seconds
///
/// # Returns
///
/// * `Ok(Client)` - A client with gzip and brotli decoding enabled
/// * `Err(reqwest::Error)` - The TLS backend could not be initialized
///
/// # Example
///
/// ```no_run
/// use dragnet::config::UserAgentConfig;
/// use dragnet::crawler::build_http_client;
/// use std::time::Duration;
///
/// let identity = UserAgentConfig {
///     crawler_name: "Dragnet".to_string(),
///     crawler_version: "0.1.0".to_string(),
///     contact_url: "https://dragnet.example/contact".to_string(),
/// };
///
/// let client = build_http_client(&identity, Duration::from_secs(30)).unwrap();
/// ```
pub fn build_http_client(
    config: &UserAgentConfig,
    timeout: Duration,
) -> Result<Client, reqwest::Error> {
    client_builder(config, timeout).build()
}

fn client_builder(config: &UserAgentConfig, timeout: Duration) -> reqwest::ClientBuilder {
    Client::builder()
        .user_agent(config.header_value())
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .gzip(true)
        .brotli(true)
}

/// Normalizes a pool address into a proxy URL
///
/// Bare `host:port` addresses are treated as HTTP proxies.
pub fn proxy_url(address: &str) -> String {
    if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    }
}

/// [`Fetcher`] backed by reqwest
///
/// reqwest binds proxies at client construction, so a client is built the
/// first time an address is used and reused until the address is released.
pub struct HttpFetcher {
    user_agent: UserAgentConfig,
    timeout: Duration,
    direct: Client,
    proxied: Mutex<HashMap<String, Client>>,
}

impl HttpFetcher {
    pub fn new(user_agent: &UserAgentConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            direct: build_http_client(user_agent, timeout)?,
            user_agent: user_agent.clone(),
            timeout,
            proxied: Mutex::new(HashMap::new()),
        })
    }

    fn client_for(&self, proxy: Option<&str>) -> Result<Client, reqwest::Error> {
        let Some(address) = proxy else {
            return Ok(self.direct.clone());
        };

        let mut clients = self.proxied.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(address) {
            return Ok(client.clone());
        }

        let client = client_builder(&self.user_agent, self.timeout)
            .proxy(Proxy::all(proxy_url(address))?)
            .build()?;
        clients.insert(address.to_string(), client.clone());
        Ok(client)
    }

    /// Number of proxy clients currently cached
    pub fn cached_clients(&self) -> usize {
        self.proxied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, proxy: Option<&str>) -> FetchResult {
        let client = match self.client_for(proxy) {
            Ok(client) => client,
            Err(e) => {
                return FetchResult::NetworkError {
                    error: format!("invalid proxy: {}", e),
                }
            }
        };

        let response = match client.get(url).send().await {
            Ok(response) => response,
            Err(e) => return classify(e),
        };

        let status_code = response.status().as_u16();
        if !response.status().is_success() {
            return FetchResult::HttpError { status_code };
        }

        let final_url = response.url().to_string();
        match response.text().await {
            Ok(body) => FetchResult::Success {
                final_url,
                status_code,
                body,
            },
            Err(e) => classify(e),
        }
    }

    fn release(&self, proxy: &str) {
        self.proxied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(proxy);
    }
}

fn classify(error: reqwest::Error) -> FetchResult {
    if error.is_timeout() {
        FetchResult::Timeout
    } else if error.is_connect() {
        FetchResult::NetworkError {
            error: format!("connection failed: {}", error),
        }
    } else {
        FetchResult::NetworkError {
            error: error.to_string(),
        }
    }
}
