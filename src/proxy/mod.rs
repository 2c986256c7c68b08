//! Outbound proxy rotation
//!
//! This module handles:
//! - Tracking per-proxy usage, success and failure
//! - Least-used selection with random tie-breaking
//! - Replenishing the pool from independent proxy-list providers

mod pool;
mod provider;
mod record;

pub use pool::{PoolStats, ProxyPool};
pub use provider::{
    build_providers, is_proxy_address, parse_gimme_response, parse_plain_list, parse_proxy_table,
    DiscoveredProxy, GimmeProxyProvider, HtmlTableProvider, PlainListProvider, ProviderError,
    ProxyProvider,
};
pub use record::{InvalidationPolicy, ProxyRecord, DIRECT_ADDRESS, DIRECT_SOURCE};
