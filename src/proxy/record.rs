use crate::config::ProxyConfig;

/// Address of the built-in record that means "no proxy, connect directly"
pub const DIRECT_ADDRESS: &str = "";

/// Source label of the built-in direct record
pub const DIRECT_SOURCE: &str = "local";

/// One outbound egress and its usage history
///
/// Records are never removed from a pool. A record that misbehaves is marked
/// invalid and simply stops being selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRecord {
    /// `host:port`, or [`DIRECT_ADDRESS`] for a direct connection
    pub address: String,

    /// Number of times this record was handed out for a fetch
    pub used_count: u32,

    /// Number of fetches through this record that returned a page
    pub success_count: u32,

    /// Failures since the last success
    pub fail_count: u32,

    /// Whether the record may still be selected
    pub valid: bool,

    /// Provider that supplied the record
    pub source: String,
}

impl ProxyRecord {
    /// Creates a fresh, untested record
    pub fn new(address: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            used_count: 0,
            success_count: 0,
            fail_count: 0,
            valid: true,
            source: source.into(),
        }
    }

    /// The record every pool starts with: fetch without a proxy
    pub fn direct() -> Self {
        Self::new(DIRECT_ADDRESS, DIRECT_SOURCE)
    }

    /// Returns true if fetches through this record bypass any proxy
    pub fn is_direct(&self) -> bool {
        self.address.is_empty()
    }

    /// Returns true if the record proved itself once and has since been invalidated
    pub fn is_expired(&self) -> bool {
        self.success_count > 0 && !self.valid
    }

    /// Evaluates the invalidation rule against this record's counters
    pub fn should_invalidate(&self, policy: &InvalidationPolicy) -> bool {
        if self.success_count == 0 {
            self.fail_count > policy.untested_fail_threshold
        } else {
            self.fail_count > policy.proven_fail_threshold
        }
    }
}

/// Failure thresholds after which a record is invalidated
///
/// A proxy that never returned a page is dropped as soon as it fails more
/// than `untested_fail_threshold` times; one that has succeeded before is
/// dropped only after more than `proven_fail_threshold` consecutive failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidationPolicy {
    pub untested_fail_threshold: u32,
    pub proven_fail_threshold: u32,
}

impl Default for InvalidationPolicy {
    fn default() -> Self {
        Self {
            untested_fail_threshold: 0,
            proven_fail_threshold: 2,
        }
    }
}

impl From<&ProxyConfig> for InvalidationPolicy {
    fn from(config: &ProxyConfig) -> Self {
        Self {
            untested_fail_threshold: config.untested_fail_threshold,
            proven_fail_threshold: config.proven_fail_threshold,
        }
    }
}
