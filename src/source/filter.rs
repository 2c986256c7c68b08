//! Discovery filters
//!
//! A filter is a set of `key=value` pairs separated by `;`, for example
//! `city=Boston, MA;category=bars`. Several filters separated by `,` form a
//! [`FilterSet`] whose members are crawled one after another. Values may not
//! contain `;`. A comma that is not followed by `key=` belongs to the value
//! before it, so `city=Boston, MA` stays one filter.

use crate::{ConfigError, ConfigResult};
use std::collections::BTreeMap;
use std::fmt;

/// Structured key/value constraints passed to discovery
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pairs: BTreeMap<String, String>,
}

impl Filter {
    /// A filter with no constraints
    pub fn any() -> Self {
        Self::default()
    }

    /// Parses a single `key=value;key=value` filter
    pub fn parse(input: &str) -> ConfigResult<Self> {
        let mut pairs = BTreeMap::new();

        for part in input.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part.split_once('=').ok_or_else(|| {
                ConfigError::InvalidFilter(format!("expected key=value, got '{}'", part))
            })?;

            let key = key.trim().to_lowercase();
            let value = value.trim();
            if key.is_empty() {
                return Err(ConfigError::InvalidFilter(format!(
                    "missing key in '{}'",
                    part
                )));
            }
            if value.is_empty() {
                return Err(ConfigError::InvalidFilter(format!(
                    "missing value for '{}'",
                    key
                )));
            }
            if pairs.insert(key.clone(), value.to_string()).is_some() {
                return Err(ConfigError::InvalidFilter(format!(
                    "'{}' given more than once",
                    key
                )));
            }
        }

        Ok(Self { pairs })
    }

    /// Adds or replaces a constraint
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.pairs.insert(key.to_lowercase(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs.get(key).map(String::as_str)
    }

    pub fn city(&self) -> Option<&str> {
        self.get("city")
    }

    pub fn category(&self) -> Option<&str> {
        self.get("category")
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.pairs.is_empty() {
            return write!(f, "*");
        }
        let rendered: Vec<String> = self
            .pairs
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        write!(f, "{}", rendered.join(";"))
    }
}

/// An ordered list of filters crawled sequentially within one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSet {
    filters: Vec<Filter>,
}

impl FilterSet {
    /// Parses comma-separated filters; an empty input yields one unconstrained filter
    pub fn parse(input: &str) -> ConfigResult<Self> {
        let mut segments: Vec<String> = Vec::new();
        for segment in input.split(',') {
            let head = segment.split(';').next().unwrap_or_default();
            match segments.last_mut() {
                Some(previous) if !head.contains('=') => {
                    previous.push(',');
                    previous.push_str(segment);
                }
                _ => segments.push(segment.to_string()),
            }
        }

        let filters = segments
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(Filter::parse)
            .collect::<ConfigResult<Vec<_>>>()?;

        Ok(Self::new(filters))
    }

    /// Builds a set from explicit filters; an empty list means "no constraints"
    pub fn new(filters: Vec<Filter>) -> Self {
        if filters.is_empty() {
            Self {
                filters: vec![Filter::any()],
            }
        } else {
            Self { filters }
        }
    }

    pub fn single(filter: Filter) -> Self {
        Self::new(vec![filter])
    }

    pub fn get(&self, index: usize) -> Option<&Filter> {
        self.filters.get(index)
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Filter> {
        self.filters.iter()
    }
}

impl Default for FilterSet {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl fmt::Display for FilterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.filters.iter().map(Filter::to_string).collect();
        write!(f, "{}", rendered.join(","))
    }
}
