//! Crawled records and the identities used to deduplicate them

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

/// What kind of entity an item describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Company,
    Job,
    Business,
}

impl ItemKind {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Company => "company",
            Self::Job => "job",
            Self::Business => "business",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "company" => Some(Self::Company),
            "job" => Some(Self::Job),
            "business" => Some(Self::Business),
            _ => None,
        }
    }
}

/// A source-agnostic crawled record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Item {
    /// Id of the adapter that produced the item
    pub source: String,

    pub kind: ItemKind,

    /// Display name (company name, job title, business name)
    pub name: String,

    /// Canonical URL of the item on its source
    pub url: String,

    /// Source-specific fields
    pub fields: Map<String, Value>,
}

impl Item {
    pub fn new(
        source: impl Into<String>,
        kind: ItemKind,
        name: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            kind,
            name: name.into(),
            url: url.into(),
            fields: Map::new(),
        }
    }

    /// Sets a source-specific field, skipping empty strings
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        let is_empty = match &value {
            Value::String(s) => s.is_empty(),
            Value::Array(a) => a.is_empty(),
            Value::Null => true,
            _ => false,
        };
        if !is_empty {
            self.fields.insert(key.to_string(), value);
        }
        self
    }

    /// Returns a string field, if present
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// City and category labels of the item, lowercased
    pub fn filter_tags(&self) -> Vec<(String, String)> {
        filter_tags(&self.fields)
    }

    pub fn key(&self) -> ItemKey {
        ItemKey {
            source: self.source.clone(),
            name: self.name.clone(),
            url: self.url.clone(),
        }
    }
}

/// Derives `city` and `category` labels from stored fields
///
/// Reads the top-level `city` and `category` strings, `address.city` and
/// every entry of the `categories` array.
pub fn filter_tags(fields: &Map<String, Value>) -> Vec<(String, String)> {
    let mut tags = Vec::new();
    let mut push = |key: &str, value: &str| {
        let value = value.trim().to_lowercase();
        if !value.is_empty() && !tags.contains(&(key.to_string(), value.clone())) {
            tags.push((key.to_string(), value));
        }
    };

    for key in ["city", "category"] {
        if let Some(value) = fields.get(key).and_then(Value::as_str) {
            push(key, value);
        }
    }
    if let Some(city) = fields
        .get("address")
        .and_then(|a| a.get("city"))
        .and_then(Value::as_str)
    {
        push("city", city);
    }
    if let Some(Value::Array(categories)) = fields.get("categories") {
        for category in categories.iter().filter_map(Value::as_str) {
            push("category", category);
        }
    }
    tags
}

/// Deduplication identity of an item
///
/// Two items of the same source collide when either their name or their url
/// matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemKey {
    pub source: String,
    pub name: String,
    pub url: String,
}

/// Names and URLs already persisted for one source
#[derive(Debug, Clone, Default)]
pub struct KnownItems {
    names: HashSet<String>,
    urls: HashSet<String>,

    /// Filter labels by url, for items that have any
    tags: HashMap<String, Vec<(String, String)>>,
}

impl KnownItems {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an identity
    pub fn insert(&mut self, name: &str, url: &str) {
        let name = name.trim();
        if !name.is_empty() {
            self.names.insert(name.to_string());
        }
        self.urls.insert(url.to_string());
    }

    /// Records an identity together with its filter labels
    pub fn insert_tagged(&mut self, name: &str, url: &str, tags: Vec<(String, String)>) {
        self.insert(name, url);
        if !tags.is_empty() {
            self.tags.insert(url.to_string(), tags);
        }
    }

    /// Records the identity of a persisted item
    pub fn insert_item(&mut self, item: &Item) {
        self.insert_tagged(&item.name, &item.url, item.filter_tags());
    }

    /// Number of known items carrying every `(key, value)` label
    ///
    /// Values compare case-insensitively. No labels counts every known item.
    pub fn count_tagged(&self, wanted: &[(&str, &str)]) -> usize {
        if wanted.is_empty() {
            return self.len();
        }
        self.tags
            .values()
            .filter(|tags| {
                wanted.iter().all(|(key, value)| {
                    let value = value.trim().to_lowercase();
                    tags.iter().any(|(k, v)| k == key && *v == value)
                })
            })
            .count()
    }

    pub fn contains_url(&self, url: &str) -> bool {
        self.urls.contains(url)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.names.contains(name.trim())
    }

    /// Returns true if either the url or the (optional) name is already known
    pub fn matches(&self, url: &str, name: Option<&str>) -> bool {
        self.contains_url(url) || name.is_some_and(|n| self.contains_name(n))
    }

    /// Returns true if `item` collides with a known identity
    pub fn contains_item(&self, item: &Item) -> bool {
        self.matches(&item.url, Some(&item.name))
    }

    /// Number of known urls
    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for KnownItems {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        let mut known = KnownItems::new();
        for (name, url) in iter {
            known.insert(name, url);
        }
        known
    }
}
