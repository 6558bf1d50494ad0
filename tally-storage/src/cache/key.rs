//! Deterministic cache keys for collection queries.
//!
//! The cache itself accepts any string key, and two logically different
//! queries sharing a key is a caller error it cannot detect. `QueryKey`
//! removes the usual ways that happens: the subject is mandatory, filters
//! are kept sorted, and separator characters inside components are escaped.

use std::collections::BTreeMap;
use std::fmt;

/// Cache key built from collection name, subject and filter set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    collection: String,
    subject: String,
    filters: BTreeMap<String, String>,
}

impl QueryKey {
    /// Key for a query over `collection` on behalf of `subject` (usually the
    /// account email).
    pub fn new(collection: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            subject: subject.into(),
            filters: BTreeMap::new(),
        }
    }

    /// Add a filter component. Insertion order does not affect the key.
    pub fn with_filter(mut self, field: impl Into<String>, value: impl ToString) -> Self {
        self.filters.insert(field.into(), value.to_string());
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Encode as `collection|subject|field=value&field=value`.
    pub fn encode(&self) -> String {
        let mut key = format!("{}|{}", escape(&self.collection), escape(&self.subject));
        if !self.filters.is_empty() {
            key.push('|');
            let filters: Vec<String> = self
                .filters
                .iter()
                .map(|(field, value)| format!("{}={}", escape(field), escape(value)))
                .collect();
            key.push_str(&filters.join("&"));
        }
        key
    }
}

fn escape(component: &str) -> String {
    let mut out = String::with_capacity(component.len());
    for c in component.chars() {
        match c {
            '%' => out.push_str("%25"),
            '|' => out.push_str("%7C"),
            '&' => out.push_str("%26"),
            '=' => out.push_str("%3D"),
            _ => out.push(c),
        }
    }
    out
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl From<QueryKey> for String {
    fn from(key: QueryKey) -> Self {
        key.encode()
    }
}

impl From<&QueryKey> for String {
    fn from(key: &QueryKey) -> Self {
        key.encode()
    }
}
