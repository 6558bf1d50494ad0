//! Document store collaborator.
//!
//! The core only ever issues five operations against the remote store:
//! constraint-based queries, single-document reads, set (optionally merged),
//! append to a collection, and partial update. Transactions, indexes and
//! security rules belong to the store.

use std::cmp::Ordering;

use async_trait::async_trait;
use serde_json::Value;
use tally_core::{Fields, Record, StoreError, TallyResult};

/// Comparison used by a `Where` constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
}

/// Sort direction for `OrderBy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// One element of an ordered, composable query.
///
/// The reader forwards constraints untouched; only the store interprets them.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    Where {
        field: String,
        op: FilterOp,
        value: Value,
    },
    OrderBy {
        field: String,
        direction: Direction,
    },
    Limit(usize),
}

impl Constraint {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::filter(field, FilterOp::Eq, value)
    }

    pub fn filter(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self::Where {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn order_by(field: impl Into<String>, direction: Direction) -> Self {
        Self::OrderBy {
            field: field.into(),
            direction,
        }
    }

    pub fn limit(n: usize) -> Self {
        Self::Limit(n)
    }
}

/// Remote document database reached over a constraint-based query API.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Run the constraints against a collection.
    async fn query(
        &self,
        collection: &str,
        constraints: &[Constraint],
    ) -> TallyResult<Vec<Record>>;

    /// Read one document by path.
    async fn get(&self, path: &str) -> TallyResult<Option<Record>>;

    /// Write a document. With `merge`, top-level fields are merged into any
    /// existing document instead of replacing it.
    async fn set(&self, path: &str, fields: Fields, merge: bool) -> TallyResult<()>;

    /// Add a document with a generated id to a collection; returns the id.
    async fn append(&self, collection: &str, fields: Fields) -> TallyResult<String>;

    /// Update fields of an existing document. Fails if it does not exist.
    async fn update(&self, path: &str, partial: Fields) -> TallyResult<()>;
}

/// Split a document path into its collection path and document id.
///
/// Document paths alternate collection and document segments, so they have
/// an even number of non-empty segments (`forecasts/f1`,
/// `metrics/financial/daily/2026-01-05`).
pub fn split_document_path(path: &str) -> Result<(&str, &str), StoreError> {
    let segments: Vec<&str> = path.split('/').collect();
    if segments.len() < 2 || segments.len() % 2 != 0 || segments.iter().any(|s| s.is_empty()) {
        return Err(StoreError::InvalidPath {
            path: path.to_string(),
        });
    }
    match path.rsplit_once('/') {
        Some((collection, id)) => Ok((collection, id)),
        None => Err(StoreError::InvalidPath {
            path: path.to_string(),
        }),
    }
}

/// Validate a collection path (odd number of non-empty segments).
pub fn validate_collection_path(path: &str) -> Result<(), StoreError> {
    let segments: Vec<&str> = path.split('/').collect();
    if segments.len() % 2 != 1 || segments.iter().any(|s| s.is_empty()) {
        return Err(StoreError::InvalidPath {
            path: path.to_string(),
        });
    }
    Ok(())
}

/// Order two JSON values of the same kind. Mixed kinds are incomparable.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Whether a record passes a single `Where` predicate.
pub fn matches_filter(record: &Record, field: &str, op: FilterOp, value: &Value) -> bool {
    let Some(actual) = record.get(field) else {
        return false;
    };
    match op {
        FilterOp::Eq => actual == value,
        FilterOp::Lt => compare_values(actual, value) == Some(Ordering::Less),
        FilterOp::Lte => matches!(
            compare_values(actual, value),
            Some(Ordering::Less | Ordering::Equal)
        ),
        FilterOp::Gt => compare_values(actual, value) == Some(Ordering::Greater),
        FilterOp::Gte => matches!(
            compare_values(actual, value),
            Some(Ordering::Greater | Ordering::Equal)
        ),
    }
}
