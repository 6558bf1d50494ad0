//! In-memory document store for testing and local development.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tally_core::{Fields, Record, StoreError, TallyResult};
use uuid::Uuid;

use crate::store::{
    compare_values, matches_filter, split_document_path, validate_collection_path, Constraint,
    Direction, DocumentStore,
};

type Collection = BTreeMap<String, Fields>;

/// In-memory [`DocumentStore`].
///
/// Failures can be injected: [`set_unavailable`](Self::set_unavailable)
/// fails every operation as a transient outage, and
/// [`fail_path`](Self::fail_path) fails operations whose path starts with a
/// prefix.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    collections: RwLock<HashMap<String, Collection>>,
    unavailable: AtomicBool,
    failing_prefixes: RwLock<HashSet<String>>,
    queries: AtomicU64,
    writes: AtomicU64,
}

impl InMemoryDocumentStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document directly, bypassing failure injection and counters.
    pub fn insert(&self, collection: &str, id: &str, value: Value) {
        let fields = match value {
            Value::Object(map) => map,
            _ => Fields::new(),
        };
        self.collections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), fields);
    }

    /// Read a document directly, bypassing failure injection and counters.
    pub fn document(&self, path: &str) -> Option<Record> {
        let (collection, id) = split_document_path(path).ok()?;
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|fields| Record::new(id, fields.clone()))
    }

    /// All documents in a collection, in id order.
    pub fn documents(&self, collection: &str) -> Vec<Record> {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, fields)| Record::new(id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Make every operation fail as if the store were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Fail every operation on paths starting with `prefix`.
    pub fn fail_path(&self, prefix: impl Into<String>) {
        self.failing_prefixes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(prefix.into());
    }

    /// Stop failing operations on `prefix`.
    pub fn heal_path(&self, prefix: &str) {
        self.failing_prefixes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(prefix);
    }

    /// Number of `query` calls that reached the store.
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    /// Number of successful writes (`set`, `append`, `update`).
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    fn check_available(&self, path: &str) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable {
                reason: "store marked unavailable".to_string(),
            });
        }
        let failing = self
            .failing_prefixes
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if failing.iter().any(|prefix| path.starts_with(prefix.as_str())) {
            return Err(StoreError::Unavailable {
                reason: format!("injected failure for {}", path),
            });
        }
        Ok(())
    }
}

fn apply_constraints(mut records: Vec<Record>, constraints: &[Constraint]) -> Vec<Record> {
    let mut limit = None;
    for constraint in constraints {
        match constraint {
            Constraint::Where { field, op, value } => {
                records.retain(|r| matches_filter(r, field, *op, value));
            }
            Constraint::OrderBy { field, direction } => {
                // Documents without the ordering field are excluded.
                records.retain(|r| r.get(field).is_some());
                records.sort_by(|a, b| {
                    let ordering = match (a.get(field), b.get(field)) {
                        (Some(x), Some(y)) => {
                            compare_values(x, y).unwrap_or(std::cmp::Ordering::Equal)
                        }
                        _ => std::cmp::Ordering::Equal,
                    };
                    match direction {
                        Direction::Ascending => ordering,
                        Direction::Descending => ordering.reverse(),
                    }
                });
            }
            Constraint::Limit(n) => limit = Some(*n),
        }
    }
    if let Some(n) = limit {
        records.truncate(n);
    }
    records
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn query(
        &self,
        collection: &str,
        constraints: &[Constraint],
    ) -> TallyResult<Vec<Record>> {
        validate_collection_path(collection)?;
        self.check_available(collection)?;
        self.queries.fetch_add(1, Ordering::Relaxed);
        Ok(apply_constraints(self.documents(collection), constraints))
    }

    async fn get(&self, path: &str) -> TallyResult<Option<Record>> {
        split_document_path(path)?;
        self.check_available(path)?;
        Ok(self.document(path))
    }

    async fn set(&self, path: &str, fields: Fields, merge: bool) -> TallyResult<()> {
        let (collection, id) = split_document_path(path)?;
        self.check_available(path)?;

        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        let docs = collections.entry(collection.to_string()).or_default();
        if merge && docs.contains_key(id) {
            if let Some(existing) = docs.get_mut(id) {
                existing.extend(fields);
            }
        } else {
            docs.insert(id.to_string(), fields);
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn append(&self, collection: &str, fields: Fields) -> TallyResult<String> {
        validate_collection_path(collection)?;
        self.check_available(collection)?;

        let id = Uuid::now_v7().to_string();
        self.collections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), fields);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    async fn update(&self, path: &str, partial: Fields) -> TallyResult<()> {
        let (collection, id) = split_document_path(path)?;
        self.check_available(path)?;

        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        let existing = collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| StoreError::NotFound {
                path: path.to_string(),
            })?;
        existing.extend(partial);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
