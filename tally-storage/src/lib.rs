//! Tally Storage - Document Store Seam and Cached Reads
//!
//! Defines the document store collaborator, an in-memory implementation, the
//! staleness-aware query cache and the reader that routes every interactive
//! query through it. Raw documents are normalized into typed entities here,
//! at the ingestion boundary, before the core algorithms see them.

pub mod cache;
pub mod client;
pub mod constants;
pub mod memory;
pub mod normalize;
pub mod reader;
pub mod store;

pub use cache::{CacheEntry, CacheRead, CacheStats, QueryCache, QueryKey};
pub use client::{CachedSalesClient, Dashboard};
pub use memory::InMemoryDocumentStore;
pub use normalize::{decode_all, parse_timestamp, to_fields, FromRecord};
pub use reader::{
    CollectionReader, FetchOptions, FetchRequest, ReaderConfig, RequestStats, RequestStatsSnapshot,
};
pub use store::{Constraint, Direction, DocumentStore, FilterOp};
