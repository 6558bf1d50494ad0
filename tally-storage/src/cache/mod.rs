//! Query result cache.
//!
//! Results are cached per caller-supplied key with a TTL. Staleness is never
//! hidden: an entry past its TTL is invisible, and every read through the
//! [`CollectionReader`](crate::CollectionReader) comes back as a
//! [`CacheRead`] saying whether it was served from cache and when it was
//! stored.
//!
//! # Key contract
//!
//! A key must deterministically encode collection, filters and subject. Two
//! logically different queries sharing a key will serve each other's data;
//! the cache cannot detect this. Prefer building keys with [`QueryKey`].

pub mod key;
pub mod query_cache;
pub mod read;

pub use key::QueryKey;
pub use query_cache::{CacheEntry, CacheStats, QueryCache};
pub use read::CacheRead;
