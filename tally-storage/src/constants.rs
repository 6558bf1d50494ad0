//! Constants for Tally storage
//!
//! Collection names, persisted paths and cache defaults shared by the reader,
//! the sales client and the batch jobs.

use std::time::Duration;

// ============================================================================
// COLLECTIONS
// ============================================================================

/// Recorded sales.
pub const SALES_COLLECTION: &str = "sales";

/// Expected purchases awaiting fulfillment.
pub const FORECASTS_COLLECTION: &str = "forecasts";

/// Registered customers.
pub const CUSTOMERS_COLLECTION: &str = "customers";

/// Account owners; the document's `email` field is the account id.
pub const USERS_COLLECTION: &str = "users";

/// Field linking a document to its owning account.
pub const OWNER_FIELD: &str = "ownerAccount";

/// Field flagging a forecast as fulfilled.
pub const FULFILLED_FIELD: &str = "fulfilled";

// ============================================================================
// METRICS PATHS
// ============================================================================

/// Collection of per-day documents, one field per account.
pub const DAILY_METRICS_COLLECTION: &str = "metrics/financial/daily";

/// Append-only collection of metric snapshots.
pub const METRICS_HISTORY_COLLECTION: &str = "metrics/financial/history";

/// Collection of per-account financial parameters.
pub const PARAMETERS_COLLECTION: &str = "metrics/financial/parameters";

// ============================================================================
// QUERY CACHE
// ============================================================================

/// Default time-to-live for cached query results (5 minutes)
pub const DEFAULT_QUERY_TTL: Duration = Duration::from_secs(300);

/// Default bound on cached query results
pub const DEFAULT_MAX_CACHE_ENTRIES: usize = 1000;
