//! Constants for Tally batch jobs

// ============================================================================
// DAILY AGGREGATION
// ============================================================================

/// Default local hour the daily aggregation runs at
pub const DEFAULT_DAILY_RUN_HOUR: u32 = 0;

/// Default local minute the daily aggregation runs at
pub const DEFAULT_DAILY_RUN_MINUTE: u32 = 5;

/// Field of a `users` document holding the account id
pub const ACCOUNT_EMAIL_FIELD: &str = "email";

/// Field of a history entry holding the calendar day it was computed for
pub const HISTORY_DATE_FIELD: &str = "date";
