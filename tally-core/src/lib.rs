//! Tally Core - Entity Types and Analytics
//!
//! Sales-domain data types plus the two pure algorithms that consume them:
//! forecast fulfillment matching and financial metrics. This crate does no
//! I/O; the document store and cache live in `tally-storage`.

use chrono::{DateTime, Utc};

pub mod clock;
pub mod entities;
pub mod error;
pub mod forecast;
pub mod metrics;
pub mod period;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Account identifier (the owning user's email).
pub type AccountId = String;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entities::{Customer, Fields, Forecast, LineItem, Record, Sale};
pub use error::{ConfigError, JobError, StoreError, TallyError, TallyResult, ValidationError};
pub use forecast::{is_fulfilled, sale_satisfies, ForecastMatcher, SalesIndex};
pub use metrics::{
    derive_parameters, DerivedParameters, FinancialMetrics, FinancialParameters, MetricsEngine,
    MetricsInputs, MetricsSnapshot,
};
pub use period::{local_date, CalendarDay, DateWindow, Period};
