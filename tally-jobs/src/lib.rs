//! Tally Jobs - Scheduled Aggregation
//!
//! The daily financial metrics batch and everything around it: the account
//! registry it enumerates, the ledger it writes, forecast reconciliation and
//! the scheduler-driven background task.

pub mod config;
pub mod constants;
pub mod daily;
pub mod forecasts;
pub mod ledger;
pub mod registry;
pub mod scheduler;

pub use config::DailyJobConfig;
pub use daily::{
    AccountReport, DailyAggregationJob, DailyJobMetrics, DailyJobSnapshot, JobState, RunSummary,
};
pub use forecasts::{reconcile_forecasts, Reconciliation};
pub use ledger::{HistoryEntry, MetricsLedger};
pub use registry::{AccountRegistry, StaticAccountRegistry, StoreAccountRegistry};
pub use scheduler::{
    daily_aggregation_task, until_next_run, ChannelScheduler, DailyScheduler, Scheduler,
};
