//! Daily Financial Metrics Aggregation
//!
//! Once per day, for every registered account, recompute that day's metrics
//! from fresh store reads and persist them through the [`MetricsLedger`].
//!
//! - Accounts are processed one at a time, never concurrently.
//! - A failing account is logged and recorded in the [`RunSummary`]; the
//!   remaining accounts still run.
//! - Reads go straight to the store, never through the query cache.
//! - The window is the local calendar day (day, month and year of the
//!   server's local time). Sales recorded near midnight in another timezone
//!   can land on the neighbouring day.
//!
//! An account counts as failed if any of its reads or writes fail. Metrics
//! written before the failure stay written; the next run replaces them.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tally_core::{
    derive_parameters, AccountId, CalendarDay, Clock, Customer, Forecast, JobError, MetricsEngine,
    MetricsInputs, MetricsSnapshot, Sale, SystemClock, TallyResult,
};
use tally_storage::constants::{
    CUSTOMERS_COLLECTION, FORECASTS_COLLECTION, OWNER_FIELD, SALES_COLLECTION,
};
use tally_storage::{decode_all, Constraint, DocumentStore};

use crate::config::DailyJobConfig;
use crate::forecasts::{reconcile_forecasts, Reconciliation};
use crate::ledger::MetricsLedger;
use crate::registry::AccountRegistry;

// ============================================================================
// METRICS
// ============================================================================

/// Counters for daily aggregation activity since startup.
#[derive(Debug, Default)]
pub struct DailyJobMetrics {
    /// Runs started (rejected overlapping runs excluded)
    pub runs: AtomicU64,

    /// Accounts whose metrics were computed and persisted
    pub accounts_processed: AtomicU64,

    /// Accounts that failed
    pub accounts_failed: AtomicU64,

    /// Forecasts newly flagged fulfilled by reconciliation
    pub forecasts_fulfilled: AtomicU64,

    /// Forecast fulfillment writes that failed
    pub forecast_write_failures: AtomicU64,
}

impl DailyJobMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> DailyJobSnapshot {
        DailyJobSnapshot {
            runs: self.runs.load(Ordering::Relaxed),
            accounts_processed: self.accounts_processed.load(Ordering::Relaxed),
            accounts_failed: self.accounts_failed.load(Ordering::Relaxed),
            forecasts_fulfilled: self.forecasts_fulfilled.load(Ordering::Relaxed),
            forecast_write_failures: self.forecast_write_failures.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of daily job metrics at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DailyJobSnapshot {
    pub runs: u64,
    pub accounts_processed: u64,
    pub accounts_failed: u64,
    pub forecasts_fulfilled: u64,
    pub forecast_write_failures: u64,
}

// ============================================================================
// RUN RESULTS
// ============================================================================

/// Whether a run is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Running,
}

/// What one account's aggregation produced.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountReport {
    pub snapshot: MetricsSnapshot,
    pub history_id: String,
    /// `None` when reconciliation is disabled.
    pub reconciliation: Option<Reconciliation>,
}

/// Outcome of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub day: CalendarDay,
    /// Accounts whose metrics were persisted, in processing order.
    pub processed: Vec<AccountId>,
    /// Accounts that failed, with the reason.
    pub failed: Vec<(AccountId, String)>,
    pub forecasts_fulfilled: u64,
}

impl RunSummary {
    fn new(day: CalendarDay) -> Self {
        Self {
            day,
            processed: Vec::new(),
            failed: Vec::new(),
            forecasts_fulfilled: 0,
        }
    }

    /// True if no account failed.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ============================================================================
// JOB
// ============================================================================

/// Per-account daily metrics batch.
pub struct DailyAggregationJob<S, R>
where
    S: DocumentStore + ?Sized,
    R: AccountRegistry + ?Sized,
{
    store: Arc<S>,
    registry: Arc<R>,
    ledger: MetricsLedger<S>,
    config: DailyJobConfig,
    clock: Arc<dyn Clock>,
    engine: MetricsEngine,
    metrics: Arc<DailyJobMetrics>,
    running: AtomicBool,
}

impl<S, R> DailyAggregationJob<S, R>
where
    S: DocumentStore + ?Sized,
    R: AccountRegistry + ?Sized,
{
    pub fn new(store: Arc<S>, registry: Arc<R>, config: DailyJobConfig) -> Self {
        Self::with_clock(store, registry, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<S>,
        registry: Arc<R>,
        config: DailyJobConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger: MetricsLedger::new(Arc::clone(&store)),
            store,
            registry,
            config,
            clock,
            engine: MetricsEngine::new(),
            metrics: Arc::new(DailyJobMetrics::new()),
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &DailyJobConfig {
        &self.config
    }

    pub fn ledger(&self) -> &MetricsLedger<S> {
        &self.ledger
    }

    pub fn metrics(&self) -> &Arc<DailyJobMetrics> {
        &self.metrics
    }

    pub fn state(&self) -> JobState {
        if self.running.load(Ordering::Acquire) {
            JobState::Running
        } else {
            JobState::Idle
        }
    }

    /// Run for today's local calendar day.
    pub async fn run(&self) -> TallyResult<RunSummary> {
        let day = CalendarDay::today(self.clock.as_ref());
        self.run_for(day).await
    }

    /// Run for `day`.
    ///
    /// Fails only if a run is already in flight or the registry cannot be
    /// read; per-account failures are reported in the summary.
    pub async fn run_for(&self, day: CalendarDay) -> TallyResult<RunSummary> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!(day = %day, "Daily aggregation already running, skipping");
            return Err(JobError::AlreadyRunning.into());
        }
        let _guard = RunningGuard(&self.running);
        self.metrics.runs.fetch_add(1, Ordering::Relaxed);

        let accounts = match self.registry.accounts().await {
            Ok(accounts) => accounts,
            Err(e) => {
                tracing::error!(day = %day, error = %e, "Failed to list accounts");
                return Err(e);
            }
        };
        tracing::info!(day = %day, accounts = accounts.len(), "Daily aggregation started");

        let mut summary = RunSummary::new(day);
        for account in accounts {
            match self.process_account(&account, &day).await {
                Ok(report) => {
                    self.metrics
                        .accounts_processed
                        .fetch_add(1, Ordering::Relaxed);
                    if let Some(reconciliation) = report.reconciliation {
                        summary.forecasts_fulfilled += reconciliation.fulfilled;
                        self.metrics
                            .forecasts_fulfilled
                            .fetch_add(reconciliation.fulfilled, Ordering::Relaxed);
                        self.metrics
                            .forecast_write_failures
                            .fetch_add(reconciliation.write_failures, Ordering::Relaxed);
                    }
                    summary.processed.push(account);
                }
                Err(e) => {
                    self.metrics.accounts_failed.fetch_add(1, Ordering::Relaxed);
                    let failure = JobError::AccountFailed {
                        account: account.clone(),
                        reason: e.to_string(),
                    };
                    if self.config.log_failures {
                        tracing::error!(
                            day = %day,
                            account = %account,
                            error = %failure,
                            "Account aggregation failed"
                        );
                    }
                    summary.failed.push((account, e.to_string()));
                }
            }
        }

        tracing::info!(
            day = %day,
            processed = summary.processed.len(),
            failed = summary.failed.len(),
            forecasts_fulfilled = summary.forecasts_fulfilled,
            "Daily aggregation completed"
        );
        Ok(summary)
    }

    /// Compute and persist one account's metrics for `day`.
    pub async fn process_account(
        &self,
        account: &str,
        day: &CalendarDay,
    ) -> TallyResult<AccountReport> {
        let owned = [Constraint::eq(OWNER_FIELD, account)];

        let sales: Vec<Sale> = decode_all(&self.store.query(SALES_COLLECTION, &owned).await?);
        let customers: Vec<Customer> =
            decode_all(&self.store.query(CUSTOMERS_COLLECTION, &owned).await?);
        let params = self.ledger.parameters(account).await?;

        let derived = derive_parameters(&sales, &customers, day);
        let inputs = MetricsInputs::from_derived(&derived, &params);
        let snapshot = self.engine.snapshot(&inputs, account, self.clock.now());
        let history_id = self.ledger.record(day, &snapshot).await?;

        tracing::debug!(
            account,
            day = %day,
            sales = derived.sales_count,
            new_customers = derived.new_customers,
            cac = snapshot.metrics.cac,
            ltv = snapshot.metrics.ltv,
            "Account metrics recorded"
        );

        let reconciliation = if self.config.reconcile_forecasts {
            let mut forecasts: Vec<Forecast> =
                decode_all(&self.store.query(FORECASTS_COLLECTION, &owned).await?);
            Some(reconcile_forecasts(self.store.as_ref(), account, &mut forecasts, &sales).await)
        } else {
            None
        };

        Ok(AccountReport {
            snapshot,
            history_id,
            reconciliation,
        })
    }
}
