//! Scheduler seam and the daily aggregation background task.
//!
//! The job never owns a timer. A [`Scheduler`] decides when the next run is
//! due, and [`daily_aggregation_task`] runs the job once per tick until the
//! shutdown signal or the scheduler ends.
//!
//! ```ignore
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let scheduler = DailyScheduler::from_config(job.config());
//! let handle = tokio::spawn(daily_aggregation_task(job, scheduler, shutdown_rx));
//!
//! // Later, trigger shutdown
//! let _ = shutdown_tx.send(true);
//! let metrics = handle.await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime, NaiveTime};
use tally_core::{Clock, SystemClock};
use tally_storage::DocumentStore;
use tokio::sync::{mpsc, watch};

use crate::config::DailyJobConfig;
use crate::daily::{DailyAggregationJob, DailyJobMetrics};
use crate::registry::AccountRegistry;

/// Source of run triggers.
#[async_trait]
pub trait Scheduler: Send {
    /// Wait until the next run is due. `None` means no more runs.
    async fn next_tick(&mut self) -> Option<()>;
}

/// Time until the next `run_at`, strictly after `now`, in local wall time.
///
/// Computed on naive local times, so a run scheduled across a DST change
/// fires an hour early or late once.
pub fn until_next_run(now: NaiveDateTime, run_at: NaiveTime) -> Duration {
    let today = now.date().and_time(run_at);
    let next = if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    };
    (next - now).to_std().unwrap_or(Duration::ZERO)
}

/// Fires once a day at a fixed local time.
#[derive(Debug, Clone)]
pub struct DailyScheduler {
    run_at: NaiveTime,
    clock: Arc<dyn Clock>,
}

impl DailyScheduler {
    pub fn new(run_at: NaiveTime) -> Self {
        Self::with_clock(run_at, Arc::new(SystemClock))
    }

    pub fn with_clock(run_at: NaiveTime, clock: Arc<dyn Clock>) -> Self {
        Self { run_at, clock }
    }

    pub fn from_config(config: &DailyJobConfig) -> Self {
        Self::new(config.run_at)
    }

    pub fn run_at(&self) -> NaiveTime {
        self.run_at
    }

    /// Delay until the next run from the clock's current time.
    pub fn delay(&self) -> Duration {
        let now = self.clock.now().with_timezone(&Local).naive_local();
        until_next_run(now, self.run_at)
    }
}

#[async_trait]
impl Scheduler for DailyScheduler {
    async fn next_tick(&mut self) -> Option<()> {
        let delay = self.delay();
        tracing::debug!(
            run_at = %self.run_at,
            delay_secs = delay.as_secs(),
            "Waiting for next daily run"
        );
        tokio::time::sleep(delay).await;
        Some(())
    }
}

/// Fires once per message received; ends when every sender is dropped.
///
/// Used for on-demand runs.
#[derive(Debug)]
pub struct ChannelScheduler {
    rx: mpsc::Receiver<()>,
}

impl ChannelScheduler {
    /// Create a scheduler and the sender that triggers it.
    pub fn new(buffer: usize) -> (mpsc::Sender<()>, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (tx, Self { rx })
    }
}

#[async_trait]
impl Scheduler for ChannelScheduler {
    async fn next_tick(&mut self) -> Option<()> {
        self.rx.recv().await
    }
}

/// Background task running the daily job once per scheduler tick.
///
/// Runs until the shutdown signal is received (or its sender dropped) or the
/// scheduler ends. A run in progress is never interrupted. Failed runs are
/// logged and the task keeps going.
///
/// Returns the job's metrics.
pub async fn daily_aggregation_task<S, R, T>(
    job: Arc<DailyAggregationJob<S, R>>,
    mut scheduler: T,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<DailyJobMetrics>
where
    S: DocumentStore + ?Sized,
    R: AccountRegistry + ?Sized,
    T: Scheduler,
{
    tracing::info!(
        run_at = %job.config().run_at,
        reconcile_forecasts = job.config().reconcile_forecasts,
        "Daily aggregation task started"
    );

    let already_shut_down = *shutdown_rx.borrow();
    if !already_shut_down {
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        tracing::info!("Daily aggregation task shutting down");
                        break;
                    }
                }

                tick = scheduler.next_tick() => {
                    if tick.is_none() {
                        tracing::info!("Scheduler ended, daily aggregation task stopping");
                        break;
                    }
                    if let Err(e) = job.run().await {
                        tracing::error!(error = %e, "Daily aggregation run failed");
                    }
                }
            }
        }
    }

    let snapshot = job.metrics().snapshot();
    tracing::info!(
        runs = snapshot.runs,
        accounts_processed = snapshot.accounts_processed,
        accounts_failed = snapshot.accounts_failed,
        forecasts_fulfilled = snapshot.forecasts_fulfilled,
        "Daily aggregation task completed"
    );

    Arc::clone(job.metrics())
}
