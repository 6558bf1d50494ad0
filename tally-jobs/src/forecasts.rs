//! Batch forecast reconciliation.

use tally_core::{Fields, Forecast, ForecastMatcher, Sale};
use tally_storage::constants::{FORECASTS_COLLECTION, FULFILLED_FIELD};
use tally_storage::DocumentStore;

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Forecasts persisted and flagged fulfilled in memory.
    pub fulfilled: u64,
    /// Forecasts that matched but whose write failed; left unfulfilled.
    pub write_failures: u64,
}

/// Flag every unfulfilled forecast that `sales` now satisfy.
///
/// Each newly fulfilled forecast is written as `forecasts/{id}.fulfilled =
/// true`; the in-memory flag is raised only once that write succeeds. A
/// failed write is logged and leaves the forecast for the next run.
pub async fn reconcile_forecasts<S: DocumentStore + ?Sized>(
    store: &S,
    account: &str,
    forecasts: &mut [Forecast],
    sales: &[Sale],
) -> Reconciliation {
    let matched: Vec<String> = ForecastMatcher::new(sales)
        .newly_fulfilled(forecasts)
        .into_iter()
        .map(|f| f.id.clone())
        .collect();

    let mut outcome = Reconciliation::default();
    for forecast in forecasts.iter_mut().filter(|f| matched.contains(&f.id)) {
        let path = format!("{}/{}", FORECASTS_COLLECTION, forecast.id);
        let mut partial = Fields::new();
        partial.insert(FULFILLED_FIELD.to_string(), true.into());

        match store.update(&path, partial).await {
            Ok(()) => {
                forecast.mark_fulfilled();
                outcome.fulfilled += 1;
                tracing::debug!(account, forecast_id = %forecast.id, "Forecast fulfilled");
            }
            Err(e) => {
                outcome.write_failures += 1;
                tracing::warn!(
                    account,
                    forecast_id = %forecast.id,
                    error = %e,
                    "Failed to persist forecast fulfillment"
                );
            }
        }
    }

    if outcome.fulfilled > 0 || outcome.write_failures > 0 {
        tracing::info!(
            account,
            fulfilled = outcome.fulfilled,
            write_failures = outcome.write_failures,
            "Forecast reconciliation completed"
        );
    }
    outcome
}
