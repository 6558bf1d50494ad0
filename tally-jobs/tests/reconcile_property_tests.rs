//! Property-Based Tests for Forecast Reconciliation
//!
//! **Property 1: Persisted Flags Match Memory**
//!
//! For any forecasts and sales, a reconciliation pass persists
//! `fulfilled = true` for exactly the forecasts it flags in memory, and those
//! are exactly the forecasts some single sale satisfies.
//!
//! **Property 2: Fulfillment Is Monotonic**
//!
//! Reconciling again, against any other sales, never clears a flag.
//!
//! **Property 3: Metrics Stay Finite**
//!
//! For any saved financial parameters, including zeros, the daily job
//! records finite metrics.

use std::sync::Arc;

use proptest::prelude::*;
use serde_json::json;
use tally_core::{is_fulfilled, Forecast};
use tally_jobs::{reconcile_forecasts, DailyAggregationJob, DailyJobConfig, StaticAccountRegistry};
use tally_storage::{CachedSalesClient, CollectionReader, ReaderConfig};
use tally_test_utils::assertions::{
    assert_cache_hit, assert_cache_miss, assert_metrics_finite, assert_ok,
};
use tally_test_utils::fixtures::{seed_customer, seed_forecast, seed_parameters, seed_sale};
use tally_test_utils::generators::{arb_financial_parameters, arb_forecast, arb_sale};
use tally_test_utils::{local_noon, CalendarDay, InMemoryDocumentStore, ManualClock};
use tokio::runtime::Runtime;

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

const OWNER: &str = "o@x.com";

fn test_runtime() -> Result<Runtime, TestCaseError> {
    Runtime::new().map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

fn day() -> CalendarDay {
    CalendarDay::from_ymd(2026, 10, 1).unwrap()
}

/// Give generated forecasts distinct ids and store a document for each.
fn persist(store: &InMemoryDocumentStore, forecasts: &mut [Forecast]) {
    for (i, forecast) in forecasts.iter_mut().enumerate() {
        forecast.id = format!("f{}", i);
        let document = json!({"ownerAccount": OWNER, "fulfilled": false});
        store.insert("forecasts", &forecast.id, document);
    }
}

fn stored_flag(store: &InMemoryDocumentStore, id: &str) -> Option<bool> {
    store
        .document(&format!("forecasts/{}", id))
        .and_then(|record| record.get_bool("fulfilled"))
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// **Property 1: Persisted Flags Match Memory**
    #[test]
    fn prop_persisted_flags_match_memory(
        mut forecasts in prop::collection::vec(arb_forecast(OWNER), 0..8),
        sales in prop::collection::vec(arb_sale(OWNER), 0..8),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let store = InMemoryDocumentStore::new();
            persist(&store, &mut forecasts);
            let expected: Vec<bool> = forecasts.iter().map(|f| is_fulfilled(f, &sales)).collect();

            let outcome = reconcile_forecasts(&store, OWNER, &mut forecasts, &sales).await;
            prop_assert_eq!(outcome.write_failures, 0);
            prop_assert_eq!(
                outcome.fulfilled,
                expected.iter().filter(|e| **e).count() as u64
            );

            for (forecast, expected) in forecasts.iter().zip(expected) {
                prop_assert_eq!(forecast.is_fulfilled(), expected);
                prop_assert_eq!(stored_flag(&store, &forecast.id), Some(expected));
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// **Property 2: Fulfillment Is Monotonic**
    #[test]
    fn prop_reconciliation_never_clears_flags(
        mut forecasts in prop::collection::vec(arb_forecast(OWNER), 1..8),
        first in prop::collection::vec(arb_sale(OWNER), 0..8),
        second in prop::collection::vec(arb_sale(OWNER), 0..8),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let store = InMemoryDocumentStore::new();
            persist(&store, &mut forecasts);

            reconcile_forecasts(&store, OWNER, &mut forecasts, &first).await;
            let before: Vec<bool> = forecasts.iter().map(Forecast::is_fulfilled).collect();

            let again = reconcile_forecasts(&store, OWNER, &mut forecasts, &second).await;
            for (forecast, was) in forecasts.iter().zip(&before) {
                if *was {
                    prop_assert!(forecast.is_fulfilled());
                    prop_assert_eq!(stored_flag(&store, &forecast.id), Some(true));
                }
            }
            let newly = forecasts
                .iter()
                .zip(&before)
                .filter(|(f, was)| f.is_fulfilled() && !**was)
                .count() as u64;
            prop_assert_eq!(again.fulfilled, newly);
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// **Property 3: Metrics Stay Finite**
    #[test]
    fn prop_daily_metrics_finite_for_any_parameters(
        params in arb_financial_parameters(),
        sales in prop::collection::vec(arb_sale(OWNER), 0..6),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let store = Arc::new(InMemoryDocumentStore::new());
            seed_parameters(&store, OWNER, &params);
            seed_customer(&store, "c1", OWNER, "2026-10-01");
            for (i, sale) in sales.iter().enumerate() {
                let id = format!("s{}", i);
                let client = &sale.client_identifier;
                seed_sale(&store, &id, OWNER, client, sale.amount, "2026-10-01", &[]);
            }
            let job = DailyAggregationJob::with_clock(
                Arc::clone(&store),
                Arc::new(StaticAccountRegistry::new([OWNER])),
                DailyJobConfig::default(),
                Arc::new(ManualClock::new(local_noon(day()))),
            );

            let run = job.run().await;
            assert_ok(&run);
            let latest = job
                .ledger()
                .latest(&day(), OWNER)
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?
                .ok_or_else(|| TestCaseError::fail("missing daily record"))?;
            assert_metrics_finite(&latest.metrics);
            Ok::<(), TestCaseError>(())
        })?;
    }
}

// ============================================================================
// CACHED READS AFTER A RUN
// ============================================================================

#[tokio::test]
async fn test_cached_forecasts_refresh_only_on_bypass() {
    let store = Arc::new(InMemoryDocumentStore::new());
    seed_sale(&store, "s1", OWNER, "A", 50.0, "2026-10-01", &[("X", 3)]);
    seed_forecast(&store, "f1", OWNER, "A", &[("X", 2)], false);

    let client = CachedSalesClient::new(CollectionReader::new(
        Arc::clone(&store),
        ReaderConfig::default(),
    ));
    assert_cache_miss(&client.forecasts(OWNER, false).await.unwrap());

    let job = DailyAggregationJob::with_clock(
        Arc::clone(&store),
        Arc::new(StaticAccountRegistry::new([OWNER])),
        DailyJobConfig::default(),
        Arc::new(ManualClock::new(local_noon(day()))),
    );
    let run = job.run().await;
    assert_ok(&run);
    assert_eq!(run.unwrap().forecasts_fulfilled, 1);

    // The job writes straight to the store; the cached list is unchanged.
    let cached = client.forecasts(OWNER, false).await.unwrap();
    assert_cache_hit(&cached);
    assert!(!cached.value()[0].is_fulfilled());

    let fresh = client.forecasts(OWNER, true).await.unwrap();
    assert_cache_miss(&fresh);
    assert!(fresh.value()[0].is_fulfilled());
}
