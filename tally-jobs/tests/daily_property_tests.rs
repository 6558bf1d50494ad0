//! Property-Based Tests for the Daily Aggregation Job
//!
//! **Property 1: Run Idempotence**
//!
//! For any number of runs over the same day, the daily record holds exactly
//! the last computation and the history holds one entry per run.
//!
//! **Property 2: Failure Isolation**
//!
//! For any set of accounts where some fail to persist, every other account
//! is still processed and recorded.

use std::sync::Arc;

use proptest::prelude::*;
use tally_jobs::{
    daily_aggregation_task, ChannelScheduler, DailyAggregationJob, DailyJobConfig,
    StaticAccountRegistry, StoreAccountRegistry,
};
use tally_test_utils::assertions::assert_metrics_finite;
use tally_test_utils::fixtures::{
    reference_parameters, seed_customer, seed_forecast, seed_parameters, seed_sale, seed_user,
};
use tally_test_utils::{local_noon, CalendarDay, InMemoryDocumentStore, ManualClock};
use tokio::runtime::Runtime;
use tokio::sync::watch;

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

fn test_runtime() -> Result<Runtime, TestCaseError> {
    Runtime::new().map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

fn day() -> CalendarDay {
    CalendarDay::from_ymd(2026, 9, 1).unwrap()
}

fn account(i: usize) -> String {
    format!("owner{}@x.com", i)
}

fn seeded_store(accounts: usize) -> Arc<InMemoryDocumentStore> {
    let store = Arc::new(InMemoryDocumentStore::new());
    for i in 0..accounts {
        let owner = account(i);
        seed_user(&store, &format!("u{}", i), &owner);
        seed_parameters(&store, &owner, &reference_parameters());
        seed_customer(&store, &format!("c{}", i), &owner, "2026-09-01");
        seed_sale(
            &store,
            &format!("s{}", i),
            &owner,
            "client",
            100.0 * (i + 1) as f64,
            "2026-09-01",
            &[("X", 2)],
        );
    }
    store
}

fn job<R>(
    store: Arc<InMemoryDocumentStore>,
    registry: Arc<R>,
) -> DailyAggregationJob<InMemoryDocumentStore, R>
where
    R: tally_jobs::AccountRegistry,
{
    DailyAggregationJob::with_clock(
        store,
        registry,
        DailyJobConfig::default(),
        Arc::new(ManualClock::new(local_noon(day()))),
    )
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// **Property 1: Run Idempotence**
    #[test]
    fn prop_reruns_upsert_daily_and_append_history(runs in 1usize..5, accounts in 1usize..4) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let store = seeded_store(accounts);
            let job = job(
                Arc::clone(&store),
                Arc::new(StoreAccountRegistry::new(Arc::clone(&store))),
            );

            for _ in 0..runs {
                let summary = job.run().await.map_err(|e| TestCaseError::fail(e.to_string()))?;
                prop_assert!(summary.is_clean());
                prop_assert_eq!(summary.processed.len(), accounts);
            }

            let history = job
                .ledger()
                .history()
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert_eq!(history.len(), runs * accounts);

            for i in 0..accounts {
                let owner = account(i);
                let latest = job
                    .ledger()
                    .latest(&day(), &owner)
                    .await
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                let latest = latest.ok_or_else(|| TestCaseError::fail("missing daily record"))?;
                // Spend 5000 over one new customer.
                prop_assert_eq!(latest.metrics.cac, 5000.0);
                assert_metrics_finite(&latest.metrics);
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// **Property 2: Failure Isolation**
    #[test]
    fn prop_failed_accounts_do_not_block_others(
        failing in prop::collection::vec(any::<bool>(), 1..6),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let store = seeded_store(failing.len());
            for (i, fails) in failing.iter().enumerate() {
                if *fails {
                    store.fail_path(format!("metrics/financial/parameters/{}", account(i)));
                }
            }
            let accounts: Vec<String> = (0..failing.len()).map(account).collect();
            let job = job(Arc::clone(&store), Arc::new(StaticAccountRegistry::new(accounts)));

            let summary = job.run().await.map_err(|e| TestCaseError::fail(e.to_string()))?;
            let expected_failed = failing.iter().filter(|f| **f).count();
            prop_assert_eq!(summary.failed.len(), expected_failed);
            prop_assert_eq!(summary.processed.len(), failing.len() - expected_failed);

            for (i, fails) in failing.iter().enumerate() {
                let latest = job
                    .ledger()
                    .latest(&day(), &account(i))
                    .await
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                prop_assert_eq!(latest.is_some(), !*fails);
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}

// ============================================================================
// TASK TESTS
// ============================================================================

#[tokio::test]
async fn test_on_demand_runs_reconcile_forecasts() {
    let store = seeded_store(1);
    let owner = account(0);
    seed_forecast(&store, "f-met", &owner, "client", &[("X", 1)], false);
    seed_forecast(&store, "f-open", &owner, "client", &[("Y", 1)], false);

    let job = Arc::new(job(
        Arc::clone(&store),
        Arc::new(StaticAccountRegistry::new([owner.clone()])),
    ));
    let (tx, scheduler) = ChannelScheduler::new(2);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    tx.send(()).await.unwrap();
    tx.send(()).await.unwrap();
    drop(tx);

    let metrics = daily_aggregation_task(Arc::clone(&job), scheduler, shutdown_rx).await;
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.runs, 2);
    assert_eq!(snapshot.accounts_processed, 2);
    // The second run finds f-met already fulfilled.
    assert_eq!(snapshot.forecasts_fulfilled, 1);

    assert_eq!(
        store.document("forecasts/f-met").unwrap().get_bool("fulfilled"),
        Some(true)
    );
    assert_eq!(
        store.document("forecasts/f-open").unwrap().get_bool("fulfilled"),
        Some(false)
    );
    assert_eq!(job.ledger().history_for(&owner).await.unwrap().len(), 2);
}
