//! Tally Test Utilities
//!
//! Shared test infrastructure for the Tally workspace:
//! - Proptest generators for entities and metric inputs
//! - Store fixtures that seed documents in their persisted shape
//! - Custom assertions for Tally results and cache reads

pub use tally_storage::InMemoryDocumentStore;

pub use tally_core::{
    CalendarDay, Customer, Fields, FinancialMetrics, FinancialParameters, Forecast, LineItem,
    ManualClock, MetricsInputs, Record, Sale, StoreError, TallyError, TallyResult, Timestamp,
};

use chrono::{Local, TimeZone, Utc};
use serde_json::{json, Value};

/// Noon local time on `day`, as UTC.
pub fn local_noon(day: CalendarDay) -> Timestamp {
    let fallback = day.date().and_hms_opt(12, 0, 0).unwrap_or_default();
    Local
        .from_local_datetime(&fallback)
        .earliest()
        .map(|at| at.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&fallback))
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating Tally entity types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a Timestamp between 2020 and 2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64)
            .prop_map(|secs| chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now))
    }

    /// Generate a client identifier from a small pool, so sales and
    /// forecasts collide often.
    pub fn arb_client() -> impl Strategy<Value = String> {
        prop::sample::select(vec!["A", "B", "C"]).prop_map(str::to_string)
    }

    /// Generate a product code from a small pool.
    pub fn arb_product_code() -> impl Strategy<Value = String> {
        prop::sample::select(vec!["X", "Y", "Z"]).prop_map(str::to_string)
    }

    /// Generate a line item; a quarter of them carry no quantity and some
    /// carry fractional ones.
    pub fn arb_line_item() -> impl Strategy<Value = LineItem> {
        let quantity = prop_oneof![3 => (1u32..5).prop_map(f64::from), 1 => 0.5f64..5.0];
        (arb_product_code(), prop::option::weighted(0.75, quantity)).prop_map(|(code, qty)| {
            match qty {
                Some(qty) => LineItem::new(code, qty),
                None => LineItem::unquantified(code),
            }
        })
    }

    /// Generate a Sale for `owner`.
    pub fn arb_sale(owner: &'static str) -> impl Strategy<Value = Sale> {
        (
            "[a-z0-9]{6}",
            arb_client(),
            0.0f64..10_000.0,
            prop::option::of(arb_timestamp()),
            prop::collection::vec(arb_line_item(), 0..4),
        )
            .prop_map(move |(id, client, amount, at, items)| Sale {
                id,
                client_identifier: client,
                amount,
                occurred_at: at,
                line_items: items,
                owner_account: owner.to_string(),
                extra: Fields::new(),
            })
    }

    /// Generate an unfulfilled Forecast for `owner`.
    pub fn arb_forecast(owner: &'static str) -> impl Strategy<Value = Forecast> {
        (
            "[a-z0-9]{6}",
            arb_client(),
            prop::collection::vec(arb_line_item(), 0..3),
        )
            .prop_map(move |(id, client, items)| Forecast::new(id, client, owner, items))
    }

    /// Generate user-editable parameters, zeros included.
    pub fn arb_financial_parameters() -> impl Strategy<Value = FinancialParameters> {
        (
            prop_oneof![Just(0.0), 0.0f64..100_000.0],
            prop_oneof![Just(0.0), 0.0f64..100.0],
            prop::option::of(0.0f64..100.0),
            prop::option::of(0.0f64..100_000.0),
        )
            .prop_map(
                |(marketing_spend, churn_rate, gross_margin_percent, direct_cost)| {
                    FinancialParameters {
                        marketing_spend,
                        churn_rate,
                        gross_margin_percent,
                        direct_cost,
                    }
                },
            )
    }

    /// Generate metric inputs, zeros included.
    pub fn arb_metrics_inputs() -> impl Strategy<Value = MetricsInputs> {
        (
            prop_oneof![Just(0.0), 0.0f64..100_000.0],
            prop_oneof![Just(0u64), 0u64..1000],
            prop_oneof![Just(0.0), 0.0f64..100.0],
            prop_oneof![Just(0.0), 0.0f64..10_000.0],
            prop_oneof![Just(0.0), 0.0f64..50.0],
            prop_oneof![Just(0.0), 0.0f64..100.0],
        )
            .prop_map(
                |(
                    marketing_spend,
                    new_customers,
                    churn_rate,
                    average_ticket,
                    purchase_frequency,
                    gross_margin_percent,
                )| MetricsInputs {
                    marketing_spend,
                    new_customers,
                    churn_rate,
                    average_ticket,
                    purchase_frequency,
                    gross_margin_percent,
                },
            )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Store fixtures that write documents the way clients persist them.

    use super::*;

    /// Parameters from the reference example: spend 5000, churn 5%,
    /// margin 40%.
    pub fn reference_parameters() -> FinancialParameters {
        FinancialParameters {
            marketing_spend: 5000.0,
            churn_rate: 5.0,
            gross_margin_percent: Some(40.0),
            direct_cost: None,
        }
    }

    /// Inputs from the reference example: cac 100, lifetime 20, ltv 12000,
    /// lifv 4800.
    pub fn reference_inputs() -> MetricsInputs {
        MetricsInputs {
            marketing_spend: 5000.0,
            new_customers: 50,
            churn_rate: 5.0,
            average_ticket: 200.0,
            purchase_frequency: 3.0,
            gross_margin_percent: 40.0,
        }
    }

    fn items(lines: &[(&str, u32)]) -> Value {
        Value::Array(
            lines
                .iter()
                .map(|(code, qty)| json!({"productCode": code, "quantity": qty}))
                .collect(),
        )
    }

    /// Seed a sale dated `date` (`YYYY-MM-DD`, local midnight).
    pub fn seed_sale(
        store: &InMemoryDocumentStore,
        id: &str,
        owner: &str,
        client: &str,
        amount: f64,
        date: &str,
        lines: &[(&str, u32)],
    ) {
        store.insert(
            "sales",
            id,
            json!({
                "ownerAccount": owner,
                "clientIdentifier": client,
                "amount": amount,
                "date": date,
                "lineItems": items(lines),
            }),
        );
    }

    /// Seed a customer registered on `date`.
    pub fn seed_customer(store: &InMemoryDocumentStore, id: &str, owner: &str, date: &str) {
        store.insert(
            "customers",
            id,
            json!({"ownerAccount": owner, "registeredAt": date}),
        );
    }

    /// Seed a forecast.
    pub fn seed_forecast(
        store: &InMemoryDocumentStore,
        id: &str,
        owner: &str,
        client: &str,
        lines: &[(&str, u32)],
        fulfilled: bool,
    ) {
        store.insert(
            "forecasts",
            id,
            json!({
                "ownerAccount": owner,
                "clientIdentifier": client,
                "lineItems": items(lines),
                "fulfilled": fulfilled,
            }),
        );
    }

    /// Seed an account owner in the `users` collection.
    pub fn seed_user(store: &InMemoryDocumentStore, id: &str, email: &str) {
        store.insert("users", id, json!({"email": email}));
    }

    /// Seed `owner`'s financial parameters document.
    pub fn seed_parameters(
        store: &InMemoryDocumentStore,
        owner: &str,
        params: &FinancialParameters,
    ) {
        let value = serde_json::to_value(params).unwrap_or(Value::Null);
        store.insert("metrics/financial/parameters", owner, value);
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for Tally-specific validation.

    use super::*;
    use tally_storage::CacheRead;

    /// Assert that a TallyResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &TallyResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a TallyResult is a transient store failure.
    #[track_caller]
    pub fn assert_transient<T: std::fmt::Debug>(result: &TallyResult<T>) {
        match result {
            Err(e) if e.is_transient() => {}
            other => panic!("Expected transient store error, got: {:?}", other),
        }
    }

    /// Assert that a TallyResult is a NotFound store error.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &TallyResult<T>) {
        match result {
            Err(TallyError::Store(StoreError::NotFound { .. })) => {}
            other => panic!("Expected NotFound error, got: {:?}", other),
        }
    }

    /// Assert that the read was served from the cache.
    #[track_caller]
    pub fn assert_cache_hit<T>(read: &CacheRead<T>) {
        assert!(read.was_cache_hit(), "Expected a cache hit, got a store read");
    }

    /// Assert that the read was served by the store.
    #[track_caller]
    pub fn assert_cache_miss<T>(read: &CacheRead<T>) {
        assert!(read.was_cache_miss(), "Expected a store read, got a cache hit");
    }

    /// Assert that every metric is a finite number.
    #[track_caller]
    pub fn assert_metrics_finite(metrics: &FinancialMetrics) {
        for (name, value) in [
            ("cac", metrics.cac),
            ("ltv", metrics.ltv),
            ("lifv", metrics.lifv),
            ("average_lifetime", metrics.average_lifetime),
            ("cac_payback_period", metrics.cac_payback_period),
            ("churn_rate", metrics.churn_rate),
            ("gross_margin", metrics.gross_margin),
        ] {
            assert!(value.is_finite(), "{} is not finite: {}", name, value);
        }
        if let Some(ratio) = metrics.ltv_cac_ratio {
            assert!(ratio.is_finite(), "ltv_cac_ratio is not finite: {}", ratio);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tally_core::{MetricsEngine, ValidationError};

    #[test]
    fn test_reference_inputs_fixture() {
        let metrics = MetricsEngine::new().compute(&fixtures::reference_inputs());
        assert_eq!(metrics.cac, 100.0);
        assert_eq!(metrics.ltv, 12000.0);
        assert_eq!(metrics.lifv, 4800.0);
        assertions::assert_metrics_finite(&metrics);
    }

    #[test]
    fn test_seed_fixtures_use_persisted_shape() {
        let store = InMemoryDocumentStore::new();
        fixtures::seed_sale(&store, "s1", "o", "A", 10.0, "2026-01-02", &[("X", 2)]);
        fixtures::seed_forecast(&store, "f1", "o", "A", &[("X", 1)], false);
        fixtures::seed_parameters(&store, "o", &fixtures::reference_parameters());

        let sale = store.document("sales/s1").unwrap();
        assert_eq!(sale.get_str("clientIdentifier"), Some("A"));
        assert_eq!(store.document("forecasts/f1").unwrap().get_bool("fulfilled"), Some(false));
        assert!(store.document("metrics/financial/parameters/o").is_some());
    }

    #[test]
    fn test_local_noon_is_on_day() {
        let day = CalendarDay::from_ymd(2026, 7, 14).unwrap();
        assert_eq!(CalendarDay::of(local_noon(day)), day);
    }

    #[test]
    fn test_assert_not_found() {
        let result: TallyResult<()> = Err(StoreError::NotFound {
            path: "forecasts/x".to_string(),
        }
        .into());
        assertions::assert_not_found(&result);
    }

    #[test]
    #[should_panic(expected = "Expected transient store error")]
    fn test_assert_transient_rejects_validation() {
        let result: TallyResult<()> = Err(ValidationError::RequiredFieldMissing {
            field: "clientIdentifier".to_string(),
        }
        .into());
        assertions::assert_transient(&result);
    }

    proptest! {
        #[test]
        fn prop_generated_sales_belong_to_owner(sale in generators::arb_sale("o@x.com")) {
            prop_assert_eq!(sale.owner_account, "o@x.com");
            prop_assert!(sale.amount >= 0.0);
        }

        #[test]
        fn prop_generated_inputs_give_finite_metrics(inputs in generators::arb_metrics_inputs()) {
            let metrics = MetricsEngine::new().compute(&inputs);
            assertions::assert_metrics_finite(&metrics);
        }
    }
}
