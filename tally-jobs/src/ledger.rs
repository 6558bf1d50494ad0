//! Persisted metrics.
//!
//! Layout in the document store:
//!
//! - `metrics/financial/daily/{YYYY-MM-DD}`: one field per account holding
//!   that account's latest snapshot for the day, written with merge so
//!   accounts never overwrite each other.
//! - `metrics/financial/history`: one appended entry per computation.
//! - `metrics/financial/parameters/{account}`: user-editable inputs.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tally_core::{
    CalendarDay, Fields, FinancialParameters, MetricsSnapshot, TallyResult, ValidationError,
};
use tally_storage::constants::{
    DAILY_METRICS_COLLECTION, METRICS_HISTORY_COLLECTION, PARAMETERS_COLLECTION,
};
use tally_storage::{to_fields, DocumentStore};

use crate::constants::HISTORY_DATE_FIELD;

/// One appended history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(skip)]
    pub id: String,
    /// Calendar day the snapshot was computed for (`YYYY-MM-DD`).
    pub date: String,
    #[serde(flatten)]
    pub snapshot: MetricsSnapshot,
}

fn decode<T: serde::de::DeserializeOwned>(field: &str, value: Value) -> TallyResult<T> {
    serde_json::from_value(value).map_err(|e| {
        ValidationError::InvalidValue {
            field: field.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

/// Writer and reader for persisted metric snapshots.
pub struct MetricsLedger<S: DocumentStore + ?Sized> {
    store: Arc<S>,
}

impl<S: DocumentStore + ?Sized> Clone for MetricsLedger<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: DocumentStore + ?Sized> MetricsLedger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    fn daily_path(day: &CalendarDay) -> String {
        format!("{}/{}", DAILY_METRICS_COLLECTION, day.key())
    }

    /// Persist a snapshot: upsert the day's record for its account, then
    /// append a history entry. Returns the history entry id.
    ///
    /// Re-running for the same day replaces the daily record and adds a
    /// second history entry.
    pub async fn record(
        &self,
        day: &CalendarDay,
        snapshot: &MetricsSnapshot,
    ) -> TallyResult<String> {
        let mut daily = Fields::new();
        daily.insert(
            snapshot.owner_account.clone(),
            Value::Object(to_fields(snapshot)?),
        );
        self.store.set(&Self::daily_path(day), daily, true).await?;

        let mut entry = to_fields(snapshot)?;
        entry.insert(HISTORY_DATE_FIELD.to_string(), Value::String(day.key()));
        self.store.append(METRICS_HISTORY_COLLECTION, entry).await
    }

    /// Latest snapshot for `account` on `day`, if the job has run.
    pub async fn latest(
        &self,
        day: &CalendarDay,
        account: &str,
    ) -> TallyResult<Option<MetricsSnapshot>> {
        let Some(record) = self.store.get(&Self::daily_path(day)).await? else {
            return Ok(None);
        };
        match record.get(account) {
            Some(value) => decode(account, value.clone()).map(Some),
            None => Ok(None),
        }
    }

    /// Every history entry, in store order.
    pub async fn history(&self) -> TallyResult<Vec<HistoryEntry>> {
        let records = self.store.query(METRICS_HISTORY_COLLECTION, &[]).await?;
        records
            .into_iter()
            .map(|record| {
                let mut entry: HistoryEntry = decode(&record.id, Value::Object(record.fields))?;
                entry.id = record.id;
                Ok(entry)
            })
            .collect()
    }

    /// History entries for one account.
    pub async fn history_for(&self, account: &str) -> TallyResult<Vec<HistoryEntry>> {
        Ok(self
            .history()
            .await?
            .into_iter()
            .filter(|entry| entry.snapshot.owner_account == account)
            .collect())
    }

    /// User-editable parameters for `account`; zeros when never saved.
    pub async fn parameters(&self, account: &str) -> TallyResult<FinancialParameters> {
        let path = format!("{}/{}", PARAMETERS_COLLECTION, account);
        match self.store.get(&path).await? {
            Some(record) => decode(&path, Value::Object(record.fields)),
            None => Ok(FinancialParameters::default()),
        }
    }

    /// Save user-editable parameters for `account`.
    pub async fn save_parameters(
        &self,
        account: &str,
        params: &FinancialParameters,
    ) -> TallyResult<()> {
        let path = format!("{}/{}", PARAMETERS_COLLECTION, account);
        self.store.set(&path, to_fields(params)?, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tally_core::FinancialMetrics;
    use tally_storage::InMemoryDocumentStore;

    fn snapshot(account: &str, cac: f64) -> MetricsSnapshot {
        MetricsSnapshot {
            metrics: FinancialMetrics {
                cac,
                ..FinancialMetrics::default()
            },
            computed_at: Utc::now(),
            owner_account: account.to_string(),
        }
    }

    fn ledger() -> (Arc<InMemoryDocumentStore>, MetricsLedger<InMemoryDocumentStore>) {
        let store = Arc::new(InMemoryDocumentStore::new());
        (Arc::clone(&store), MetricsLedger::new(store))
    }

    #[tokio::test]
    async fn test_record_upserts_daily_and_appends_history() {
        let (_, ledger) = ledger();
        let day = CalendarDay::from_ymd(2026, 4, 1).unwrap();

        ledger.record(&day, &snapshot("a@x.com", 10.0)).await.unwrap();
        ledger.record(&day, &snapshot("a@x.com", 20.0)).await.unwrap();

        let latest = ledger.latest(&day, "a@x.com").await.unwrap().unwrap();
        assert_eq!(latest.metrics.cac, 20.0);

        let history = ledger.history().await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|e| e.date == "2026-04-01"));
        assert!(history.iter().all(|e| !e.id.is_empty()));
    }

    #[tokio::test]
    async fn test_accounts_share_daily_document() {
        let (store, ledger) = ledger();
        let day = CalendarDay::from_ymd(2026, 4, 1).unwrap();

        ledger.record(&day, &snapshot("a@x.com", 1.0)).await.unwrap();
        ledger.record(&day, &snapshot("b@x.com", 2.0)).await.unwrap();

        let daily = store.document("metrics/financial/daily/2026-04-01").unwrap();
        assert!(daily.get("a@x.com").is_some());
        assert!(daily.get("b@x.com").is_some());
        assert_eq!(ledger.history_for("b@x.com").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_latest_absent_before_first_run() {
        let (_, ledger) = ledger();
        let day = CalendarDay::from_ymd(2026, 4, 2).unwrap();
        assert!(ledger.latest(&day, "a@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_parameters_default_to_zero() {
        let (_, ledger) = ledger();
        let account = "a@x.com".to_string();
        assert_eq!(
            ledger.parameters(&account).await.unwrap(),
            FinancialParameters::default()
        );

        let params = FinancialParameters {
            marketing_spend: 5000.0,
            churn_rate: 5.0,
            gross_margin_percent: Some(40.0),
            direct_cost: None,
        };
        ledger.save_parameters(&account, &params).await.unwrap();
        assert_eq!(ledger.parameters(&account).await.unwrap(), params);
    }
}
