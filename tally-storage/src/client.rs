//! Cached per-account client for interactive callers.
//!
//! Wraps a [`CollectionReader`] with the account-scoped queries the
//! dashboard issues, so every caller builds the same cache key for the same
//! query.

use tally_core::{
    derive_parameters, Customer, DateWindow, FinancialMetrics, FinancialParameters, Forecast,
    ForecastMatcher, MetricsEngine, MetricsInputs, Sale, StoreError, TallyResult,
};

use crate::cache::{CacheRead, QueryKey};
use crate::constants::{
    CUSTOMERS_COLLECTION, FORECASTS_COLLECTION, FULFILLED_FIELD, OWNER_FIELD, SALES_COLLECTION,
};
use crate::normalize::{decode_all, FromRecord};
use crate::reader::{CollectionReader, FetchOptions, FetchRequest};
use crate::store::{Constraint, DocumentStore};

/// The three collections a dashboard renders, fetched together.
#[derive(Debug, Clone)]
pub struct Dashboard {
    pub sales: CacheRead<Vec<Sale>>,
    pub forecasts: CacheRead<Vec<Forecast>>,
    pub customers: CacheRead<Vec<Customer>>,
}

impl Dashboard {
    /// Each forecast paired with whether the loaded sales fulfill it.
    pub fn fulfillment(&self) -> Vec<(&Forecast, bool)> {
        let matcher = ForecastMatcher::new(self.sales.value());
        self.forecasts
            .value()
            .iter()
            .map(|f| (f, matcher.is_fulfilled(f)))
            .collect()
    }

    /// Metrics over `window` from the loaded rows and user parameters.
    pub fn metrics<W: DateWindow>(
        &self,
        params: &FinancialParameters,
        window: &W,
    ) -> FinancialMetrics {
        let derived = derive_parameters(self.sales.value(), self.customers.value(), window);
        MetricsEngine::new().compute(&MetricsInputs::from_derived(&derived, params))
    }
}

/// Account-scoped reads and forecast overrides through a shared cache.
#[derive(Debug)]
pub struct CachedSalesClient<S: DocumentStore + ?Sized> {
    reader: CollectionReader<S>,
}

impl<S: DocumentStore + ?Sized> Clone for CachedSalesClient<S> {
    fn clone(&self) -> Self {
        Self {
            reader: self.reader.clone(),
        }
    }
}

impl<S: DocumentStore + ?Sized> CachedSalesClient<S> {
    pub fn new(reader: CollectionReader<S>) -> Self {
        Self { reader }
    }

    pub fn reader(&self) -> &CollectionReader<S> {
        &self.reader
    }

    /// Cache key for `collection` scoped to `account`.
    pub fn key(collection: &str, account: &str) -> QueryKey {
        QueryKey::new(collection, account).with_filter(OWNER_FIELD, account)
    }

    fn request(collection: &str, account: &str, bypass: bool) -> FetchRequest {
        FetchRequest::new(
            collection,
            vec![Constraint::eq(OWNER_FIELD, account)],
            FetchOptions::cached(Self::key(collection, account)).with_bypass(bypass),
        )
    }

    async fn scoped<T: FromRecord>(
        &self,
        collection: &str,
        account: &str,
        bypass: bool,
    ) -> TallyResult<CacheRead<Vec<T>>> {
        let request = Self::request(collection, account, bypass);
        self.reader
            .fetch_as(&request.collection, &request.constraints, &request.options)
            .await
    }

    pub async fn sales(&self, account: &str, bypass: bool) -> TallyResult<CacheRead<Vec<Sale>>> {
        self.scoped(SALES_COLLECTION, account, bypass).await
    }

    pub async fn forecasts(
        &self,
        account: &str,
        bypass: bool,
    ) -> TallyResult<CacheRead<Vec<Forecast>>> {
        self.scoped(FORECASTS_COLLECTION, account, bypass).await
    }

    pub async fn customers(
        &self,
        account: &str,
        bypass: bool,
    ) -> TallyResult<CacheRead<Vec<Customer>>> {
        self.scoped(CUSTOMERS_COLLECTION, account, bypass).await
    }

    /// Sales, forecasts and customers for `account` in one preload.
    pub async fn dashboard(&self, account: &str, bypass: bool) -> TallyResult<Dashboard> {
        let requests = [
            Self::request(SALES_COLLECTION, account, bypass),
            Self::request(FORECASTS_COLLECTION, account, bypass),
            Self::request(CUSTOMERS_COLLECTION, account, bypass),
        ];
        let mut reads = self.reader.preload(&requests).await?.into_iter();

        let mut next = || {
            reads.next().ok_or_else(|| StoreError::Unavailable {
                reason: "preload returned fewer results than requested".to_string(),
            })
        };
        let sales = next()?.map(|records| decode_all(&records));
        let forecasts = next()?.map(|records| decode_all(&records));
        let customers = next()?.map(|records| decode_all(&records));

        Ok(Dashboard {
            sales,
            forecasts,
            customers,
        })
    }

    /// Manually flag a forecast as fulfilled.
    ///
    /// Returns `false` if it already was. The flag is only ever raised; the
    /// account's cached forecast list is dropped after the write.
    pub async fn mark_forecast_fulfilled(
        &self,
        forecast_id: &str,
        account: &str,
    ) -> TallyResult<bool> {
        let path = format!("{}/{}", FORECASTS_COLLECTION, forecast_id);
        let record = self
            .reader
            .store()
            .get(&path)
            .await?
            .ok_or_else(|| StoreError::NotFound { path: path.clone() })?;

        let mut forecast = Forecast::from_record(&record)?;
        if !forecast.mark_fulfilled() {
            tracing::debug!(forecast_id, account, "Forecast already fulfilled");
            return Ok(false);
        }

        let mut partial = tally_core::Fields::new();
        partial.insert(FULFILLED_FIELD.to_string(), true.into());
        self.reader.store().update(&path, partial).await?;
        self.reader
            .invalidate(&Self::key(FORECASTS_COLLECTION, account).encode());

        tracing::info!(forecast_id, account, "Forecast marked fulfilled");
        Ok(true)
    }
}
