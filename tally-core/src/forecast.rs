//! Forecast fulfillment matching.
//!
//! A forecast is fulfilled by a *single* sale to the same client that
//! covers every forecast line: same product code and at least the forecast
//! quantity. Quantities are never summed across sales.
//!
//! The naive scan is O(forecasts x sales x lines^2). [`SalesIndex`] groups
//! sales by client once so repeated evaluation only walks candidate sales.

use std::collections::HashMap;

use crate::entities::{Forecast, LineItem, Sale};

/// Whether one sale alone covers every line of the forecast.
///
/// A forecast with no lines is never satisfied; there is nothing to confirm.
/// This departs from the vacuous reading of "every line is covered", under
/// which an empty forecast would match any sale to the same client.
pub fn sale_satisfies(forecast: &Forecast, sale: &Sale) -> bool {
    if sale.client_identifier != forecast.client_identifier {
        return false;
    }
    if forecast.line_items.is_empty() {
        return false;
    }
    forecast
        .line_items
        .iter()
        .all(|wanted| line_covered(wanted, &sale.line_items))
}

fn line_covered(wanted: &LineItem, sold: &[LineItem]) -> bool {
    sold.iter()
        .any(|item| item.product_code == wanted.product_code && item.units() >= wanted.units())
}

/// Whether the forecast is fulfilled, given all known sales.
///
/// Already-fulfilled forecasts short-circuit to `true`.
pub fn is_fulfilled(forecast: &Forecast, sales: &[Sale]) -> bool {
    if forecast.is_fulfilled() {
        return true;
    }
    sales.iter().any(|sale| sale_satisfies(forecast, sale))
}

/// Sales grouped by client identifier.
#[derive(Debug, Default)]
pub struct SalesIndex<'a> {
    by_client: HashMap<&'a str, Vec<&'a Sale>>,
}

impl<'a> SalesIndex<'a> {
    pub fn new(sales: &'a [Sale]) -> Self {
        let mut by_client: HashMap<&'a str, Vec<&'a Sale>> = HashMap::new();
        for sale in sales {
            by_client
                .entry(sale.client_identifier.as_str())
                .or_default()
                .push(sale);
        }
        Self { by_client }
    }

    pub fn candidates(&self, client_identifier: &str) -> &[&'a Sale] {
        self.by_client
            .get(client_identifier)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Same answer as [`is_fulfilled`], walking only this client's sales.
    pub fn is_fulfilled(&self, forecast: &Forecast) -> bool {
        if forecast.is_fulfilled() {
            return true;
        }
        self.candidates(&forecast.client_identifier)
            .iter()
            .any(|sale| sale_satisfies(forecast, sale))
    }
}

/// Evaluates batches of forecasts against a fixed set of sales.
#[derive(Debug)]
pub struct ForecastMatcher<'a> {
    index: SalesIndex<'a>,
}

impl<'a> ForecastMatcher<'a> {
    pub fn new(sales: &'a [Sale]) -> Self {
        Self {
            index: SalesIndex::new(sales),
        }
    }

    pub fn is_fulfilled(&self, forecast: &Forecast) -> bool {
        self.index.is_fulfilled(forecast)
    }

    /// Ids of forecasts that are not yet flagged but are now satisfied.
    ///
    /// Does not touch the flags; callers apply them once persisted.
    pub fn newly_fulfilled<'f>(&self, forecasts: &'f [Forecast]) -> Vec<&'f Forecast> {
        forecasts
            .iter()
            .filter(|f| !f.is_fulfilled() && self.index.is_fulfilled(f))
            .collect()
    }

    /// Evaluate and apply in memory. Returns how many flags flipped.
    pub fn apply(&self, forecasts: &mut [Forecast]) -> usize {
        let mut flipped = 0;
        for forecast in forecasts.iter_mut() {
            if !forecast.is_fulfilled()
                && self.index.is_fulfilled(forecast)
                && forecast.mark_fulfilled()
            {
                flipped += 1;
            }
        }
        flipped
    }
}
