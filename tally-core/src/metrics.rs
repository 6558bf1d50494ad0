//! Financial metrics: acquisition cost, lifetime value, churn and margin.
//!
//! Every formula is total. A zero denominator yields `0.0` (or `None` for the
//! LTV/CAC ratio) and non-finite intermediate results are clamped to `0.0`,
//! so a dashboard built on partial data never shows `NaN` or infinity.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::entities::{Customer, Sale};
use crate::period::DateWindow;
use crate::{AccountId, Timestamp};

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Customer acquisition cost: marketing spend per new customer.
pub fn cac(marketing_spend: f64, new_customers: u64) -> f64 {
    if new_customers == 0 {
        return 0.0;
    }
    finite_or_zero(marketing_spend / new_customers as f64)
}

/// Expected customer lifetime in periods, from a churn percentage (5 = 5%).
pub fn average_lifetime(churn_rate: f64) -> f64 {
    if churn_rate > 0.0 {
        finite_or_zero(100.0 / churn_rate)
    } else {
        0.0
    }
}

/// Lifetime value: revenue per customer over the expected lifetime.
pub fn ltv(average_ticket: f64, purchase_frequency: f64, average_lifetime: f64) -> f64 {
    finite_or_zero(average_ticket * purchase_frequency * average_lifetime)
}

/// Lifetime financial value: LTV weighted by gross margin percentage.
pub fn lifv(ltv: f64, gross_margin_percent: f64) -> f64 {
    finite_or_zero(ltv * (gross_margin_percent / 100.0))
}

/// Periods needed to recover CAC from margin-weighted revenue.
pub fn cac_payback_period(
    cac: f64,
    average_ticket: f64,
    purchase_frequency: f64,
    gross_margin_percent: f64,
) -> f64 {
    let denominator = average_ticket * purchase_frequency * (gross_margin_percent / 100.0);
    if cac == 0.0 || denominator == 0.0 {
        return 0.0;
    }
    finite_or_zero(cac / denominator)
}

/// Gross margin percentage of revenue.
pub fn gross_margin(total_revenue: f64, direct_cost: f64) -> f64 {
    if total_revenue == 0.0 {
        return 0.0;
    }
    finite_or_zero((total_revenue - direct_cost) / total_revenue * 100.0)
}

/// LTV to CAC ratio; not applicable when CAC is zero.
pub fn ltv_cac_ratio(ltv: f64, cac: f64) -> Option<f64> {
    if cac == 0.0 {
        return None;
    }
    let ratio = ltv / cac;
    ratio.is_finite().then_some(ratio)
}

/// User-editable parameters that cannot be derived from transactions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FinancialParameters {
    pub marketing_spend: f64,
    /// Churn as a percentage number.
    pub churn_rate: f64,
    /// Explicit gross margin percentage. Takes precedence over `direct_cost`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gross_margin_percent: Option<f64>,
    /// Direct cost used to derive gross margin from revenue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direct_cost: Option<f64>,
}

/// Parameters computed from raw sale and customer rows for a window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedParameters {
    pub new_customers: u64,
    pub average_ticket: f64,
    pub purchase_frequency: f64,
    pub total_revenue: f64,
    pub sales_count: u64,
    pub buying_customers: u64,
}

/// Derive acquisition and purchasing parameters for a window.
///
/// Sales without a timestamp or client, and customers without a
/// registration timestamp, contribute nothing.
pub fn derive_parameters<W: DateWindow>(
    sales: &[Sale],
    customers: &[Customer],
    window: &W,
) -> DerivedParameters {
    let mut total_revenue = 0.0;
    let mut sales_count = 0u64;
    let mut buyers: HashSet<&str> = HashSet::new();

    for sale in sales {
        let Some(at) = sale.occurred_at else {
            continue;
        };
        if !window.contains(at) {
            continue;
        }
        sales_count += 1;
        total_revenue += finite_or_zero(sale.amount);
        if !sale.client_identifier.is_empty() {
            buyers.insert(sale.client_identifier.as_str());
        }
    }

    let new_customers = customers
        .iter()
        .filter(|c| c.registered_at.is_some_and(|at| window.contains(at)))
        .count() as u64;

    let average_ticket = if sales_count == 0 {
        0.0
    } else {
        total_revenue / sales_count as f64
    };
    let purchase_frequency = if buyers.is_empty() {
        0.0
    } else {
        sales_count as f64 / buyers.len() as f64
    };

    DerivedParameters {
        new_customers,
        average_ticket,
        purchase_frequency,
        total_revenue,
        sales_count,
        buying_customers: buyers.len() as u64,
    }
}

/// Complete input record for one metrics computation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsInputs {
    pub marketing_spend: f64,
    pub new_customers: u64,
    pub churn_rate: f64,
    pub average_ticket: f64,
    pub purchase_frequency: f64,
    pub gross_margin_percent: f64,
}

impl MetricsInputs {
    /// Combine derived parameters with the user-editable ones.
    ///
    /// Gross margin comes from the explicit percentage if present, otherwise
    /// from revenue against direct cost, otherwise zero.
    pub fn from_derived(derived: &DerivedParameters, params: &FinancialParameters) -> Self {
        let gross_margin_percent = match (params.gross_margin_percent, params.direct_cost) {
            (Some(percent), _) => percent,
            (None, Some(cost)) => gross_margin(derived.total_revenue, cost),
            (None, None) => 0.0,
        };
        Self {
            marketing_spend: params.marketing_spend,
            new_customers: derived.new_customers,
            churn_rate: params.churn_rate,
            average_ticket: derived.average_ticket,
            purchase_frequency: derived.purchase_frequency,
            gross_margin_percent,
        }
    }
}

/// Output of one metrics computation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialMetrics {
    pub cac: f64,
    pub ltv: f64,
    pub lifv: f64,
    pub average_lifetime: f64,
    pub cac_payback_period: f64,
    pub churn_rate: f64,
    pub gross_margin: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ltv_cac_ratio: Option<f64>,
}

/// Metrics stamped with owner and computation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    #[serde(flatten)]
    pub metrics: FinancialMetrics,
    pub computed_at: Timestamp,
    pub owner_account: AccountId,
}

/// Stateless metrics calculator.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsEngine;

impl MetricsEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn compute(&self, inputs: &MetricsInputs) -> FinancialMetrics {
        let cac = cac(inputs.marketing_spend, inputs.new_customers);
        let average_lifetime = average_lifetime(inputs.churn_rate);
        let ltv = ltv(inputs.average_ticket, inputs.purchase_frequency, average_lifetime);

        FinancialMetrics {
            cac,
            ltv,
            lifv: lifv(ltv, inputs.gross_margin_percent),
            average_lifetime,
            cac_payback_period: cac_payback_period(
                cac,
                inputs.average_ticket,
                inputs.purchase_frequency,
                inputs.gross_margin_percent,
            ),
            churn_rate: inputs.churn_rate,
            gross_margin: inputs.gross_margin_percent,
            ltv_cac_ratio: ltv_cac_ratio(ltv, cac),
        }
    }

    pub fn snapshot(
        &self,
        inputs: &MetricsInputs,
        owner_account: impl Into<AccountId>,
        computed_at: Timestamp,
    ) -> MetricsSnapshot {
        MetricsSnapshot {
            metrics: self.compute(inputs),
            computed_at,
            owner_account: owner_account.into(),
        }
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// No combination of finite inputs produces a non-finite metric.
        #[test]
        fn prop_metrics_are_always_finite(
            marketing_spend in -1e9f64..1e9,
            new_customers in 0u64..10_000,
            churn_rate in -100f64..100.0,
            average_ticket in -1e6f64..1e6,
            purchase_frequency in 0f64..100.0,
            gross_margin_percent in -200f64..200.0,
        ) {
            let metrics = MetricsEngine::new().compute(&MetricsInputs {
                marketing_spend,
                new_customers,
                churn_rate,
                average_ticket,
                purchase_frequency,
                gross_margin_percent,
            });
            prop_assert!(metrics.cac.is_finite());
            prop_assert!(metrics.ltv.is_finite());
            prop_assert!(metrics.lifv.is_finite());
            prop_assert!(metrics.average_lifetime.is_finite());
            prop_assert!(metrics.cac_payback_period.is_finite());
            if let Some(ratio) = metrics.ltv_cac_ratio {
                prop_assert!(ratio.is_finite());
            }
        }

        /// CAC is zero exactly when there are no new customers or no spend.
        #[test]
        fn prop_cac_zero_without_customers(spend in 0f64..1e7) {
            prop_assert_eq!(cac(spend, 0), 0.0);
        }
    }
}
