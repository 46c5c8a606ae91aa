//! Metering request and priced result.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Parameters for a metering estimate. When `subscription_id` is supplied the
/// product and rate plan are resolved from the subscription, and an absent
/// window adopts the subscription's current billing period.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MeterRequest {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub subscription_id: Option<i64>,
    pub product_id: Option<i64>,
    pub rate_plan_id: Option<i64>,
    pub billable_metric_id: Option<i64>,
}

/// One entry of the priced breakdown. `amount` is signed: positive amounts
/// are charges, negative amounts are credits or discounts. Zero-amount
/// entries (freemium, minimum-usage) are retained for operator transparency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakdownLine {
    pub label: String,
    pub calculation: String,
    pub amount: Decimal,
}

impl BreakdownLine {
    pub fn new(label: impl Into<String>, calculation: impl Into<String>, amount: Decimal) -> Self {
        Self {
            label: label.into(),
            calculation: calculation.into(),
            amount,
        }
    }
}

/// Priced metering result. `event_count` is always the real event count;
/// freemium and minimum-usage adjustments only affect the billed amounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterResponse {
    pub model_type: Option<String>,
    pub event_count: i64,
    pub breakdown: Vec<BreakdownLine>,
    pub total: Decimal,
}
