//! Subscription shape returned by the subscription service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Subscription as reported by the subscription service. Billing-period
/// fields are ISO-8601 instants; translation from any legacy date format
/// belongs in the subscription service, not here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Subscription {
    pub subscription_id: i64,
    pub organization_id: Option<i64>,
    pub customer_id: Option<i64>,
    pub product_id: Option<i64>,
    pub rate_plan_id: Option<i64>,
    pub status: Option<String>,
    pub billing_frequency: Option<String>,
    pub current_billing_period_start: Option<DateTime<Utc>>,
    pub current_billing_period_end: Option<DateTime<Utc>>,
}

impl Subscription {
    /// The current billing period as a closed-open `[start, end)` window,
    /// if both bounds are present.
    pub fn current_period(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match (
            self.current_billing_period_start,
            self.current_billing_period_end,
        ) {
            (Some(start), Some(end)) => Some((start, end)),
            _ => None,
        }
    }
}
