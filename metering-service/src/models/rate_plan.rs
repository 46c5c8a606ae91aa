//! Rate-plan configuration document, fetched read-only from the rate-plan
//! catalog. A plan is a fixed record with optional pricing-model fields plus
//! modifier lists; the pricing engine dispatches on presence.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Composite rate plan. All bounds are non-negative; tier ranges are closed
/// intervals and a missing upper bound denotes +infinity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RatePlan {
    pub rate_plan_id: i64,
    pub rate_plan_name: Option<String>,
    pub billing_frequency: Option<String>,
    pub billable_metric_id: Option<i64>,

    pub flat_fee: Option<FlatFee>,
    pub usage_based_pricings: Vec<UsageBasedPricing>,
    pub tiered_pricings: Vec<TieredPricing>,
    pub volume_pricings: Vec<VolumePricing>,
    pub stair_step_pricings: Vec<StairStepPricing>,

    pub setup_fees: Vec<SetupFee>,
    pub freemiums: Vec<Freemium>,
    pub minimum_commitments: Vec<MinimumCommitment>,
    pub discounts: Vec<Discount>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FlatFee {
    #[serde(alias = "flatFeeAmount")]
    pub amount: Option<Decimal>,
    #[serde(alias = "numberOfApiCalls")]
    pub included_units: Option<i64>,
    #[serde(alias = "overageUnitRate")]
    pub overage_rate: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageBasedPricing {
    #[serde(alias = "perUnitAmount")]
    pub price_per_unit: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TieredPricing {
    pub tiers: Vec<Tier>,
    pub overage_unit_rate: Option<Decimal>,
}

/// Closed interval `[min_units, max_units]` with a per-unit rate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Tier {
    #[serde(alias = "startRange", alias = "usageStart")]
    pub min_units: Option<i64>,
    #[serde(alias = "endRange", alias = "usageEnd")]
    pub max_units: Option<i64>,
    #[serde(alias = "perUnitAmount", alias = "unitPrice")]
    pub price_per_unit: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VolumePricing {
    pub tiers: Vec<Tier>,
    pub overage_unit_rate: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StairStepPricing {
    #[serde(alias = "tiers")]
    pub steps: Vec<StairStep>,
    pub overage_unit_rate: Option<Decimal>,
}

/// Usage bucket billed at a flat charge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StairStep {
    #[serde(alias = "usageStart")]
    pub usage_threshold_start: Option<i64>,
    #[serde(alias = "usageEnd")]
    pub usage_threshold_end: Option<i64>,
    #[serde(alias = "flatCost", alias = "monthlyCharge")]
    pub flat_charge: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SetupFee {
    #[serde(alias = "setupFee")]
    pub amount: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Freemium {
    pub free_units: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MinimumCommitment {
    #[serde(alias = "minimumCharge")]
    pub minimum_amount: Option<Decimal>,
    pub minimum_usage: Option<i64>,
}

/// Discount kind declared by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountKind {
    Percentage,
    Flat,
}

impl DiscountKind {
    pub fn from_string(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PERCENTAGE" => Some(DiscountKind::Percentage),
            "FLAT" => Some(DiscountKind::Flat),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Discount {
    pub discount_type: Option<String>,
    #[serde(alias = "percentageDiscount")]
    pub percentage: Option<Decimal>,
    #[serde(alias = "flatDiscountAmount")]
    pub flat_amount: Option<Decimal>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl Discount {
    /// Declared kind, or a kind inferred from the populated field (flat
    /// preferred) when the label is absent or unrecognized.
    pub fn kind(&self) -> Option<DiscountKind> {
        if let Some(declared) = self
            .discount_type
            .as_deref()
            .and_then(DiscountKind::from_string)
        {
            return Some(declared);
        }
        if self.flat_amount.is_some() {
            Some(DiscountKind::Flat)
        } else if self.percentage.is_some() {
            Some(DiscountKind::Percentage)
        } else {
            None
        }
    }

    /// Whether the discount window `[start_date, end_date]` contains `today`.
    /// Absent bounds are open-ended.
    pub fn active_on(&self, today: NaiveDate) -> bool {
        if let Some(start) = self.start_date {
            if today < start {
                return false;
            }
        }
        if let Some(end) = self.end_date {
            if today > end {
                return false;
            }
        }
        true
    }
}
