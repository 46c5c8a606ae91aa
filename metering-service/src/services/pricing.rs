//! Pricing engine: a pure evaluator for the composite rate-plan model.
//!
//! Pipeline order is normative: freemium reduction, minimum-usage floor,
//! pricing models (flat fee, usage, tiered, volume, stair-step), setup fee,
//! discounts, minimum-charge floor, final rounding. Breakdown entries are
//! emitted in that order; every entry's amount is what accumulates into the
//! total, so line items always sum to it. Malformed sub-structures default to
//! zero and are skipped; the engine never fails.

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::models::{
    BreakdownLine, DiscountKind, MeterResponse, RatePlan, StairStep, StairStepPricing, Tier,
    TieredPricing, VolumePricing,
};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Price `actual_usage` billable units against `plan`.
///
/// `today` gates discount windows; apart from it the result depends only on
/// the inputs, so repeated invocations are bit-equal.
pub fn price(plan: &RatePlan, actual_usage: i64, today: NaiveDate) -> MeterResponse {
    let actual_usage = actual_usage.max(0);
    let mut lines: Vec<BreakdownLine> = Vec::new();
    let mut total = Decimal::ZERO;

    // Freemium: reduce billed usage before any pricing model runs.
    let free_units: i64 = plan
        .freemiums
        .iter()
        .filter_map(|f| f.free_units)
        .filter(|u| *u > 0)
        .sum();
    let applied_free = free_units.min(actual_usage);
    let mut billed_usage = actual_usage - applied_free;
    if applied_free > 0 {
        lines.push(BreakdownLine::new(
            "Freemium Credit",
            format!(
                "{} free units applied (actual usage: {}, billed: {})",
                applied_free, actual_usage, billed_usage
            ),
            Decimal::ZERO,
        ));
    }

    // Minimum-usage floor: raise billed usage to the committed minimum.
    let min_usage: i64 = plan
        .minimum_commitments
        .iter()
        .filter_map(|c| c.minimum_usage)
        .filter(|u| *u > 0)
        .max()
        .unwrap_or(0);
    if billed_usage < min_usage {
        let shortfall = min_usage - billed_usage;
        lines.push(BreakdownLine::new(
            "Minimum Usage Commitment",
            format!(
                "Billed for minimum {} units (billable: {}, added: {})",
                min_usage, billed_usage, shortfall
            ),
            Decimal::ZERO,
        ));
        billed_usage = min_usage;
    }

    let usage = billed_usage;

    if let Some(flat) = &plan.flat_fee {
        let base = round2(flat.amount.unwrap_or(Decimal::ZERO));
        lines.push(BreakdownLine::new("Flat Fee", "Base", base));
        total += base;

        let included = flat.included_units.unwrap_or(0);
        let over_rate = flat.overage_rate.unwrap_or(Decimal::ZERO);
        let over_units = (usage - included).max(0);
        if over_units > 0 && over_rate > Decimal::ZERO {
            let amount = round2(over_rate * Decimal::from(over_units));
            lines.push(BreakdownLine::new(
                "Overage Charges",
                format!("{} * {}", over_units, over_rate),
                amount,
            ));
            total += amount;
        }
    }

    for usage_pricing in &plan.usage_based_pricings {
        let per = usage_pricing.price_per_unit.unwrap_or(Decimal::ZERO);
        let amount = round2(per * Decimal::from(usage));
        lines.push(BreakdownLine::new(
            "Usage Charges",
            format!("{} * {}", per, usage),
            amount,
        ));
        total += amount;
    }

    for tiered in &plan.tiered_pricings {
        total += calc_tiered(tiered, usage, &mut lines);
    }

    for volume in &plan.volume_pricings {
        total += calc_volume(volume, usage, &mut lines);
    }

    for stair in &plan.stair_step_pricings {
        total += calc_stair(stair, usage, &mut lines);
    }

    let setup_sum: Decimal = plan
        .setup_fees
        .iter()
        .filter_map(|f| f.amount)
        .sum();
    if setup_sum > Decimal::ZERO {
        let amount = round2(setup_sum);
        lines.push(BreakdownLine::new("Setup Fee", "Fixed", amount));
        total += amount;
    }

    // Discounts apply to the running total, gated on today's date, and are
    // clipped so the total never goes negative.
    for discount in &plan.discounts {
        if !discount.active_on(today) {
            continue;
        }
        let (mut amount, label) = match discount.kind() {
            Some(DiscountKind::Percentage) => {
                let pct = discount.percentage.unwrap_or(Decimal::ZERO);
                if pct <= Decimal::ZERO {
                    continue;
                }
                (round2(total * pct / HUNDRED), format!("Discount ({}%)", pct))
            }
            Some(DiscountKind::Flat) => {
                let flat = discount.flat_amount.unwrap_or(Decimal::ZERO);
                if flat <= Decimal::ZERO {
                    continue;
                }
                (round2(flat), "Flat Discount".to_string())
            }
            None => continue,
        };
        if amount <= Decimal::ZERO {
            continue;
        }
        if amount > total {
            amount = total;
        }
        lines.push(BreakdownLine::new(label.clone(), label, -amount));
        total -= amount;
    }

    // Minimum-charge floor, applied after discounts.
    let min_charge = plan
        .minimum_commitments
        .iter()
        .filter_map(|c| c.minimum_amount)
        .max()
        .unwrap_or(Decimal::ZERO);
    if total > Decimal::ZERO && total < min_charge {
        let uplift = round2(min_charge - total);
        lines.push(BreakdownLine::new(
            "Minimum Charge Commitment",
            format!(
                "Final floor adjusted to minimum charge of {} (after discounts)",
                min_charge
            ),
            uplift,
        ));
        total = min_charge;
    }

    MeterResponse {
        model_type: plan.billing_frequency.clone(),
        event_count: actual_usage,
        breakdown: lines,
        total: round2(total),
    }
}

/// Graduated pricing: walk tiers low to high, each tier consuming up to its
/// capacity. Units left after the last tier are charged at the overage rate,
/// or at the last tier's rate when no overage rate is configured.
fn calc_tiered(pricing: &TieredPricing, usage: i64, lines: &mut Vec<BreakdownLine>) -> Decimal {
    let mut tiers: Vec<&Tier> = pricing.tiers.iter().collect();
    tiers.sort_by_key(|t| t.min_units.unwrap_or(0));

    let mut subtotal = Decimal::ZERO;
    let mut remaining = usage;

    for tier in &tiers {
        if remaining <= 0 {
            break;
        }
        let min = tier.min_units.unwrap_or(0);
        let capacity = match tier.max_units {
            Some(max) => max.saturating_sub(min).saturating_add(1),
            None => i64::MAX,
        };
        let price = tier.price_per_unit.unwrap_or(Decimal::ZERO);
        if usage >= min {
            let units = remaining.min(capacity);
            let amount = round2(price * Decimal::from(units));
            lines.push(BreakdownLine::new(
                format!("Tier {}-{}", min, bound_label(tier.max_units)),
                format!("{} * {}", units, price),
                amount,
            ));
            subtotal += amount;
            remaining -= units;
        }
    }

    if remaining > 0 {
        if let Some(last) = tiers.last() {
            let last_max = last.max_units.unwrap_or(0);
            let rate = match pricing.overage_unit_rate {
                Some(rate) if rate > Decimal::ZERO => rate,
                // No overage rate configured: the remainder is charged at the
                // last tier's rate rather than silently dropped.
                _ => last.price_per_unit.unwrap_or(Decimal::ZERO),
            };
            let amount = round2(rate * Decimal::from(remaining));
            let start = last_max + 1;
            let end = start + remaining - 1;
            lines.push(BreakdownLine::new(
                format!("Overage Units ({}-{})", start, end),
                format!("{} * {}", remaining, rate),
                amount,
            ));
            subtotal += amount;
        }
    }

    subtotal
}

/// All-or-nothing pricing: the whole usage is charged at the rate of the tier
/// containing it. Below the first tier the charge is zero; above the last the
/// overage rate applies, falling back to the last tier's rate.
fn calc_volume(pricing: &VolumePricing, usage: i64, lines: &mut Vec<BreakdownLine>) -> Decimal {
    let mut tiers: Vec<&Tier> = pricing.tiers.iter().collect();
    tiers.sort_by_key(|t| t.min_units.unwrap_or(0));
    if tiers.is_empty() {
        return Decimal::ZERO;
    }

    let mut chosen: Option<&Tier> = None;
    for tier in &tiers {
        let min = tier.min_units.unwrap_or(0);
        let max = tier.max_units.unwrap_or(i64::MAX);
        if usage >= min && usage <= max {
            chosen = Some(*tier);
            break;
        }
    }

    if chosen.is_none() {
        let first_min = tiers[0].min_units.unwrap_or(0);
        if usage < first_min {
            return Decimal::ZERO;
        }
        let last = tiers[tiers.len() - 1];
        let last_max = last.max_units.unwrap_or(i64::MAX);
        if usage > last_max {
            if let Some(rate) = pricing.overage_unit_rate.filter(|r| *r > Decimal::ZERO) {
                let amount = round2(rate * Decimal::from(usage));
                lines.push(BreakdownLine::new(
                    "Volume Overage Charge",
                    format!("{} * {}", usage, rate),
                    amount,
                ));
                return amount;
            }
            chosen = Some(last);
        }
    }

    match chosen {
        Some(tier) => {
            let price = tier.price_per_unit.unwrap_or(Decimal::ZERO);
            let min = tier.min_units.unwrap_or(0);
            let amount = round2(price * Decimal::from(usage));
            lines.push(BreakdownLine::new(
                format!("Volume Charge (Tier {}-{})", min, bound_label(tier.max_units)),
                format!("{} * {}", usage, price),
                amount,
            ));
            amount
        }
        None => Decimal::ZERO,
    }
}

/// Flat-per-bucket pricing: the step containing the usage contributes its
/// flat charge. Below the first step the charge is zero; above the last the
/// overage rate applies per unit, falling back to the last step's flat charge.
fn calc_stair(pricing: &StairStepPricing, usage: i64, lines: &mut Vec<BreakdownLine>) -> Decimal {
    let mut steps: Vec<&StairStep> = pricing.steps.iter().collect();
    steps.sort_by_key(|s| s.usage_threshold_start.unwrap_or(0));
    if steps.is_empty() {
        return Decimal::ZERO;
    }

    let mut chosen: Option<&StairStep> = None;
    for step in &steps {
        let start = step.usage_threshold_start.unwrap_or(0);
        let end = step.usage_threshold_end.unwrap_or(i64::MAX);
        if usage >= start && usage <= end {
            chosen = Some(*step);
            break;
        }
    }

    if chosen.is_none() {
        let first_start = steps[0].usage_threshold_start.unwrap_or(0);
        if usage < first_start {
            return Decimal::ZERO;
        }
        let last = steps[steps.len() - 1];
        let last_end = last.usage_threshold_end.unwrap_or(i64::MAX);
        if usage > last_end {
            if let Some(rate) = pricing.overage_unit_rate.filter(|r| *r > Decimal::ZERO) {
                let amount = round2(rate * Decimal::from(usage));
                lines.push(BreakdownLine::new(
                    "Stair Step Overage Charge",
                    format!("{} * {}", usage, rate),
                    amount,
                ));
                return amount;
            }
            chosen = Some(last);
        }
    }

    match chosen {
        Some(step) => {
            let charge = round2(step.flat_charge.unwrap_or(Decimal::ZERO));
            let start = step.usage_threshold_start.unwrap_or(0);
            lines.push(BreakdownLine::new(
                format!(
                    "Stair Step Charge (Step {}-{})",
                    start,
                    bound_label(step.usage_threshold_end)
                ),
                "Flat fee",
                charge,
            ));
            charge
        }
        None => Decimal::ZERO,
    }
}

fn bound_label(bound: Option<i64>) -> String {
    match bound {
        Some(b) => b.to_string(),
        None => "∞".to_string(),
    }
}

fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
