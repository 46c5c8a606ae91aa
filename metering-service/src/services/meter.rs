//! Metering orchestration: resolve identifiers and window, count events,
//! price the usage.

use chrono::{DateTime, Duration, Utc};
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::clients::{RatePlanClient, SubscriptionClient};
use crate::models::{MeterRequest, MeterResponse, Subscription};
use crate::services::event_store::EventStore;
use crate::services::metrics::record_meter_request;
use crate::services::pricing;
use crate::tenant::TenantContext;

/// Orchestrates a single metering estimate: subscription resolution, rate
/// plan fetch, event counting, pricing.
#[derive(Clone)]
pub struct MeterService {
    event_store: Arc<EventStore>,
    rate_plans: Arc<RatePlanClient>,
    subscriptions: Arc<SubscriptionClient>,
}

impl MeterService {
    pub fn new(
        event_store: Arc<EventStore>,
        rate_plans: Arc<RatePlanClient>,
        subscriptions: Arc<SubscriptionClient>,
    ) -> Self {
        Self {
            event_store,
            rate_plans,
            subscriptions,
        }
    }

    /// Price the events recorded for the resolved window.
    ///
    /// When a subscription id is supplied, the product and rate plan are
    /// taken from the subscription and an absent window adopts the
    /// subscription's current billing period. The window contract is
    /// closed-open: `from` inclusive, `to` exclusive.
    #[instrument(skip(self, ctx, request), fields(organization_id = ctx.organization_id()))]
    pub async fn estimate(
        &self,
        ctx: &TenantContext,
        request: MeterRequest,
    ) -> Result<MeterResponse, AppError> {
        let org_id = ctx.organization_id();

        let mut product_id = request.product_id;
        let mut rate_plan_id = request.rate_plan_id;
        let mut subscription: Option<Subscription> = None;

        if let Some(subscription_id) = request.subscription_id {
            let sub = match self.subscriptions.get(ctx, subscription_id).await {
                Ok(sub) => sub,
                Err(AppError::NotFound(e)) => return Err(AppError::InvalidState(e)),
                Err(e) => return Err(e),
            };
            product_id = sub.product_id;
            rate_plan_id = Some(sub.rate_plan_id.ok_or_else(|| {
                AppError::InvalidState(anyhow::anyhow!(
                    "Subscription {} has no rate plan",
                    subscription_id
                ))
            })?);
            subscription = Some(sub);
        }

        let rate_plan_id = rate_plan_id.ok_or_else(|| {
            AppError::InvalidArgument(anyhow::anyhow!(
                "Either subscriptionId or ratePlanId is required"
            ))
        })?;

        let plan = match self.rate_plans.fetch(ctx, rate_plan_id).await {
            Ok(plan) => plan,
            Err(AppError::NotFound(e)) => return Err(AppError::InvalidState(e)),
            Err(e) => return Err(e),
        };

        let metric_id = request.billable_metric_id.or(plan.billable_metric_id);

        let now = Utc::now();
        let (from, to) = resolve_window(request.from, request.to, subscription.as_ref(), now)?;

        let event_count = self
            .event_store
            .count_events(
                org_id,
                from,
                to,
                request.subscription_id,
                product_id,
                Some(rate_plan_id),
                metric_id,
            )
            .await?;

        let response = pricing::price(&plan, event_count, now.date_naive());

        info!(
            organization_id = org_id,
            rate_plan_id,
            event_count,
            total = %response.total,
            "Metering estimate computed"
        );
        record_meter_request(&org_id.to_string(), "ok");

        Ok(response)
    }
}

/// Resolve the metering window.
///
/// Both halves absent with a subscription present: adopt the subscription's
/// current billing period, each half falling back to `now - 1h` / `now` when
/// the subscription lacks it. Otherwise a missing half falls back the same
/// way. The resolved window must satisfy `from < to`.
fn resolve_window(
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    subscription: Option<&Subscription>,
    now: DateTime<Utc>,
) -> Result<(DateTime<Utc>, DateTime<Utc>), AppError> {
    let default_from = now - Duration::hours(1);

    let (from, to) = match (from, to, subscription) {
        (None, None, Some(sub)) => (
            sub.current_billing_period_start.unwrap_or(default_from),
            sub.current_billing_period_end.unwrap_or(now),
        ),
        (from, to, _) => (from.unwrap_or(default_from), to.unwrap_or(now)),
    };

    if from >= to {
        return Err(AppError::InvalidArgument(anyhow::anyhow!(
            "Malformed window: from {} must precede to {}",
            from,
            to
        )));
    }

    Ok((from, to))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 20, 12, 0, 0).unwrap()
    }

    #[test]
    fn explicit_window_is_kept() {
        let (from, to) = resolve_window(
            Some(at("2026-01-01T00:00:00Z")),
            Some(at("2026-01-02T00:00:00Z")),
            None,
            now(),
        )
        .unwrap();
        assert_eq!(from, at("2026-01-01T00:00:00Z"));
        assert_eq!(to, at("2026-01-02T00:00:00Z"));
    }

    #[test]
    fn absent_window_adopts_subscription_period() {
        let sub = Subscription {
            subscription_id: 7,
            current_billing_period_start: Some(at("2026-01-01T00:00:00Z")),
            current_billing_period_end: Some(at("2026-01-08T00:00:00Z")),
            ..Default::default()
        };
        let (from, to) = resolve_window(None, None, Some(&sub), now()).unwrap();
        assert_eq!(from, at("2026-01-01T00:00:00Z"));
        assert_eq!(to, at("2026-01-08T00:00:00Z"));
    }

    #[test]
    fn partial_window_falls_back_to_now() {
        let sub = Subscription {
            subscription_id: 7,
            current_billing_period_start: Some(at("2026-01-01T00:00:00Z")),
            current_billing_period_end: Some(at("2026-01-08T00:00:00Z")),
            ..Default::default()
        };
        // One half supplied: the subscription period is not consulted.
        let (from, to) =
            resolve_window(Some(at("2026-01-19T00:00:00Z")), None, Some(&sub), now()).unwrap();
        assert_eq!(from, at("2026-01-19T00:00:00Z"));
        assert_eq!(to, now());
    }

    #[test]
    fn subscription_without_period_falls_back_per_half() {
        let sub = Subscription {
            subscription_id: 7,
            ..Default::default()
        };
        let (from, to) = resolve_window(None, None, Some(&sub), now()).unwrap();
        assert_eq!(from, now() - Duration::hours(1));
        assert_eq!(to, now());
    }

    #[test]
    fn inverted_window_is_rejected() {
        let err = resolve_window(
            Some(at("2026-01-02T00:00:00Z")),
            Some(at("2026-01-01T00:00:00Z")),
            None,
            now(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "INVALID_ARGUMENT");
    }
}
