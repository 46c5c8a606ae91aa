//! Billing-period monitor: the autonomous loop that closes billing periods
//! and generates exactly one invoice per closed period.

use chrono::{DateTime, Utc};
use service_core::error::AppError;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::clients::SubscriptionClient;
use crate::models::{MeterRequest, Subscription};
use crate::services::database::Database;
use crate::services::event_store::EventStore;
use crate::services::invoice::InvoiceService;
use crate::services::meter::MeterService;
use crate::services::metrics::{record_monitor_failure, record_monitor_tick};
use crate::services::token::ServiceTokenIssuer;
use crate::tenant::TenantContext;

/// Per-tick outcome, reported through logs and metrics only.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub organizations: usize,
    pub subscriptions_checked: usize,
    pub invoices_created: usize,
    pub failures: usize,
}

/// Periodic loop over every tenant's active subscriptions.
///
/// Idempotent under overlapping ticks: the repository's uniqueness invariant
/// is the guard, the monitor merely probes it first. Failure to process one
/// subscription never affects its siblings, and failure to process one
/// tenant never affects the others.
pub struct BillingPeriodMonitor {
    event_store: Arc<EventStore>,
    subscriptions: Arc<SubscriptionClient>,
    meter: Arc<MeterService>,
    invoices: Arc<InvoiceService>,
    db: Arc<Database>,
    tokens: Arc<ServiceTokenIssuer>,
    cadence: Duration,
    shutdown: CancellationToken,
}

impl BillingPeriodMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_store: Arc<EventStore>,
        subscriptions: Arc<SubscriptionClient>,
        meter: Arc<MeterService>,
        invoices: Arc<InvoiceService>,
        db: Arc<Database>,
        tokens: Arc<ServiceTokenIssuer>,
        cadence: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            event_store,
            subscriptions,
            meter,
            invoices,
            db,
            tokens,
            cadence,
            shutdown,
        }
    }

    /// Run ticks on a clock-aligned cadence until shutdown. On shutdown the
    /// loop stops enumerating new subscriptions; the in-flight invoice write
    /// is allowed to finish inside the current tick.
    pub async fn run(self) {
        info!(cadence_secs = self.cadence.as_secs(), "Billing-period monitor started");

        loop {
            let delay = delay_until_next_tick(Utc::now(), self.cadence);
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            if self.shutdown.is_cancelled() {
                break;
            }
            self.tick().await;
        }

        info!("Billing-period monitor stopped");
    }

    /// One monitoring pass over every tenant.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> TickSummary {
        let mut summary = TickSummary::default();

        let organization_ids = match self.event_store.list_organization_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                // Event store unreachable for enumeration is catastrophic
                // for this tick; the next tick retries.
                error!(error = %e, "Monitor tick aborted: cannot enumerate organizations");
                record_monitor_tick("aborted");
                return summary;
            }
        };

        if organization_ids.is_empty() {
            debug!("No organizations with recorded events, nothing to do");
            record_monitor_tick("completed");
            return summary;
        }

        for organization_id in organization_ids {
            if self.shutdown.is_cancelled() {
                warn!("Shutdown requested, stopping tick between tenants");
                break;
            }

            let credential = match self.tokens.issue(organization_id) {
                Ok(token) => token,
                Err(e) => {
                    // A broken credential issuer fails every tenant the same
                    // way; abort the tick instead of spamming per-tenant.
                    error!(error = %e, "Monitor tick aborted: credential issuer failed");
                    record_monitor_tick("aborted");
                    return summary;
                }
            };

            summary.organizations += 1;
            let ctx = TenantContext::new(organization_id, credential);
            match self.process_organization(&ctx).await {
                Ok(org_summary) => {
                    summary.subscriptions_checked += org_summary.subscriptions_checked;
                    summary.invoices_created += org_summary.invoices_created;
                    summary.failures += org_summary.failures;
                }
                Err(e) => {
                    error!(
                        organization_id,
                        error = %e,
                        "Failed to process organization, continuing with others"
                    );
                    summary.failures += 1;
                }
            }
        }

        info!(
            organizations = summary.organizations,
            subscriptions_checked = summary.subscriptions_checked,
            invoices_created = summary.invoices_created,
            failures = summary.failures,
            "Billing-period monitoring tick completed"
        );
        record_monitor_tick("completed");

        summary
    }

    /// Check every active subscription of one tenant, generating invoices for
    /// closed periods.
    #[instrument(skip(self, ctx), fields(organization_id = ctx.organization_id()))]
    async fn process_organization(&self, ctx: &TenantContext) -> Result<TickSummary, AppError> {
        let mut summary = TickSummary::default();
        let organization_id = ctx.organization_id();

        let subscriptions = self.subscriptions.list_active(ctx).await;
        if subscriptions.is_empty() {
            debug!(organization_id, "No active subscriptions");
            return Ok(summary);
        }

        for subscription in subscriptions {
            if self.shutdown.is_cancelled() {
                warn!(
                    organization_id,
                    "Shutdown requested, stopping tick between subscriptions"
                );
                break;
            }

            summary.subscriptions_checked += 1;
            match self.close_period_if_due(ctx, &subscription).await {
                Ok(true) => summary.invoices_created += 1,
                Ok(false) => {}
                Err(e) if e.is_already_exists() => {
                    // Expected under overlapping or retried ticks.
                    debug!(
                        organization_id,
                        subscription_id = subscription.subscription_id,
                        "Invoice already exists for closed period"
                    );
                }
                Err(e) => {
                    error!(
                        organization_id,
                        subscription_id = subscription.subscription_id,
                        error = %e,
                        "Failed to generate invoice, continuing with other subscriptions"
                    );
                    record_monitor_failure(&organization_id.to_string());
                    summary.failures += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Generate an invoice when the subscription's billing period has closed
    /// and no invoice covers it yet. Returns whether an invoice was created.
    async fn close_period_if_due(
        &self,
        ctx: &TenantContext,
        subscription: &Subscription,
    ) -> Result<bool, AppError> {
        let organization_id = ctx.organization_id();
        let subscription_id = subscription.subscription_id;

        let Some((period_start, period_end)) = closed_period(subscription, Utc::now()) else {
            return Ok(false);
        };

        let exists = self
            .db
            .exists_for_period(organization_id, subscription_id, period_start, period_end)
            .await?;
        if exists {
            debug!(
                organization_id,
                subscription_id, "Invoice already exists for period, skipping"
            );
            return Ok(false);
        }

        info!(
            organization_id,
            subscription_id,
            %period_start,
            %period_end,
            "Billing period closed, generating invoice"
        );

        let customer_id = subscription.customer_id.ok_or_else(|| {
            AppError::InvalidState(anyhow::anyhow!(
                "Subscription {} has no customer",
                subscription_id
            ))
        })?;

        let meter_response = self
            .meter
            .estimate(
                ctx,
                MeterRequest {
                    subscription_id: Some(subscription_id),
                    from: Some(period_start),
                    to: Some(period_end),
                    ..Default::default()
                },
            )
            .await?;

        let invoice = self
            .invoices
            .create_from_meter(
                ctx,
                &meter_response,
                customer_id,
                Some(subscription_id),
                subscription.rate_plan_id,
                period_start,
                period_end,
            )
            .await?;

        info!(
            organization_id,
            subscription_id,
            invoice_number = %invoice.invoice_number,
            total = %invoice.total_amount,
            line_items = invoice.line_items.len(),
            "Invoice generated for closed billing period"
        );

        Ok(true)
    }
}

/// The subscription's billing period, when it has closed: both bounds are
/// set and `now` has reached the end.
fn closed_period(
    subscription: &Subscription,
    now: DateTime<Utc>,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let (start, end) = subscription.current_period()?;
    if now >= end {
        Some((start, end))
    } else {
        None
    }
}

/// Delay until the next wall-clock multiple of `cadence`.
fn delay_until_next_tick(now: DateTime<Utc>, cadence: Duration) -> Duration {
    let cadence_ms = cadence.as_millis().max(1) as i64;
    let now_ms = now.timestamp_millis();
    let next_ms = (now_ms / cadence_ms + 1) * cadence_ms;
    Duration::from_millis((next_ms - now_ms) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn subscription(start: Option<&str>, end: Option<&str>) -> Subscription {
        Subscription {
            subscription_id: 1,
            current_billing_period_start: start.map(|s| at(s)),
            current_billing_period_end: end.map(|s| at(s)),
            ..Default::default()
        }
    }

    #[test]
    fn period_closes_once_end_is_reached() {
        let sub = subscription(Some("2026-01-01T00:00:00Z"), Some("2026-01-08T00:00:00Z"));
        assert!(closed_period(&sub, at("2026-01-07T23:59:59Z")).is_none());
        assert_eq!(
            closed_period(&sub, at("2026-01-08T00:00:00Z")),
            Some((at("2026-01-01T00:00:00Z"), at("2026-01-08T00:00:00Z")))
        );
        assert!(closed_period(&sub, at("2026-01-08T00:05:00Z")).is_some());
    }

    #[test]
    fn missing_period_bounds_never_close() {
        let now = at("2026-01-08T00:00:00Z");
        assert!(closed_period(&subscription(None, Some("2026-01-01T00:00:00Z")), now).is_none());
        assert!(closed_period(&subscription(Some("2026-01-01T00:00:00Z"), None), now).is_none());
        assert!(closed_period(&subscription(None, None), now).is_none());
    }

    #[test]
    fn ticks_align_to_cadence_boundaries() {
        let cadence = Duration::from_secs(600);
        let now = Utc.with_ymd_and_hms(2026, 1, 20, 12, 3, 0).unwrap();
        assert_eq!(delay_until_next_tick(now, cadence), Duration::from_secs(420));

        let on_boundary = Utc.with_ymd_and_hms(2026, 1, 20, 12, 10, 0).unwrap();
        assert_eq!(
            delay_until_next_tick(on_boundary, cadence),
            Duration::from_secs(600)
        );
    }
}
