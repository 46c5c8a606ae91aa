//! Invoice creation and lifecycle.

use chrono::{DateTime, Utc};
use service_core::error::AppError;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

use crate::clients::{InvoiceCreatedNotification, WebhookClient};
use crate::models::{CreateInvoice, CreateLineItem, Invoice, InvoiceStatus, MeterResponse};
use crate::services::database::Database;
use crate::services::metrics::record_invoice_created;
use crate::tenant::TenantContext;

const BROADCAST_CAPACITY: usize = 64;
const INVOICE_NUMBER_MAX_LEN: usize = 21;

/// In-process notification published after an invoice is persisted.
#[derive(Debug, Clone)]
pub struct InvoiceCreatedEvent {
    pub invoice_id: i64,
    pub organization_id: i64,
    pub customer_id: i64,
    pub subscription_id: Option<i64>,
    pub rate_plan_id: Option<i64>,
    pub invoice_number: String,
    pub total_amount: rust_decimal::Decimal,
    pub billing_period_start: DateTime<Utc>,
    pub billing_period_end: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Summary of a bulk webhook resync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResyncSummary {
    pub total: usize,
    pub triggered: usize,
}

/// Creates invoices from metering results and publishes creation
/// notifications, in-process and to the downstream sync collaborator.
pub struct InvoiceService {
    db: Arc<Database>,
    webhook: Arc<WebhookClient>,
    events: broadcast::Sender<InvoiceCreatedEvent>,
}

impl InvoiceService {
    pub fn new(db: Arc<Database>, webhook: Arc<WebhookClient>) -> Self {
        let (events, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { db, webhook, events }
    }

    /// Subscribe to in-process invoice-created events.
    pub fn subscribe(&self) -> broadcast::Receiver<InvoiceCreatedEvent> {
        self.events.subscribe()
    }

    /// Create an invoice from a metering result.
    ///
    /// For subscription-scoped invoices the period-uniqueness guard runs
    /// first; the storage constraint backs it under races. Notification
    /// failures after the persist never roll the invoice back; the store is
    /// the source of truth.
    #[instrument(
        skip(self, ctx, meter),
        fields(organization_id = ctx.organization_id(), customer_id = customer_id)
    )]
    #[allow(clippy::too_many_arguments)]
    pub async fn create_from_meter(
        &self,
        ctx: &TenantContext,
        meter: &MeterResponse,
        customer_id: i64,
        subscription_id: Option<i64>,
        rate_plan_id: Option<i64>,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<Invoice, AppError> {
        let organization_id = ctx.organization_id();

        if let Some(subscription_id) = subscription_id {
            let exists = self
                .db
                .exists_for_period(organization_id, subscription_id, period_start, period_end)
                .await?;
            if exists {
                return Err(AppError::AlreadyExists(anyhow::anyhow!(
                    "Invoice already exists for subscription {} in period {} to {}",
                    subscription_id,
                    period_start,
                    period_end
                )));
            }
        }

        let invoice_number = generate_invoice_number(organization_id, customer_id, Utc::now());

        let line_items = meter
            .breakdown
            .iter()
            .enumerate()
            .map(|(idx, line)| CreateLineItem {
                line_number: idx as i32 + 1,
                description: line.label.clone(),
                calculation: Some(line.calculation.clone()),
                amount: line.amount,
                quantity: None,
                unit_price: None,
            })
            .collect();

        let input = CreateInvoice {
            organization_id,
            customer_id,
            subscription_id,
            rate_plan_id,
            invoice_number,
            total_amount: meter.total,
            model_type: meter.model_type.clone(),
            billing_period_start: period_start,
            billing_period_end: period_end,
            notes: None,
            line_items,
        };

        let invoice = self.db.save_invoice(&input).await?;
        record_invoice_created(&organization_id.to_string());

        // Local subscribers; a lagging or absent receiver is not an error.
        let _ = self.events.send(InvoiceCreatedEvent {
            invoice_id: invoice.id,
            organization_id: invoice.organization_id,
            customer_id: invoice.customer_id,
            subscription_id: invoice.subscription_id,
            rate_plan_id: invoice.rate_plan_id,
            invoice_number: invoice.invoice_number.clone(),
            total_amount: invoice.total_amount,
            billing_period_start: invoice.billing_period_start,
            billing_period_end: invoice.billing_period_end,
            created_at: invoice.created_at,
        });

        self.webhook.notify_invoice_created(notification_for(&invoice, ctx));

        Ok(invoice)
    }

    /// Fetch an invoice by id, scoped to the caller's tenant.
    pub async fn get_invoice(
        &self,
        ctx: &TenantContext,
        invoice_id: i64,
    ) -> Result<Invoice, AppError> {
        match self.db.find_by_id(invoice_id).await? {
            Some(invoice) if invoice.organization_id == ctx.organization_id() => Ok(invoice),
            _ => Err(AppError::NotFound(anyhow::anyhow!(
                "Invoice {} not found",
                invoice_id
            ))),
        }
    }

    /// Fetch an invoice by business number, scoped to the caller's tenant.
    pub async fn get_by_number(
        &self,
        ctx: &TenantContext,
        invoice_number: &str,
    ) -> Result<Invoice, AppError> {
        match self.db.find_by_number(invoice_number).await? {
            Some(invoice) if invoice.organization_id == ctx.organization_id() => Ok(invoice),
            _ => Err(AppError::NotFound(anyhow::anyhow!(
                "Invoice {} not found",
                invoice_number
            ))),
        }
    }

    pub async fn list_invoices(&self, ctx: &TenantContext) -> Result<Vec<Invoice>, AppError> {
        self.db.list_by_organization(ctx.organization_id()).await
    }

    pub async fn list_by_customer(
        &self,
        ctx: &TenantContext,
        customer_id: i64,
    ) -> Result<Vec<Invoice>, AppError> {
        self.db
            .list_by_customer(ctx.organization_id(), customer_id)
            .await
    }

    pub async fn list_by_subscription(
        &self,
        ctx: &TenantContext,
        subscription_id: i64,
    ) -> Result<Vec<Invoice>, AppError> {
        self.db
            .list_by_subscription(ctx.organization_id(), subscription_id)
            .await
    }

    pub async fn list_by_status(
        &self,
        ctx: &TenantContext,
        status: InvoiceStatus,
    ) -> Result<Vec<Invoice>, AppError> {
        self.db.list_by_status(ctx.organization_id(), status).await
    }

    pub async fn list_by_period(
        &self,
        ctx: &TenantContext,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Invoice>, AppError> {
        self.db.list_by_period(ctx.organization_id(), from, to).await
    }

    /// Move an invoice through its lifecycle. Illegal transitions are
    /// rejected; `VOID` is terminal.
    pub async fn update_status(
        &self,
        ctx: &TenantContext,
        invoice_id: i64,
        status: InvoiceStatus,
    ) -> Result<Invoice, AppError> {
        let invoice = self.get_invoice(ctx, invoice_id).await?;
        let current = invoice.status();
        if !current.can_transition_to(status) {
            return Err(AppError::InvalidState(anyhow::anyhow!(
                "Invoice {} cannot move from {} to {}",
                invoice.invoice_number,
                current.as_str(),
                status.as_str()
            )));
        }
        self.db
            .update_status(invoice_id, status)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice {} not found", invoice_id)))
    }

    /// Re-fire the invoice-created webhook for one invoice. Used to recover
    /// from downstream outages after the invoice was already persisted.
    pub async fn resync_invoice(
        &self,
        ctx: &TenantContext,
        invoice_id: i64,
    ) -> Result<(), AppError> {
        let invoice = self.get_invoice(ctx, invoice_id).await?;
        self.webhook.notify_invoice_created(notification_for(&invoice, ctx));
        info!(invoice_number = %invoice.invoice_number, "Webhook resync triggered");
        Ok(())
    }

    /// Re-fire the webhook for every invoice of the tenant, reporting how
    /// many notifications were triggered.
    pub async fn resync_all_invoices(
        &self,
        ctx: &TenantContext,
    ) -> Result<ResyncSummary, AppError> {
        let invoices = self.db.list_by_organization(ctx.organization_id()).await?;
        let total = invoices.len();
        let mut triggered = 0;

        for invoice in &invoices {
            self.webhook.notify_invoice_created(notification_for(invoice, ctx));
            triggered += 1;
        }

        if total > 0 {
            info!(
                organization_id = ctx.organization_id(),
                total, triggered, "Bulk webhook resync triggered"
            );
        } else {
            warn!(
                organization_id = ctx.organization_id(),
                "Bulk webhook resync requested but tenant has no invoices"
            );
        }

        Ok(ResyncSummary { total, triggered })
    }
}

fn notification_for(invoice: &Invoice, ctx: &TenantContext) -> InvoiceCreatedNotification {
    InvoiceCreatedNotification {
        invoice_id: invoice.id,
        organization_id: invoice.organization_id,
        customer_id: invoice.customer_id,
        invoice_number: invoice.invoice_number.clone(),
        total_amount: invoice.total_amount,
        credential: ctx.credential().to_string(),
    }
}

/// Deterministic invoice number: `INV-<base36(T)>` with
/// `T = now_millis + org * 10^12 + customer * 10^6`, bounded to 21 chars.
/// The base36 digits are truncated to their trailing characters when needed;
/// the tail carries the millisecond entropy.
pub fn generate_invoice_number(
    organization_id: i64,
    customer_id: i64,
    now: DateTime<Utc>,
) -> String {
    let t = now.timestamp_millis().max(0) as u128
        + organization_id.max(0) as u128 * 1_000_000_000_000
        + customer_id.max(0) as u128 * 1_000_000;

    let digits = to_base36(t);
    let budget = INVOICE_NUMBER_MAX_LEN - "INV-".len();
    let tail = if digits.len() > budget {
        &digits[digits.len() - budget..]
    } else {
        &digits[..]
    };

    format!("INV-{}", tail)
}

fn to_base36(mut value: u128) -> String {
    const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(ALPHABET[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8(digits).expect("base36 digits are ASCII")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn invoice_number_has_prefix_and_bound() {
        let now = Utc.with_ymd_and_hms(2026, 1, 20, 12, 0, 0).unwrap();
        let number = generate_invoice_number(42, 7, now);
        assert!(number.starts_with("INV-"));
        assert!(number.len() <= 21);
    }

    #[test]
    fn invoice_number_is_deterministic() {
        let now = Utc.with_ymd_and_hms(2026, 1, 20, 12, 0, 0).unwrap();
        assert_eq!(
            generate_invoice_number(42, 7, now),
            generate_invoice_number(42, 7, now)
        );
    }

    #[test]
    fn invoice_number_bounded_for_large_ids() {
        let now = Utc.with_ymd_and_hms(2026, 1, 20, 12, 0, 0).unwrap();
        let number = generate_invoice_number(i64::MAX, i64::MAX, now);
        assert!(number.len() <= 21);
        assert!(number.starts_with("INV-"));
    }

    #[test]
    fn invoice_numbers_differ_across_tenants() {
        let now = Utc.with_ymd_and_hms(2026, 1, 20, 12, 0, 0).unwrap();
        assert_ne!(
            generate_invoice_number(1, 1, now),
            generate_invoice_number(2, 1, now)
        );
    }

    #[test]
    fn base36_round_digits() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }
}
