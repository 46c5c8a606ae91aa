//! Invoice aggregate owned by this service.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Invoice status. Transitions are `DRAFT -> ISSUED -> {PAID, VOID, OVERDUE}`;
/// `VOID` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Draft,
    Issued,
    Paid,
    Void,
    Overdue,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "DRAFT",
            InvoiceStatus::Issued => "ISSUED",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::Void => "VOID",
            InvoiceStatus::Overdue => "OVERDUE",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "ISSUED" => InvoiceStatus::Issued,
            "PAID" => InvoiceStatus::Paid,
            "VOID" => InvoiceStatus::Void,
            "OVERDUE" => InvoiceStatus::Overdue,
            _ => InvoiceStatus::Draft,
        }
    }

    /// Whether `self -> next` is a legal lifecycle transition.
    pub fn can_transition_to(&self, next: InvoiceStatus) -> bool {
        matches!(
            (self, next),
            (InvoiceStatus::Draft, InvoiceStatus::Issued)
                | (
                    InvoiceStatus::Issued,
                    InvoiceStatus::Paid | InvoiceStatus::Void | InvoiceStatus::Overdue
                )
                | (InvoiceStatus::Overdue, InvoiceStatus::Paid | InvoiceStatus::Void)
        )
    }
}

/// Invoice header. Line items are exclusively owned by the invoice and are
/// attached by the repository on every read.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub id: i64,
    pub organization_id: i64,
    pub customer_id: i64,
    /// Null only for ad-hoc invoices; period-close invoices always carry it.
    pub subscription_id: Option<i64>,
    pub rate_plan_id: Option<i64>,
    pub invoice_number: String,
    pub total_amount: Decimal,
    pub model_type: Option<String>,
    pub billing_period_start: DateTime<Utc>,
    pub billing_period_end: DateTime<Utc>,
    pub status: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[sqlx(skip)]
    #[serde(default)]
    pub line_items: Vec<InvoiceLineItem>,
}

impl Invoice {
    pub fn status(&self) -> InvoiceStatus {
        InvoiceStatus::from_string(&self.status)
    }
}

/// Line item on an invoice, ordered by `line_number` starting at 1.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InvoiceLineItem {
    pub id: i64,
    pub invoice_id: i64,
    pub line_number: i32,
    pub description: String,
    pub calculation: Option<String>,
    pub amount: Decimal,
    pub quantity: Option<Decimal>,
    pub unit_price: Option<Decimal>,
}

/// Input for persisting a new invoice together with its line items.
#[derive(Debug, Clone)]
pub struct CreateInvoice {
    pub organization_id: i64,
    pub customer_id: i64,
    pub subscription_id: Option<i64>,
    pub rate_plan_id: Option<i64>,
    pub invoice_number: String,
    pub total_amount: Decimal,
    pub model_type: Option<String>,
    pub billing_period_start: DateTime<Utc>,
    pub billing_period_end: DateTime<Utc>,
    pub notes: Option<String>,
    pub line_items: Vec<CreateLineItem>,
}

/// Input for one line item of a new invoice.
#[derive(Debug, Clone)]
pub struct CreateLineItem {
    pub line_number: i32,
    pub description: String,
    pub calculation: Option<String>,
    pub amount: Decimal,
    pub quantity: Option<Decimal>,
    pub unit_price: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn void_is_terminal() {
        for next in [
            InvoiceStatus::Draft,
            InvoiceStatus::Issued,
            InvoiceStatus::Paid,
            InvoiceStatus::Overdue,
        ] {
            assert!(!InvoiceStatus::Void.can_transition_to(next));
        }
    }

    #[test]
    fn draft_only_issues() {
        assert!(InvoiceStatus::Draft.can_transition_to(InvoiceStatus::Issued));
        assert!(!InvoiceStatus::Draft.can_transition_to(InvoiceStatus::Paid));
        assert!(!InvoiceStatus::Draft.can_transition_to(InvoiceStatus::Void));
    }

    #[test]
    fn issued_fans_out() {
        assert!(InvoiceStatus::Issued.can_transition_to(InvoiceStatus::Paid));
        assert!(InvoiceStatus::Issued.can_transition_to(InvoiceStatus::Void));
        assert!(InvoiceStatus::Issued.can_transition_to(InvoiceStatus::Overdue));
        assert!(!InvoiceStatus::Issued.can_transition_to(InvoiceStatus::Draft));
    }
}
