//! Fire-and-forget notifications to the accounting-sync collaborator.

use reqwest::Client;
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::services::metrics::record_webhook_notification;

/// Payload for the invoice-created webhook. The credential lets the receiver
/// authenticate back against this tenant when it fetches invoice details.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceCreatedNotification {
    pub invoice_id: i64,
    pub organization_id: i64,
    pub customer_id: i64,
    pub invoice_number: String,
    pub total_amount: Decimal,
    pub credential: String,
}

/// Client for the downstream sync collaborator.
///
/// Notifications are launched asynchronously and never propagate failure back
/// to invoice creation; the invoice store is the source of truth and a failed
/// notification is recovered by the resync operations.
pub struct WebhookClient {
    client: Arc<Client>,
    base_url: String,
}

impl WebhookClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client: Arc::new(client),
            base_url: base_url.into(),
        })
    }

    /// Notify the collaborator that an invoice was created. Fire-and-forget:
    /// the call runs on a spawned task and may be dropped on shutdown.
    #[instrument(skip(self, notification), fields(invoice_number = %notification.invoice_number))]
    pub fn notify_invoice_created(&self, notification: InvoiceCreatedNotification) {
        let client = self.client.clone();
        let url = format!("{}/webhook/invoice-created", self.base_url);
        let invoice_number = notification.invoice_number.clone();

        tokio::spawn(async move {
            let result = client.post(&url).json(&notification).send().await;
            match result.and_then(|r| r.error_for_status()) {
                Ok(_) => {
                    record_webhook_notification("ok");
                    info!(
                        invoice_number = %invoice_number,
                        "Invoice-created webhook delivered"
                    );
                }
                Err(e) => {
                    record_webhook_notification("error");
                    warn!(
                        invoice_number = %invoice_number,
                        error = %e,
                        "Invoice-created webhook failed"
                    );
                }
            }
        });
    }
}
