//! Invoice persistence.
//!
//! The invoice store is the only mutable resource in the core. Uniqueness of
//! one invoice per `(organization, subscription, period)` is enforced here by
//! a composite unique constraint; two concurrent creates for the same triple
//! resolve to one success and one `AlreadyExists`.

use chrono::{DateTime, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, instrument};

use crate::models::{CreateInvoice, Invoice, InvoiceLineItem, InvoiceStatus};
use crate::services::metrics::DB_QUERY_DURATION;

const INVOICE_COLUMNS: &str = "id, organization_id, customer_id, subscription_id, rate_plan_id, \
     invoice_number, total_amount, model_type, billing_period_start, billing_period_end, \
     status, notes, created_at, updated_at";

/// Database connection pool wrapper for the invoice store.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::StorageError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::StorageError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::StorageError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Persist an invoice and its line items in one transaction. The store
    /// ends up with header plus items, or neither.
    #[instrument(skip(self, input), fields(organization_id = input.organization_id))]
    pub async fn save_invoice(&self, input: &CreateInvoice) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["save_invoice"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::StorageError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let mut invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            INSERT INTO invoice (organization_id, customer_id, subscription_id, rate_plan_id,
                                 invoice_number, total_amount, model_type,
                                 billing_period_start, billing_period_end, status, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {INVOICE_COLUMNS}
            "#
        ))
        .bind(input.organization_id)
        .bind(input.customer_id)
        .bind(input.subscription_id)
        .bind(input.rate_plan_id)
        .bind(&input.invoice_number)
        .bind(input.total_amount)
        .bind(&input.model_type)
        .bind(input.billing_period_start)
        .bind(input.billing_period_end)
        .bind(InvoiceStatus::Draft.as_str())
        .bind(&input.notes)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::AlreadyExists(anyhow::anyhow!(
                    "Invoice already exists for subscription {:?} in period {} to {}",
                    input.subscription_id,
                    input.billing_period_start,
                    input.billing_period_end
                ))
            }
            _ => AppError::StorageError(anyhow::anyhow!("Failed to create invoice: {}", e)),
        })?;

        for item in &input.line_items {
            let line = sqlx::query_as::<_, InvoiceLineItem>(
                r#"
                INSERT INTO invoice_line_item (invoice_id, line_number, description, calculation,
                                               amount, quantity, unit_price)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING id, invoice_id, line_number, description, calculation, amount, quantity, unit_price
                "#,
            )
            .bind(invoice.id)
            .bind(item.line_number)
            .bind(&item.description)
            .bind(&item.calculation)
            .bind(item.amount)
            .bind(item.quantity)
            .bind(item.unit_price)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                AppError::StorageError(anyhow::anyhow!("Failed to create line item: {}", e))
            })?;
            invoice.line_items.push(line);
        }

        tx.commit().await.map_err(|e| {
            AppError::StorageError(anyhow::anyhow!("Failed to commit invoice: {}", e))
        })?;

        timer.observe_duration();
        info!(
            invoice_id = invoice.id,
            invoice_number = %invoice.invoice_number,
            line_items = invoice.line_items.len(),
            "Invoice created"
        );

        Ok(invoice)
    }

    /// Find an invoice by id with line items attached.
    #[instrument(skip(self))]
    pub async fn find_by_id(&self, invoice_id: i64) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_by_id"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoice WHERE id = $1"
        ))
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::StorageError(anyhow::anyhow!("Failed to get invoice: {}", e)))?;

        timer.observe_duration();
        self.attach_line_items_opt(invoice).await
    }

    /// Find an invoice by business number with line items attached.
    #[instrument(skip(self))]
    pub async fn find_by_number(&self, invoice_number: &str) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_by_number"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoice WHERE invoice_number = $1"
        ))
        .bind(invoice_number)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::StorageError(anyhow::anyhow!("Failed to get invoice: {}", e)))?;

        timer.observe_duration();
        self.attach_line_items_opt(invoice).await
    }

    /// All invoices for the tenant, newest first.
    #[instrument(skip(self))]
    pub async fn list_by_organization(&self, organization_id: i64) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_by_organization"])
            .start_timer();

        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoice WHERE organization_id = $1 ORDER BY created_at DESC"
        ))
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::StorageError(anyhow::anyhow!("Failed to list invoices: {}", e)))?;

        timer.observe_duration();
        self.attach_line_items(invoices).await
    }

    /// A customer's invoices within the tenant, newest first.
    #[instrument(skip(self))]
    pub async fn list_by_customer(
        &self,
        organization_id: i64,
        customer_id: i64,
    ) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_by_customer"])
            .start_timer();

        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoice \
             WHERE organization_id = $1 AND customer_id = $2 ORDER BY created_at DESC"
        ))
        .bind(organization_id)
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::StorageError(anyhow::anyhow!("Failed to list invoices: {}", e)))?;

        timer.observe_duration();
        self.attach_line_items(invoices).await
    }

    /// A subscription's invoices within the tenant, newest first.
    #[instrument(skip(self))]
    pub async fn list_by_subscription(
        &self,
        organization_id: i64,
        subscription_id: i64,
    ) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_by_subscription"])
            .start_timer();

        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoice \
             WHERE organization_id = $1 AND subscription_id = $2 ORDER BY created_at DESC"
        ))
        .bind(organization_id)
        .bind(subscription_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::StorageError(anyhow::anyhow!("Failed to list invoices: {}", e)))?;

        timer.observe_duration();
        self.attach_line_items(invoices).await
    }

    /// The tenant's invoices in a given status, newest first.
    #[instrument(skip(self))]
    pub async fn list_by_status(
        &self,
        organization_id: i64,
        status: InvoiceStatus,
    ) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_by_status"])
            .start_timer();

        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoice \
             WHERE organization_id = $1 AND status = $2 ORDER BY created_at DESC"
        ))
        .bind(organization_id)
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::StorageError(anyhow::anyhow!("Failed to list invoices: {}", e)))?;

        timer.observe_duration();
        self.attach_line_items(invoices).await
    }

    /// The tenant's invoices whose billing period falls inside `[from, to]`,
    /// newest first.
    #[instrument(skip(self))]
    pub async fn list_by_period(
        &self,
        organization_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_by_period"])
            .start_timer();

        let invoices = sqlx::query_as::<_, Invoice>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoice \
             WHERE organization_id = $1 AND billing_period_start >= $2 AND billing_period_end <= $3 \
             ORDER BY created_at DESC"
        ))
        .bind(organization_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::StorageError(anyhow::anyhow!("Failed to list invoices: {}", e)))?;

        timer.observe_duration();
        self.attach_line_items(invoices).await
    }

    /// The authoritative uniqueness probe: does an invoice already exist for
    /// this subscription and billing period?
    #[instrument(skip(self))]
    pub async fn exists_for_period(
        &self,
        organization_id: i64,
        subscription_id: i64,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["exists_for_period"])
            .start_timer();

        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM invoice
                WHERE organization_id = $1
                  AND subscription_id = $2
                  AND billing_period_start = $3
                  AND billing_period_end = $4
            )
            "#,
        )
        .bind(organization_id)
        .bind(subscription_id)
        .bind(period_start)
        .bind(period_end)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::StorageError(anyhow::anyhow!("Failed to probe invoice period: {}", e))
        })?;

        timer.observe_duration();

        Ok(exists)
    }

    /// Update an invoice's status, touching `updated_at`.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        invoice_id: i64,
        status: InvoiceStatus,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_status"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            "UPDATE invoice SET status = $2, updated_at = now() WHERE id = $1 \
             RETURNING {INVOICE_COLUMNS}"
        ))
        .bind(invoice_id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::StorageError(anyhow::anyhow!("Failed to update invoice status: {}", e))
        })?;

        timer.observe_duration();
        if let Some(ref inv) = invoice {
            info!(invoice_id, invoice_number = %inv.invoice_number, status = status.as_str(), "Invoice status updated");
        }
        self.attach_line_items_opt(invoice).await
    }

    async fn attach_line_items_opt(
        &self,
        invoice: Option<Invoice>,
    ) -> Result<Option<Invoice>, AppError> {
        match invoice {
            Some(invoice) => {
                let mut attached = self.attach_line_items(vec![invoice]).await?;
                Ok(attached.pop())
            }
            None => Ok(None),
        }
    }

    async fn attach_line_items(&self, mut invoices: Vec<Invoice>) -> Result<Vec<Invoice>, AppError> {
        if invoices.is_empty() {
            return Ok(invoices);
        }

        let ids: Vec<i64> = invoices.iter().map(|i| i.id).collect();
        let items = sqlx::query_as::<_, InvoiceLineItem>(
            r#"
            SELECT id, invoice_id, line_number, description, calculation, amount, quantity, unit_price
            FROM invoice_line_item
            WHERE invoice_id = ANY($1)
            ORDER BY invoice_id, line_number
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::StorageError(anyhow::anyhow!("Failed to load line items: {}", e)))?;

        let mut by_invoice: HashMap<i64, Vec<InvoiceLineItem>> = HashMap::new();
        for item in items {
            by_invoice.entry(item.invoice_id).or_default().push(item);
        }
        for invoice in &mut invoices {
            invoice.line_items = by_invoice.remove(&invoice.id).unwrap_or_default();
        }

        Ok(invoices)
    }
}
