//! Read-only access to the external event store.
//!
//! Each `SUCCESS` row in `ingestion_event` represents exactly one billable
//! unit; the core only ever counts and enumerates, it never writes.

use chrono::{DateTime, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::services::metrics::DB_QUERY_DURATION;

/// Connection pool over the ingestion database.
#[derive(Clone)]
pub struct EventStore {
    pool: PgPool,
}

impl EventStore {
    #[instrument(skip(database_url))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to event store"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| {
                AppError::StorageError(anyhow::anyhow!("Failed to connect to event store: {}", e))
            })?;

        info!("Event store connection pool established");

        Ok(Self { pool })
    }

    /// Check event store health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::StorageError(anyhow::anyhow!("Event store health check failed: {}", e))
            })?;
        Ok(())
    }

    /// Count billable events for the tenant in the closed-open window
    /// `[from, to)`, applying equality on each supplied filter.
    #[instrument(skip(self), fields(organization_id = organization_id))]
    pub async fn count_events(
        &self,
        organization_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        subscription_id: Option<i64>,
        product_id: Option<i64>,
        rate_plan_id: Option<i64>,
        billable_metric_id: Option<i64>,
    ) -> Result<i64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["count_events"])
            .start_timer();

        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM ingestion_event
            WHERE status = 'SUCCESS'
              AND organization_id = $1
              AND timestamp >= $2 AND timestamp < $3
              AND ($4::bigint IS NULL OR subscription_id = $4)
              AND ($5::bigint IS NULL OR product_id = $5)
              AND ($6::bigint IS NULL OR rate_plan_id = $6)
              AND ($7::bigint IS NULL OR billable_metric_id = $7)
            "#,
        )
        .bind(organization_id)
        .bind(from)
        .bind(to)
        .bind(subscription_id)
        .bind(product_id)
        .bind(rate_plan_id)
        .bind(billable_metric_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::StorageError(anyhow::anyhow!("Failed to count events: {}", e)))?;

        timer.observe_duration();
        debug!(
            organization_id,
            ?subscription_id,
            %from,
            %to,
            count,
            "Counted billable events"
        );

        Ok(count)
    }

    /// Distinct organization ids with recorded events. Drives the monitor's
    /// tenant enumeration.
    #[instrument(skip(self))]
    pub async fn list_organization_ids(&self) -> Result<Vec<i64>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_organization_ids"])
            .start_timer();

        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT organization_id
            FROM ingestion_event
            WHERE organization_id IS NOT NULL
            ORDER BY organization_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::StorageError(anyhow::anyhow!("Failed to enumerate organizations: {}", e))
        })?;

        timer.observe_duration();

        Ok(ids)
    }
}
