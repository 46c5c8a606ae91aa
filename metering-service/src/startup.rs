//! Application startup and lifecycle management.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use service_core::error::AppError;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::clients::{RatePlanClient, SubscriptionClient, WebhookClient};
use crate::config::MeteringConfig;
use crate::services::{
    get_metrics, init_metrics, BillingPeriodMonitor, Database, EventStore, InvoiceService,
    MeterService, ServiceTokenIssuer,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: MeteringConfig,
    pub db: Arc<Database>,
    pub event_store: Arc<EventStore>,
    pub meter: Arc<MeterService>,
    pub invoices: Arc<InvoiceService>,
    pub tokens: Arc<ServiceTokenIssuer>,
}

/// State for health check endpoints.
#[derive(Clone)]
struct HealthState {
    db: Arc<Database>,
    event_store: Arc<EventStore>,
}

/// Health check endpoint for Docker/K8s liveness probes.
async fn health_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => {
            tracing::debug!("Health check passed");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "service": "metering-service",
                    "version": env!("CARGO_PKG_VERSION")
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - invoice store unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "metering-service",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness check endpoint: both the invoice store and the event store must
/// answer before the service takes traffic.
async fn readiness_check(State(state): State<HealthState>) -> impl IntoResponse {
    let invoice_store = state.db.health_check().await;
    let event_store = state.event_store.health_check().await;
    match (invoice_store, event_store) {
        (Ok(_), Ok(_)) => StatusCode::OK,
        (db, events) => {
            tracing::warn!(
                invoice_store_ok = db.is_ok(),
                event_store_ok = events.is_ok(),
                "Readiness check failed"
            );
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    let metrics = get_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        metrics,
    )
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
    monitor: Option<BillingPeriodMonitor>,
    shutdown: CancellationToken,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: MeteringConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this in tests when migrations are already applied by the test harness.
    pub async fn build_without_migrations(config: MeteringConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(config: MeteringConfig, run_migrations: bool) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to invoice store");
            e
        })?;

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }
        let db = Arc::new(db);

        let event_store = Arc::new(
            EventStore::new(
                &config.event_store.url,
                config.event_store.max_connections,
                config.event_store.min_connections,
            )
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to connect to event store");
                e
            })?,
        );

        let timeout = config.http_client.timeout();
        let rate_plans = Arc::new(RatePlanClient::new(
            config.rate_plan_service.base_url.clone(),
            timeout,
        )?);
        let subscriptions = Arc::new(SubscriptionClient::new(
            config.subscription_service.base_url.clone(),
            timeout,
        )?);
        let webhook = Arc::new(WebhookClient::new(config.notifier.base_url.clone(), timeout)?);

        let tokens = Arc::new(ServiceTokenIssuer::new(&config.credential)?);
        let meter = Arc::new(MeterService::new(
            event_store.clone(),
            rate_plans,
            subscriptions.clone(),
        ));
        let invoices = Arc::new(InvoiceService::new(db.clone(), webhook));

        let shutdown = CancellationToken::new();
        let monitor = config.monitor.enabled.then(|| {
            BillingPeriodMonitor::new(
                event_store.clone(),
                subscriptions,
                meter.clone(),
                invoices.clone(),
                db.clone(),
                tokens.clone(),
                config.monitor.cadence(),
                shutdown.clone(),
            )
        });

        let state = AppState {
            config: config.clone(),
            db,
            event_store,
            meter,
            invoices,
            tokens,
        };

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Metering service listener bound");

        Ok(Self {
            port,
            listener,
            state,
            monitor,
            shutdown,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get a reference to the shared application state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Token that stops the monitor loop and the health listener. Cancelling
    /// it lets an in-flight invoice write finish before the loop exits.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the application until the shutdown token is cancelled.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let health_state = HealthState {
            db: self.state.db.clone(),
            event_store: self.state.event_store.clone(),
        };

        let router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(health_state);

        let monitor_handle = self.monitor.map(|monitor| tokio::spawn(monitor.run()));

        tracing::info!(
            service = "metering-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            monitor = monitor_handle.is_some(),
            "Service ready"
        );

        let shutdown = self.shutdown.clone();
        axum::serve(self.listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        // The token is cancelled by now; wait for the monitor to finish its
        // in-flight subscription before reporting shutdown complete.
        if let Some(handle) = monitor_handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Monitor task terminated abnormally");
            }
        }

        Ok(())
    }
}
