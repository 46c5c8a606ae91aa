//! Prometheus metrics for metering, invoicing, and the billing-period monitor.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec,
    IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "metering_db_query_duration_seconds",
            "Database query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Metering estimates counter (per-tenant)
pub static METER_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Invoices created counter (per-tenant)
pub static INVOICES_CREATED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Monitor tick counter
pub static MONITOR_TICKS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Monitor per-subscription failure counter
pub static MONITOR_FAILURES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Webhook notification counter
pub static WEBHOOK_NOTIFICATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    METER_REQUESTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "metering_meter_requests_total",
                "Total metering estimates by tenant and outcome"
            ),
            &["organization_id", "status"]
        )
        .expect("Failed to register METER_REQUESTS_TOTAL")
    });

    INVOICES_CREATED_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "metering_invoices_created_total",
                "Total invoices created by tenant"
            ),
            &["organization_id"]
        )
        .expect("Failed to register INVOICES_CREATED_TOTAL")
    });

    MONITOR_TICKS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "metering_monitor_ticks_total",
                "Total billing-period monitor ticks by outcome"
            ),
            &["status"]
        )
        .expect("Failed to register MONITOR_TICKS_TOTAL")
    });

    MONITOR_FAILURES_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "metering_monitor_failures_total",
                "Subscriptions the monitor failed to process, by tenant"
            ),
            &["organization_id"]
        )
        .expect("Failed to register MONITOR_FAILURES_TOTAL")
    });

    WEBHOOK_NOTIFICATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "metering_webhook_notifications_total",
                "Invoice-created webhook deliveries by outcome"
            ),
            &["status"]
        )
        .expect("Failed to register WEBHOOK_NOTIFICATIONS_TOTAL")
    });

    // Force initialization of lazy statics
    let _ = &*DB_QUERY_DURATION;
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");
    String::from_utf8(buffer).expect("Failed to convert metrics to string")
}

/// Record a metering estimate.
pub fn record_meter_request(organization_id: &str, status: &str) {
    if let Some(counter) = METER_REQUESTS_TOTAL.get() {
        counter.with_label_values(&[organization_id, status]).inc();
    }
}

/// Record an invoice creation.
pub fn record_invoice_created(organization_id: &str) {
    if let Some(counter) = INVOICES_CREATED_TOTAL.get() {
        counter.with_label_values(&[organization_id]).inc();
    }
}

/// Record a monitor tick outcome.
pub fn record_monitor_tick(status: &str) {
    if let Some(counter) = MONITOR_TICKS_TOTAL.get() {
        counter.with_label_values(&[status]).inc();
    }
}

/// Record a subscription the monitor failed to process.
pub fn record_monitor_failure(organization_id: &str) {
    if let Some(counter) = MONITOR_FAILURES_TOTAL.get() {
        counter.with_label_values(&[organization_id]).inc();
    }
}

/// Record a webhook delivery outcome.
pub fn record_webhook_notification(status: &str) {
    if let Some(counter) = WEBHOOK_NOTIFICATIONS_TOTAL.get() {
        counter.with_label_values(&[status]).inc();
    }
}
