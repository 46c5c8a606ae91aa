//! Billing-period monitor integration tests: period-close detection,
//! idempotency under repeated ticks, per-subscription error isolation.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::{TestApp, TEST_ORG_ID};
use metering_service::clients::SubscriptionClient;
use metering_service::models::{FlatFee, RatePlan, Subscription};
use metering_service::services::BillingPeriodMonitor;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn monitor_for(app: &TestApp) -> BillingPeriodMonitor {
    let subscriptions = Arc::new(
        SubscriptionClient::new(
            app.config.subscription_service.base_url.clone(),
            Duration::from_secs(5),
        )
        .expect("Failed to build subscription client"),
    );
    BillingPeriodMonitor::new(
        app.event_store.clone(),
        subscriptions,
        app.meter.clone(),
        app.invoices.clone(),
        app.db.clone(),
        app.tokens.clone(),
        Duration::from_secs(600),
        CancellationToken::new(),
    )
}

fn flat_fee_plan(rate_plan_id: i64) -> RatePlan {
    RatePlan {
        rate_plan_id,
        billing_frequency: Some("HOURLY".to_string()),
        flat_fee: Some(FlatFee {
            amount: Some(dec!(100)),
            included_units: Some(10),
            overage_rate: Some(dec!(0.10)),
        }),
        ..Default::default()
    }
}

fn closed_subscription(subscription_id: i64, rate_plan_id: i64) -> Subscription {
    Subscription {
        subscription_id,
        organization_id: Some(TEST_ORG_ID),
        customer_id: Some(common::TEST_CUSTOMER_ID),
        rate_plan_id: Some(rate_plan_id),
        status: Some("ACTIVE".to_string()),
        current_billing_period_start: Some(Utc::now() - ChronoDuration::hours(25)),
        current_billing_period_end: Some(Utc::now() - ChronoDuration::minutes(5)),
        ..Default::default()
    }
}

#[tokio::test]
async fn closed_period_generates_exactly_one_invoice() {
    let app = TestApp::spawn().await;

    let rate_plan_id = 8001;
    let subscription_id = 701;
    app.stubs.put_rate_plan(flat_fee_plan(rate_plan_id));
    let subscription = closed_subscription(subscription_id, rate_plan_id);
    let (period_start, period_end) = subscription.current_period().unwrap();
    app.stubs.put_subscription(subscription);

    // 25 events inside the closed period: 100 flat + 15 * 0.10 overage.
    app.seed_events(
        TEST_ORG_ID,
        Some(subscription_id),
        Some(rate_plan_id),
        period_start + ChronoDuration::hours(1),
        25,
    )
    .await;

    let monitor = monitor_for(&app);
    let first = monitor.tick().await;
    assert_eq!(first.organizations, 1);
    assert_eq!(first.subscriptions_checked, 1);
    assert_eq!(first.invoices_created, 1);
    assert_eq!(first.failures, 0);

    // A forced second pass over the same inputs observes the existing
    // invoice and creates nothing.
    let second = monitor.tick().await;
    assert_eq!(second.invoices_created, 0);
    assert_eq!(second.failures, 0);

    let ctx = app.tenant_context();
    let invoices = app
        .invoices
        .list_by_subscription(&ctx, subscription_id)
        .await
        .unwrap();
    assert_eq!(invoices.len(), 1);

    let invoice = &invoices[0];
    assert_eq!(invoice.total_amount, dec!(101.50));
    assert_eq!(invoice.billing_period_start, period_start);
    assert_eq!(invoice.billing_period_end, period_end);
    assert_eq!(invoice.subscription_id, Some(subscription_id));
    assert_eq!(invoice.model_type.as_deref(), Some("HOURLY"));
    assert!(!invoice.line_items.is_empty());

    app.cleanup().await;
}

#[tokio::test]
async fn open_period_is_left_alone() {
    let app = TestApp::spawn().await;

    let rate_plan_id = 8002;
    let subscription_id = 702;
    app.stubs.put_rate_plan(flat_fee_plan(rate_plan_id));
    app.stubs.put_subscription(Subscription {
        current_billing_period_end: Some(Utc::now() + ChronoDuration::hours(1)),
        ..closed_subscription(subscription_id, rate_plan_id)
    });

    // The tenant must still be enumerable from the event store.
    app.seed_events(TEST_ORG_ID, Some(subscription_id), Some(rate_plan_id), Utc::now(), 1)
        .await;

    let summary = monitor_for(&app).tick().await;
    assert_eq!(summary.subscriptions_checked, 1);
    assert_eq!(summary.invoices_created, 0);

    let ctx = app.tenant_context();
    assert!(app
        .invoices
        .list_by_subscription(&ctx, subscription_id)
        .await
        .unwrap()
        .is_empty());

    app.cleanup().await;
}

#[tokio::test]
async fn subscription_without_period_bounds_is_skipped() {
    let app = TestApp::spawn().await;

    let rate_plan_id = 8003;
    let subscription_id = 703;
    app.stubs.put_rate_plan(flat_fee_plan(rate_plan_id));
    app.stubs.put_subscription(Subscription {
        current_billing_period_start: None,
        ..closed_subscription(subscription_id, rate_plan_id)
    });
    app.seed_events(TEST_ORG_ID, Some(subscription_id), Some(rate_plan_id), Utc::now(), 1)
        .await;

    let summary = monitor_for(&app).tick().await;
    assert_eq!(summary.invoices_created, 0);
    assert_eq!(summary.failures, 0);

    app.cleanup().await;
}

#[tokio::test]
async fn one_failing_subscription_does_not_affect_siblings() {
    let app = TestApp::spawn().await;

    let rate_plan_id = 8004;
    app.stubs.put_rate_plan(flat_fee_plan(rate_plan_id));

    // First subscription references no rate plan: invoice generation fails.
    app.stubs.put_subscription(Subscription {
        rate_plan_id: None,
        ..closed_subscription(704, rate_plan_id)
    });
    // Second subscription is healthy.
    let healthy = closed_subscription(705, rate_plan_id);
    let (period_start, _) = healthy.current_period().unwrap();
    app.stubs.put_subscription(healthy);

    app.seed_events(
        TEST_ORG_ID,
        Some(705),
        Some(rate_plan_id),
        period_start + ChronoDuration::hours(1),
        5,
    )
    .await;

    let summary = monitor_for(&app).tick().await;
    assert_eq!(summary.subscriptions_checked, 2);
    assert_eq!(summary.invoices_created, 1);
    assert_eq!(summary.failures, 1);

    let ctx = app.tenant_context();
    assert_eq!(
        app.invoices.list_by_subscription(&ctx, 705).await.unwrap().len(),
        1
    );
    assert!(app.invoices.list_by_subscription(&ctx, 704).await.unwrap().is_empty());

    app.cleanup().await;
}

#[tokio::test]
async fn tenant_without_events_is_never_visited() {
    let app = TestApp::spawn().await;

    // A subscription exists upstream, but its tenant has no recorded events,
    // so enumeration never reaches it.
    let rate_plan_id = 8005;
    app.stubs.put_rate_plan(flat_fee_plan(rate_plan_id));
    app.stubs.put_subscription(closed_subscription(706, rate_plan_id));

    let summary = monitor_for(&app).tick().await;
    assert_eq!(summary.organizations, 0);
    assert_eq!(summary.invoices_created, 0);

    app.cleanup().await;
}
