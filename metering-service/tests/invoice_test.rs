//! Invoice service and repository integration tests.

mod common;

use chrono::{Duration, Utc};
use common::{TestApp, TEST_CUSTOMER_ID, TEST_ORG_ID};
use metering_service::models::{BreakdownLine, InvoiceStatus, MeterResponse};
use metering_service::tenant::TenantContext;
use rust_decimal_macros::dec;

fn meter_response() -> MeterResponse {
    MeterResponse {
        model_type: Some("MONTHLY".to_string()),
        event_count: 1250,
        breakdown: vec![
            BreakdownLine::new("Flat Fee", "Base", dec!(100.00)),
            BreakdownLine::new("Overage Charges", "250 * 0.10", dec!(25.00)),
            BreakdownLine::new("Discount (10%)", "Discount (10%)", dec!(-12.50)),
        ],
        total: dec!(112.50),
    }
}

#[tokio::test]
async fn create_invoice_preserves_breakdown_as_line_items() {
    let app = TestApp::spawn().await;
    let ctx = app.tenant_context();
    let start = Utc::now() - Duration::days(30);
    let end = Utc::now() - Duration::minutes(5);

    let meter = meter_response();
    let invoice = app
        .invoices
        .create_from_meter(&ctx, &meter, TEST_CUSTOMER_ID, Some(501), Some(9), start, end)
        .await
        .expect("invoice creation failed");

    assert_eq!(invoice.organization_id, TEST_ORG_ID);
    assert_eq!(invoice.customer_id, TEST_CUSTOMER_ID);
    assert_eq!(invoice.subscription_id, Some(501));
    assert_eq!(invoice.status(), InvoiceStatus::Draft);
    assert_eq!(invoice.total_amount, dec!(112.50));
    assert_eq!(invoice.model_type.as_deref(), Some("MONTHLY"));

    // Line items mirror the breakdown in order, label, calculation, amount.
    assert_eq!(invoice.line_items.len(), meter.breakdown.len());
    for (idx, (item, line)) in invoice
        .line_items
        .iter()
        .zip(meter.breakdown.iter())
        .enumerate()
    {
        assert_eq!(item.line_number, idx as i32 + 1);
        assert_eq!(item.description, line.label);
        assert_eq!(item.calculation.as_deref(), Some(line.calculation.as_str()));
        assert_eq!(item.amount, line.amount);
    }

    // Reads return the same aggregate.
    let fetched = app.invoices.get_invoice(&ctx, invoice.id).await.unwrap();
    assert_eq!(fetched.line_items.len(), 3);
    assert_eq!(fetched.invoice_number, invoice.invoice_number);

    app.cleanup().await;
}

#[tokio::test]
async fn invoice_number_is_bounded_with_prefix() {
    let app = TestApp::spawn().await;
    let ctx = app.tenant_context();
    let start = Utc::now() - Duration::days(30);
    let end = Utc::now() - Duration::minutes(5);

    let invoice = app
        .invoices
        .create_from_meter(&ctx, &meter_response(), TEST_CUSTOMER_ID, Some(502), None, start, end)
        .await
        .unwrap();

    assert!(invoice.invoice_number.starts_with("INV-"));
    assert!(invoice.invoice_number.len() <= 21);

    let by_number = app
        .invoices
        .get_by_number(&ctx, &invoice.invoice_number)
        .await
        .unwrap();
    assert_eq!(by_number.id, invoice.id);

    app.cleanup().await;
}

#[tokio::test]
async fn duplicate_period_is_rejected() {
    let app = TestApp::spawn().await;
    let ctx = app.tenant_context();
    let start = Utc::now() - Duration::days(30);
    let end = Utc::now() - Duration::minutes(5);

    app.invoices
        .create_from_meter(&ctx, &meter_response(), TEST_CUSTOMER_ID, Some(503), None, start, end)
        .await
        .unwrap();

    let err = app
        .invoices
        .create_from_meter(&ctx, &meter_response(), TEST_CUSTOMER_ID, Some(503), None, start, end)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "ALREADY_EXISTS");

    let invoices = app.invoices.list_by_subscription(&ctx, 503).await.unwrap();
    assert_eq!(invoices.len(), 1);

    app.cleanup().await;
}

#[tokio::test]
async fn concurrent_creates_yield_exactly_one_invoice() {
    let app = TestApp::spawn().await;
    let ctx = app.tenant_context();
    let start = Utc::now() - Duration::days(30);
    let end = Utc::now() - Duration::minutes(5);
    let meter = meter_response();

    let (first, second) = tokio::join!(
        app.invoices
            .create_from_meter(&ctx, &meter, TEST_CUSTOMER_ID, Some(504), None, start, end),
        app.invoices
            .create_from_meter(&ctx, &meter, TEST_CUSTOMER_ID, Some(504), None, start, end),
    );

    let outcomes = [first, second];
    let created = outcomes.iter().filter(|r| r.is_ok()).count();
    let rejected = outcomes
        .iter()
        .filter(|r| matches!(r, Err(e) if e.kind() == "ALREADY_EXISTS"))
        .count();

    assert_eq!(created, 1, "exactly one concurrent create must win");
    assert_eq!(rejected, 1, "the loser must surface ALREADY_EXISTS");

    let invoices = app.invoices.list_by_subscription(&ctx, 504).await.unwrap();
    assert_eq!(invoices.len(), 1);

    app.cleanup().await;
}

#[tokio::test]
async fn status_transitions_follow_lifecycle() {
    let app = TestApp::spawn().await;
    let ctx = app.tenant_context();
    let start = Utc::now() - Duration::days(30);
    let end = Utc::now() - Duration::minutes(5);

    let invoice = app
        .invoices
        .create_from_meter(&ctx, &meter_response(), TEST_CUSTOMER_ID, Some(505), None, start, end)
        .await
        .unwrap();

    // Draft cannot be paid directly.
    let err = app
        .invoices
        .update_status(&ctx, invoice.id, InvoiceStatus::Paid)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "INVALID_STATE");

    let issued = app
        .invoices
        .update_status(&ctx, invoice.id, InvoiceStatus::Issued)
        .await
        .unwrap();
    assert_eq!(issued.status(), InvoiceStatus::Issued);
    assert!(issued.updated_at >= invoice.updated_at);

    let voided = app
        .invoices
        .update_status(&ctx, invoice.id, InvoiceStatus::Void)
        .await
        .unwrap();
    assert_eq!(voided.status(), InvoiceStatus::Void);

    // Void is terminal.
    let err = app
        .invoices
        .update_status(&ctx, invoice.id, InvoiceStatus::Issued)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "INVALID_STATE");

    app.cleanup().await;
}

#[tokio::test]
async fn queries_are_tenant_scoped() {
    let app = TestApp::spawn().await;
    let ctx = app.tenant_context();
    let start = Utc::now() - Duration::days(30);
    let end = Utc::now() - Duration::minutes(5);

    let invoice = app
        .invoices
        .create_from_meter(&ctx, &meter_response(), TEST_CUSTOMER_ID, Some(506), None, start, end)
        .await
        .unwrap();

    // Another tenant cannot see the invoice.
    let other_credential = app.tokens.issue(999).unwrap();
    let other_ctx = TenantContext::new(999, other_credential);
    let err = app
        .invoices
        .get_invoice(&other_ctx, invoice.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "NOT_FOUND");
    assert!(app.invoices.list_invoices(&other_ctx).await.unwrap().is_empty());

    // List queries surface it for the owning tenant.
    assert_eq!(app.invoices.list_invoices(&ctx).await.unwrap().len(), 1);
    assert_eq!(
        app.invoices
            .list_by_customer(&ctx, TEST_CUSTOMER_ID)
            .await
            .unwrap()
            .len(),
        1
    );
    assert_eq!(
        app.invoices
            .list_by_status(&ctx, InvoiceStatus::Draft)
            .await
            .unwrap()
            .len(),
        1
    );
    assert_eq!(
        app.invoices
            .list_by_period(&ctx, start - Duration::days(1), end + Duration::days(1))
            .await
            .unwrap()
            .len(),
        1
    );

    app.cleanup().await;
}

#[tokio::test]
async fn in_process_event_is_published_on_create() {
    let app = TestApp::spawn().await;
    let ctx = app.tenant_context();
    let start = Utc::now() - Duration::days(30);
    let end = Utc::now() - Duration::minutes(5);

    let mut events = app.invoices.subscribe();

    let invoice = app
        .invoices
        .create_from_meter(&ctx, &meter_response(), TEST_CUSTOMER_ID, Some(507), None, start, end)
        .await
        .unwrap();

    let event = events.recv().await.expect("creation event expected");
    assert_eq!(event.invoice_id, invoice.id);
    assert_eq!(event.invoice_number, invoice.invoice_number);
    assert_eq!(event.total_amount, invoice.total_amount);

    app.cleanup().await;
}

#[tokio::test]
async fn resync_refires_webhooks_and_reports_counts() {
    let app = TestApp::spawn().await;
    let ctx = app.tenant_context();
    let start = Utc::now() - Duration::days(30);
    let end = Utc::now() - Duration::minutes(5);

    for subscription_id in [511, 512] {
        app.invoices
            .create_from_meter(
                &ctx,
                &meter_response(),
                TEST_CUSTOMER_ID,
                Some(subscription_id),
                None,
                start,
                end,
            )
            .await
            .unwrap();
    }

    // Two creation webhooks fire asynchronously.
    wait_for_webhook_hits(&app, 2).await;

    let summary = app.invoices.resync_all_invoices(&ctx).await.unwrap();
    assert_eq!(summary.total, 2);
    assert_eq!(summary.triggered, 2);

    wait_for_webhook_hits(&app, 4).await;

    app.cleanup().await;
}

async fn wait_for_webhook_hits(app: &TestApp, expected: usize) {
    for _ in 0..100 {
        if app.stubs.webhook_hits() >= expected {
            return;
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
    }
    panic!(
        "expected {} webhook hits, saw {}",
        expected,
        app.stubs.webhook_hits()
    );
}
