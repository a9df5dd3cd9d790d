//! FNE certification integration tests against the mock provider.

mod common;

use common::TestApp;
use invoicing_engine::models::{FneStatus, LineItemRequest, Product, UpdateInvoice};
use invoicing_engine::services::fne::{BillingTemplate, PaymentMethod, TaxCode};
use invoicing_engine::services::MockOutcome;
use invoicing_engine::BillingError;
use rust_decimal_macros::dec;
use std::time::Duration;
use uuid::Uuid;

#[tokio::test]
async fn successful_certification_records_reference() {
    let app = TestApp::spawn().await;
    let created = app
        .create_invoice(vec![LineItemRequest::new(2)
            .unit_price(dec!(500000))
            .vat_rate(dec!(18))])
        .await;

    let certified = app
        .engine
        .certification
        .certify(created.invoice.id)
        .await
        .unwrap();

    assert_eq!(certified.invoice.fne_status(), FneStatus::Certified);
    let record = certified
        .invoice
        .certification
        .record()
        .expect("certification record");
    assert_eq!(record.reference, "MOCK-FNE-000001");
    assert!(!record.token.is_empty());
    assert_eq!(record.balance_sticker, Some(4999));
    assert_eq!(app.fne.call_count(), 1);

    // Totals and items are left alone.
    assert_eq!(certified.invoice.total, created.invoice.total);
    assert_eq!(certified.items, created.items);
}

#[tokio::test]
async fn certified_invoice_is_not_resubmitted() {
    let app = TestApp::spawn().await;
    let id = app.create_invoice(vec![]).await.invoice.id;

    app.engine.certification.certify(id).await.unwrap();
    let err = app.engine.certification.certify(id).await.unwrap_err();

    assert!(matches!(err, BillingError::AlreadyCertified));
    assert_eq!(err.to_string(), "Invoice is already certified with FNE");
    assert_eq!(app.fne.call_count(), 1);
}

#[tokio::test]
async fn rejection_marks_invoice_failed() {
    let app = TestApp::spawn().await;
    app.fne
        .set_outcome(MockOutcome::Reject("NCC invalide".to_string()))
        .await;
    let id = app.create_invoice(vec![]).await.invoice.id;

    let err = app.engine.certification.certify(id).await.unwrap_err();
    assert!(matches!(err, BillingError::CertificationRejected(_)));
    assert_eq!(err.to_string(), "FNE certification failed: NCC invalide");

    let stored = app.engine.invoices.get(id).await.unwrap();
    assert_eq!(stored.invoice.fne_status(), FneStatus::Failed);
    assert!(stored.invoice.certification.record().is_none());
}

#[tokio::test]
async fn transport_failure_marks_invoice_failed() {
    let app = TestApp::spawn().await;
    app.fne
        .set_outcome(MockOutcome::Fail("connection refused".to_string()))
        .await;
    let id = app.create_invoice(vec![]).await.invoice.id;

    let err = app.engine.certification.certify(id).await.unwrap_err();
    assert!(matches!(err, BillingError::CertificationTransport(_)));
    assert!(err.to_string().starts_with("FNE API Error:"));

    let stored = app.engine.invoices.get(id).await.unwrap();
    assert_eq!(stored.invoice.fne_status(), FneStatus::Failed);
}

#[tokio::test]
async fn hanging_provider_times_out() {
    let app = TestApp::with_certification_timeout(Duration::from_millis(50)).await;
    app.fne.set_outcome(MockOutcome::Hang).await;
    let id = app.create_invoice(vec![]).await.invoice.id;

    let err = app.engine.certification.certify(id).await.unwrap_err();
    assert!(matches!(err, BillingError::CertificationTransport(_)));

    let stored = app.engine.invoices.get(id).await.unwrap();
    assert_eq!(stored.invoice.fne_status(), FneStatus::Failed);
}

#[tokio::test]
async fn failed_invoice_can_be_retried() {
    let app = TestApp::spawn().await;
    app.fne
        .set_outcome(MockOutcome::Fail("timeout".to_string()))
        .await;
    let id = app.create_invoice(vec![]).await.invoice.id;
    assert!(app.engine.certification.certify(id).await.is_err());

    app.fne.set_outcome(MockOutcome::Certify).await;
    let certified = app.engine.certification.certify(id).await.unwrap();

    assert!(certified.invoice.is_certified());
    assert_eq!(app.fne.call_count(), 2);
}

#[tokio::test]
async fn concurrent_certification_calls_provider_once() {
    let app = TestApp::spawn().await;
    let id = app.create_invoice(vec![]).await.invoice.id;

    let (a, b) = tokio::join!(
        app.engine.certification.certify(id),
        app.engine.certification.certify(id),
    );

    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(BillingError::AlreadyCertified))));
    assert_eq!(app.fne.call_count(), 1);
}

#[tokio::test]
async fn update_after_certification_keeps_certification() {
    let app = TestApp::spawn().await;
    let id = app.create_invoice(vec![]).await.invoice.id;
    let certified = app.engine.certification.certify(id).await.unwrap();

    let updated = app
        .engine
        .invoices
        .update(
            id,
            UpdateInvoice {
                notes: Some("Livré".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.invoice.certification, certified.invoice.certification);
}

#[tokio::test]
async fn unknown_invoice_is_not_found() {
    let app = TestApp::spawn().await;

    let err = app
        .engine
        .certification
        .certify(Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::NotFound { .. }));
    assert_eq!(app.fne.call_count(), 0);
}

#[tokio::test]
async fn request_is_mapped_from_invoice() {
    let app = TestApp::spawn().await;
    let product =
        Product::new("Ciment 50kg", dec!(4500), dec!(9)).with_description("Sac de ciment 50kg");
    app.store.insert_product(product.clone()).await;

    let mut input = app.invoice_input(vec![
        LineItemRequest::new(10).product(product.id),
        LineItemRequest::new(1)
            .unit_price(dec!(2500.50))
            .vat_rate(dec!(0))
            .description("Livraison"),
    ]);
    input.payment_method = Some("mobile-money".to_string());
    input.template = Some("B2B".to_string());
    let id = app.engine.invoices.create(input).await.unwrap().invoice.id;

    app.engine.certification.certify(id).await.unwrap();
    let request = app.fne.last_request().await.expect("provider was called");

    assert_eq!(request.invoice_type, "sale");
    assert_eq!(request.payment_method, PaymentMethod::MobileMoney);
    assert_eq!(request.template, BillingTemplate::B2B);
    assert_eq!(request.client_ncc, "CI-ABJ-2024-B-001");
    assert_eq!(request.client_company_name, app.customer.name);
    assert_eq!(request.client_phone, "+225 07 00 00 00");
    assert_eq!(request.client_email, app.customer.email);
    assert_eq!(request.point_of_sale, "Point de vente principal");
    assert_eq!(request.items.len(), 2);

    let cement = &request.items[0];
    assert_eq!(cement.reference, product.id.to_string());
    assert_eq!(cement.description, "Sac de ciment 50kg");
    assert_eq!(cement.quantity, 10);
    assert_eq!(cement.amount, dec!(450000));
    assert_eq!(cement.taxes, vec![TaxCode::TVAB]);

    let delivery = &request.items[1];
    assert_eq!(delivery.reference, "CUSTOM");
    assert_eq!(delivery.description, "Livraison");
    assert_eq!(delivery.amount, dec!(250050));
    assert_eq!(delivery.taxes, vec![TaxCode::TVAC]);
    assert_eq!(delivery.measurement_unit, "pièce");
}
