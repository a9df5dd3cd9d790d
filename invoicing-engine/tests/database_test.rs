//! PostgreSQL store integration tests.
//!
//! Run with `TEST_DATABASE_URL` pointing at a scratch database and
//! `cargo test -- --ignored`.

mod common;

use chrono::Utc;
use common::{assert_invoice_consistent, init_tracing};
use futures::future::join_all;
use invoicing_engine::models::{
    Certification, Customer, FneStatus, Invoice, InvoiceStatus, LineItemRequest,
    ListInvoicesFilter, Product, UpdateInvoice, User,
};
use invoicing_engine::services::{
    Database, DocumentKind, DocumentStore, MockFneProvider, MockOutcome,
};
use invoicing_engine::{BillingEngine, EngineSettings};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

struct DbApp {
    db: Arc<Database>,
    engine: BillingEngine,
    fne: Arc<MockFneProvider>,
    customer: Customer,
    user: User,
    product: Product,
}

async fn spawn_db_app() -> DbApp {
    init_tracing();

    let database_url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set to run database tests");

    let db = Database::new(&database_url, 5, 1)
        .await
        .expect("Failed to connect to database");
    db.run_migrations().await.expect("Failed to run migrations");
    db.health_check().await.expect("Database unhealthy");

    let mut customer = Customer::new("Konan BTP", "factures@konan.ci");
    customer.siret = Some("CI-ABJ-2023-B-777".to_string());
    db.insert_customer(&customer).await.unwrap();
    let user = User::new(format!("{}@boutique.ci", customer.id), "Yao", "Koffi");
    db.insert_user(&user).await.unwrap();
    let product = Product::new("Fer à béton", dec!(12000), dec!(18));
    db.insert_product(&product).await.unwrap();

    let db = Arc::new(db);
    let fne = Arc::new(MockFneProvider::succeeding());
    let engine = BillingEngine::new(db.clone(), fne.clone(), EngineSettings::default());

    DbApp {
        db,
        engine,
        fne,
        customer,
        user,
        product,
    }
}

fn sequence_of(number: &str) -> u32 {
    number
        .rsplit('-')
        .next()
        .and_then(|seq| seq.parse().ok())
        .expect("numeric sequence")
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn invoice_round_trips_through_postgres() {
    let app = spawn_db_app().await;

    let created = app
        .engine
        .invoices
        .create(invoicing_engine::models::CreateInvoice {
            customer_id: app.customer.id,
            user_id: app.user.id,
            items: vec![
                LineItemRequest::new(3).product(app.product.id),
                LineItemRequest::new(1).unit_price(dec!(2500.50)).vat_rate(dec!(0)),
            ],
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(created.invoice.subtotal, dec!(38500.50));
    assert_eq!(created.invoice.vat_amount, dec!(6480));
    assert_eq!(created.invoice.total, dec!(44980.50));
    assert_eq!(created.items.len(), 2);
    assert_eq!(
        created.items[0].product.as_ref().map(|p| p.id),
        Some(app.product.id)
    );
    assert_eq!(created.customer.id, app.customer.id);

    let updated = app
        .engine
        .invoices
        .update(
            created.invoice.id,
            UpdateInvoice {
                items: Some(vec![LineItemRequest::new(1).unit_price(dec!(1000))]),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.items.len(), 1);
    assert_eq!(updated.invoice.total, dec!(1180));

    app.engine.invoices.delete(created.invoice.id).await.unwrap();
    assert!(app.engine.invoices.get(created.invoice.id).await.is_err());
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn concurrent_numbers_are_distinct() {
    let app = spawn_db_app().await;

    let results = join_all((0..10).map(|_| {
        app.engine
            .invoices
            .create(invoicing_engine::models::CreateInvoice {
                customer_id: app.customer.id,
                user_id: app.user.id,
                ..Default::default()
            })
    }))
    .await;

    let sequences: HashSet<u32> = results
        .into_iter()
        .map(|r| sequence_of(&r.unwrap().invoice.invoice_number))
        .collect();
    assert_eq!(sequences.len(), 10);

    let min = *sequences.iter().min().unwrap();
    let max = *sequences.iter().max().unwrap();
    assert_eq!(max - min, 9);
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn certification_is_persisted() {
    let app = spawn_db_app().await;
    let id = app
        .engine
        .invoices
        .create(invoicing_engine::models::CreateInvoice {
            customer_id: app.customer.id,
            user_id: app.user.id,
            ..Default::default()
        })
        .await
        .unwrap()
        .invoice
        .id;

    app.fne
        .set_outcome(MockOutcome::Reject("NCC invalide".to_string()))
        .await;
    assert!(app.engine.certification.certify(id).await.is_err());
    let failed = app.engine.invoices.get(id).await.unwrap();
    assert_eq!(failed.invoice.fne_status(), FneStatus::Failed);

    app.fne.set_outcome(MockOutcome::Certify).await;
    app.engine.certification.certify(id).await.unwrap();

    let stored = app.engine.invoices.get(id).await.unwrap();
    assert_eq!(stored.invoice.fne_status(), FneStatus::Certified);
    let record = stored.invoice.certification.record().unwrap();
    assert!(record.reference.starts_with("MOCK-FNE-"));
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn deleting_invoice_keeps_credit_note() {
    let app = spawn_db_app().await;
    let invoice = app
        .engine
        .invoices
        .create(invoicing_engine::models::CreateInvoice {
            customer_id: app.customer.id,
            user_id: app.user.id,
            ..Default::default()
        })
        .await
        .unwrap();

    let note = app
        .engine
        .credit_notes
        .create(invoicing_engine::models::CreateCreditNote {
            customer_id: app.customer.id,
            user_id: app.user.id,
            invoice_id: Some(invoice.invoice.id),
            issue_date: chrono::Utc::now().date_naive(),
            reason: "Annulation".to_string(),
            amount: Some(dec!(500)),
            vat_amount: Some(dec!(100)),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(note.credit_note.total, dec!(600));
    assert!(note.invoice.is_some());

    app.engine.invoices.delete(invoice.invoice.id).await.unwrap();

    let reloaded = app.engine.credit_notes.get(note.credit_note.id).await.unwrap();
    assert_eq!(reloaded.credit_note.invoice_id, None);
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn highest_sequence_skips_gaps_and_foreign_numbers() {
    let app = spawn_db_app().await;
    let prefix = format!("T{}-", &Uuid::new_v4().simple().to_string()[..12]);

    for suffix in ["0001", "0003", "X9"] {
        let now = Utc::now();
        let invoice = Invoice {
            id: Uuid::new_v4(),
            invoice_number: format!("{}{}", prefix, suffix),
            status: InvoiceStatus::Sent,
            issue_date: Some(now.date_naive()),
            due_date: None,
            subtotal: Decimal::ZERO,
            vat_amount: Decimal::ZERO,
            total: Decimal::ZERO,
            notes: None,
            payment_terms: None,
            payment_method: None,
            template: None,
            customer_id: app.customer.id,
            user_id: app.user.id,
            certification: Certification::Draft,
            created_utc: now,
            updated_utc: now,
        };
        app.db.insert_invoice(&invoice, &[]).await.unwrap();
    }

    let max = app
        .db
        .max_sequence_with_prefix(DocumentKind::Invoice, &prefix)
        .await
        .unwrap();
    assert_eq!(max, 3);

    let none = app
        .db
        .max_sequence_with_prefix(DocumentKind::CreditNote, &prefix)
        .await
        .unwrap();
    assert_eq!(none, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore] // Requires PostgreSQL
async fn reads_during_item_replacement_see_whole_documents() {
    let app = spawn_db_app().await;
    let id = app
        .engine
        .invoices
        .create(invoicing_engine::models::CreateInvoice {
            customer_id: app.customer.id,
            user_id: app.user.id,
            items: vec![LineItemRequest::new(1).product(app.product.id)],
            ..Default::default()
        })
        .await
        .unwrap()
        .invoice
        .id;

    let writer = async {
        for round in 1..=20 {
            let items = (0..(round % 3 + 1))
                .map(|_| LineItemRequest::new(round).product(app.product.id))
                .collect();
            app.engine
                .invoices
                .update(
                    id,
                    UpdateInvoice {
                        items: Some(items),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }
    };
    let reader = async {
        for _ in 0..40 {
            assert_invoice_consistent(&app.engine.invoices.get(id).await.unwrap());
            let listed = app
                .engine
                .invoices
                .list(&ListInvoicesFilter {
                    customer_id: Some(app.customer.id),
                    ..Default::default()
                })
                .await
                .unwrap();
            listed.iter().for_each(assert_invoice_consistent);
        }
    };
    tokio::join!(writer, reader);
}
