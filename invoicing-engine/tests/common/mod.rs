//! Test helper module for invoicing-engine integration tests.
//!
//! Builds an engine over an in-memory store and a scriptable FNE mock.

#![allow(dead_code)]

use chrono::{Datelike, NaiveDate, Utc};
use invoicing_engine::models::{
    CreateCreditNote, CreateInvoice, Customer, InvoiceDocument, LineItemRequest, Product, User,
};
use invoicing_engine::services::{MemoryStore, MockFneProvider, StatusPolicy};
use invoicing_engine::{BillingEngine, EngineSettings};
use rust_decimal::Decimal;
use std::sync::{Arc, Once};
use std::time::Duration;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,invoicing_engine=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn current_year() -> i32 {
    Utc::now().year()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

/// Test application wrapper for integration tests.
pub struct TestApp {
    pub engine: BillingEngine,
    pub store: Arc<MemoryStore>,
    pub fne: Arc<MockFneProvider>,
    pub customer: Customer,
    pub user: User,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::with_settings(EngineSettings::default()).await
    }

    pub async fn with_policy(policy: StatusPolicy) -> Self {
        Self::with_settings(EngineSettings {
            status_policy: policy,
            ..EngineSettings::default()
        })
        .await
    }

    pub async fn with_certification_timeout(timeout: Duration) -> Self {
        Self::with_settings(EngineSettings {
            certification_timeout: timeout,
            ..EngineSettings::default()
        })
        .await
    }

    pub async fn with_settings(settings: EngineSettings) -> Self {
        init_tracing();

        let store = Arc::new(MemoryStore::new());
        let fne = Arc::new(MockFneProvider::succeeding());

        let mut customer = Customer::new("Kouassi Distribution", "compta@kouassi.ci");
        customer.phone = Some("+225 07 00 00 00".to_string());
        customer.siret = Some("CI-ABJ-2024-B-001".to_string());
        store.insert_customer(customer.clone()).await;

        let user = User::new("caissier@boutique.ci", "Awa", "Traoré");
        store.insert_user(user.clone()).await;

        let engine = BillingEngine::new(store.clone(), fne.clone(), settings);

        Self {
            engine,
            store,
            fne,
            customer,
            user,
        }
    }

    pub async fn add_product(&self, name: &str, price: Decimal, vat_rate: Decimal) -> Product {
        let product = Product::new(name, price, vat_rate);
        self.store.insert_product(product.clone()).await;
        product
    }

    pub async fn add_customer(&self, name: &str) -> Customer {
        let customer = Customer::new(name, format!("{}@example.ci", name.to_lowercase()));
        self.store.insert_customer(customer.clone()).await;
        customer
    }

    pub fn invoice_input(&self, items: Vec<LineItemRequest>) -> CreateInvoice {
        CreateInvoice {
            customer_id: self.customer.id,
            user_id: self.user.id,
            items,
            ..Default::default()
        }
    }

    pub async fn create_invoice(&self, items: Vec<LineItemRequest>) -> InvoiceDocument {
        self.engine
            .invoices
            .create(self.invoice_input(items))
            .await
            .expect("Failed to create invoice")
    }

    pub fn credit_note_input(&self, reason: &str) -> CreateCreditNote {
        CreateCreditNote {
            customer_id: self.customer.id,
            user_id: self.user.id,
            issue_date: Utc::now().date_naive(),
            reason: reason.to_string(),
            ..Default::default()
        }
    }
}

/// Every line and the document header satisfy the amount identities.
pub fn assert_invoice_consistent(document: &InvoiceDocument) {
    let invoice = &document.invoice;
    assert_eq!(invoice.total, invoice.subtotal + invoice.vat_amount);
    let subtotal: Decimal = document.items.iter().map(|v| v.item.subtotal).sum();
    let vat: Decimal = document.items.iter().map(|v| v.item.vat_amount).sum();
    assert_eq!(invoice.subtotal, subtotal);
    assert_eq!(invoice.vat_amount, vat);
    for view in &document.items {
        assert!(view.item.is_consistent(), "inconsistent item {:?}", view.item);
    }
}

/// Whether `number` looks like `{prefix}{year}-NNNN`.
pub fn has_number_format(number: &str, prefix: &str) -> bool {
    let expected = format!("{}{}-", prefix, current_year());
    number
        .strip_prefix(&expected)
        .map(|seq| seq.len() == 4 && seq.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}
