//! Certification coordinator.
//!
//! Submits an invoice to FNE and records the outcome. The provider call runs
//! with no transaction open; the outcome is written afterwards in one short
//! write that touches only the certification columns.

use crate::error::BillingError;
use crate::models::{Certification, InvoiceDocument};
use crate::services::fne::{CertificationProvider, CertifyRequest, FneError, Issuer};
use crate::services::locks::DocumentLocks;
use crate::services::metrics::{CERTIFICATIONS_TOTAL, CERTIFICATION_DURATION, ERRORS_TOTAL};
use crate::services::store::DocumentStore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Default hard upper bound on one certification call.
pub const DEFAULT_CERTIFICATION_TIMEOUT: Duration = Duration::from_secs(30);

pub struct CertificationCoordinator {
    store: Arc<dyn DocumentStore>,
    provider: Arc<dyn CertificationProvider>,
    locks: DocumentLocks,
    issuer: Issuer,
    timeout: Duration,
}

impl CertificationCoordinator {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        provider: Arc<dyn CertificationProvider>,
        issuer: Issuer,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            locks: DocumentLocks::new(),
            issuer,
            timeout,
        }
    }

    /// Certify an invoice and return it re-read with its certification state.
    ///
    /// Only a `certified` invoice is refused; `draft` and `failed` ones may be
    /// (re)submitted. Every failure is recorded as `failed` before the error
    /// is returned.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn certify(&self, invoice_id: Uuid) -> Result<InvoiceDocument, BillingError> {
        let _guard = self.locks.acquire(invoice_id).await;

        let document = self
            .store
            .load_invoice(invoice_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Invoice", invoice_id))?;

        if document.invoice.is_certified() {
            ERRORS_TOTAL
                .with_label_values(&[BillingError::AlreadyCertified.kind()])
                .inc();
            warn!(invoice_number = %document.invoice.invoice_number, "Invoice already certified");
            return Err(BillingError::AlreadyCertified);
        }

        let request = CertifyRequest::for_invoice(&document, &self.issuer);
        let started = Instant::now();

        let outcome = match tokio::time::timeout(self.timeout, self.provider.certify(&request)).await
        {
            Ok(result) => result,
            Err(_) => Err(FneError::Timeout(self.timeout)),
        };

        let result = match outcome {
            Ok(response) if response.success => response
                .record()
                .map_err(|e| ("transport_error", BillingError::CertificationTransport(e.to_string()))),
            Ok(response) => Err((
                "rejected",
                BillingError::CertificationRejected(response.failure_message()),
            )),
            Err(e @ FneError::Timeout(_)) => {
                Err(("timeout", BillingError::CertificationTransport(e.to_string())))
            }
            Err(e) => Err((
                "transport_error",
                BillingError::CertificationTransport(e.to_string()),
            )),
        };

        match result {
            Ok(record) => {
                let reference = record.reference.clone();
                self.record(invoice_id, Certification::Certified(record)).await?;
                self.observe("certified", started);
                info!(
                    invoice_number = %document.invoice.invoice_number,
                    fne_reference = %reference,
                    "Invoice certified with FNE"
                );
            }
            Err((outcome, err)) => {
                self.record(invoice_id, Certification::Failed).await?;
                self.observe(outcome, started);
                ERRORS_TOTAL.with_label_values(&[err.kind()]).inc();
                error!(
                    invoice_number = %document.invoice.invoice_number,
                    outcome = outcome,
                    error = %err,
                    "FNE certification failed"
                );
                return Err(err);
            }
        }

        self.store
            .load_invoice(invoice_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Invoice", invoice_id))
    }

    async fn record(&self, invoice_id: Uuid, certification: Certification) -> Result<(), BillingError> {
        if !self.store.set_certification(invoice_id, &certification).await? {
            return Err(BillingError::not_found("Invoice", invoice_id));
        }
        Ok(())
    }

    fn observe(&self, outcome: &str, started: Instant) {
        CERTIFICATIONS_TOTAL.with_label_values(&[outcome]).inc();
        CERTIFICATION_DURATION
            .with_label_values(&[outcome])
            .observe(started.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Customer, Invoice, InvoiceStatus, User};
    use crate::services::fne::MockFneProvider;
    use crate::services::memory::MemoryStore;
    use chrono::Utc;
    use rust_decimal::Decimal;

    async fn seeded_invoice(store: &MemoryStore) -> Uuid {
        let customer = Customer::new("Konan BTP", "factures@konan.ci");
        let user = User::new("caisse@boutique.ci", "Yao", "Koffi");
        let now = Utc::now();
        let invoice = Invoice {
            id: Uuid::new_v4(),
            invoice_number: "2024-0001".to_string(),
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
            customer_id: customer.id,
            user_id: user.id,
            certification: Certification::Draft,
            created_utc: now,
            updated_utc: now,
        };
        store.insert_customer(customer).await;
        store.insert_user(user).await;
        store.insert_invoice(&invoice, &[]).await.unwrap();
        invoice.id
    }

    #[tokio::test]
    async fn lock_entries_do_not_outlive_certification_attempts() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = CertificationCoordinator::new(
            store.clone(),
            Arc::new(MockFneProvider::succeeding()),
            Issuer::default(),
            DEFAULT_CERTIFICATION_TIMEOUT,
        );

        for _ in 0..10 {
            let missing = coordinator.certify(Uuid::new_v4()).await;
            assert!(matches!(missing, Err(BillingError::NotFound { .. })));
        }
        assert!(coordinator.locks.is_empty());

        let id = seeded_invoice(&store).await;
        coordinator.certify(id).await.unwrap();
        assert!(matches!(
            coordinator.certify(id).await,
            Err(BillingError::AlreadyCertified)
        ));
        assert!(coordinator.locks.is_empty());
    }
}
