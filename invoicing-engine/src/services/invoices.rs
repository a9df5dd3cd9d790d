//! Invoice aggregator.

use crate::error::BillingError;
use crate::models::{
    Certification, CreateInvoice, Invoice, InvoiceDocument, InvoiceStatus, ListInvoicesFilter,
    UpdateInvoice,
};
use crate::services::locks::DocumentLocks;
use crate::services::metrics::{DOCUMENTS_CREATED_TOTAL, ERRORS_TOTAL, STATUS_CHANGES_TOTAL};
use crate::services::numbering::{DocumentKind, NumberGenerator};
use crate::services::pricing::{price_with_store, validate_amount, VatRule};
use crate::services::status::{Lifecycle, StatusPolicy};
use crate::services::store::DocumentStore;
use chrono::{Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Days between issue date and the default due date.
pub const DEFAULT_PAYMENT_DAYS: u64 = 30;

/// Template category recorded when none is given.
pub const DEFAULT_TEMPLATE: &str = "B2C";

/// Issue and due dates for a new document in `status`.
///
/// Drafts keep whatever was supplied. Anything else gets today as issue date
/// and issue + 30 days as due date when those are missing.
pub fn default_dates(
    status: InvoiceStatus,
    issue_date: Option<NaiveDate>,
    due_date: Option<NaiveDate>,
    today: NaiveDate,
) -> (Option<NaiveDate>, Option<NaiveDate>) {
    if status == InvoiceStatus::Draft {
        return (issue_date, due_date);
    }
    let issue = issue_date.unwrap_or(today);
    let due = due_date.or_else(|| issue.checked_add_days(Days::new(DEFAULT_PAYMENT_DAYS)));
    (Some(issue), due)
}

/// Reconcile explicit header amount overrides against the stored ones.
///
/// Returns the new `(subtotal, vat, total)`. When base or VAT is given the
/// total is their sum; a given total must agree with it.
pub(crate) fn reconcile_amounts(
    current: (Decimal, Decimal),
    base: Option<Decimal>,
    vat: Option<Decimal>,
    total: Option<Decimal>,
) -> Result<Option<(Decimal, Decimal, Decimal)>, BillingError> {
    if base.is_none() && vat.is_none() && total.is_none() {
        return Ok(None);
    }
    for (field, value) in [("Amount", base), ("VAT amount", vat), ("Total", total)] {
        if let Some(value) = value {
            validate_amount(field, value)?;
        }
    }

    let base = base.unwrap_or(current.0);
    let vat = vat.unwrap_or(current.1);
    let computed = base + vat;
    if let Some(total) = total {
        if total != computed {
            return Err(BillingError::validation(format!(
                "Total {} does not equal amount plus VAT ({})",
                total, computed
            )));
        }
    }
    Ok(Some((base, vat, computed)))
}

#[derive(Clone)]
pub struct InvoiceService {
    store: Arc<dyn DocumentStore>,
    numbers: NumberGenerator,
    locks: Arc<DocumentLocks>,
    policy: StatusPolicy,
}

impl InvoiceService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        locks: Arc<DocumentLocks>,
        policy: StatusPolicy,
    ) -> Self {
        Self {
            numbers: NumberGenerator::new(store.clone()),
            store,
            locks,
            policy,
        }
    }

    async fn reload(&self, id: Uuid) -> Result<InvoiceDocument, BillingError> {
        self.store
            .load_invoice(id)
            .await?
            .ok_or_else(|| BillingError::not_found("Invoice", id))
    }

    async fn ensure_customer(&self, customer_id: Uuid) -> Result<(), BillingError> {
        match self.store.find_customer(customer_id).await? {
            Some(_) => Ok(()),
            None => Err(BillingError::not_found("Customer", customer_id)),
        }
    }

    /// Create an invoice from a header and raw line items.
    #[instrument(skip(self, input), fields(customer_id = %input.customer_id, items = input.items.len()))]
    pub async fn create(&self, input: CreateInvoice) -> Result<InvoiceDocument, BillingError> {
        self.ensure_customer(input.customer_id).await?;
        let priced = price_with_store(self.store.as_ref(), &input.items, VatRule::Invoice).await?;

        let status = input.status.unwrap_or(InvoiceStatus::Draft);
        let now = Utc::now();
        let (issue_date, due_date) =
            default_dates(status, input.issue_date, input.due_date, now.date_naive());

        let invoice_number = self.numbers.next_current_year(DocumentKind::Invoice).await?;

        let invoice = Invoice {
            id: Uuid::new_v4(),
            invoice_number,
            status,
            issue_date,
            due_date,
            subtotal: priced.subtotal,
            vat_amount: priced.vat_total,
            total: priced.total(),
            notes: input.notes,
            payment_terms: input.payment_terms,
            payment_method: input.payment_method,
            template: input.template.or_else(|| Some(DEFAULT_TEMPLATE.to_string())),
            customer_id: input.customer_id,
            user_id: input.user_id,
            certification: Certification::Draft,
            created_utc: now,
            updated_utc: now,
        };

        self.store.insert_invoice(&invoice, &priced.items).await?;

        DOCUMENTS_CREATED_TOTAL
            .with_label_values(&[DocumentKind::Invoice.as_str()])
            .inc();
        info!(
            invoice_id = %invoice.id,
            invoice_number = %invoice.invoice_number,
            total = %invoice.total,
            "Invoice created"
        );

        self.reload(invoice.id).await
    }

    #[instrument(skip(self), fields(invoice_id = %id))]
    pub async fn get(&self, id: Uuid) -> Result<InvoiceDocument, BillingError> {
        self.reload(id).await
    }

    #[instrument(skip(self, filter))]
    pub async fn list(&self, filter: &ListInvoicesFilter) -> Result<Vec<InvoiceDocument>, BillingError> {
        self.store.list_invoices(filter).await
    }

    /// Apply a patch. A supplied item list replaces every existing item and
    /// recomputes the totals.
    #[instrument(skip(self, patch), fields(invoice_id = %id))]
    pub async fn update(&self, id: Uuid, patch: UpdateInvoice) -> Result<InvoiceDocument, BillingError> {
        let _guard = self.locks.acquire(id).await;
        let current = self.reload(id).await?;
        let mut invoice = current.invoice;

        if let Some(customer_id) = patch.customer_id {
            if customer_id != invoice.customer_id {
                self.ensure_customer(customer_id).await?;
                invoice.customer_id = customer_id;
            }
        }

        let previous_status = invoice.status;
        if let Some(status) = patch.status {
            self.policy.check(invoice.status, status)?;
            invoice.status = status;
        }

        let items = match patch.items {
            Some(requests) => {
                let priced =
                    price_with_store(self.store.as_ref(), &requests, VatRule::Invoice).await?;
                invoice.subtotal = priced.subtotal;
                invoice.vat_amount = priced.vat_total;
                invoice.total = priced.total();
                Some(priced.items)
            }
            None => {
                if let Some((subtotal, vat, total)) = reconcile_amounts(
                    (invoice.subtotal, invoice.vat_amount),
                    patch.subtotal,
                    patch.vat_amount,
                    patch.total,
                )? {
                    invoice.subtotal = subtotal;
                    invoice.vat_amount = vat;
                    invoice.total = total;
                }
                None
            }
        };

        if patch.issue_date.is_some() {
            invoice.issue_date = patch.issue_date;
        }
        if patch.due_date.is_some() {
            invoice.due_date = patch.due_date;
        }
        if patch.notes.is_some() {
            invoice.notes = patch.notes;
        }
        if patch.payment_terms.is_some() {
            invoice.payment_terms = patch.payment_terms;
        }
        if patch.payment_method.is_some() {
            invoice.payment_method = patch.payment_method;
        }
        if patch.template.is_some() {
            invoice.template = patch.template;
        }
        invoice.updated_utc = Utc::now();

        self.store.update_invoice(&invoice, items.as_deref()).await?;

        if invoice.status != previous_status {
            STATUS_CHANGES_TOTAL
                .with_label_values(&[InvoiceStatus::KIND, invoice.status.as_str()])
                .inc();
        }
        info!(
            invoice_number = %invoice.invoice_number,
            items_replaced = items.is_some(),
            total = %invoice.total,
            "Invoice updated"
        );

        self.reload(id).await
    }

    /// Delete an invoice together with its items.
    #[instrument(skip(self), fields(invoice_id = %id))]
    pub async fn delete(&self, id: Uuid) -> Result<(), BillingError> {
        let _guard = self.locks.acquire(id).await;
        if !self.store.delete_invoice(id).await? {
            ERRORS_TOTAL.with_label_values(&["not_found"]).inc();
            return Err(BillingError::not_found("Invoice", id));
        }
        info!("Invoice deleted");
        Ok(())
    }
}
