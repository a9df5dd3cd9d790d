//! Credit note aggregator.

use crate::error::BillingError;
use crate::models::{
    CreateCreditNote, CreditNote, CreditNoteDocument, CreditNoteStatus, ListCreditNotesFilter,
    UpdateCreditNote,
};
use crate::services::invoices::reconcile_amounts;
use crate::services::locks::DocumentLocks;
use crate::services::metrics::{DOCUMENTS_CREATED_TOTAL, STATUS_CHANGES_TOTAL};
use crate::services::numbering::{DocumentKind, NumberGenerator};
use crate::services::pricing::{price_with_store, validate_amount, VatRule};
use crate::services::status::{Lifecycle, StatusPolicy};
use crate::services::store::DocumentStore;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

#[derive(Clone)]
pub struct CreditNoteService {
    store: Arc<dyn DocumentStore>,
    numbers: NumberGenerator,
    locks: Arc<DocumentLocks>,
    policy: StatusPolicy,
}

impl CreditNoteService {
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

    async fn reload(&self, id: Uuid) -> Result<CreditNoteDocument, BillingError> {
        self.store
            .load_credit_note(id)
            .await?
            .ok_or_else(|| BillingError::not_found("Credit note", id))
    }

    async fn ensure_customer(&self, customer_id: Uuid) -> Result<(), BillingError> {
        match self.store.find_customer(customer_id).await? {
            Some(_) => Ok(()),
            None => Err(BillingError::not_found("Customer", customer_id)),
        }
    }

    async fn ensure_invoice(&self, invoice_id: Uuid) -> Result<(), BillingError> {
        match self.store.load_invoice(invoice_id).await? {
            Some(_) => Ok(()),
            None => Err(BillingError::not_found("Invoice", invoice_id)),
        }
    }

    /// Create a credit note, itemized or with flat amounts.
    #[instrument(skip(self, input), fields(customer_id = %input.customer_id, items = input.items.len()))]
    pub async fn create(&self, input: CreateCreditNote) -> Result<CreditNoteDocument, BillingError> {
        input.validate()?;
        self.ensure_customer(input.customer_id).await?;
        if let Some(invoice_id) = input.invoice_id {
            self.ensure_invoice(invoice_id).await?;
        }

        let (amount, vat_amount, items) = if input.items.is_empty() {
            let amount = input.amount.unwrap_or(Decimal::ZERO);
            let vat_amount = input.vat_amount.unwrap_or(Decimal::ZERO);
            validate_amount("Amount", amount)?;
            validate_amount("VAT amount", vat_amount)?;
            (amount, vat_amount, Vec::new())
        } else {
            let priced =
                price_with_store(self.store.as_ref(), &input.items, VatRule::CreditNote).await?;
            (priced.subtotal, priced.vat_total, priced.items)
        };

        let credit_note_number = self
            .numbers
            .next_current_year(DocumentKind::CreditNote)
            .await?;
        let now = Utc::now();

        let credit_note = CreditNote {
            id: Uuid::new_v4(),
            credit_note_number,
            status: CreditNoteStatus::Draft,
            issue_date: input.issue_date,
            amount,
            vat_amount,
            total: amount + vat_amount,
            reason: input.reason,
            notes: input.notes,
            customer_id: input.customer_id,
            user_id: input.user_id,
            invoice_id: input.invoice_id,
            created_utc: now,
            updated_utc: now,
        };

        self.store.insert_credit_note(&credit_note, &items).await?;

        DOCUMENTS_CREATED_TOTAL
            .with_label_values(&[DocumentKind::CreditNote.as_str()])
            .inc();
        info!(
            credit_note_id = %credit_note.id,
            credit_note_number = %credit_note.credit_note_number,
            total = %credit_note.total,
            itemized = !items.is_empty(),
            "Credit note created"
        );

        self.reload(credit_note.id).await
    }

    #[instrument(skip(self), fields(credit_note_id = %id))]
    pub async fn get(&self, id: Uuid) -> Result<CreditNoteDocument, BillingError> {
        self.reload(id).await
    }

    #[instrument(skip(self, filter))]
    pub async fn list(
        &self,
        filter: &ListCreditNotesFilter,
    ) -> Result<Vec<CreditNoteDocument>, BillingError> {
        self.store.list_credit_notes(filter).await
    }

    /// Apply a patch. A non-empty item list replaces the items and recomputes
    /// the amounts; an empty one removes itemization.
    #[instrument(skip(self, patch), fields(credit_note_id = %id))]
    pub async fn update(
        &self,
        id: Uuid,
        patch: UpdateCreditNote,
    ) -> Result<CreditNoteDocument, BillingError> {
        patch.validate()?;
        let _guard = self.locks.acquire(id).await;
        let current = self.reload(id).await?;
        let mut credit_note = current.credit_note;

        if let Some(customer_id) = patch.customer_id {
            if customer_id != credit_note.customer_id {
                self.ensure_customer(customer_id).await?;
                credit_note.customer_id = customer_id;
            }
        }

        if let Some(invoice_id) = patch.invoice_id {
            if Some(invoice_id) != credit_note.invoice_id {
                self.ensure_invoice(invoice_id).await?;
                credit_note.invoice_id = Some(invoice_id);
            }
        }

        let previous_status = credit_note.status;
        if let Some(status) = patch.status {
            self.policy.check(credit_note.status, status)?;
            credit_note.status = status;
        }

        let items = match patch.items {
            Some(requests) if !requests.is_empty() => {
                let priced =
                    price_with_store(self.store.as_ref(), &requests, VatRule::CreditNote).await?;
                credit_note.amount = priced.subtotal;
                credit_note.vat_amount = priced.vat_total;
                credit_note.total = priced.total();
                Some(priced.items)
            }
            other => {
                if let Some((amount, vat, total)) = reconcile_amounts(
                    (credit_note.amount, credit_note.vat_amount),
                    patch.amount,
                    patch.vat_amount,
                    patch.total,
                )? {
                    credit_note.amount = amount;
                    credit_note.vat_amount = vat;
                    credit_note.total = total;
                }
                other.map(|_| Vec::new())
            }
        };

        if let Some(issue_date) = patch.issue_date {
            credit_note.issue_date = issue_date;
        }
        if let Some(reason) = patch.reason {
            credit_note.reason = reason;
        }
        if patch.notes.is_some() {
            credit_note.notes = patch.notes;
        }
        credit_note.updated_utc = Utc::now();

        self.store
            .update_credit_note(&credit_note, items.as_deref())
            .await?;

        if credit_note.status != previous_status {
            STATUS_CHANGES_TOTAL
                .with_label_values(&[CreditNoteStatus::KIND, credit_note.status.as_str()])
                .inc();
        }
        info!(
            credit_note_number = %credit_note.credit_note_number,
            items_replaced = items.is_some(),
            total = %credit_note.total,
            "Credit note updated"
        );

        self.reload(id).await
    }

    #[instrument(skip(self), fields(credit_note_id = %id))]
    pub async fn delete(&self, id: Uuid) -> Result<(), BillingError> {
        let _guard = self.locks.acquire(id).await;
        if !self.store.delete_credit_note(id).await? {
            return Err(BillingError::not_found("Credit note", id));
        }
        info!("Credit note deleted");
        Ok(())
    }
}
