//! Persistence collaborator used by the engine.

use crate::error::BillingError;
use crate::models::{
    Certification, CreditNote, CreditNoteDocument, CreditNoteStatus, Customer, Invoice,
    InvoiceDocument, InvoiceStatus, LineItem, ListCreditNotesFilter, ListInvoicesFilter, Product,
    User,
};
use crate::services::numbering::DocumentKind;
use async_trait::async_trait;
use uuid::Uuid;

/// Storage for catalog lookups, number sequences and document aggregates.
///
/// Writes that touch a header and its items happen in one atomic unit:
/// readers never see a document between the item delete and the item insert.
/// Loads return documents with customer, issuer, items, item products and
/// (for credit notes) the linked invoice already resolved.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_customer(&self, id: Uuid) -> Result<Option<Customer>, BillingError>;
    async fn find_product(&self, id: Uuid) -> Result<Option<Product>, BillingError>;
    async fn find_user(&self, id: Uuid) -> Result<Option<User>, BillingError>;

    /// Atomically reserve the next sequence value for `(kind, year)`.
    ///
    /// The first reservation of a year starts after the highest sequence
    /// already used with that year's prefix, so gaps in existing numbers are
    /// never filled.
    async fn next_sequence(&self, kind: DocumentKind, year: i32) -> Result<u32, BillingError>;

    /// Highest numeric suffix among numbers of `kind` that start with
    /// `prefix`, or 0 when there are none.
    async fn max_sequence_with_prefix(
        &self,
        kind: DocumentKind,
        prefix: &str,
    ) -> Result<u32, BillingError>;

    async fn insert_invoice(&self, invoice: &Invoice, items: &[LineItem])
        -> Result<(), BillingError>;

    /// Write the invoice header, replacing the whole item set when `items` is
    /// given. Certification columns are left as stored.
    async fn update_invoice(
        &self,
        invoice: &Invoice,
        items: Option<&[LineItem]>,
    ) -> Result<(), BillingError>;

    async fn load_invoice(&self, id: Uuid) -> Result<Option<InvoiceDocument>, BillingError>;

    /// Newest first.
    async fn list_invoices(
        &self,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<InvoiceDocument>, BillingError>;

    /// Returns `false` when the invoice does not exist.
    async fn set_invoice_status(
        &self,
        id: Uuid,
        status: InvoiceStatus,
    ) -> Result<bool, BillingError>;

    /// Write only the certification columns. Returns `false` when the invoice
    /// does not exist.
    async fn set_certification(
        &self,
        id: Uuid,
        certification: &Certification,
    ) -> Result<bool, BillingError>;

    /// Delete the invoice and its items. Returns `false` when it did not exist.
    async fn delete_invoice(&self, id: Uuid) -> Result<bool, BillingError>;

    async fn insert_credit_note(
        &self,
        credit_note: &CreditNote,
        items: &[LineItem],
    ) -> Result<(), BillingError>;

    async fn update_credit_note(
        &self,
        credit_note: &CreditNote,
        items: Option<&[LineItem]>,
    ) -> Result<(), BillingError>;

    async fn load_credit_note(&self, id: Uuid)
        -> Result<Option<CreditNoteDocument>, BillingError>;

    /// Newest first.
    async fn list_credit_notes(
        &self,
        filter: &ListCreditNotesFilter,
    ) -> Result<Vec<CreditNoteDocument>, BillingError>;

    async fn set_credit_note_status(
        &self,
        id: Uuid,
        status: CreditNoteStatus,
    ) -> Result<bool, BillingError>;

    async fn delete_credit_note(&self, id: Uuid) -> Result<bool, BillingError>;
}
