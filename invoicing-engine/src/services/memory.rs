//! In-memory document store.

use crate::error::BillingError;
use crate::models::{
    Certification, CreditNote, CreditNoteDocument, CreditNoteStatus, Customer, Invoice,
    InvoiceDocument, InvoiceStatus, LineItem, LineItemView, ListCreditNotesFilter,
    ListInvoicesFilter, Product, User,
};
use crate::services::numbering::DocumentKind;
use crate::services::store::DocumentStore;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct State {
    customers: HashMap<Uuid, Customer>,
    products: HashMap<Uuid, Product>,
    users: HashMap<Uuid, User>,
    invoices: HashMap<Uuid, (Invoice, Vec<LineItem>)>,
    credit_notes: HashMap<Uuid, (CreditNote, Vec<LineItem>)>,
    sequences: HashMap<(DocumentKind, i32), u32>,
}

impl State {
    fn numbers(&self, kind: DocumentKind) -> Vec<&str> {
        match kind {
            DocumentKind::Invoice => self
                .invoices
                .values()
                .map(|(inv, _)| inv.invoice_number.as_str())
                .collect(),
            DocumentKind::CreditNote => self
                .credit_notes
                .values()
                .map(|(cn, _)| cn.credit_note_number.as_str())
                .collect(),
        }
    }

    /// Highest numeric suffix among numbers starting with `prefix`, 0 if none.
    fn max_sequence(&self, kind: DocumentKind, prefix: &str) -> u32 {
        self.numbers(kind)
            .into_iter()
            .filter_map(|number| number.strip_prefix(prefix))
            .filter(|suffix| !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()))
            .filter_map(|suffix| suffix.parse::<u32>().ok())
            .max()
            .unwrap_or(0)
    }

    fn views(&self, items: &[LineItem]) -> Vec<LineItemView> {
        let mut items: Vec<LineItemView> = items
            .iter()
            .map(|item| LineItemView {
                item: item.clone(),
                product: item
                    .product_id
                    .and_then(|id| self.products.get(&id).cloned()),
            })
            .collect();
        items.sort_by_key(|view| view.item.position);
        items
    }

    fn customer(&self, id: Uuid) -> Result<Customer, BillingError> {
        self.customers
            .get(&id)
            .cloned()
            .ok_or_else(|| BillingError::not_found("Customer", id))
    }

    fn hydrate_invoice(
        &self,
        invoice: &Invoice,
        items: &[LineItem],
    ) -> Result<InvoiceDocument, BillingError> {
        Ok(InvoiceDocument {
            invoice: invoice.clone(),
            customer: self.customer(invoice.customer_id)?,
            user: self.users.get(&invoice.user_id).cloned(),
            items: self.views(items),
        })
    }

    fn hydrate_credit_note(
        &self,
        credit_note: &CreditNote,
        items: &[LineItem],
    ) -> Result<CreditNoteDocument, BillingError> {
        Ok(CreditNoteDocument {
            credit_note: credit_note.clone(),
            customer: self.customer(credit_note.customer_id)?,
            user: self.users.get(&credit_note.user_id).cloned(),
            invoice: credit_note
                .invoice_id
                .and_then(|id| self.invoices.get(&id))
                .map(|(invoice, _)| invoice.clone()),
            items: self.views(items),
        })
    }
}

fn duplicate(kind: DocumentKind, number: &str) -> BillingError {
    BillingError::Database(anyhow::anyhow!(
        "duplicate {} number '{}'",
        kind,
        number
    ))
}

/// [`DocumentStore`] kept entirely in process memory.
///
/// Every operation runs under one lock, which gives the same atomicity as a
/// database transaction. Catalog data is seeded with the `insert_*` helpers.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_customer(&self, customer: Customer) {
        self.state
            .write()
            .await
            .customers
            .insert(customer.id, customer);
    }

    pub async fn insert_product(&self, product: Product) {
        self.state.write().await.products.insert(product.id, product);
    }

    pub async fn insert_user(&self, user: User) {
        self.state.write().await.users.insert(user.id, user);
    }

    /// Number of items currently stored for an invoice.
    pub async fn invoice_item_count(&self, id: Uuid) -> Option<usize> {
        self.state
            .read()
            .await
            .invoices
            .get(&id)
            .map(|(_, items)| items.len())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find_customer(&self, id: Uuid) -> Result<Option<Customer>, BillingError> {
        Ok(self.state.read().await.customers.get(&id).cloned())
    }

    async fn find_product(&self, id: Uuid) -> Result<Option<Product>, BillingError> {
        Ok(self.state.read().await.products.get(&id).cloned())
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>, BillingError> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn next_sequence(&self, kind: DocumentKind, year: i32) -> Result<u32, BillingError> {
        let mut state = self.state.write().await;
        let current = match state.sequences.get(&(kind, year)) {
            Some(value) => *value,
            None => state.max_sequence(kind, &kind.prefix(year)),
        };
        let next = current + 1;
        state.sequences.insert((kind, year), next);
        Ok(next)
    }

    async fn max_sequence_with_prefix(
        &self,
        kind: DocumentKind,
        prefix: &str,
    ) -> Result<u32, BillingError> {
        Ok(self.state.read().await.max_sequence(kind, prefix))
    }

    async fn insert_invoice(
        &self,
        invoice: &Invoice,
        items: &[LineItem],
    ) -> Result<(), BillingError> {
        let mut state = self.state.write().await;
        let taken = state
            .invoices
            .values()
            .any(|(existing, _)| existing.invoice_number == invoice.invoice_number);
        if taken {
            return Err(duplicate(DocumentKind::Invoice, &invoice.invoice_number));
        }
        state
            .invoices
            .insert(invoice.id, (invoice.clone(), items.to_vec()));
        Ok(())
    }

    async fn update_invoice(
        &self,
        invoice: &Invoice,
        items: Option<&[LineItem]>,
    ) -> Result<(), BillingError> {
        let mut state = self.state.write().await;
        let (stored, stored_items) = state
            .invoices
            .get_mut(&invoice.id)
            .ok_or_else(|| BillingError::not_found("Invoice", invoice.id))?;

        let certification = stored.certification.clone();
        *stored = invoice.clone();
        stored.certification = certification;
        if let Some(items) = items {
            *stored_items = items.to_vec();
        }
        Ok(())
    }

    async fn load_invoice(&self, id: Uuid) -> Result<Option<InvoiceDocument>, BillingError> {
        let state = self.state.read().await;
        state
            .invoices
            .get(&id)
            .map(|(invoice, items)| state.hydrate_invoice(invoice, items))
            .transpose()
    }

    async fn list_invoices(
        &self,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<InvoiceDocument>, BillingError> {
        let state = self.state.read().await;
        let mut matching: Vec<&(Invoice, Vec<LineItem>)> = state
            .invoices
            .values()
            .filter(|(inv, _)| filter.user_id.map_or(true, |id| inv.user_id == id))
            .filter(|(inv, _)| filter.customer_id.map_or(true, |id| inv.customer_id == id))
            .filter(|(inv, _)| filter.status.map_or(true, |s| inv.status == s))
            .collect();
        matching.sort_by(|(a, _), (b, _)| {
            b.created_utc
                .cmp(&a.created_utc)
                .then_with(|| b.invoice_number.cmp(&a.invoice_number))
        });

        matching
            .into_iter()
            .map(|(invoice, items)| state.hydrate_invoice(invoice, items))
            .collect()
    }

    async fn set_invoice_status(
        &self,
        id: Uuid,
        status: InvoiceStatus,
    ) -> Result<bool, BillingError> {
        let mut state = self.state.write().await;
        match state.invoices.get_mut(&id) {
            Some((invoice, _)) => {
                invoice.status = status;
                invoice.updated_utc = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_certification(
        &self,
        id: Uuid,
        certification: &Certification,
    ) -> Result<bool, BillingError> {
        let mut state = self.state.write().await;
        match state.invoices.get_mut(&id) {
            Some((invoice, _)) => {
                invoice.certification = certification.clone();
                invoice.updated_utc = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_invoice(&self, id: Uuid) -> Result<bool, BillingError> {
        let mut state = self.state.write().await;
        if state.invoices.remove(&id).is_none() {
            return Ok(false);
        }
        for (credit_note, _) in state.credit_notes.values_mut() {
            if credit_note.invoice_id == Some(id) {
                credit_note.invoice_id = None;
            }
        }
        Ok(true)
    }

    async fn insert_credit_note(
        &self,
        credit_note: &CreditNote,
        items: &[LineItem],
    ) -> Result<(), BillingError> {
        let mut state = self.state.write().await;
        let taken = state
            .credit_notes
            .values()
            .any(|(existing, _)| existing.credit_note_number == credit_note.credit_note_number);
        if taken {
            return Err(duplicate(
                DocumentKind::CreditNote,
                &credit_note.credit_note_number,
            ));
        }
        state
            .credit_notes
            .insert(credit_note.id, (credit_note.clone(), items.to_vec()));
        Ok(())
    }

    async fn update_credit_note(
        &self,
        credit_note: &CreditNote,
        items: Option<&[LineItem]>,
    ) -> Result<(), BillingError> {
        let mut state = self.state.write().await;
        let (stored, stored_items) = state
            .credit_notes
            .get_mut(&credit_note.id)
            .ok_or_else(|| BillingError::not_found("Credit note", credit_note.id))?;

        *stored = credit_note.clone();
        if let Some(items) = items {
            *stored_items = items.to_vec();
        }
        Ok(())
    }

    async fn load_credit_note(
        &self,
        id: Uuid,
    ) -> Result<Option<CreditNoteDocument>, BillingError> {
        let state = self.state.read().await;
        state
            .credit_notes
            .get(&id)
            .map(|(credit_note, items)| state.hydrate_credit_note(credit_note, items))
            .transpose()
    }

    async fn list_credit_notes(
        &self,
        filter: &ListCreditNotesFilter,
    ) -> Result<Vec<CreditNoteDocument>, BillingError> {
        let state = self.state.read().await;
        let mut matching: Vec<&(CreditNote, Vec<LineItem>)> = state
            .credit_notes
            .values()
            .filter(|(cn, _)| filter.user_id.map_or(true, |id| cn.user_id == id))
            .filter(|(cn, _)| filter.customer_id.map_or(true, |id| cn.customer_id == id))
            .filter(|(cn, _)| filter.invoice_id.map_or(true, |id| cn.invoice_id == Some(id)))
            .filter(|(cn, _)| filter.status.map_or(true, |s| cn.status == s))
            .collect();
        matching.sort_by(|(a, _), (b, _)| {
            b.created_utc
                .cmp(&a.created_utc)
                .then_with(|| b.credit_note_number.cmp(&a.credit_note_number))
        });

        matching
            .into_iter()
            .map(|(credit_note, items)| state.hydrate_credit_note(credit_note, items))
            .collect()
    }

    async fn set_credit_note_status(
        &self,
        id: Uuid,
        status: CreditNoteStatus,
    ) -> Result<bool, BillingError> {
        let mut state = self.state.write().await;
        match state.credit_notes.get_mut(&id) {
            Some((credit_note, _)) => {
                credit_note.status = status;
                credit_note.updated_utc = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_credit_note(&self, id: Uuid) -> Result<bool, BillingError> {
        Ok(self.state.write().await.credit_notes.remove(&id).is_some())
    }
}
