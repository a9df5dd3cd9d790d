//! Document status machine.

use crate::error::BillingError;
use crate::models::{CreditNoteDocument, CreditNoteStatus, InvoiceDocument, InvoiceStatus};
use crate::services::locks::DocumentLocks;
use crate::services::metrics::STATUS_CHANGES_TOTAL;
use crate::services::store::DocumentStore;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Status enumeration with a documented lifecycle graph.
pub trait Lifecycle: Copy + Eq {
    /// Document kind, for messages and metric labels.
    const KIND: &'static str;

    fn label(&self) -> &'static str;

    fn is_terminal(&self) -> bool;

    /// Whether the documented lifecycle allows moving from `self` to `next`.
    fn leads_to(&self, next: Self) -> bool;
}

impl Lifecycle for InvoiceStatus {
    const KIND: &'static str = "invoice";

    fn label(&self) -> &'static str {
        self.as_str()
    }

    fn is_terminal(&self) -> bool {
        matches!(self, InvoiceStatus::Paid | InvoiceStatus::Cancelled)
    }

    fn leads_to(&self, next: Self) -> bool {
        use InvoiceStatus::*;
        match (self, next) {
            (from, to) if *from == to => true,
            (from, Cancelled) => !from.is_terminal(),
            (Draft, Sent) => true,
            (Sent, Paid) | (Sent, Overdue) => true,
            (Overdue, Paid) => true,
            _ => false,
        }
    }
}

impl Lifecycle for CreditNoteStatus {
    const KIND: &'static str = "credit_note";

    fn label(&self) -> &'static str {
        self.as_str()
    }

    fn is_terminal(&self) -> bool {
        matches!(self, CreditNoteStatus::Applied | CreditNoteStatus::Cancelled)
    }

    fn leads_to(&self, next: Self) -> bool {
        use CreditNoteStatus::*;
        match (self, next) {
            (from, to) if *from == to => true,
            (from, Cancelled) => !from.is_terminal(),
            (Draft, Issued) => true,
            (Issued, Applied) => true,
            _ => false,
        }
    }
}

/// Which status changes are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusPolicy {
    /// Any status may be set from any status.
    #[default]
    Permissive,
    /// Only moves along the documented lifecycle graph.
    Lifecycle,
}

impl StatusPolicy {
    pub fn check<S: Lifecycle>(&self, from: S, to: S) -> Result<(), BillingError> {
        match self {
            StatusPolicy::Permissive => Ok(()),
            StatusPolicy::Lifecycle if from.leads_to(to) => Ok(()),
            StatusPolicy::Lifecycle => Err(BillingError::InvalidTransition {
                kind: S::KIND,
                from: from.label(),
                to: to.label(),
            }),
        }
    }
}

impl FromStr for StatusPolicy {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "permissive" => Ok(StatusPolicy::Permissive),
            "lifecycle" => Ok(StatusPolicy::Lifecycle),
            other => Err(BillingError::validation(format!(
                "Unknown status policy '{}'",
                other
            ))),
        }
    }
}

/// Applies status changes to stored documents and returns the re-read
/// document.
#[derive(Clone)]
pub struct StatusMachine {
    store: Arc<dyn DocumentStore>,
    locks: Arc<DocumentLocks>,
    policy: StatusPolicy,
}

impl StatusMachine {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        locks: Arc<DocumentLocks>,
        policy: StatusPolicy,
    ) -> Self {
        Self {
            store,
            locks,
            policy,
        }
    }

    pub fn policy(&self) -> StatusPolicy {
        self.policy
    }

    #[instrument(skip(self), fields(invoice_id = %id, status = %status))]
    pub async fn update_invoice_status(
        &self,
        id: Uuid,
        status: InvoiceStatus,
    ) -> Result<InvoiceDocument, BillingError> {
        let _guard = self.locks.acquire(id).await;

        let current = self
            .store
            .load_invoice(id)
            .await?
            .ok_or_else(|| BillingError::not_found("Invoice", id))?;

        if let Err(e) = self.policy.check(current.invoice.status, status) {
            warn!(from = %current.invoice.status, "Invoice status change rejected");
            return Err(e);
        }

        if !self.store.set_invoice_status(id, status).await? {
            return Err(BillingError::not_found("Invoice", id));
        }

        STATUS_CHANGES_TOTAL
            .with_label_values(&[InvoiceStatus::KIND, status.as_str()])
            .inc();
        info!(
            invoice_number = %current.invoice.invoice_number,
            from = %current.invoice.status,
            "Invoice status updated"
        );

        self.store
            .load_invoice(id)
            .await?
            .ok_or_else(|| BillingError::not_found("Invoice", id))
    }

    #[instrument(skip(self), fields(credit_note_id = %id, status = %status))]
    pub async fn update_credit_note_status(
        &self,
        id: Uuid,
        status: CreditNoteStatus,
    ) -> Result<CreditNoteDocument, BillingError> {
        let _guard = self.locks.acquire(id).await;

        let current = self
            .store
            .load_credit_note(id)
            .await?
            .ok_or_else(|| BillingError::not_found("Credit note", id))?;

        if let Err(e) = self.policy.check(current.credit_note.status, status) {
            warn!(from = %current.credit_note.status, "Credit note status change rejected");
            return Err(e);
        }

        if !self.store.set_credit_note_status(id, status).await? {
            return Err(BillingError::not_found("Credit note", id));
        }

        STATUS_CHANGES_TOTAL
            .with_label_values(&[CreditNoteStatus::KIND, status.as_str()])
            .inc();
        info!(
            credit_note_number = %current.credit_note.credit_note_number,
            from = %current.credit_note.status,
            "Credit note status updated"
        );

        self.store
            .load_credit_note(id)
            .await?
            .ok_or_else(|| BillingError::not_found("Credit note", id))
    }
}
