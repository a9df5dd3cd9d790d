//! Credit note model for invoicing-engine.

use super::{Customer, Invoice, LineItemRequest, LineItemView, User};
use crate::error::BillingError;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

/// Credit note status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditNoteStatus {
    Draft,
    Issued,
    Applied,
    Cancelled,
}

impl CreditNoteStatus {
    pub const ALL: [CreditNoteStatus; 4] = [
        CreditNoteStatus::Draft,
        CreditNoteStatus::Issued,
        CreditNoteStatus::Applied,
        CreditNoteStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CreditNoteStatus::Draft => "draft",
            CreditNoteStatus::Issued => "issued",
            CreditNoteStatus::Applied => "applied",
            CreditNoteStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for CreditNoteStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CreditNoteStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| {
                BillingError::validation(format!("Unknown credit note status '{}'", s))
            })
    }
}

impl fmt::Display for CreditNoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credit note header. Items, when the note is itemized, live in
/// [`CreditNoteDocument`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditNote {
    pub id: Uuid,
    pub credit_note_number: String,
    pub status: CreditNoteStatus,
    pub issue_date: NaiveDate,
    pub amount: Decimal,
    pub vat_amount: Decimal,
    pub total: Decimal,
    pub reason: String,
    pub notes: Option<String>,
    pub customer_id: Uuid,
    pub user_id: Uuid,
    /// Invoice this note corrects.
    pub invoice_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Fully hydrated credit note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditNoteDocument {
    #[serde(flatten)]
    pub credit_note: CreditNote,
    pub customer: Customer,
    pub user: Option<User>,
    pub invoice: Option<Invoice>,
    pub items: Vec<LineItemView>,
}

/// Filter parameters for listing credit notes.
#[derive(Debug, Clone, Default)]
pub struct ListCreditNotesFilter {
    pub user_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    pub invoice_id: Option<Uuid>,
    pub status: Option<CreditNoteStatus>,
}

/// Input for creating a credit note.
///
/// With `items` the amounts are computed from them; without, the flat
/// `amount`/`vat_amount` are used (both default to zero).
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct CreateCreditNote {
    pub customer_id: Uuid,
    pub user_id: Uuid,
    pub invoice_id: Option<Uuid>,
    pub issue_date: NaiveDate,
    pub amount: Option<Decimal>,
    pub vat_amount: Option<Decimal>,
    #[validate(length(min = 1, message = "Reason is required"))]
    pub reason: String,
    pub notes: Option<String>,
    #[serde(default)]
    pub items: Vec<LineItemRequest>,
}

/// Input for updating a credit note.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateCreditNote {
    pub customer_id: Option<Uuid>,
    pub invoice_id: Option<Uuid>,
    pub status: Option<CreditNoteStatus>,
    pub issue_date: Option<NaiveDate>,
    pub amount: Option<Decimal>,
    pub vat_amount: Option<Decimal>,
    pub total: Option<Decimal>,
    #[validate(length(min = 1, message = "Reason cannot be empty"))]
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub items: Option<Vec<LineItemRequest>>,
}
