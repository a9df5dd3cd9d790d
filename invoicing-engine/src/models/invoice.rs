//! Invoice model for invoicing-engine.

use super::{Customer, LineItemRequest, LineItemView, User};
use crate::error::BillingError;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
    Overdue,
    Cancelled,
}

impl InvoiceStatus {
    pub const ALL: [InvoiceStatus; 5] = [
        InvoiceStatus::Draft,
        InvoiceStatus::Sent,
        InvoiceStatus::Paid,
        InvoiceStatus::Overdue,
        InvoiceStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for InvoiceStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InvoiceStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| BillingError::validation(format!("Unknown invoice status '{}'", s)))
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// FNE certification status of an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FneStatus {
    Draft,
    Certified,
    Failed,
}

impl FneStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FneStatus::Draft => "draft",
            FneStatus::Certified => "certified",
            FneStatus::Failed => "failed",
        }
    }
}

impl FromStr for FneStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(FneStatus::Draft),
            "certified" => Ok(FneStatus::Certified),
            "failed" => Ok(FneStatus::Failed),
            other => Err(BillingError::validation(format!(
                "Unknown FNE status '{}'",
                other
            ))),
        }
    }
}

/// What FNE hands back for a certified invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificationRecord {
    pub reference: String,
    pub token: String,
    pub certified_at: DateTime<Utc>,
    pub balance_sticker: Option<i64>,
}

/// Certification sub-record of an invoice.
///
/// The record only exists in the `Certified` state, so reference, token and
/// timestamp can never be set on a draft or failed invoice.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "fne_status", rename_all = "snake_case")]
pub enum Certification {
    #[default]
    Draft,
    Failed,
    Certified(CertificationRecord),
}

impl Certification {
    pub fn status(&self) -> FneStatus {
        match self {
            Certification::Draft => FneStatus::Draft,
            Certification::Failed => FneStatus::Failed,
            Certification::Certified(_) => FneStatus::Certified,
        }
    }

    pub fn record(&self) -> Option<&CertificationRecord> {
        match self {
            Certification::Certified(record) => Some(record),
            _ => None,
        }
    }
}

/// Invoice header. Items are held by [`InvoiceDocument`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    pub invoice_number: String,
    pub status: InvoiceStatus,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub subtotal: Decimal,
    pub vat_amount: Decimal,
    pub total: Decimal,
    pub notes: Option<String>,
    pub payment_terms: Option<String>,
    pub payment_method: Option<String>,
    /// Billing template category (B2C, B2B, ...).
    pub template: Option<String>,
    pub customer_id: Uuid,
    pub user_id: Uuid,
    pub certification: Certification,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Invoice {
    pub fn fne_status(&self) -> FneStatus {
        self.certification.status()
    }

    pub fn is_certified(&self) -> bool {
        self.fne_status() == FneStatus::Certified
    }
}

/// Fully hydrated invoice: header plus resolved customer, issuer and items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceDocument {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub customer: Customer,
    pub user: Option<User>,
    pub items: Vec<LineItemView>,
}

/// Filter parameters for listing invoices.
#[derive(Debug, Clone, Default)]
pub struct ListInvoicesFilter {
    pub user_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    pub status: Option<InvoiceStatus>,
}

/// Input for creating an invoice.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateInvoice {
    pub customer_id: Uuid,
    pub user_id: Uuid,
    /// Defaults to `draft`.
    pub status: Option<InvoiceStatus>,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub payment_terms: Option<String>,
    pub payment_method: Option<String>,
    pub template: Option<String>,
    #[serde(default)]
    pub items: Vec<LineItemRequest>,
}

/// Input for updating an invoice.
///
/// `items`, when present, replaces the whole item set and recomputes the
/// totals. `subtotal`/`vat_amount`/`total` are explicit overrides for
/// header-only updates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateInvoice {
    pub customer_id: Option<Uuid>,
    pub status: Option<InvoiceStatus>,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub payment_terms: Option<String>,
    pub payment_method: Option<String>,
    pub template: Option<String>,
    pub items: Option<Vec<LineItemRequest>>,
    pub subtotal: Option<Decimal>,
    pub vat_amount: Option<Decimal>,
    pub total: Option<Decimal>,
}
