//! Document number generator.

use crate::error::BillingError;
use crate::services::store::DocumentStore;
use chrono::{Datelike, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Kind of numbered document. Each kind has its own per-year sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Invoice,
    CreditNote,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Invoice => "invoice",
            DocumentKind::CreditNote => "credit_note",
        }
    }

    /// Number prefix shared by every document of this kind in `year`.
    pub fn prefix(&self, year: i32) -> String {
        match self {
            DocumentKind::Invoice => format!("{}-", year),
            DocumentKind::CreditNote => format!("CN-{}-", year),
        }
    }

    pub fn format_number(&self, year: i32, sequence: u32) -> String {
        format!("{}{:04}", self.prefix(year), sequence)
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hands out year-scoped sequential numbers.
///
/// The sequence is reserved atomically by the store, so concurrent callers
/// never share a number and a number is never handed out twice, even after
/// its document is deleted.
#[derive(Clone)]
pub struct NumberGenerator {
    store: Arc<dyn DocumentStore>,
}

impl NumberGenerator {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self), fields(kind = %kind, year = year))]
    pub async fn next(&self, kind: DocumentKind, year: i32) -> Result<String, BillingError> {
        let sequence = self.store.next_sequence(kind, year).await?;
        let number = kind.format_number(year, sequence);
        debug!(number = %number, "Document number reserved");
        Ok(number)
    }

    /// Next number in the current calendar year (UTC).
    pub async fn next_current_year(&self, kind: DocumentKind) -> Result<String, BillingError> {
        self.next(kind, Utc::now().year()).await
    }
}
