//! Customer model for invoicing-engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Customer a document is addressed to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Customer {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    /// Trade registry identifier, preferred as the client NCC on certification.
    pub siret: Option<String>,
    pub vat_number: Option<String>,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
}

impl Customer {
    /// Minimal active customer, mostly useful for seeding.
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            email: email.into(),
            phone: None,
            address: None,
            city: None,
            postal_code: None,
            country: None,
            siret: None,
            vat_number: None,
            is_active: true,
            created_utc: Utc::now(),
        }
    }

    /// Tax/trade identifier sent to FNE: siret, else VAT number, else empty.
    pub fn tax_identifier(&self) -> &str {
        [self.siret.as_deref(), self.vat_number.as_deref()]
            .into_iter()
            .flatten()
            .find(|v| !v.is_empty())
            .unwrap_or("")
    }
}
