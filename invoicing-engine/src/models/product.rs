//! Catalog product model for invoicing-engine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Catalog product a line item may reference for its defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    /// Percentage, e.g. `18` for 18%.
    pub vat_rate: Decimal,
    pub unit: Option<String>,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
}

impl Product {
    pub fn new(name: impl Into<String>, price: Decimal, vat_rate: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            price,
            vat_rate,
            unit: None,
            is_active: true,
            created_utc: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}
