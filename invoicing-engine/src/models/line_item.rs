//! Line item model for invoicing-engine.

use super::Product;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Label used when neither the request nor the product describes the line.
pub const DEFAULT_ITEM_DESCRIPTION: &str = "Service";

/// Priced, taxed line of an invoice or credit note.
///
/// Owned by exactly one document; the document holds the ordered list and
/// items never point back at it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct LineItem {
    pub id: Uuid,
    pub product_id: Option<Uuid>,
    pub quantity: i32,
    pub unit_price: Decimal,
    /// Percentage, e.g. `18` for 18%.
    pub vat_rate: Decimal,
    /// `unit_price * quantity`
    pub subtotal: Decimal,
    /// `subtotal * vat_rate / 100`
    pub vat_amount: Decimal,
    /// `subtotal + vat_amount`
    pub total: Decimal,
    pub description: String,
    pub position: i32,
}

impl LineItem {
    /// Whether the derived amounts agree with price, quantity and rate.
    pub fn is_consistent(&self) -> bool {
        self.subtotal == self.unit_price * Decimal::from(self.quantity)
            && self.vat_amount == self.subtotal * self.vat_rate / Decimal::ONE_HUNDRED
            && self.total == self.subtotal + self.vat_amount
    }
}

/// Raw line as supplied by a caller, before pricing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct LineItemRequest {
    pub product_id: Option<Uuid>,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
    pub unit_price: Option<Decimal>,
    pub vat_rate: Option<Decimal>,
    pub description: Option<String>,
}

impl LineItemRequest {
    pub fn new(quantity: i32) -> Self {
        Self {
            quantity,
            ..Default::default()
        }
    }

    pub fn product(mut self, product_id: Uuid) -> Self {
        self.product_id = Some(product_id);
        self
    }

    pub fn unit_price(mut self, unit_price: Decimal) -> Self {
        self.unit_price = Some(unit_price);
        self
    }

    pub fn vat_rate(mut self, vat_rate: Decimal) -> Self {
        self.vat_rate = Some(vat_rate);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Line item with its product resolved, as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItemView {
    #[serde(flatten)]
    pub item: LineItem,
    pub product: Option<Product>,
}
