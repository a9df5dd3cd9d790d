//! Line-item calculator.
//!
//! Turns raw line requests into priced, taxed [`LineItem`]s. Amounts are
//! summed exactly as supplied; nothing is rounded here. Precision is enforced
//! at the boundary by [`validate_amount`].

use crate::error::BillingError;
use crate::models::{LineItem, LineItemRequest, Product, DEFAULT_ITEM_DESCRIPTION};
use crate::services::store::DocumentStore;
use rust_decimal::Decimal;
use std::collections::HashMap;
use uuid::Uuid;
use validator::Validate;

/// Largest number of decimal places accepted for a monetary amount.
pub const MONEY_SCALE: u32 = 2;

/// How the VAT rate of a line is resolved when the request does not fully
/// specify it. Invoices and credit notes resolve differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VatRule {
    /// Explicit rate (zero included), else product rate, else 18%.
    Invoice,
    /// Explicit non-zero rate, else product rate, else 10%. An explicit 0 is
    /// treated as absent.
    CreditNote,
}

impl VatRule {
    pub fn default_rate(&self) -> Decimal {
        match self {
            VatRule::Invoice => Decimal::from(18),
            VatRule::CreditNote => Decimal::from(10),
        }
    }

    fn resolve(&self, explicit: Option<Decimal>, product: Option<&Product>) -> Decimal {
        let explicit = match self {
            VatRule::Invoice => explicit,
            VatRule::CreditNote => explicit.filter(|rate| !rate.is_zero()),
        };

        explicit
            .or_else(|| product.map(|p| p.vat_rate))
            .unwrap_or_else(|| self.default_rate())
    }
}

/// Result of pricing a full set of line requests.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PricedItems {
    pub items: Vec<LineItem>,
    pub subtotal: Decimal,
    pub vat_total: Decimal,
}

impl PricedItems {
    pub fn total(&self) -> Decimal {
        self.subtotal + self.vat_total
    }
}

/// Reject negative amounts and amounts with more than two decimal places.
pub fn validate_amount(field: &str, value: Decimal) -> Result<(), BillingError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(BillingError::validation(format!(
            "{} must not be negative",
            field
        )));
    }
    if value.normalize().scale() > MONEY_SCALE {
        return Err(BillingError::validation(format!(
            "{} must have at most {} decimal places",
            field, MONEY_SCALE
        )));
    }
    Ok(())
}

fn validate_rate(value: Decimal) -> Result<(), BillingError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(BillingError::validation("VAT rate must not be negative"));
    }
    Ok(())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Price `requests` in order.
///
/// `lookup` resolves product references; an unresolved reference fails with
/// `NotFound`. Unit price is the explicit price, else the product price, else
/// zero.
pub fn price_items<'a, F>(
    requests: &[LineItemRequest],
    rule: VatRule,
    lookup: F,
) -> Result<PricedItems, BillingError>
where
    F: Fn(Uuid) -> Option<&'a Product>,
{
    let mut priced = PricedItems::default();

    for (position, request) in requests.iter().enumerate() {
        request.validate()?;
        if let Some(price) = request.unit_price {
            validate_amount("Unit price", price)?;
        }
        if let Some(rate) = request.vat_rate {
            validate_rate(rate)?;
        }

        let product = match request.product_id {
            Some(id) => Some(lookup(id).ok_or_else(|| BillingError::not_found("Product", id))?),
            None => None,
        };

        let unit_price = request
            .unit_price
            .or_else(|| product.map(|p| p.price))
            .unwrap_or(Decimal::ZERO);
        let vat_rate = rule.resolve(request.vat_rate, product);

        let subtotal = unit_price * Decimal::from(request.quantity);
        let vat_amount = subtotal * vat_rate / Decimal::ONE_HUNDRED;

        let description = non_empty(request.description.as_deref())
            .or_else(|| product.and_then(|p| non_empty(p.description.as_deref())))
            .unwrap_or(DEFAULT_ITEM_DESCRIPTION)
            .to_string();

        priced.subtotal += subtotal;
        priced.vat_total += vat_amount;
        priced.items.push(LineItem {
            id: Uuid::new_v4(),
            product_id: request.product_id,
            quantity: request.quantity,
            unit_price,
            vat_rate,
            subtotal,
            vat_amount,
            total: subtotal + vat_amount,
            description,
            position: position as i32,
        });
    }

    Ok(priced)
}

/// Resolve every referenced product through `store`, then price.
pub(crate) async fn price_with_store(
    store: &dyn DocumentStore,
    requests: &[LineItemRequest],
    rule: VatRule,
) -> Result<PricedItems, BillingError> {
    let mut products: HashMap<Uuid, Product> = HashMap::new();
    for id in requests.iter().filter_map(|r| r.product_id) {
        if products.contains_key(&id) {
            continue;
        }
        let product = store
            .find_product(id)
            .await?
            .ok_or_else(|| BillingError::not_found("Product", id))?;
        products.insert(id, product);
    }

    price_items(requests, rule, |id| products.get(&id))
}
