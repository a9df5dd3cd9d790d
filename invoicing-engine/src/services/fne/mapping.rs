//! Invoice to FNE request mapping.

use crate::models::{Customer, InvoiceDocument, DEFAULT_ITEM_DESCRIPTION};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};

/// Fixed invoice type sent for every certification.
pub const INVOICE_TYPE: &str = "sale";
pub const MEASUREMENT_UNIT: &str = "pièce";
/// Item reference used when a line has no catalog product.
pub const CUSTOM_REFERENCE: &str = "CUSTOM";

/// Point of sale and establishment the engine certifies on behalf of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issuer {
    pub point_of_sale: String,
    pub establishment: String,
}

impl Default for Issuer {
    fn default() -> Self {
        Self {
            point_of_sale: "Point de vente principal".to_string(),
            establishment: "Établissement principal".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentMethod {
    Cash,
    MobileMoney,
    Card,
    Chek,
    Transfert,
    Deferred,
}

impl PaymentMethod {
    /// Map a stored payment method. Unknown or missing values become `cash`.
    pub fn from_label(label: Option<&str>) -> Self {
        match label {
            Some("mobile-money") => PaymentMethod::MobileMoney,
            Some("card") => PaymentMethod::Card,
            Some("chek") => PaymentMethod::Chek,
            Some("transfert") => PaymentMethod::Transfert,
            Some("deferred") => PaymentMethod::Deferred,
            _ => PaymentMethod::Cash,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BillingTemplate {
    B2C,
    B2B,
    B2G,
    B2F,
}

impl BillingTemplate {
    /// Map a stored template. Unknown or missing values become `B2C`.
    pub fn from_label(label: Option<&str>) -> Self {
        match label {
            Some("B2B") => BillingTemplate::B2B,
            Some("B2G") => BillingTemplate::B2G,
            Some("B2F") => BillingTemplate::B2F,
            _ => BillingTemplate::B2C,
        }
    }
}

#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaxCode {
    TVA,
    TVAB,
    TVAC,
}

impl TaxCode {
    /// 18% is `TVA`, 9% is `TVAB`, 0% is `TVAC`; any other rate is `TVA`.
    pub fn for_rate(rate: Decimal) -> Self {
        if rate == Decimal::from(9) {
            TaxCode::TVAB
        } else if rate.is_zero() {
            TaxCode::TVAC
        } else {
            TaxCode::TVA
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertifyItem {
    pub taxes: Vec<TaxCode>,
    pub reference: String,
    pub description: String,
    pub quantity: i32,
    /// Unit price multiplied by 100.
    #[serde(serialize_with = "serialize_number")]
    pub amount: Decimal,
    pub discount: u32,
    pub measurement_unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertifyRequest {
    pub invoice_type: String,
    pub payment_method: PaymentMethod,
    pub template: BillingTemplate,
    pub client_ncc: String,
    pub client_company_name: String,
    pub client_phone: String,
    pub client_email: String,
    pub point_of_sale: String,
    pub establishment: String,
    pub items: Vec<CertifyItem>,
    pub discount: u32,
}

/// Decimals go on the wire as JSON numbers: integers when integral.
fn serialize_number<S: Serializer>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
    if value.fract().is_zero() {
        if let Some(whole) = value.to_i64() {
            return serializer.serialize_i64(whole);
        }
    }
    match value.to_f64() {
        Some(float) => serializer.serialize_f64(float),
        None => Err(serde::ser::Error::custom(format!(
            "amount {} is not representable",
            value
        ))),
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

impl CertifyRequest {
    pub fn for_invoice(document: &InvoiceDocument, issuer: &Issuer) -> Self {
        let customer: &Customer = &document.customer;
        let invoice = &document.invoice;

        let items = document
            .items
            .iter()
            .map(|view| {
                let item = &view.item;
                let product = view.product.as_ref();
                CertifyItem {
                    taxes: vec![TaxCode::for_rate(item.vat_rate)],
                    reference: product
                        .map(|p| p.id.to_string())
                        .unwrap_or_else(|| CUSTOM_REFERENCE.to_string()),
                    description: non_empty(Some(item.description.as_str()))
                        .or_else(|| product.and_then(|p| non_empty(Some(p.name.as_str()))))
                        .unwrap_or(DEFAULT_ITEM_DESCRIPTION)
                        .to_string(),
                    quantity: item.quantity,
                    amount: item.unit_price * Decimal::ONE_HUNDRED,
                    discount: 0,
                    measurement_unit: MEASUREMENT_UNIT.to_string(),
                }
            })
            .collect();

        CertifyRequest {
            invoice_type: INVOICE_TYPE.to_string(),
            payment_method: PaymentMethod::from_label(invoice.payment_method.as_deref()),
            template: BillingTemplate::from_label(invoice.template.as_deref()),
            client_ncc: customer.tax_identifier().to_string(),
            client_company_name: customer.name.clone(),
            client_phone: customer.phone.clone().unwrap_or_default(),
            client_email: customer.email.clone(),
            point_of_sale: issuer.point_of_sale.clone(),
            establishment: issuer.establishment.clone(),
            items,
            discount: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Certification, Invoice, InvoiceStatus, LineItem, LineItemView, Product,
    };
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use uuid::Uuid;

    fn line(unit_price: Decimal, vat_rate: Decimal, description: &str, product: Option<Product>) -> LineItemView {
        let subtotal = unit_price;
        let vat_amount = subtotal * vat_rate / Decimal::ONE_HUNDRED;
        LineItemView {
            item: LineItem {
                id: Uuid::new_v4(),
                product_id: product.as_ref().map(|p| p.id),
                quantity: 1,
                unit_price,
                vat_rate,
                subtotal,
                vat_amount,
                total: subtotal + vat_amount,
                description: description.to_string(),
                position: 0,
            },
            product,
        }
    }

    fn document(payment_method: Option<&str>, template: Option<&str>, items: Vec<LineItemView>) -> InvoiceDocument {
        let mut customer = Customer::new("Acme SARL", "billing@acme.ci");
        customer.vat_number = Some("CI-VAT-9".into());
        let now = Utc::now();
        InvoiceDocument {
            invoice: Invoice {
                id: Uuid::new_v4(),
                invoice_number: "2026-0001".into(),
                status: InvoiceStatus::Sent,
                issue_date: None,
                due_date: None,
                subtotal: Decimal::ZERO,
                vat_amount: Decimal::ZERO,
                total: Decimal::ZERO,
                notes: None,
                payment_terms: None,
                payment_method: payment_method.map(String::from),
                template: template.map(String::from),
                customer_id: customer.id,
                user_id: Uuid::new_v4(),
                certification: Certification::Draft,
                created_utc: now,
                updated_utc: now,
            },
            customer,
            user: None,
            items,
        }
    }

    #[test]
    fn maps_tax_codes() {
        assert_eq!(TaxCode::for_rate(dec!(18)), TaxCode::TVA);
        assert_eq!(TaxCode::for_rate(dec!(9.00)), TaxCode::TVAB);
        assert_eq!(TaxCode::for_rate(Decimal::ZERO), TaxCode::TVAC);
        assert_eq!(TaxCode::for_rate(dec!(5.5)), TaxCode::TVA);
    }

    #[test]
    fn unknown_labels_fall_back() {
        assert_eq!(PaymentMethod::from_label(Some("bitcoin")), PaymentMethod::Cash);
        assert_eq!(PaymentMethod::from_label(None), PaymentMethod::Cash);
        assert_eq!(PaymentMethod::from_label(Some("mobile-money")), PaymentMethod::MobileMoney);
        assert_eq!(BillingTemplate::from_label(Some("B2X")), BillingTemplate::B2C);
        assert_eq!(BillingTemplate::from_label(Some("B2G")), BillingTemplate::B2G);
    }

    #[test]
    fn builds_wire_body() {
        let product = Product::new("Audit", dec!(1200), dec!(9));
        let product_id = product.id.to_string();
        let doc = document(
            Some("mobile-money"),
            Some("B2B"),
            vec![
                line(dec!(500000), dec!(18), "Installation", None),
                line(dec!(12.5), dec!(9), "", Some(product)),
            ],
        );

        let body = serde_json::to_value(CertifyRequest::for_invoice(&doc, &Issuer::default())).unwrap();

        assert_eq!(body["invoiceType"], "sale");
        assert_eq!(body["paymentMethod"], "mobile-money");
        assert_eq!(body["template"], "B2B");
        assert_eq!(body["clientNcc"], "CI-VAT-9");
        assert_eq!(body["clientPhone"], "");
        assert_eq!(body["pointOfSale"], "Point de vente principal");
        assert_eq!(body["discount"], 0);

        assert_eq!(
            body["items"][0],
            json!({
                "taxes": ["TVA"],
                "reference": "CUSTOM",
                "description": "Installation",
                "quantity": 1,
                "amount": 50000000,
                "discount": 0,
                "measurementUnit": "pièce"
            })
        );
        assert_eq!(body["items"][1]["taxes"], json!(["TVAB"]));
        assert_eq!(body["items"][1]["reference"], product_id);
        assert_eq!(body["items"][1]["description"], "Audit");
        assert_eq!(body["items"][1]["amount"], 1250);
    }

    #[test]
    fn siret_preferred_over_vat_number() {
        let mut doc = document(None, None, vec![]);
        doc.customer.siret = Some("SIRET-1".into());
        let request = CertifyRequest::for_invoice(&doc, &Issuer::default());
        assert_eq!(request.client_ncc, "SIRET-1");
        assert_eq!(request.payment_method, PaymentMethod::Cash);
        assert_eq!(request.template, BillingTemplate::B2C);
        assert!(request.items.is_empty());
    }
}
