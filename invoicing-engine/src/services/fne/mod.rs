//! FNE (electronic invoice certification) integration.

pub mod client;
pub mod mapping;

use crate::models::CertificationRecord;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub use client::{FneHttpClient, MockFneProvider, MockOutcome};
pub use mapping::{BillingTemplate, CertifyItem, CertifyRequest, Issuer, PaymentMethod, TaxCode};

#[derive(Debug, Error)]
pub enum FneError {
    #[error("{0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Non-2xx answer. `message` is the provider's own message when it sent one.
    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("invalid FNE response: {0}")]
    Parse(String),
}

/// Narrow interface to the certification authority.
#[async_trait]
pub trait CertificationProvider: Send + Sync {
    async fn certify(&self, request: &CertifyRequest) -> Result<CertifyResponse, FneError>;
}

/// Body returned by the certification endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertifyResponse {
    pub success: bool,
    #[serde(default)]
    pub data: Option<CertifyData>,
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertifyData {
    #[serde(default)]
    pub ncc: Option<String>,
    pub reference: String,
    pub token: String,
    #[serde(default)]
    pub warning: bool,
    #[serde(rename = "balance_sticker", default)]
    pub balance_sticker: Option<i64>,
    pub invoice: CertifiedInvoice,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertifiedInvoice {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub vat_amount: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub qr_code: Option<String>,
    pub created_at: String,
    #[serde(default)]
    pub status: Option<String>,
}

impl CertifyResponse {
    /// Failure message for a `success = false` answer.
    pub fn failure_message(&self) -> String {
        self.error
            .clone()
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| "Unknown error".to_string())
    }

    /// Certification record carried by a successful answer.
    pub fn record(&self) -> Result<CertificationRecord, FneError> {
        let data = self
            .data
            .as_ref()
            .ok_or_else(|| FneError::Parse("success response without data".to_string()))?;

        Ok(CertificationRecord {
            reference: data.reference.clone(),
            token: data.token.clone(),
            certified_at: parse_timestamp(&data.invoice.created_at)?,
            balance_sticker: data.balance_sticker,
        })
    }
}

/// Parse the provider's timestamp. RFC 3339 is expected; a bare
/// `YYYY-MM-DDTHH:MM:SS[.fff]` is read as UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, FneError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| naive.and_utc())
        .map_err(|e| FneError::Parse(format!("createdAt '{}': {}", value, e)))
}
