//! Error taxonomy for the billing document engine.

use service_core::error::AppError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("{entity} with ID {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invoice is already certified with FNE")]
    AlreadyCertified,

    #[error("FNE API Error: {0}")]
    CertificationTransport(String),

    #[error("FNE certification failed: {0}")]
    CertificationRejected(String),

    #[error("Cannot move {kind} from '{from}' to '{to}'")]
    InvalidTransition {
        kind: &'static str,
        from: &'static str,
        to: &'static str,
    },

    #[error("Database error: {0}")]
    Database(anyhow::Error),
}

impl BillingError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        BillingError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        BillingError::Validation(message.into())
    }

    /// Short label used for the error counter.
    pub fn kind(&self) -> &'static str {
        match self {
            BillingError::NotFound { .. } => "not_found",
            BillingError::Validation(_) => "validation",
            BillingError::AlreadyCertified => "already_certified",
            BillingError::CertificationTransport(_) => "certification_transport",
            BillingError::CertificationRejected(_) => "certification_rejected",
            BillingError::InvalidTransition { .. } => "invalid_transition",
            BillingError::Database(_) => "database",
        }
    }
}

impl From<validator::ValidationErrors> for BillingError {
    fn from(errors: validator::ValidationErrors) -> Self {
        BillingError::Validation(errors.to_string())
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(anyhow::Error::new(err))
    }
}

impl From<BillingError> for AppError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::NotFound { .. } => AppError::NotFound(anyhow::anyhow!(err.to_string())),
            BillingError::Validation(_)
            | BillingError::AlreadyCertified
            | BillingError::CertificationTransport(_)
            | BillingError::CertificationRejected(_)
            | BillingError::InvalidTransition { .. } => {
                AppError::BadRequest(anyhow::anyhow!(err.to_string()))
            }
            BillingError::Database(e) => AppError::DatabaseError(e),
        }
    }
}
