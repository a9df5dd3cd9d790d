//! Engine construction and wiring.

use crate::config::EngineConfig;
use crate::services::certification::DEFAULT_CERTIFICATION_TIMEOUT;
use crate::services::fne::Issuer;
use crate::services::{
    init_metrics, CertificationCoordinator, CertificationProvider, CreditNoteService, Database,
    DocumentLocks, DocumentStore, FneHttpClient, InvoiceService, StatusMachine, StatusPolicy,
};
use service_core::error::AppError;
use service_core::observability::init_tracing;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Tunables that do not come from the store or the provider.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub status_policy: StatusPolicy,
    pub issuer: Issuer,
    pub certification_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            status_policy: StatusPolicy::default(),
            issuer: Issuer::default(),
            certification_timeout: DEFAULT_CERTIFICATION_TIMEOUT,
        }
    }
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            status_policy: config.status_policy,
            issuer: config.fne.issuer(),
            certification_timeout: config.fne.timeout(),
        }
    }
}

/// Install the tracing subscriber (JSON logs, optional OTLP export).
pub fn init_telemetry(config: &EngineConfig) -> Result<(), AppError> {
    init_tracing(
        &config.common.service_name,
        &config.common.log_level,
        config.common.otlp_endpoint.as_deref(),
    )
}

/// The billing document engine: aggregators, status machine and
/// certification coordinator over one store.
pub struct BillingEngine {
    pub invoices: InvoiceService,
    pub credit_notes: CreditNoteService,
    pub statuses: StatusMachine,
    pub certification: CertificationCoordinator,
    store: Arc<dyn DocumentStore>,
}

impl BillingEngine {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        provider: Arc<dyn CertificationProvider>,
        settings: EngineSettings,
    ) -> Self {
        let locks = Arc::new(DocumentLocks::new());
        Self {
            invoices: InvoiceService::new(store.clone(), locks.clone(), settings.status_policy),
            credit_notes: CreditNoteService::new(
                store.clone(),
                locks.clone(),
                settings.status_policy,
            ),
            statuses: StatusMachine::new(store.clone(), locks, settings.status_policy),
            certification: CertificationCoordinator::new(
                store.clone(),
                provider,
                settings.issuer,
                settings.certification_timeout,
            ),
            store,
        }
    }

    /// Connect to PostgreSQL, apply migrations and wire the FNE HTTP client.
    pub async fn connect(config: &EngineConfig) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        db.run_migrations().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            e
        })?;

        let provider = FneHttpClient::new(&config.fne.api_url, config.fne.timeout())
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("FNE client: {}", e)))?;

        info!(
            fne_endpoint = %provider.endpoint(),
            status_policy = ?config.status_policy,
            "Billing engine ready"
        );

        Ok(Self::new(
            Arc::new(db),
            Arc::new(provider),
            EngineSettings::from(config),
        ))
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }
}
