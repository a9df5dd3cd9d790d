//! FNE HTTP client and a scriptable mock provider.

use super::{CertificationProvider, CertifiedInvoice, CertifyData, CertifyRequest, CertifyResponse, FneError};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use service_core::observability::trace_headers;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Path of the certification endpoint, relative to the API base URL.
pub const CERTIFY_PATH: &str = "/api/fne/certify/invoice";

/// Default API base URL.
pub const DEFAULT_FNE_API_URL: &str = "https://api.fne.example.com";

pub struct FneHttpClient {
    client: Client,
    endpoint: String,
    timeout: Duration,
}

impl FneHttpClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FneError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FneError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), CERTIFY_PATH),
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Pull the provider's `message` (or `error`) out of an error body.
fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    parsed
        .as_ref()
        .and_then(|value| {
            ["message", "error"]
                .into_iter()
                .find_map(|key| value.get(key).and_then(|v| v.as_str()))
        })
        .map(str::to_string)
        .unwrap_or_else(|| format!("Request failed with status code {}", status.as_u16()))
}

#[async_trait]
impl CertificationProvider for FneHttpClient {
    #[instrument(skip(self, request), fields(items = request.items.len()))]
    async fn certify(&self, request: &CertifyRequest) -> Result<CertifyResponse, FneError> {
        let response = self
            .client
            .post(&self.endpoint)
            .headers(trace_headers(None))
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FneError::Timeout(self.timeout)
                } else {
                    FneError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = error_message(status, &body);
            warn!(status = status.as_u16(), message = %message, "FNE API returned error status");
            return Err(FneError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: CertifyResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                FneError::Timeout(self.timeout)
            } else {
                FneError::Parse(e.to_string())
            }
        })?;

        info!(success = body.success, "FNE responded");
        Ok(body)
    }
}

/// What [`MockFneProvider`] does on the next call.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Answer with a structured success.
    Certify,
    /// Answer `success = false` with this error.
    Reject(String),
    /// Fail as a transport error with this message.
    Fail(String),
    /// Never answer.
    Hang,
}

/// Mock certification provider for testing
pub struct MockFneProvider {
    outcome: Mutex<MockOutcome>,
    call_count: AtomicU64,
    last_request: Mutex<Option<CertifyRequest>>,
}

impl MockFneProvider {
    pub fn new(outcome: MockOutcome) -> Self {
        Self {
            outcome: Mutex::new(outcome),
            call_count: AtomicU64::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(MockOutcome::Certify)
    }

    pub async fn set_outcome(&self, outcome: MockOutcome) {
        *self.outcome.lock().await = outcome;
    }

    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::SeqCst)
    }

    pub async fn last_request(&self) -> Option<CertifyRequest> {
        self.last_request.lock().await.clone()
    }
}

#[async_trait]
impl CertificationProvider for MockFneProvider {
    async fn certify(&self, request: &CertifyRequest) -> Result<CertifyResponse, FneError> {
        let call = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_request.lock().await = Some(request.clone());
        let outcome = self.outcome.lock().await.clone();

        tracing::info!(call = call, outcome = ?outcome, "[MOCK] FNE certification");

        match outcome {
            MockOutcome::Certify => {
                let reference = format!("MOCK-FNE-{:06}", call);
                Ok(CertifyResponse {
                    success: true,
                    data: Some(CertifyData {
                        ncc: Some(request.client_ncc.clone()),
                        reference: reference.clone(),
                        token: Uuid::new_v4().to_string(),
                        warning: false,
                        balance_sticker: Some(5000 - call as i64),
                        invoice: CertifiedInvoice {
                            id: Some(Uuid::new_v4().to_string()),
                            reference: Some(reference),
                            amount: None,
                            vat_amount: None,
                            currency: Some("XOF".to_string()),
                            qr_code: None,
                            created_at: Utc::now().to_rfc3339(),
                            status: Some("certified".to_string()),
                        },
                    }),
                    status_code: Some(200),
                    timestamp: Some(Utc::now().to_rfc3339()),
                    error: None,
                })
            }
            MockOutcome::Reject(error) => Ok(CertifyResponse {
                success: false,
                data: None,
                status_code: Some(400),
                timestamp: Some(Utc::now().to_rfc3339()),
                error: Some(error),
            }),
            MockOutcome::Fail(message) => Err(FneError::Transport(message)),
            MockOutcome::Hang => {
                std::future::pending::<()>().await;
                Err(FneError::Transport("unreachable".to_string()))
            }
        }
    }
}
