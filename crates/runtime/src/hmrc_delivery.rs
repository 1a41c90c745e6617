use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Url};
use thiserror::Error;
use tracing::{debug, info, warn};

use lite_core::config::HmrcConfig;
use lite_core::domain::case::Case;
use lite_core::domain::execution::ExecutionTask;
use lite_core::domain::licence::{Licence, LicenceId, LicenceStatus};
use lite_core::errors::ApplicationError;
use lite_core::execution_engine::{DeterministicExecutionEngine, RetryPolicy, TransitionResult};
use lite_core::licensing::hmrc::{build_payload, HmrcAction, HmrcLicencePayload, UPDATE_LICENCE_PATH};
use lite_core::signing::{sign_now, HawkCredentials, SignedRequest};

use crate::error::persistence;
use crate::scheduling::{HmrcDeliveryPayload, HMRC_OPERATION_KIND};
use crate::settings::RuntimeSettings;
use crate::stores::Stores;

const JSON: &str = "application/json";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid hmrc integration url `{0}`")]
    InvalidUrl(String),
    #[error("could not encode licence payload: {0}")]
    Encode(String),
    #[error("hmrc integration request failed: {0}")]
    Request(String),
}

#[async_trait]
pub trait HmrcTransport: Send + Sync {
    async fn send(&self, payload: &HmrcLicencePayload) -> Result<TransportResponse, TransportError>;
}

/// Posts licence payloads to the HMRC integration, Hawk-signed.
pub struct ReqwestHmrcTransport {
    client: Client,
    url: Url,
    credentials: HawkCredentials,
}

impl ReqwestHmrcTransport {
    pub fn new(config: &HmrcConfig) -> Result<Self, TransportError> {
        let raw = format!("{}{}", config.base_url.trim_end_matches('/'), UPDATE_LICENCE_PATH);
        let url = Url::parse(&raw).map_err(|_| TransportError::InvalidUrl(raw.clone()))?;
        if url.host_str().is_none() {
            return Err(TransportError::InvalidUrl(raw));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(|error| TransportError::Request(error.to_string()))?;
        let credentials = HawkCredentials { id: config.hawk_key_id.clone(), key: config.hawk_key.clone() };
        Ok(Self { client, url, credentials })
    }
}

#[async_trait]
impl HmrcTransport for ReqwestHmrcTransport {
    async fn send(&self, payload: &HmrcLicencePayload) -> Result<TransportResponse, TransportError> {
        let body = serde_json::to_vec(&serde_json::json!({ "licence": payload }))
            .map_err(|error| TransportError::Encode(error.to_string()))?;
        let header = sign_now(
            &self.credentials,
            &SignedRequest {
                method: "POST",
                path: self.url.path(),
                host: self.url.host_str().unwrap_or_default(),
                port: self.url.port_or_known_default().unwrap_or(443),
                content_type: JSON,
                body: &body,
            },
            Utc::now(),
        )
        .map_err(|error| TransportError::Encode(error.to_string()))?;

        let response = self
            .client
            .post(self.url.clone())
            .header(AUTHORIZATION, header.to_header_value())
            .header(CONTENT_TYPE, JSON)
            .body(body)
            .send()
            .await
            .map_err(|error| TransportError::Request(error.to_string()))?;
        Ok(TransportResponse { status: response.status().as_u16() })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub retried: usize,
    pub failed: usize,
}

enum Delivery {
    Delivered,
    Retry(String, &'static str),
    Terminal(String, &'static str),
}

/// Drains due HMRC delivery tasks from the execution queue.
#[derive(Clone)]
pub struct HmrcDeliveryWorker {
    stores: Stores,
    engine: DeterministicExecutionEngine,
    transport: Arc<dyn HmrcTransport>,
    worker_id: String,
    batch_size: u32,
}

impl HmrcDeliveryWorker {
    pub fn new(
        stores: Stores,
        settings: RuntimeSettings,
        transport: Arc<dyn HmrcTransport>,
        worker_id: impl Into<String>,
    ) -> Self {
        Self {
            stores,
            engine: DeterministicExecutionEngine::with_config(settings.execution),
            transport,
            worker_id: worker_id.into(),
            batch_size: settings.batch_size,
        }
    }

    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<DeliveryReport, ApplicationError> {
        let running = self.stores.tasks.list_running().await.map_err(persistence)?;
        let mut batch = self.engine.recover_stale_tasks(running, now);
        batch.extend(self.stores.tasks.list_due(now, self.batch_size).await.map_err(persistence)?);

        let mut report = DeliveryReport::default();
        for task in batch.into_iter().filter(|task| task.operation_kind == HMRC_OPERATION_KIND) {
            let claimed = match self.engine.claim_task(task, &self.worker_id, now) {
                Ok(claimed) => claimed,
                Err(error) => {
                    debug!(event_name = "hmrc.delivery.claim_skipped", error = %error, "task not claimable");
                    continue;
                }
            };
            self.record(claimed.clone()).await?;
            let task = claimed.task;

            match self.deliver(&task, now).await? {
                Delivery::Delivered => {
                    let fingerprint = DeterministicExecutionEngine::hash_payload(&task.payload_json);
                    let completed = self
                        .engine
                        .complete_task(task, fingerprint, now)
                        .map_err(|error| ApplicationError::Integration(error.to_string()))?;
                    self.record(completed).await?;
                    report.delivered += 1;
                }
                Delivery::Retry(error, class) => {
                    warn!(
                        event_name = "hmrc.delivery.retry",
                        correlation_id = %task.correlation_id,
                        task_id = %task.id.0,
                        error_class = class,
                        error = %error,
                        "licence delivery failed, will retry"
                    );
                    self.fail(task, error, class, RetryPolicy::Retry, now).await?;
                    report.retried += 1;
                }
                Delivery::Terminal(error, class) => {
                    warn!(
                        event_name = "hmrc.delivery.failed",
                        correlation_id = %task.correlation_id,
                        task_id = %task.id.0,
                        error_class = class,
                        error = %error,
                        "licence delivery abandoned"
                    );
                    self.fail(task, error, class, RetryPolicy::FailTerminal, now).await?;
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn deliver(&self, task: &ExecutionTask, now: DateTime<Utc>) -> Result<Delivery, ApplicationError> {
        let scheduled: HmrcDeliveryPayload = match serde_json::from_str(&task.payload_json) {
            Ok(scheduled) => scheduled,
            Err(error) => return Ok(Delivery::Terminal(error.to_string(), "invalid_payload")),
        };
        let licence_id = LicenceId(scheduled.licence_id.clone());
        let Some(mut licence) = self.stores.licences.find_by_id(&licence_id).await.map_err(persistence)? else {
            return Ok(Delivery::Terminal(format!("licence {} not found", scheduled.licence_id), "not_found"));
        };
        let Some(case) = self.stores.cases.find_by_id(&licence.case_id).await.map_err(persistence)? else {
            return Ok(Delivery::Terminal(format!("case {} not found", licence.case_id.0), "not_found"));
        };

        let payload = self.payload(&licence, &case, scheduled.action).await?;
        let response = match self.transport.send(&payload).await {
            Ok(response) => response,
            Err(error) => return Ok(Delivery::Retry(error.to_string(), "transport")),
        };
        if !matches!(response.status, 200 | 201) {
            return Ok(Delivery::Retry(format!("hmrc integration returned {}", response.status), "unexpected_status"));
        }

        if response.status == 201 {
            licence.hmrc_integration_sent_at = Some(now);
            self.stores.licences.save(licence.clone()).await.map_err(persistence)?;
        }
        info!(
            event_name = "hmrc.delivery.sent",
            correlation_id = %task.correlation_id,
            case_id = %case.id.0,
            licence_id = %licence.id.0,
            action = payload.action.as_str(),
            status = response.status,
            "licence delivered to hmrc integration"
        );
        Ok(Delivery::Delivered)
    }

    /// Payload for the action that was scheduled, which may differ from the
    /// one the licence's current status implies.
    async fn payload(
        &self,
        licence: &Licence,
        case: &Case,
        action: HmrcAction,
    ) -> Result<HmrcLicencePayload, ApplicationError> {
        let mut payload = build_payload(licence, case, None);
        payload.action = action;
        if action == HmrcAction::Update {
            let siblings = self.stores.licences.list_for_case(&case.id).await.map_err(persistence)?;
            payload.old_id = siblings
                .iter()
                .filter(|other| other.id != licence.id && other.status == LicenceStatus::Cancelled)
                .max_by_key(|other| other.created_at)
                .map(|other| other.id.0.clone());
        }
        Ok(payload)
    }

    async fn fail(
        &self,
        task: ExecutionTask,
        error: String,
        class: &str,
        policy: RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        let failed = self
            .engine
            .fail_task(task, error, class, policy, now)
            .map_err(|error| ApplicationError::Integration(error.to_string()))?;
        self.record(failed).await
    }

    async fn record(&self, result: TransitionResult) -> Result<(), ApplicationError> {
        self.stores.tasks.save_task(result.task).await.map_err(persistence)?;
        self.stores.tasks.append_transition(result.transition).await.map_err(persistence)
    }
}
