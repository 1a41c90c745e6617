use chrono::Utc;
use tracing::info;

use lite_core::amendment::{copy_application, create_amendment, superseded_by};
use lite_core::audit::{AuditContext, AuditEvent, AuditVerb};
use lite_core::domain::actor::{Actor, ActorType};
use lite_core::domain::case::{Case, CaseId};
use lite_core::domain::status::CaseStatus;
use lite_core::errors::{ApplicationError, DomainError};
use lite_core::flows::StatusChangeRequest;
use lite_db::repositories::ChangeSet;

use crate::error::persistence;
use crate::settings::RuntimeSettings;
use crate::status_change::{load_case, log_status_change, StatusChangeService};
use crate::stores::Stores;

#[derive(Clone)]
pub struct AmendmentService {
    stores: Stores,
    status: StatusChangeService,
}

impl AmendmentService {
    pub fn new(stores: Stores, settings: RuntimeSettings) -> Self {
        let status = StatusChangeService::new(stores.clone(), settings);
        Self { stores, status }
    }

    /// Opens an exporter amendment. The source is superseded through the
    /// regular status-change path so its queues, assignments and flags are
    /// cleaned up the same way.
    pub async fn amend(&self, case_id: &CaseId, actor: &Actor, correlation_id: &str) -> Result<Case, ApplicationError> {
        let source = load_case(&self.stores, case_id).await?;
        let now = Utc::now();
        let amendment = create_amendment(&source, actor, now)?;

        let audit = AuditContext::new(correlation_id, actor);
        let (superseded, mut changes) = self
            .status
            .prepare_change(
                source,
                &Actor::system(),
                &StatusChangeRequest::to(CaseStatus::SupersededByExporterEdit),
                &AuditContext::system(correlation_id),
                now,
            )
            .await?;
        changes.cases.push(amendment.clone());
        changes.events.extend([
            AuditEvent::success(superseded.case.id.clone(), AuditVerb::ExporterCreatedAmendment, &audit)
                .with_payload("amendment_id", amendment.id.0.clone()),
            AuditEvent::success(amendment.id.clone(), AuditVerb::ExporterCreatedAmendment, &audit)
                .with_payload("superseded_case_id", superseded.case.id.0.clone())
                .with_payload("superseded_case_reference", superseded.case.reference_code.clone()),
        ]);
        self.stores.unit_of_work.commit(changes).await.map_err(persistence)?;
        log_status_change(&superseded, &AuditContext::system(correlation_id));

        info!(
            event_name = "case.amendment.created",
            correlation_id = %correlation_id,
            case_id = %superseded.case.id.0,
            amendment_id = %amendment.id.0,
            "exporter amendment created"
        );
        Ok(amendment)
    }

    pub async fn copy(
        &self,
        case_id: &CaseId,
        actor: &Actor,
        name: &str,
        correlation_id: &str,
    ) -> Result<Case, ApplicationError> {
        let source = load_case(&self.stores, case_id).await?;
        if actor.actor_type != ActorType::Exporter || actor.organisation_id.as_ref() != Some(&source.organisation_id)
        {
            return Err(DomainError::Forbidden("application belongs to another organisation".to_owned()).into());
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(DomainError::field("name", "Enter a reference name for the application").into());
        }

        let copy = copy_application(&source, name, Utc::now());
        let event = AuditEvent::success(copy.id.clone(), AuditVerb::CopiedApplication, &AuditContext::new(correlation_id, actor))
            .with_payload("source_case_id", source.id.0.clone())
            .with_payload("source_case_reference", source.reference_code.clone());
        self.stores
            .unit_of_work
            .commit(ChangeSet { cases: vec![copy.clone()], events: vec![event], ..ChangeSet::default() })
            .await
            .map_err(persistence)?;

        info!(
            event_name = "case.copied",
            correlation_id = %correlation_id,
            case_id = %source.id.0,
            copy_id = %copy.id.0,
            "application copied"
        );
        Ok(copy)
    }

    /// The amendment that replaced `case_id`, if one exists.
    pub async fn superseded_by(&self, case_id: &CaseId) -> Result<Option<Case>, ApplicationError> {
        let amendments = self.stores.cases.list_amendments_of(case_id).await.map_err(persistence)?;
        Ok(superseded_by(case_id, &amendments).cloned())
    }
}
