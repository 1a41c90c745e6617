use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use lite_core::audit::{AuditContext, AuditEvent, AuditVerb, InMemoryAuditSink};
use lite_core::countersign::invalidate_rejected;
use lite_core::domain::actor::{Actor, ActorType};
use lite_core::domain::advice::{CountersignAdvice, CountersignOrder};
use lite_core::domain::case::CaseId;
use lite_core::domain::licence::Licence;
use lite_core::errors::{ApplicationError, DomainError};
use lite_core::execution_engine::DeterministicExecutionEngine;
use lite_core::flows::CaseWorkflowEngine;
use lite_core::licensing::{finalise, FinaliseOutcome, FinaliseRecords, FinaliseRequest};
use lite_core::reactor::countersign_rejected;
use lite_db::repositories::ChangeSet;

use crate::error::persistence;
use crate::scheduling::HmrcScheduler;
use crate::settings::RuntimeSettings;
use crate::status_change::{load_case, load_reactor};
use crate::stores::Stores;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCountersignature {
    pub advice_id: String,
    pub order: CountersignOrder,
    pub outcome_accepted: bool,
    #[serde(default)]
    pub reasons: String,
}

/// Final decisions, licence issue and countersigning.
#[derive(Clone)]
pub struct FinaliseService {
    stores: Stores,
    settings: RuntimeSettings,
    engine: CaseWorkflowEngine,
    scheduler: HmrcScheduler,
}

impl FinaliseService {
    pub fn new(stores: Stores, settings: RuntimeSettings) -> Self {
        let scheduler = HmrcScheduler::new(
            stores.tasks.clone(),
            DeterministicExecutionEngine::with_config(settings.execution.clone()),
        );
        Self { stores, settings, engine: CaseWorkflowEngine::default(), scheduler }
    }

    pub async fn finalise(
        &self,
        case_id: &CaseId,
        actor: &Actor,
        request: &FinaliseRequest,
        correlation_id: &str,
    ) -> Result<FinaliseOutcome, ApplicationError> {
        let now = Utc::now();
        let mut case = load_case(&self.stores, case_id).await?;
        let records = FinaliseRecords {
            licences: self.stores.licences.list_for_case(case_id).await.map_err(persistence)?,
            countersignatures: self.stores.countersignatures.list_for_case(case_id).await.map_err(persistence)?,
            last_decision: self.stores.licences.last_decision(case_id).await.map_err(persistence)?,
        };
        let context = self.settings.flow_context(records.licences.iter().any(|licence| licence.status.is_open()));
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::new(correlation_id, actor);

        let outcome = match finalise(
            &self.engine,
            &mut case,
            actor,
            request,
            records,
            &context,
            self.settings.default_licence_duration_months,
            now,
            &sink,
            &audit,
        ) {
            Ok(outcome) => outcome,
            Err(error) => {
                self.stores.audit.append(sink.drain()).await.map_err(persistence)?;
                warn!(
                    event_name = "case.finalise.rejected",
                    correlation_id = %correlation_id,
                    case_id = %case_id.0,
                    error = %error,
                    "finalise rejected"
                );
                return Err(error.into());
            }
        };

        let reactor = load_reactor(&self.stores).await?;
        let reaction = reactor.react(&mut case, &outcome.transition, true, &sink, &AuditContext::system(correlation_id));

        let saved: Vec<&Licence> = outcome.updated_licences.iter().chain(outcome.issued_licence.iter()).collect();
        let mut changes = ChangeSet {
            licences: saved.iter().map(|licence| (*licence).clone()).collect(),
            decisions: outcome.decisions.clone(),
            ..ChangeSet::default()
        };
        for change in outcome.licence_changes.iter().filter(|change| change.notify_hmrc) {
            if let Some(licence) = saved.iter().find(|licence| licence.id == change.licence_id) {
                self.scheduler.plan(&case, licence, correlation_id, now, &mut changes).await?;
            }
        }
        changes.cases.push(case.clone());
        changes.events = sink.drain();
        changes.notifications =
            outcome.notifications.iter().chain(reaction.notifications.iter()).cloned().collect();
        self.stores.unit_of_work.commit(changes).await.map_err(persistence)?;

        info!(
            event_name = "case.finalised",
            correlation_id = %correlation_id,
            case_id = %case.id.0,
            licence_id = outcome.issued_licence.as_ref().map(|licence| licence.id.0.as_str()).unwrap_or("none"),
            decisions = outcome.decisions.len(),
            "case finalised"
        );
        Ok(outcome)
    }

    /// Records a countersignature against the case's final advice. A rejection
    /// is sent back to the case officer through the outbox.
    pub async fn record_countersignature(
        &self,
        case_id: &CaseId,
        actor: &Actor,
        input: NewCountersignature,
        correlation_id: &str,
    ) -> Result<CountersignAdvice, ApplicationError> {
        if actor.actor_type != ActorType::Caseworker {
            return Err(DomainError::Forbidden("only caseworkers can countersign advice".to_owned()).into());
        }
        if !input.outcome_accepted && input.reasons.trim().is_empty() {
            return Err(DomainError::field("reasons", "Enter why you do not agree with the recommendation").into());
        }
        let case = load_case(&self.stores, case_id).await?;

        let countersignature = CountersignAdvice {
            id: Uuid::new_v4().to_string(),
            case_id: case.id.clone(),
            advice_id: input.advice_id,
            order: input.order,
            outcome_accepted: input.outcome_accepted,
            reasons: input.reasons,
            countersigned_user: actor.id.clone(),
            valid: true,
            created_at: Utc::now(),
        };
        self.stores.countersignatures.save(countersignature.clone()).await.map_err(persistence)?;
        self.stores
            .audit
            .append(vec![AuditEvent::success(
                case.id.clone(),
                AuditVerb::Countersigned,
                &AuditContext::new(correlation_id, actor),
            )
            .with_payload("order", countersignature.order.as_u8())
            .with_payload("outcome_accepted", countersignature.outcome_accepted)])
            .await
            .map_err(persistence)?;

        if let Some(notification) = countersign_rejected(&case, &countersignature) {
            self.stores.notifications.enqueue(vec![notification]).await.map_err(persistence)?;
        }

        info!(
            event_name = "case.countersigned",
            correlation_id = %correlation_id,
            case_id = %case.id.0,
            order = countersignature.order.as_u8(),
            accepted = countersignature.outcome_accepted,
            "countersignature recorded"
        );
        Ok(countersignature)
    }

    /// Called once advice has been edited after a rejection. Returns the ids
    /// of the countersignatures that no longer count.
    pub async fn invalidate_rejected(&self, case_id: &CaseId, correlation_id: &str) -> Result<Vec<String>, ApplicationError> {
        let mut countersignatures = self.stores.countersignatures.list_for_case(case_id).await.map_err(persistence)?;
        let invalidated = invalidate_rejected(&mut countersignatures);
        for countersignature in countersignatures.into_iter().filter(|signature| invalidated.contains(&signature.id)) {
            self.stores.countersignatures.save(countersignature).await.map_err(persistence)?;
        }
        if !invalidated.is_empty() {
            info!(
                event_name = "case.countersignatures.invalidated",
                correlation_id = %correlation_id,
                case_id = %case_id.0,
                count = invalidated.len(),
                "countersignatures invalidated"
            );
        }
        Ok(invalidated)
    }
}
