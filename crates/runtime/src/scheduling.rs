use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use lite_core::domain::case::Case;
use lite_core::domain::execution::{ExecutionTask, ExecutionTaskId, OperationKey};
use lite_core::domain::licence::{Licence, LicenceStatus};
use lite_core::errors::ApplicationError;
use lite_core::execution_engine::DeterministicExecutionEngine;
use lite_core::licensing::hmrc::HmrcAction;
use lite_db::repositories::{ChangeSet, ExecutionQueueRepository};

use crate::error::persistence;

pub const HMRC_OPERATION_KIND: &str = "hmrc.update_licence";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HmrcDeliveryPayload {
    pub licence_id: String,
    pub action: HmrcAction,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Scheduled(ExecutionTask),
    /// An unfinished delivery for the same licence and action is already queued.
    AlreadyPending(ExecutionTaskId),
    /// Draft licences and case types HMRC does not track are never sent.
    NotRequired,
}

/// Queues licence deliveries to the HMRC integration.
#[derive(Clone)]
pub struct HmrcScheduler {
    tasks: Arc<dyn ExecutionQueueRepository>,
    engine: DeterministicExecutionEngine,
}

impl HmrcScheduler {
    pub fn new(tasks: Arc<dyn ExecutionQueueRepository>, engine: DeterministicExecutionEngine) -> Self {
        Self { tasks, engine }
    }

    /// Queues the delivery straight away.
    pub async fn schedule(
        &self,
        case: &Case,
        licence: &Licence,
        correlation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ScheduleOutcome, ApplicationError> {
        let mut changes = ChangeSet::default();
        let outcome = self.plan(case, licence, correlation_id, now, &mut changes).await?;
        if let ScheduleOutcome::Scheduled(task) = &outcome {
            for task in changes.tasks {
                self.tasks.save_task(task).await.map_err(persistence)?;
            }
            for transition in changes.transitions {
                self.tasks.append_transition(transition).await.map_err(persistence)?;
            }
            info!(
                event_name = "hmrc.delivery.scheduled",
                correlation_id = %correlation_id,
                case_id = %case.id.0,
                licence_id = %licence.id.0,
                task_id = %task.id.0,
                "licence delivery scheduled"
            );
        }
        Ok(outcome)
    }

    /// Adds the delivery task to `changes` instead of writing it, so it is
    /// committed with the licence change that caused it.
    pub async fn plan(
        &self,
        case: &Case,
        licence: &Licence,
        correlation_id: &str,
        now: DateTime<Utc>,
        changes: &mut ChangeSet,
    ) -> Result<ScheduleOutcome, ApplicationError> {
        if !case.case_type.sends_licences_to_hmrc() || licence.status == LicenceStatus::Draft {
            return Ok(ScheduleOutcome::NotRequired);
        }

        let action = HmrcAction::for_licence_status(licence.status);
        let key = operation_key(licence, action);
        let planned = changes.tasks.iter().find(|task| task.operation_key == key && !task.state.is_finished());
        let pending = match planned {
            Some(task) => Some(task.clone()),
            None => self.tasks.find_unfinished_by_key(&key).await.map_err(persistence)?,
        };
        if let Some(pending) = pending {
            debug!(
                event_name = "hmrc.delivery.deduplicated",
                correlation_id = %correlation_id,
                case_id = %case.id.0,
                licence_id = %licence.id.0,
                task_id = %pending.id.0,
                "delivery already pending"
            );
            return Ok(ScheduleOutcome::AlreadyPending(pending.id));
        }

        let payload = HmrcDeliveryPayload { licence_id: licence.id.0.clone(), action };
        let payload_json = serde_json::to_string(&payload)
            .map_err(|error| ApplicationError::Integration(format!("could not encode delivery payload: {error}")))?;
        let created =
            self.engine.create_task(case.id.clone(), HMRC_OPERATION_KIND, payload_json, key, correlation_id, now);

        debug!(
            event_name = "hmrc.delivery.planned",
            correlation_id = %correlation_id,
            case_id = %case.id.0,
            licence_id = %licence.id.0,
            action = action.as_str(),
            task_id = %created.task.id.0,
            "licence delivery planned"
        );
        changes.tasks.push(created.task.clone());
        changes.transitions.push(created.transition);
        Ok(ScheduleOutcome::Scheduled(created.task))
    }
}

fn operation_key(licence: &Licence, action: HmrcAction) -> OperationKey {
    OperationKey(format!("hmrc:{}:{}", licence.id.0, action.as_str()))
}
