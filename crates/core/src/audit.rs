use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::actor::{Actor, ActorType};
use crate::domain::case::CaseId;

/// Audit verbs recorded against a case.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditVerb {
    UpdatedStatus,
    UpdatedSubStatus,
    TransitionRejected,
    MoveCase,
    RemoveCaseFromAllQueues,
    RemoveCaseFromAllUserAssignments,
    AddFlags,
    RemoveFlags,
    CreatedFinalRecommendation,
    Countersigned,
    LicenceUpdatedGoodUsage,
    LicenceUpdatedStatus,
    ExporterCreatedAmendment,
    CopiedApplication,
    SlaUpdated,
    RerunRoutingRules,
}

impl AuditVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UpdatedStatus => "updated_status",
            Self::UpdatedSubStatus => "updated_sub_status",
            Self::TransitionRejected => "transition_rejected",
            Self::MoveCase => "move_case",
            Self::RemoveCaseFromAllQueues => "remove_case_from_all_queues",
            Self::RemoveCaseFromAllUserAssignments => "remove_case_from_all_user_assignments",
            Self::AddFlags => "add_flags",
            Self::RemoveFlags => "remove_flags",
            Self::CreatedFinalRecommendation => "created_final_recommendation",
            Self::Countersigned => "countersigned",
            Self::LicenceUpdatedGoodUsage => "licence_updated_good_usage",
            Self::LicenceUpdatedStatus => "licence_updated_status",
            Self::ExporterCreatedAmendment => "exporter_created_amendment",
            Self::CopiedApplication => "copied_application",
            Self::SlaUpdated => "sla_updated",
            Self::RerunRoutingRules => "rerun_routing_rules",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        const ALL: [AuditVerb; 16] = [
            AuditVerb::UpdatedStatus,
            AuditVerb::UpdatedSubStatus,
            AuditVerb::TransitionRejected,
            AuditVerb::MoveCase,
            AuditVerb::RemoveCaseFromAllQueues,
            AuditVerb::RemoveCaseFromAllUserAssignments,
            AuditVerb::AddFlags,
            AuditVerb::RemoveFlags,
            AuditVerb::CreatedFinalRecommendation,
            AuditVerb::Countersigned,
            AuditVerb::LicenceUpdatedGoodUsage,
            AuditVerb::LicenceUpdatedStatus,
            AuditVerb::ExporterCreatedAmendment,
            AuditVerb::CopiedApplication,
            AuditVerb::SlaUpdated,
            AuditVerb::RerunRoutingRules,
        ];
        let value = value.trim().to_ascii_lowercase();
        ALL.iter().copied().find(|verb| verb.as_str() == value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Rejected,
    Failed,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "success" => Some(Self::Success),
            "rejected" => Some(Self::Rejected),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
    pub correlation_id: String,
    pub actor_id: String,
    pub actor_type: ActorType,
}

impl AuditContext {
    pub fn new(correlation_id: impl Into<String>, actor: &Actor) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            actor_id: actor.id.clone(),
            actor_type: actor.actor_type,
        }
    }

    pub fn system(correlation_id: impl Into<String>) -> Self {
        Self::new(correlation_id, &Actor::system())
    }
}

/// Append-only actor/verb/target/payload record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub case_id: CaseId,
    pub correlation_id: String,
    pub verb: AuditVerb,
    pub actor_id: String,
    pub actor_type: ActorType,
    pub outcome: AuditOutcome,
    pub payload: serde_json::Map<String, serde_json::Value>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(case_id: CaseId, verb: AuditVerb, context: &AuditContext, outcome: AuditOutcome) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            case_id,
            correlation_id: context.correlation_id.clone(),
            verb,
            actor_id: context.actor_id.clone(),
            actor_type: context.actor_type,
            outcome,
            payload: serde_json::Map::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn success(case_id: CaseId, verb: AuditVerb, context: &AuditContext) -> Self {
        Self::new(case_id, verb, context, AuditOutcome::Success)
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

/// Buffers events in memory. Services collect into one of these and persist
/// the batch together with the change that produced it.
#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn drain(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(mut events) => std::mem::take(&mut *events),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, AuditEvent, AuditSink, AuditVerb, InMemoryAuditSink};
    use crate::domain::actor::Actor;
    use crate::domain::case::{CaseId, OrganisationId};

    #[test]
    fn in_memory_sink_records_and_drains_events() {
        let sink = InMemoryAuditSink::default();
        let actor = Actor::exporter("user-7", OrganisationId("org-1".to_owned()));
        let context = AuditContext::new("req-123", &actor);

        sink.emit(
            AuditEvent::success(CaseId("case-1".to_owned()), AuditVerb::UpdatedStatus, &context)
                .with_payload("status", serde_json::json!({"new": "withdrawn", "old": "submitted"})),
        );

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].correlation_id, "req-123");
        assert_eq!(events[0].actor_id, "user-7");
        assert!(events[0].payload.contains_key("status"));

        assert_eq!(sink.drain().len(), 1);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn verbs_round_trip() {
        for verb in [AuditVerb::MoveCase, AuditVerb::LicenceUpdatedGoodUsage, AuditVerb::SlaUpdated] {
            assert_eq!(AuditVerb::parse(verb.as_str()), Some(verb));
        }
    }
}
