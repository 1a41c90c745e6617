use serde::{Deserialize, Serialize};

use crate::domain::licence::LicenceStatus;
use crate::domain::status::CaseStatus;

/// Facts about the case that live outside the case record itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FlowContext {
    pub has_issued_licence: bool,
    pub countersign_routing: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChangeRequest {
    pub target: CaseStatus,
    pub note: Option<String>,
}

impl StatusChangeRequest {
    pub fn to(target: CaseStatus) -> Self {
        Self { target, note: None }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Follow-up work implied by a status change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAction {
    AssignReferenceCode,
    StampSubmission,
    ClearAssignments,
    ResetSubStatus,
    RemoveCaseFlags,
    RecordClosure,
    UpdateLicenceStatus(LicenceStatus),
    NotifyApplicantEditing,
    RunRoutingRules,
    ApplyFlaggingRules,
}

impl FlowAction {
    /// Actions that only touch the case record and are applied by the engine.
    pub fn is_case_local(&self) -> bool {
        matches!(
            self,
            Self::StampSubmission
                | Self::ClearAssignments
                | Self::ResetSubStatus
                | Self::RemoveCaseFlags
                | Self::RecordClosure
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: CaseStatus,
    pub to: CaseStatus,
    pub note: Option<String>,
    pub actions: Vec<FlowAction>,
}

impl TransitionOutcome {
    pub fn requires(&self, action: &FlowAction) -> bool {
        self.actions.contains(action)
    }

    pub fn licence_status(&self) -> Option<LicenceStatus> {
        self.actions.iter().find_map(|action| match action {
            FlowAction::UpdateLicenceStatus(status) => Some(*status),
            _ => None,
        })
    }
}
