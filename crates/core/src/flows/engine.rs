use chrono::{DateTime, Utc};

use crate::audit::{AuditContext, AuditEvent, AuditOutcome, AuditSink, AuditVerb};
use crate::domain::actor::Actor;
use crate::domain::case::Case;
use crate::domain::licence::LicenceStatus;
use crate::domain::status::{CaseStatus, SubStatus};
use crate::errors::DomainError;
use crate::flows::guard::TransitionGuard;
use crate::flows::states::{FlowAction, FlowContext, StatusChangeRequest, TransitionOutcome};

/// Case status state machine: guard first, then the save-time side effects.
#[derive(Clone, Debug, Default)]
pub struct CaseWorkflowEngine {
    guard: TransitionGuard,
}

impl CaseWorkflowEngine {
    pub fn new(guard: TransitionGuard) -> Self {
        Self { guard }
    }

    pub fn guard(&self) -> &TransitionGuard {
        &self.guard
    }

    /// Decides whether the change is allowed and which actions it implies.
    /// Nothing is mutated.
    pub fn apply(
        &self,
        case: &Case,
        actor: &Actor,
        request: &StatusChangeRequest,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, DomainError> {
        self.guard.check_status_change(actor, case, request.target, context)?;
        Ok(plan_transition(case, request, context))
    }

    /// Applies the change to `case`, running the case-local actions and
    /// emitting the audit trail. Rejections are audited and leave the case
    /// untouched.
    #[allow(clippy::too_many_arguments)]
    pub fn apply_with_audit<S>(
        &self,
        case: &mut Case,
        actor: &Actor,
        request: &StatusChangeRequest,
        context: &FlowContext,
        now: DateTime<Utc>,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, DomainError>
    where
        S: AuditSink,
    {
        let outcome = match self.apply(case, actor, request, context) {
            Ok(outcome) => outcome,
            Err(error) => {
                sink.emit(
                    AuditEvent::new(case.id.clone(), AuditVerb::TransitionRejected, audit, AuditOutcome::Rejected)
                        .with_payload("from", case.status.as_str())
                        .with_payload("to", request.target.as_str())
                        .with_payload("error", error.to_string()),
                );
                return Err(error);
            }
        };

        commit_transition(case, &outcome, now, sink, audit);
        Ok(outcome)
    }

    pub fn set_sub_status<S>(
        &self,
        case: &mut Case,
        sub_status: SubStatus,
        now: DateTime<Utc>,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<(), DomainError>
    where
        S: AuditSink,
    {
        self.guard.check_sub_status(case, sub_status)?;
        if case.sub_status == Some(sub_status) {
            return Ok(());
        }
        case.sub_status = Some(sub_status);
        case.updated_at = now;
        sink.emit(
            AuditEvent::success(case.id.clone(), AuditVerb::UpdatedSubStatus, audit)
                .with_payload("sub_status", sub_status.label()),
        );
        Ok(())
    }
}

fn plan_transition(case: &Case, request: &StatusChangeRequest, context: &FlowContext) -> TransitionOutcome {
    use FlowAction::{
        ApplyFlaggingRules, AssignReferenceCode, ClearAssignments, NotifyApplicantEditing,
        RecordClosure, RemoveCaseFlags, ResetSubStatus, RunRoutingRules, StampSubmission,
        UpdateLicenceStatus,
    };

    let target = request.target;
    let mut actions = Vec::new();

    if case.status == CaseStatus::Draft {
        if case.reference_code.is_none() {
            actions.push(AssignReferenceCode);
        }
        if case.submitted_at.is_none() {
            actions.push(StampSubmission);
        }
    }
    if case.sub_status.is_some() {
        actions.push(ResetSubStatus);
    }
    if target.is_terminal() {
        actions.push(ClearAssignments);
        actions.push(RecordClosure);
    }
    if matches!(target, CaseStatus::Withdrawn | CaseStatus::Closed) {
        actions.push(RemoveCaseFlags);
    }
    if context.has_issued_licence {
        match target {
            CaseStatus::Suspended => actions.push(UpdateLicenceStatus(LicenceStatus::Suspended)),
            CaseStatus::Surrendered => actions.push(UpdateLicenceStatus(LicenceStatus::Surrendered)),
            CaseStatus::Revoked => actions.push(UpdateLicenceStatus(LicenceStatus::Revoked)),
            _ => {}
        }
    }
    if target == CaseStatus::ApplicantEditing {
        actions.push(NotifyApplicantEditing);
    }
    if !target.is_terminal() {
        actions.push(RunRoutingRules);
    }
    actions.push(ApplyFlaggingRules);

    TransitionOutcome { from: case.status, to: target, note: request.note.clone(), actions }
}

fn commit_transition<S>(
    case: &mut Case,
    outcome: &TransitionOutcome,
    now: DateTime<Utc>,
    sink: &S,
    audit: &AuditContext,
) where
    S: AuditSink,
{
    case.status = outcome.to;
    case.updated_at = now;

    for action in outcome.actions.iter().filter(|action| action.is_case_local()) {
        match action {
            FlowAction::StampSubmission => case.submitted_at = Some(now),
            FlowAction::ResetSubStatus => {
                case.sub_status = None;
                sink.emit(
                    AuditEvent::success(case.id.clone(), AuditVerb::UpdatedSubStatus, audit)
                        .with_payload("sub_status", serde_json::Value::Null),
                );
            }
            FlowAction::ClearAssignments => {
                case.case_officer = None;
                if !case.queues.is_empty() {
                    case.queues.clear();
                    sink.emit(AuditEvent::success(
                        case.id.clone(),
                        AuditVerb::RemoveCaseFromAllQueues,
                        audit,
                    ));
                }
                if !case.assignments.is_empty() {
                    case.assignments.clear();
                    sink.emit(AuditEvent::success(
                        case.id.clone(),
                        AuditVerb::RemoveCaseFromAllUserAssignments,
                        audit,
                    ));
                }
            }
            FlowAction::RemoveCaseFlags => {
                if !case.flags.is_empty() {
                    let removed: Vec<String> = std::mem::take(&mut case.flags).into_iter().collect();
                    sink.emit(
                        AuditEvent::success(case.id.clone(), AuditVerb::RemoveFlags, audit)
                            .with_payload("removed_flags", removed),
                    );
                }
            }
            FlowAction::RecordClosure => case.last_closed_at = Some(now),
            _ => {}
        }
    }

    sink.emit(
        AuditEvent::success(case.id.clone(), AuditVerb::UpdatedStatus, audit)
            .with_payload(
                "status",
                serde_json::json!({ "new": outcome.to.as_str(), "old": outcome.from.as_str() }),
            )
            .with_payload("additional_text", outcome.note.clone().unwrap_or_default()),
    );
}
