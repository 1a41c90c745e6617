//! Reactions that follow a persisted status change: flagging, routing and
//! notification outbox entries.

pub mod flagging;
pub mod routing;

use crate::audit::{AuditContext, AuditSink};
use crate::domain::advice::CountersignAdvice;
use crate::domain::case::Case;
use crate::domain::notification::{Notification, NotificationKind};
use crate::flows::states::{FlowAction, TransitionOutcome};

pub use flagging::{FlaggingEngine, FlaggingReport};
pub use routing::{RoutingEngine, RoutingReport};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReactorReport {
    pub flagging: FlaggingReport,
    pub routing: Option<RoutingReport>,
    pub notifications: Vec<Notification>,
}

#[derive(Clone, Debug, Default)]
pub struct PostTransitionReactor {
    routing: RoutingEngine,
    flagging: FlaggingEngine,
}

impl PostTransitionReactor {
    pub fn new(routing: RoutingEngine, flagging: FlaggingEngine) -> Self {
        Self { routing, flagging }
    }

    /// Flags are applied before routing so rules see the fresh flag set.
    pub fn react<S>(
        &self,
        case: &mut Case,
        outcome: &TransitionOutcome,
        keep_status: bool,
        sink: &S,
        audit: &AuditContext,
    ) -> ReactorReport
    where
        S: AuditSink,
    {
        let mut report = ReactorReport::default();

        if outcome.requires(&FlowAction::ApplyFlaggingRules) {
            report.flagging = self.flagging.apply_to_case_with_audit(case, sink, audit);
        }
        if outcome.requires(&FlowAction::RunRoutingRules) {
            report.routing = Some(self.routing.run(case, keep_status, sink, audit));
        }
        if outcome.requires(&FlowAction::NotifyApplicantEditing) {
            report.notifications.push(applicant_editing(case));
        }

        report
    }

    pub fn flagging(&self) -> &FlaggingEngine {
        &self.flagging
    }

    pub fn routing(&self) -> &RoutingEngine {
        &self.routing
    }
}

fn applicant_editing(case: &Case) -> Notification {
    Notification::new(
        case.id.clone(),
        NotificationKind::ApplicantEditing,
        case.organisation_id.0.clone(),
        serde_json::json!({
            "case_reference": case.reference_code,
            "application_name": case.name,
            "organisation": case.organisation_name,
        }),
    )
}

/// Outbox entry for the case officer when a countersignature is rejected.
/// Nothing is queued for accepted signatures or unallocated cases.
pub fn countersign_rejected(case: &Case, countersignature: &CountersignAdvice) -> Option<Notification> {
    if countersignature.outcome_accepted {
        return None;
    }
    let officer = case.case_officer.as_ref()?;
    Some(Notification::new(
        case.id.clone(),
        NotificationKind::CountersignRejected,
        officer.clone(),
        serde_json::json!({
            "case_reference": case.reference_code,
            "countersign_order": countersignature.order.as_u8(),
            "countersigned_user": countersignature.countersigned_user,
            "reasons": countersignature.reasons,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::Utc;

    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::domain::advice::{CountersignAdvice, CountersignOrder};
    use crate::domain::case::{Case, CaseId, CaseParameter, CaseTypeReference, OrganisationId};
    use crate::domain::notification::NotificationKind;
    use crate::domain::rules::{ControlListTree, FlagLevel, FlaggingRule, RoutingRule};
    use crate::domain::status::CaseStatus;
    use crate::flows::states::{FlowAction, TransitionOutcome};
    use crate::reactor::{countersign_rejected, FlaggingEngine, PostTransitionReactor, RoutingEngine};

    fn case_in(status: CaseStatus) -> Case {
        let mut case = Case::draft(
            CaseId("case-1".to_owned()),
            CaseTypeReference::Siel,
            OrganisationId("org-1".to_owned()),
            "Acme Exports",
            "Radar parts",
            Utc::now(),
        );
        case.status = status;
        case
    }

    fn outcome(to: CaseStatus, actions: Vec<FlowAction>) -> TransitionOutcome {
        TransitionOutcome { from: CaseStatus::Submitted, to, note: None, actions }
    }

    fn reactor() -> PostTransitionReactor {
        let flag_rule = FlaggingRule {
            id: "fr-1".to_owned(),
            flag_id: "SIEL_FLAG".to_owned(),
            level: FlagLevel::Case,
            active: true,
            matching_values: vec!["siel".to_owned()],
            matching_groups: Vec::new(),
            excluded_values: Vec::new(),
            is_for_verified_goods_only: false,
        };
        let routing_rule = RoutingRule {
            id: "rr-1".to_owned(),
            team_id: "team-a".to_owned(),
            queue_id: "queue-flagged".to_owned(),
            status: CaseStatus::InitialChecks,
            tier: 1,
            active: true,
            user: None,
            parameter_sets: vec![BTreeSet::from([CaseParameter::Flag("SIEL_FLAG".to_owned())])],
        };
        PostTransitionReactor::new(
            RoutingEngine::new(vec![routing_rule]),
            FlaggingEngine::new(vec![flag_rule], ControlListTree::default()),
        )
    }

    #[test]
    fn routing_sees_flags_applied_in_the_same_reaction() {
        let mut case = case_in(CaseStatus::InitialChecks);
        let sink = InMemoryAuditSink::default();

        let report = reactor().react(
            &mut case,
            &outcome(CaseStatus::InitialChecks, vec![FlowAction::RunRoutingRules, FlowAction::ApplyFlaggingRules]),
            false,
            &sink,
            &AuditContext::system("req-1"),
        );

        assert!(report.flagging.case_flags.contains("SIEL_FLAG"));
        assert!(report.routing.is_some_and(|routing| routing.routed()));
        assert!(case.queues.contains("queue-flagged"));
    }

    #[test]
    fn applicant_editing_queues_an_exporter_notification() {
        let mut case = case_in(CaseStatus::ApplicantEditing);
        let report = reactor().react(
            &mut case,
            &outcome(CaseStatus::ApplicantEditing, vec![FlowAction::NotifyApplicantEditing]),
            true,
            &InMemoryAuditSink::default(),
            &AuditContext::system("req-1"),
        );

        assert_eq!(report.notifications.len(), 1);
        assert_eq!(report.notifications[0].kind, NotificationKind::ApplicantEditing);
        assert_eq!(report.notifications[0].recipient, "org-1");
        assert!(report.routing.is_none());
    }

    #[test]
    fn rejected_countersignature_notifies_the_case_officer() {
        let mut case = case_in(CaseStatus::UnderFinalReview);
        let mut signature = CountersignAdvice {
            id: "cs-1".to_owned(),
            case_id: case.id.clone(),
            advice_id: "advice-1".to_owned(),
            order: CountersignOrder::First,
            outcome_accepted: false,
            reasons: "Needs end-user checks".to_owned(),
            countersigned_user: "senior-1".to_owned(),
            valid: true,
            created_at: Utc::now(),
        };

        assert!(countersign_rejected(&case, &signature).is_none());

        case.case_officer = Some("officer-1".to_owned());
        let notification = countersign_rejected(&case, &signature).unwrap();
        assert_eq!(notification.kind, NotificationKind::CountersignRejected);
        assert_eq!(notification.recipient, "officer-1");

        signature.outcome_accepted = true;
        assert!(countersign_rejected(&case, &signature).is_none());
    }
}
