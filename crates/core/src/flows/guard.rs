use crate::countersign;
use crate::domain::actor::{Actor, ActorType, Permission};
use crate::domain::advice::CountersignAdvice;
use crate::domain::case::Case;
use crate::domain::status::{CaseStatus, SubStatus};
use crate::errors::DomainError;
use crate::flows::states::FlowContext;

/// Decides which actor may move a case between statuses. Checks are pure and
/// run before anything is mutated.
#[derive(Clone, Debug, Default)]
pub struct TransitionGuard;

impl TransitionGuard {
    pub fn check_status_change(
        &self,
        actor: &Actor,
        case: &Case,
        target: CaseStatus,
        context: &FlowContext,
    ) -> Result<(), DomainError> {
        let reject = |reason: &str| DomainError::TransitionRejected {
            from: case.status,
            to: target,
            reason: reason.to_owned(),
        };

        if target == CaseStatus::Draft {
            return Err(reject("a case cannot be returned to draft"));
        }
        if target == case.status {
            return Err(reject("case is already in this status"));
        }

        match actor.actor_type {
            ActorType::System => Ok(()),
            ActorType::Exporter => {
                if target == CaseStatus::Finalised {
                    return Err(reject("cases are finalised through the finalise operation"));
                }
                self.check_exporter(actor, case, target, context)
            }
            ActorType::Caseworker => {
                if target == CaseStatus::Finalised {
                    return Err(reject("cases are finalised through the finalise operation"));
                }
                self.check_caseworker(actor, case, target, context)
            }
        }
    }

    fn check_exporter(
        &self,
        actor: &Actor,
        case: &Case,
        target: CaseStatus,
        context: &FlowContext,
    ) -> Result<(), DomainError> {
        let reject = |reason: &str| DomainError::TransitionRejected {
            from: case.status,
            to: target,
            reason: reason.to_owned(),
        };

        match actor.organisation_id.as_ref() {
            Some(organisation_id) if case.is_owned_by(organisation_id) => {}
            _ => {
                return Err(DomainError::Forbidden(
                    "case belongs to a different organisation".to_owned(),
                ))
            }
        }

        match target {
            CaseStatus::ApplicantEditing => {
                if case.status.is_read_only() || case.status.is_terminal() {
                    return Err(reject("the application can no longer be edited"));
                }
            }
            CaseStatus::Withdrawn => {
                if case.status.is_terminal() {
                    return Err(reject("a closed case cannot be withdrawn"));
                }
            }
            CaseStatus::Surrendered => {
                if case.status != CaseStatus::Finalised || !context.has_issued_licence {
                    return Err(reject("only a finalised case with an issued licence can be surrendered"));
                }
            }
            _ => return Err(reject("exporters may only edit, withdraw or surrender")),
        }
        Ok(())
    }

    fn check_caseworker(
        &self,
        actor: &Actor,
        case: &Case,
        target: CaseStatus,
        context: &FlowContext,
    ) -> Result<(), DomainError> {
        let reject = |reason: &str| DomainError::TransitionRejected {
            from: case.status,
            to: target,
            reason: reason.to_owned(),
        };

        if case.status.is_terminal() && !actor.has_permission(Permission::ReopenClosedCases) {
            return Err(DomainError::Forbidden(
                "reopening a closed case requires the reopen_closed_cases permission".to_owned(),
            ));
        }

        let reopening = target == CaseStatus::ReopenedForChanges && case.status.is_terminal();
        if !target.is_caseworker_operable() && !reopening {
            return Err(reject("caseworkers cannot set this status"));
        }
        if target.is_countersign() && !context.countersign_routing {
            return Err(reject("countersign routing is not enabled"));
        }
        if !target.applies_to(case.case_type) {
            return Err(reject("status is not valid for this case type"));
        }
        Ok(())
    }

    /// Preconditions for recording a final decision.
    pub fn check_finalise(
        &self,
        actor: &Actor,
        case: &Case,
        countersignatures: &[CountersignAdvice],
        context: &FlowContext,
    ) -> Result<(), DomainError> {
        if actor.actor_type != ActorType::Caseworker
            || !actor.has_permission(Permission::ManageLicenceFinalAdvice)
        {
            return Err(DomainError::Forbidden(
                "finalising requires the manage_licence_final_advice permission".to_owned(),
            ));
        }
        if case.status != CaseStatus::UnderFinalReview {
            return Err(DomainError::TransitionRejected {
                from: case.status,
                to: CaseStatus::Finalised,
                reason: "only cases under final review can be finalised".to_owned(),
            });
        }
        if context.countersign_routing {
            countersign::ensure_complete(case, countersignatures)?;
        }
        Ok(())
    }

    pub fn check_sub_status(&self, case: &Case, sub_status: SubStatus) -> Result<(), DomainError> {
        if sub_status.parent() != case.status {
            return Err(DomainError::BadSubStatus { sub_status, status: case.status });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::domain::actor::{Actor, Permission};
    use crate::domain::advice::{CountersignAdvice, CountersignOrder};
    use crate::domain::case::{Case, CaseId, CaseTypeReference, OrganisationId};
    use crate::domain::status::{CaseStatus, SubStatus};
    use crate::errors::DomainError;
    use crate::flows::guard::TransitionGuard;
    use crate::flows::states::FlowContext;

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

    fn exporter() -> Actor {
        Actor::exporter("exporter-1", OrganisationId("org-1".to_owned()))
    }

    fn caseworker(permissions: &[Permission]) -> Actor {
        Actor::caseworker("officer-1", permissions.iter().copied())
    }

    fn rejected(result: Result<(), DomainError>) -> bool {
        matches!(result, Err(DomainError::TransitionRejected { .. }))
    }

    fn forbidden(result: Result<(), DomainError>) -> bool {
        matches!(result, Err(DomainError::Forbidden(_)))
    }

    #[test]
    fn finalised_is_never_reachable_by_status_change() {
        let guard = TransitionGuard;
        let context = FlowContext::default();
        let case = case_in(CaseStatus::UnderFinalReview);

        assert!(rejected(guard.check_status_change(&caseworker(&[]), &case, CaseStatus::Finalised, &context)));
        assert!(rejected(guard.check_status_change(&exporter(), &case, CaseStatus::Finalised, &context)));
    }

    #[test]
    fn exporter_from_other_organisation_is_forbidden() {
        let guard = TransitionGuard;
        let outsider = Actor::exporter("exporter-9", OrganisationId("org-9".to_owned()));
        let result = guard.check_status_change(
            &outsider,
            &case_in(CaseStatus::Submitted),
            CaseStatus::Withdrawn,
            &FlowContext::default(),
        );

        assert!(forbidden(result));
    }

    #[test]
    fn exporter_may_edit_withdraw_and_surrender_only_when_allowed() {
        let guard = TransitionGuard;
        let context = FlowContext::default();

        assert!(guard
            .check_status_change(&exporter(), &case_in(CaseStatus::Submitted), CaseStatus::ApplicantEditing, &context)
            .is_ok());
        assert!(rejected(guard.check_status_change(
            &exporter(),
            &case_in(CaseStatus::UnderFinalReview),
            CaseStatus::ApplicantEditing,
            &context,
        )));
        assert!(guard
            .check_status_change(&exporter(), &case_in(CaseStatus::UnderReview), CaseStatus::Withdrawn, &context)
            .is_ok());
        assert!(rejected(guard.check_status_change(
            &exporter(),
            &case_in(CaseStatus::Closed),
            CaseStatus::Withdrawn,
            &context,
        )));
        assert!(rejected(guard.check_status_change(
            &exporter(),
            &case_in(CaseStatus::Submitted),
            CaseStatus::UnderReview,
            &context,
        )));

        let finalised = case_in(CaseStatus::Finalised);
        assert!(rejected(guard.check_status_change(&exporter(), &finalised, CaseStatus::Surrendered, &context)));
        let with_licence = FlowContext { has_issued_licence: true, ..FlowContext::default() };
        assert!(guard
            .check_status_change(&exporter(), &finalised, CaseStatus::Surrendered, &with_licence)
            .is_ok());
    }

    #[test]
    fn caseworker_cannot_set_exporter_or_system_statuses() {
        let guard = TransitionGuard;
        let context = FlowContext::default();
        let case = case_in(CaseStatus::UnderReview);

        for target in [
            CaseStatus::ApplicantEditing,
            CaseStatus::Surrendered,
            CaseStatus::Suspended,
            CaseStatus::SupersededByExporterEdit,
            CaseStatus::Draft,
        ] {
            assert!(rejected(guard.check_status_change(&caseworker(&[]), &case, target, &context)), "{target}");
        }
        assert!(guard.check_status_change(&caseworker(&[]), &case, CaseStatus::OgdAdvice, &context).is_ok());
    }

    #[test]
    fn reopening_closed_cases_needs_permission() {
        let guard = TransitionGuard;
        let context = FlowContext::default();
        let closed = case_in(CaseStatus::Closed);

        assert!(forbidden(guard.check_status_change(
            &caseworker(&[]),
            &closed,
            CaseStatus::ReopenedForChanges,
            &context,
        )));
        assert!(guard
            .check_status_change(
                &caseworker(&[Permission::ReopenClosedCases]),
                &closed,
                CaseStatus::ReopenedForChanges,
                &context,
            )
            .is_ok());
        assert!(rejected(guard.check_status_change(
            &caseworker(&[Permission::ReopenClosedCases]),
            &case_in(CaseStatus::UnderReview),
            CaseStatus::ReopenedForChanges,
            &context,
        )));
    }

    #[test]
    fn status_must_suit_case_type_and_feature_flags() {
        let guard = TransitionGuard;
        let context = FlowContext::default();
        let case = case_in(CaseStatus::UnderReview);

        assert!(rejected(guard.check_status_change(&caseworker(&[]), &case, CaseStatus::ClcReview, &context)));
        assert!(rejected(guard.check_status_change(
            &caseworker(&[]),
            &case,
            CaseStatus::FinalReviewCountersign,
            &context,
        )));
        let routing = FlowContext { countersign_routing: true, ..FlowContext::default() };
        assert!(guard
            .check_status_change(&caseworker(&[]), &case, CaseStatus::FinalReviewCountersign, &routing)
            .is_ok());
    }

    #[test]
    fn system_actor_bypasses_role_checks() {
        let guard = TransitionGuard;
        let result = guard.check_status_change(
            &Actor::system(),
            &case_in(CaseStatus::Submitted),
            CaseStatus::SupersededByExporterEdit,
            &FlowContext::default(),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn finalise_requires_permission_status_and_countersigning() {
        let guard = TransitionGuard;
        let context = FlowContext { countersign_routing: true, ..FlowContext::default() };
        let mut case = case_in(CaseStatus::UnderFinalReview);
        let lead = caseworker(&[Permission::ManageLicenceFinalAdvice]);

        assert!(forbidden(guard.check_finalise(&caseworker(&[]), &case, &[], &context)));
        assert!(rejected(guard.check_finalise(&lead, &case_in(CaseStatus::UnderReview), &[], &context)));
        assert!(guard.check_finalise(&lead, &case, &[], &context).is_ok());

        case.flags.insert("LU_COUNTER_REQUIRED".to_owned());
        assert!(matches!(
            guard.check_finalise(&lead, &case, &[], &context),
            Err(DomainError::CountersignIncomplete { .. })
        ));

        let signature = CountersignAdvice {
            id: "cs-1".to_owned(),
            case_id: case.id.clone(),
            advice_id: "advice-1".to_owned(),
            order: CountersignOrder::First,
            outcome_accepted: true,
            reasons: "agreed".to_owned(),
            countersigned_user: "senior-1".to_owned(),
            valid: true,
            created_at: Utc::now(),
        };
        assert!(guard.check_finalise(&lead, &case, &[signature], &context).is_ok());
    }

    #[test]
    fn sub_status_must_belong_to_current_status() {
        let guard = TransitionGuard;
        let case = case_in(CaseStatus::UnderFinalReview);

        assert!(guard.check_sub_status(&case, SubStatus::UnderFinalReviewInformLetterSent).is_ok());
        assert!(matches!(
            guard.check_sub_status(&case, SubStatus::FinalisedApproved),
            Err(DomainError::BadSubStatus { status: CaseStatus::UnderFinalReview, .. })
        ));
    }
}
