use chrono::{DateTime, Datelike, Utc};
use tracing::{info, warn};

use lite_core::audit::{AuditContext, AuditEvent, AuditSink, AuditVerb, InMemoryAuditSink};
use lite_core::domain::actor::{Actor, ActorType};
use lite_core::domain::case::{Case, CaseId};
use lite_core::domain::licence::{Licence, LicenceStatus};
use lite_core::domain::status::{CaseStatus, SubStatus};
use lite_core::errors::{ApplicationError, DomainError};
use lite_core::execution_engine::DeterministicExecutionEngine;
use lite_core::flows::{CaseWorkflowEngine, FlowAction, StatusChangeRequest, TransitionOutcome};
use lite_core::licensing::reference::CaseReference;
use lite_core::licensing::LicenceChange;
use lite_core::reactor::{FlaggingEngine, PostTransitionReactor, ReactorReport, RoutingEngine, RoutingReport};
use lite_core::sla::target_days;
use lite_db::repositories::ChangeSet;

use crate::error::persistence;
use crate::scheduling::HmrcScheduler;
use crate::settings::RuntimeSettings;
use crate::stores::Stores;

#[derive(Clone, Debug, PartialEq)]
pub struct StatusChangeReport {
    pub case: Case,
    pub transition: TransitionOutcome,
    pub reactor: ReactorReport,
    pub licence_changes: Vec<LicenceChange>,
}

/// Moves cases between statuses and runs everything a case save implies:
/// reference codes, SLA targets, licence status, flagging, routing and
/// the outbox.
#[derive(Clone)]
pub struct StatusChangeService {
    stores: Stores,
    settings: RuntimeSettings,
    engine: CaseWorkflowEngine,
    scheduler: HmrcScheduler,
}

impl StatusChangeService {
    pub fn new(stores: Stores, settings: RuntimeSettings) -> Self {
        let scheduler = HmrcScheduler::new(
            stores.tasks.clone(),
            DeterministicExecutionEngine::with_config(settings.execution.clone()),
        );
        Self { stores, settings, engine: CaseWorkflowEngine::default(), scheduler }
    }

    pub async fn change_status(
        &self,
        case_id: &CaseId,
        actor: &Actor,
        request: StatusChangeRequest,
        correlation_id: &str,
    ) -> Result<StatusChangeReport, ApplicationError> {
        let case = load_case(&self.stores, case_id).await?;
        let audit = AuditContext::new(correlation_id, actor);
        self.apply_change(case, actor, &request, &audit, Utc::now()).await
    }

    /// Exporter submission of a draft or an application opened for editing.
    /// The status table does not let exporters pick `submitted` themselves,
    /// so ownership and source status are checked here.
    pub async fn submit(
        &self,
        case_id: &CaseId,
        actor: &Actor,
        correlation_id: &str,
    ) -> Result<StatusChangeReport, ApplicationError> {
        let case = load_case(&self.stores, case_id).await?;
        if actor.actor_type != ActorType::Exporter
            || actor.organisation_id.as_ref() != Some(&case.organisation_id)
        {
            return Err(DomainError::Forbidden("only the owning organisation can submit".to_owned()).into());
        }
        if !matches!(case.status, CaseStatus::Draft | CaseStatus::ApplicantEditing) {
            return Err(DomainError::TransitionRejected {
                from: case.status,
                to: CaseStatus::Submitted,
                reason: "only drafts and applications being edited can be submitted".to_owned(),
            }
            .into());
        }

        let audit = AuditContext::new(correlation_id, actor);
        self.apply_change(case, &Actor::system(), &StatusChangeRequest::to(CaseStatus::Submitted), &audit, Utc::now())
            .await
    }

    pub async fn set_sub_status(
        &self,
        case_id: &CaseId,
        actor: &Actor,
        sub_status: SubStatus,
        correlation_id: &str,
    ) -> Result<Case, ApplicationError> {
        if actor.actor_type == ActorType::Exporter {
            return Err(DomainError::Forbidden("exporters cannot set sub-statuses".to_owned()).into());
        }
        let mut case = load_case(&self.stores, case_id).await?;
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::new(correlation_id, actor);

        self.engine.set_sub_status(&mut case, sub_status, Utc::now(), &sink, &audit)?;

        self.stores
            .unit_of_work
            .commit(ChangeSet { cases: vec![case.clone()], events: sink.drain(), ..ChangeSet::default() })
            .await
            .map_err(persistence)?;
        info!(
            event_name = "case.sub_status.changed",
            correlation_id = %correlation_id,
            case_id = %case.id.0,
            sub_status = sub_status.as_str(),
            "case sub-status updated"
        );
        Ok(case)
    }

    /// Drops every queue and assignment and routes the case from scratch.
    /// Unlike a status change, an unrouted case may advance through the
    /// workflow sequence.
    pub async fn rerun_routing(
        &self,
        case_id: &CaseId,
        actor: &Actor,
        correlation_id: &str,
    ) -> Result<RoutingReport, ApplicationError> {
        if actor.actor_type != ActorType::Caseworker {
            return Err(DomainError::Forbidden("only caseworkers can rerun routing rules".to_owned()).into());
        }
        let mut case = load_case(&self.stores, case_id).await?;
        let sink = InMemoryAuditSink::default();
        sink.emit(AuditEvent::success(
            case.id.clone(),
            AuditVerb::RerunRoutingRules,
            &AuditContext::new(correlation_id, actor),
        ));

        let reactor = load_reactor(&self.stores).await?;
        let report = reactor.routing().run(&mut case, false, &sink, &AuditContext::system(correlation_id));
        case.updated_at = Utc::now();

        self.stores
            .unit_of_work
            .commit(ChangeSet { cases: vec![case.clone()], events: sink.drain(), ..ChangeSet::default() })
            .await
            .map_err(persistence)?;
        info!(
            event_name = "case.routing.rerun",
            correlation_id = %correlation_id,
            case_id = %case.id.0,
            queues_added = report.queues_added.len(),
            advanced = report.advanced_to.len(),
            "routing rules rerun"
        );
        Ok(report)
    }

    /// Runs a change against a case that is already loaded. `actor` is the
    /// one the guard checks; `audit` names who the trail is recorded against.
    pub(crate) async fn apply_change(
        &self,
        case: Case,
        actor: &Actor,
        request: &StatusChangeRequest,
        audit: &AuditContext,
        now: DateTime<Utc>,
    ) -> Result<StatusChangeReport, ApplicationError> {
        let (report, changes) = self.prepare_change(case, actor, request, audit, now).await?;
        self.stores.unit_of_work.commit(changes).await.map_err(persistence)?;
        log_status_change(&report, audit);
        Ok(report)
    }

    /// Works out everything a change writes without writing it. A rejected
    /// transition records its audit trail and returns the error.
    pub(crate) async fn prepare_change(
        &self,
        mut case: Case,
        actor: &Actor,
        request: &StatusChangeRequest,
        audit: &AuditContext,
        now: DateTime<Utc>,
    ) -> Result<(StatusChangeReport, ChangeSet), ApplicationError> {
        let mut licences = self.stores.licences.list_for_case(&case.id).await.map_err(persistence)?;
        let current = current_licence(&licences);
        let context = self.settings.flow_context(current.is_some());
        let sink = InMemoryAuditSink::default();

        let transition = match self.engine.apply_with_audit(&mut case, actor, request, &context, now, &sink, audit) {
            Ok(transition) => transition,
            Err(error) => {
                self.stores.audit.append(sink.drain()).await.map_err(persistence)?;
                warn!(
                    event_name = "case.status.rejected",
                    correlation_id = %audit.correlation_id,
                    case_id = %case.id.0,
                    target = request.target.as_str(),
                    error = %error,
                    "status change rejected"
                );
                return Err(error.into());
            }
        };

        if transition.requires(&FlowAction::AssignReferenceCode) {
            let year = now.year();
            let number = self.stores.references.next_number(year).await.map_err(persistence)?;
            case.reference_code = Some(CaseReference::format(case.case_type, case.export_type, year, number));
        }
        if transition.requires(&FlowAction::StampSubmission) && case.sla_remaining_days.is_none() {
            case.sla_remaining_days =
                target_days(case.case_type).map(|days| i32::try_from(days).unwrap_or(i32::MAX));
        }

        let mut changes = ChangeSet::default();
        let mut licence_changes = Vec::new();
        if let (Some(status), Some(index)) = (transition.licence_status(), current) {
            let licence = &mut licences[index];
            licence_changes.push(licence.apply_case_status(status, now).map_err(DomainError::from)?);
            self.scheduler.plan(&case, licence, &audit.correlation_id, now, &mut changes).await?;
            changes.licences.push(licence.clone());
        }

        let reactor = load_reactor(&self.stores).await?;
        let reaction =
            reactor.react(&mut case, &transition, true, &sink, &AuditContext::system(audit.correlation_id.clone()));

        changes.cases.push(case.clone());
        changes.events = sink.drain();
        changes.notifications = reaction.notifications.clone();

        Ok((StatusChangeReport { case, transition, reactor: reaction, licence_changes }, changes))
    }
}

pub(crate) fn log_status_change(report: &StatusChangeReport, audit: &AuditContext) {
    info!(
        event_name = "case.status.changed",
        correlation_id = %audit.correlation_id,
        case_id = %report.case.id.0,
        from = report.transition.from.as_str(),
        to = report.transition.to.as_str(),
        actor_id = %audit.actor_id,
        "case status changed"
    );
}

pub(crate) async fn load_case(stores: &Stores, case_id: &CaseId) -> Result<Case, ApplicationError> {
    stores
        .cases
        .find_by_id(case_id)
        .await
        .map_err(persistence)?
        .ok_or_else(|| DomainError::not_found("case", case_id.0.clone()).into())
}

pub(crate) async fn load_reactor(stores: &Stores) -> Result<PostTransitionReactor, ApplicationError> {
    let routing_rules = stores.rules.list_routing_rules().await.map_err(persistence)?;
    let flagging_rules = stores.rules.list_flagging_rules().await.map_err(persistence)?;
    let control_list = stores.rules.control_list().await.map_err(persistence)?;
    Ok(PostTransitionReactor::new(RoutingEngine::new(routing_rules), FlaggingEngine::new(flagging_rules, control_list)))
}

/// Index of the most recent licence still in force on the case.
fn current_licence(licences: &[Licence]) -> Option<usize> {
    licences
        .iter()
        .enumerate()
        .filter(|(_, licence)| {
            matches!(licence.status, LicenceStatus::Issued | LicenceStatus::Reinstated | LicenceStatus::Suspended)
        })
        .max_by_key(|(_, licence)| licence.created_at)
        .map(|(index, _)| index)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{NaiveDate, Utc};

    use lite_core::audit::AuditVerb;
    use lite_core::domain::actor::{Actor, Permission};
    use lite_core::domain::case::{Case, CaseId, CaseParameter, CaseTypeReference, ExportType, OrganisationId};
    use lite_core::domain::licence::{Licence, LicenceId, LicenceStatus};
    use lite_core::domain::notification::NotificationKind;
    use lite_core::domain::rules::RoutingRule;
    use lite_core::domain::execution::ExecutionTaskState;
    use lite_core::domain::status::{CaseStatus, SubStatus};
    use lite_core::flows::StatusChangeRequest;

    use super::StatusChangeService;
    use crate::settings::RuntimeSettings;
    use crate::stores::Stores;
    use crate::test_support::failing_stores;

    fn exporter() -> Actor {
        Actor::exporter("exporter-1", OrganisationId("org-1".to_owned()))
    }

    fn caseworker() -> Actor {
        Actor::caseworker("caseworker-1", [Permission::ReopenClosedCases])
    }

    fn draft(id: &str) -> Case {
        let mut case = Case::draft(
            CaseId(id.to_owned()),
            CaseTypeReference::Siel,
            OrganisationId("org-1".to_owned()),
            "Acme Exports",
            "Night vision goggles",
            Utc::now(),
        );
        case.export_type = Some(ExportType::Permanent);
        case
    }

    fn licensing_rule() -> RoutingRule {
        RoutingRule {
            id: "rule-1".to_owned(),
            team_id: "team-licensing".to_owned(),
            queue_id: "queue-licensing".to_owned(),
            status: CaseStatus::Submitted,
            tier: 1,
            active: true,
            user: None,
            parameter_sets: vec![BTreeSet::from([CaseParameter::CaseType(CaseTypeReference::Siel)])],
        }
    }

    async fn service_with(case: Case) -> (StatusChangeService, Stores) {
        let stores = Stores::in_memory();
        stores.cases.save(case).await.expect("save case");
        (StatusChangeService::new(stores.clone(), RuntimeSettings::default()), stores)
    }

    #[tokio::test]
    async fn submission_assigns_reference_sla_target_and_routes() {
        let (service, stores) = service_with(draft("case-1")).await;
        stores.rules.save_routing_rule(licensing_rule()).await.expect("rule");

        let report = service.submit(&CaseId("case-1".to_owned()), &exporter(), "corr-1").await.expect("submit");

        let year = Utc::now().format("%Y").to_string();
        assert_eq!(report.case.status, CaseStatus::Submitted);
        assert_eq!(report.case.reference_code, Some(format!("GBSIEL/{year}/0000001/P")));
        assert_eq!(report.case.sla_remaining_days, Some(20));
        assert!(report.case.submitted_at.is_some());
        assert!(report.case.queues.contains("queue-licensing"));

        let stored = stores.cases.find_by_id(&CaseId("case-1".to_owned())).await.expect("load").expect("case");
        assert_eq!(stored, report.case);

        let verbs: Vec<AuditVerb> = stores
            .audit
            .list_for_case(&CaseId("case-1".to_owned()))
            .await
            .expect("audit")
            .into_iter()
            .map(|event| event.verb)
            .collect();
        assert!(verbs.contains(&AuditVerb::UpdatedStatus));
        assert!(verbs.contains(&AuditVerb::MoveCase));
    }

    #[tokio::test]
    async fn status_change_keeps_the_status_when_no_rule_matches() {
        let mut case = draft("case-1");
        case.status = CaseStatus::Submitted;
        case.reference_code = Some("GBSIEL/2026/0000001/P".to_owned());
        case.submitted_at = Some(Utc::now());
        let (service, _stores) = service_with(case).await;

        let report = service
            .change_status(
                &CaseId("case-1".to_owned()),
                &caseworker(),
                StatusChangeRequest::to(CaseStatus::InitialChecks),
                "corr-1",
            )
            .await
            .expect("change");

        assert_eq!(report.case.status, CaseStatus::InitialChecks);
        assert!(report.reactor.routing.as_ref().is_some_and(|routing| routing.advanced_to.is_empty()));
    }

    #[tokio::test]
    async fn rejected_changes_are_audited_and_leave_the_case_alone() {
        let mut case = draft("case-1");
        case.status = CaseStatus::Submitted;
        let (service, stores) = service_with(case.clone()).await;

        let error = service
            .change_status(
                &CaseId("case-1".to_owned()),
                &exporter(),
                StatusChangeRequest::to(CaseStatus::UnderReview),
                "corr-1",
            )
            .await
            .expect_err("exporters cannot move cases under review");

        assert_eq!(error.into_interface("corr-1").status_code(), 400);
        let stored = stores.cases.find_by_id(&case.id).await.expect("load").expect("case");
        assert_eq!(stored.status, CaseStatus::Submitted);
        let events = stores.audit.list_for_case(&case.id).await.expect("audit");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].verb, AuditVerb::TransitionRejected);
    }

    #[tokio::test]
    async fn applicant_editing_queues_a_notification_for_the_organisation() {
        let mut case = draft("case-1");
        case.status = CaseStatus::Submitted;
        let (service, stores) = service_with(case).await;

        service
            .change_status(
                &CaseId("case-1".to_owned()),
                &exporter(),
                StatusChangeRequest::to(CaseStatus::ApplicantEditing).with_note("fixing end user"),
                "corr-1",
            )
            .await
            .expect("edit");

        let pending = stores.notifications.list_pending(10).await.expect("outbox");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, NotificationKind::ApplicantEditing);
        assert_eq!(pending[0].recipient, "org-1");
    }

    fn issued_licence(case_id: &CaseId) -> Licence {
        let mut licence = Licence::draft(
            LicenceId("lic-1".to_owned()),
            case_id.clone(),
            "GBSIEL/2026/0000001/P",
            NaiveDate::from_ymd_opt(2026, 10, 1).expect("date"),
            24,
            Vec::new(),
            Utc::now(),
        )
        .expect("licence");
        licence.status = LicenceStatus::Issued;
        licence
    }

    #[tokio::test]
    async fn suspending_a_case_suspends_its_licence_and_schedules_hmrc() {
        let mut case = draft("case-1");
        case.status = CaseStatus::Finalised;
        let (service, stores) = service_with(case.clone()).await;
        stores.licences.save(issued_licence(&case.id)).await.expect("save licence");

        let report = service
            .change_status(&case.id, &Actor::system(), StatusChangeRequest::to(CaseStatus::Suspended), "corr-1")
            .await
            .expect("suspend");

        assert_eq!(report.licence_changes.len(), 1);
        let stored = stores.licences.find_by_id(&LicenceId("lic-1".to_owned())).await.expect("load").expect("licence");
        assert_eq!(stored.status, LicenceStatus::Suspended);
        let tasks = stores.tasks.list_tasks_for_case(&case.id, Some(ExecutionTaskState::Queued)).await.expect("tasks");
        assert_eq!(tasks.len(), 1);
    }

    #[tokio::test]
    async fn a_failed_write_persists_nothing() {
        let mut case = draft("case-1");
        case.status = CaseStatus::Finalised;
        let stores = failing_stores();
        stores.cases.save(case.clone()).await.expect("save case");
        stores.licences.save(issued_licence(&case.id)).await.expect("save licence");
        let service = StatusChangeService::new(stores.clone(), RuntimeSettings::default());

        let error = service
            .change_status(&case.id, &Actor::system(), StatusChangeRequest::to(CaseStatus::Suspended), "corr-1")
            .await
            .expect_err("write fails");

        assert_eq!(error.into_interface("corr-1").status_code(), 503);
        let stored = stores.cases.find_by_id(&case.id).await.expect("load").expect("case");
        assert_eq!(stored.status, CaseStatus::Finalised);
        let licence = stores.licences.find_by_id(&LicenceId("lic-1".to_owned())).await.expect("load").expect("licence");
        assert_eq!(licence.status, LicenceStatus::Issued);
        assert!(stores.tasks.list_tasks_for_case(&case.id, None).await.expect("tasks").is_empty());
        assert!(stores.audit.list_for_case(&case.id).await.expect("audit").is_empty());
    }

    #[tokio::test]
    async fn sub_status_must_belong_to_the_current_status() {
        let mut case = draft("case-1");
        case.status = CaseStatus::Submitted;
        let (service, _stores) = service_with(case).await;

        let error = service
            .set_sub_status(&CaseId("case-1".to_owned()), &caseworker(), SubStatus::FinalisedApproved, "corr-1")
            .await
            .expect_err("finalised sub-status on a submitted case");

        assert_eq!(error.into_interface("corr-1").status_code(), 400);
    }

    #[tokio::test]
    async fn missing_cases_are_not_found() {
        let (service, _stores) = service_with(draft("case-1")).await;

        let error = service
            .change_status(
                &CaseId("case-unknown".to_owned()),
                &caseworker(),
                StatusChangeRequest::to(CaseStatus::Withdrawn),
                "corr-1",
            )
            .await
            .expect_err("unknown case");

        assert_eq!(error.into_interface("corr-1").status_code(), 404);
    }
}
