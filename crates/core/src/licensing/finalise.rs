use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::{AuditContext, AuditEvent, AuditSink, AuditVerb};
use crate::domain::actor::Actor;
use crate::domain::advice::{AdviceType, CountersignAdvice};
use crate::domain::case::Case;
use crate::domain::licence::{GoodOnLicence, Licence, LicenceDecision, LicenceDecisionType, LicenceId};
use crate::domain::notification::{Notification, NotificationKind};
use crate::domain::status::{CaseStatus, SubStatus};
use crate::errors::DomainError;
use crate::flows::{CaseWorkflowEngine, FlowContext, StatusChangeRequest, TransitionOutcome};
use crate::licensing::lifecycle::LicenceChange;
use crate::licensing::reference::licence_reference;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinaliseRequest {
    pub decisions: Vec<AdviceType>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub duration_months: Option<u32>,
}

/// Licensing state of the case before finalising.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FinaliseRecords {
    pub licences: Vec<Licence>,
    pub countersignatures: Vec<CountersignAdvice>,
    pub last_decision: Option<LicenceDecision>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FinaliseOutcome {
    pub transition: TransitionOutcome,
    pub issued_licence: Option<Licence>,
    /// Previously issued licences touched by the re-issue.
    pub updated_licences: Vec<Licence>,
    pub licence_changes: Vec<LicenceChange>,
    pub decisions: Vec<LicenceDecision>,
    pub notifications: Vec<Notification>,
}

/// Records the final decision on a case under final review.
#[allow(clippy::too_many_arguments)]
pub fn finalise<S>(
    engine: &CaseWorkflowEngine,
    case: &mut Case,
    actor: &Actor,
    request: &FinaliseRequest,
    records: FinaliseRecords,
    context: &FlowContext,
    default_duration_months: u32,
    now: DateTime<Utc>,
    sink: &S,
    audit: &AuditContext,
) -> Result<FinaliseOutcome, DomainError>
where
    S: AuditSink,
{
    engine.guard().check_finalise(actor, case, &records.countersignatures, context)?;
    if request.decisions.is_empty() {
        return Err(DomainError::field("decisions", "Select at least one decision"));
    }

    let grants = request.decisions.iter().any(AdviceType::grants_licence);
    let refuses = request.decisions.contains(&AdviceType::Refuse);

    let mut issued_licence = None;
    let mut updated_licences = Vec::new();
    let mut licence_changes = Vec::new();
    let mut decisions = Vec::new();
    let mut notifications = Vec::new();

    if grants {
        let (licence, previous, changes) = issue_licence(case, request, &records.licences, default_duration_months, now)?;
        licence_changes = changes;
        updated_licences.extend(previous);

        let decision = if records.last_decision.as_ref().is_some_and(|decision| decision.decision == LicenceDecisionType::Refused) {
            LicenceDecisionType::IssuedOnAppeal
        } else {
            LicenceDecisionType::Issued
        };
        decisions.push(record_decision(case, decision, Some(licence.id.clone()), records.last_decision.as_ref(), now));
        notifications.push(Notification::new(
            case.id.clone(),
            NotificationKind::LicenceIssued,
            case.organisation_id.0.clone(),
            serde_json::json!({
                "case_reference": case.reference_code,
                "licence_reference": licence.reference_code,
            }),
        ));
        issued_licence = Some(licence);
    } else if refuses {
        decisions.push(record_decision(case, LicenceDecisionType::Refused, None, records.last_decision.as_ref(), now));
    }

    let transition = engine.apply_with_audit(
        case,
        &Actor::system(),
        &StatusChangeRequest::to(CaseStatus::Finalised),
        context,
        now,
        sink,
        audit,
    )?;

    let sub_status = if grants {
        Some(SubStatus::FinalisedApproved)
    } else if refuses {
        Some(SubStatus::FinalisedRefused)
    } else {
        None
    };
    if let Some(sub_status) = sub_status {
        engine.set_sub_status(case, sub_status, now, sink, audit)?;
    }

    let decision_labels: Vec<&str> = request.decisions.iter().map(AdviceType::as_str).collect();
    sink.emit(
        AuditEvent::success(case.id.clone(), AuditVerb::CreatedFinalRecommendation, audit)
            .with_payload("decision", decision_labels.join(", ")),
    );

    Ok(FinaliseOutcome { transition, issued_licence, updated_licences, licence_changes, decisions, notifications })
}

fn issue_licence(
    case: &Case,
    request: &FinaliseRequest,
    existing: &[Licence],
    default_duration_months: u32,
    now: DateTime<Utc>,
) -> Result<(Licence, Option<Licence>, Vec<LicenceChange>), DomainError> {
    if !case.case_type.issues_licences() {
        return Err(DomainError::field(
            "decisions",
            format!("{} cases do not issue licences", case.case_type.label()),
        ));
    }
    let Some(case_reference) = case.reference_code.as_deref() else {
        return Err(DomainError::InvariantViolation("case has no reference code".to_owned()));
    };

    let start_date = request.start_date.unwrap_or_else(|| now.date_naive());
    let duration = request
        .duration_months
        .or(case.licence_duration_months)
        .unwrap_or(default_duration_months);
    let goods = case
        .goods
        .iter()
        .map(|good| GoodOnLicence {
            id: Uuid::new_v4().to_string(),
            good_on_application_id: good.id.clone(),
            good_id: good.good_id.clone(),
            name: good.name.clone(),
            description: good.description.clone(),
            unit: good.unit.clone(),
            quantity: good.quantity,
            value: good.value,
            usage: rust_decimal::Decimal::ZERO,
        })
        .collect();

    let mut licence = Licence::draft(
        LicenceId(Uuid::new_v4().to_string()),
        case.id.clone(),
        licence_reference(case_reference, existing.len()),
        start_date,
        duration,
        goods,
        now,
    )?;

    let mut previous = existing
        .iter()
        .filter(|licence| licence.status != crate::domain::licence::LicenceStatus::Draft)
        .max_by_key(|licence| licence.created_at)
        .cloned();
    let changes = licence.issue(previous.as_mut(), now)?;
    Ok((licence, previous, changes))
}

fn record_decision(
    case: &Case,
    decision: LicenceDecisionType,
    licence_id: Option<LicenceId>,
    previous: Option<&LicenceDecision>,
    now: DateTime<Utc>,
) -> LicenceDecision {
    LicenceDecision {
        id: Uuid::new_v4().to_string(),
        case_id: case.id.clone(),
        decision,
        licence_id,
        previous_decision_id: previous.map(|decision| decision.id.clone()),
        created_at: now,
    }
}
