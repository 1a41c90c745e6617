use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};

use lite_core::audit::AuditEvent;
use lite_core::domain::actor::{Actor, ActorType};
use lite_core::domain::advice::CountersignAdvice;
use lite_core::domain::case::{Case, CaseId};
use lite_core::domain::licence::{Licence, LicenceDecisionType, LicenceId, LicenceStatus};
use lite_core::domain::status::{CaseStatus, SubStatus};
use lite_core::errors::DomainError;
use lite_core::flows::StatusChangeRequest;
use lite_core::licensing::{FinaliseRequest, LicenceChange};
use lite_runtime::finalise::NewCountersignature;
use lite_runtime::StatusChangeReport;

use crate::api::{api_error, domain_error, request_context, ApiError, ApiResult, ApiState};

#[derive(Debug, Serialize)]
pub struct CaseView {
    #[serde(flatten)]
    pub case: Case,
    pub superseded_by: Option<CaseId>,
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SubStatusBody {
    pub sub_status: String,
}

#[derive(Debug, Deserialize)]
pub struct CopyBody {
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LicenceChangeView {
    pub licence_id: LicenceId,
    pub from: LicenceStatus,
    pub to: LicenceStatus,
}

impl From<&LicenceChange> for LicenceChangeView {
    fn from(change: &LicenceChange) -> Self {
        Self { licence_id: change.licence_id.clone(), from: change.from, to: change.to }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusChangeView {
    pub case: Case,
    pub from: CaseStatus,
    pub to: CaseStatus,
    pub queues_added: Vec<String>,
    pub flags: Vec<String>,
    pub licence_changes: Vec<LicenceChangeView>,
}

impl From<StatusChangeReport> for StatusChangeView {
    fn from(report: StatusChangeReport) -> Self {
        Self {
            from: report.transition.from,
            to: report.case.status,
            queues_added: report.reactor.routing.map(|routing| routing.queues_added).unwrap_or_default(),
            flags: report.case.flags.iter().cloned().collect(),
            licence_changes: report.licence_changes.iter().map(LicenceChangeView::from).collect(),
            case: report.case,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FinaliseView {
    pub status: CaseStatus,
    pub licence: Option<Licence>,
    pub decisions: Vec<LicenceDecisionType>,
    pub licence_changes: Vec<LicenceChangeView>,
}

#[derive(Debug, Serialize)]
pub struct RoutingView {
    pub queues_added: Vec<String>,
    pub assigned_users: Vec<String>,
    pub advanced_to: Vec<CaseStatus>,
}

/// Exporters only ever see their own organisation's cases.
pub(crate) fn ensure_visible(actor: &Actor, case: &Case, correlation_id: &str) -> Result<(), ApiError> {
    if actor.actor_type == ActorType::Exporter && actor.organisation_id.as_ref() != Some(&case.organisation_id) {
        return Err(domain_error(
            DomainError::Forbidden("case belongs to another organisation".to_owned()),
            correlation_id,
        ));
    }
    Ok(())
}

async fn visible_case(state: &ApiState, id: &str, actor: &Actor, correlation_id: &str) -> ApiResult<Case> {
    let case = state
        .stores
        .cases
        .find_by_id(&CaseId(id.to_owned()))
        .await
        .map_err(|error| api_error(lite_runtime::persistence(error), correlation_id))?
        .ok_or_else(|| domain_error(DomainError::not_found("case", id), correlation_id))?;
    ensure_visible(actor, &case, correlation_id)?;
    Ok(case)
}

pub async fn get_case(
    Path(id): Path<String>,
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Json<CaseView>> {
    let (actor, correlation_id) = request_context(&headers)?;
    let case = visible_case(&state, &id, &actor, &correlation_id).await?;
    let superseded_by = state
        .amendments
        .superseded_by(&case.id)
        .await
        .map_err(|error| api_error(error, &correlation_id))?
        .map(|amendment| amendment.id);
    Ok(Json(CaseView { case, superseded_by }))
}

pub async fn change_status(
    Path(id): Path<String>,
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<StatusBody>,
) -> ApiResult<Json<StatusChangeView>> {
    let (actor, correlation_id) = request_context(&headers)?;
    let target = CaseStatus::parse(&body.status).ok_or_else(|| {
        domain_error(DomainError::field("status", format!("`{}` is not a valid status", body.status)), &correlation_id)
    })?;
    let mut request = StatusChangeRequest::to(target);
    if let Some(note) = body.note.filter(|note| !note.trim().is_empty()) {
        request = request.with_note(note);
    }

    let report = state
        .status
        .change_status(&CaseId(id), &actor, request, &correlation_id)
        .await
        .map_err(|error| api_error(error, &correlation_id))?;
    Ok(Json(report.into()))
}

pub async fn set_sub_status(
    Path(id): Path<String>,
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<SubStatusBody>,
) -> ApiResult<Json<Case>> {
    let (actor, correlation_id) = request_context(&headers)?;
    let sub_status = SubStatus::parse(&body.sub_status).ok_or_else(|| {
        domain_error(
            DomainError::field("sub_status", format!("`{}` is not a valid sub-status", body.sub_status)),
            &correlation_id,
        )
    })?;
    let case = state
        .status
        .set_sub_status(&CaseId(id), &actor, sub_status, &correlation_id)
        .await
        .map_err(|error| api_error(error, &correlation_id))?;
    Ok(Json(case))
}

pub async fn submit(
    Path(id): Path<String>,
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Json<StatusChangeView>> {
    let (actor, correlation_id) = request_context(&headers)?;
    let report = state
        .status
        .submit(&CaseId(id), &actor, &correlation_id)
        .await
        .map_err(|error| api_error(error, &correlation_id))?;
    Ok(Json(report.into()))
}

pub async fn amend(
    Path(id): Path<String>,
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<(StatusCode, Json<Case>)> {
    let (actor, correlation_id) = request_context(&headers)?;
    let amendment = state
        .amendments
        .amend(&CaseId(id), &actor, &correlation_id)
        .await
        .map_err(|error| api_error(error, &correlation_id))?;
    Ok((StatusCode::CREATED, Json(amendment)))
}

pub async fn copy(
    Path(id): Path<String>,
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<CopyBody>,
) -> ApiResult<(StatusCode, Json<Case>)> {
    let (actor, correlation_id) = request_context(&headers)?;
    let copy = state
        .amendments
        .copy(&CaseId(id), &actor, &body.name, &correlation_id)
        .await
        .map_err(|error| api_error(error, &correlation_id))?;
    Ok((StatusCode::CREATED, Json(copy)))
}

pub async fn countersign(
    Path(id): Path<String>,
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<NewCountersignature>,
) -> ApiResult<(StatusCode, Json<CountersignAdvice>)> {
    let (actor, correlation_id) = request_context(&headers)?;
    let recorded = state
        .finalise
        .record_countersignature(&CaseId(id), &actor, body, &correlation_id)
        .await
        .map_err(|error| api_error(error, &correlation_id))?;
    Ok((StatusCode::CREATED, Json(recorded)))
}

pub async fn finalise(
    Path(id): Path<String>,
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<FinaliseRequest>,
) -> ApiResult<Json<FinaliseView>> {
    let (actor, correlation_id) = request_context(&headers)?;
    let outcome = state
        .finalise
        .finalise(&CaseId(id), &actor, &body, &correlation_id)
        .await
        .map_err(|error| api_error(error, &correlation_id))?;
    Ok(Json(FinaliseView {
        status: outcome.transition.to,
        decisions: outcome.decisions.iter().map(|decision| decision.decision).collect(),
        licence_changes: outcome.licence_changes.iter().map(LicenceChangeView::from).collect(),
        licence: outcome.issued_licence,
    }))
}

pub async fn rerun_routing(
    Path(id): Path<String>,
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Json<RoutingView>> {
    let (actor, correlation_id) = request_context(&headers)?;
    let report = state
        .status
        .rerun_routing(&CaseId(id), &actor, &correlation_id)
        .await
        .map_err(|error| api_error(error, &correlation_id))?;
    Ok(Json(RoutingView {
        queues_added: report.queues_added,
        assigned_users: report.assignments_added.into_iter().map(|assignment| assignment.user_id).collect(),
        advanced_to: report.advanced_to,
    }))
}

pub async fn audit_trail(
    Path(id): Path<String>,
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<AuditEvent>>> {
    let (actor, correlation_id) = request_context(&headers)?;
    if actor.actor_type == ActorType::Exporter {
        return Err(domain_error(DomainError::Forbidden("the audit trail is internal".to_owned()), &correlation_id));
    }
    let case = visible_case(&state, &id, &actor, &correlation_id).await?;
    let events = state
        .stores
        .audit
        .list_for_case(&case.id)
        .await
        .map_err(|error| api_error(lite_runtime::persistence(error), &correlation_id))?;
    Ok(Json(events))
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::extract::{Path, State};
    use axum::http::{Request, StatusCode};
    use axum::Json;
    use chrono::Utc;
    use tower::ServiceExt;

    use lite_core::audit::AuditVerb;
    use lite_core::domain::case::{Case, CaseId, CaseTypeReference, OrganisationId};
    use lite_core::domain::status::CaseStatus;

    use super::{audit_trail, change_status, copy, get_case, submit, CopyBody, StatusBody};
    use crate::api::api_routes;
    use crate::api::test_support::{caseworker, exporter, state};

    async fn seed(state: &crate::api::ApiState, status: CaseStatus) {
        let mut case = Case::draft(
            CaseId("case-1".to_owned()),
            CaseTypeReference::Siel,
            OrganisationId("org-1".to_owned()),
            "Acme Exports",
            "Sonar arrays",
            Utc::now(),
        );
        case.status = status;
        state.stores.cases.save(case).await.expect("seed case");
    }

    #[tokio::test]
    async fn exporters_submit_their_own_drafts_only() {
        let state = state();
        seed(&state, CaseStatus::Draft).await;

        let refused = submit(Path("case-1".to_owned()), State(state.clone()), exporter("org-2")).await;
        let Err((status, _)) = refused else {
            panic!("another organisation must not submit");
        };
        assert_eq!(status, StatusCode::FORBIDDEN);

        let Json(view) =
            submit(Path("case-1".to_owned()), State(state.clone()), exporter("org-1")).await.expect("submit");
        assert_eq!(view.from, CaseStatus::Draft);
        assert!(view.case.reference_code.is_some());

        let Json(found) =
            get_case(Path("case-1".to_owned()), State(state), exporter("org-1")).await.expect("get case");
        assert!(found.case.submitted_at.is_some());
        assert_eq!(found.superseded_by, None);
    }

    #[tokio::test]
    async fn unknown_status_names_are_field_errors() {
        let state = state();
        seed(&state, CaseStatus::InitialChecks).await;

        let result = change_status(
            Path("case-1".to_owned()),
            State(state),
            caseworker(""),
            Json(StatusBody { status: "on_a_beach".to_owned(), note: None }),
        )
        .await;

        let Err((status, Json(body))) = result else {
            panic!("status should be rejected");
        };
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.errors.contains_key("status"));
    }

    #[tokio::test]
    async fn caseworker_status_change_lands_in_the_audit_trail() {
        let state = state();
        seed(&state, CaseStatus::InitialChecks).await;

        let Json(view) = change_status(
            Path("case-1".to_owned()),
            State(state.clone()),
            caseworker(""),
            Json(StatusBody { status: "under_review".to_owned(), note: Some("checks done".to_owned()) }),
        )
        .await
        .expect("change status");
        assert_eq!(view.to, CaseStatus::UnderReview);

        let forbidden = audit_trail(Path("case-1".to_owned()), State(state.clone()), exporter("org-1")).await;
        assert!(matches!(forbidden, Err((StatusCode::FORBIDDEN, _))));

        let Json(events) =
            audit_trail(Path("case-1".to_owned()), State(state), caseworker("")).await.expect("audit trail");
        assert!(events.iter().any(|event| event.verb == AuditVerb::UpdatedStatus));
    }

    #[tokio::test]
    async fn copies_need_a_name() {
        let state = state();
        seed(&state, CaseStatus::Submitted).await;

        let result =
            copy(Path("case-1".to_owned()), State(state), exporter("org-1"), Json(CopyBody { name: " ".to_owned() }))
                .await;

        assert!(matches!(result, Err((StatusCode::BAD_REQUEST, _))));
    }

    #[tokio::test]
    async fn status_route_accepts_json_bodies() {
        let state = state();
        seed(&state, CaseStatus::InitialChecks).await;

        let response = api_routes(state)
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/api/v1/cases/case-1/status")
                    .header("content-type", "application/json")
                    .header("x-lite-actor-type", "caseworker")
                    .header("x-lite-actor-id", "caseworker-1")
                    .body(Body::from(r#"{"status":"under_review"}"#))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), 256 * 1024).await.expect("body");
        let json: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(json["to"], "under_review");
        assert_eq!(json["case"]["status"], "under_review");
    }
}
