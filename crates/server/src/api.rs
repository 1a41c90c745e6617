//! JSON API. Callers are authenticated upstream; who is acting comes from the
//! `x-lite-*` actor headers.
//!
//! - `GET  /health`
//! - `GET  /api/v1/statuses`
//! - `GET  /api/v1/cases/{id}`
//! - `PUT  /api/v1/cases/{id}/status`
//! - `PUT  /api/v1/cases/{id}/sub-status`
//! - `POST /api/v1/cases/{id}/submit`
//! - `POST /api/v1/cases/{id}/amendment`
//! - `POST /api/v1/cases/{id}/copy`
//! - `POST /api/v1/cases/{id}/countersignatures`
//! - `POST /api/v1/cases/{id}/finalise`
//! - `POST /api/v1/cases/{id}/rerun-routing`
//! - `GET  /api/v1/cases/{id}/audit`
//! - `GET  /api/v1/licences/{id}`
//! - `PUT  /api/v1/licences/hmrc-integration` (also POST, Hawk-signed)

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use secrecy::ExposeSecret;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use lite_core::config::HmrcConfig;
use lite_core::domain::actor::{Actor, ActorType, Permission};
use lite_core::domain::case::OrganisationId;
use lite_core::domain::status::CaseStatus;
use lite_core::errors::{ApplicationError, DomainError, FieldErrors, InterfaceError};
use lite_core::signing::{HawkCredentials, NonceCache};
use lite_db::DbPool;
use lite_runtime::{
    AmendmentService, FinaliseService, RuntimeSettings, StatusChangeService, Stores, UsageUpdateService,
};

use crate::health::{health, HealthState};
use crate::{cases, licences};

pub const ACTOR_TYPE_HEADER: &str = "x-lite-actor-type";
pub const ACTOR_ID_HEADER: &str = "x-lite-actor-id";
pub const ORGANISATION_HEADER: &str = "x-lite-organisation-id";
pub const PERMISSIONS_HEADER: &str = "x-lite-permissions";
pub const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct ApiState {
    pub stores: Stores,
    pub settings: RuntimeSettings,
    pub status: StatusChangeService,
    pub amendments: AmendmentService,
    pub finalise: FinaliseService,
    pub usage: UsageUpdateService,
    pub hmrc_credentials: Vec<HawkCredentials>,
    pub hawk_skew_secs: i64,
    pub hawk_nonces: Arc<NonceCache>,
}

impl ApiState {
    pub fn new(stores: Stores, settings: RuntimeSettings, hmrc: &HmrcConfig) -> Self {
        Self {
            status: StatusChangeService::new(stores.clone(), settings.clone()),
            amendments: AmendmentService::new(stores.clone(), settings.clone()),
            finalise: FinaliseService::new(stores.clone(), settings.clone()),
            usage: UsageUpdateService::new(stores.clone(), settings.clone()),
            hmrc_credentials: inbound_credentials(hmrc),
            hawk_skew_secs: hmrc.hawk_skew_secs,
            hawk_nonces: Arc::new(NonceCache::for_skew(hmrc.hawk_skew_secs)),
            stores,
            settings,
        }
    }
}

/// A blank inbound key disables the HMRC callback rather than accepting
/// requests signed with an empty key.
fn inbound_credentials(hmrc: &HmrcConfig) -> Vec<HawkCredentials> {
    if hmrc.inbound_key.expose_secret().is_empty() {
        return Vec::new();
    }
    vec![HawkCredentials { id: hmrc.inbound_key_id.clone(), key: hmrc.inbound_key.clone() }]
}

pub fn router(state: ApiState, db_pool: DbPool) -> Router {
    let health_routes = Router::new().route("/health", get(health)).with_state(HealthState { db_pool });
    health_routes.merge(api_routes(state))
}

pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/statuses", get(list_statuses))
        .route("/api/v1/cases/{id}", get(cases::get_case))
        .route("/api/v1/cases/{id}/status", put(cases::change_status))
        .route("/api/v1/cases/{id}/sub-status", put(cases::set_sub_status))
        .route("/api/v1/cases/{id}/submit", post(cases::submit))
        .route("/api/v1/cases/{id}/amendment", post(cases::amend))
        .route("/api/v1/cases/{id}/copy", post(cases::copy))
        .route("/api/v1/cases/{id}/countersignatures", post(cases::countersign))
        .route("/api/v1/cases/{id}/finalise", post(cases::finalise))
        .route("/api/v1/cases/{id}/rerun-routing", post(cases::rerun_routing))
        .route("/api/v1/cases/{id}/audit", get(cases::audit_trail))
        .route("/api/v1/licences/hmrc-integration", put(licences::hmrc_usage_update).post(licences::hmrc_usage_update))
        .route("/api/v1/licences/{id}", get(licences::get_licence))
        .with_state(state)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub detail: String,
    #[serde(skip_serializing_if = "FieldErrors::is_empty")]
    pub errors: FieldErrors,
    pub correlation_id: String,
}

pub type ApiError = (StatusCode, Json<ErrorBody>);
pub type ApiResult<T> = Result<T, ApiError>;

/// Renders a service error. Server-side failures are logged, client errors
/// are returned as-is.
pub fn api_error(error: ApplicationError, correlation_id: &str) -> ApiError {
    let interface = error.into_interface(correlation_id);
    let status = StatusCode::from_u16(interface.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        warn!(
            event_name = "api.request.failed",
            correlation_id = %correlation_id,
            status = status.as_u16(),
            error = %interface,
            "request failed"
        );
    }
    let errors = match &interface {
        InterfaceError::BadRequest { errors, .. } => errors.clone(),
        _ => FieldErrors::new(),
    };
    let detail = match &interface {
        InterfaceError::BadRequest { message, .. }
        | InterfaceError::Forbidden { message, .. }
        | InterfaceError::NotFound { message, .. } => message.clone(),
        _ => interface.user_message().to_owned(),
    };
    (
        status,
        Json(ErrorBody { error: interface.user_message(), detail, errors, correlation_id: interface.correlation_id().to_owned() }),
    )
}

pub fn domain_error(error: DomainError, correlation_id: &str) -> ApiError {
    api_error(error.into(), correlation_id)
}

pub fn correlation_id(headers: &HeaderMap) -> String {
    header(headers, CORRELATION_HEADER).map(str::to_owned).unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok()).map(str::trim).filter(|value| !value.is_empty())
}

/// Reads the acting user from the actor headers. Unknown permission names are
/// ignored.
pub fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, DomainError> {
    let actor_type = header(headers, ACTOR_TYPE_HEADER)
        .ok_or_else(|| DomainError::Forbidden(format!("missing {ACTOR_TYPE_HEADER} header")))?;
    let actor_type = ActorType::parse(actor_type)
        .ok_or_else(|| DomainError::Forbidden(format!("unknown actor type `{actor_type}`")))?;
    if actor_type == ActorType::System {
        return Ok(Actor::system());
    }

    let id = header(headers, ACTOR_ID_HEADER)
        .ok_or_else(|| DomainError::Forbidden(format!("missing {ACTOR_ID_HEADER} header")))?;
    match actor_type {
        ActorType::Exporter => {
            let organisation = header(headers, ORGANISATION_HEADER)
                .ok_or_else(|| DomainError::Forbidden(format!("missing {ORGANISATION_HEADER} header")))?;
            Ok(Actor::exporter(id, OrganisationId(organisation.to_owned())))
        }
        _ => {
            let permissions = header(headers, PERMISSIONS_HEADER)
                .map(|raw| raw.split(',').filter_map(Permission::parse).collect::<Vec<_>>())
                .unwrap_or_default();
            Ok(Actor::caseworker(id, permissions))
        }
    }
}

/// Actor plus correlation id, or the rendered error.
pub fn request_context(headers: &HeaderMap) -> ApiResult<(Actor, String)> {
    let correlation_id = correlation_id(headers);
    let actor = actor_from_headers(headers).map_err(|error| domain_error(error, &correlation_id))?;
    Ok((actor, correlation_id))
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StatusView {
    pub id: String,
    pub key: &'static str,
    pub value: &'static str,
    pub priority: u8,
    pub is_terminal: bool,
    pub is_read_only: bool,
    pub is_caseworker_operable: bool,
}

pub async fn list_statuses(State(state): State<ApiState>) -> Json<Vec<StatusView>> {
    Json(
        CaseStatus::public_catalogue(state.settings.countersign_routing)
            .into_iter()
            .map(|status| StatusView {
                id: status.id(),
                key: status.as_str(),
                value: status.label(),
                priority: status.priority(),
                is_terminal: status.is_terminal(),
                is_read_only: status.is_read_only(),
                is_caseworker_operable: status.is_caseworker_operable(),
            })
            .collect(),
    )
}


#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::extract::State;
    use axum::http::{HeaderMap, HeaderValue, Request, StatusCode};
    use tower::ServiceExt;

    use lite_core::domain::actor::{ActorType, Permission};
    use lite_core::errors::{ApplicationError, DomainError};

    use super::test_support::{caseworker, state};
    use super::{actor_from_headers, api_error, api_routes, list_statuses, ACTOR_TYPE_HEADER};

    #[test]
    fn caseworker_headers_carry_known_permissions() {
        let actor = actor_from_headers(&caseworker("reopen_closed_cases, unknown,manage_team_advice")).expect("actor");

        assert_eq!(actor.actor_type, ActorType::Caseworker);
        assert!(actor.has_permission(Permission::ReopenClosedCases));
        assert!(actor.has_permission(Permission::ManageTeamAdvice));
        assert!(!actor.has_permission(Permission::ManageLicenceFinalAdvice));
    }

    #[test]
    fn exporters_without_an_organisation_are_refused() {
        let mut headers = HeaderMap::new();
        headers.insert(ACTOR_TYPE_HEADER, HeaderValue::from_static("exporter"));
        headers.insert("x-lite-actor-id", HeaderValue::from_static("exporter-1"));

        assert!(matches!(actor_from_headers(&headers), Err(DomainError::Forbidden(_))));
        assert!(matches!(actor_from_headers(&HeaderMap::new()), Err(DomainError::Forbidden(_))));
    }

    #[test]
    fn persistence_errors_render_as_unavailable_without_internals() {
        let (status, body) = api_error(ApplicationError::Persistence("disk I/O error".to_owned()), "corr-1");

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.correlation_id, "corr-1");
        assert!(!body.detail.contains("disk"));
    }

    #[tokio::test]
    async fn status_catalogue_hides_system_statuses() {
        let statuses = list_statuses(State(state())).await.0;

        assert!(statuses.iter().all(|status| status.key != "draft"));
        assert!(statuses.windows(2).all(|pair| pair[0].priority <= pair[1].priority));
        assert!(statuses.iter().all(|status| status.key != "final_review_countersign"));
    }

    #[tokio::test]
    async fn unknown_cases_are_404_over_http() {
        let response = api_routes(state())
            .oneshot(
                Request::builder()
                    .uri("/api/v1/cases/missing")
                    .header("x-lite-actor-type", "caseworker")
                    .header("x-lite-actor-id", "caseworker-1")
                    .header("x-correlation-id", "corr-404")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = to_bytes(response.into_body(), 64 * 1024).await.expect("body");
        let json: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(json["correlation_id"], "corr-404");
    }
}
