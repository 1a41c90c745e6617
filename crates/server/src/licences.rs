use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    Json,
};
use chrono::Utc;
use tracing::warn;

use lite_core::domain::licence::{Licence, LicenceId};
use lite_core::errors::{DomainError, FieldErrors};
use lite_core::licensing::hmrc::{UsageUpdateRequest, UsageUpdateResponse};
use lite_core::signing::{verify, SignedRequest};

use crate::api::{api_error, correlation_id, domain_error, request_context, ApiError, ApiResult, ApiState, ErrorBody};
use crate::cases::ensure_visible;

pub async fn get_licence(
    Path(id): Path<String>,
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Json<Licence>> {
    let (actor, correlation_id) = request_context(&headers)?;
    let persistence = |error| api_error(lite_runtime::persistence(error), &correlation_id);
    let licence = state
        .stores
        .licences
        .find_by_id(&LicenceId(id.clone()))
        .await
        .map_err(persistence)?
        .ok_or_else(|| domain_error(DomainError::not_found("licence", id.as_str()), &correlation_id))?;
    let case = state
        .stores
        .cases
        .find_by_id(&licence.case_id)
        .await
        .map_err(persistence)?
        .ok_or_else(|| domain_error(DomainError::not_found("case", licence.case_id.0.as_str()), &correlation_id))?;
    ensure_visible(&actor, &case, &correlation_id)?;
    Ok(Json(licence))
}

#[derive(Debug, serde::Serialize)]
#[serde(untagged)]
pub enum UsageReply {
    Processed(UsageUpdateResponse),
    AlreadyReported { usage_data_id: String },
}

/// Usage reported by the HMRC integration. `207` once processed, `208` when
/// the report id was seen before.
pub async fn hmrc_usage_update(
    State(state): State<ApiState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<UsageReply>)> {
    let correlation_id = correlation_id(&headers);
    authenticate(&state, &method, &uri, &headers, &body, &correlation_id)?;

    let request: UsageUpdateRequest = serde_json::from_slice(&body).map_err(|error| {
        domain_error(DomainError::field("non_field_errors", format!("malformed usage update: {error}")), &correlation_id)
    })?;
    let usage_data_id = request.usage_data_id.trim().to_owned();
    if !usage_data_id.is_empty()
        && state
            .stores
            .licences
            .usage_data_exists(&usage_data_id)
            .await
            .map_err(|error| api_error(lite_runtime::persistence(error), &correlation_id))?
    {
        return Ok((StatusCode::ALREADY_REPORTED, Json(UsageReply::AlreadyReported { usage_data_id })));
    }

    let response = state.usage.process(request, &correlation_id).await.map_err(|error| api_error(error, &correlation_id))?;
    Ok((StatusCode::MULTI_STATUS, Json(UsageReply::Processed(response))))
}

fn authenticate(
    state: &ApiState,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: &[u8],
    correlation_id: &str,
) -> Result<(), ApiError> {
    let unauthorized = |detail: String| {
        warn!(
            event_name = "hmrc.usage.unauthenticated",
            correlation_id = %correlation_id,
            detail = %detail,
            "rejected hmrc integration request"
        );
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorBody {
                error: "Authentication credentials were not valid.",
                detail,
                errors: FieldErrors::new(),
                correlation_id: correlation_id.to_owned(),
            }),
        )
    };

    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| unauthorized("missing authorization header".to_owned()))?;
    let host = headers.get(header::HOST).and_then(|value| value.to_str().ok()).unwrap_or("localhost");
    let (host, port) = match host.rsplit_once(':') {
        Some((name, port)) => (name, port.parse().unwrap_or(80)),
        None => (host, 80),
    };
    let content_type =
        headers.get(header::CONTENT_TYPE).and_then(|value| value.to_str().ok()).unwrap_or("application/json");
    let path = uri.path_and_query().map_or_else(|| uri.path(), |path| path.as_str());

    verify(
        authorization,
        &state.hmrc_credentials,
        &SignedRequest { method: method.as_str(), path, host, port, content_type, body },
        Utc::now(),
        state.hawk_skew_secs,
        &state.hawk_nonces,
    )
    .map(|_| ())
    .map_err(|error| unauthorized(error.to_string()))
}
