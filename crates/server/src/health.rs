use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use lite_db::{migrations, DbPool};
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    pub db_pool: DbPool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

impl HealthCheck {
    fn ready(detail: impl Into<String>) -> Self {
        Self { status: "ready", detail: detail.into() }
    }

    fn degraded(detail: impl Into<String>) -> Self {
        Self { status: "degraded", detail: detail.into() }
    }
}

/// Licence updates waiting for HMRC and those that gave up. Informational:
/// a backlog never makes the service unready.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryBacklog {
    pub pending: i64,
    pub failed: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: HealthCheck,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hmrc_delivery: Option<DeliveryBacklog>,
    pub checked_at: String,
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = match migrations::applied_count(&state.db_pool).await {
        Ok(applied) => HealthCheck::ready(format!("{applied} migrations applied")),
        Err(error) => HealthCheck::degraded(format!("database query failed: {error}")),
    };
    let ready = database.status == "ready";
    let hmrc_delivery = if ready { delivery_backlog(&state.db_pool).await } else { None };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    let payload = HealthResponse {
        status: database.status,
        database,
        hmrc_delivery,
        checked_at: Utc::now().to_rfc3339(),
    };
    (status_code, Json(payload))
}

async fn delivery_backlog(pool: &DbPool) -> Option<DeliveryBacklog> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT state, COUNT(*) FROM execution_queue_task GROUP BY state").fetch_all(pool).await.ok()?;

    Some(rows.into_iter().fold(DeliveryBacklog::default(), |mut backlog, (state, count)| {
        match state.as_str() {
            "queued" | "running" | "retryable_failed" => backlog.pending += count,
            "failed_terminal" => backlog.failed += count,
            _ => {}
        }
        backlog
    }))
}

#[cfg(test)]
mod tests {
    use axum::{extract::State, http::StatusCode, Json};
    use lite_db::{connect_with_settings, migrations};

    use crate::health::{health, DeliveryBacklog, HealthState};

    #[tokio::test]
    async fn ready_once_migrations_ran() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let (status, Json(payload)) = health(State(HealthState { db_pool: pool.clone() })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.database.detail, "1 migrations applied");
        assert_eq!(payload.hmrc_delivery, Some(DeliveryBacklog::default()));

        pool.close().await;
    }

    #[tokio::test]
    async fn unmigrated_database_reports_degraded() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");

        let (status, Json(payload)) = health(State(HealthState { db_pool: pool.clone() })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert!(payload.hmrc_delivery.is_none());

        pool.close().await;
    }

    #[tokio::test]
    async fn closed_pool_reports_degraded() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        pool.close().await;

        let (status, Json(payload)) = health(State(HealthState { db_pool: pool })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.database.status, "degraded");
    }
}
