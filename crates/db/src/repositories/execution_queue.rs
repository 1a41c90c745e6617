use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use lite_core::domain::case::CaseId;
use lite_core::domain::execution::{
    ExecutionTask, ExecutionTaskId, ExecutionTaskState, ExecutionTransitionEvent, ExecutionTransitionId,
    OperationKey,
};

use super::decode::{parse_optional_timestamp, parse_timestamp, parse_u32};
use super::{ExecutionQueueRepository, RepositoryError};
use crate::DbPool;

const TASK_COLUMNS: &str = "id, case_id, operation_kind, payload_json, payload_hash, operation_key, state,
    retry_count, max_retries, reschedule_count, available_at, claimed_by, claimed_at, last_error,
    result_fingerprint, correlation_id, state_version, created_at, updated_at";

pub struct SqlExecutionQueueRepository {
    pool: DbPool,
}

impl SqlExecutionQueueRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn tasks_in_states(&self, states: &[ExecutionTaskState]) -> Result<Vec<ExecutionTask>, RepositoryError> {
        let placeholders = vec!["?"; states.len()].join(", ");
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM execution_queue_task
             WHERE state IN ({placeholders})
             ORDER BY available_at ASC, created_at ASC"
        );
        let mut query = sqlx::query(&sql);
        for state in states {
            query = query.bind(state.as_str());
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(task_from_row).collect()
    }
}

#[async_trait::async_trait]
impl ExecutionQueueRepository for SqlExecutionQueueRepository {
    async fn find_task_by_id(&self, id: &ExecutionTaskId) -> Result<Option<ExecutionTask>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM execution_queue_task WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(task_from_row).transpose()
    }

    async fn list_tasks_for_case(
        &self,
        case_id: &CaseId,
        state: Option<ExecutionTaskState>,
    ) -> Result<Vec<ExecutionTask>, RepositoryError> {
        let rows = if let Some(state) = state {
            sqlx::query(&format!(
                "SELECT {TASK_COLUMNS} FROM execution_queue_task
                 WHERE case_id = ? AND state = ?
                 ORDER BY available_at ASC, created_at ASC"
            ))
            .bind(&case_id.0)
            .bind(state.as_str())
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "SELECT {TASK_COLUMNS} FROM execution_queue_task
                 WHERE case_id = ?
                 ORDER BY available_at ASC, created_at ASC"
            ))
            .bind(&case_id.0)
            .fetch_all(&self.pool)
            .await?
        };

        rows.into_iter().map(task_from_row).collect()
    }

    async fn find_unfinished_by_key(&self, key: &OperationKey) -> Result<Option<ExecutionTask>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM execution_queue_task
             WHERE operation_key = ? AND state IN ('queued', 'running', 'retryable_failed')
             ORDER BY created_at DESC
             LIMIT 1"
        ))
        .bind(&key.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(task_from_row).transpose()
    }

    async fn list_due(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<ExecutionTask>, RepositoryError> {
        let tasks =
            self.tasks_in_states(&[ExecutionTaskState::Queued, ExecutionTaskState::RetryableFailed]).await?;
        Ok(tasks.into_iter().filter(|task| task.available_at <= now).take(limit as usize).collect())
    }

    async fn list_running(&self) -> Result<Vec<ExecutionTask>, RepositoryError> {
        self.tasks_in_states(&[ExecutionTaskState::Running]).await
    }

    async fn save_task(&self, task: ExecutionTask) -> Result<(), RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        upsert_task(&mut conn, &task).await
    }

    async fn append_transition(&self, transition: ExecutionTransitionEvent) -> Result<(), RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        insert_transition(&mut conn, &transition).await
    }

    async fn list_transitions_for_task(
        &self,
        task_id: &ExecutionTaskId,
    ) -> Result<Vec<ExecutionTransitionEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, task_id, case_id, from_state, to_state, transition_reason, error_class,
                    decision_context_json, actor_type, actor_id, operation_key, correlation_id,
                    state_version, occurred_at
             FROM execution_queue_transition_audit
             WHERE task_id = ?
             ORDER BY state_version ASC, occurred_at ASC",
        )
        .bind(&task_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(transition_from_row).collect()
    }
}

pub(crate) async fn upsert_task(conn: &mut SqliteConnection, task: &ExecutionTask) -> Result<(), RepositoryError> {
    sqlx::query(&format!(
        "INSERT INTO execution_queue_task ({TASK_COLUMNS})
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            case_id = excluded.case_id,
            operation_kind = excluded.operation_kind,
            payload_json = excluded.payload_json,
            payload_hash = excluded.payload_hash,
            operation_key = excluded.operation_key,
            state = excluded.state,
            retry_count = excluded.retry_count,
            max_retries = excluded.max_retries,
            reschedule_count = excluded.reschedule_count,
            available_at = excluded.available_at,
            claimed_by = excluded.claimed_by,
            claimed_at = excluded.claimed_at,
            last_error = excluded.last_error,
            result_fingerprint = excluded.result_fingerprint,
            correlation_id = excluded.correlation_id,
            state_version = excluded.state_version,
            updated_at = excluded.updated_at"
    ))
    .bind(&task.id.0)
    .bind(&task.case_id.0)
    .bind(&task.operation_kind)
    .bind(&task.payload_json)
    .bind(&task.payload_hash)
    .bind(&task.operation_key.0)
    .bind(task.state.as_str())
    .bind(i64::from(task.retry_count))
    .bind(i64::from(task.max_retries))
    .bind(i64::from(task.reschedule_count))
    .bind(task.available_at.to_rfc3339())
    .bind(task.claimed_by.as_deref())
    .bind(task.claimed_at.map(|value| value.to_rfc3339()))
    .bind(task.last_error.as_deref())
    .bind(task.result_fingerprint.as_deref())
    .bind(&task.correlation_id)
    .bind(i64::from(task.state_version))
    .bind(task.created_at.to_rfc3339())
    .bind(task.updated_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub(crate) async fn insert_transition(
    conn: &mut SqliteConnection,
    transition: &ExecutionTransitionEvent,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO execution_queue_transition_audit (
            id, task_id, case_id, from_state, to_state, transition_reason, error_class,
            decision_context_json, actor_type, actor_id, operation_key, correlation_id,
            state_version, occurred_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&transition.id.0)
    .bind(&transition.task_id.0)
    .bind(&transition.case_id.0)
    .bind(transition.from_state.as_ref().map(ExecutionTaskState::as_str))
    .bind(transition.to_state.as_str())
    .bind(&transition.transition_reason)
    .bind(transition.error_class.as_deref())
    .bind(&transition.decision_context_json)
    .bind(&transition.actor_type)
    .bind(&transition.actor_id)
    .bind(&transition.operation_key.0)
    .bind(&transition.correlation_id)
    .bind(i64::from(transition.state_version))
    .bind(transition.occurred_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

fn parse_state(column: &str, value: String) -> Result<ExecutionTaskState, RepositoryError> {
    ExecutionTaskState::parse(&value)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown execution task state in `{column}`: `{value}`")))
}

fn task_from_row(row: SqliteRow) -> Result<ExecutionTask, RepositoryError> {
    Ok(ExecutionTask {
        id: ExecutionTaskId(row.try_get("id")?),
        case_id: CaseId(row.try_get("case_id")?),
        operation_kind: row.try_get("operation_kind")?,
        payload_json: row.try_get("payload_json")?,
        payload_hash: row.try_get("payload_hash")?,
        operation_key: OperationKey(row.try_get("operation_key")?),
        state: parse_state("state", row.try_get("state")?)?,
        retry_count: parse_u32("retry_count", row.try_get("retry_count")?)?,
        max_retries: parse_u32("max_retries", row.try_get("max_retries")?)?,
        reschedule_count: parse_u32("reschedule_count", row.try_get("reschedule_count")?)?,
        available_at: parse_timestamp("available_at", row.try_get("available_at")?)?,
        claimed_by: row.try_get("claimed_by")?,
        claimed_at: parse_optional_timestamp("claimed_at", row.try_get("claimed_at")?)?,
        last_error: row.try_get("last_error")?,
        result_fingerprint: row.try_get("result_fingerprint")?,
        correlation_id: row.try_get("correlation_id")?,
        state_version: parse_u32("state_version", row.try_get("state_version")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn transition_from_row(row: SqliteRow) -> Result<ExecutionTransitionEvent, RepositoryError> {
    Ok(ExecutionTransitionEvent {
        id: ExecutionTransitionId(row.try_get("id")?),
        task_id: ExecutionTaskId(row.try_get("task_id")?),
        case_id: CaseId(row.try_get("case_id")?),
        from_state: row
            .try_get::<Option<String>, _>("from_state")?
            .map(|value| parse_state("from_state", value))
            .transpose()?,
        to_state: parse_state("to_state", row.try_get("to_state")?)?,
        transition_reason: row.try_get("transition_reason")?,
        error_class: row.try_get("error_class")?,
        decision_context_json: row.try_get("decision_context_json")?,
        actor_type: row.try_get("actor_type")?,
        actor_id: row.try_get("actor_id")?,
        operation_key: OperationKey(row.try_get("operation_key")?),
        correlation_id: row.try_get("correlation_id")?,
        state_version: parse_u32("state_version", row.try_get("state_version")?)?,
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
    })
}
