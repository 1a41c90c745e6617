use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use lite_core::audit::{AuditEvent, AuditOutcome, AuditVerb};
use lite_core::domain::actor::ActorType;
use lite_core::domain::case::CaseId;

use super::decode::{parse_enum, parse_json, parse_timestamp, to_json};
use super::{AuditRepository, RepositoryError};
use crate::DbPool;

pub struct SqlAuditRepository {
    pool: DbPool,
}

impl SqlAuditRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AuditRepository for SqlAuditRepository {
    async fn append(&self, events: Vec<AuditEvent>) -> Result<(), RepositoryError> {
        if events.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for event in &events {
            insert_event(&mut tx, event).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_for_case(&self, case_id: &CaseId) -> Result<Vec<AuditEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT event_id, case_id, correlation_id, verb, actor_id, actor_type, outcome, payload_json, occurred_at
             FROM audit_event
             WHERE case_id = ?
             ORDER BY occurred_at ASC, rowid ASC",
        )
        .bind(&case_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(event_from_row).collect()
    }
}

/// Shared with repositories that write audit rows inside their own transaction.
pub(crate) async fn insert_event(conn: &mut SqliteConnection, event: &AuditEvent) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO audit_event (
            event_id, case_id, correlation_id, verb, actor_id, actor_type, outcome, payload_json, occurred_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&event.event_id)
    .bind(&event.case_id.0)
    .bind(&event.correlation_id)
    .bind(event.verb.as_str())
    .bind(&event.actor_id)
    .bind(event.actor_type.as_str())
    .bind(event.outcome.as_str())
    .bind(to_json("payload_json", &event.payload)?)
    .bind(event.occurred_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn event_from_row(row: SqliteRow) -> Result<AuditEvent, RepositoryError> {
    Ok(AuditEvent {
        event_id: row.try_get("event_id")?,
        case_id: CaseId(row.try_get("case_id")?),
        correlation_id: row.try_get("correlation_id")?,
        verb: parse_enum("verb", row.try_get("verb")?, AuditVerb::parse)?,
        actor_id: row.try_get("actor_id")?,
        actor_type: parse_enum("actor_type", row.try_get("actor_type")?, ActorType::parse)?,
        outcome: parse_enum("outcome", row.try_get("outcome")?, AuditOutcome::parse)?,
        payload: parse_json("payload_json", row.try_get("payload_json")?)?,
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
    })
}
