use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use lite_core::domain::case::CaseId;
use lite_core::domain::notification::{Notification, NotificationKind};

use super::decode::{parse_enum, parse_json, parse_timestamp, to_json};
use super::{NotificationRepository, RepositoryError};
use crate::DbPool;

/// Notification outbox. Delivery itself happens outside this crate.
pub struct SqlNotificationRepository {
    pool: DbPool,
}

impl SqlNotificationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl NotificationRepository for SqlNotificationRepository {
    async fn enqueue(&self, notifications: Vec<Notification>) -> Result<(), RepositoryError> {
        if notifications.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for notification in &notifications {
            insert_notification(&mut tx, notification).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_pending(&self, limit: u32) -> Result<Vec<Notification>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, case_id, kind, recipient, payload_json, created_at
             FROM notification_outbox
             WHERE sent_at IS NULL
             ORDER BY created_at ASC
             LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(notification_from_row).collect()
    }

    async fn mark_sent(&self, id: &str, sent_at: DateTime<Utc>) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE notification_outbox SET sent_at = ? WHERE id = ?")
            .bind(sent_at.to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

pub(crate) async fn insert_notification(
    conn: &mut SqliteConnection,
    notification: &Notification,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO notification_outbox (id, case_id, kind, recipient, payload_json, created_at)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO NOTHING",
    )
    .bind(&notification.id)
    .bind(&notification.case_id.0)
    .bind(notification.kind.as_str())
    .bind(&notification.recipient)
    .bind(to_json("payload_json", &notification.payload)?)
    .bind(notification.created_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

fn notification_from_row(row: SqliteRow) -> Result<Notification, RepositoryError> {
    Ok(Notification {
        id: row.try_get("id")?,
        case_id: CaseId(row.try_get("case_id")?),
        kind: parse_enum("kind", row.try_get("kind")?, NotificationKind::parse)?,
        recipient: row.try_get("recipient")?,
        payload: parse_json("payload_json", row.try_get("payload_json")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use lite_core::domain::case::CaseId;
    use lite_core::domain::notification::{Notification, NotificationKind};

    use super::SqlNotificationRepository;
    use crate::repositories::test_support::setup_pool;
    use crate::repositories::NotificationRepository;

    #[tokio::test]
    async fn sent_notifications_leave_the_pending_list() {
        let repo = SqlNotificationRepository::new(setup_pool().await);
        let editing = Notification::new(
            CaseId("case-1".to_owned()),
            NotificationKind::ApplicantEditing,
            "org-1",
            serde_json::json!({"case_reference": "GBSIEL/2026/0000001/P"}),
        );
        let issued = Notification::new(
            CaseId("case-1".to_owned()),
            NotificationKind::LicenceIssued,
            "org-1",
            serde_json::json!({"licence_reference": "GBSIEL/2026/0000001/P"}),
        );

        repo.enqueue(vec![editing.clone(), issued.clone()]).await.expect("enqueue");
        assert_eq!(repo.list_pending(10).await.expect("pending").len(), 2);

        repo.mark_sent(&editing.id, Utc::now()).await.expect("mark sent");
        let pending = repo.list_pending(10).await.expect("pending");
        assert_eq!(pending, vec![issued]);
    }
}
