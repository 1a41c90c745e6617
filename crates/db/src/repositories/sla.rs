use std::collections::{BTreeMap, BTreeSet};

use sqlx::Row;

use lite_core::domain::case::CaseId;
use lite_core::sla::QueryWindow;

use super::decode::{parse_optional_timestamp, parse_timestamp, parse_u32};
use super::{RepositoryError, SlaRepository};
use crate::DbPool;

pub struct SqlSlaRepository {
    pool: DbPool,
}

impl SqlSlaRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SlaRepository for SqlSlaRepository {
    async fn list_queries(&self, case_id: &CaseId) -> Result<Vec<QueryWindow>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT created_at, responded_at FROM ecju_query WHERE case_id = ? ORDER BY created_at ASC",
        )
        .bind(&case_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<QueryWindow, RepositoryError> {
                Ok(QueryWindow {
                    created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
                    responded_at: parse_optional_timestamp("responded_at", row.try_get("responded_at")?)?,
                })
            })
            .collect()
    }

    async fn save_query(&self, id: &str, case_id: &CaseId, query: QueryWindow) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO ecju_query (id, case_id, created_at, responded_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET responded_at = excluded.responded_at",
        )
        .bind(id)
        .bind(&case_id.0)
        .bind(query.created_at.to_rfc3339())
        .bind(query.responded_at.map(|value| value.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_queue(&self, queue_id: &str, name: &str, department_id: Option<&str>) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO work_queue (id, name, department_id) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, department_id = excluded.department_id",
        )
        .bind(queue_id)
        .bind(name)
        .bind(department_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn queue_departments(
        &self,
        queue_ids: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, Option<String>>, RepositoryError> {
        let mut departments = BTreeMap::new();
        for queue_id in queue_ids {
            let department = sqlx::query("SELECT department_id FROM work_queue WHERE id = ?")
                .bind(queue_id)
                .fetch_optional(&self.pool)
                .await?
                .map(|row| row.try_get::<Option<String>, _>("department_id"))
                .transpose()?
                .flatten();
            departments.insert(queue_id.clone(), department);
        }
        Ok(departments)
    }

    async fn increment_queue_sla(&self, case_id: &CaseId, queue_id: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO case_queue_sla (case_id, queue_id, sla_days) VALUES (?, ?, 1)
             ON CONFLICT(case_id, queue_id) DO UPDATE SET sla_days = sla_days + 1",
        )
        .bind(&case_id.0)
        .bind(queue_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn increment_department_sla(&self, case_id: &CaseId, department_id: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO case_department_sla (case_id, department_id, sla_days) VALUES (?, ?, 1)
             ON CONFLICT(case_id, department_id) DO UPDATE SET sla_days = sla_days + 1",
        )
        .bind(&case_id.0)
        .bind(department_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn queue_sla_days(&self, case_id: &CaseId, queue_id: &str) -> Result<u32, RepositoryError> {
        let days = sqlx::query("SELECT sla_days FROM case_queue_sla WHERE case_id = ? AND queue_id = ?")
            .bind(&case_id.0)
            .bind(queue_id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row.try_get::<i64, _>("sla_days"))
            .transpose()?
            .unwrap_or(0);
        parse_u32("sla_days", days)
    }

    async fn department_sla_days(&self, case_id: &CaseId, department_id: &str) -> Result<u32, RepositoryError> {
        let days = sqlx::query("SELECT sla_days FROM case_department_sla WHERE case_id = ? AND department_id = ?")
            .bind(&case_id.0)
            .bind(department_id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row.try_get::<i64, _>("sla_days"))
            .transpose()?
            .unwrap_or(0);
        parse_u32("sla_days", days)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{Duration, Utc};

    use lite_core::sla::QueryWindow;

    use super::SqlSlaRepository;
    use crate::repositories::case::SqlCaseRepository;
    use crate::repositories::test_support::{sample_case, setup_pool};
    use crate::repositories::{CaseRepository, SlaRepository};

    #[tokio::test]
    async fn counters_start_at_zero_and_increment() {
        let pool = setup_pool().await;
        let case = sample_case("case-1");
        SqlCaseRepository::new(pool.clone()).save(case.clone()).await.expect("save case");
        let repo = SqlSlaRepository::new(pool);

        assert_eq!(repo.queue_sla_days(&case.id, "queue-a").await.expect("initial"), 0);
        repo.increment_queue_sla(&case.id, "queue-a").await.expect("first");
        repo.increment_queue_sla(&case.id, "queue-a").await.expect("second");
        repo.increment_department_sla(&case.id, "dept-1").await.expect("department");

        assert_eq!(repo.queue_sla_days(&case.id, "queue-a").await.expect("queue"), 2);
        assert_eq!(repo.department_sla_days(&case.id, "dept-1").await.expect("department"), 1);
    }

    #[tokio::test]
    async fn queue_departments_cover_unknown_queues() {
        let repo = SqlSlaRepository::new(setup_pool().await);
        repo.save_queue("queue-a", "Licensing Unit", Some("dept-1")).await.expect("save queue");
        repo.save_queue("queue-b", "Enforcement", None).await.expect("save queue");

        let requested = BTreeSet::from(["queue-a".to_owned(), "queue-b".to_owned(), "queue-x".to_owned()]);
        let departments = repo.queue_departments(&requested).await.expect("departments");

        assert_eq!(departments.get("queue-a"), Some(&Some("dept-1".to_owned())));
        assert_eq!(departments.get("queue-b"), Some(&None));
        assert_eq!(departments.get("queue-x"), Some(&None));
    }

    #[tokio::test]
    async fn queries_are_listed_per_case() {
        let pool = setup_pool().await;
        let case = sample_case("case-1");
        SqlCaseRepository::new(pool.clone()).save(case.clone()).await.expect("save case");
        let repo = SqlSlaRepository::new(pool);
        let raised = Utc::now() - Duration::days(2);
        let query = QueryWindow { created_at: raised, responded_at: Some(raised + Duration::hours(5)) };

        repo.save_query("query-1", &case.id, query.clone()).await.expect("save query");

        assert_eq!(repo.list_queries(&case.id).await.expect("list"), vec![query]);
    }
}
