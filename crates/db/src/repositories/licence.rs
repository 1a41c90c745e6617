use std::collections::BTreeMap;

use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use lite_core::audit::{AuditContext, InMemoryAuditSink};
use lite_core::domain::case::CaseId;
use lite_core::domain::licence::{Licence, LicenceDecision, LicenceDecisionType, LicenceId, LicenceStatus};
use lite_core::licensing::hmrc::{apply_usage_reports, UsageTarget};

use super::audit::insert_event;
use super::decode::{parse_date, parse_enum, parse_json, parse_optional_timestamp, parse_timestamp, parse_u32, to_json};
use super::{LicenceRepository, RepositoryError, UsageCommit, UsageCommitted};
use crate::DbPool;

const LICENCE_COLUMNS: &str = "id, case_id, reference_code, status, start_date, duration_months, end_date,
    hmrc_integration_sent_at, goods_json, created_at, updated_at";

pub struct SqlLicenceRepository {
    pool: DbPool,
}

impl SqlLicenceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl LicenceRepository for SqlLicenceRepository {
    async fn find_by_id(&self, id: &LicenceId) -> Result<Option<Licence>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {LICENCE_COLUMNS} FROM licence WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(licence_from_row).transpose()
    }

    async fn list_for_case(&self, case_id: &CaseId) -> Result<Vec<Licence>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {LICENCE_COLUMNS} FROM licence WHERE case_id = ? ORDER BY created_at ASC"
        ))
        .bind(&case_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(licence_from_row).collect()
    }

    async fn list_open(&self) -> Result<Vec<Licence>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {LICENCE_COLUMNS} FROM licence
             WHERE status IN ('issued', 'reinstated')
             ORDER BY end_date ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(licence_from_row).collect()
    }

    async fn save(&self, licence: Licence) -> Result<(), RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        upsert_licence(&mut conn, &licence).await
    }

    async fn save_decision(&self, decision: LicenceDecision) -> Result<(), RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        upsert_decision(&mut conn, &decision).await
    }

    async fn last_decision(&self, case_id: &CaseId) -> Result<Option<LicenceDecision>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, case_id, decision, licence_id, previous_decision_id, created_at
             FROM licence_decision
             WHERE case_id = ?
             ORDER BY created_at DESC, rowid DESC
             LIMIT 1",
        )
        .bind(&case_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(decision_from_row).transpose()
    }

    async fn usage_data_exists(&self, usage_data_id: &str) -> Result<bool, RepositoryError> {
        let count = sqlx::query("SELECT COUNT(*) AS count FROM hmrc_usage_data WHERE usage_data_id = ?")
            .bind(usage_data_id)
            .fetch_one(&self.pool)
            .await?
            .try_get::<i64, _>("count")?;
        Ok(count > 0)
    }

    async fn commit_usage_update(&self, commit: UsageCommit) -> Result<UsageCommitted, RepositoryError> {
        let licence_ids: Vec<&str> = commit.reports.iter().map(|accepted| accepted.report.id.as_str()).collect();
        // Take the write lock up front so no other writer reads the same usage.
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let inserted = sqlx::query(
            "INSERT INTO hmrc_usage_data (usage_data_id, licence_ids_json, received_at)
             VALUES (?, ?, ?)
             ON CONFLICT(usage_data_id) DO NOTHING",
        )
        .bind(&commit.usage_data_id)
        .bind(to_json("licence_ids_json", &licence_ids)?)
        .bind(commit.received_at.to_rfc3339())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await?;
            return Err(RepositoryError::Conflict(format!(
                "usage data `{}` has already been processed",
                commit.usage_data_id
            )));
        }

        let mut targets = BTreeMap::new();
        for accepted in &commit.reports {
            if targets.contains_key(&accepted.report.id) {
                continue;
            }
            let row = sqlx::query(&format!("SELECT {LICENCE_COLUMNS} FROM licence WHERE id = ?"))
                .bind(&accepted.report.id)
                .fetch_optional(&mut *tx)
                .await?;
            if let Some(licence) = row.map(licence_from_row).transpose()? {
                targets.insert(accepted.report.id.clone(), UsageTarget { licence, case_type: accepted.case_type });
            }
        }

        let sink = InMemoryAuditSink::default();
        let notify = apply_usage_reports(
            &mut targets,
            commit.reports.iter().map(|accepted| &accepted.report),
            commit.received_at,
            &sink,
            &AuditContext::system(commit.correlation_id.clone()),
        );
        let licences: Vec<Licence> = targets.into_values().map(|target| target.licence).collect();

        for licence in &licences {
            upsert_licence(&mut tx, licence).await?;
        }
        for event in &sink.drain() {
            insert_event(&mut tx, event).await?;
        }

        tx.commit().await?;
        Ok(UsageCommitted { licences, notify })
    }
}

pub(crate) async fn upsert_licence(conn: &mut SqliteConnection, licence: &Licence) -> Result<(), RepositoryError> {
    sqlx::query(&format!(
        "INSERT INTO licence ({LICENCE_COLUMNS})
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            reference_code = excluded.reference_code,
            status = excluded.status,
            start_date = excluded.start_date,
            duration_months = excluded.duration_months,
            end_date = excluded.end_date,
            hmrc_integration_sent_at = excluded.hmrc_integration_sent_at,
            goods_json = excluded.goods_json,
            updated_at = excluded.updated_at"
    ))
    .bind(&licence.id.0)
    .bind(&licence.case_id.0)
    .bind(&licence.reference_code)
    .bind(licence.status.as_str())
    .bind(licence.start_date.format("%Y-%m-%d").to_string())
    .bind(i64::from(licence.duration_months))
    .bind(licence.end_date.format("%Y-%m-%d").to_string())
    .bind(licence.hmrc_integration_sent_at.map(|value| value.to_rfc3339()))
    .bind(to_json("goods_json", &licence.goods)?)
    .bind(licence.created_at.to_rfc3339())
    .bind(licence.updated_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub(crate) async fn upsert_decision(
    conn: &mut SqliteConnection,
    decision: &LicenceDecision,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO licence_decision (id, case_id, decision, licence_id, previous_decision_id, created_at)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            decision = excluded.decision,
            licence_id = excluded.licence_id,
            previous_decision_id = excluded.previous_decision_id",
    )
    .bind(&decision.id)
    .bind(&decision.case_id.0)
    .bind(decision.decision.as_str())
    .bind(decision.licence_id.as_ref().map(|id| id.0.as_str()))
    .bind(decision.previous_decision_id.as_deref())
    .bind(decision.created_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

fn licence_from_row(row: SqliteRow) -> Result<Licence, RepositoryError> {
    Ok(Licence {
        id: LicenceId(row.try_get("id")?),
        case_id: CaseId(row.try_get("case_id")?),
        reference_code: row.try_get("reference_code")?,
        status: parse_enum("status", row.try_get("status")?, LicenceStatus::parse)?,
        start_date: parse_date("start_date", row.try_get("start_date")?)?,
        duration_months: parse_u32("duration_months", row.try_get("duration_months")?)?,
        end_date: parse_date("end_date", row.try_get("end_date")?)?,
        hmrc_integration_sent_at: parse_optional_timestamp(
            "hmrc_integration_sent_at",
            row.try_get("hmrc_integration_sent_at")?,
        )?,
        goods: parse_json("goods_json", row.try_get("goods_json")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn decision_from_row(row: SqliteRow) -> Result<LicenceDecision, RepositoryError> {
    Ok(LicenceDecision {
        id: row.try_get("id")?,
        case_id: CaseId(row.try_get("case_id")?),
        decision: parse_enum("decision", row.try_get("decision")?, LicenceDecisionType::parse)?,
        licence_id: row.try_get::<Option<String>, _>("licence_id")?.map(LicenceId),
        previous_decision_id: row.try_get("previous_decision_id")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
