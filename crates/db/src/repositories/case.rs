use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use lite_core::domain::case::{Case, CaseId, CaseTypeReference, ExportType, OrganisationId};
use lite_core::domain::status::{CaseStatus, SubStatus};

use super::decode::{
    parse_enum, parse_json, parse_optional_i32, parse_optional_timestamp, parse_optional_u32, parse_timestamp,
    parse_u32, to_json,
};
use super::{CaseRepository, ReferenceCodeRepository, RepositoryError};
use crate::DbPool;

const CASE_COLUMNS: &str = "id, case_type, organisation_id, organisation_name, name, status, sub_status,
    reference_code, export_type, case_officer, queues_json, assignments_json, flags_json, goods_json,
    parties_json, sites_json, licence_duration_months, copy_of, amendment_of, submitted_at, last_closed_at,
    sla_days, sla_remaining_days, sla_updated_at, created_at, updated_at";

pub struct SqlCaseRepository {
    pool: DbPool,
}

impl SqlCaseRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CaseRepository for SqlCaseRepository {
    async fn find_by_id(&self, id: &CaseId) -> Result<Option<Case>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {CASE_COLUMNS} FROM case_record WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(case_from_row).transpose()
    }

    async fn save(&self, case: Case) -> Result<(), RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        upsert_case(&mut conn, &case).await
    }

    async fn list_open(&self) -> Result<Vec<Case>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {CASE_COLUMNS} FROM case_record WHERE status != 'draft' ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        let cases = rows.into_iter().map(case_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(cases.into_iter().filter(|case| !case.status.is_terminal()).collect())
    }

    async fn list_amendments_of(&self, id: &CaseId) -> Result<Vec<Case>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {CASE_COLUMNS} FROM case_record WHERE amendment_of = ? ORDER BY created_at ASC"
        ))
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(case_from_row).collect()
    }
}

/// Per-year case reference counter.
pub struct SqlReferenceCodeRepository {
    pool: DbPool,
}

impl SqlReferenceCodeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ReferenceCodeRepository for SqlReferenceCodeRepository {
    async fn next_number(&self, year: i32) -> Result<u64, RepositoryError> {
        let row = sqlx::query(
            "INSERT INTO case_reference_counter (year, last_number) VALUES (?, 1)
             ON CONFLICT(year) DO UPDATE SET last_number = last_number + 1
             RETURNING last_number",
        )
        .bind(i64::from(year))
        .fetch_one(&self.pool)
        .await?;

        let value = row.try_get::<i64, _>("last_number")?;
        u64::try_from(value)
            .map_err(|_| RepositoryError::Decode(format!("invalid reference counter value {value}")))
    }
}

pub(crate) async fn upsert_case(conn: &mut SqliteConnection, case: &Case) -> Result<(), RepositoryError> {
    sqlx::query(&format!(
        "INSERT INTO case_record ({CASE_COLUMNS})
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            case_type = excluded.case_type,
            organisation_id = excluded.organisation_id,
            organisation_name = excluded.organisation_name,
            name = excluded.name,
            status = excluded.status,
            sub_status = excluded.sub_status,
            reference_code = excluded.reference_code,
            export_type = excluded.export_type,
            case_officer = excluded.case_officer,
            queues_json = excluded.queues_json,
            assignments_json = excluded.assignments_json,
            flags_json = excluded.flags_json,
            goods_json = excluded.goods_json,
            parties_json = excluded.parties_json,
            sites_json = excluded.sites_json,
            licence_duration_months = excluded.licence_duration_months,
            copy_of = excluded.copy_of,
            amendment_of = excluded.amendment_of,
            submitted_at = excluded.submitted_at,
            last_closed_at = excluded.last_closed_at,
            sla_days = excluded.sla_days,
            sla_remaining_days = excluded.sla_remaining_days,
            sla_updated_at = excluded.sla_updated_at,
            updated_at = excluded.updated_at"
    ))
    .bind(&case.id.0)
    .bind(case.case_type.as_str())
    .bind(&case.organisation_id.0)
    .bind(&case.organisation_name)
    .bind(&case.name)
    .bind(case.status.as_str())
    .bind(case.sub_status.map(|sub_status| sub_status.as_str()))
    .bind(case.reference_code.as_deref())
    .bind(case.export_type.map(|export_type| export_type.as_str()))
    .bind(case.case_officer.as_deref())
    .bind(to_json("queues_json", &case.queues)?)
    .bind(to_json("assignments_json", &case.assignments)?)
    .bind(to_json("flags_json", &case.flags)?)
    .bind(to_json("goods_json", &case.goods)?)
    .bind(to_json("parties_json", &case.parties)?)
    .bind(to_json("sites_json", &case.sites)?)
    .bind(case.licence_duration_months.map(i64::from))
    .bind(case.copy_of.as_ref().map(|id| id.0.as_str()))
    .bind(case.amendment_of.as_ref().map(|id| id.0.as_str()))
    .bind(case.submitted_at.map(|value| value.to_rfc3339()))
    .bind(case.last_closed_at.map(|value| value.to_rfc3339()))
    .bind(i64::from(case.sla_days))
    .bind(case.sla_remaining_days.map(i64::from))
    .bind(case.sla_updated_at.map(|value| value.to_rfc3339()))
    .bind(case.created_at.to_rfc3339())
    .bind(case.updated_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

fn case_from_row(row: SqliteRow) -> Result<Case, RepositoryError> {
    Ok(Case {
        id: CaseId(row.try_get("id")?),
        case_type: parse_enum("case_type", row.try_get("case_type")?, CaseTypeReference::parse)?,
        organisation_id: OrganisationId(row.try_get("organisation_id")?),
        organisation_name: row.try_get("organisation_name")?,
        name: row.try_get("name")?,
        status: parse_enum("status", row.try_get("status")?, CaseStatus::parse)?,
        sub_status: row
            .try_get::<Option<String>, _>("sub_status")?
            .map(|value| parse_enum("sub_status", value, SubStatus::parse))
            .transpose()?,
        reference_code: row.try_get("reference_code")?,
        export_type: row
            .try_get::<Option<String>, _>("export_type")?
            .map(|value| parse_enum("export_type", value, ExportType::parse))
            .transpose()?,
        case_officer: row.try_get("case_officer")?,
        queues: parse_json("queues_json", row.try_get("queues_json")?)?,
        assignments: parse_json("assignments_json", row.try_get("assignments_json")?)?,
        flags: parse_json("flags_json", row.try_get("flags_json")?)?,
        goods: parse_json("goods_json", row.try_get("goods_json")?)?,
        parties: parse_json("parties_json", row.try_get("parties_json")?)?,
        sites: parse_json("sites_json", row.try_get("sites_json")?)?,
        licence_duration_months: parse_optional_u32(
            "licence_duration_months",
            row.try_get("licence_duration_months")?,
        )?,
        copy_of: row.try_get::<Option<String>, _>("copy_of")?.map(CaseId),
        amendment_of: row.try_get::<Option<String>, _>("amendment_of")?.map(CaseId),
        submitted_at: parse_optional_timestamp("submitted_at", row.try_get("submitted_at")?)?,
        last_closed_at: parse_optional_timestamp("last_closed_at", row.try_get("last_closed_at")?)?,
        sla_days: parse_u32("sla_days", row.try_get("sla_days")?)?,
        sla_remaining_days: parse_optional_i32("sla_remaining_days", row.try_get("sla_remaining_days")?)?,
        sla_updated_at: parse_optional_timestamp("sla_updated_at", row.try_get("sla_updated_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
