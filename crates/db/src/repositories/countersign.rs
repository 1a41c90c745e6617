use sqlx::{sqlite::SqliteRow, Row};

use lite_core::domain::advice::{CountersignAdvice, CountersignOrder};
use lite_core::domain::case::CaseId;

use super::decode::parse_timestamp;
use super::{CountersignRepository, RepositoryError};
use crate::DbPool;

pub struct SqlCountersignRepository {
    pool: DbPool,
}

impl SqlCountersignRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CountersignRepository for SqlCountersignRepository {
    async fn list_for_case(&self, case_id: &CaseId) -> Result<Vec<CountersignAdvice>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, case_id, advice_id, countersign_order, outcome_accepted, reasons, countersigned_user,
                    valid, created_at
             FROM countersign_advice
             WHERE case_id = ?
             ORDER BY countersign_order ASC, created_at ASC",
        )
        .bind(&case_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(countersign_from_row).collect()
    }

    async fn save(&self, countersignature: CountersignAdvice) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO countersign_advice (
                id, case_id, advice_id, countersign_order, outcome_accepted, reasons, countersigned_user,
                valid, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                outcome_accepted = excluded.outcome_accepted,
                reasons = excluded.reasons,
                valid = excluded.valid",
        )
        .bind(&countersignature.id)
        .bind(&countersignature.case_id.0)
        .bind(&countersignature.advice_id)
        .bind(i64::from(countersignature.order.as_u8()))
        .bind(countersignature.outcome_accepted)
        .bind(&countersignature.reasons)
        .bind(&countersignature.countersigned_user)
        .bind(countersignature.valid)
        .bind(countersignature.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn countersign_from_row(row: SqliteRow) -> Result<CountersignAdvice, RepositoryError> {
    let order_raw = row.try_get::<i64, _>("countersign_order")?;
    let order = u8::try_from(order_raw)
        .ok()
        .and_then(CountersignOrder::from_u8)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown countersign order {order_raw}")))?;

    Ok(CountersignAdvice {
        id: row.try_get("id")?,
        case_id: CaseId(row.try_get("case_id")?),
        advice_id: row.try_get("advice_id")?,
        order,
        outcome_accepted: row.try_get("outcome_accepted")?,
        reasons: row.try_get("reasons")?,
        countersigned_user: row.try_get("countersigned_user")?,
        valid: row.try_get("valid")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use lite_core::domain::advice::{CountersignAdvice, CountersignOrder};
    use lite_core::domain::case::CaseId;

    use super::SqlCountersignRepository;
    use crate::repositories::case::SqlCaseRepository;
    use crate::repositories::test_support::{sample_case, setup_pool};
    use crate::repositories::{CaseRepository, CountersignRepository};

    #[tokio::test]
    async fn invalidation_is_persisted() {
        let pool = setup_pool().await;
        SqlCaseRepository::new(pool.clone()).save(sample_case("case-1")).await.expect("save case");
        let repo = SqlCountersignRepository::new(pool);

        let mut signature = CountersignAdvice {
            id: "cs-1".to_owned(),
            case_id: CaseId("case-1".to_owned()),
            advice_id: "advice-1".to_owned(),
            order: CountersignOrder::Second,
            outcome_accepted: false,
            reasons: "Needs end-user check".to_owned(),
            countersigned_user: "senior-1".to_owned(),
            valid: true,
            created_at: Utc::now(),
        };
        repo.save(signature.clone()).await.expect("save");
        signature.valid = false;
        repo.save(signature.clone()).await.expect("update");

        assert_eq!(repo.list_for_case(&signature.case_id).await.expect("list"), vec![signature]);
    }
}
