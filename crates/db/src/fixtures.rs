use std::collections::BTreeSet;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;

use lite_core::domain::case::{
    Case, CaseId, CaseParameter, CaseTypeReference, ExportType, GoodOnApplication, OrganisationId, Party,
    PartyType,
};
use lite_core::domain::rules::{FlagLevel, FlaggingRule, RoutingRule};
use lite_core::domain::status::CaseStatus;
use lite_core::licensing::reference::CaseReference;
use lite_core::sla::QueryWindow;

use crate::connection::DbPool;
use crate::repositories::{
    CaseRepository, RepositoryError, RuleRepository, SlaRepository, SqlCaseRepository, SqlRuleRepository,
    SqlSlaRepository,
};

const SEED_YEAR: i32 = 2026;
const DEMO_ORGANISATION_ID: &str = "org-demo-001";
const DEMO_ORGANISATION_NAME: &str = "Northgate Optics Ltd";

/// Demo cases covering a draft, a freshly submitted application and one
/// waiting on a final decision.
const SEED_CASES: &[SeedCaseContract] = &[
    SeedCaseContract {
        case_id: "case-demo-draft-001",
        case_type: CaseTypeReference::Siel,
        export_type: None,
        status: CaseStatus::Draft,
        name: "Rifle scopes for trade fair",
        reference_number: None,
        queues: &[],
        description: "Standard individual application still being drafted",
    },
    SeedCaseContract {
        case_id: "case-demo-submitted-001",
        case_type: CaseTypeReference::Siel,
        export_type: Some(ExportType::Permanent),
        status: CaseStatus::Submitted,
        name: "Thermal sights to Gulf end user",
        reference_number: Some(1),
        queues: &["queue-licensing-unit"],
        description: "Submitted SIEL with a destination routed to FCDO",
    },
    SeedCaseContract {
        case_id: "case-demo-final-review-001",
        case_type: CaseTypeReference::Oiel,
        export_type: Some(ExportType::Temporary),
        status: CaseStatus::UnderFinalReview,
        name: "Demonstration kit loan",
        reference_number: Some(2),
        queues: &["queue-licensing-unit"],
        description: "Open individual application waiting on the final decision",
    },
];

const SEED_QUEUES: &[(&str, &str, Option<&str>)] = &[
    ("queue-licensing-unit", "Licensing Unit Case Review", Some("dept-ecju")),
    ("queue-fcdo", "FCDO Cases to Review", Some("dept-fcdo")),
    ("queue-enforcement", "Enforcement Unit", None),
];

const SEED_CONTROL_LIST: &[(&str, Option<&str>)] = &[
    ("ML", None),
    ("ML1", Some("ML")),
    ("ML1a", Some("ML1")),
    ("ML4", Some("ML")),
    ("ML4a", Some("ML4")),
    ("ML5", Some("ML")),
    ("ML5b", Some("ML5")),
];

const SEED_ROUTING_RULE_ID: &str = "routing-demo-fcdo-gulf";
const SEED_FLAGGING_RULE_ID: &str = "flagging-demo-manpads";
const SEED_QUERY_ID: &str = "ecju-query-demo-001";

/// LITE demo data for local runs and smoke tests.
pub struct DemoDataset;

impl DemoDataset {
    /// Load the demo dataset. Re-running overwrites the seeded rows in place.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let cases = SqlCaseRepository::new(pool.clone());
        let rules = SqlRuleRepository::new(pool.clone());
        let sla = SqlSlaRepository::new(pool.clone());
        let seeded_at = seed_timestamp();

        for (queue_id, name, department) in SEED_QUEUES {
            sla.save_queue(queue_id, name, *department).await?;
        }
        for (rating, parent) in SEED_CONTROL_LIST {
            rules.save_control_list_entry(rating, *parent).await?;
        }
        rules.save_routing_rule(seed_routing_rule()).await?;
        rules.save_flagging_rule(seed_flagging_rule()).await?;

        for contract in SEED_CASES {
            cases.save(contract.build(seeded_at)).await?;
        }

        let highest_reference =
            SEED_CASES.iter().filter_map(|contract| contract.reference_number).max().unwrap_or(0);
        sqlx::query(
            "INSERT INTO case_reference_counter (year, last_number) VALUES (?, ?)
             ON CONFLICT(year) DO UPDATE SET last_number = MAX(last_number, excluded.last_number)",
        )
        .bind(SEED_YEAR)
        .bind(highest_reference as i64)
        .execute(pool)
        .await?;

        sla.save_query(
            SEED_QUERY_ID,
            &CaseId("case-demo-submitted-001".to_owned()),
            QueryWindow { created_at: seeded_at + Duration::days(1), responded_at: None },
        )
        .await?;

        let cases_seeded = SEED_CASES
            .iter()
            .map(|contract| SeedCaseInfo {
                case_id: contract.case_id,
                status: contract.status,
                description: contract.description,
            })
            .collect();

        Ok(SeedResult { cases_seeded })
    }

    /// Verify that the seeded rows exist and still match the dataset.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let cases = SqlCaseRepository::new(pool.clone());
        let rules = SqlRuleRepository::new(pool.clone());
        let sla = SqlSlaRepository::new(pool.clone());
        let mut checks = Vec::new();

        for contract in SEED_CASES {
            let stored = cases.find_by_id(&CaseId(contract.case_id.to_owned())).await?;
            let matches = stored.is_some_and(|case| {
                case.status == contract.status
                    && case.reference_code == contract.reference_code()
                    && case.queues.len() == contract.queues.len()
            });
            checks.push((contract.case_id, matches));
        }

        let routing_present =
            rules.list_routing_rules().await?.iter().any(|rule| rule.id == SEED_ROUTING_RULE_ID);
        checks.push((SEED_ROUTING_RULE_ID, routing_present));

        let flagging_present =
            rules.list_flagging_rules().await?.iter().any(|rule| rule.id == SEED_FLAGGING_RULE_ID);
        checks.push((SEED_FLAGGING_RULE_ID, flagging_present));

        let tree = rules.control_list().await?;
        checks.push(("control-list-hierarchy", tree.ancestors("ML1a") == vec!["ML1".to_owned(), "ML".to_owned()]));

        let queue_ids: BTreeSet<String> = SEED_QUEUES.iter().map(|(id, _, _)| (*id).to_owned()).collect();
        let departments = sla.queue_departments(&queue_ids).await?;
        let queues_ok = SEED_QUEUES
            .iter()
            .all(|(id, _, department)| departments.get(*id).cloned().flatten().as_deref() == *department);
        checks.push(("work-queues", queues_ok));

        let last_number: Option<i64> =
            sqlx::query_scalar("SELECT last_number FROM case_reference_counter WHERE year = ?")
                .bind(SEED_YEAR)
                .fetch_optional(pool)
                .await?;
        checks.push(("reference-counter", last_number.is_some_and(|value| value >= 2)));

        let queries = sla.list_queries(&CaseId("case-demo-submitted-001".to_owned())).await?;
        checks.push((SEED_QUERY_ID, queries.iter().any(|query| query.responded_at.is_none())));

        let all_present = checks.iter().all(|(_, present)| *present);
        Ok(VerificationResult { all_present, checks })
    }

    /// Remove the seeded rows. The reference counter is left alone so that
    /// references already handed out are never reused.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;
        let case_ids = sql_array_from_ids(&SEED_CASES.iter().map(|contract| contract.case_id).collect::<Vec<_>>());
        let queue_ids = sql_array_from_ids(&SEED_QUEUES.iter().map(|(id, _, _)| *id).collect::<Vec<_>>());
        let ratings = sql_array_from_ids(&SEED_CONTROL_LIST.iter().map(|(rating, _)| *rating).collect::<Vec<_>>());

        sqlx::query("DELETE FROM ecju_query WHERE id = ?").bind(SEED_QUERY_ID).execute(&mut *tx).await?;
        sqlx::query(&format!("DELETE FROM case_queue_sla WHERE case_id IN {case_ids}")).execute(&mut *tx).await?;
        sqlx::query(&format!("DELETE FROM case_department_sla WHERE case_id IN {case_ids}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM audit_event WHERE case_id IN {case_ids}")).execute(&mut *tx).await?;
        sqlx::query(&format!("DELETE FROM case_record WHERE id IN {case_ids}")).execute(&mut *tx).await?;
        sqlx::query(&format!("DELETE FROM work_queue WHERE id IN {queue_ids}")).execute(&mut *tx).await?;
        sqlx::query(&format!("DELETE FROM control_list_entry WHERE rating IN {ratings}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM routing_rule WHERE id = ?").bind(SEED_ROUTING_RULE_ID).execute(&mut *tx).await?;
        sqlx::query("DELETE FROM flagging_rule WHERE id = ?").bind(SEED_FLAGGING_RULE_ID).execute(&mut *tx).await?;

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedCaseContract {
    case_id: &'static str,
    case_type: CaseTypeReference,
    export_type: Option<ExportType>,
    status: CaseStatus,
    name: &'static str,
    reference_number: Option<u64>,
    queues: &'static [&'static str],
    description: &'static str,
}

impl SeedCaseContract {
    fn reference_code(&self) -> Option<String> {
        self.reference_number
            .map(|number| CaseReference::format(self.case_type, self.export_type, SEED_YEAR, number))
    }

    fn build(&self, seeded_at: DateTime<Utc>) -> Case {
        let mut case = Case::draft(
            CaseId(self.case_id.to_owned()),
            self.case_type,
            OrganisationId(DEMO_ORGANISATION_ID.to_owned()),
            DEMO_ORGANISATION_NAME,
            self.name,
            seeded_at,
        );
        case.export_type = self.export_type;
        case.goods.push(GoodOnApplication {
            id: format!("{}-good-1", self.case_id),
            good_id: "good-thermal-sight".to_owned(),
            name: "Thermal weapon sight".to_owned(),
            description: "Uncooled thermal imaging sight".to_owned(),
            control_list_entries: vec!["ML5b".to_owned()],
            quantity: Decimal::new(20, 0),
            unit: "NAR".to_owned(),
            value: Decimal::new(4_200_000, 2),
            is_good_controlled: true,
            is_verified: false,
            flags: BTreeSet::new(),
            copy_of: None,
        });
        case.parties.push(Party {
            id: format!("{}-end-user", self.case_id),
            party_type: PartyType::EndUser,
            name: "Gulf Coast Security Services".to_owned(),
            address: "14 Corniche Road, Abu Dhabi".to_owned(),
            country_code: "AE".to_owned(),
            flags: BTreeSet::new(),
            copy_of: None,
        });

        if self.status != CaseStatus::Draft {
            case.status = self.status;
            case.reference_code = self.reference_code();
            case.submitted_at = Some(seeded_at);
            case.queues = self.queues.iter().map(|queue| (*queue).to_owned()).collect();
        }
        case
    }
}

fn seed_timestamp() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(SEED_YEAR, 10, 5, 9, 30, 0).single().unwrap_or_else(Utc::now)
}

fn seed_routing_rule() -> RoutingRule {
    RoutingRule {
        id: SEED_ROUTING_RULE_ID.to_owned(),
        team_id: "team-fcdo".to_owned(),
        queue_id: "queue-fcdo".to_owned(),
        status: CaseStatus::Submitted,
        tier: 1,
        active: true,
        user: None,
        parameter_sets: vec![BTreeSet::from([CaseParameter::Country("AE".to_owned())])],
    }
}

fn seed_flagging_rule() -> FlaggingRule {
    FlaggingRule {
        id: SEED_FLAGGING_RULE_ID.to_owned(),
        flag_id: "MANPADS".to_owned(),
        level: FlagLevel::Good,
        active: true,
        matching_values: Vec::new(),
        matching_groups: vec!["ML4".to_owned()],
        excluded_values: Vec::new(),
        is_for_verified_goods_only: false,
    }
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted = ids.iter().map(|id| format!("'{id}'")).collect::<Vec<_>>().join(",");
    format!("({quoted})")
}

#[derive(Debug)]
pub struct SeedResult {
    pub cases_seeded: Vec<SeedCaseInfo>,
}

#[derive(Debug)]
pub struct SeedCaseInfo {
    pub case_id: &'static str,
    pub status: CaseStatus,
    pub description: &'static str,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{connect_with_settings, migrations};

    async fn migrated_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect to test database");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    #[tokio::test]
    async fn load_is_idempotent_and_verifiable() {
        let pool = migrated_pool().await;

        let first = DemoDataset::load(&pool).await.expect("load demo data");
        let second = DemoDataset::load(&pool).await.expect("reload demo data");
        let verification = DemoDataset::verify(&pool).await.expect("verify demo data");

        assert_eq!(first.cases_seeded.len(), 3);
        assert_eq!(second.cases_seeded.len(), 3);
        assert!(verification.all_present, "failed checks: {:?}", verification.checks);
    }

    #[tokio::test]
    async fn clean_removes_cases_but_keeps_counter() {
        let pool = migrated_pool().await;
        DemoDataset::load(&pool).await.expect("load demo data");

        DemoDataset::clean(&pool).await.expect("clean demo data");
        let verification = DemoDataset::verify(&pool).await.expect("verify after clean");
        let counter: i64 = sqlx::query_scalar("SELECT last_number FROM case_reference_counter WHERE year = 2026")
            .fetch_one(&pool)
            .await
            .expect("counter row");

        assert!(!verification.all_present);
        assert_eq!(counter, 2);
    }

    #[test]
    fn seeded_references_follow_case_reference_format() {
        let submitted = SEED_CASES[1];
        assert_eq!(submitted.reference_code().as_deref(), Some("GBSIEL/2026/0000001/P"));
        assert_eq!(SEED_CASES[0].reference_code(), None);
    }
}
