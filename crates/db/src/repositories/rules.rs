use sqlx::{sqlite::SqliteRow, Row};

use lite_core::domain::rules::{ControlListTree, FlagLevel, FlaggingRule, RoutingRule, RoutingUser};
use lite_core::domain::status::CaseStatus;

use super::decode::{parse_enum, parse_json, parse_u32, to_json};
use super::{RepositoryError, RuleRepository};
use crate::DbPool;

/// Routing rules, flagging rules and the control list hierarchy.
pub struct SqlRuleRepository {
    pool: DbPool,
}

impl SqlRuleRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RuleRepository for SqlRuleRepository {
    async fn list_routing_rules(&self) -> Result<Vec<RoutingRule>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, team_id, queue_id, status, tier, active, user_id, user_active, parameter_sets_json
             FROM routing_rule
             ORDER BY team_id ASC, tier ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(routing_rule_from_row).collect()
    }

    async fn list_flagging_rules(&self) -> Result<Vec<FlaggingRule>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, flag_id, level, active, matching_values_json, matching_groups_json,
                    excluded_values_json, is_for_verified_goods_only
             FROM flagging_rule
             ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(flagging_rule_from_row).collect()
    }

    async fn control_list(&self) -> Result<ControlListTree, RepositoryError> {
        let rows = sqlx::query("SELECT rating, parent FROM control_list_entry WHERE parent IS NOT NULL")
            .fetch_all(&self.pool)
            .await?;

        let mut tree = ControlListTree::default();
        for row in rows {
            let rating: String = row.try_get("rating")?;
            let parent: String = row.try_get("parent")?;
            tree.insert(rating, parent);
        }
        Ok(tree)
    }

    async fn save_routing_rule(&self, rule: RoutingRule) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO routing_rule (
                id, team_id, queue_id, status, tier, active, user_id, user_active, parameter_sets_json
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                team_id = excluded.team_id,
                queue_id = excluded.queue_id,
                status = excluded.status,
                tier = excluded.tier,
                active = excluded.active,
                user_id = excluded.user_id,
                user_active = excluded.user_active,
                parameter_sets_json = excluded.parameter_sets_json",
        )
        .bind(&rule.id)
        .bind(&rule.team_id)
        .bind(&rule.queue_id)
        .bind(rule.status.as_str())
        .bind(i64::from(rule.tier))
        .bind(rule.active)
        .bind(rule.user.as_ref().map(|user| user.id.as_str()))
        .bind(rule.user.as_ref().map(|user| user.active))
        .bind(to_json("parameter_sets_json", &rule.parameter_sets)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_flagging_rule(&self, rule: FlaggingRule) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO flagging_rule (
                id, flag_id, level, active, matching_values_json, matching_groups_json,
                excluded_values_json, is_for_verified_goods_only
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                flag_id = excluded.flag_id,
                level = excluded.level,
                active = excluded.active,
                matching_values_json = excluded.matching_values_json,
                matching_groups_json = excluded.matching_groups_json,
                excluded_values_json = excluded.excluded_values_json,
                is_for_verified_goods_only = excluded.is_for_verified_goods_only",
        )
        .bind(&rule.id)
        .bind(&rule.flag_id)
        .bind(rule.level.as_str())
        .bind(rule.active)
        .bind(to_json("matching_values_json", &rule.matching_values)?)
        .bind(to_json("matching_groups_json", &rule.matching_groups)?)
        .bind(to_json("excluded_values_json", &rule.excluded_values)?)
        .bind(rule.is_for_verified_goods_only)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_control_list_entry(&self, rating: &str, parent: Option<&str>) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO control_list_entry (rating, parent) VALUES (?, ?)
             ON CONFLICT(rating) DO UPDATE SET parent = excluded.parent",
        )
        .bind(rating)
        .bind(parent)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn routing_rule_from_row(row: SqliteRow) -> Result<RoutingRule, RepositoryError> {
    let user_id: Option<String> = row.try_get("user_id")?;
    let user_active: Option<bool> = row.try_get("user_active")?;

    Ok(RoutingRule {
        id: row.try_get("id")?,
        team_id: row.try_get("team_id")?,
        queue_id: row.try_get("queue_id")?,
        status: parse_enum("status", row.try_get("status")?, CaseStatus::parse)?,
        tier: parse_u32("tier", row.try_get("tier")?)?,
        active: row.try_get("active")?,
        user: user_id.map(|id| RoutingUser { id, active: user_active.unwrap_or(false) }),
        parameter_sets: parse_json("parameter_sets_json", row.try_get("parameter_sets_json")?)?,
    })
}

fn flagging_rule_from_row(row: SqliteRow) -> Result<FlaggingRule, RepositoryError> {
    Ok(FlaggingRule {
        id: row.try_get("id")?,
        flag_id: row.try_get("flag_id")?,
        level: parse_enum("level", row.try_get("level")?, FlagLevel::parse)?,
        active: row.try_get("active")?,
        matching_values: parse_json("matching_values_json", row.try_get("matching_values_json")?)?,
        matching_groups: parse_json("matching_groups_json", row.try_get("matching_groups_json")?)?,
        excluded_values: parse_json("excluded_values_json", row.try_get("excluded_values_json")?)?,
        is_for_verified_goods_only: row.try_get("is_for_verified_goods_only")?,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use lite_core::domain::case::{CaseParameter, CaseTypeReference};
    use lite_core::domain::rules::{FlagLevel, FlaggingRule, RoutingRule, RoutingUser};
    use lite_core::domain::status::CaseStatus;

    use super::SqlRuleRepository;
    use crate::repositories::test_support::setup_pool;
    use crate::repositories::RuleRepository;

    #[tokio::test]
    async fn routing_rules_keep_parameter_sets_and_users() {
        let repo = SqlRuleRepository::new(setup_pool().await);
        let rule = RoutingRule {
            id: "rule-1".to_owned(),
            team_id: "team-fcdo".to_owned(),
            queue_id: "queue-fcdo".to_owned(),
            status: CaseStatus::OgdAdvice,
            tier: 2,
            active: true,
            user: Some(RoutingUser { id: "user-9".to_owned(), active: true }),
            parameter_sets: vec![BTreeSet::from([
                CaseParameter::Country("IR".to_owned()),
                CaseParameter::CaseType(CaseTypeReference::Siel),
            ])],
        };

        repo.save_routing_rule(rule.clone()).await.expect("save rule");
        assert_eq!(repo.list_routing_rules().await.expect("list"), vec![rule]);
    }

    #[tokio::test]
    async fn flagging_rules_and_control_list_round_trip() {
        let repo = SqlRuleRepository::new(setup_pool().await);
        let rule = FlaggingRule {
            id: "flag-rule-1".to_owned(),
            flag_id: "MANPADS".to_owned(),
            level: FlagLevel::Good,
            active: true,
            matching_values: vec!["ML4a".to_owned()],
            matching_groups: vec!["ML4".to_owned()],
            excluded_values: vec!["ML4b".to_owned()],
            is_for_verified_goods_only: true,
        };
        repo.save_flagging_rule(rule.clone()).await.expect("save rule");
        repo.save_control_list_entry("ML4", None).await.expect("save root");
        repo.save_control_list_entry("ML4a", Some("ML4")).await.expect("save child");

        assert_eq!(repo.list_flagging_rules().await.expect("list"), vec![rule]);
        assert_eq!(repo.control_list().await.expect("tree").ancestors("ML4a"), vec!["ML4".to_owned()]);
    }
}
