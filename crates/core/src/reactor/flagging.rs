use std::collections::BTreeSet;

use crate::audit::{AuditContext, AuditEvent, AuditSink, AuditVerb};
use crate::domain::case::Case;
use crate::domain::rules::{ControlListTree, FlagLevel, FlaggingRule};

/// Flags newly attached by one evaluation pass, per level.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlaggingReport {
    pub case_flags: BTreeSet<String>,
    pub good_flags: Vec<(String, BTreeSet<String>)>,
    pub party_flags: Vec<(String, BTreeSet<String>)>,
}

impl FlaggingReport {
    pub fn is_empty(&self) -> bool {
        self.case_flags.is_empty() && self.good_flags.is_empty() && self.party_flags.is_empty()
    }

    pub fn all_flags(&self) -> BTreeSet<String> {
        let mut flags = self.case_flags.clone();
        for (_, added) in self.good_flags.iter().chain(self.party_flags.iter()) {
            flags.extend(added.iter().cloned());
        }
        flags
    }
}

#[derive(Clone, Debug, Default)]
pub struct FlaggingEngine {
    rules: Vec<FlaggingRule>,
    control_list: ControlListTree,
}

impl FlaggingEngine {
    /// Inactive rules are dropped up front.
    pub fn new(rules: Vec<FlaggingRule>, control_list: ControlListTree) -> Self {
        Self { rules: rules.into_iter().filter(|rule| rule.active).collect(), control_list }
    }

    /// Applies every active rule to an open case. Draft and terminal cases
    /// are left alone.
    pub fn apply_to_case(&self, case: &mut Case) -> FlaggingReport {
        let mut report = FlaggingReport::default();
        if !is_open(case) {
            return report;
        }

        let case_type = case.case_type.as_str().to_owned();
        for rule in self.rules_for(FlagLevel::Case) {
            if rule.matching_values.contains(&case_type) && case.flags.insert(rule.flag_id.clone()) {
                report.case_flags.insert(rule.flag_id.clone());
            }
        }

        for party in &mut case.parties {
            let mut added = BTreeSet::new();
            for rule in self.rules_for(FlagLevel::Destination) {
                if rule.matching_values.contains(&party.country_code)
                    && party.flags.insert(rule.flag_id.clone())
                {
                    added.insert(rule.flag_id.clone());
                }
            }
            if !added.is_empty() {
                report.party_flags.push((party.id.clone(), added));
            }
        }

        for good in &mut case.goods {
            let ratings = good.control_list_entries.clone();
            let group_ratings: Vec<String> =
                ratings.iter().flat_map(|rating| self.control_list.ancestors(rating)).collect();

            let mut added = BTreeSet::new();
            for rule in self.rules_for(FlagLevel::Good) {
                if rule.is_for_verified_goods_only && !good.is_verified {
                    continue;
                }
                if good_rule_matches(rule, &ratings, &group_ratings) && good.flags.insert(rule.flag_id.clone()) {
                    added.insert(rule.flag_id.clone());
                }
            }
            if !added.is_empty() {
                report.good_flags.push((good.id.clone(), added));
            }
        }

        report
    }

    pub fn apply_to_case_with_audit<S>(&self, case: &mut Case, sink: &S, audit: &AuditContext) -> FlaggingReport
    where
        S: AuditSink,
    {
        let report = self.apply_to_case(case);
        if !report.is_empty() {
            let added: Vec<String> = report.all_flags().into_iter().collect();
            sink.emit(
                AuditEvent::success(case.id.clone(), AuditVerb::AddFlags, audit).with_payload("added_flags", added),
            );
        }
        report
    }

    /// Applies a single rule across a set of cases, e.g. when a rule is
    /// created or re-activated. Returns the ids of cases that changed.
    pub fn apply_rule_to_open_cases(&self, rule: &FlaggingRule, cases: &mut [Case]) -> Vec<String> {
        if !rule.active {
            return Vec::new();
        }
        let single = Self { rules: vec![rule.clone()], control_list: self.control_list.clone() };
        cases
            .iter_mut()
            .filter_map(|case| {
                let report = single.apply_to_case(case);
                (!report.is_empty()).then(|| case.id.0.clone())
            })
            .collect()
    }

    fn rules_for(&self, level: FlagLevel) -> impl Iterator<Item = &FlaggingRule> {
        self.rules.iter().filter(move |rule| rule.level == level)
    }
}

fn is_open(case: &Case) -> bool {
    case.status != crate::domain::status::CaseStatus::Draft && !case.status.is_terminal()
}

fn good_rule_matches(rule: &FlaggingRule, ratings: &[String], group_ratings: &[String]) -> bool {
    let matched = rule.matching_values.iter().any(|value| ratings.contains(value))
        || rule.matching_groups.iter().any(|group| group_ratings.contains(group));
    let excluded = rule
        .excluded_values
        .iter()
        .any(|value| ratings.contains(value) || group_ratings.contains(value));
    matched && !excluded
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::Utc;
    use rust_decimal::Decimal;

    use crate::audit::{AuditContext, AuditVerb, InMemoryAuditSink};
    use crate::domain::case::{
        Case, CaseId, CaseTypeReference, GoodOnApplication, OrganisationId, Party, PartyType,
    };
    use crate::domain::rules::{ControlListTree, FlagLevel, FlaggingRule};
    use crate::domain::status::CaseStatus;
    use crate::reactor::flagging::FlaggingEngine;

    fn rule(id: &str, level: FlagLevel, values: &[&str], groups: &[&str], excluded: &[&str]) -> FlaggingRule {
        FlaggingRule {
            id: id.to_owned(),
            flag_id: format!("flag-{id}"),
            level,
            active: true,
            matching_values: values.iter().map(|value| (*value).to_owned()).collect(),
            matching_groups: groups.iter().map(|value| (*value).to_owned()).collect(),
            excluded_values: excluded.iter().map(|value| (*value).to_owned()).collect(),
            is_for_verified_goods_only: false,
        }
    }

    fn good(id: &str, ratings: &[&str], verified: bool) -> GoodOnApplication {
        GoodOnApplication {
            id: id.to_owned(),
            good_id: format!("good-{id}"),
            name: "Thermal camera".to_owned(),
            description: "Thermal imaging camera".to_owned(),
            control_list_entries: ratings.iter().map(|rating| (*rating).to_owned()).collect(),
            quantity: Decimal::new(10, 0),
            unit: "NAR".to_owned(),
            value: Decimal::new(150_000, 2),
            is_good_controlled: true,
            is_verified: verified,
            flags: BTreeSet::new(),
            copy_of: None,
        }
    }

    fn open_case() -> Case {
        let mut case = Case::draft(
            CaseId("case-1".to_owned()),
            CaseTypeReference::Siel,
            OrganisationId("org-1".to_owned()),
            "Acme Exports",
            "Cameras",
            Utc::now(),
        );
        case.status = CaseStatus::Submitted;
        case.parties.push(Party {
            id: "party-1".to_owned(),
            party_type: PartyType::EndUser,
            name: "Buyer".to_owned(),
            address: "1 Rue".to_owned(),
            country_code: "FR".to_owned(),
            flags: BTreeSet::new(),
            copy_of: None,
        });
        case.goods.push(good("goa-1", &["ML1a"], false));
        case
    }

    fn control_list() -> ControlListTree {
        ControlListTree::new([("ML1a".to_owned(), "ML1".to_owned()), ("ML1".to_owned(), "ML".to_owned())])
    }

    #[test]
    fn rules_apply_at_each_level() {
        let engine = FlaggingEngine::new(
            vec![
                rule("case", FlagLevel::Case, &["siel"], &[], &[]),
                rule("dest", FlagLevel::Destination, &["FR"], &[], &[]),
                rule("good", FlagLevel::Good, &[], &["ML"], &[]),
                rule("other", FlagLevel::Good, &["ML22"], &[], &[]),
            ],
            control_list(),
        );
        let mut case = open_case();

        let report = engine.apply_to_case(&mut case);

        assert!(case.flags.contains("flag-case"));
        assert!(case.parties[0].flags.contains("flag-dest"));
        assert!(case.goods[0].flags.contains("flag-good"));
        assert!(!case.goods[0].flags.contains("flag-other"));
        assert_eq!(report.all_flags().len(), 3);
    }

    #[test]
    fn exclusions_and_verified_only_rules_are_honoured() {
        let mut verified_only = rule("verified", FlagLevel::Good, &["ML1a"], &[], &[]);
        verified_only.is_for_verified_goods_only = true;
        let engine = FlaggingEngine::new(
            vec![verified_only, rule("excluded", FlagLevel::Good, &["ML1a"], &[], &["ML1"])],
            control_list(),
        );
        let mut case = open_case();

        assert!(engine.apply_to_case(&mut case).is_empty());

        case.goods[0].is_verified = true;
        let report = engine.apply_to_case(&mut case);
        assert_eq!(report.good_flags.len(), 1);
        assert!(case.goods[0].flags.contains("flag-verified"));
    }

    #[test]
    fn draft_and_terminal_cases_are_skipped() {
        let engine = FlaggingEngine::new(vec![rule("case", FlagLevel::Case, &["siel"], &[], &[])], control_list());
        let mut case = open_case();
        case.status = CaseStatus::Withdrawn;
        assert!(engine.apply_to_case(&mut case).is_empty());
        case.status = CaseStatus::Draft;
        assert!(engine.apply_to_case(&mut case).is_empty());
    }

    #[test]
    fn new_flags_are_audited_once() {
        let engine = FlaggingEngine::new(vec![rule("case", FlagLevel::Case, &["siel"], &[], &[])], control_list());
        let sink = InMemoryAuditSink::default();
        let mut case = open_case();

        engine.apply_to_case_with_audit(&mut case, &sink, &AuditContext::system("req-1"));
        engine.apply_to_case_with_audit(&mut case, &sink, &AuditContext::system("req-1"));

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].verb, AuditVerb::AddFlags);
    }

    #[test]
    fn single_rule_applies_across_open_cases() {
        let engine = FlaggingEngine::new(Vec::new(), control_list());
        let destination = rule("dest", FlagLevel::Destination, &["FR"], &[], &[]);
        let mut closed = open_case();
        closed.id = CaseId("case-2".to_owned());
        closed.status = CaseStatus::Closed;
        let mut cases = vec![open_case(), closed];

        let changed = engine.apply_rule_to_open_cases(&destination, &mut cases);

        assert_eq!(changed, vec!["case-1".to_owned()]);
    }
}
