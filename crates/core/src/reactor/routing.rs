use std::collections::BTreeMap;

use crate::audit::{AuditContext, AuditEvent, AuditSink, AuditVerb};
use crate::domain::case::{Case, CaseAssignment};
use crate::domain::rules::RoutingRule;
use crate::domain::status::CaseStatus;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoutingReport {
    pub queues_added: Vec<String>,
    pub assignments_added: Vec<CaseAssignment>,
    /// Statuses the case was advanced through because no rule matched.
    pub advanced_to: Vec<CaseStatus>,
}

impl RoutingReport {
    pub fn routed(&self) -> bool {
        !self.queues_added.is_empty()
    }
}

/// Runs team routing rules against a case, team by team. Within a team the
/// lowest tier with a match wins, and every matching rule of that tier applies.
#[derive(Clone, Debug, Default)]
pub struct RoutingEngine {
    teams: BTreeMap<String, Vec<RoutingRule>>,
}

impl RoutingEngine {
    pub fn new(rules: Vec<RoutingRule>) -> Self {
        let mut teams: BTreeMap<String, Vec<RoutingRule>> = BTreeMap::new();
        for rule in rules.into_iter().filter(|rule| rule.active) {
            teams.entry(rule.team_id.clone()).or_default().push(rule);
        }
        for rules in teams.values_mut() {
            rules.sort_by_key(|rule| rule.tier);
        }
        Self { teams }
    }

    /// Clears current queues and assignments, then routes. When nothing
    /// matches and `keep_status` is false the case moves to the next workflow
    /// status and routing is retried, stopping before a terminal status.
    pub fn run<S>(&self, case: &mut Case, keep_status: bool, sink: &S, audit: &AuditContext) -> RoutingReport
    where
        S: AuditSink,
    {
        let mut report = RoutingReport::default();
        if case.status.is_terminal() {
            return report;
        }

        clear_routing(case, sink, audit);
        let parameters = case.parameter_set();

        loop {
            for rules in self.teams.values() {
                let mut matched_tier = None;
                for rule in rules.iter().filter(|rule| rule.status == case.status) {
                    if matched_tier.is_some_and(|tier| tier != rule.tier) {
                        break;
                    }
                    if !rule.matches(&parameters) {
                        continue;
                    }

                    if case.queues.insert(rule.queue_id.clone()) {
                        report.queues_added.push(rule.queue_id.clone());
                    }
                    sink.emit(
                        AuditEvent::success(case.id.clone(), AuditVerb::MoveCase, audit)
                            .with_payload("queues", rule.queue_id.clone()),
                    );

                    if let Some(user) = rule.user.as_ref().filter(|user| user.active) {
                        let assignment =
                            CaseAssignment { queue_id: rule.queue_id.clone(), user_id: user.id.clone() };
                        if !case.assignments.contains(&assignment) {
                            case.assignments.push(assignment.clone());
                            report.assignments_added.push(assignment);
                        }
                    }
                    matched_tier = Some(rule.tier);
                }
            }

            if report.routed() {
                return report;
            }

            match case.status.next_in_workflow() {
                Some(next) if !keep_status && !next.is_terminal() => {
                    let previous = case.status;
                    case.status = next;
                    report.advanced_to.push(next);
                    sink.emit(
                        AuditEvent::success(case.id.clone(), AuditVerb::UpdatedStatus, audit).with_payload(
                            "status",
                            serde_json::json!({ "new": next.as_str(), "old": previous.as_str() }),
                        ),
                    );
                }
                _ => return report,
            }
        }
    }
}

fn clear_routing<S>(case: &mut Case, sink: &S, audit: &AuditContext)
where
    S: AuditSink,
{
    if !case.queues.is_empty() {
        case.queues.clear();
        sink.emit(AuditEvent::success(case.id.clone(), AuditVerb::RemoveCaseFromAllQueues, audit));
    }
    if !case.assignments.is_empty() {
        case.assignments.clear();
        sink.emit(AuditEvent::success(case.id.clone(), AuditVerb::RemoveCaseFromAllUserAssignments, audit));
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::Utc;

    use crate::audit::{AuditContext, AuditVerb, InMemoryAuditSink};
    use crate::domain::case::{Case, CaseAssignment, CaseId, CaseParameter, CaseTypeReference, OrganisationId};
    use crate::domain::rules::{RoutingRule, RoutingUser};
    use crate::domain::status::CaseStatus;
    use crate::reactor::routing::RoutingEngine;

    fn rule(id: &str, team: &str, queue: &str, status: CaseStatus, tier: u32) -> RoutingRule {
        RoutingRule {
            id: id.to_owned(),
            team_id: team.to_owned(),
            queue_id: queue.to_owned(),
            status,
            tier,
            active: true,
            user: None,
            parameter_sets: Vec::new(),
        }
    }

    fn submitted_case() -> Case {
        let mut case = Case::draft(
            CaseId("case-1".to_owned()),
            CaseTypeReference::Siel,
            OrganisationId("org-1".to_owned()),
            "Acme Exports",
            "Radar parts",
            Utc::now(),
        );
        case.status = CaseStatus::Submitted;
        case
    }

    #[test]
    fn lowest_matching_tier_wins_per_team() {
        let mut flagged = rule("r1", "team-a", "queue-flagged", CaseStatus::Submitted, 1);
        flagged.parameter_sets = vec![BTreeSet::from([CaseParameter::Flag("MISSING".to_owned())])];
        let mut with_user = rule("r2", "team-a", "queue-t2", CaseStatus::Submitted, 2);
        with_user.user = Some(RoutingUser { id: "officer-1".to_owned(), active: true });
        let engine = RoutingEngine::new(vec![
            flagged,
            with_user,
            rule("r3", "team-a", "queue-t3", CaseStatus::Submitted, 3),
            rule("r4", "team-b", "queue-b", CaseStatus::Submitted, 1),
        ]);
        let sink = InMemoryAuditSink::default();
        let mut case = submitted_case();

        let report = engine.run(&mut case, false, &sink, &AuditContext::system("req-1"));

        assert_eq!(report.queues_added, vec!["queue-t2".to_owned(), "queue-b".to_owned()]);
        assert_eq!(
            case.assignments,
            vec![CaseAssignment { queue_id: "queue-t2".to_owned(), user_id: "officer-1".to_owned() }]
        );
        assert_eq!(case.status, CaseStatus::Submitted);
    }

    #[test]
    fn existing_routing_is_cleared_and_audited() {
        let engine = RoutingEngine::new(vec![rule("r1", "team-a", "queue-new", CaseStatus::Submitted, 1)]);
        let sink = InMemoryAuditSink::default();
        let mut case = submitted_case();
        case.queues.insert("queue-old".to_owned());
        case.assignments.push(CaseAssignment { queue_id: "queue-old".to_owned(), user_id: "u".to_owned() });

        engine.run(&mut case, false, &sink, &AuditContext::system("req-1"));

        assert_eq!(case.queues, BTreeSet::from(["queue-new".to_owned()]));
        assert!(case.assignments.is_empty());
        let verbs: Vec<AuditVerb> = sink.events().iter().map(|event| event.verb).collect();
        assert_eq!(
            verbs,
            vec![
                AuditVerb::RemoveCaseFromAllQueues,
                AuditVerb::RemoveCaseFromAllUserAssignments,
                AuditVerb::MoveCase
            ]
        );
    }

    #[test]
    fn unmatched_case_advances_until_a_rule_applies() {
        let engine = RoutingEngine::new(vec![rule("r1", "team-a", "queue-review", CaseStatus::UnderReview, 1)]);
        let sink = InMemoryAuditSink::default();
        let mut case = submitted_case();

        let report = engine.run(&mut case, false, &sink, &AuditContext::system("req-1"));

        assert_eq!(report.advanced_to, vec![CaseStatus::InitialChecks, CaseStatus::UnderReview]);
        assert_eq!(case.status, CaseStatus::UnderReview);
        assert!(case.queues.contains("queue-review"));
    }

    #[test]
    fn keep_status_and_terminal_next_stop_advancement() {
        let engine = RoutingEngine::default();
        let sink = InMemoryAuditSink::default();

        let mut kept = submitted_case();
        let report = engine.run(&mut kept, true, &sink, &AuditContext::system("req-1"));
        assert!(report.advanced_to.is_empty());
        assert_eq!(kept.status, CaseStatus::Submitted);

        let mut final_review = submitted_case();
        final_review.status = CaseStatus::UnderFinalReview;
        let report = engine.run(&mut final_review, false, &sink, &AuditContext::system("req-1"));
        assert!(report.advanced_to.is_empty());
        assert_eq!(final_review.status, CaseStatus::UnderFinalReview);
    }

    #[test]
    fn inactive_users_are_not_assigned() {
        let mut with_user = rule("r1", "team-a", "queue-a", CaseStatus::Submitted, 1);
        with_user.user = Some(RoutingUser { id: "gone".to_owned(), active: false });
        let engine = RoutingEngine::new(vec![with_user]);
        let mut case = submitted_case();

        engine.run(&mut case, false, &InMemoryAuditSink::default(), &AuditContext::system("req-1"));

        assert!(case.queues.contains("queue-a"));
        assert!(case.assignments.is_empty());
    }
}
