use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use lite_core::audit::{AuditContext, AuditEvent, InMemoryAuditSink};
use lite_core::domain::advice::CountersignAdvice;
use lite_core::domain::case::{Case, CaseId};
use lite_core::domain::execution::{
    ExecutionTask, ExecutionTaskId, ExecutionTaskState, ExecutionTransitionEvent, OperationKey,
};
use lite_core::domain::licence::{Licence, LicenceDecision, LicenceId, LicenceStatus};
use lite_core::domain::notification::Notification;
use lite_core::domain::rules::{ControlListTree, FlaggingRule, RoutingRule};
use lite_core::licensing::hmrc::{apply_usage_reports, UsageTarget};
use lite_core::sla::QueryWindow;

use super::{
    AuditRepository, CaseRepository, ChangeSet, CountersignRepository, ExecutionQueueRepository, LicenceRepository,
    NotificationRepository, ReferenceCodeRepository, RepositoryError, RuleRepository, SlaRepository, UnitOfWork,
    UsageCommit, UsageCommitted,
};

#[derive(Default)]
pub struct InMemoryCaseRepository {
    cases: RwLock<HashMap<String, Case>>,
}

#[async_trait::async_trait]
impl CaseRepository for InMemoryCaseRepository {
    async fn find_by_id(&self, id: &CaseId) -> Result<Option<Case>, RepositoryError> {
        let cases = self.cases.read().await;
        Ok(cases.get(&id.0).cloned())
    }

    async fn save(&self, case: Case) -> Result<(), RepositoryError> {
        let mut cases = self.cases.write().await;
        cases.insert(case.id.0.clone(), case);
        Ok(())
    }

    async fn list_open(&self) -> Result<Vec<Case>, RepositoryError> {
        let cases = self.cases.read().await;
        let mut open: Vec<Case> = cases
            .values()
            .filter(|case| case.submitted_at.is_some() && !case.status.is_terminal())
            .cloned()
            .collect();
        open.sort_by(|left, right| left.created_at.cmp(&right.created_at).then_with(|| left.id.0.cmp(&right.id.0)));
        Ok(open)
    }

    async fn list_amendments_of(&self, id: &CaseId) -> Result<Vec<Case>, RepositoryError> {
        let cases = self.cases.read().await;
        let mut amendments: Vec<Case> =
            cases.values().filter(|case| case.amendment_of.as_ref() == Some(id)).cloned().collect();
        amendments.sort_by_key(|case| case.created_at);
        Ok(amendments)
    }
}

#[derive(Default)]
pub struct InMemoryReferenceCodeRepository {
    counters: RwLock<HashMap<i32, u64>>,
}

#[async_trait::async_trait]
impl ReferenceCodeRepository for InMemoryReferenceCodeRepository {
    async fn next_number(&self, year: i32) -> Result<u64, RepositoryError> {
        let mut counters = self.counters.write().await;
        let counter = counters.entry(year).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }
}

#[derive(Default)]
pub struct InMemoryAuditRepository {
    events: RwLock<Vec<AuditEvent>>,
}

impl InMemoryAuditRepository {
    pub async fn all(&self) -> Vec<AuditEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait::async_trait]
impl AuditRepository for InMemoryAuditRepository {
    async fn append(&self, events: Vec<AuditEvent>) -> Result<(), RepositoryError> {
        self.events.write().await.extend(events);
        Ok(())
    }

    async fn list_for_case(&self, case_id: &CaseId) -> Result<Vec<AuditEvent>, RepositoryError> {
        let events = self.events.read().await;
        Ok(events.iter().filter(|event| &event.case_id == case_id).cloned().collect())
    }
}

/// Licences, decisions and processed HMRC usage ids. Usage commits also
/// append to the attached audit log.
#[derive(Default)]
pub struct InMemoryLicenceRepository {
    licences: RwLock<BTreeMap<String, Licence>>,
    decisions: RwLock<Vec<LicenceDecision>>,
    usage_data_ids: RwLock<BTreeSet<String>>,
    audit: Arc<InMemoryAuditRepository>,
}

impl InMemoryLicenceRepository {
    pub fn with_audit_log(audit: Arc<InMemoryAuditRepository>) -> Self {
        Self { audit, ..Self::default() }
    }
}

#[async_trait::async_trait]
impl LicenceRepository for InMemoryLicenceRepository {
    async fn find_by_id(&self, id: &LicenceId) -> Result<Option<Licence>, RepositoryError> {
        Ok(self.licences.read().await.get(&id.0).cloned())
    }

    async fn list_for_case(&self, case_id: &CaseId) -> Result<Vec<Licence>, RepositoryError> {
        let licences = self.licences.read().await;
        let mut found: Vec<Licence> =
            licences.values().filter(|licence| &licence.case_id == case_id).cloned().collect();
        found.sort_by_key(|licence| licence.created_at);
        Ok(found)
    }

    async fn list_open(&self) -> Result<Vec<Licence>, RepositoryError> {
        let licences = self.licences.read().await;
        let mut open: Vec<Licence> = licences
            .values()
            .filter(|licence| matches!(licence.status, LicenceStatus::Issued | LicenceStatus::Reinstated))
            .cloned()
            .collect();
        open.sort_by_key(|licence| licence.end_date);
        Ok(open)
    }

    async fn save(&self, licence: Licence) -> Result<(), RepositoryError> {
        self.licences.write().await.insert(licence.id.0.clone(), licence);
        Ok(())
    }

    async fn save_decision(&self, decision: LicenceDecision) -> Result<(), RepositoryError> {
        let mut decisions = self.decisions.write().await;
        decisions.retain(|existing| existing.id != decision.id);
        decisions.push(decision);
        Ok(())
    }

    async fn last_decision(&self, case_id: &CaseId) -> Result<Option<LicenceDecision>, RepositoryError> {
        let decisions = self.decisions.read().await;
        Ok(decisions
            .iter()
            .filter(|decision| &decision.case_id == case_id)
            .max_by_key(|decision| decision.created_at)
            .cloned())
    }

    async fn usage_data_exists(&self, usage_data_id: &str) -> Result<bool, RepositoryError> {
        Ok(self.usage_data_ids.read().await.contains(usage_data_id))
    }

    async fn commit_usage_update(&self, commit: UsageCommit) -> Result<UsageCommitted, RepositoryError> {
        let mut usage_data_ids = self.usage_data_ids.write().await;
        if usage_data_ids.contains(&commit.usage_data_id) {
            return Err(RepositoryError::Conflict(format!(
                "usage data `{}` has already been processed",
                commit.usage_data_id
            )));
        }

        let mut licences = self.licences.write().await;
        let mut targets = BTreeMap::new();
        for accepted in &commit.reports {
            if let Some(licence) = licences.get(&accepted.report.id) {
                targets
                    .entry(accepted.report.id.clone())
                    .or_insert_with(|| UsageTarget { licence: licence.clone(), case_type: accepted.case_type });
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
        let updated: Vec<Licence> = targets.into_values().map(|target| target.licence).collect();
        for licence in &updated {
            licences.insert(licence.id.0.clone(), licence.clone());
        }
        self.audit.append(sink.drain()).await?;
        usage_data_ids.insert(commit.usage_data_id);
        Ok(UsageCommitted { licences: updated, notify })
    }
}

#[derive(Default)]
pub struct InMemoryCountersignRepository {
    countersignatures: RwLock<Vec<CountersignAdvice>>,
}

#[async_trait::async_trait]
impl CountersignRepository for InMemoryCountersignRepository {
    async fn list_for_case(&self, case_id: &CaseId) -> Result<Vec<CountersignAdvice>, RepositoryError> {
        let countersignatures = self.countersignatures.read().await;
        let mut found: Vec<CountersignAdvice> =
            countersignatures.iter().filter(|advice| &advice.case_id == case_id).cloned().collect();
        found.sort_by_key(|advice| (advice.order.as_u8(), advice.created_at));
        Ok(found)
    }

    async fn save(&self, countersignature: CountersignAdvice) -> Result<(), RepositoryError> {
        let mut countersignatures = self.countersignatures.write().await;
        match countersignatures.iter_mut().find(|existing| existing.id == countersignature.id) {
            Some(existing) => *existing = countersignature,
            None => countersignatures.push(countersignature),
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryNotificationRepository {
    notifications: RwLock<Vec<(Notification, Option<DateTime<Utc>>)>>,
}

impl InMemoryNotificationRepository {
    pub async fn all(&self) -> Vec<Notification> {
        self.notifications.read().await.iter().map(|(notification, _)| notification.clone()).collect()
    }
}

#[async_trait::async_trait]
impl NotificationRepository for InMemoryNotificationRepository {
    async fn enqueue(&self, notifications: Vec<Notification>) -> Result<(), RepositoryError> {
        let mut stored = self.notifications.write().await;
        for notification in notifications {
            if stored.iter().all(|(existing, _)| existing.id != notification.id) {
                stored.push((notification, None));
            }
        }
        Ok(())
    }

    async fn list_pending(&self, limit: u32) -> Result<Vec<Notification>, RepositoryError> {
        let stored = self.notifications.read().await;
        Ok(stored
            .iter()
            .filter(|(_, sent_at)| sent_at.is_none())
            .map(|(notification, _)| notification.clone())
            .take(limit as usize)
            .collect())
    }

    async fn mark_sent(&self, id: &str, sent_at: DateTime<Utc>) -> Result<(), RepositoryError> {
        let mut stored = self.notifications.write().await;
        if let Some((_, slot)) = stored.iter_mut().find(|(notification, _)| notification.id == id) {
            *slot = Some(sent_at);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryRuleRepository {
    routing_rules: RwLock<BTreeMap<String, RoutingRule>>,
    flagging_rules: RwLock<BTreeMap<String, FlaggingRule>>,
    control_list: RwLock<BTreeMap<String, Option<String>>>,
}

#[async_trait::async_trait]
impl RuleRepository for InMemoryRuleRepository {
    async fn list_routing_rules(&self) -> Result<Vec<RoutingRule>, RepositoryError> {
        let rules = self.routing_rules.read().await;
        let mut listed: Vec<RoutingRule> = rules.values().cloned().collect();
        listed.sort_by(|left, right| {
            (left.team_id.as_str(), left.tier, left.id.as_str()).cmp(&(right.team_id.as_str(), right.tier, right.id.as_str()))
        });
        Ok(listed)
    }

    async fn list_flagging_rules(&self) -> Result<Vec<FlaggingRule>, RepositoryError> {
        Ok(self.flagging_rules.read().await.values().cloned().collect())
    }

    async fn control_list(&self) -> Result<ControlListTree, RepositoryError> {
        let entries = self.control_list.read().await;
        Ok(ControlListTree::new(
            entries.iter().filter_map(|(rating, parent)| parent.clone().map(|parent| (rating.clone(), parent))),
        ))
    }

    async fn save_routing_rule(&self, rule: RoutingRule) -> Result<(), RepositoryError> {
        self.routing_rules.write().await.insert(rule.id.clone(), rule);
        Ok(())
    }

    async fn save_flagging_rule(&self, rule: FlaggingRule) -> Result<(), RepositoryError> {
        self.flagging_rules.write().await.insert(rule.id.clone(), rule);
        Ok(())
    }

    async fn save_control_list_entry(&self, rating: &str, parent: Option<&str>) -> Result<(), RepositoryError> {
        self.control_list.write().await.insert(rating.to_owned(), parent.map(str::to_owned));
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemorySlaRepository {
    queries: RwLock<BTreeMap<String, (CaseId, QueryWindow)>>,
    queues: RwLock<BTreeMap<String, Option<String>>>,
    queue_days: RwLock<HashMap<(String, String), u32>>,
    department_days: RwLock<HashMap<(String, String), u32>>,
}

#[async_trait::async_trait]
impl SlaRepository for InMemorySlaRepository {
    async fn list_queries(&self, case_id: &CaseId) -> Result<Vec<QueryWindow>, RepositoryError> {
        let queries = self.queries.read().await;
        let mut found: Vec<QueryWindow> =
            queries.values().filter(|(owner, _)| owner == case_id).map(|(_, query)| query.clone()).collect();
        found.sort_by_key(|query| query.created_at);
        Ok(found)
    }

    async fn save_query(&self, id: &str, case_id: &CaseId, query: QueryWindow) -> Result<(), RepositoryError> {
        self.queries.write().await.insert(id.to_owned(), (case_id.clone(), query));
        Ok(())
    }

    async fn save_queue(&self, queue_id: &str, _name: &str, department_id: Option<&str>) -> Result<(), RepositoryError> {
        self.queues.write().await.insert(queue_id.to_owned(), department_id.map(str::to_owned));
        Ok(())
    }

    async fn queue_departments(
        &self,
        queue_ids: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, Option<String>>, RepositoryError> {
        let queues = self.queues.read().await;
        Ok(queue_ids.iter().map(|id| (id.clone(), queues.get(id).cloned().flatten())).collect())
    }

    async fn increment_queue_sla(&self, case_id: &CaseId, queue_id: &str) -> Result<(), RepositoryError> {
        *self.queue_days.write().await.entry((case_id.0.clone(), queue_id.to_owned())).or_insert(0) += 1;
        Ok(())
    }

    async fn increment_department_sla(&self, case_id: &CaseId, department_id: &str) -> Result<(), RepositoryError> {
        *self.department_days.write().await.entry((case_id.0.clone(), department_id.to_owned())).or_insert(0) += 1;
        Ok(())
    }

    async fn queue_sla_days(&self, case_id: &CaseId, queue_id: &str) -> Result<u32, RepositoryError> {
        let days = self.queue_days.read().await;
        Ok(days.get(&(case_id.0.clone(), queue_id.to_owned())).copied().unwrap_or(0))
    }

    async fn department_sla_days(&self, case_id: &CaseId, department_id: &str) -> Result<u32, RepositoryError> {
        let days = self.department_days.read().await;
        Ok(days.get(&(case_id.0.clone(), department_id.to_owned())).copied().unwrap_or(0))
    }
}

#[derive(Default)]
pub struct InMemoryExecutionQueueRepository {
    tasks: RwLock<HashMap<String, ExecutionTask>>,
    transitions: RwLock<Vec<ExecutionTransitionEvent>>,
}

impl InMemoryExecutionQueueRepository {
    async fn sorted_tasks(&self, keep: impl Fn(&ExecutionTask) -> bool) -> Vec<ExecutionTask> {
        let tasks = self.tasks.read().await;
        let mut found: Vec<ExecutionTask> = tasks.values().filter(|task| keep(task)).cloned().collect();
        found.sort_by_key(|task| (task.available_at, task.created_at));
        found
    }
}

#[async_trait::async_trait]
impl ExecutionQueueRepository for InMemoryExecutionQueueRepository {
    async fn find_task_by_id(&self, id: &ExecutionTaskId) -> Result<Option<ExecutionTask>, RepositoryError> {
        Ok(self.tasks.read().await.get(&id.0).cloned())
    }

    async fn list_tasks_for_case(
        &self,
        case_id: &CaseId,
        state: Option<ExecutionTaskState>,
    ) -> Result<Vec<ExecutionTask>, RepositoryError> {
        Ok(self
            .sorted_tasks(|task| &task.case_id == case_id && state.map_or(true, |state| task.state == state))
            .await)
    }

    async fn find_unfinished_by_key(&self, key: &OperationKey) -> Result<Option<ExecutionTask>, RepositoryError> {
        let tasks = self.sorted_tasks(|task| &task.operation_key == key && !task.state.is_finished()).await;
        Ok(tasks.into_iter().max_by_key(|task| task.created_at))
    }

    async fn list_due(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<ExecutionTask>, RepositoryError> {
        let due = self.sorted_tasks(|task| task.is_due(now)).await;
        Ok(due.into_iter().take(limit as usize).collect())
    }

    async fn list_running(&self) -> Result<Vec<ExecutionTask>, RepositoryError> {
        Ok(self.sorted_tasks(|task| task.state == ExecutionTaskState::Running).await)
    }

    async fn save_task(&self, task: ExecutionTask) -> Result<(), RepositoryError> {
        self.tasks.write().await.insert(task.id.0.clone(), task);
        Ok(())
    }

    async fn append_transition(&self, transition: ExecutionTransitionEvent) -> Result<(), RepositoryError> {
        self.transitions.write().await.push(transition);
        Ok(())
    }

    async fn list_transitions_for_task(
        &self,
        task_id: &ExecutionTaskId,
    ) -> Result<Vec<ExecutionTransitionEvent>, RepositoryError> {
        let transitions = self.transitions.read().await;
        Ok(transitions.iter().filter(|transition| &transition.task_id == task_id).cloned().collect())
    }
}

/// Applies a change set across the in-memory stores while holding every
/// write lock it touches.
pub struct InMemoryUnitOfWork {
    cases: Arc<InMemoryCaseRepository>,
    licences: Arc<InMemoryLicenceRepository>,
    tasks: Arc<InMemoryExecutionQueueRepository>,
    audit: Arc<InMemoryAuditRepository>,
    notifications: Arc<InMemoryNotificationRepository>,
}

impl InMemoryUnitOfWork {
    pub fn new(
        cases: Arc<InMemoryCaseRepository>,
        licences: Arc<InMemoryLicenceRepository>,
        tasks: Arc<InMemoryExecutionQueueRepository>,
        audit: Arc<InMemoryAuditRepository>,
        notifications: Arc<InMemoryNotificationRepository>,
    ) -> Self {
        Self { cases, licences, tasks, audit, notifications }
    }
}

#[async_trait::async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn commit(&self, changes: ChangeSet) -> Result<(), RepositoryError> {
        let mut cases = self.cases.cases.write().await;
        let mut licences = self.licences.licences.write().await;
        let mut decisions = self.licences.decisions.write().await;
        let mut tasks = self.tasks.tasks.write().await;
        let mut transitions = self.tasks.transitions.write().await;
        let mut events = self.audit.events.write().await;
        let mut notifications = self.notifications.notifications.write().await;

        for case in changes.cases {
            cases.insert(case.id.0.clone(), case);
        }
        for licence in changes.licences {
            licences.insert(licence.id.0.clone(), licence);
        }
        for decision in changes.decisions {
            decisions.retain(|existing| existing.id != decision.id);
            decisions.push(decision);
        }
        for task in changes.tasks {
            tasks.insert(task.id.0.clone(), task);
        }
        transitions.extend(changes.transitions);
        events.extend(changes.events);
        for notification in changes.notifications {
            if notifications.iter().all(|(existing, _)| existing.id != notification.id) {
                notifications.push((notification, None));
            }
        }
        Ok(())
    }
}
