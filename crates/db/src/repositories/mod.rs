use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use lite_core::audit::AuditEvent;
use lite_core::domain::advice::CountersignAdvice;
use lite_core::domain::case::{Case, CaseId, CaseTypeReference};
use lite_core::domain::execution::{
    ExecutionTask, ExecutionTaskId, ExecutionTaskState, ExecutionTransitionEvent, OperationKey,
};
use lite_core::domain::licence::{Licence, LicenceDecision, LicenceId};
use lite_core::domain::notification::Notification;
use lite_core::domain::rules::{ControlListTree, FlaggingRule, RoutingRule};
use lite_core::licensing::hmrc::LicenceUsage;
use lite_core::sla::QueryWindow;

pub mod audit;
pub mod case;
pub mod countersign;
pub(crate) mod decode;
pub mod execution_queue;
pub mod licence;
pub mod memory;
pub mod outbox;
pub mod rules;
pub mod sla;
pub mod unit_of_work;

pub use audit::SqlAuditRepository;
pub use case::{SqlCaseRepository, SqlReferenceCodeRepository};
pub use countersign::SqlCountersignRepository;
pub use execution_queue::SqlExecutionQueueRepository;
pub use licence::SqlLicenceRepository;
pub use memory::{
    InMemoryAuditRepository, InMemoryCaseRepository, InMemoryCountersignRepository,
    InMemoryExecutionQueueRepository, InMemoryLicenceRepository, InMemoryNotificationRepository,
    InMemoryReferenceCodeRepository, InMemoryRuleRepository, InMemorySlaRepository, InMemoryUnitOfWork,
};
pub use outbox::SqlNotificationRepository;
pub use rules::SqlRuleRepository;
pub use sla::SqlSlaRepository;
pub use unit_of_work::SqlUnitOfWork;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

#[async_trait]
pub trait CaseRepository: Send + Sync {
    async fn find_by_id(&self, id: &CaseId) -> Result<Option<Case>, RepositoryError>;
    async fn save(&self, case: Case) -> Result<(), RepositoryError>;
    /// Submitted cases that are not in a terminal status.
    async fn list_open(&self) -> Result<Vec<Case>, RepositoryError>;
    async fn list_amendments_of(&self, id: &CaseId) -> Result<Vec<Case>, RepositoryError>;
}

#[async_trait]
pub trait ReferenceCodeRepository: Send + Sync {
    /// Bumps the counter for `year` and returns the new value. The first
    /// call for a year returns 1.
    async fn next_number(&self, year: i32) -> Result<u64, RepositoryError>;
}

/// One HMRC usage message. Each accepted report is applied to the licence as
/// stored when the write begins, so messages for the same licence never
/// overwrite each other's usage.
#[derive(Clone, Debug, PartialEq)]
pub struct UsageCommit {
    pub usage_data_id: String,
    pub reports: Vec<AcceptedUsage>,
    pub correlation_id: String,
    pub received_at: DateTime<Utc>,
}

/// A validated licence report and the type of the case the licence is on.
#[derive(Clone, Debug, PartialEq)]
pub struct AcceptedUsage {
    pub report: LicenceUsage,
    pub case_type: CaseTypeReference,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct UsageCommitted {
    pub licences: Vec<Licence>,
    /// Licences whose new status must be delivered back to HMRC.
    pub notify: Vec<LicenceId>,
}

#[async_trait]
pub trait LicenceRepository: Send + Sync {
    async fn find_by_id(&self, id: &LicenceId) -> Result<Option<Licence>, RepositoryError>;
    async fn list_for_case(&self, case_id: &CaseId) -> Result<Vec<Licence>, RepositoryError>;
    /// Issued or reinstated licences.
    async fn list_open(&self) -> Result<Vec<Licence>, RepositoryError>;
    async fn save(&self, licence: Licence) -> Result<(), RepositoryError>;
    async fn save_decision(&self, decision: LicenceDecision) -> Result<(), RepositoryError>;
    async fn last_decision(&self, case_id: &CaseId) -> Result<Option<LicenceDecision>, RepositoryError>;
    async fn usage_data_exists(&self, usage_data_id: &str) -> Result<bool, RepositoryError>;
    /// Atomic. Fails with `Conflict` when the usage data id was already recorded.
    async fn commit_usage_update(&self, commit: UsageCommit) -> Result<UsageCommitted, RepositoryError>;
}

/// Rows produced by one case save: the case itself, licence changes and
/// decisions, HMRC deliveries, audit events and outbox notifications.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChangeSet {
    pub cases: Vec<Case>,
    pub licences: Vec<Licence>,
    pub decisions: Vec<LicenceDecision>,
    pub tasks: Vec<ExecutionTask>,
    pub transitions: Vec<ExecutionTransitionEvent>,
    pub events: Vec<AuditEvent>,
    pub notifications: Vec<Notification>,
}

#[async_trait]
pub trait UnitOfWork: Send + Sync {
    /// Writes every row of `changes` or none of them.
    async fn commit(&self, changes: ChangeSet) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait CountersignRepository: Send + Sync {
    async fn list_for_case(&self, case_id: &CaseId) -> Result<Vec<CountersignAdvice>, RepositoryError>;
    async fn save(&self, countersignature: CountersignAdvice) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn append(&self, events: Vec<AuditEvent>) -> Result<(), RepositoryError>;
    async fn list_for_case(&self, case_id: &CaseId) -> Result<Vec<AuditEvent>, RepositoryError>;
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn enqueue(&self, notifications: Vec<Notification>) -> Result<(), RepositoryError>;
    async fn list_pending(&self, limit: u32) -> Result<Vec<Notification>, RepositoryError>;
    async fn mark_sent(&self, id: &str, sent_at: DateTime<Utc>) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait RuleRepository: Send + Sync {
    async fn list_routing_rules(&self) -> Result<Vec<RoutingRule>, RepositoryError>;
    async fn list_flagging_rules(&self) -> Result<Vec<FlaggingRule>, RepositoryError>;
    async fn control_list(&self) -> Result<ControlListTree, RepositoryError>;
    async fn save_routing_rule(&self, rule: RoutingRule) -> Result<(), RepositoryError>;
    async fn save_flagging_rule(&self, rule: FlaggingRule) -> Result<(), RepositoryError>;
    async fn save_control_list_entry(&self, rating: &str, parent: Option<&str>) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait SlaRepository: Send + Sync {
    async fn list_queries(&self, case_id: &CaseId) -> Result<Vec<QueryWindow>, RepositoryError>;
    async fn save_query(&self, id: &str, case_id: &CaseId, query: QueryWindow) -> Result<(), RepositoryError>;
    async fn save_queue(&self, queue_id: &str, name: &str, department_id: Option<&str>) -> Result<(), RepositoryError>;
    /// Owning department of each requested queue; unknown queues map to `None`.
    async fn queue_departments(
        &self,
        queue_ids: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, Option<String>>, RepositoryError>;
    async fn increment_queue_sla(&self, case_id: &CaseId, queue_id: &str) -> Result<(), RepositoryError>;
    async fn increment_department_sla(&self, case_id: &CaseId, department_id: &str) -> Result<(), RepositoryError>;
    async fn queue_sla_days(&self, case_id: &CaseId, queue_id: &str) -> Result<u32, RepositoryError>;
    async fn department_sla_days(&self, case_id: &CaseId, department_id: &str) -> Result<u32, RepositoryError>;
}

#[async_trait]
pub trait ExecutionQueueRepository: Send + Sync {
    async fn find_task_by_id(&self, id: &ExecutionTaskId) -> Result<Option<ExecutionTask>, RepositoryError>;

    async fn list_tasks_for_case(
        &self,
        case_id: &CaseId,
        state: Option<ExecutionTaskState>,
    ) -> Result<Vec<ExecutionTask>, RepositoryError>;

    /// The queued, running or retrying task carrying `key`, if any.
    async fn find_unfinished_by_key(&self, key: &OperationKey) -> Result<Option<ExecutionTask>, RepositoryError>;

    /// Queued or retryable tasks whose `available_at` has passed, oldest first.
    async fn list_due(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<ExecutionTask>, RepositoryError>;

    async fn list_running(&self) -> Result<Vec<ExecutionTask>, RepositoryError>;

    async fn save_task(&self, task: ExecutionTask) -> Result<(), RepositoryError>;

    async fn append_transition(&self, transition: ExecutionTransitionEvent) -> Result<(), RepositoryError>;

    async fn list_transitions_for_task(
        &self,
        task_id: &ExecutionTaskId,
    ) -> Result<Vec<ExecutionTransitionEvent>, RepositoryError>;
}
