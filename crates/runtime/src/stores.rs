use std::sync::Arc;

use lite_db::repositories::{
    AuditRepository, CaseRepository, CountersignRepository, ExecutionQueueRepository, InMemoryAuditRepository,
    InMemoryCaseRepository, InMemoryCountersignRepository, InMemoryExecutionQueueRepository,
    InMemoryLicenceRepository, InMemoryNotificationRepository, InMemoryReferenceCodeRepository,
    InMemoryRuleRepository, InMemorySlaRepository, InMemoryUnitOfWork, LicenceRepository, NotificationRepository,
    ReferenceCodeRepository, RuleRepository, SlaRepository, SqlAuditRepository, SqlCaseRepository,
    SqlCountersignRepository, SqlExecutionQueueRepository, SqlLicenceRepository, SqlNotificationRepository,
    SqlReferenceCodeRepository, SqlRuleRepository, SqlSlaRepository, SqlUnitOfWork, UnitOfWork,
};
use lite_db::DbPool;

/// Every repository a service may touch, behind trait objects so the same
/// services run against SQLite or the in-memory stores.
#[derive(Clone)]
pub struct Stores {
    pub cases: Arc<dyn CaseRepository>,
    pub references: Arc<dyn ReferenceCodeRepository>,
    pub licences: Arc<dyn LicenceRepository>,
    pub countersignatures: Arc<dyn CountersignRepository>,
    pub audit: Arc<dyn AuditRepository>,
    pub notifications: Arc<dyn NotificationRepository>,
    pub rules: Arc<dyn RuleRepository>,
    pub sla: Arc<dyn SlaRepository>,
    pub tasks: Arc<dyn ExecutionQueueRepository>,
    /// Writes the rows of one case save together.
    pub unit_of_work: Arc<dyn UnitOfWork>,
}

impl Stores {
    pub fn sql(pool: DbPool) -> Self {
        Self {
            cases: Arc::new(SqlCaseRepository::new(pool.clone())),
            references: Arc::new(SqlReferenceCodeRepository::new(pool.clone())),
            licences: Arc::new(SqlLicenceRepository::new(pool.clone())),
            countersignatures: Arc::new(SqlCountersignRepository::new(pool.clone())),
            audit: Arc::new(SqlAuditRepository::new(pool.clone())),
            notifications: Arc::new(SqlNotificationRepository::new(pool.clone())),
            rules: Arc::new(SqlRuleRepository::new(pool.clone())),
            sla: Arc::new(SqlSlaRepository::new(pool.clone())),
            tasks: Arc::new(SqlExecutionQueueRepository::new(pool.clone())),
            unit_of_work: Arc::new(SqlUnitOfWork::new(pool)),
        }
    }

    /// Fresh in-memory stores. Usage commits and change sets land in the
    /// same repositories the other services read.
    pub fn in_memory() -> Self {
        let cases = Arc::new(InMemoryCaseRepository::default());
        let audit = Arc::new(InMemoryAuditRepository::default());
        let licences = Arc::new(InMemoryLicenceRepository::with_audit_log(audit.clone()));
        let notifications = Arc::new(InMemoryNotificationRepository::default());
        let tasks = Arc::new(InMemoryExecutionQueueRepository::default());
        let unit_of_work = Arc::new(InMemoryUnitOfWork::new(
            cases.clone(),
            licences.clone(),
            tasks.clone(),
            audit.clone(),
            notifications.clone(),
        ));
        Self {
            cases,
            references: Arc::new(InMemoryReferenceCodeRepository::default()),
            licences,
            countersignatures: Arc::new(InMemoryCountersignRepository::default()),
            audit,
            notifications,
            rules: Arc::new(InMemoryRuleRepository::default()),
            sla: Arc::new(InMemorySlaRepository::default()),
            tasks,
            unit_of_work,
        }
    }
}
