use chrono::{DateTime, Utc};
use tracing::{info, warn};

use lite_core::audit::{AuditContext, AuditEvent, AuditVerb};
use lite_core::domain::licence::LicenceId;
use lite_core::errors::ApplicationError;
use lite_core::execution_engine::DeterministicExecutionEngine;
use lite_core::licensing::licences_to_expire;
use lite_db::repositories::ChangeSet;

use crate::error::persistence;
use crate::scheduling::HmrcScheduler;
use crate::settings::RuntimeSettings;
use crate::stores::Stores;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExpiryReport {
    pub expired: Vec<LicenceId>,
}

/// Daily job moving open licences past their end date to `expired`.
#[derive(Clone)]
pub struct LicenceExpiryService {
    stores: Stores,
    scheduler: HmrcScheduler,
}

impl LicenceExpiryService {
    pub fn new(stores: Stores, settings: RuntimeSettings) -> Self {
        let scheduler =
            HmrcScheduler::new(stores.tasks.clone(), DeterministicExecutionEngine::with_config(settings.execution));
        Self { stores, scheduler }
    }

    pub async fn run(&self, now: DateTime<Utc>, correlation_id: &str) -> Result<ExpiryReport, ApplicationError> {
        let open = self.stores.licences.list_open().await.map_err(persistence)?;
        let due: Vec<_> = licences_to_expire(&open, now.date_naive()).into_iter().cloned().collect();
        let audit = AuditContext::system(correlation_id);

        let mut report = ExpiryReport::default();
        for mut licence in due {
            if let Err(error) = licence.expire(now) {
                warn!(
                    event_name = "licence.expiry.skipped",
                    correlation_id = %correlation_id,
                    licence_id = %licence.id.0,
                    error = %error,
                    "licence could not be expired"
                );
                continue;
            }
            let mut changes = ChangeSet {
                events: vec![AuditEvent::success(licence.case_id.clone(), AuditVerb::LicenceUpdatedStatus, &audit)
                    .with_payload("licence", licence.reference_code.clone())
                    .with_payload("status", licence.status.as_str())],
                ..ChangeSet::default()
            };
            if let Some(case) = self.stores.cases.find_by_id(&licence.case_id).await.map_err(persistence)? {
                self.scheduler.plan(&case, &licence, correlation_id, now, &mut changes).await?;
            }
            changes.licences.push(licence.clone());
            self.stores.unit_of_work.commit(changes).await.map_err(persistence)?;
            report.expired.push(licence.id);
        }

        info!(
            event_name = "licence.expiry.completed",
            correlation_id = %correlation_id,
            expired = report.expired.len(),
            "licence expiry run completed"
        );
        Ok(report)
    }
}
