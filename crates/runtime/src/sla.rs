use chrono::{DateTime, Utc};
use tracing::info;

use lite_core::audit::{AuditContext, AuditEvent, AuditVerb};
use lite_core::domain::case::CaseId;
use lite_core::errors::ApplicationError;
use lite_core::sla::{has_active_query, plan_update, tick, SlaCalendar, SlaSubject};

use crate::error::persistence;
use crate::settings::RuntimeSettings;
use crate::stores::Stores;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SlaRunReport {
    /// Set on weekends and bank holidays, when nothing is counted.
    pub skipped: bool,
    pub updated: Vec<CaseId>,
}

/// Runs the once-a-day working-day counter update.
#[derive(Clone)]
pub struct SlaService {
    stores: Stores,
    calendar: SlaCalendar,
}

impl SlaService {
    pub fn new(stores: Stores, settings: RuntimeSettings) -> Self {
        Self { stores, calendar: settings.calendar }
    }

    pub async fn run(&self, now: DateTime<Utc>, correlation_id: &str) -> Result<SlaRunReport, ApplicationError> {
        if !self.calendar.is_working_day(now.date_naive()) {
            info!(
                event_name = "sla.update.skipped",
                correlation_id = %correlation_id,
                date = %now.date_naive(),
                "not a working day"
            );
            return Ok(SlaRunReport { skipped: true, updated: Vec::new() });
        }

        let mut subjects = Vec::new();
        for case in self.stores.cases.list_open().await.map_err(persistence)? {
            let queries = self.stores.sla.list_queries(&case.id).await.map_err(persistence)?;
            let queue_departments = self.stores.sla.queue_departments(&case.queues).await.map_err(persistence)?;
            subjects.push(SlaSubject {
                has_active_query: has_active_query(&queries, now, &self.calendar),
                queue_departments,
                case,
            });
        }

        let Some(plan) = plan_update(&subjects, now, &self.calendar) else {
            return Ok(SlaRunReport { skipped: true, updated: Vec::new() });
        };

        let audit = AuditContext::system(correlation_id);
        let mut events = Vec::with_capacity(plan.cases.len());
        for subject in subjects.iter_mut().filter(|subject| plan.cases.contains(&subject.case.id)) {
            let case = &mut subject.case;
            tick(case, now);
            self.stores.cases.save(case.clone()).await.map_err(persistence)?;
            events.push(
                AuditEvent::success(case.id.clone(), AuditVerb::SlaUpdated, &audit)
                    .with_payload("sla_days", case.sla_days)
                    .with_payload("sla_remaining_days", case.sla_remaining_days),
            );
        }
        for (case_id, queue_id) in &plan.queue_increments {
            self.stores.sla.increment_queue_sla(case_id, queue_id).await.map_err(persistence)?;
        }
        for (case_id, department_id) in &plan.department_increments {
            self.stores.sla.increment_department_sla(case_id, department_id).await.map_err(persistence)?;
        }
        self.stores.audit.append(events).await.map_err(persistence)?;

        info!(
            event_name = "sla.update.completed",
            correlation_id = %correlation_id,
            cases = plan.cases.len(),
            queue_increments = plan.queue_increments.len(),
            department_increments = plan.department_increments.len(),
            "sla counters updated"
        );
        Ok(SlaRunReport { skipped: false, updated: plan.cases })
    }
}
