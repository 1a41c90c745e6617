use std::collections::BTreeMap;

use chrono::Utc;
use tracing::info;

use lite_core::domain::case::Case;
use lite_core::domain::licence::LicenceId;
use lite_core::errors::{ApplicationError, DomainError};
use lite_core::execution_engine::DeterministicExecutionEngine;
use lite_core::licensing::hmrc::{validate_usage_update, UsageTarget, UsageUpdateRequest, UsageUpdateResponse};
use lite_db::repositories::{AcceptedUsage, RepositoryError, UsageCommit};

use crate::error::persistence;
use crate::scheduling::HmrcScheduler;
use crate::settings::RuntimeSettings;
use crate::stores::Stores;

/// Applies licence usage reported by HMRC. Every accepted licence in one
/// report is committed together against the stored usage, and a report id
/// is only ever processed once.
#[derive(Clone)]
pub struct UsageUpdateService {
    stores: Stores,
    scheduler: HmrcScheduler,
}

impl UsageUpdateService {
    pub fn new(stores: Stores, settings: RuntimeSettings) -> Self {
        let scheduler =
            HmrcScheduler::new(stores.tasks.clone(), DeterministicExecutionEngine::with_config(settings.execution));
        Self { stores, scheduler }
    }

    pub async fn process(
        &self,
        request: UsageUpdateRequest,
        correlation_id: &str,
    ) -> Result<UsageUpdateResponse, ApplicationError> {
        let usage_data_id = request.usage_data_id.trim().to_owned();
        if usage_data_id.is_empty() {
            return Err(DomainError::field("usage_data_id", "This field is required.").into());
        }
        if self.stores.licences.usage_data_exists(&usage_data_id).await.map_err(persistence)? {
            return Err(already_updated(&usage_data_id));
        }

        let (targets, cases) = self.load_targets(&request).await?;
        let validation = validate_usage_update(&request, &targets);
        let reports: Vec<AcceptedUsage> = validation
            .accepted
            .iter()
            .filter_map(|reported| {
                let target = targets.get(&reported.id)?;
                Some(AcceptedUsage { report: reported.clone(), case_type: target.case_type })
            })
            .collect();

        let now = Utc::now();
        let committed = match self
            .stores
            .licences
            .commit_usage_update(UsageCommit {
                usage_data_id: usage_data_id.clone(),
                reports,
                correlation_id: correlation_id.to_owned(),
                received_at: now,
            })
            .await
        {
            Ok(committed) => committed,
            Err(RepositoryError::Conflict(_)) => return Err(already_updated(&usage_data_id)),
            Err(error) => return Err(persistence(error)),
        };

        for licence_id in &committed.notify {
            let licence = committed.licences.iter().find(|licence| &licence.id == licence_id);
            if let (Some(licence), Some(case)) = (licence, cases.get(&licence_id.0)) {
                self.scheduler.schedule(case, licence, correlation_id, now).await?;
            }
        }

        info!(
            event_name = "hmrc.usage.processed",
            correlation_id = %correlation_id,
            usage_data_id = %usage_data_id,
            accepted = validation.accepted.len(),
            rejected = validation.rejected.len(),
            "usage update processed"
        );
        Ok(validation.into_response(usage_data_id))
    }

    /// Every reported licence that exists, keyed by licence id, with the case
    /// it was issued on.
    async fn load_targets(
        &self,
        request: &UsageUpdateRequest,
    ) -> Result<(BTreeMap<String, UsageTarget>, BTreeMap<String, Case>), ApplicationError> {
        let mut targets = BTreeMap::new();
        let mut cases = BTreeMap::new();
        for reported in &request.licences {
            if targets.contains_key(&reported.id) {
                continue;
            }
            let Some(licence) =
                self.stores.licences.find_by_id(&LicenceId(reported.id.clone())).await.map_err(persistence)?
            else {
                continue;
            };
            let Some(case) = self.stores.cases.find_by_id(&licence.case_id).await.map_err(persistence)? else {
                continue;
            };
            targets.insert(reported.id.clone(), UsageTarget { licence, case_type: case.case_type });
            cases.insert(reported.id.clone(), case);
        }
        Ok((targets, cases))
    }
}

fn already_updated(usage_data_id: &str) -> ApplicationError {
    DomainError::field("usage_data_id", format!("Usage data with id '{usage_data_id}' has already been updated")).into()
}
