//! One-shot runs of the scheduled jobs, for cron or manual operation.

use std::sync::Arc;

use chrono::Utc;
use lite_runtime::{
    HmrcDeliveryWorker, LicenceExpiryService, ReqwestHmrcTransport, RuntimeSettings, SlaService, Stores,
};

use crate::commands::{with_migrated_pool, CommandResult};

fn correlation_id(command: &str) -> String {
    format!("cli-{command}-{}", Utc::now().timestamp_millis())
}

pub fn sla_update() -> CommandResult {
    let result = with_migrated_pool("sla-update", |config, pool| async move {
        let service = SlaService::new(Stores::sql(pool), RuntimeSettings::from_config(&config));
        service
            .run(Utc::now(), &correlation_id("sla-update"))
            .await
            .map_err(|error| ("job_execution", error.to_string(), 6u8))
    });

    match result {
        Ok((_, report)) if report.skipped => {
            CommandResult::success("sla-update", "not a working day; SLA counters left unchanged")
        }
        Ok((_, report)) => {
            CommandResult::success("sla-update", format!("SLA counters advanced for {} case(s)", report.updated.len()))
        }
        Err(failure) => failure,
    }
}

pub fn expire_licences() -> CommandResult {
    let result = with_migrated_pool("expire-licences", |config, pool| async move {
        let service = LicenceExpiryService::new(Stores::sql(pool), RuntimeSettings::from_config(&config));
        service
            .run(Utc::now(), &correlation_id("expire-licences"))
            .await
            .map_err(|error| ("job_execution", error.to_string(), 6u8))
    });

    match result {
        Ok((_, report)) if report.expired.is_empty() => {
            CommandResult::success("expire-licences", "no licences past their end date")
        }
        Ok((_, report)) => {
            let ids = report.expired.iter().map(|id| id.0.as_str()).collect::<Vec<_>>();
            CommandResult::success("expire-licences", format!("expired {} licence(s): {}", ids.len(), ids.join(", ")))
        }
        Err(failure) => failure,
    }
}

pub fn hmrc_deliver() -> CommandResult {
    let result = with_migrated_pool("hmrc-deliver", |config, pool| async move {
        if !config.hmrc.enabled {
            return Err(("hmrc_disabled", "hmrc.enabled is false; nothing was delivered".to_string(), 6u8));
        }
        let transport =
            ReqwestHmrcTransport::new(&config.hmrc).map_err(|error| ("hmrc_transport", error.to_string(), 6u8))?;
        let worker = HmrcDeliveryWorker::new(
            Stores::sql(pool),
            RuntimeSettings::from_config(&config),
            Arc::new(transport),
            format!("lite-cli-{}", std::process::id()),
        );
        worker.run_once(Utc::now()).await.map_err(|error| ("job_execution", error.to_string(), 6u8))
    });

    match result {
        Ok((_, report)) => CommandResult::success(
            "hmrc-deliver",
            format!("delivered {}, retried {}, failed {}", report.delivered, report.retried, report.failed),
        ),
        Err(failure) => failure,
    }
}
