use std::collections::BTreeSet;

use lite_core::config::AppConfig;
use lite_core::execution_engine::ExecutionEngineConfig;
use lite_core::flows::FlowContext;
use lite_core::sla::SlaCalendar;

/// The slice of [`AppConfig`] the services read.
#[derive(Clone, Debug)]
pub struct RuntimeSettings {
    pub countersign_routing: bool,
    pub default_licence_duration_months: u32,
    pub execution: ExecutionEngineConfig,
    pub calendar: SlaCalendar,
    pub batch_size: u32,
}

impl RuntimeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let tasks = &config.tasks;
        Self {
            countersign_routing: config.workflow.countersign_routing,
            default_licence_duration_months: config.workflow.default_licence_duration_months,
            execution: ExecutionEngineConfig {
                claim_timeout_seconds: seconds(tasks.claim_timeout_secs),
                default_max_retries: tasks.max_attempts,
                retry_backoff_multiplier: 2,
                retry_base_delay_seconds: seconds(tasks.retry_base_delay_secs),
                reschedule_delay_seconds: seconds(tasks.backoff_secs),
            },
            calendar: SlaCalendar::new(
                config.sla.bank_holidays.iter().copied().collect::<BTreeSet<_>>(),
                config.sla.cutoff_hour,
            ),
            batch_size: tasks.batch_size.max(1),
        }
    }

    pub fn flow_context(&self, has_issued_licence: bool) -> FlowContext {
        FlowContext { has_issued_licence, countersign_routing: self.countersign_routing }
    }
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

fn seconds(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
