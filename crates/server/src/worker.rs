use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use lite_core::config::AppConfig;
use lite_runtime::{HmrcDeliveryWorker, ReqwestHmrcTransport, RuntimeSettings, Stores, TransportError};

/// Starts the HMRC delivery loop when the integration is enabled. The loop
/// stops once `shutdown` flips to true.
pub fn spawn_delivery_loop(
    config: &AppConfig,
    stores: Stores,
    settings: RuntimeSettings,
    mut shutdown: watch::Receiver<bool>,
) -> Result<Option<JoinHandle<()>>, TransportError> {
    if !config.hmrc.enabled {
        info!(
            event_name = "hmrc.delivery.disabled",
            correlation_id = "bootstrap",
            "hmrc integration disabled, delivery loop not started"
        );
        return Ok(None);
    }

    let transport = Arc::new(ReqwestHmrcTransport::new(&config.hmrc)?);
    let worker = HmrcDeliveryWorker::new(stores, settings, transport, format!("lite-server-{}", std::process::id()));
    let poll_interval = Duration::from_secs(config.tasks.poll_interval_secs.max(1));
    info!(
        event_name = "hmrc.delivery.started",
        correlation_id = "bootstrap",
        poll_interval_secs = poll_interval.as_secs(),
        base_url = %config.hmrc.base_url,
        "hmrc delivery loop started"
    );

    Ok(Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match worker.run_once(Utc::now()).await {
                        Ok(report) if report.delivered + report.retried + report.failed > 0 => info!(
                            event_name = "hmrc.delivery.batch",
                            correlation_id = "hmrc-worker",
                            delivered = report.delivered,
                            retried = report.retried,
                            failed = report.failed,
                            "delivery batch processed"
                        ),
                        Ok(_) => {}
                        Err(failure) => error!(
                            event_name = "hmrc.delivery.batch_failed",
                            correlation_id = "hmrc-worker",
                            error = %failure,
                            "delivery batch failed"
                        ),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(event_name = "hmrc.delivery.stopped", correlation_id = "shutdown", "hmrc delivery loop stopped");
                        break;
                    }
                }
            }
        }
    })))
}

#[cfg(test)]
mod tests {
    use tokio::sync::watch;

    use lite_core::config::AppConfig;
    use lite_runtime::{RuntimeSettings, Stores};

    use super::spawn_delivery_loop;

    #[tokio::test]
    async fn nothing_starts_while_the_integration_is_disabled() {
        let (_tx, rx) = watch::channel(false);

        let handle = spawn_delivery_loop(&AppConfig::default(), Stores::in_memory(), RuntimeSettings::default(), rx)
            .expect("spawn");

        assert!(handle.is_none());
    }

    #[tokio::test]
    async fn the_loop_exits_on_shutdown() {
        let mut config = AppConfig::default();
        config.hmrc.enabled = true;
        config.hmrc.base_url = "http://127.0.0.1:9".to_owned();
        let (tx, rx) = watch::channel(false);

        let handle = spawn_delivery_loop(&config, Stores::in_memory(), RuntimeSettings::default(), rx)
            .expect("spawn")
            .expect("loop handle");
        tx.send(true).expect("signal");

        tokio::time::timeout(std::time::Duration::from_secs(5), handle).await.expect("stopped in time").expect("join");
    }
}
