use lite_core::config::{AppConfig, LoadOptions};
use lite_db::{connect_with_config, migrations, DbPool};
use lite_runtime::ReqwestHmrcTransport;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn new(name: &'static str, status: CheckStatus, details: impl Into<String>) -> Self {
        Self { name, status, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let checks = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => vec![
            DoctorCheck::new("config_validation", CheckStatus::Pass, "configuration loaded and validated"),
            check_hmrc_integration(&config),
            check_database(&config),
        ],
        Err(error) => vec![
            DoctorCheck::new("config_validation", CheckStatus::Fail, error.to_string()),
            DoctorCheck::new("hmrc_integration", CheckStatus::Skipped, "skipped because configuration did not load"),
            DoctorCheck::new("database", CheckStatus::Skipped, "skipped because configuration did not load"),
        ],
    };
    summarize(checks)
}

fn summarize(checks: Vec<DoctorCheck>) -> DoctorReport {
    let failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let (overall_status, summary) = if failed {
        (CheckStatus::Fail, "doctor: one or more readiness checks failed")
    } else {
        (CheckStatus::Pass, "doctor: all readiness checks passed")
    };
    DoctorReport { overall_status, summary: summary.to_string(), checks }
}

fn check_hmrc_integration(config: &AppConfig) -> DoctorCheck {
    if !config.hmrc.enabled {
        return DoctorCheck::new("hmrc_integration", CheckStatus::Skipped, "hmrc.enabled is false");
    }
    match ReqwestHmrcTransport::new(&config.hmrc) {
        Ok(_) => DoctorCheck::new(
            "hmrc_integration",
            CheckStatus::Pass,
            format!("licence updates go to `{}`", config.hmrc.base_url),
        ),
        Err(error) => DoctorCheck::new("hmrc_integration", CheckStatus::Fail, error.to_string()),
    }
}

/// Connects and counts applied migrations without applying any.
fn check_database(config: &AppConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck::new(
                "database",
                CheckStatus::Fail,
                format!("failed to initialize async runtime: {error}"),
            )
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| format!("failed to connect to database: {error}"))?;
        let applied = applied_migrations(&pool).await;
        pool.close().await;
        Ok::<Option<i64>, String>(applied)
    });

    match result {
        Ok(Some(applied)) => DoctorCheck::new(
            "database",
            CheckStatus::Pass,
            format!("connected using `{}`, {applied} migrations applied", config.database.url),
        ),
        Ok(None) => DoctorCheck::new(
            "database",
            CheckStatus::Fail,
            format!("connected using `{}` but no migrations are applied; run `lite migrate`", config.database.url),
        ),
        Err(error) => DoctorCheck::new("database", CheckStatus::Fail, error),
    }
}

async fn applied_migrations(pool: &DbPool) -> Option<i64> {
    migrations::applied_count(pool).await.ok().filter(|count| *count > 0)
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = vec![report.summary.clone()];
    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }
    lines.join("\n")
}
