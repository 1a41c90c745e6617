use std::env;
use std::sync::{Mutex, OnceLock};

use lite_cli::commands::{jobs, migrate, seed, start};
use serde_json::Value;

const MEMORY_DB: (&str, &str) = ("LITE_DATABASE_URL", "sqlite::memory:");

#[test]
fn start_returns_success_with_valid_env() {
    with_env(&[MEMORY_DB], || {
        let result = start::run();
        assert_eq!(result.exit_code, 0, "expected successful start preflight");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "start");
        assert_eq!(payload["status"], "ok");
        assert!(payload["message"].as_str().unwrap_or_default().contains("127.0.0.1:8080"));
    });
}

#[test]
fn start_returns_config_failure_for_non_sqlite_url() {
    with_env(&[("LITE_DATABASE_URL", "postgres://localhost/lite")], || {
        let result = start::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "start");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn enabling_hmrc_without_keys_is_a_config_failure() {
    with_env(&[MEMORY_DB, ("LITE_HMRC_ENABLED", "true")], || {
        let result = jobs::hmrc_deliver();
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "config_validation");
        assert!(payload["message"].as_str().unwrap_or_default().contains("hmrc.hawk_key"));
    });
}

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[MEMORY_DB], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn seed_lists_the_demo_cases() {
    with_env(&[MEMORY_DB], || {
        let result = seed::run();
        assert_eq!(result.exit_code, 0, "expected seed success: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "seed");
        assert_eq!(payload["status"], "ok");
        let message = payload["message"].as_str().unwrap_or_default();
        assert!(message.starts_with("demo dataset loaded"));
        assert!(message.contains("case-demo-submitted-001"));
    });
}

#[test]
fn seed_is_repeatable_against_the_same_database() {
    let dir = tempdir();
    let url = format!("sqlite://{}", dir.join("lite-seed.db").display());
    with_env(&[("LITE_DATABASE_URL", url.as_str())], || {
        let first = seed::run();
        assert_eq!(first.exit_code, 0, "expected first seed success: {}", first.output);

        let second = seed::run();
        assert_eq!(second.exit_code, 0, "expected second seed success: {}", second.output);

        assert_eq!(parse_payload(&first.output)["message"], parse_payload(&second.output)["message"]);
    });
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn scheduled_jobs_run_against_an_empty_database() {
    with_env(&[MEMORY_DB], || {
        let sla = jobs::sla_update();
        assert_eq!(sla.exit_code, 0, "sla-update: {}", sla.output);
        assert_eq!(parse_payload(&sla.output)["command"], "sla-update");

        let expiry = jobs::expire_licences();
        assert_eq!(expiry.exit_code, 0, "expire-licences: {}", expiry.output);
        assert_eq!(parse_payload(&expiry.output)["message"], "no licences past their end date");
    });
}

#[test]
fn hmrc_deliver_refuses_while_the_integration_is_disabled() {
    with_env(&[MEMORY_DB], || {
        let result = jobs::hmrc_deliver();
        assert_eq!(result.exit_code, 6);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "hmrc_disabled");
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn tempdir() -> std::path::PathBuf {
    let dir = env::temp_dir().join(format!("lite-cli-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "LITE_DATABASE_URL",
        "LITE_DATABASE_MAX_CONNECTIONS",
        "LITE_DATABASE_TIMEOUT_SECS",
        "LITE_SERVER_BIND_ADDRESS",
        "LITE_SERVER_PORT",
        "LITE_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "LITE_HMRC_ENABLED",
        "LITE_HMRC_BASE_URL",
        "LITE_HMRC_HAWK_KEY",
        "LITE_HMRC_INBOUND_KEY",
        "LITE_WORKFLOW_COUNTERSIGN_ROUTING",
        "LITE_SLA_BANK_HOLIDAYS",
        "LITE_LOGGING_LEVEL",
        "LITE_LOGGING_FORMAT",
        "LITE_LOG_LEVEL",
        "LITE_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> = keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
