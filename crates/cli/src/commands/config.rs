use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use lite_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let path = detect_config_path();
    let document = path.as_deref().and_then(load_document);

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_key) in entries(&config) {
        let source = field_source(key, env_key, document.as_ref(), path.as_deref());
        lines.push(format!("- {key} = {value} (source: {source})"));
    }
    lines.join("\n")
}

fn entries(config: &AppConfig) -> Vec<(&'static str, String, &'static str)> {
    let bank_holidays = config.sla.bank_holidays.iter().map(ToString::to_string).collect::<Vec<_>>();
    vec![
        ("database.url", config.database.url.clone(), "LITE_DATABASE_URL"),
        ("database.max_connections", config.database.max_connections.to_string(), "LITE_DATABASE_MAX_CONNECTIONS"),
        ("database.timeout_secs", config.database.timeout_secs.to_string(), "LITE_DATABASE_TIMEOUT_SECS"),
        ("server.bind_address", config.server.bind_address.clone(), "LITE_SERVER_BIND_ADDRESS"),
        ("server.port", config.server.port.to_string(), "LITE_SERVER_PORT"),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            "LITE_SERVER_GRACEFUL_SHUTDOWN_SECS",
        ),
        ("hmrc.enabled", config.hmrc.enabled.to_string(), "LITE_HMRC_ENABLED"),
        ("hmrc.base_url", config.hmrc.base_url.clone(), "LITE_HMRC_BASE_URL"),
        ("hmrc.request_timeout_secs", config.hmrc.request_timeout_secs.to_string(), "LITE_HMRC_REQUEST_TIMEOUT_SECS"),
        ("hmrc.hawk_key_id", config.hmrc.hawk_key_id.clone(), "LITE_HMRC_HAWK_KEY_ID"),
        ("hmrc.hawk_key", redact(&config.hmrc.hawk_key), "LITE_HMRC_HAWK_KEY"),
        ("hmrc.inbound_key_id", config.hmrc.inbound_key_id.clone(), "LITE_HMRC_INBOUND_KEY_ID"),
        ("hmrc.inbound_key", redact(&config.hmrc.inbound_key), "LITE_HMRC_INBOUND_KEY"),
        ("hmrc.hawk_skew_secs", config.hmrc.hawk_skew_secs.to_string(), "LITE_HMRC_HAWK_SKEW_SECS"),
        ("tasks.max_attempts", config.tasks.max_attempts.to_string(), "LITE_TASKS_MAX_ATTEMPTS"),
        ("tasks.poll_interval_secs", config.tasks.poll_interval_secs.to_string(), "LITE_TASKS_POLL_INTERVAL_SECS"),
        ("tasks.batch_size", config.tasks.batch_size.to_string(), "LITE_TASKS_BATCH_SIZE"),
        (
            "workflow.countersign_routing",
            config.workflow.countersign_routing.to_string(),
            "LITE_WORKFLOW_COUNTERSIGN_ROUTING",
        ),
        (
            "workflow.default_licence_duration_months",
            config.workflow.default_licence_duration_months.to_string(),
            "LITE_WORKFLOW_DEFAULT_LICENCE_DURATION_MONTHS",
        ),
        ("sla.cutoff_hour", config.sla.cutoff_hour.to_string(), "LITE_SLA_CUTOFF_HOUR"),
        ("sla.bank_holidays", format!("[{}]", bank_holidays.join(", ")), "LITE_SLA_BANK_HOLIDAYS"),
        ("logging.level", config.logging.level.clone(), "LITE_LOGGING_LEVEL"),
        ("logging.format", format!("{:?}", config.logging.format).to_lowercase(), "LITE_LOGGING_FORMAT"),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("lite.toml"), PathBuf::from("config/lite.toml")].into_iter().find(|path| path.exists())
}

fn load_document(path: &Path) -> Option<Value> {
    fs::read_to_string(path).ok()?.parse::<Value>().ok()
}

fn field_source(key_path: &str, env_key: &str, document: Option<&Value>, path: Option<&Path>) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if document.is_some_and(|doc| contains_path(doc, key_path)) {
        let file = path.map(|path| path.display().to_string()).unwrap_or_else(|| "config file".to_string());
        return format!("file ({file})");
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn redact(secret: &SecretString) -> String {
    if secret.expose_secret().trim().is_empty() {
        "<empty>".to_string()
    } else {
        "<redacted>".to_string()
    }
}
