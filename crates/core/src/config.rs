use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub hmrc: HmrcConfig,
    pub tasks: TaskConfig,
    pub workflow: WorkflowConfig,
    pub sla: SlaConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

/// Outbound delivery to the HMRC integration and the credentials it uses
/// when calling back with usage updates.
#[derive(Clone, Debug)]
pub struct HmrcConfig {
    pub enabled: bool,
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub hawk_key_id: String,
    pub hawk_key: SecretString,
    pub inbound_key_id: String,
    pub inbound_key: SecretString,
    pub hawk_skew_secs: i64,
}

#[derive(Clone, Debug)]
pub struct TaskConfig {
    pub max_attempts: u32,
    pub retry_base_delay_secs: u64,
    pub backoff_secs: u64,
    pub poll_interval_secs: u64,
    pub claim_timeout_secs: u64,
    pub batch_size: u32,
}

#[derive(Clone, Debug)]
pub struct WorkflowConfig {
    pub countersign_routing: bool,
    pub default_licence_duration_months: u32,
}

#[derive(Clone, Debug)]
pub struct SlaConfig {
    pub cutoff_hour: u32,
    pub bank_holidays: Vec<NaiveDate>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub hmrc_enabled: Option<bool>,
    pub hmrc_base_url: Option<String>,
    pub countersign_routing: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://lite.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            hmrc: HmrcConfig {
                enabled: false,
                base_url: "http://localhost:8000".to_string(),
                request_timeout_secs: 30,
                hawk_key_id: "lite-api".to_string(),
                hawk_key: String::new().into(),
                inbound_key_id: "hmrc-integration".to_string(),
                inbound_key: String::new().into(),
                hawk_skew_secs: 60,
            },
            tasks: TaskConfig {
                max_attempts: 5,
                retry_base_delay_secs: 10,
                backoff_secs: 3600,
                poll_interval_secs: 30,
                claim_timeout_secs: 300,
                batch_size: 20,
            },
            workflow: WorkflowConfig { countersign_routing: false, default_licence_duration_months: 24 },
            sla: SlaConfig { cutoff_hour: 18, bank_holidays: Vec::new() },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("lite.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// `host:port` the HTTP server listens on.
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.server.bind_address, self.server.port)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(hmrc) = patch.hmrc {
            if let Some(enabled) = hmrc.enabled {
                self.hmrc.enabled = enabled;
            }
            if let Some(base_url) = hmrc.base_url {
                self.hmrc.base_url = base_url;
            }
            if let Some(request_timeout_secs) = hmrc.request_timeout_secs {
                self.hmrc.request_timeout_secs = request_timeout_secs;
            }
            if let Some(hawk_key_id) = hmrc.hawk_key_id {
                self.hmrc.hawk_key_id = hawk_key_id;
            }
            if let Some(hawk_key) = hmrc.hawk_key {
                self.hmrc.hawk_key = secret_value(hawk_key);
            }
            if let Some(inbound_key_id) = hmrc.inbound_key_id {
                self.hmrc.inbound_key_id = inbound_key_id;
            }
            if let Some(inbound_key) = hmrc.inbound_key {
                self.hmrc.inbound_key = secret_value(inbound_key);
            }
            if let Some(hawk_skew_secs) = hmrc.hawk_skew_secs {
                self.hmrc.hawk_skew_secs = hawk_skew_secs;
            }
        }

        if let Some(tasks) = patch.tasks {
            if let Some(max_attempts) = tasks.max_attempts {
                self.tasks.max_attempts = max_attempts;
            }
            if let Some(retry_base_delay_secs) = tasks.retry_base_delay_secs {
                self.tasks.retry_base_delay_secs = retry_base_delay_secs;
            }
            if let Some(backoff_secs) = tasks.backoff_secs {
                self.tasks.backoff_secs = backoff_secs;
            }
            if let Some(poll_interval_secs) = tasks.poll_interval_secs {
                self.tasks.poll_interval_secs = poll_interval_secs;
            }
            if let Some(claim_timeout_secs) = tasks.claim_timeout_secs {
                self.tasks.claim_timeout_secs = claim_timeout_secs;
            }
            if let Some(batch_size) = tasks.batch_size {
                self.tasks.batch_size = batch_size;
            }
        }

        if let Some(workflow) = patch.workflow {
            if let Some(countersign_routing) = workflow.countersign_routing {
                self.workflow.countersign_routing = countersign_routing;
            }
            if let Some(months) = workflow.default_licence_duration_months {
                self.workflow.default_licence_duration_months = months;
            }
        }

        if let Some(sla) = patch.sla {
            if let Some(cutoff_hour) = sla.cutoff_hour {
                self.sla.cutoff_hour = cutoff_hour;
            }
            if let Some(bank_holidays) = sla.bank_holidays {
                self.sla.bank_holidays = bank_holidays;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("LITE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("LITE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("LITE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("LITE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("LITE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LITE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("LITE_SERVER_PORT") {
            self.server.port = parse_u16("LITE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("LITE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs = parse_u64("LITE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("LITE_HMRC_ENABLED") {
            self.hmrc.enabled = parse_bool("LITE_HMRC_ENABLED", &value)?;
        }
        if let Some(value) = read_env("LITE_HMRC_BASE_URL") {
            self.hmrc.base_url = value;
        }
        if let Some(value) = read_env("LITE_HMRC_REQUEST_TIMEOUT_SECS") {
            self.hmrc.request_timeout_secs = parse_u64("LITE_HMRC_REQUEST_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("LITE_HMRC_HAWK_KEY_ID") {
            self.hmrc.hawk_key_id = value;
        }
        if let Some(value) = read_env("LITE_HMRC_HAWK_KEY") {
            self.hmrc.hawk_key = secret_value(value);
        }
        if let Some(value) = read_env("LITE_HMRC_INBOUND_KEY_ID") {
            self.hmrc.inbound_key_id = value;
        }
        if let Some(value) = read_env("LITE_HMRC_INBOUND_KEY") {
            self.hmrc.inbound_key = secret_value(value);
        }
        if let Some(value) = read_env("LITE_HMRC_HAWK_SKEW_SECS") {
            self.hmrc.hawk_skew_secs = parse_i64("LITE_HMRC_HAWK_SKEW_SECS", &value)?;
        }

        if let Some(value) = read_env("LITE_TASKS_MAX_ATTEMPTS") {
            self.tasks.max_attempts = parse_u32("LITE_TASKS_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("LITE_TASKS_RETRY_BASE_DELAY_SECS") {
            self.tasks.retry_base_delay_secs = parse_u64("LITE_TASKS_RETRY_BASE_DELAY_SECS", &value)?;
        }
        if let Some(value) = read_env("LITE_TASKS_BACKOFF_SECS") {
            self.tasks.backoff_secs = parse_u64("LITE_TASKS_BACKOFF_SECS", &value)?;
        }
        if let Some(value) = read_env("LITE_TASKS_POLL_INTERVAL_SECS") {
            self.tasks.poll_interval_secs = parse_u64("LITE_TASKS_POLL_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("LITE_TASKS_CLAIM_TIMEOUT_SECS") {
            self.tasks.claim_timeout_secs = parse_u64("LITE_TASKS_CLAIM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("LITE_TASKS_BATCH_SIZE") {
            self.tasks.batch_size = parse_u32("LITE_TASKS_BATCH_SIZE", &value)?;
        }

        if let Some(value) = read_env("LITE_WORKFLOW_COUNTERSIGN_ROUTING") {
            self.workflow.countersign_routing = parse_bool("LITE_WORKFLOW_COUNTERSIGN_ROUTING", &value)?;
        }
        if let Some(value) = read_env("LITE_WORKFLOW_DEFAULT_LICENCE_DURATION_MONTHS") {
            self.workflow.default_licence_duration_months =
                parse_u32("LITE_WORKFLOW_DEFAULT_LICENCE_DURATION_MONTHS", &value)?;
        }

        if let Some(value) = read_env("LITE_SLA_CUTOFF_HOUR") {
            self.sla.cutoff_hour = parse_u32("LITE_SLA_CUTOFF_HOUR", &value)?;
        }
        if let Some(value) = read_env("LITE_SLA_BANK_HOLIDAYS") {
            self.sla.bank_holidays = parse_dates("LITE_SLA_BANK_HOLIDAYS", &value)?;
        }

        let log_level = read_env("LITE_LOGGING_LEVEL").or_else(|| read_env("LITE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format = read_env("LITE_LOGGING_FORMAT").or_else(|| read_env("LITE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(bind_address) = overrides.bind_address {
            self.server.bind_address = bind_address;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(enabled) = overrides.hmrc_enabled {
            self.hmrc.enabled = enabled;
        }
        if let Some(base_url) = overrides.hmrc_base_url {
            self.hmrc.base_url = base_url;
        }
        if let Some(countersign_routing) = overrides.countersign_routing {
            self.workflow.countersign_routing = countersign_routing;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_hmrc(&self.hmrc)?;
        validate_tasks(&self.tasks)?;
        validate_workflow(&self.workflow)?;
        validate_sla(&self.sla)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("lite.toml"), PathBuf::from("config/lite.toml")].into_iter().find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value =
                env::var(&key).map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url = url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)".to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation("database.max_connections must be greater than zero".to_string()));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation("database.timeout_secs must be in range 1..=300".to_string()));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_hmrc(hmrc: &HmrcConfig) -> Result<(), ConfigError> {
    if hmrc.request_timeout_secs == 0 || hmrc.request_timeout_secs > 300 {
        return Err(ConfigError::Validation("hmrc.request_timeout_secs must be in range 1..=300".to_string()));
    }
    if hmrc.hawk_skew_secs <= 0 {
        return Err(ConfigError::Validation("hmrc.hawk_skew_secs must be greater than zero".to_string()));
    }
    if !hmrc.enabled {
        return Ok(());
    }

    if !hmrc.base_url.starts_with("http://") && !hmrc.base_url.starts_with("https://") {
        return Err(ConfigError::Validation("hmrc.base_url must start with http:// or https://".to_string()));
    }
    if hmrc.hawk_key.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "hmrc.hawk_key is required when hmrc.enabled is true (set LITE_HMRC_HAWK_KEY)".to_string(),
        ));
    }
    if hmrc.inbound_key.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "hmrc.inbound_key is required when hmrc.enabled is true (set LITE_HMRC_INBOUND_KEY)".to_string(),
        ));
    }

    Ok(())
}

const MAX_TASK_ATTEMPTS: u32 = 32;
const MAX_TASK_DELAY_SECS: u64 = 30 * 24 * 60 * 60;

fn validate_tasks(tasks: &TaskConfig) -> Result<(), ConfigError> {
    if tasks.max_attempts == 0 || tasks.max_attempts > MAX_TASK_ATTEMPTS {
        return Err(ConfigError::Validation(format!("tasks.max_attempts must be in range 1..={MAX_TASK_ATTEMPTS}")));
    }
    if tasks.backoff_secs == 0 {
        return Err(ConfigError::Validation("tasks.backoff_secs must be greater than zero".to_string()));
    }
    for (key, value) in [
        ("tasks.backoff_secs", tasks.backoff_secs),
        ("tasks.retry_base_delay_secs", tasks.retry_base_delay_secs),
        ("tasks.claim_timeout_secs", tasks.claim_timeout_secs),
    ] {
        if value > MAX_TASK_DELAY_SECS {
            return Err(ConfigError::Validation(format!("{key} must not exceed {MAX_TASK_DELAY_SECS} seconds")));
        }
    }
    if tasks.poll_interval_secs == 0 {
        return Err(ConfigError::Validation("tasks.poll_interval_secs must be greater than zero".to_string()));
    }
    if tasks.batch_size == 0 {
        return Err(ConfigError::Validation("tasks.batch_size must be greater than zero".to_string()));
    }
    Ok(())
}

fn validate_workflow(workflow: &WorkflowConfig) -> Result<(), ConfigError> {
    if workflow.default_licence_duration_months == 0 || workflow.default_licence_duration_months > 120 {
        return Err(ConfigError::Validation(
            "workflow.default_licence_duration_months must be in range 1..=120".to_string(),
        ));
    }
    Ok(())
}

fn validate_sla(sla: &SlaConfig) -> Result<(), ConfigError> {
    if sla.cutoff_hour > 23 {
        return Err(ConfigError::Validation("sla.cutoff_hour must be in range 0..=23".to_string()));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation("logging.level must be one of trace|debug|info|warn|error".to_string())),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| invalid(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid(key, value))
}

fn parse_i64(key: &str, value: &str) -> Result<i64, ConfigError> {
    value.parse::<i64>().map_err(|_| invalid(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| invalid(key, value))
}

/// Comma separated `YYYY-MM-DD` list.
fn parse_dates(key: &str, value: &str) -> Result<Vec<NaiveDate>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| NaiveDate::parse_from_str(item, "%Y-%m-%d").map_err(|_| invalid(key, value)))
        .collect()
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    hmrc: Option<HmrcPatch>,
    tasks: Option<TasksPatch>,
    workflow: Option<WorkflowPatch>,
    sla: Option<SlaPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct HmrcPatch {
    enabled: Option<bool>,
    base_url: Option<String>,
    request_timeout_secs: Option<u64>,
    hawk_key_id: Option<String>,
    hawk_key: Option<String>,
    inbound_key_id: Option<String>,
    inbound_key: Option<String>,
    hawk_skew_secs: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct TasksPatch {
    max_attempts: Option<u32>,
    retry_base_delay_secs: Option<u64>,
    backoff_secs: Option<u64>,
    poll_interval_secs: Option<u64>,
    claim_timeout_secs: Option<u64>,
    batch_size: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    countersign_routing: Option<bool>,
    default_licence_duration_months: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct SlaPatch {
    cutoff_hour: Option<u32>,
    bank_holidays: Option<Vec<NaiveDate>>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use chrono::NaiveDate;
    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_validate_without_a_file() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config =
            AppConfig::load(LoadOptions::default()).map_err(|err| format!("config load failed: {err}"))?;

        ensure(!config.hmrc.enabled, "hmrc delivery should be off by default")?;
        ensure(config.tasks.backoff_secs == 3600, "reschedule delay should default to an hour")?;
        ensure(!config.workflow.countersign_routing, "countersign routing should be off by default")?;
        ensure(config.sla.cutoff_hour == 18, "sla cutoff should default to 18:00")?;
        ensure(config.listen_address() == "127.0.0.1:8080", "default listen address")?;
        ensure(matches!(config.logging.format, LogFormat::Compact), "default logging format should be compact")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_LITE_HAWK_KEY", "outbound-from-env");
        env::set_var("TEST_LITE_INBOUND_KEY", "inbound-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("lite.toml");
            fs::write(
                &path,
                r#"
[hmrc]
enabled = true
base_url = "https://hmrc.internal"
hawk_key = "${TEST_LITE_HAWK_KEY}"
inbound_key = "${TEST_LITE_INBOUND_KEY}"

[sla]
bank_holidays = [2026-12-25, 2026-12-28]
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.hmrc.hawk_key.expose_secret() == "outbound-from-env", "hawk key from environment")?;
            ensure(config.hmrc.inbound_key.expose_secret() == "inbound-from-env", "inbound key from environment")?;
            ensure(
                config.sla.bank_holidays.first() == NaiveDate::from_ymd_opt(2026, 12, 25).as_ref(),
                "bank holidays should be read from the file",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_LITE_HAWK_KEY", "TEST_LITE_INBOUND_KEY"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LITE_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("LITE_WORKFLOW_COUNTERSIGN_ROUTING", "true");
        env::set_var("LITE_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("lite.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[workflow]
countersign_routing = false

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.database.url == "sqlite://from-override.db", "override database url should win")?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.workflow.countersign_routing, "env should win over the file")?;
            ensure(matches!(config.logging.format, LogFormat::Json), "log format alias should be honoured")?;
            Ok(())
        })();

        clear_vars(&["LITE_DATABASE_URL", "LITE_WORKFLOW_COUNTERSIGN_ROUTING", "LITE_LOG_FORMAT"]);
        result
    }

    #[test]
    fn enabling_hmrc_without_keys_fails_validation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LITE_HMRC_ENABLED", "true");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected validation failure but config load succeeded".to_string()),
                Err(error) => error,
            };
            let has_message =
                matches!(error, ConfigError::Validation(ref message) if message.contains("hmrc.hawk_key"));
            ensure(has_message, "validation failure should mention hmrc.hawk_key")
        })();

        clear_vars(&["LITE_HMRC_ENABLED"]);
        result
    }

    #[test]
    fn unbounded_retry_settings_fail_validation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let result = (|| -> Result<(), String> {
            env::set_var("LITE_TASKS_MAX_ATTEMPTS", "1000");
            let attempts = AppConfig::load(LoadOptions::default());
            ensure(
                matches!(attempts, Err(ConfigError::Validation(ref message)) if message.contains("tasks.max_attempts")),
                "a thousand attempts should be refused",
            )?;

            env::set_var("LITE_TASKS_MAX_ATTEMPTS", "32");
            env::set_var("LITE_TASKS_BACKOFF_SECS", "18446744073709551615");
            let backoff = AppConfig::load(LoadOptions::default());
            ensure(
                matches!(backoff, Err(ConfigError::Validation(ref message)) if message.contains("tasks.backoff_secs")),
                "a reschedule window beyond thirty days should be refused",
            )?;

            env::remove_var("LITE_TASKS_BACKOFF_SECS");
            AppConfig::load(LoadOptions::default()).map(|_| ()).map_err(|err| format!("32 attempts should load: {err}"))
        })();

        clear_vars(&["LITE_TASKS_MAX_ATTEMPTS", "LITE_TASKS_BACKOFF_SECS"]);
        result
    }

    #[test]
    fn malformed_env_values_are_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LITE_SLA_BANK_HOLIDAYS", "2026-12-25,christmas");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected an env override failure".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(error, ConfigError::InvalidEnvOverride { ref key, .. } if key == "LITE_SLA_BANK_HOLIDAYS"),
                "error should name the offending variable",
            )
        })();

        clear_vars(&["LITE_SLA_BANK_HOLIDAYS"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LITE_HMRC_HAWK_KEY", "outbound-secret-value");
        env::set_var("LITE_HMRC_INBOUND_KEY", "inbound-secret-value");

        let result = (|| -> Result<(), String> {
            let config =
                AppConfig::load(LoadOptions::default()).map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("outbound-secret-value"), "debug output should not contain the hawk key")?;
            ensure(!debug.contains("inbound-secret-value"), "debug output should not contain the inbound key")?;
            Ok(())
        })();

        clear_vars(&["LITE_HMRC_HAWK_KEY", "LITE_HMRC_INBOUND_KEY"]);
        result
    }
}
