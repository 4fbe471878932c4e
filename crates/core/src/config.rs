use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::warning::WarningLevel;

#[derive(Clone, Debug, Serialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub broker: BrokerConfig,
    pub guardian: GuardianConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct BrokerConfig {
    /// Pause after a handler failure before the loop waits again.
    pub handler_backoff_ms: u64,
    pub history_limit_max: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct GuardianConfig {
    pub agent_id: String,
    pub conversational_agent_id: String,
    /// Lowest warning level that triggers a veto.
    pub veto_threshold: WarningLevel,
}

#[derive(Clone, Debug, Serialize)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug, Serialize)]
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
    pub port: Option<u16>,
    pub veto_threshold: Option<WarningLevel>,
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
                url: "sqlite://alcoguard.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            broker: BrokerConfig { handler_backoff_ms: 1_000, history_limit_max: 1_000 },
            guardian: GuardianConfig {
                agent_id: "guardian".to_string(),
                conversational_agent_id: "bartender".to_string(),
                veto_threshold: WarningLevel::Warning,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
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
            config.apply_patch(patch)?;
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from("alcoguard.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
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

        if let Some(broker) = patch.broker {
            if let Some(handler_backoff_ms) = broker.handler_backoff_ms {
                self.broker.handler_backoff_ms = handler_backoff_ms;
            }
            if let Some(history_limit_max) = broker.history_limit_max {
                self.broker.history_limit_max = history_limit_max;
            }
        }

        if let Some(guardian) = patch.guardian {
            if let Some(agent_id) = guardian.agent_id {
                self.guardian.agent_id = agent_id;
            }
            if let Some(conversational_agent_id) = guardian.conversational_agent_id {
                self.guardian.conversational_agent_id = conversational_agent_id;
            }
            if let Some(veto_threshold) = guardian.veto_threshold {
                self.guardian.veto_threshold = parse_level("guardian.veto_threshold", &veto_threshold)?;
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

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("ALCOGUARD_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("ALCOGUARD_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("ALCOGUARD_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("ALCOGUARD_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("ALCOGUARD_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("ALCOGUARD_BROKER_HANDLER_BACKOFF_MS") {
            self.broker.handler_backoff_ms =
                parse_u64("ALCOGUARD_BROKER_HANDLER_BACKOFF_MS", &value)?;
        }
        if let Some(value) = read_env("ALCOGUARD_BROKER_HISTORY_LIMIT_MAX") {
            self.broker.history_limit_max =
                parse_usize("ALCOGUARD_BROKER_HISTORY_LIMIT_MAX", &value)?;
        }

        if let Some(value) = read_env("ALCOGUARD_GUARDIAN_AGENT_ID") {
            self.guardian.agent_id = value;
        }
        if let Some(value) = read_env("ALCOGUARD_GUARDIAN_CONVERSATIONAL_AGENT_ID") {
            self.guardian.conversational_agent_id = value;
        }
        if let Some(value) = read_env("ALCOGUARD_GUARDIAN_VETO_THRESHOLD") {
            self.guardian.veto_threshold = WarningLevel::parse(&value).ok_or_else(|| {
                ConfigError::InvalidEnvOverride {
                    key: "ALCOGUARD_GUARDIAN_VETO_THRESHOLD".to_string(),
                    value: value.clone(),
                }
            })?;
        }

        if let Some(value) = read_env("ALCOGUARD_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("ALCOGUARD_SERVER_PORT") {
            self.server.port = parse_u16("ALCOGUARD_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("ALCOGUARD_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("ALCOGUARD_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("ALCOGUARD_LOGGING_LEVEL").or_else(|| read_env("ALCOGUARD_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("ALCOGUARD_LOGGING_FORMAT").or_else(|| read_env("ALCOGUARD_LOG_FORMAT"));
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
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(veto_threshold) = overrides.veto_threshold {
            self.guardian.veto_threshold = veto_threshold;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_broker(&self.broker)?;
        validate_guardian(&self.guardian)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("alcoguard.toml"), PathBuf::from("config/alcoguard.toml")]
        .into_iter()
        .find(|path| path.exists())
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

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_broker(broker: &BrokerConfig) -> Result<(), ConfigError> {
    if broker.handler_backoff_ms > 60_000 {
        return Err(ConfigError::Validation(
            "broker.handler_backoff_ms must be at most 60000".to_string(),
        ));
    }

    if broker.history_limit_max == 0 {
        return Err(ConfigError::Validation(
            "broker.history_limit_max must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_guardian(guardian: &GuardianConfig) -> Result<(), ConfigError> {
    if guardian.agent_id.trim().is_empty() {
        return Err(ConfigError::Validation("guardian.agent_id is required".to_string()));
    }
    if guardian.conversational_agent_id.trim().is_empty() {
        return Err(ConfigError::Validation(
            "guardian.conversational_agent_id is required".to_string(),
        ));
    }
    if guardian.agent_id == guardian.conversational_agent_id {
        return Err(ConfigError::Validation(
            "guardian.agent_id and guardian.conversational_agent_id must differ".to_string(),
        ));
    }
    if guardian.veto_threshold == WarningLevel::Ok {
        return Err(ConfigError::Validation(
            "guardian.veto_threshold must be caution, warning, or stop".to_string(),
        ));
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

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_level(key: &str, value: &str) -> Result<WarningLevel, ConfigError> {
    WarningLevel::parse(value).ok_or_else(|| {
        ConfigError::Validation(format!(
            "{key} must be one of ok|caution|warning|stop (got `{value}`)"
        ))
    })
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    broker: Option<BrokerPatch>,
    guardian: Option<GuardianPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct BrokerPatch {
    handler_backoff_ms: Option<u64>,
    history_limit_max: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct GuardianPatch {
    agent_id: Option<String>,
    conversational_agent_id: Option<String>,
    veto_threshold: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
