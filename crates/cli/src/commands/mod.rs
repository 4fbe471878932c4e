pub mod analyze;
pub mod config;
pub mod history;
pub mod migrate;

use serde::Serialize;
use serde_json::Value;

use alcoguard_core::config::{AppConfig, LoadOptions};
use alcoguard_db::{connect_from_config, migrations, DbPool};

pub const EXIT_CONFIG: u8 = 2;
pub const EXIT_RUNTIME: u8 = 3;
pub const EXIT_DB_CONNECTIVITY: u8 = 4;
pub const EXIT_MIGRATION: u8 = 5;
pub const EXIT_NOT_FOUND: u8 = 6;
pub const EXIT_STORAGE: u8 = 7;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

/// (error_class, message, exit_code)
pub(crate) type CommandFailure = (&'static str, String, u8);

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with_data(command, message, None)
    }

    pub fn success_with_data(
        command: &str,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    pub(crate) fn from_failure(command: &str, failure: CommandFailure) -> Self {
        let (error_class, message, exit_code) = failure;
        Self::failure(command, error_class, message, exit_code)
    }
}

/// Loads config, opens the pool and brings the schema up to date, then runs `work`
/// on a current-thread runtime. The pool is closed afterwards either way.
pub(crate) fn with_database<T, F, Fut>(work: F) -> Result<T, CommandFailure>
where
    F: FnOnce(AppConfig, DbPool) -> Fut,
    Fut: std::future::Future<Output = Result<T, CommandFailure>>,
{
    let config = AppConfig::load(LoadOptions::default()).map_err(|error| {
        ("config_validation", format!("configuration issue: {error}"), EXIT_CONFIG)
    })?;

    let runtime =
        tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
            ("runtime_init", format!("failed to initialize async runtime: {error}"), EXIT_RUNTIME)
        })?;

    runtime.block_on(async {
        let pool = connect_from_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), EXIT_DB_CONNECTIVITY))?;
        if let Err(error) = migrations::run_pending(&pool).await {
            pool.close().await;
            return Err(("migration", error.to_string(), EXIT_MIGRATION));
        }

        let result = work(config, pool.clone()).await;
        pool.close().await;
        result
    })
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}
