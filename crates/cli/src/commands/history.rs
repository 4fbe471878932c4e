use alcoguard_core::audit::{HistoryFilter, MessageLog};
use alcoguard_core::domain::message::{AgentId, EventType};
use alcoguard_db::SqlMessageLog;

use crate::commands::{with_database, CommandResult, EXIT_STORAGE};

pub const DEFAULT_LIMIT: usize = 100;

/// Reads the message audit log, newest first. `limit` is clamped to the
/// configured `broker.history_limit_max`.
pub fn run(from: Option<&str>, event_type: Option<&str>, limit: usize) -> CommandResult {
    let filter = HistoryFilter {
        from: from.map(|value| AgentId::from(value.trim())),
        event_type: event_type.map(EventType::parse),
    };

    let result = with_database(|config, pool| async move {
        let limit = limit.min(config.broker.history_limit_max);
        let records = SqlMessageLog::new(pool)
            .history(&filter, limit)
            .await
            .map_err(|error| ("storage", error.to_string(), EXIT_STORAGE))?;
        let count = records.len();
        let data = serde_json::to_value(records)
            .map_err(|error| ("serialization", error.to_string(), EXIT_STORAGE))?;
        Ok((count, data))
    });

    match result {
        Ok((count, data)) => CommandResult::success_with_data(
            "history",
            format!("{count} message(s) returned"),
            Some(data),
        ),
        Err(failure) => CommandResult::from_failure("history", failure),
    }
}
