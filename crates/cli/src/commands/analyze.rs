use std::sync::Arc;

use alcoguard_agent::{AnalysisError, SessionAnalyzer};
use alcoguard_core::clock::SystemClock;
use alcoguard_core::domain::session::{SessionId, UserId};
use alcoguard_db::SqlSessionRepository;

use crate::commands::{with_database, CommandResult, EXIT_NOT_FOUND, EXIT_STORAGE};

/// Runs the risk engine against a stored session. Unlike the HTTP surface this
/// reports a missing session or a storage failure instead of the safe default.
pub fn run(user_id: &str, session_id: &str) -> CommandResult {
    let user_id = UserId(user_id.trim().to_string());
    let session_id = SessionId(session_id.trim().to_string());

    let result = with_database(|_config, pool| async move {
        let analyzer =
            SessionAnalyzer::new(Arc::new(SqlSessionRepository::new(pool)), Arc::new(SystemClock));
        let snapshot = analyzer.try_analyze_session(&user_id, &session_id).await.map_err(
            |error| match error {
                AnalysisError::SessionNotFound { .. } => {
                    ("session_not_found", error.to_string(), EXIT_NOT_FOUND)
                }
                AnalysisError::Unavailable(_) => ("storage", error.to_string(), EXIT_STORAGE),
            },
        )?;

        serde_json::to_value(&snapshot.analysis)
            .map_err(|error| ("serialization", error.to_string(), EXIT_STORAGE))
    });

    match result {
        Ok(analysis) => {
            let level = analysis["warning_level"].as_str().unwrap_or("unknown").to_string();
            CommandResult::success_with_data(
                "analyze",
                format!("session analyzed (warning level: {level})"),
                Some(analysis),
            )
        }
        Err(failure) => CommandResult::from_failure("analyze", failure),
    }
}
