use std::env;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use chrono::{Duration, Utc};
use serde_json::Value;

use alcoguard_cli::commands::{analyze, config, history, migrate};
use alcoguard_core::audit::MessageLog;
use alcoguard_core::domain::message::{EventType, NewMessage};
use alcoguard_core::domain::session::{Drink, DrinkInput, Session, SessionId, UserId};
use alcoguard_db::{
    connect_with_settings, migrations, SessionRepository, SqlMessageLog, SqlSessionRepository,
};

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("ALCOGUARD_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
        assert!(payload.get("data").is_none());
    });
}

#[test]
fn migrate_returns_config_failure_for_invalid_threshold() {
    with_env(
        &[
            ("ALCOGUARD_DATABASE_URL", "sqlite::memory:"),
            ("ALCOGUARD_GUARDIAN_VETO_THRESHOLD", "purple"),
        ],
        || {
            let result = migrate::run();
            assert_eq!(result.exit_code, 2, "expected config validation failure code");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["status"], "error");
            assert_eq!(payload["error_class"], "config_validation");
        },
    );
}

#[test]
fn analyze_reports_unknown_session_as_not_found() {
    with_env(
        &[("ALCOGUARD_DATABASE_URL", "sqlite::memory:"), ("ALCOGUARD_DATABASE_MAX_CONNECTIONS", "1")],
        || {
            let result = analyze::run("u1", "ses_missing");
            assert_eq!(result.exit_code, 6);

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "analyze");
            assert_eq!(payload["error_class"], "session_not_found");
        },
    );
}

#[test]
fn analyze_returns_the_risk_assessment_for_a_stored_session() {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = database_url(&dir.path().join("analyze.db"));
    let (user_id, session_id) = seed_session(&url);

    with_env(&[("ALCOGUARD_DATABASE_URL", url.as_str())], || {
        let result = analyze::run(&user_id.0, &session_id.0);
        assert_eq!(result.exit_code, 0, "{}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["data"]["drinks_count"], 3);
        assert_eq!(payload["data"]["data_available"], true);
        let level = payload["data"]["warning_level"].as_str().expect("level");
        assert_ne!(level, "ok", "three quick beers should not read as ok");
    });
}

#[test]
fn history_is_empty_on_a_fresh_database() {
    with_env(
        &[("ALCOGUARD_DATABASE_URL", "sqlite::memory:"), ("ALCOGUARD_DATABASE_MAX_CONNECTIONS", "1")],
        || {
            let result = history::run(None, None, history::DEFAULT_LIMIT);
            assert_eq!(result.exit_code, 0);

            let payload = parse_payload(&result.output);
            assert_eq!(payload["data"], Value::Array(Vec::new()));
            assert_eq!(payload["message"], "0 message(s) returned");
        },
    );
}

#[test]
fn history_filters_by_sender_and_type_and_clamps_limit() {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = database_url(&dir.path().join("history.db"));
    seed_messages(&url);

    with_env(
        &[("ALCOGUARD_DATABASE_URL", url.as_str()), ("ALCOGUARD_BROKER_HISTORY_LIMIT_MAX", "2")],
        || {
            let vetoes = parse_payload(&history::run(Some("guardian"), Some("guardian.veto"), 10).output);
            let records = vetoes["data"].as_array().expect("records");
            assert_eq!(records.len(), 1);
            assert_eq!(records[0]["from"], "guardian");
            assert_eq!(records[0]["type"], "guardian.veto");

            let everything = parse_payload(&history::run(None, None, 50).output);
            assert_eq!(everything["data"].as_array().expect("records").len(), 2);
        },
    );
}

#[test]
fn config_lists_sources_for_env_values() {
    with_env(&[("ALCOGUARD_GUARDIAN_VETO_THRESHOLD", "danger")], || {
        let output = config::run();
        assert!(output.starts_with("effective config"));
        assert!(output.contains(
            "- guardian.veto_threshold = stop (source: env (ALCOGUARD_GUARDIAN_VETO_THRESHOLD))"
        ));
        assert!(output.contains("- server.port = 8080 (source: default)"));
    });
}

fn seed_session(url: &str) -> (UserId, SessionId) {
    block_on(async {
        let pool = connect_with_settings(url, 1, 5).await.expect("pool");
        migrations::run_pending(&pool).await.expect("migrations");
        let repository = SqlSessionRepository::new(pool.clone());

        let now = Utc::now();
        let user_id = UserId("u1".to_string());
        let session = Session::start(user_id.clone(), now - Duration::minutes(15));
        let session_id = session.id.clone();
        repository.create_session(session).await.expect("create session");

        for minute in [15, 10, 5] {
            let drink = Drink::record(
                session_id.clone(),
                DrinkInput {
                    drink_type: "beer".to_string(),
                    volume_ml: 500.0,
                    alcohol_percentage: 5.0,
                },
                now - Duration::minutes(minute),
            )
            .expect("valid drink");
            repository.append_drink(drink).await.expect("append drink");
        }

        pool.close().await;
        (user_id, session_id)
    })
}

fn seed_messages(url: &str) {
    block_on(async {
        let pool = connect_with_settings(url, 1, 5).await.expect("pool");
        migrations::run_pending(&pool).await.expect("migrations");
        let log = SqlMessageLog::new(pool.clone());

        let base = Utc::now() - Duration::minutes(10);
        let messages = [
            NewMessage::new(EventType::DrinkAdded, "system").to("guardian"),
            NewMessage::new(EventType::SessionStats, "guardian").broadcast(),
            NewMessage::new(EventType::GuardianVeto, "guardian").to("bartender"),
        ];
        for (index, message) in messages.into_iter().enumerate() {
            let message =
                message.into_message(base + Duration::minutes(index as i64)).expect("valid message");
            log.append(&message).await.expect("append");
        }

        pool.close().await;
    });
}

fn database_url(path: &Path) -> String {
    format!("sqlite://{}", path.display())
}

fn block_on<T>(future: impl std::future::Future<Output = T>) -> T {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
        .block_on(future)
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = match ENV_LOCK.get_or_init(|| Mutex::new(())).lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };

    let keys = [
        "ALCOGUARD_DATABASE_URL",
        "ALCOGUARD_DATABASE_MAX_CONNECTIONS",
        "ALCOGUARD_DATABASE_TIMEOUT_SECS",
        "ALCOGUARD_BROKER_HANDLER_BACKOFF_MS",
        "ALCOGUARD_BROKER_HISTORY_LIMIT_MAX",
        "ALCOGUARD_GUARDIAN_AGENT_ID",
        "ALCOGUARD_GUARDIAN_CONVERSATIONAL_AGENT_ID",
        "ALCOGUARD_GUARDIAN_VETO_THRESHOLD",
        "ALCOGUARD_SERVER_BIND_ADDRESS",
        "ALCOGUARD_SERVER_PORT",
        "ALCOGUARD_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "ALCOGUARD_LOGGING_LEVEL",
        "ALCOGUARD_LOGGING_FORMAT",
        "ALCOGUARD_LOG_LEVEL",
        "ALCOGUARD_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

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
