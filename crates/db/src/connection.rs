use std::time::Duration;

use alcoguard_core::config::DatabaseConfig;
use sqlx::sqlite::SqlitePoolOptions;

pub type DbPool = sqlx::SqlitePool;

pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(database_url, 5, 30).await
}

pub async fn connect_from_config(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(&config.url, config.max_connections, config.timeout_secs).await
}

pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    // `sqlite://path` opens read-write but will not create the file on its own.
    let database_url = if database_url.starts_with("sqlite://") && !database_url.contains('?') {
        format!("{database_url}?mode=rwc")
    } else if database_url == ":memory:" {
        "sqlite::memory:".to_owned()
    } else {
        database_url.to_owned()
    };

    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect(&database_url)
        .await
}
