pub mod connection;
pub mod message_log;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_from_config, connect_with_settings, DbPool};
pub use message_log::SqlMessageLog;
pub use repositories::{
    InMemorySessionRepository, RepositoryError, SessionRepository, SqlSessionRepository,
};
