use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use alcoguard_core::domain::session::{Drink, Session, SessionId, UserId};

pub mod memory;
pub mod session;

pub use memory::InMemorySessionRepository;
pub use session::SqlSessionRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("session `{0}` does not exist")]
    SessionNotFound(SessionId),
    #[error("session `{0}` has already ended")]
    SessionEnded(SessionId),
    #[error("user `{0}` already has an active session")]
    ActiveSessionExists(UserId),
}

impl RepositoryError {
    /// True when the failure means session data cannot be read right now, as
    /// opposed to a caller mistake.
    pub fn is_data_unavailable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Decode(_))
    }
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn find_session(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
    ) -> Result<Option<Session>, RepositoryError>;

    /// Most recently started active session for the user.
    async fn find_active_session(&self, user_id: &UserId)
        -> Result<Option<Session>, RepositoryError>;

    /// Fails with [`RepositoryError::ActiveSessionExists`] when the session is
    /// active and the user already has one.
    async fn create_session(&self, session: Session) -> Result<(), RepositoryError>;

    /// Inserts the drink and increments the session total in one step. Returns the
    /// updated session.
    async fn append_drink(&self, drink: Drink) -> Result<Session, RepositoryError>;

    /// Drinks in timestamp order, optionally only those strictly after `since`.
    async fn list_drinks(
        &self,
        session_id: &SessionId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Drink>, RepositoryError>;

    async fn end_session(
        &self,
        session_id: &SessionId,
        at: DateTime<Utc>,
    ) -> Result<Option<Session>, RepositoryError>;

    /// Returns the active session, starting one when the user has none. The flag is
    /// true when a new session was created. Concurrent callers for one user all
    /// get the same session: the loser of the insert race re-reads the winner's.
    async fn active_or_start(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<(Session, bool), RepositoryError> {
        if let Some(session) = self.find_active_session(user_id).await? {
            return Ok((session, false));
        }
        let session = Session::start(user_id.clone(), now);
        match self.create_session(session.clone()).await {
            Ok(()) => Ok((session, true)),
            Err(RepositoryError::ActiveSessionExists(_)) => self
                .find_active_session(user_id)
                .await?
                .map(|session| (session, false))
                .ok_or_else(|| RepositoryError::ActiveSessionExists(user_id.clone())),
            Err(error) => Err(error),
        }
    }
}

/// Fixed-width RFC 3339 so text ordering matches time ordering.
pub(crate) fn encode_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("{field} `{value}`: {error}")))
}
