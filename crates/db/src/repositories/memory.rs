use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use alcoguard_core::domain::session::{Drink, Session, SessionId, SessionStatus, UserId};

use super::{RepositoryError, SessionRepository};

#[derive(Default)]
struct SessionStore {
    sessions: HashMap<String, Session>,
    /// Creation order, for "most recent active" lookups with equal start times.
    order: Vec<String>,
    drinks: HashMap<String, Vec<Drink>>,
}

impl SessionStore {
    fn active_for(&self, user_id: &UserId) -> Option<&Session> {
        let mut best: Option<&Session> = None;
        for id in &self.order {
            let Some(session) = self.sessions.get(id) else { continue };
            if &session.user_id != user_id || session.status != SessionStatus::Active {
                continue;
            }
            if best.map_or(true, |current| session.start_time >= current.start_time) {
                best = Some(session);
            }
        }
        best
    }

    fn insert(&mut self, session: Session) {
        self.order.push(session.id.0.clone());
        self.sessions.insert(session.id.0.clone(), session);
    }
}

/// Sessions behind one lock, so check-then-insert is atomic.
#[derive(Default)]
pub struct InMemorySessionRepository {
    store: RwLock<SessionStore>,
}

#[async_trait::async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn find_session(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
    ) -> Result<Option<Session>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store.sessions.get(&session_id.0).filter(|session| &session.user_id == user_id).cloned())
    }

    async fn find_active_session(
        &self,
        user_id: &UserId,
    ) -> Result<Option<Session>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store.active_for(user_id).cloned())
    }

    async fn create_session(&self, session: Session) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        if store.sessions.contains_key(&session.id.0) {
            return Err(RepositoryError::Decode(format!("session `{}` already exists", session.id)));
        }
        if session.status == SessionStatus::Active && store.active_for(&session.user_id).is_some() {
            return Err(RepositoryError::ActiveSessionExists(session.user_id));
        }
        store.insert(session);
        Ok(())
    }

    async fn active_or_start(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<(Session, bool), RepositoryError> {
        let mut store = self.store.write().await;
        if let Some(session) = store.active_for(user_id) {
            return Ok((session.clone(), false));
        }
        let session = Session::start(user_id.clone(), now);
        store.insert(session.clone());
        Ok((session, true))
    }

    async fn append_drink(&self, drink: Drink) -> Result<Session, RepositoryError> {
        let mut store = self.store.write().await;
        let session = store
            .sessions
            .get_mut(&drink.session_id.0)
            .ok_or_else(|| RepositoryError::SessionNotFound(drink.session_id.clone()))?;
        if session.status == SessionStatus::Ended {
            return Err(RepositoryError::SessionEnded(drink.session_id.clone()));
        }

        session.total_alcohol_g += drink.alcohol_g;
        let updated = session.clone();
        store.drinks.entry(drink.session_id.0.clone()).or_default().push(drink);
        Ok(updated)
    }

    async fn list_drinks(
        &self,
        session_id: &SessionId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Drink>, RepositoryError> {
        let store = self.store.read().await;
        let mut drinks: Vec<Drink> = store
            .drinks
            .get(&session_id.0)
            .map(|drinks| {
                drinks
                    .iter()
                    .filter(|drink| since.map_or(true, |since| drink.timestamp > since))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        drinks.sort_by_key(|drink| drink.timestamp);
        Ok(drinks)
    }

    async fn end_session(
        &self,
        session_id: &SessionId,
        at: DateTime<Utc>,
    ) -> Result<Option<Session>, RepositoryError> {
        let mut store = self.store.write().await;
        Ok(store.sessions.get_mut(&session_id.0).map(|session| {
            if session.status == SessionStatus::Active {
                session.status = SessionStatus::Ended;
                session.end_time = Some(at);
            }
            session.clone()
        }))
    }
}
