use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use alcoguard_core::clock::Clock;
use alcoguard_core::domain::session::{Session, SessionId, UserId};
use alcoguard_core::risk::{RiskAssessmentEngine, SessionAnalysis};
use alcoguard_db::{RepositoryError, SessionRepository};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("session `{session_id}` not found for user `{user_id}`")]
    SessionNotFound { user_id: UserId, session_id: SessionId },
    #[error("session data unavailable: {0}")]
    Unavailable(#[from] RepositoryError),
}

/// The analysis together with the session it was computed from, when one was found.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSnapshot {
    pub session: Option<Session>,
    pub analysis: SessionAnalysis,
}

impl SessionSnapshot {
    /// Whole minutes since the session started, measured from the raw start time.
    pub fn duration_minutes(&self) -> i64 {
        self.session
            .as_ref()
            .map(|session| (self.analysis.analyzed_at - session.start_time).num_minutes().max(0))
            .unwrap_or(0)
    }
}

/// Loads session data and runs the risk engine over it.
pub struct SessionAnalyzer {
    repository: Arc<dyn SessionRepository>,
    engine: RiskAssessmentEngine,
    clock: Arc<dyn Clock>,
}

impl SessionAnalyzer {
    pub fn new(repository: Arc<dyn SessionRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repository, engine: RiskAssessmentEngine::new(), clock }
    }

    pub fn repository(&self) -> &Arc<dyn SessionRepository> {
        &self.repository
    }

    pub async fn try_analyze_session(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
    ) -> Result<SessionSnapshot, AnalysisError> {
        let session = self.repository.find_session(user_id, session_id).await?.ok_or_else(|| {
            AnalysisError::SessionNotFound { user_id: user_id.clone(), session_id: session_id.clone() }
        })?;
        let drinks = self.repository.list_drinks(session_id, None).await?;
        let analysis = self.engine.assess(&session, &drinks, self.clock.now());

        Ok(SessionSnapshot { session: Some(session), analysis })
    }

    /// Never fails: a missing session or a storage error yields the "no data" analysis.
    pub async fn snapshot(&self, user_id: &UserId, session_id: &SessionId) -> SessionSnapshot {
        match self.try_analyze_session(user_id, session_id).await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                warn!(
                    event_name = "risk.analysis_unavailable",
                    user_id = %user_id,
                    session_id = %session_id,
                    error = %error,
                    "session analysis unavailable; returning safe default"
                );
                SessionSnapshot {
                    session: None,
                    analysis: SessionAnalysis::unavailable(self.clock.now()),
                }
            }
        }
    }

    pub async fn analyze_session(&self, user_id: &UserId, session_id: &SessionId) -> SessionAnalysis {
        self.snapshot(user_id, session_id).await.analysis
    }
}
