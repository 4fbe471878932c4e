use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use alcoguard_core::clock::Clock;
use alcoguard_core::config::GuardianConfig;
use alcoguard_core::domain::message::{AgentId, EventType, Message};
use alcoguard_core::domain::payload::{
    DrinkAddedPayload, DrinkSuggestedPayload, GuardianAlertPayload, LevelSnapshot,
    SessionStartedPayload, SessionStatsPayload, SessionStatsSnapshot, VetoPayload, WirePayload,
};
use alcoguard_core::domain::session::{SessionId, UserId};
use alcoguard_core::domain::warning::WarningLevel;

use crate::analyzer::{SessionAnalyzer, SessionSnapshot};
use crate::handler::{HandlerContext, HandlerError, HandlerOutcome, MessageHandler};
use crate::veto::VetoPolicy;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardianSettings {
    pub agent_id: AgentId,
    pub conversational_agent_id: AgentId,
}

impl Default for GuardianSettings {
    fn default() -> Self {
        Self { agent_id: AgentId::from("guardian"), conversational_agent_id: AgentId::from("bartender") }
    }
}

impl From<&GuardianConfig> for GuardianSettings {
    fn from(config: &GuardianConfig) -> Self {
        Self {
            agent_id: AgentId::new(config.agent_id.clone()),
            conversational_agent_id: AgentId::new(config.conversational_agent_id.clone()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MonitoredSession {
    pub user_id: String,
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub vetoes_sent: u32,
    pub last_level: WarningLevel,
}

/// Safety supervisor. Re-assesses a session on every drink and vetoes the
/// conversational agent once the warning level reaches the policy threshold.
pub struct GuardianAgent {
    settings: GuardianSettings,
    analyzer: Arc<SessionAnalyzer>,
    policy: VetoPolicy,
    clock: Arc<dyn Clock>,
    sessions: Mutex<HashMap<SessionId, MonitoredSession>>,
}

impl GuardianAgent {
    pub fn new(
        settings: GuardianSettings,
        analyzer: Arc<SessionAnalyzer>,
        policy: VetoPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { settings, analyzer, policy, clock, sessions: Mutex::new(HashMap::new()) }
    }

    pub fn subscriptions() -> [EventType; 4] {
        [
            EventType::DrinkAdded,
            EventType::DrinkSuggested,
            EventType::SessionStarted,
            EventType::BartenderChat,
        ]
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.settings.agent_id
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionId, MonitoredSession>> {
        match self.sessions.lock() {
            Ok(sessions) => sessions,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Oldest first.
    pub fn monitored_sessions(&self) -> Vec<MonitoredSession> {
        let mut sessions: Vec<MonitoredSession> = self.sessions().values().cloned().collect();
        sessions.sort_by(|left, right| {
            left.started_at.cmp(&right.started_at).then_with(|| left.session_id.cmp(&right.session_id))
        });
        sessions
    }

    /// Would the next drink be vetoed right now?
    pub async fn check_veto(&self, user_id: &UserId, session_id: &SessionId) -> Option<VetoPayload> {
        let analysis = self.analyzer.analyze_session(user_id, session_id).await;
        self.policy.evaluate(user_id, session_id, &analysis)
    }

    fn track(&self, user_id: &UserId, session_id: &SessionId, started_at: DateTime<Utc>) {
        self.sessions().entry(session_id.clone()).or_insert_with(|| MonitoredSession {
            user_id: user_id.0.clone(),
            session_id: session_id.0.clone(),
            started_at,
            vetoes_sent: 0,
            last_level: WarningLevel::Ok,
        });
    }

    fn record_assessment(&self, snapshot: &SessionSnapshot, vetoed: bool) {
        let Some(session) = snapshot.session.as_ref() else { return };
        let mut sessions = self.sessions();
        let entry = sessions.entry(session.id.clone()).or_insert_with(|| MonitoredSession {
            user_id: session.user_id.0.clone(),
            session_id: session.id.0.clone(),
            started_at: session.start_time,
            vetoes_sent: 0,
            last_level: WarningLevel::Ok,
        });
        entry.last_level = snapshot.analysis.warning_level;
        if vetoed {
            entry.vetoes_sent += 1;
        }
    }

    async fn on_session_started(&self, message: &Message) -> Result<HandlerOutcome, HandlerError> {
        let payload = SessionStartedPayload::from_payload(&message.payload)?;
        let user_id = UserId(payload.user_id);
        let session_id = SessionId(payload.session_id);
        self.track(&user_id, &session_id, payload.timestamp);

        info!(
            event_name = "guardian.session_monitored",
            correlation_id = %message.id,
            user_id = %user_id,
            session_id = %session_id,
            "guardian monitoring session"
        );
        Ok(HandlerOutcome::Handled)
    }

    async fn on_drink_added(
        &self,
        message: &Message,
        ctx: &HandlerContext<'_>,
    ) -> Result<HandlerOutcome, HandlerError> {
        let payload = DrinkAddedPayload::from_payload(&message.payload)?;
        let user_id = UserId(payload.user_id);
        let session_id = SessionId(payload.session_id);

        let snapshot = self.analyzer.snapshot(&user_id, &session_id).await;
        if !snapshot.analysis.data_available {
            warn!(
                event_name = "guardian.assessment_skipped",
                correlation_id = %message.id,
                session_id = %session_id,
                "session data unavailable; assuming safe"
            );
            return Ok(HandlerOutcome::Handled);
        }
        let analysis = &snapshot.analysis;

        let stats = SessionStatsPayload {
            user_id: user_id.0.clone(),
            session_id: session_id.0.clone(),
            stats: SessionStatsSnapshot {
                total_alcohol_g: analysis.total_analysis.total_alcohol_g,
                drinks_count: analysis.drinks_count,
                duration_minutes: snapshot.duration_minutes(),
            },
            current_level: LevelSnapshot::from(analysis.warning_level),
            intervention_level: analysis.intervention_level,
        };
        ctx.publish_payload(stats, None).await?;

        let veto = self.policy.evaluate(&user_id, &session_id, analysis);
        if let Some(veto) = veto.as_ref() {
            let alert = GuardianAlertPayload {
                user_id: user_id.0.clone(),
                session_id: session_id.0.clone(),
                level: LevelSnapshot::from(analysis.warning_level),
                recommendations: analysis.recommendation_messages(),
            };
            ctx.publish_payload(alert, None).await?;
            ctx.publish_payload(veto.clone(), Some(&self.settings.conversational_agent_id)).await?;

            warn!(
                event_name = "guardian.veto_issued",
                correlation_id = %message.id,
                session_id = %session_id,
                severity = %veto.severity,
                reason = %veto.reason,
                "guardian vetoed further drinks"
            );
        }
        self.record_assessment(&snapshot, veto.is_some());

        info!(
            event_name = "guardian.drink_assessed",
            correlation_id = %message.id,
            session_id = %session_id,
            drink_type = %payload.drink_type,
            warning_level = %analysis.warning_level,
            intervention_level = %analysis.intervention_level,
            "drink assessed"
        );
        Ok(HandlerOutcome::Handled)
    }

    async fn on_drink_suggested(
        &self,
        message: &Message,
        ctx: &HandlerContext<'_>,
    ) -> Result<HandlerOutcome, HandlerError> {
        let payload = DrinkSuggestedPayload::from_payload(&message.payload)?;
        let (Some(user_id), Some(session_id)) = (payload.user_id, payload.session_id) else {
            debug!(
                event_name = "guardian.suggestion_unscoped",
                correlation_id = %message.id,
                suggestion = %payload.suggestion,
                "drink suggestion without a session; nothing to check"
            );
            return Ok(HandlerOutcome::Handled);
        };
        let user_id = UserId(user_id);
        let session_id = SessionId(session_id);

        let snapshot = self.analyzer.snapshot(&user_id, &session_id).await;
        let veto = self.policy.evaluate(&user_id, &session_id, &snapshot.analysis);
        if let Some(veto) = veto.as_ref() {
            ctx.publish_payload(veto.clone(), Some(&self.settings.conversational_agent_id)).await?;
            info!(
                event_name = "guardian.suggestion_vetoed",
                correlation_id = %message.id,
                session_id = %session_id,
                severity = %veto.severity,
                "guardian vetoed a drink suggestion"
            );
        }
        if snapshot.analysis.data_available {
            self.record_assessment(&snapshot, veto.is_some());
        }
        Ok(HandlerOutcome::Handled)
    }
}

#[async_trait]
impl MessageHandler for GuardianAgent {
    async fn handle(
        &self,
        message: &Message,
        ctx: &HandlerContext<'_>,
    ) -> Result<HandlerOutcome, HandlerError> {
        match &message.event_type {
            EventType::SessionStarted => self.on_session_started(message).await,
            EventType::DrinkAdded => self.on_drink_added(message, ctx).await,
            EventType::DrinkSuggested => self.on_drink_suggested(message, ctx).await,
            EventType::BartenderChat | EventType::ConversationStarted => {
                debug!(
                    event_name = "guardian.conversation_observed",
                    correlation_id = %message.id,
                    from = %message.from,
                    at = %self.clock.now(),
                    "guardian observed conversation"
                );
                Ok(HandlerOutcome::Handled)
            }
            other => Ok(HandlerOutcome::Unhandled { message_type: other.clone() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use alcoguard_core::clock::{Clock, ManualClock};
    use alcoguard_core::domain::message::{AgentId, EventType, Message, NewMessage};
    use alcoguard_core::domain::payload::{
        DrinkAddedPayload, DrinkSuggestedPayload, SessionStatsPayload, VetoPayload, WirePayload,
    };
    use alcoguard_core::domain::session::{Drink, DrinkInput, Session, UserId};
    use alcoguard_core::domain::warning::WarningLevel;
    use alcoguard_db::{InMemorySessionRepository, SessionRepository};

    use super::{GuardianAgent, GuardianSettings};
    use crate::analyzer::SessionAnalyzer;
    use crate::broker::BrokerError;
    use crate::handler::{HandlerContext, HandlerOutcome, MessageHandler, Publisher};
    use crate::veto::VetoPolicy;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<NewMessage>>,
    }

    impl Recorder {
        fn sent(&self) -> Vec<NewMessage> {
            self.sent.lock().expect("recorder lock").clone()
        }
    }

    #[async_trait]
    impl Publisher for Recorder {
        async fn publish(&self, message: NewMessage) -> Result<Message, BrokerError> {
            self.sent.lock().expect("recorder lock").push(message.clone());
            Ok(message.into_message(Utc::now())?)
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, 19, 0, 0).single().expect("valid time")
    }

    struct Fixture {
        guardian: GuardianAgent,
        repo: Arc<InMemorySessionRepository>,
        clock: Arc<ManualClock>,
        session: Session,
    }

    async fn fixture() -> Fixture {
        let repo = Arc::new(InMemorySessionRepository::default());
        let clock = Arc::new(ManualClock::new(start()));
        let session = Session::start(UserId("u-1".to_owned()), start());
        repo.create_session(session.clone()).await.expect("create");
        let analyzer = Arc::new(SessionAnalyzer::new(repo.clone(), clock.clone()));
        let guardian = GuardianAgent::new(
            GuardianSettings::default(),
            analyzer,
            VetoPolicy::default(),
            clock.clone(),
        );
        Fixture { guardian, repo, clock, session }
    }

    async fn add_drink(fixture: &Fixture, minute: i64) -> Message {
        let drink = Drink::record(
            fixture.session.id.clone(),
            DrinkInput { drink_type: "beer".to_owned(), volume_ml: 350.0, alcohol_percentage: 5.0 },
            start() + Duration::minutes(minute),
        )
        .expect("valid drink");
        let drink_id = drink.id.0.clone();
        let alcohol_g = drink.alcohol_g;
        fixture.repo.append_drink(drink).await.expect("append");
        fixture.clock.set(start() + Duration::minutes(minute));

        let payload = DrinkAddedPayload {
            user_id: "u-1".to_owned(),
            session_id: fixture.session.id.0.clone(),
            drink_id: Some(drink_id),
            drink_type: "beer".to_owned(),
            alcohol_g,
        };
        NewMessage::new(EventType::DrinkAdded, "system")
            .to("guardian")
            .with_payload(payload.into_payload().expect("payload"))
            .into_message(fixture.clock.now())
            .expect("message")
    }

    #[tokio::test]
    async fn risky_drink_publishes_stats_alert_and_one_veto() {
        let fixture = fixture().await;
        let recorder = Recorder::default();
        let agent_id = AgentId::from("guardian");
        let ctx = HandlerContext { agent_id: &agent_id, correlation_id: "c-1", publisher: &recorder };

        let message = add_drink(&fixture, 0).await;
        let outcome = fixture.guardian.handle(&message, &ctx).await.expect("handled");
        assert_eq!(outcome, HandlerOutcome::Handled);

        let sent = recorder.sent();
        let types: Vec<EventType> = sent.iter().map(|message| message.event_type.clone()).collect();
        assert_eq!(
            types,
            vec![EventType::SessionStats, EventType::GuardianAlert, EventType::GuardianVeto]
        );

        let stats = SessionStatsPayload::from_payload(&sent[0].payload).expect("stats");
        assert_eq!(stats.stats.drinks_count, 1);
        assert_eq!(stats.current_level.severity, WarningLevel::Stop);

        assert_eq!(sent[2].to.as_str(), "bartender");
        let veto = VetoPayload::from_payload(&sent[2].payload).expect("veto");
        assert!(veto.veto);
        assert_eq!(veto.severity, WarningLevel::Stop);
        assert_eq!(veto.user_id, "u-1");
        assert_eq!(veto.session_id, fixture.session.id.0);

        let monitored = fixture.guardian.monitored_sessions();
        assert_eq!(monitored.len(), 1);
        assert_eq!(monitored[0].vetoes_sent, 1);
        assert_eq!(monitored[0].last_level, WarningLevel::Stop);
    }

    #[tokio::test]
    async fn calm_session_only_reports_stats() {
        let fixture = fixture().await;
        let recorder = Recorder::default();
        let agent_id = AgentId::from("guardian");
        let ctx = HandlerContext { agent_id: &agent_id, correlation_id: "c-1", publisher: &recorder };

        // 14 g spread over three hours is a light, safe pace.
        let drink = Drink::record(
            fixture.session.id.clone(),
            DrinkInput { drink_type: "beer".to_owned(), volume_ml: 350.0, alcohol_percentage: 5.0 },
            start(),
        )
        .expect("valid drink");
        fixture.repo.append_drink(drink).await.expect("append");
        fixture.clock.set(start() + Duration::hours(2));
        let payload = DrinkAddedPayload {
            user_id: "u-1".to_owned(),
            session_id: fixture.session.id.0.clone(),
            drink_id: None,
            drink_type: "beer".to_owned(),
            alcohol_g: 14.0,
        };
        let message = NewMessage::new(EventType::DrinkAdded, "system")
            .with_payload(payload.into_payload().expect("payload"))
            .into_message(start())
            .expect("message");

        fixture.guardian.handle(&message, &ctx).await.expect("handled");

        let sent = recorder.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].event_type, EventType::SessionStats);
        assert!(fixture
            .guardian
            .check_veto(&fixture.session.user_id, &fixture.session.id)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn suggestion_for_an_over_threshold_session_is_vetoed() {
        let fixture = fixture().await;
        let recorder = Recorder::default();
        let agent_id = AgentId::from("guardian");
        let ctx = HandlerContext { agent_id: &agent_id, correlation_id: "c-1", publisher: &recorder };
        add_drink(&fixture, 0).await;

        let suggestion = DrinkSuggestedPayload {
            user_id: Some("u-1".to_owned()),
            session_id: Some(fixture.session.id.0.clone()),
            suggestion: "another beer?".to_owned(),
            context: String::new(),
        };
        let message = NewMessage::new(EventType::DrinkSuggested, "bartender")
            .to("guardian")
            .with_payload(suggestion.into_payload().expect("payload"))
            .into_message(start())
            .expect("message");
        fixture.guardian.handle(&message, &ctx).await.expect("handled");

        let sent = recorder.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].event_type, EventType::GuardianVeto);
    }

    #[tokio::test]
    async fn malformed_payload_is_a_handler_error_and_unknown_types_are_unhandled() {
        let fixture = fixture().await;
        let recorder = Recorder::default();
        let agent_id = AgentId::from("guardian");
        let ctx = HandlerContext { agent_id: &agent_id, correlation_id: "c-1", publisher: &recorder };

        let bad = NewMessage::new(EventType::DrinkAdded, "system")
            .into_message(start())
            .expect("message");
        assert!(fixture.guardian.handle(&bad, &ctx).await.is_err());

        let other = NewMessage::new(EventType::MoodUpdate, "system")
            .into_message(start())
            .expect("message");
        assert_eq!(
            fixture.guardian.handle(&other, &ctx).await.expect("outcome"),
            HandlerOutcome::Unhandled { message_type: EventType::MoodUpdate }
        );
        assert!(recorder.sent().is_empty());
    }
}
