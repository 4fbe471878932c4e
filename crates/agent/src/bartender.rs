use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use alcoguard_core::clock::Clock;
use alcoguard_core::domain::message::{AgentId, EventType, Message, MessageId};
use alcoguard_core::domain::payload::{
    ConversationStartedPayload, DrinkSuggestedPayload, GuardianAlertPayload, HealthWarningPayload,
    MoodDetectedPayload, MoodUpdatePayload, SessionStatsPayload, VetoPayload, WirePayload,
};
use alcoguard_core::domain::warning::WarningLevel;

use crate::handler::{HandlerContext, HandlerError, HandlerOutcome, MessageHandler, Publisher};

pub const NEUTRAL_MOOD: &str = "neutral";
pub const MOOD_MONITOR_AGENT: &str = "mood_monitor";

const POSITIVE_WORDS: [&str; 5] = ["楽しい", "嬉しい", "最高", "happy", "great"];
const NEGATIVE_WORDS: [&str; 5] = ["疲れた", "辛い", "悲しい", "tired", "sad"];
const DRINK_WORDS: [&str; 8] = ["飲み", "おかわり", "もう一杯", "ビール", "ワイン", "日本酒", "カクテル", "お酒"];

/// Keyword mood classification: `positive`, `negative` or `neutral`.
pub fn detect_mood(text: &str) -> &'static str {
    let text = text.to_lowercase();
    if POSITIVE_WORDS.iter().any(|word| text.contains(word)) {
        "positive"
    } else if NEGATIVE_WORDS.iter().any(|word| text.contains(word)) {
        "negative"
    } else {
        NEUTRAL_MOOD
    }
}

pub fn mentions_drink(text: &str) -> bool {
    DRINK_WORDS.iter().any(|word| text.contains(word))
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardianWarning {
    pub user_id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub severity: WarningLevel,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct TurnRequest {
    pub user_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub message: String,
}

/// What the conversational front-end must honour when it replies.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TurnDirective {
    pub must_decline: bool,
    pub decline_reason: Option<String>,
    pub severity: Option<WarningLevel>,
    pub mood: String,
    pub latest_warning: Option<GuardianWarning>,
    pub session_stats: Option<SessionStatsPayload>,
    pub suggests_drink: bool,
    pub messages_published: Vec<MessageId>,
}

/// Guardian output folded per user. Vetoes, moods and stats are keyed by
/// user id so one guest's veto never declines another guest's turn.
#[derive(Debug)]
struct BartenderState {
    pending_vetoes: HashMap<String, VetoPayload>,
    guardian_warnings: Vec<GuardianWarning>,
    moods: HashMap<String, String>,
    default_mood: String,
    session_stats: HashMap<String, SessionStatsPayload>,
    last_alert: Option<GuardianAlertPayload>,
    health_warnings: Vec<HealthWarningPayload>,
}

impl Default for BartenderState {
    fn default() -> Self {
        Self {
            pending_vetoes: HashMap::new(),
            guardian_warnings: Vec::new(),
            moods: HashMap::new(),
            default_mood: NEUTRAL_MOOD.to_owned(),
            session_stats: HashMap::new(),
            last_alert: None,
            health_warnings: Vec::new(),
        }
    }
}

impl BartenderState {
    fn mood_for(&self, user_id: &str) -> String {
        self.moods.get(user_id).unwrap_or(&self.default_mood).clone()
    }
}

/// Conversational agent. Its loop only folds guardian output into state; the
/// next call to [`BartenderAgent::compose_turn`] consumes it.
pub struct BartenderAgent {
    agent_id: AgentId,
    guardian_id: AgentId,
    clock: Arc<dyn Clock>,
    state: Mutex<BartenderState>,
}

impl BartenderAgent {
    pub fn new(agent_id: AgentId, guardian_id: AgentId, clock: Arc<dyn Clock>) -> Self {
        Self { agent_id, guardian_id, clock, state: Mutex::new(BartenderState::default()) }
    }

    pub fn subscriptions() -> [EventType; 3] {
        [EventType::GuardianVeto, EventType::HealthWarning, EventType::MoodUpdate]
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    fn state(&self) -> MutexGuard<'_, BartenderState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn current_mood(&self, user_id: &str) -> String {
        self.state().mood_for(user_id)
    }

    pub fn has_pending_veto(&self, user_id: &str) -> bool {
        self.state().pending_vetoes.contains_key(user_id)
    }

    pub fn guardian_warnings(&self) -> Vec<GuardianWarning> {
        self.state().guardian_warnings.clone()
    }

    pub fn health_warnings(&self) -> Vec<HealthWarningPayload> {
        self.state().health_warnings.clone()
    }

    pub fn last_alert(&self) -> Option<GuardianAlertPayload> {
        self.state().last_alert.clone()
    }

    /// Prepares one conversational turn for `request.user_id`. The user's
    /// pending veto is only consumed once every publish has succeeded; a veto
    /// that arrives while this runs applies to the following turn.
    pub async fn compose_turn(
        &self,
        publisher: &dyn Publisher,
        request: TurnRequest,
    ) -> Result<TurnDirective, HandlerError> {
        let (pending, previous_mood, latest_warning, session_stats) = {
            let state = self.state();
            (
                state.pending_vetoes.get(&request.user_id).cloned(),
                state.mood_for(&request.user_id),
                state
                    .guardian_warnings
                    .iter()
                    .rev()
                    .find(|warning| warning.user_id == request.user_id)
                    .cloned(),
                state.session_stats.get(&request.user_id).cloned(),
            )
        };
        // A veto raised for an earlier session of this user no longer applies.
        let veto = pending.clone().filter(|veto| match request.session_id.as_deref() {
            Some(session_id) => veto.session_id == session_id,
            None => true,
        });
        let turn_id = format!("turn:{}", request.user_id);
        let ctx = HandlerContext { agent_id: &self.agent_id, correlation_id: &turn_id, publisher };
        let mut published = Vec::new();

        let started = ConversationStartedPayload {
            user_id: request.user_id.clone(),
            message: request.message.clone(),
            timestamp: self.clock.now(),
        };
        published.push(ctx.publish_payload(started, None).await?.id);

        let suggests_drink = mentions_drink(&request.message);
        if suggests_drink {
            let suggestion = DrinkSuggestedPayload {
                user_id: Some(request.user_id.clone()),
                session_id: request.session_id.clone(),
                suggestion: request.message.clone(),
                context: "conversation".to_owned(),
            };
            published.push(ctx.publish_payload(suggestion, Some(&self.guardian_id)).await?.id);
        }

        let mood = detect_mood(&request.message);
        let mood_changed = mood != previous_mood;
        if mood_changed {
            let detected = MoodDetectedPayload {
                previous_mood: previous_mood.clone(),
                current_mood: mood.to_owned(),
            };
            let monitor = AgentId::from(MOOD_MONITOR_AGENT);
            published.push(ctx.publish_payload(detected, Some(&monitor)).await?.id);
        }

        {
            let mut state = self.state();
            if pending.is_some() && state.pending_vetoes.get(&request.user_id) == pending.as_ref() {
                state.pending_vetoes.remove(&request.user_id);
            }
            if mood_changed {
                state.moods.insert(request.user_id.clone(), mood.to_owned());
            }
        }

        let directive = TurnDirective {
            must_decline: veto.is_some(),
            decline_reason: veto.as_ref().map(|veto| veto.reason.clone()),
            severity: veto.as_ref().map(|veto| veto.severity),
            mood: mood.to_owned(),
            latest_warning,
            session_stats,
            suggests_drink,
            messages_published: published,
        };

        info!(
            event_name = "bartender.turn_composed",
            agent_id = %self.agent_id,
            user_id = %request.user_id,
            must_decline = directive.must_decline,
            mood = %directive.mood,
            suggests_drink,
            "bartender turn composed"
        );
        Ok(directive)
    }

    fn on_veto(&self, message: &Message) -> Result<HandlerOutcome, HandlerError> {
        let payload = VetoPayload::from_payload(&message.payload)?;
        if !payload.veto {
            debug!(
                event_name = "bartender.veto_cleared",
                correlation_id = %message.id,
                "guardian sent a non-veto; nothing pending"
            );
            return Ok(HandlerOutcome::Handled);
        }

        info!(
            event_name = "bartender.veto_received",
            correlation_id = %message.id,
            user_id = %payload.user_id,
            session_id = %payload.session_id,
            severity = %payload.severity,
            reason = %payload.reason,
            "guardian veto received"
        );
        let mut state = self.state();
        state.guardian_warnings.push(GuardianWarning {
            user_id: payload.user_id.clone(),
            session_id: payload.session_id.clone(),
            timestamp: message.timestamp,
            message: payload.reason.clone(),
            severity: payload.severity,
        });
        state.pending_vetoes.insert(payload.user_id.clone(), payload);
        Ok(HandlerOutcome::Handled)
    }
}

#[async_trait]
impl MessageHandler for BartenderAgent {
    async fn handle(
        &self,
        message: &Message,
        _ctx: &HandlerContext<'_>,
    ) -> Result<HandlerOutcome, HandlerError> {
        match &message.event_type {
            EventType::GuardianVeto => self.on_veto(message),
            EventType::HealthWarning => {
                let payload = HealthWarningPayload::from_payload(&message.payload)?;
                info!(
                    event_name = "bartender.health_warning",
                    correlation_id = %message.id,
                    message = %payload.message,
                    "health warning received"
                );
                self.state().health_warnings.push(payload);
                Ok(HandlerOutcome::Handled)
            }
            EventType::MoodUpdate => {
                let payload = MoodUpdatePayload::from_payload(&message.payload)?;
                let mut state = self.state();
                match payload.user_id {
                    Some(user_id) => {
                        state.moods.insert(user_id, payload.mood);
                    }
                    None => state.default_mood = payload.mood,
                }
                Ok(HandlerOutcome::Handled)
            }
            EventType::SessionStats => {
                let payload = SessionStatsPayload::from_payload(&message.payload)?;
                self.state().session_stats.insert(payload.user_id.clone(), payload);
                Ok(HandlerOutcome::Handled)
            }
            EventType::GuardianAlert => {
                let payload = GuardianAlertPayload::from_payload(&message.payload)?;
                self.state().last_alert = Some(payload);
                Ok(HandlerOutcome::Handled)
            }
            other => Ok(HandlerOutcome::Unhandled { message_type: other.clone() }),
        }
    }
}
