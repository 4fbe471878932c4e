use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Wire sentinel for broadcast-to-all-except-sender.
pub const BROADCAST: &str = "all";

pub type Payload = Map<String, Value>;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for AgentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn generate() -> Self {
        Self(format!("msg_{}", Uuid::new_v4().simple()))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Dotted event name. Doubles as payload discriminator and subscription key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    DrinkAdded,
    SessionStarted,
    DrinkSuggested,
    ConversationStarted,
    MoodDetected,
    MoodUpdate,
    GuardianVeto,
    GuardianAlert,
    SessionStats,
    HealthWarning,
    BartenderChat,
    Custom(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::DrinkAdded => "drink.added",
            Self::SessionStarted => "session.started",
            Self::DrinkSuggested => "drink.suggested",
            Self::ConversationStarted => "conversation.started",
            Self::MoodDetected => "mood.detected",
            Self::MoodUpdate => "mood.update",
            Self::GuardianVeto => "guardian.veto",
            Self::GuardianAlert => "guardian.alert",
            Self::SessionStats => "session.stats",
            Self::HealthWarning => "health.warning",
            Self::BartenderChat => "bartender.chat",
            Self::Custom(value) => value,
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "drink.added" => Self::DrinkAdded,
            "session.started" => Self::SessionStarted,
            "drink.suggested" => Self::DrinkSuggested,
            "conversation.started" => Self::ConversationStarted,
            "mood.detected" => Self::MoodDetected,
            "mood.update" => Self::MoodUpdate,
            "guardian.veto" => Self::GuardianVeto,
            "guardian.alert" => Self::GuardianAlert,
            "session.stats" => Self::SessionStats,
            "health.warning" => Self::HealthWarning,
            "bartender.chat" => Self::BartenderChat,
            other => Self::Custom(other.to_owned()),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.as_str().trim().is_empty()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for EventType {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<&str> for EventType {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        value.as_str().to_owned()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Recipient {
    #[default]
    All,
    Agent(AgentId),
}

impl Recipient {
    pub fn as_str(&self) -> &str {
        match self {
            Self::All => BROADCAST,
            Self::Agent(agent_id) => agent_id.as_str(),
        }
    }

    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() || value == BROADCAST {
            Self::All
        } else {
            Self::Agent(AgentId::new(value))
        }
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Recipient {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<Recipient> for String {
    fn from(value: Recipient) -> Self {
        value.as_str().to_owned()
    }
}

impl From<AgentId> for Recipient {
    fn from(value: AgentId) -> Self {
        Self::Agent(value)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("message type is required")]
    MissingType,
    #[error("message sender (`from`) is required")]
    MissingSender,
}

/// A published event. Immutable once persisted; audit state lives on [`MessageRecord`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub from: AgentId,
    pub to: Recipient,
    pub payload: Payload,
    pub timestamp: DateTime<Utc>,
}

/// A message as handed to `Broker::publish`; id and timestamp are filled in when absent.
#[derive(Clone, Debug, PartialEq)]
pub struct NewMessage {
    pub id: Option<MessageId>,
    pub event_type: EventType,
    pub from: AgentId,
    pub to: Recipient,
    pub payload: Payload,
    pub timestamp: Option<DateTime<Utc>>,
}

impl NewMessage {
    pub fn new(event_type: EventType, from: impl Into<AgentId>) -> Self {
        Self {
            id: None,
            event_type,
            from: from.into(),
            to: Recipient::All,
            payload: Payload::new(),
            timestamp: None,
        }
    }

    /// Addresses one agent. `"all"` or a blank id means broadcast.
    pub fn to(mut self, recipient: impl Into<AgentId>) -> Self {
        self.to = Recipient::parse(recipient.into().as_str());
        self
    }

    pub fn broadcast(mut self) -> Self {
        self.to = Recipient::All;
        self
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_id(mut self, id: MessageId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn validate(&self) -> Result<(), MessageError> {
        if self.event_type.is_blank() {
            return Err(MessageError::MissingType);
        }
        if self.from.as_str().trim().is_empty() {
            return Err(MessageError::MissingSender);
        }
        Ok(())
    }

    pub fn into_message(self, now: DateTime<Utc>) -> Result<Message, MessageError> {
        self.validate()?;
        Ok(Message {
            id: self.id.unwrap_or_else(MessageId::generate),
            event_type: self.event_type,
            from: self.from,
            to: self.to,
            payload: self.payload,
            timestamp: self.timestamp.unwrap_or(now),
        })
    }
}

/// Audit-log entry for one published message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    #[serde(flatten)]
    pub message: Message,
    pub processed: bool,
    pub processed_by: Option<AgentId>,
    pub processed_at: Option<DateTime<Utc>>,
    pub failed_by: Option<AgentId>,
    pub handler_error: Option<String>,
}

impl MessageRecord {
    pub fn pending(message: Message) -> Self {
        Self {
            message,
            processed: false,
            processed_by: None,
            processed_at: None,
            failed_by: None,
            handler_error: None,
        }
    }
}
