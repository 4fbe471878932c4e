//! Typed views over message payloads for the wire vocabulary.
//!
//! Payloads travel as opaque JSON objects; these structs fix the field names each
//! producer and consumer agree on.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::message::{EventType, Payload};
use crate::domain::warning::{InterventionLevel, WarningLevel};

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("payload for `{event_type}` must be a JSON object")]
    NotAnObject { event_type: String },
    #[error("payload for `{event_type}` is malformed: {reason}")]
    Malformed { event_type: String, reason: String },
}

pub trait WirePayload: Serialize + DeserializeOwned {
    const EVENT_TYPE: EventType;

    fn into_payload(self) -> Result<Payload, PayloadError> {
        match serde_json::to_value(&self) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(PayloadError::NotAnObject { event_type: Self::EVENT_TYPE.to_string() }),
            Err(error) => Err(PayloadError::Malformed {
                event_type: Self::EVENT_TYPE.to_string(),
                reason: error.to_string(),
            }),
        }
    }

    fn from_payload(payload: &Payload) -> Result<Self, PayloadError> {
        serde_json::from_value(Value::Object(payload.clone())).map_err(|error| {
            PayloadError::Malformed {
                event_type: Self::EVENT_TYPE.to_string(),
                reason: error.to_string(),
            }
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DrinkAddedPayload {
    pub user_id: String,
    pub session_id: String,
    #[serde(default)]
    pub drink_id: Option<String>,
    pub drink_type: String,
    pub alcohol_g: f64,
}

impl WirePayload for DrinkAddedPayload {
    const EVENT_TYPE: EventType = EventType::DrinkAdded;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionStartedPayload {
    pub user_id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
}

impl WirePayload for SessionStartedPayload {
    const EVENT_TYPE: EventType = EventType::SessionStarted;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DrinkSuggestedPayload {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    pub suggestion: String,
    #[serde(default)]
    pub context: String,
}

impl WirePayload for DrinkSuggestedPayload {
    const EVENT_TYPE: EventType = EventType::DrinkSuggested;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationStartedPayload {
    pub user_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl WirePayload for ConversationStartedPayload {
    const EVENT_TYPE: EventType = EventType::ConversationStarted;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MoodDetectedPayload {
    pub previous_mood: String,
    pub current_mood: String,
}

impl WirePayload for MoodDetectedPayload {
    const EVENT_TYPE: EventType = EventType::MoodDetected;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MoodUpdatePayload {
    pub mood: String,
    /// Absent means the mood applies to every user without one of their own.
    #[serde(default)]
    pub user_id: Option<String>,
}

impl WirePayload for MoodUpdatePayload {
    const EVENT_TYPE: EventType = EventType::MoodUpdate;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VetoPayload {
    pub veto: bool,
    pub reason: String,
    pub severity: WarningLevel,
    pub user_id: String,
    pub session_id: String,
}

impl WirePayload for VetoPayload {
    const EVENT_TYPE: EventType = EventType::GuardianVeto;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LevelSnapshot {
    pub severity: WarningLevel,
    pub color: String,
    pub message: String,
}

impl From<WarningLevel> for LevelSnapshot {
    fn from(level: WarningLevel) -> Self {
        Self {
            severity: level,
            color: level.color().to_owned(),
            message: level.message().to_owned(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GuardianAlertPayload {
    pub user_id: String,
    pub session_id: String,
    pub level: LevelSnapshot,
    pub recommendations: Vec<String>,
}

impl WirePayload for GuardianAlertPayload {
    const EVENT_TYPE: EventType = EventType::GuardianAlert;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionStatsSnapshot {
    pub total_alcohol_g: f64,
    pub drinks_count: usize,
    pub duration_minutes: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionStatsPayload {
    pub user_id: String,
    pub session_id: String,
    pub stats: SessionStatsSnapshot,
    pub current_level: LevelSnapshot,
    pub intervention_level: InterventionLevel,
}

impl WirePayload for SessionStatsPayload {
    const EVENT_TYPE: EventType = EventType::SessionStats;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthWarningPayload {
    pub message: String,
    #[serde(default)]
    pub severity: Option<WarningLevel>,
}

impl WirePayload for HealthWarningPayload {
    const EVENT_TYPE: EventType = EventType::HealthWarning;
}
