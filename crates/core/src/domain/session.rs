use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Ethanol density in g/ml.
pub const ETHANOL_DENSITY_G_PER_ML: f64 = 0.8;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DrinkId(pub String);

impl SessionId {
    pub fn generate() -> Self {
        Self(format!("ses_{}", Uuid::new_v4().simple()))
    }
}

impl DrinkId {
    pub fn generate() -> Self {
        Self(format!("drk_{}", Uuid::new_v4().simple()))
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Ended,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Ended => "ended",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "ended" => Some(Self::Ended),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub total_alcohol_g: f64,
    pub status: SessionStatus,
}

impl Session {
    pub fn start(user_id: UserId, start_time: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::generate(),
            user_id,
            start_time,
            end_time: None,
            total_alcohol_g: 0.0,
            status: SessionStatus::Active,
        }
    }

    /// Elapsed hours since the session started; never negative.
    pub fn elapsed_hours(&self, now: DateTime<Utc>) -> f64 {
        let seconds = (now - self.start_time).num_milliseconds() as f64 / 1_000.0;
        (seconds / 3_600.0).max(0.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Drink {
    pub id: DrinkId,
    pub session_id: SessionId,
    pub drink_type: String,
    pub volume_ml: f64,
    pub alcohol_percentage: f64,
    pub alcohol_g: f64,
    pub timestamp: DateTime<Utc>,
}

impl Drink {
    pub fn record(
        session_id: SessionId,
        input: DrinkInput,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, DrinkValidationError> {
        input.validate()?;
        Ok(Self {
            id: DrinkId::generate(),
            session_id,
            alcohol_g: pure_alcohol_grams(input.volume_ml, input.alcohol_percentage),
            drink_type: input.drink_type.trim().to_owned(),
            volume_ml: input.volume_ml,
            alcohol_percentage: input.alcohol_percentage,
            timestamp,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DrinkInput {
    pub drink_type: String,
    pub volume_ml: f64,
    pub alcohol_percentage: f64,
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum DrinkValidationError {
    #[error("drink_type is required")]
    MissingDrinkType,
    #[error("alcohol_percentage must be between 0 and 100 (got {0})")]
    PercentageOutOfRange(f64),
    #[error("volume_ml must be greater than 0 (got {0})")]
    NonPositiveVolume(f64),
}

impl DrinkInput {
    pub fn validate(&self) -> Result<(), DrinkValidationError> {
        if self.drink_type.trim().is_empty() {
            return Err(DrinkValidationError::MissingDrinkType);
        }
        if !(0.0..=100.0).contains(&self.alcohol_percentage) {
            return Err(DrinkValidationError::PercentageOutOfRange(self.alcohol_percentage));
        }
        if self.volume_ml.is_nan() || self.volume_ml <= 0.0 || self.volume_ml.is_infinite() {
            return Err(DrinkValidationError::NonPositiveVolume(self.volume_ml));
        }
        Ok(())
    }
}

/// Grams of pure ethanol: `volume_ml * (alcohol_percentage / 100) * 0.8`.
pub fn pure_alcohol_grams(volume_ml: f64, alcohol_percentage: f64) -> f64 {
    volume_ml * (alcohol_percentage / 100.0) * ETHANOL_DENSITY_G_PER_ML
}
