//! Deterministic risk assessment over a drinking session.
//!
//! Everything here is a pure function of `(session, drinks, now)`: the same inputs always
//! yield the same [`SessionAnalysis`], so callers can re-run it freely.

pub mod recommendations;

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::session::{Drink, Session};
use crate::domain::warning::{InterventionLevel, WarningLevel};

pub use recommendations::{
    detect_special_events, recommend, Recommendation, RecommendationTier, SpecialEvent,
    SpecialEventKind,
};

pub const PACE_SAFE_MAX_G_PER_HOUR: f64 = 10.0;
pub const PACE_MODERATE_MAX_G_PER_HOUR: f64 = 15.0;
pub const PACE_FAST_MAX_G_PER_HOUR: f64 = 20.0;

pub const TOTAL_LIGHT_MAX_G: f64 = 20.0;
pub const TOTAL_MODERATE_MAX_G: f64 = 40.0;
pub const TOTAL_HEAVY_MAX_G: f64 = 60.0;

pub const PATTERN_RAPID_BELOW_MINUTES: f64 = 10.0;
pub const PATTERN_FAST_BELOW_MINUTES: f64 = 20.0;
pub const PATTERN_MODERATE_BELOW_MINUTES: f64 = 40.0;

pub const MIN_DURATION_HOURS: f64 = 0.1;
pub const GRAMS_PER_STANDARD_DRINK: f64 = 10.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaceStatus {
    NoDrinks,
    Safe,
    Moderate,
    Fast,
    Dangerous,
}

impl PaceStatus {
    pub fn classify(grams_per_hour: f64) -> Self {
        if grams_per_hour <= PACE_SAFE_MAX_G_PER_HOUR {
            Self::Safe
        } else if grams_per_hour <= PACE_MODERATE_MAX_G_PER_HOUR {
            Self::Moderate
        } else if grams_per_hour <= PACE_FAST_MAX_G_PER_HOUR {
            Self::Fast
        } else {
            Self::Dangerous
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoDrinks => "no_drinks",
            Self::Safe => "safe",
            Self::Moderate => "moderate",
            Self::Fast => "fast",
            Self::Dangerous => "dangerous",
        }
    }

    fn message(&self) -> &'static str {
        match self {
            Self::NoDrinks => "No drinks recorded yet",
            Self::Safe => "Drinking at a good pace",
            Self::Moderate => "Moderate pace",
            Self::Fast => "Pace is a little fast",
            Self::Dangerous => "Pace is far too fast!",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TotalStatus {
    Light,
    Moderate,
    Heavy,
    Excessive,
}

impl TotalStatus {
    pub fn classify(total_alcohol_g: f64) -> Self {
        if total_alcohol_g <= TOTAL_LIGHT_MAX_G {
            Self::Light
        } else if total_alcohol_g <= TOTAL_MODERATE_MAX_G {
            Self::Moderate
        } else if total_alcohol_g <= TOTAL_HEAVY_MAX_G {
            Self::Heavy
        } else {
            Self::Excessive
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Moderate => "moderate",
            Self::Heavy => "heavy",
            Self::Excessive => "excessive",
        }
    }

    fn message(&self) -> &'static str {
        match self {
            Self::Light => "Still a light amount",
            Self::Moderate => "A moderate amount",
            Self::Heavy => "You have had quite a lot",
            Self::Excessive => "That is too much!",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrinkPattern {
    None,
    Rapid,
    Fast,
    Moderate,
    Slow,
}

impl DrinkPattern {
    pub fn classify(avg_interval_minutes: f64) -> Self {
        if avg_interval_minutes < PATTERN_RAPID_BELOW_MINUTES {
            Self::Rapid
        } else if avg_interval_minutes < PATTERN_FAST_BELOW_MINUTES {
            Self::Fast
        } else if avg_interval_minutes < PATTERN_MODERATE_BELOW_MINUTES {
            Self::Moderate
        } else {
            Self::Slow
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Rapid => "rapid",
            Self::Fast => "fast",
            Self::Moderate => "moderate",
            Self::Slow => "slow",
        }
    }

    fn message(&self) -> &'static str {
        match self {
            Self::None => "No drinking pattern yet",
            Self::Rapid => "Drinks are coming in very short intervals",
            Self::Fast => "Slightly quick intervals",
            Self::Moderate => "Reasonable intervals",
            Self::Slow => "Taking it slowly",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaceAnalysis {
    pub status: PaceStatus,
    pub current_pace_g_per_hour: f64,
    pub recent_alcohol_g: f64,
    pub duration_hours: f64,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TotalAnalysis {
    pub status: TotalStatus,
    pub total_alcohol_g: f64,
    pub standard_drinks: f64,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatternAnalysis {
    pub pattern: DrinkPattern,
    pub avg_interval_minutes: f64,
    pub intervals_minutes: Vec<f64>,
    pub most_consumed: Option<String>,
    pub variety_count: usize,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionAnalysis {
    pub pace_analysis: PaceAnalysis,
    pub total_analysis: TotalAnalysis,
    pub pattern_analysis: PatternAnalysis,
    pub recommendations: Vec<Recommendation>,
    pub intervention_level: InterventionLevel,
    pub warning_level: WarningLevel,
    pub special_events: Vec<SpecialEvent>,
    pub drinks_count: usize,
    pub data_available: bool,
    pub analyzed_at: DateTime<Utc>,
}

impl SessionAnalysis {
    /// Safe default when session data cannot be loaded: silent, never alarming.
    pub fn unavailable(now: DateTime<Utc>) -> Self {
        Self {
            pace_analysis: PaceAnalysis {
                status: PaceStatus::NoDrinks,
                current_pace_g_per_hour: 0.0,
                recent_alcohol_g: 0.0,
                duration_hours: 0.0,
                message: "Session status unknown".to_owned(),
            },
            total_analysis: TotalAnalysis {
                status: TotalStatus::Light,
                total_alcohol_g: 0.0,
                standard_drinks: 0.0,
                message: TotalStatus::Light.message().to_owned(),
            },
            pattern_analysis: no_pattern(),
            recommendations: Vec::new(),
            intervention_level: InterventionLevel::None,
            warning_level: WarningLevel::Ok,
            special_events: Vec::new(),
            drinks_count: 0,
            data_available: false,
            analyzed_at: now,
        }
    }

    pub fn recommendation_messages(&self) -> Vec<String> {
        self.recommendations.iter().map(|item| item.message.clone()).collect()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RiskAssessmentEngine;

impl RiskAssessmentEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn assess(&self, session: &Session, drinks: &[Drink], now: DateTime<Utc>) -> SessionAnalysis {
        let pace_analysis = self.analyze_pace(session, drinks, now);
        let total_analysis = self.analyze_total(session.total_alcohol_g);
        let pattern_analysis = self.analyze_pattern(drinks);

        let recommendations = recommend(&pace_analysis, &total_analysis, &pattern_analysis);
        let intervention_level = intervention_level(pace_analysis.status, total_analysis.status);
        let special_events = detect_special_events(session, drinks.len(), now);

        SessionAnalysis {
            pace_analysis,
            total_analysis,
            pattern_analysis,
            recommendations,
            intervention_level,
            warning_level: intervention_level.warning_level(),
            special_events,
            drinks_count: drinks.len(),
            data_available: true,
            analyzed_at: now,
        }
    }

    pub fn analyze_pace(&self, session: &Session, drinks: &[Drink], now: DateTime<Utc>) -> PaceAnalysis {
        let duration_hours = session.elapsed_hours(now).max(MIN_DURATION_HOURS);

        if drinks.is_empty() {
            return PaceAnalysis {
                status: PaceStatus::NoDrinks,
                current_pace_g_per_hour: 0.0,
                recent_alcohol_g: 0.0,
                duration_hours,
                message: PaceStatus::NoDrinks.message().to_owned(),
            };
        }

        let current_pace = session.total_alcohol_g / duration_hours;
        let window_start = now - Duration::hours(1);
        let recent_alcohol_g = drinks
            .iter()
            .filter(|drink| drink.timestamp > window_start)
            .map(|drink| drink.alcohol_g)
            .sum();

        let status = PaceStatus::classify(current_pace);
        PaceAnalysis {
            status,
            current_pace_g_per_hour: current_pace,
            recent_alcohol_g,
            duration_hours,
            message: status.message().to_owned(),
        }
    }

    pub fn analyze_total(&self, total_alcohol_g: f64) -> TotalAnalysis {
        let status = TotalStatus::classify(total_alcohol_g);
        TotalAnalysis {
            status,
            total_alcohol_g,
            standard_drinks: total_alcohol_g / GRAMS_PER_STANDARD_DRINK,
            message: status.message().to_owned(),
        }
    }

    pub fn analyze_pattern(&self, drinks: &[Drink]) -> PatternAnalysis {
        if drinks.is_empty() {
            return no_pattern();
        }

        let mut ordered: Vec<&Drink> = drinks.iter().collect();
        ordered.sort_by_key(|drink| drink.timestamp);

        let intervals_minutes: Vec<f64> = ordered
            .windows(2)
            .map(|pair| (pair[1].timestamp - pair[0].timestamp).num_milliseconds() as f64 / 60_000.0)
            .collect();
        let avg_interval_minutes = if intervals_minutes.is_empty() {
            0.0
        } else {
            intervals_minutes.iter().sum::<f64>() / intervals_minutes.len() as f64
        };

        // Ties on count go to the type seen first.
        let mut counts: HashMap<&str, usize> = HashMap::new();
        let mut first_seen: Vec<&str> = Vec::new();
        for drink in &ordered {
            let count = counts.entry(drink.drink_type.as_str()).or_insert(0);
            if *count == 0 {
                first_seen.push(drink.drink_type.as_str());
            }
            *count += 1;
        }
        let mut most_consumed: Option<(&str, usize)> = None;
        for drink_type in &first_seen {
            let count = counts.get(drink_type).copied().unwrap_or(0);
            if most_consumed.map_or(true, |(_, best)| count > best) {
                most_consumed = Some((drink_type, count));
            }
        }

        let pattern = DrinkPattern::classify(avg_interval_minutes);
        PatternAnalysis {
            pattern,
            avg_interval_minutes,
            intervals_minutes,
            most_consumed: most_consumed.map(|(drink_type, _)| drink_type.to_owned()),
            variety_count: first_seen.len(),
            message: pattern.message().to_owned(),
        }
    }
}

/// Pace and total dominate; the first matching tier wins.
pub fn intervention_level(pace: PaceStatus, total: TotalStatus) -> InterventionLevel {
    if pace == PaceStatus::Dangerous || total == TotalStatus::Excessive {
        InterventionLevel::High
    } else if pace == PaceStatus::Fast || total == TotalStatus::Heavy {
        InterventionLevel::Medium
    } else if pace == PaceStatus::Moderate || total == TotalStatus::Moderate {
        InterventionLevel::Low
    } else {
        InterventionLevel::None
    }
}

fn no_pattern() -> PatternAnalysis {
    PatternAnalysis {
        pattern: DrinkPattern::None,
        avg_interval_minutes: 0.0,
        intervals_minutes: Vec::new(),
        most_consumed: None,
        variety_count: 0,
        message: DrinkPattern::None.message().to_owned(),
    }
}
