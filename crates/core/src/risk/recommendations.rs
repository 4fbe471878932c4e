use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DrinkPattern, PaceAnalysis, PaceStatus, PatternAnalysis, TotalAnalysis, TotalStatus};
use crate::domain::session::Session;

pub const HYDRATION_REMINDER_AFTER_HOURS: f64 = 1.0;
pub const MILESTONE_DRINK_COUNT: usize = 3;
pub const LONG_SESSION_HOURS: f64 = 3.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationTier {
    Info,
    Warning,
    Urgent,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    #[serde(rename = "type")]
    pub tier: RecommendationTier,
    pub message: String,
}

impl Recommendation {
    fn new(tier: RecommendationTier, message: &str) -> Self {
        Self { tier, message: message.to_owned() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialEventKind {
    FirstDrink,
    Milestone,
    LongSession,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialEvent {
    #[serde(rename = "type")]
    pub kind: SpecialEventKind,
    pub message: String,
}

/// Ordered advice for the current session. Order is pace, total, pattern, hydration.
pub fn recommend(
    pace: &PaceAnalysis,
    total: &TotalAnalysis,
    pattern: &PatternAnalysis,
) -> Vec<Recommendation> {
    let mut out: Vec<Recommendation> = Vec::new();

    match pace.status {
        PaceStatus::Dangerous => out.push(Recommendation::new(
            RecommendationTier::Urgent,
            "Your pace is too fast. Stop drinking for at least 30 minutes.",
        )),
        PaceStatus::Fast => out.push(Recommendation::new(
            RecommendationTier::Warning,
            "Slow down a little. Have some water between drinks.",
        )),
        _ => {}
    }

    match total.status {
        TotalStatus::Excessive => out.push(Recommendation::new(
            RecommendationTier::Urgent,
            "You have already had too much. Please stop drinking for today.",
        )),
        TotalStatus::Heavy => out.push(Recommendation::new(
            RecommendationTier::Warning,
            "You have had quite a lot. Consider switching to non-alcoholic drinks.",
        )),
        _ => {}
    }

    if pattern.pattern == DrinkPattern::Rapid {
        out.push(Recommendation::new(
            RecommendationTier::Info,
            "Try leaving at least 15 minutes between drinks.",
        ));
    }

    if pace.status != PaceStatus::NoDrinks && pace.duration_hours > HYDRATION_REMINDER_AFTER_HOURS {
        out.push(Recommendation::new(
            RecommendationTier::Info,
            "Remember to drink water regularly.",
        ));
    }

    dedup_preserving_order(out)
}

pub fn detect_special_events(
    session: &Session,
    drinks_count: usize,
    now: DateTime<Utc>,
) -> Vec<SpecialEvent> {
    let mut events = Vec::new();

    if drinks_count == 1 {
        events.push(SpecialEvent {
            kind: SpecialEventKind::FirstDrink,
            message: "First drink of the session. Enjoy it slowly.".to_owned(),
        });
    }
    if drinks_count == MILESTONE_DRINK_COUNT {
        events.push(SpecialEvent {
            kind: SpecialEventKind::Milestone,
            message: "That is your third drink. Check in with how you feel.".to_owned(),
        });
    }
    if session.elapsed_hours(now) > LONG_SESSION_HOURS {
        events.push(SpecialEvent {
            kind: SpecialEventKind::LongSession,
            message: "You have been drinking for over three hours. Time for a break?".to_owned(),
        });
    }

    events
}

fn dedup_preserving_order(items: Vec<Recommendation>) -> Vec<Recommendation> {
    let mut out: Vec<Recommendation> = Vec::with_capacity(items.len());
    for item in items {
        if !out.iter().any(|seen| seen.message == item.message) {
            out.push(item);
        }
    }
    out
}
