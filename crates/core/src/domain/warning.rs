use std::fmt;

use serde::{Deserialize, Serialize};

/// Guardian severity scale. Variant order is the severity order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningLevel {
    Ok,
    Caution,
    Warning,
    Stop,
}

impl WarningLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Caution => "caution",
            Self::Warning => "warning",
            Self::Stop => "stop",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ok" | "safe" => Some(Self::Ok),
            "caution" => Some(Self::Caution),
            "warning" => Some(Self::Warning),
            "stop" | "danger" => Some(Self::Stop),
            _ => None,
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            Self::Ok => "green",
            Self::Caution => "yellow",
            Self::Warning => "orange",
            Self::Stop => "red",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::Ok => "Good pace. Keep enjoying yourself in moderation.",
            Self::Caution => "Your pace is picking up. Take it slowly.",
            Self::Warning => "You have had quite a lot. Slow down and drink some water.",
            Self::Stop => "Drinking more is dangerous. Stop now and rehydrate.",
        }
    }
}

impl fmt::Display for WarningLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Graded intervention decision. Variant order is the escalation order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl InterventionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn warning_level(&self) -> WarningLevel {
        match self {
            Self::None => WarningLevel::Ok,
            Self::Low => WarningLevel::Caution,
            Self::Medium => WarningLevel::Warning,
            Self::High => WarningLevel::Stop,
        }
    }
}

impl fmt::Display for InterventionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
