//! Normalized feedback signals.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// What a feedback event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackTargetType {
    Action,
    Heuristic,
    Pattern,
}

impl FeedbackTargetType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Action => "action",
            Self::Heuristic => "heuristic",
            Self::Pattern => "pattern",
        }
    }
}

impl std::str::FromStr for FeedbackTargetType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "action" => Ok(Self::Action),
            "heuristic" => Ok(Self::Heuristic),
            "pattern" => Ok(Self::Pattern),
            other => Err(CoreError::invalid(
                "target_type",
                format!("unknown value '{other}'"),
            )),
        }
    }
}

/// A normalized feedback signal, created by the executive or by outcome
/// matching and consumed by the confidence updater.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEvent {
    pub id: String,
    pub target_type: FeedbackTargetType,
    pub target_id: String,
    /// e.g. `explicit_positive`, `explicit_negative`, `implicit_outcome`.
    pub feedback_type: String,
    /// In [-1, 1].
    pub feedback_value: f64,
    /// In [0, 1].
    pub weight: f64,
    pub processed: bool,
    pub created_at_ms: i64,
}

impl FeedbackEvent {
    /// Build a feedback event, clamping value and weight into range.
    #[must_use]
    pub fn new(
        target_type: FeedbackTargetType,
        target_id: &str,
        feedback_type: &str,
        feedback_value: f64,
        weight: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            target_type,
            target_id: target_id.to_string(),
            feedback_type: feedback_type.to_string(),
            feedback_value: feedback_value.clamp(-1.0, 1.0),
            weight: weight.clamp(0.0, 1.0),
            processed: false,
            created_at_ms: crate::now_ms(),
        }
    }
}
