//! Heuristic fire audit records.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Terminal outcome of a heuristic fire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FireOutcome {
    /// No feedback arrived before the deadline.
    #[default]
    Unknown,
    Success,
    Fail,
}

impl FireOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Success => "success",
            Self::Fail => "fail",
        }
    }
}

impl std::str::FromStr for FireOutcome {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(Self::Unknown),
            "success" => Ok(Self::Success),
            "fail" => Ok(Self::Fail),
            other => Err(CoreError::invalid(
                "outcome",
                format!("unknown value '{other}'"),
            )),
        }
    }
}

/// How feedback reached us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackSource {
    /// The user said so.
    Explicit,
    /// Inferred from a correlated downstream signal.
    Implicit,
}

impl FeedbackSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Implicit => "implicit",
        }
    }
}

impl std::str::FromStr for FeedbackSource {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "explicit" => Ok(Self::Explicit),
            "implicit" => Ok(Self::Implicit),
            other => Err(CoreError::invalid(
                "feedback_source",
                format!("unknown value '{other}'"),
            )),
        }
    }
}

/// Audit row written whenever a heuristic matches an event.
///
/// A fire is resolvable exactly once: `resolved_at_ms` is `None` until
/// feedback (or deadline expiry) lands, after which the outcome is
/// terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeuristicFire {
    pub id: String,
    pub heuristic_id: String,
    pub event_id: String,
    pub episodic_event_id: Option<String>,
    pub fired_at_ms: i64,
    pub outcome: FireOutcome,
    pub feedback_source: Option<FeedbackSource>,
    pub resolved_at_ms: Option<i64>,
}

impl HeuristicFire {
    /// A fresh unresolved fire.
    #[must_use]
    pub fn new(heuristic_id: &str, event_id: &str, episodic_event_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            heuristic_id: heuristic_id.to_string(),
            event_id: event_id.to_string(),
            episodic_event_id,
            fired_at_ms: crate::now_ms(),
            outcome: FireOutcome::Unknown,
            feedback_source: None,
            resolved_at_ms: None,
        }
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolved_at_ms.is_some()
    }

    /// Resolve the fire. First resolution wins; repeats are rejected.
    pub fn resolve(
        &mut self,
        outcome: FireOutcome,
        feedback_source: Option<FeedbackSource>,
    ) -> Result<(), CoreError> {
        if self.is_resolved() {
            return Err(CoreError::invalid("fire", "already resolved"));
        }
        self.outcome = outcome;
        self.feedback_source = feedback_source;
        self.resolved_at_ms = Some(crate::now_ms());
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fire_resolves_exactly_once() {
        let mut fire = HeuristicFire::new("h-1", "e-1", None);
        assert!(!fire.is_resolved());
        fire.resolve(FireOutcome::Success, Some(FeedbackSource::Explicit))
            .unwrap();
        assert!(fire.is_resolved());
        assert_eq!(fire.outcome, FireOutcome::Success);

        // Repeat and reverse transitions are both rejected.
        assert!(fire
            .resolve(FireOutcome::Fail, Some(FeedbackSource::Explicit))
            .is_err());
        assert!(fire.resolve(FireOutcome::Unknown, None).is_err());
        assert_eq!(fire.outcome, FireOutcome::Success);
    }

    #[test]
    fn expiry_resolves_as_unknown() {
        let mut fire = HeuristicFire::new("h-1", "e-1", None);
        fire.resolve(FireOutcome::Unknown, None).unwrap();
        assert!(fire.is_resolved());
        assert_eq!(fire.outcome, FireOutcome::Unknown);
        assert!(fire
            .resolve(FireOutcome::Success, Some(FeedbackSource::Implicit))
            .is_err());
    }
}
