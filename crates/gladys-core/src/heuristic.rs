//! Learned condition→action rules with Beta-Binomial confidence.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Default cosine-similarity threshold for a freshly extracted heuristic.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.7;

/// Prior pseudo-counts. A fresh heuristic starts at alpha = beta = 1,
/// i.e. confidence 0.5.
pub const PRIOR_ALPHA: f64 = 1.0;
/// See [`PRIOR_ALPHA`].
pub const PRIOR_BETA: f64 = 1.0;

/// Where a heuristic came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeuristicOrigin {
    BuiltIn,
    Pack,
    #[default]
    Learned,
    User,
}

impl HeuristicOrigin {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BuiltIn => "built_in",
            Self::Pack => "pack",
            Self::Learned => "learned",
            Self::User => "user",
        }
    }
}

impl std::str::FromStr for HeuristicOrigin {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "built_in" => Ok(Self::BuiltIn),
            "pack" => Ok(Self::Pack),
            "learned" => Ok(Self::Learned),
            "user" => Ok(Self::User),
            other => Err(CoreError::invalid(
                "origin",
                format!("unknown value '{other}'"),
            )),
        }
    }
}

/// The matching side of a heuristic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeuristicCondition {
    pub text: String,
    /// Domain scope; `None` matches any source.
    pub source: Option<String>,
}

/// The acting side of a heuristic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeuristicAction {
    /// Canonical action text.
    pub message: String,
    /// Additional structured payload. A `salience_boost` object here is
    /// consumed by the gateway when the heuristic matches.
    pub extra: Option<serde_json::Value>,
}

impl HeuristicAction {
    /// The salience boost object, if the action carries one.
    #[must_use]
    pub fn salience_boost(&self) -> Option<&serde_json::Value> {
        self.extra.as_ref()?.get("salience_boost")
    }
}

/// A learned rule: when an event matches the condition, the action fires
/// without consulting the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heuristic {
    pub id: String,
    pub name: String,
    pub condition: HeuristicCondition,
    pub action: HeuristicAction,
    /// Fixed-dimension embedding of the condition text. Empty until
    /// generated.
    pub condition_embedding: Vec<f32>,
    pub similarity_threshold: f64,
    /// Always `alpha / (alpha + beta)`.
    pub confidence: f64,
    pub alpha: f64,
    pub beta: f64,
    pub fire_count: u64,
    pub success_count: u64,
    pub origin: HeuristicOrigin,
    pub origin_id: Option<String>,
    /// Domain scope copied from the condition.
    pub source: Option<String>,
    /// Frozen heuristics accept no confidence updates. Storage-only; not
    /// exposed on the wire.
    pub frozen: bool,
    pub last_fired_ms: Option<i64>,
    pub last_accessed_ms: Option<i64>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl Heuristic {
    /// A fresh learned heuristic at the default prior.
    #[must_use]
    pub fn learned(name: &str, condition: HeuristicCondition, action: HeuristicAction) -> Self {
        let now = crate::now_ms();
        let source = condition.source.clone();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            condition,
            action,
            condition_embedding: Vec::new(),
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            confidence: PRIOR_ALPHA / (PRIOR_ALPHA + PRIOR_BETA),
            alpha: PRIOR_ALPHA,
            beta: PRIOR_BETA,
            fire_count: 0,
            success_count: 0,
            origin: HeuristicOrigin::Learned,
            origin_id: None,
            source,
            frozen: false,
            last_fired_ms: None,
            last_accessed_ms: None,
            created_at_ms: now,
            updated_at_ms: now,
        }
    }

    /// Validate the pseudo-count invariants: alpha, beta > 0 and the
    /// stored confidence equals alpha / (alpha + beta).
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(self.alpha > 0.0) {
            return Err(CoreError::invalid("alpha", "must be > 0"));
        }
        if !(self.beta > 0.0) {
            return Err(CoreError::invalid("beta", "must be > 0"));
        }
        let expected = self.alpha / (self.alpha + self.beta);
        if (self.confidence - expected).abs() > 1e-9 {
            return Err(CoreError::invalid(
                "confidence",
                format!("must equal alpha/(alpha+beta) = {expected}"),
            ));
        }
        Ok(())
    }

    /// Apply one weighted Beta-Binomial observation.
    ///
    /// Positive feedback bumps alpha, negative bumps beta; confidence is
    /// re-derived and clamped against floating-point drift. As alpha+beta
    /// grows the update moves confidence less; accumulated evidence
    /// gives the estimate mass.
    pub fn apply_feedback(&mut self, positive: bool, weight: f64) -> Result<(), CoreError> {
        if !(weight > 0.0 && weight <= 1.0) {
            return Err(CoreError::invalid("weight", "must be in (0, 1]"));
        }
        if positive {
            self.alpha += weight;
        } else {
            self.beta += weight;
        }
        self.confidence = (self.alpha / (self.alpha + self.beta)).clamp(0.0, 1.0);
        self.updated_at_ms = crate::now_ms();
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::float_cmp)]
#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> Heuristic {
        Heuristic::learned(
            "low-health-warning",
            HeuristicCondition {
                text: "player health critically low".to_string(),
                source: Some("minecraft".to_string()),
            },
            HeuristicAction {
                message: "warn the player to retreat and heal".to_string(),
                extra: None,
            },
        )
    }

    #[test]
    fn fresh_heuristic_starts_at_the_prior() {
        let h = sample();
        assert_eq!(h.alpha, 1.0);
        assert_eq!(h.beta, 1.0);
        assert_eq!(h.confidence, 0.5);
        assert_eq!(h.source.as_deref(), Some("minecraft"));
        h.validate().unwrap();
    }

    #[test]
    fn reinforcement_raises_confidence() {
        let mut h = sample();
        h.apply_feedback(true, 1.0).unwrap();
        h.apply_feedback(true, 1.0).unwrap();
        assert_eq!(h.alpha, 3.0);
        assert_eq!(h.beta, 1.0);
        assert_eq!(h.confidence, 0.75);
    }

    #[test]
    fn correction_lowers_confidence() {
        let mut h = sample();
        h.alpha = 6.0;
        h.beta = 4.0;
        h.confidence = 0.6;
        h.apply_feedback(false, 1.0).unwrap();
        assert_eq!(h.beta, 5.0);
        assert!((h.confidence - 6.0 / 11.0).abs() < 1e-9);
    }

    #[test]
    fn zero_and_out_of_range_weights_are_rejected() {
        let mut h = sample();
        assert!(h.apply_feedback(true, 0.0).is_err());
        assert!(h.apply_feedback(true, 1.5).is_err());
        assert!(h.apply_feedback(true, -0.1).is_err());
    }

    #[test]
    fn validate_rejects_drifted_confidence() {
        let mut h = sample();
        h.confidence = 0.9;
        assert!(h.validate().is_err());
    }

    proptest! {
        // Invariant: any sequence of weighted observations keeps
        // alpha, beta > 0 and confidence = alpha/(alpha+beta) in [0, 1].
        #[test]
        fn feedback_preserves_invariants(
            observations in prop::collection::vec((any::<bool>(), 0.01f64..=1.0), 0..64)
        ) {
            let mut h = sample();
            for (positive, weight) in observations {
                h.apply_feedback(positive, weight).unwrap();
                prop_assert!(h.alpha > 0.0);
                prop_assert!(h.beta > 0.0);
                prop_assert!((0.0..=1.0).contains(&h.confidence));
                h.validate().unwrap();
            }
        }

        // Saturation: the same observation moves confidence less as
        // evidence accumulates.
        #[test]
        fn updates_saturate_with_mass(total in 2.0f64..500.0) {
            let mut young = sample();
            let mut old = sample();
            old.alpha = total / 2.0;
            old.beta = total / 2.0;
            old.confidence = 0.5;

            let before_young = young.confidence;
            let before_old = old.confidence;
            young.apply_feedback(true, 1.0).unwrap();
            old.apply_feedback(true, 1.0).unwrap();

            let young_delta = (young.confidence - before_young).abs();
            let old_delta = (old.confidence - before_old).abs();
            prop_assert!(old_delta <= young_delta);
        }
    }
}
