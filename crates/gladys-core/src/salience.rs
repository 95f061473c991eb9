//! Salience vectors: per-dimension scores plus the reserved scalars that
//! gate routing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Default named dimensions every scorer populates.
pub const DEFAULT_DIMENSIONS: [&str; 5] = [
    "novelty",
    "goal_relevance",
    "opportunity",
    "actionability",
    "social",
];

/// Dimension keys a heuristic's salience boost may set. Anything else in
/// the boost JSON is ignored.
pub const BOOST_WHITELIST: [&str; 7] = [
    "novelty",
    "goal_relevance",
    "opportunity",
    "actionability",
    "social",
    "threat",
    "salience",
];

/// Salience scores for one event.
///
/// Named dimensions live in `dimensions`; `threat`, the `salience`
/// aggregate, and `habituation` are reserved scalars. All values are
/// clamped to [0, 1] on the way in; NaN is dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SalienceVector {
    /// Named dimensions. A `BTreeMap` keeps serialization stable.
    pub dimensions: BTreeMap<String, f64>,
    /// Threat bypasses habituation and queue ordering.
    pub threat: f64,
    /// Aggregate score used for routing.
    pub salience: f64,
    pub habituation: f64,
    /// Provenance of the scoring model.
    pub model_id: String,
}

fn clamp01(v: f64) -> Option<f64> {
    if v.is_nan() {
        None
    } else {
        Some(v.clamp(0.0, 1.0))
    }
}

impl SalienceVector {
    /// All-zero vector with every default dimension present.
    #[must_use]
    pub fn zero(model_id: &str) -> Self {
        let dimensions = DEFAULT_DIMENSIONS
            .iter()
            .map(|d| ((*d).to_string(), 0.0))
            .collect();
        Self {
            dimensions,
            model_id: model_id.to_string(),
            ..Self::default()
        }
    }

    /// The fallback vector used when no heuristic matches or the gateway
    /// is unreachable: novelty carries the configured weight, everything
    /// else is zero.
    #[must_use]
    pub fn fallback(novelty: f64, model_id: &str) -> Self {
        let mut v = Self::zero(model_id);
        v.set_dimension("novelty", novelty);
        v.recompute_aggregate();
        v
    }

    /// Set a named dimension, clamping to [0, 1] and dropping NaN.
    pub fn set_dimension(&mut self, name: &str, value: f64) {
        if let Some(v) = clamp01(value) {
            self.dimensions.insert(name.to_string(), v);
        }
    }

    /// A named dimension, or 0 when absent.
    #[must_use]
    pub fn dimension(&self, name: &str) -> f64 {
        self.dimensions.get(name).copied().unwrap_or(0.0)
    }

    /// Recompute the aggregate as the maximum over named dimensions.
    ///
    /// A single hot dimension escalates an event; averaging would let
    /// four cold dimensions mask one hot one. Threat is excluded; it has
    /// its own routing rule.
    pub fn recompute_aggregate(&mut self) {
        self.salience = self
            .dimensions
            .values()
            .copied()
            .fold(0.0_f64, f64::max)
            .clamp(0.0, 1.0);
    }

    /// Apply a heuristic's salience boost.
    ///
    /// The boost is a JSON object mapping dimension names to scalars.
    /// Only whitelisted keys are honored; values are clamped and NaN is
    /// dropped. Boosts raise scores, never lower them.
    pub fn apply_boost(&mut self, boost: &serde_json::Value) {
        let Some(map) = boost.as_object() else {
            return;
        };
        for (key, raw) in map {
            if !BOOST_WHITELIST.contains(&key.as_str()) {
                continue;
            }
            let Some(value) = raw.as_f64().and_then(clamp01) else {
                continue;
            };
            match key.as_str() {
                "threat" => self.threat = self.threat.max(value),
                "salience" => self.salience = self.salience.max(value),
                name => {
                    let current = self.dimension(name);
                    self.set_dimension(name, current.max(value));
                }
            }
        }
        let floor = self.salience;
        self.recompute_aggregate();
        self.salience = self.salience.max(floor);
    }

    /// Whether this event pre-empts queue ordering.
    #[must_use]
    pub fn is_threat(&self) -> bool {
        self.threat > 0.0
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::float_cmp)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn zero_has_all_default_dimensions() {
        let v = SalienceVector::zero("test");
        for d in DEFAULT_DIMENSIONS {
            assert_eq!(v.dimension(d), 0.0);
        }
        assert_eq!(v.salience, 0.0);
        assert!(!v.is_threat());
    }

    #[test]
    fn fallback_carries_novelty_into_aggregate() {
        let v = SalienceVector::fallback(0.8, "test");
        assert_eq!(v.dimension("novelty"), 0.8);
        assert_eq!(v.salience, 0.8);
    }

    #[test]
    fn aggregate_is_max_of_dimensions() {
        let mut v = SalienceVector::zero("test");
        v.set_dimension("social", 0.3);
        v.set_dimension("actionability", 0.9);
        v.recompute_aggregate();
        assert_eq!(v.salience, 0.9);
    }

    #[test]
    fn set_dimension_clamps_and_drops_nan() {
        let mut v = SalienceVector::zero("test");
        v.set_dimension("novelty", 1.7);
        assert_eq!(v.dimension("novelty"), 1.0);
        v.set_dimension("novelty", -0.5);
        assert_eq!(v.dimension("novelty"), 0.0);
        v.set_dimension("opportunity", f64::NAN);
        assert_eq!(v.dimension("opportunity"), 0.0);
    }

    #[test]
    fn boost_honors_whitelist_and_clamps() {
        let mut v = SalienceVector::zero("test");
        v.apply_boost(&json!({
            "goal_relevance": 0.7,
            "threat": 2.0,
            "salience": 0.6,
            "bogus_dimension": 0.9,
            "actionability": "high"
        }));
        assert_eq!(v.dimension("goal_relevance"), 0.7);
        assert_eq!(v.threat, 1.0);
        assert!(v.salience >= 0.7);
        assert_eq!(v.dimension("bogus_dimension"), 0.0);
        assert_eq!(v.dimension("actionability"), 0.0);
    }

    #[test]
    fn boost_never_lowers_existing_scores() {
        let mut v = SalienceVector::zero("test");
        v.set_dimension("novelty", 0.9);
        v.recompute_aggregate();
        v.apply_boost(&json!({"novelty": 0.1}));
        assert_eq!(v.dimension("novelty"), 0.9);
        assert_eq!(v.salience, 0.9);
    }

    #[test]
    fn non_object_boost_is_ignored() {
        let mut v = SalienceVector::zero("test");
        v.apply_boost(&json!([1, 2, 3]));
        v.apply_boost(&json!("0.9"));
        assert_eq!(v.salience, 0.0);
    }
}
