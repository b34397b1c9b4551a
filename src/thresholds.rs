//! Thresholds & Level Mapper.
//!
//! Pure, stateless mapping from a composite risk score to a categorical
//! [`RiskLevel`]. Shared by the streaming pipeline and the synchronous
//! scoring surface in [`crate::service`].

use serde::{Deserialize, Serialize};

use crate::model::RiskLevel;

/// Calibrated cutoffs for one score family.
///
/// The streaming core only ever evaluates the `combined_score` family; the
/// `fee/drug/diag` and `transaction/behavior/pattern` families observed in
/// the original threshold files are not modeled here because nothing in
/// this crate consults them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreThresholds {
    /// Scores below this are `normal`.
    pub low_max: f64,
    /// Scores below this (and at/above `low_max`) are `low`.
    pub medium_max: f64,
    /// Scores at/above this are `high`.
    pub high_min: f64,
}

impl Default for ScoreThresholds {
    fn default() -> Self {
        Self {
            low_max: 50.0,
            medium_max: 75.0,
            high_min: 90.0,
        }
    }
}

/// Full threshold document as loaded from `artefacts.thresholds_path`.
///
/// Only the `combined_score` family is consulted by this crate; additional
/// top-level keys in the on-disk JSON are ignored rather than rejected, so
/// operators can keep one threshold file shared with the offline
/// calibration job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thresholds {
    /// Thresholds for the combined risk score the streaming kernel emits.
    #[serde(default)]
    pub combined_score: ScoreThresholds,
    /// Calibration method tag, carried for provenance only.
    #[serde(default = "default_method")]
    pub method: String,
}

fn default_method() -> String {
    "default".to_string()
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            combined_score: ScoreThresholds::default(),
            method: default_method(),
        }
    }
}

/// Map a risk score to its categorical level using the piecewise rule
/// `score < low_max → normal; < medium_max → low; >= high_min → high;
/// else medium`.
pub fn level(score: f64, family: &ScoreThresholds) -> RiskLevel {
    if score < family.low_max {
        RiskLevel::Normal
    } else if score < family.medium_max {
        RiskLevel::Low
    } else if score >= family.high_min {
        RiskLevel::High
    } else {
        RiskLevel::Medium
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> ScoreThresholds {
        ScoreThresholds::default()
    }

    #[test]
    fn below_low_max_is_normal() {
        assert_eq!(level(49.9, &defaults()), RiskLevel::Normal);
    }

    #[test]
    fn at_low_max_is_low() {
        assert_eq!(level(50.0, &defaults()), RiskLevel::Low);
    }

    #[test]
    fn at_medium_max_is_medium() {
        assert_eq!(level(75.0, &defaults()), RiskLevel::Medium);
    }

    #[test]
    fn at_high_min_is_high() {
        assert_eq!(level(90.0, &defaults()), RiskLevel::High);
    }

    #[test]
    fn above_high_min_is_high() {
        assert_eq!(level(99.0, &defaults()), RiskLevel::High);
    }

    #[test]
    fn is_total_and_deterministic() {
        let family = defaults();
        for i in 0..=1000 {
            let score = i as f64 / 10.0;
            assert_eq!(level(score, &family), level(score, &family));
        }
    }
}
