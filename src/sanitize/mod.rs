//! Data Sanitization
//!
//! Numerical guards for probabilities and caller-supplied inputs.
//!
//! Functions:
//! - Probability / confidence clamping
//! - Field validation with descriptive errors
//! - Mastery map health diagnostics

use serde::{Deserialize, Serialize};

use crate::bkt::{BktParameters, SkillMastery};
use crate::error::{AssessError, Result};
use crate::types::{MAX_MASTERY, MIN_MASTERY};

/// Neutral self-reported confidence used when the input is unusable
pub const NEUTRAL_CONFIDENCE: f64 = 50.0;

/// Clamp a mastery probability into [MIN_MASTERY, MAX_MASTERY]; NaN falls back to `fallback`
pub fn clamp_mastery(p: f64, fallback: f64) -> f64 {
    if p.is_nan() {
        return fallback.clamp(MIN_MASTERY, MAX_MASTERY);
    }
    p.clamp(MIN_MASTERY, MAX_MASTERY)
}

/// Clamp a 0-100 confidence; non-finite values become neutral
pub fn sanitize_confidence(confidence: f64) -> f64 {
    if confidence.is_finite() {
        confidence.clamp(0.0, 100.0)
    } else {
        NEUTRAL_CONFIDENCE
    }
}

/// Reject NaN/Inf and values outside [0, 1]
pub fn validate_probability(field: &str, value: f64) -> Result<f64> {
    if !value.is_finite() {
        return Err(AssessError::invalid_field(field, "must be finite"));
    }
    if !(0.0..=1.0).contains(&value) {
        return Err(AssessError::invalid_field(
            field,
            format!("{value} is outside [0, 1]"),
        ));
    }
    Ok(value)
}

/// Reject NaN/Inf and negative values
pub fn validate_non_negative(field: &str, value: f64) -> Result<f64> {
    if !value.is_finite() || value < 0.0 {
        return Err(AssessError::invalid_field(
            field,
            format!("{value} must be a finite non-negative number"),
        ));
    }
    Ok(value)
}

/// Range-check every BKT rate. Only configuration loading calls this; the
/// update path itself never validates.
pub fn validate_bkt_parameters(field: &str, params: &BktParameters) -> Result<()> {
    validate_probability(&format!("{field}.pInit"), params.p_init)?;
    validate_probability(&format!("{field}.pLearn"), params.p_learn)?;
    validate_probability(&format!("{field}.pSlip"), params.p_slip)?;
    validate_probability(&format!("{field}.pGuess"), params.p_guess)?;
    Ok(())
}

/// Health report for a set of skill masteries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryDiagnostic {
    pub is_healthy: bool,
    pub out_of_bounds: Vec<String>,
    pub count_mismatch: Vec<String>,
    pub message: String,
}

/// Checks bounds and `evidence = correct + incorrect`
pub fn diagnose_masteries<'a, I>(masteries: I) -> MasteryDiagnostic
where
    I: IntoIterator<Item = &'a SkillMastery>,
{
    let mut out_of_bounds = Vec::new();
    let mut count_mismatch = Vec::new();

    for mastery in masteries {
        let p = mastery.p_mastery;
        if !(MIN_MASTERY..=MAX_MASTERY).contains(&p) || p.is_nan() {
            out_of_bounds.push(mastery.skill_code.clone());
        }
        if mastery.evidence_count != mastery.correct_count + mastery.incorrect_count {
            count_mismatch.push(mastery.skill_code.clone());
        }
    }

    let is_healthy = out_of_bounds.is_empty() && count_mismatch.is_empty();
    let message = if is_healthy {
        "Mastery state is healthy".to_string()
    } else if !out_of_bounds.is_empty() {
        format!("Mastery out of bounds for: {}", out_of_bounds.join(", "))
    } else {
        format!("Evidence counters inconsistent for: {}", count_mismatch.join(", "))
    };

    MasteryDiagnostic {
        is_healthy,
        out_of_bounds,
        count_mismatch,
        message,
    }
}
