//! Three-parameter logistic IRT helpers.
//!
//! P(correct | θ, a, b, c) = c + (1 − c) / (1 + exp(−a(θ − b)))
//!
//! Mastery maps onto ability linearly: θ = (mastery − 0.5) · 6, so
//! mastery ∈ [0, 1] spans θ ∈ [−3, 3].

use crate::types::THETA_SCALE;

const MIN_THETA: f64 = -3.0;
const MAX_THETA: f64 = 3.0;

/// Exponent clamp to keep `exp` finite
const MAX_LOGIT: f64 = 20.0;

pub fn ability_from_mastery(mean_mastery: f64) -> f64 {
    ((mean_mastery - 0.5) * THETA_SCALE).clamp(MIN_THETA, MAX_THETA)
}

pub fn probability(theta: f64, a: f64, b: f64, c: f64) -> f64 {
    let c = c.clamp(0.0, 1.0);
    let z = (a * (theta - b)).clamp(-MAX_LOGIT, MAX_LOGIT);
    c + (1.0 - c) / (1.0 + (-z).exp())
}

/// 3PL item information at θ
pub fn item_information(theta: f64, a: f64, b: f64, c: f64) -> f64 {
    let p = probability(theta, a, b, c);
    let c = c.clamp(0.0, 1.0);
    if p <= 0.0 || p >= 1.0 || c >= 1.0 {
        return 0.0;
    }
    a * a * ((p - c) / (1.0 - c)).powi(2) * (1.0 - p) / p
}

/// Preference for items slightly above current ability: exp(−|b − (θ + offset)| / scale)
pub fn difficulty_match(theta: f64, b: f64, offset: f64, scale: f64) -> f64 {
    let gap = b - (theta + offset);
    (-gap.abs() / scale.max(f64::EPSILON)).exp()
}
