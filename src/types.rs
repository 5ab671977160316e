//! Common Types and Constants
//!
//! Shared enums and numeric bounds used across the tracker, selector,
//! orchestrator and diagnosis modules.

use serde::{Deserialize, Serialize};

// ==================== Constants ====================

/// Lower clamp for a mastery probability
pub const MIN_MASTERY: f64 = 0.01;

/// Upper clamp for a mastery probability
pub const MAX_MASTERY: f64 = 0.99;

/// Numerical stability epsilon
pub const EPSILON: f64 = 1e-10;

/// Ability scale: mastery 0..1 maps onto theta -3..3
pub const THETA_SCALE: f64 = 6.0;

// ==================== Mastery Level ====================

/// Derived category of a mastery probability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MasteryLevel {
    Weak,
    Developing,
    Mastered,
}

impl MasteryLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weak => "WEAK",
            Self::Developing => "DEVELOPING",
            Self::Mastered => "MASTERED",
        }
    }

    /// Categorize with explicit thresholds (`p < weak` is weak, `p >= mastered` is mastered)
    pub fn from_probability(p: f64, weak_below: f64, mastered_at: f64) -> Self {
        if p < weak_below {
            Self::Weak
        } else if p < mastered_at {
            Self::Developing
        } else {
            Self::Mastered
        }
    }
}

// ==================== Difficulty Tier ====================

/// Coarse difficulty tier declared by the question bank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DifficultyTier {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl DifficultyTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }

    pub fn harder(&self) -> Self {
        match self {
            Self::Easy => Self::Medium,
            _ => Self::Hard,
        }
    }

    pub fn easier(&self) -> Self {
        match self {
            Self::Hard => Self::Medium,
            _ => Self::Easy,
        }
    }
}

// ==================== Learner Level ====================

/// Self-declared or placement level of the test-taker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LearnerLevel {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
}

impl LearnerLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Beginner => "beginner",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "beginner" => Some(Self::Beginner),
            "intermediate" => Some(Self::Intermediate),
            "advanced" => Some(Self::Advanced),
            _ => None,
        }
    }
}

/// Mean of a slice, `None` when empty
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Binary entropy in bits; 0 at p ∈ {0, 1}, 1 at p = 0.5
pub fn binary_entropy(p: f64) -> f64 {
    if p <= 0.0 || p >= 1.0 || p.is_nan() {
        return 0.0;
    }
    -p * p.log2() - (1.0 - p) * (1.0 - p).log2()
}
