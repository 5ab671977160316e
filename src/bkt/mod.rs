//! Bayesian Knowledge Tracing
//!
//! Tracks one continuous belief per skill: the probability that the skill
//! is mastered. Each observed response updates the belief with Bayes' rule
//! and then blends in a learning increment.
//!
//! Rate adjustments from observed behaviour (confidence on a 0-100 scale):
//! - slip' = max(0.05, slip · (1 − confidence/100 · 0.5))
//! - guess' = min(0.5, guess · 1.5) when confidence < 50
//! - learn' = learn · {0.5 if t < 10s, 0.8 if t > 180s, 1.1 if 30s ≤ t ≤ 120s}
//!   (bands and factors come from `BktConfig::timing`)
//!
//! Update:
//! - correct: post = p(1−slip') / P(obs), p' = post + (1−post)·learn'
//! - incorrect: post = p·slip' / P(obs), p' = post + (1−post)·learn'/2
//! - p' is clamped to [0.01, 0.99]
//!
//! The update path is deterministic; nothing here draws random numbers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::BktConfig;
use crate::sanitize::{clamp_mastery, sanitize_confidence};
use crate::types::{binary_entropy, MasteryLevel, EPSILON};

// ==================== Constants ====================

const DEFAULT_P_INIT: f64 = 0.3;
const DEFAULT_P_LEARN: f64 = 0.15;
const DEFAULT_P_SLIP: f64 = 0.1;
const DEFAULT_P_GUESS: f64 = 0.2;

/// Floor for the adjusted slip rate
const MIN_ADJUSTED_SLIP: f64 = 0.05;

/// Ceiling for the adjusted guess rate
const MAX_ADJUSTED_GUESS: f64 = 0.5;

/// Self-reported confidence below this inflates the guess rate
const LOW_CONFIDENCE: f64 = 50.0;

/// Incorrect answers still teach, at half the rate
const INCORRECT_LEARN_FACTOR: f64 = 0.5;

/// Skill code → mastery, ordered for deterministic iteration
pub type MasteryMap = BTreeMap<String, SkillMastery>;

// ==================== Data Structures ====================

/// Per-skill BKT rates, fixed for the lifetime of a session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BktParameters {
    pub p_init: f64,
    pub p_learn: f64,
    pub p_slip: f64,
    pub p_guess: f64,
}

impl Default for BktParameters {
    fn default() -> Self {
        Self {
            p_init: DEFAULT_P_INIT,
            p_learn: DEFAULT_P_LEARN,
            p_slip: DEFAULT_P_SLIP,
            p_guess: DEFAULT_P_GUESS,
        }
    }
}

/// Belief state for one skill within one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillMastery {
    pub skill_code: String,
    pub p_mastery: f64,
    pub evidence_count: u32,
    pub correct_count: u32,
    pub incorrect_count: u32,
    /// Unix millis of the last update (creation time before any evidence)
    pub last_updated: i64,
    pub params: BktParameters,
}

impl SkillMastery {
    pub fn new(skill_code: impl Into<String>, params: BktParameters) -> Self {
        Self {
            skill_code: skill_code.into(),
            p_mastery: clamp_mastery(params.p_init, DEFAULT_P_INIT),
            evidence_count: 0,
            correct_count: 0,
            incorrect_count: 0,
            last_updated: chrono::Utc::now().timestamp_millis(),
            params,
        }
    }

    pub fn accuracy(&self) -> Option<f64> {
        if self.evidence_count == 0 {
            None
        } else {
            Some(self.correct_count as f64 / self.evidence_count as f64)
        }
    }
}

/// Result of a single-skill update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryUpdate {
    pub skill_code: String,
    pub previous_mastery: f64,
    pub new_mastery: f64,
    pub is_correct: bool,
    pub confidence: f64,
}

impl MasteryUpdate {
    pub fn delta(&self) -> f64 {
        self.new_mastery - self.previous_mastery
    }
}

/// How much an item's response counts toward one of its skills
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillContribution {
    pub skill_code: String,
    /// Multiplies the confidence fed to the update (1.0 = full weight)
    pub weight: f64,
}

impl SkillContribution {
    pub fn full(skill_code: impl Into<String>) -> Self {
        Self {
            skill_code: skill_code.into(),
            weight: 1.0,
        }
    }
}

/// Slip/guess/learn after behavioural adjustment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdjustedRates {
    pub slip: f64,
    pub guess: f64,
    pub learn: f64,
}

/// Level counts over a mastery map
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterySummary {
    pub weak: usize,
    pub developing: usize,
    pub mastered: usize,
    pub mean_mastery: f64,
}

// ==================== Main Implementation ====================

/// Owns the BKT parameter table; all state lives in the caller's `SkillMastery` values
#[derive(Debug, Clone, Default)]
pub struct MasteryTracker {
    config: BktConfig,
}

impl MasteryTracker {
    pub fn new(config: BktConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BktConfig {
        &self.config
    }

    /// Parameters for a skill: the override table wins over global defaults
    pub fn params_for(&self, skill_code: &str) -> BktParameters {
        self.config
            .overrides
            .get(skill_code)
            .copied()
            .unwrap_or(self.config.defaults)
    }

    pub fn initialize(&self, skill_code: &str) -> SkillMastery {
        SkillMastery::new(skill_code, self.params_for(skill_code))
    }

    /// Adjust slip/guess/learn for observed confidence (0-100) and response time
    pub fn adjusted_rates(
        &self,
        params: &BktParameters,
        confidence: f64,
        time_spent_ms: Option<u64>,
    ) -> AdjustedRates {
        let mut rates = Self::untimed_rates(params, confidence);
        rates.learn *= self.config.timing.multiplier(time_spent_ms);
        rates
    }

    /// Confidence-only adjustment; the learning rate is left as configured
    pub fn untimed_rates(params: &BktParameters, confidence: f64) -> AdjustedRates {
        let confidence = sanitize_confidence(confidence);

        let slip = (params.p_slip * (1.0 - (confidence / 100.0) * 0.5)).max(MIN_ADJUSTED_SLIP);

        let guess = if confidence < LOW_CONFIDENCE {
            (params.p_guess * 1.5).min(MAX_ADJUSTED_GUESS)
        } else {
            params.p_guess
        };

        AdjustedRates {
            slip,
            guess,
            learn: params.p_learn,
        }
    }

    /// Posterior mastery after one observation, without touching any state
    pub fn preview(
        &self,
        prior: f64,
        params: &BktParameters,
        is_correct: bool,
        confidence: f64,
        time_spent_ms: Option<u64>,
    ) -> f64 {
        let rates = self.adjusted_rates(params, confidence, time_spent_ms);
        Self::posterior(prior, is_correct, &rates)
    }

    /// [`preview`](Self::preview) for simulated responses that carry no timing
    pub fn preview_untimed(
        prior: f64,
        params: &BktParameters,
        is_correct: bool,
        confidence: f64,
    ) -> f64 {
        Self::posterior(prior, is_correct, &Self::untimed_rates(params, confidence))
    }

    fn posterior(prior: f64, is_correct: bool, rates: &AdjustedRates) -> f64 {
        let p_observation = if is_correct {
            prior * (1.0 - rates.slip) + (1.0 - prior) * rates.guess
        } else {
            prior * rates.slip + (1.0 - prior) * (1.0 - rates.guess)
        };

        // Only reachable with degenerate caller-supplied rates
        if p_observation <= EPSILON || !p_observation.is_finite() {
            return clamp_mastery(prior, prior);
        }

        let next = if is_correct {
            let posterior = prior * (1.0 - rates.slip) / p_observation;
            posterior + (1.0 - posterior) * rates.learn
        } else {
            let posterior = prior * rates.slip / p_observation;
            posterior + (1.0 - posterior) * (rates.learn * INCORRECT_LEARN_FACTOR)
        };

        clamp_mastery(next, prior)
    }

    pub fn update(
        &self,
        mastery: &mut SkillMastery,
        is_correct: bool,
        confidence: f64,
        time_spent_ms: Option<u64>,
    ) -> MasteryUpdate {
        self.update_at(
            mastery,
            is_correct,
            confidence,
            time_spent_ms,
            chrono::Utc::now().timestamp_millis(),
        )
    }

    /// Same as [`update`](Self::update) with an explicit timestamp
    pub fn update_at(
        &self,
        mastery: &mut SkillMastery,
        is_correct: bool,
        confidence: f64,
        time_spent_ms: Option<u64>,
        now_ms: i64,
    ) -> MasteryUpdate {
        let previous = mastery.p_mastery;
        let next = self.preview(previous, &mastery.params, is_correct, confidence, time_spent_ms);

        mastery.p_mastery = next;
        mastery.evidence_count += 1;
        if is_correct {
            mastery.correct_count += 1;
        } else {
            mastery.incorrect_count += 1;
        }
        mastery.last_updated = now_ms;

        tracing::debug!(
            skill = %mastery.skill_code,
            previous,
            next,
            is_correct,
            confidence,
            "mastery updated"
        );

        MasteryUpdate {
            skill_code: mastery.skill_code.clone(),
            previous_mastery: previous,
            new_mastery: next,
            is_correct,
            confidence,
        }
    }

    /// Apply one response to every listed skill; unknown skills are skipped
    pub fn update_multiple_skills(
        &self,
        masteries: &mut MasteryMap,
        contributions: &[SkillContribution],
        is_correct: bool,
        confidence: f64,
        time_spent_ms: Option<u64>,
    ) -> Vec<MasteryUpdate> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut updates = Vec::with_capacity(contributions.len());

        for contribution in contributions {
            let Some(mastery) = masteries.get_mut(&contribution.skill_code) else {
                tracing::debug!(skill = %contribution.skill_code, "skipping untracked skill");
                continue;
            };
            let weight = if contribution.weight.is_finite() {
                contribution.weight.max(0.0)
            } else {
                1.0
            };
            let weighted = sanitize_confidence(confidence * weight);
            updates.push(self.update_at(mastery, is_correct, weighted, time_spent_ms, now_ms));
        }

        updates
    }

    pub fn level(&self, mastery: &SkillMastery) -> MasteryLevel {
        MasteryLevel::from_probability(
            mastery.p_mastery,
            self.config.weak_below,
            self.config.mastered_at,
        )
    }

    pub fn summarize<'a, I>(&self, masteries: I) -> MasterySummary
    where
        I: IntoIterator<Item = &'a SkillMastery>,
    {
        let mut summary = MasterySummary::default();
        let mut total = 0.0;
        let mut count = 0usize;

        for mastery in masteries {
            match self.level(mastery) {
                MasteryLevel::Weak => summary.weak += 1,
                MasteryLevel::Developing => summary.developing += 1,
                MasteryLevel::Mastered => summary.mastered += 1,
            }
            total += mastery.p_mastery;
            count += 1;
        }

        if count > 0 {
            summary.mean_mastery = total / count as f64;
        }
        summary
    }
}

// ==================== Derived Queries ====================

/// Expected probability of a correct answer under the BKT emission model
pub fn response_probability(mastery: &SkillMastery) -> f64 {
    let p = mastery.p_mastery;
    p * (1.0 - mastery.params.p_slip) + (1.0 - p) * mastery.params.p_guess
}

/// Mean binary entropy (bits) across masteries; 0 for an empty set
pub fn information_gain<'a, I>(masteries: I) -> f64
where
    I: IntoIterator<Item = &'a SkillMastery>,
{
    mean_entropy(masteries.into_iter().map(|m| m.p_mastery))
}

/// Mean binary entropy of raw probabilities
pub fn mean_entropy<I>(probabilities: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let mut sum = 0.0;
    let mut count = 0usize;
    for p in probabilities {
        sum += binary_entropy(p);
        count += 1;
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// True once the belief sits within `epsilon` of either extreme
pub fn is_stable(mastery: &SkillMastery, epsilon: f64) -> bool {
    mastery.p_mastery < epsilon || mastery.p_mastery > 1.0 - epsilon
}
