use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::bkt::BktParameters;
use crate::error::{AssessError, Result};
use crate::sanitize::{validate_bkt_parameters, validate_non_negative, validate_probability};
use crate::types::LearnerLevel;

/// Response-time bands that scale the learning rate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LearnTimingConfig {
    /// Below this the answer counts as rushed
    pub rushed_ms: u64,
    pub deliberate_min_ms: u64,
    pub deliberate_max_ms: u64,
    /// Above this the answer counts as stalled
    pub stalled_ms: u64,
    pub rushed_factor: f64,
    pub deliberate_factor: f64,
    pub stalled_factor: f64,
}

impl Default for LearnTimingConfig {
    fn default() -> Self {
        Self {
            rushed_ms: 10_000,
            deliberate_min_ms: 30_000,
            deliberate_max_ms: 120_000,
            stalled_ms: 180_000,
            rushed_factor: 0.5,
            deliberate_factor: 1.1,
            stalled_factor: 0.8,
        }
    }
}

impl LearnTimingConfig {
    /// Learning-rate multiplier for a response time; 1.0 without timing data
    pub fn multiplier(&self, time_spent_ms: Option<u64>) -> f64 {
        match time_spent_ms {
            Some(t) if t < self.rushed_ms => self.rushed_factor,
            Some(t) if t > self.stalled_ms => self.stalled_factor,
            Some(t) if (self.deliberate_min_ms..=self.deliberate_max_ms).contains(&t) => {
                self.deliberate_factor
            }
            _ => 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BktConfig {
    pub defaults: BktParameters,
    /// Per-skill overrides keyed by skill code
    pub overrides: HashMap<String, BktParameters>,
    pub weak_below: f64,
    pub mastered_at: f64,
    pub timing: LearnTimingConfig,
}

impl Default for BktConfig {
    fn default() -> Self {
        Self {
            defaults: BktParameters::default(),
            overrides: HashMap::new(),
            weak_below: 0.6,
            mastered_at: 0.85,
            timing: LearnTimingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClassifierConfig {
    pub too_fast_ms: u64,
    pub slow_ms: u64,
    /// Attempts beyond this count are treated as giving up
    pub gave_up_after: u32,
    /// Share of outcome-derived confidence in the blend; the rest is self-report
    pub outcome_weight: f64,
    pub numeric_tolerance: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            too_fast_ms: 30_000,
            slow_ms: 300_000,
            gave_up_after: 3,
            outcome_weight: 0.7,
            numeric_tolerance: 1e-6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SelectorWeights {
    pub information_gain: f64,
    pub difficulty_match: f64,
    pub diversity: f64,
    pub recency: f64,
}

impl Default for SelectorWeights {
    fn default() -> Self {
        Self {
            information_gain: 0.4,
            difficulty_match: 0.3,
            diversity: 0.2,
            recency: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SelectorConfig {
    pub weights: SelectorWeights,
    pub recent_items_capacity: usize,
    pub recent_skills_capacity: usize,
    /// Preferred item difficulty sits this far above current ability
    pub difficulty_offset: f64,
    pub difficulty_scale: f64,
    /// Confidence (0-100) assumed when simulating responses for EIG
    pub simulation_confidence: f64,
    /// Hypothetical P(correct) used by batch pre-fetch simulation
    pub batch_correct_probability: f64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            weights: SelectorWeights::default(),
            recent_items_capacity: 10,
            recent_skills_capacity: 15,
            difficulty_offset: 0.5,
            difficulty_scale: 2.0,
            simulation_confidence: 50.0,
            batch_correct_probability: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StopRuleConfig {
    pub stability_epsilon: f64,
    pub min_evidence: u32,
    pub insufficient_evidence_ratio: f64,
    pub entropy_threshold: f64,
}

impl Default for StopRuleConfig {
    fn default() -> Self {
        Self {
            stability_epsilon: 0.15,
            min_evidence: 2,
            insufficient_evidence_ratio: 0.3,
            entropy_threshold: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TerminationConfig {
    pub min_strengths: usize,
    pub strengths_confidence: f64,
    pub min_weaknesses: usize,
    pub min_error_patterns: usize,
    pub weaknesses_confidence: f64,
    pub clean_strengths: usize,
    pub clean_confidence: f64,
}

impl Default for TerminationConfig {
    fn default() -> Self {
        Self {
            min_strengths: 2,
            strengths_confidence: 0.85,
            min_weaknesses: 2,
            min_error_patterns: 1,
            weaknesses_confidence: 0.8,
            clean_strengths: 3,
            clean_confidence: 0.9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FallbackWeights {
    pub branch_affinity: f64,
    pub weak_concept: f64,
    pub error_target: f64,
    pub difficulty: f64,
    pub information: f64,
}

impl Default for FallbackWeights {
    fn default() -> Self {
        Self {
            branch_affinity: 0.3,
            weak_concept: 0.2,
            error_target: 0.2,
            difficulty: 0.1,
            information: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OrchestratorConfig {
    pub fallback: FallbackWeights,
    /// Classification confidence below this implies remediation
    pub low_confidence: f64,
    /// Correct answers at or above this confidence imply extension
    pub high_confidence: f64,
    /// Evidence needed before the running diagnosis lists a skill
    pub diagnosis_min_evidence: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            fallback: FallbackWeights::default(),
            low_confidence: 0.5,
            high_confidence: 0.8,
            diagnosis_min_evidence: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DiagnosisConfig {
    pub strength_accuracy: f64,
    pub weakness_error_rate: f64,
    /// Share of per-skill evidence confidence when blending with session confidence
    pub evidence_weight: f64,
    pub base_hours_beginner: f64,
    pub base_hours_intermediate: f64,
    pub base_hours_advanced: f64,
    pub weakness_factor: f64,
    pub confidence_factor: f64,
}

impl Default for DiagnosisConfig {
    fn default() -> Self {
        Self {
            strength_accuracy: 0.7,
            weakness_error_rate: 0.3,
            evidence_weight: 0.6,
            base_hours_beginner: 20.0,
            base_hours_intermediate: 12.0,
            base_hours_advanced: 8.0,
            weakness_factor: 0.3,
            confidence_factor: 0.5,
        }
    }
}

impl DiagnosisConfig {
    pub fn base_hours(&self, level: LearnerLevel) -> f64 {
        match level {
            LearnerLevel::Beginner => self.base_hours_beginner,
            LearnerLevel::Intermediate => self.base_hours_intermediate,
            LearnerLevel::Advanced => self.base_hours_advanced,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    pub min_questions: u32,
    pub max_questions: u32,
    pub level: LearnerLevel,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            min_questions: 5,
            max_questions: 20,
            level: LearnerLevel::Beginner,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `adaptive_assess=debug`
    pub level: String,
    pub file_logs: bool,
    pub log_dir: String,
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_logs: false,
            log_dir: "./logs".to_string(),
            file_prefix: "assess.log".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AssessConfig {
    pub bkt: BktConfig,
    pub classifier: ClassifierConfig,
    pub selector: SelectorConfig,
    pub stop: StopRuleConfig,
    pub termination: TerminationConfig,
    pub orchestrator: OrchestratorConfig,
    pub diagnosis: DiagnosisConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

impl AssessConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(val) = env_parse::<u32>("ASSESS_MIN_QUESTIONS") {
            config.session.min_questions = val;
        }
        if let Some(val) = env_parse::<u32>("ASSESS_MAX_QUESTIONS") {
            config.session.max_questions = val;
        }
        if let Some(val) = env_parse::<f64>("ASSESS_DIVERSITY_WEIGHT") {
            config.selector.weights.diversity = val;
        }
        if let Some(val) = env_parse::<f64>("ASSESS_STABILITY_EPSILON") {
            config.stop.stability_epsilon = val;
        }
        if let Some(val) = env_parse::<f64>("ASSESS_ENTROPY_THRESHOLD") {
            config.stop.entropy_threshold = val;
        }
        if let Ok(val) = std::env::var("RUST_LOG") {
            if !val.trim().is_empty() {
                config.logging.level = val;
            }
        }
        if let Ok(val) = std::env::var("ENABLE_FILE_LOGS") {
            config.logging.file_logs = val == "true" || val == "1";
        }
        if let Ok(val) = std::env::var("LOG_DIR") {
            config.logging.log_dir = val;
        }
        if let Ok(val) = std::env::var("ASSESS_LEARNER_LEVEL") {
            match LearnerLevel::from_name(&val) {
                Some(level) => config.session.level = level,
                None => tracing::warn!(value = %val, "unknown ASSESS_LEARNER_LEVEL, keeping default"),
            }
        }

        config
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_bkt_parameters("bkt.defaults", &self.bkt.defaults)?;
        for (code, params) in &self.bkt.overrides {
            validate_bkt_parameters(&format!("bkt.overrides.{code}"), params)?;
        }

        let timing = &self.bkt.timing;
        validate_non_negative("bkt.timing.rushedFactor", timing.rushed_factor)?;
        validate_non_negative("bkt.timing.deliberateFactor", timing.deliberate_factor)?;
        validate_non_negative("bkt.timing.stalledFactor", timing.stalled_factor)?;
        if !(timing.rushed_ms <= timing.deliberate_min_ms
            && timing.deliberate_min_ms <= timing.deliberate_max_ms
            && timing.deliberate_max_ms <= timing.stalled_ms)
        {
            return Err(AssessError::InvalidConfig(format!(
                "bkt.timing bands out of order: {} <= {} <= {} <= {} ms expected",
                timing.rushed_ms, timing.deliberate_min_ms, timing.deliberate_max_ms, timing.stalled_ms
            )));
        }

        let w = &self.selector.weights;
        validate_probability("selector.weights.informationGain", w.information_gain)?;
        validate_probability("selector.weights.difficultyMatch", w.difficulty_match)?;
        validate_probability("selector.weights.diversity", w.diversity)?;
        validate_probability("selector.weights.recency", w.recency)?;
        validate_probability(
            "selector.batchCorrectProbability",
            self.selector.batch_correct_probability,
        )?;
        validate_probability("stop.stabilityEpsilon", self.stop.stability_epsilon)?;
        validate_probability("classifier.outcomeWeight", self.classifier.outcome_weight)?;
        validate_non_negative("classifier.numericTolerance", self.classifier.numeric_tolerance)?;
        validate_non_negative("selector.difficultyScale", self.selector.difficulty_scale)?;

        let d = &self.diagnosis;
        validate_probability("diagnosis.evidenceWeight", d.evidence_weight)?;
        validate_non_negative("diagnosis.baseHoursBeginner", d.base_hours_beginner)?;
        validate_non_negative("diagnosis.baseHoursIntermediate", d.base_hours_intermediate)?;
        validate_non_negative("diagnosis.baseHoursAdvanced", d.base_hours_advanced)?;

        if self.bkt.weak_below > self.bkt.mastered_at {
            return Err(AssessError::InvalidConfig(format!(
                "bkt.weakBelow ({}) exceeds bkt.masteredAt ({})",
                self.bkt.weak_below, self.bkt.mastered_at
            )));
        }
        if self.session.min_questions > self.session.max_questions {
            return Err(AssessError::InvalidConfig(format!(
                "session.minQuestions ({}) exceeds session.maxQuestions ({})",
                self.session.min_questions, self.session.max_questions
            )));
        }
        if self.selector.recent_items_capacity == 0 || self.selector.recent_skills_capacity == 0 {
            return Err(AssessError::InvalidConfig(
                "selector window capacities must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(val) => Some(val),
        Err(_) => {
            tracing::warn!(key, value = %raw, "unparsable config override, keeping default");
            None
        }
    }
}
