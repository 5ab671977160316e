//! Response Classifier
//!
//! Turns a raw submission plus timing and self-reported confidence into a
//! structured judgment: correctness, partial credit, error tags, a timing
//! bucket, an attempt pattern and a blended confidence in [0, 1].
//!
//! Buckets:
//! - timing: too-fast (< 30s), slow (> 300s), otherwise normal
//! - attempts: first-try (1), gave-up (> 3), otherwise multiple-attempts
//!
//! Confidence = 0.7 · outcome confidence + 0.3 · self-report / 100 when a
//! self-report is present, otherwise the outcome confidence alone.

pub mod grading;

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};

use crate::config::ClassifierConfig;
use crate::error::{AssessError, Result};

pub use grading::{AnswerFormat, AnswerPayload, CanonicalAnswer, GradeResult};

// ==================== Data Structures ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimingBucket {
    TooFast,
    Normal,
    Slow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttemptPattern {
    FirstTry,
    MultipleAttempts,
    GaveUp,
}

/// Coarse outcome used for branching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseOutcome {
    Correct,
    Incorrect,
    Partial,
    NoAttempt,
}

/// How a misconception shows up in an answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ErrorMatcher {
    /// A specific distractor was chosen
    Choice { value: String },
    /// Case-insensitive substring of the answer text
    Contains { text: String },
    /// Case-insensitive regex over the answer text
    Regex { pattern: String },
    /// A specific wrong numeric value
    NumericValue { value: f64, tolerance: f64 },
}

/// Question-specific error tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPattern {
    pub code: String,
    pub matcher: ErrorMatcher,
}

/// The part of an item the classifier needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub format: AnswerFormat,
    #[serde(default)]
    pub error_patterns: Vec<ErrorPattern>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub answer: AnswerPayload,
    pub elapsed_ms: u64,
    /// 1-based
    pub attempt_number: u32,
    /// Self-reported confidence, 0-100
    #[serde(default)]
    pub self_confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub is_correct: bool,
    pub is_partially_correct: bool,
    pub outcome: ResponseOutcome,
    pub error_types: Vec<String>,
    /// Blended confidence in [0, 1]
    pub confidence: f64,
    pub timing_bucket: TimingBucket,
    pub attempt_pattern: AttemptPattern,
}

impl Classification {
    /// Confidence on the 0-100 scale the mastery tracker expects
    pub fn bkt_confidence(&self) -> f64 {
        self.confidence * 100.0
    }

    pub fn is_fast_correct(&self) -> bool {
        self.is_correct
            && self.attempt_pattern == AttemptPattern::FirstTry
            && self.timing_bucket == TimingBucket::TooFast
    }

    pub fn gave_up(&self) -> bool {
        self.attempt_pattern == AttemptPattern::GaveUp
    }
}

// ==================== Main Implementation ====================

#[derive(Debug, Clone, Default)]
pub struct ResponseClassifier {
    config: ClassifierConfig,
}

impl ResponseClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn classify(
        &self,
        question: &Question,
        canonical: &CanonicalAnswer,
        response: &Response,
    ) -> Result<Classification> {
        if response.attempt_number == 0 {
            return Err(AssessError::invalid_field(
                "response.attemptNumber",
                "attempts are 1-based",
            ));
        }
        if let Some(conf) = response.self_confidence {
            if !conf.is_finite() || !(0.0..=100.0).contains(&conf) {
                return Err(AssessError::invalid_field(
                    "response.selfConfidence",
                    format!("{conf} is outside [0, 100]"),
                ));
            }
        }

        let grade = grading::grade(
            question.format,
            &response.answer,
            canonical,
            self.config.numeric_tolerance,
        )?;

        let outcome = if grade.no_attempt {
            ResponseOutcome::NoAttempt
        } else if grade.is_correct {
            ResponseOutcome::Correct
        } else if grade.is_partial {
            ResponseOutcome::Partial
        } else {
            ResponseOutcome::Incorrect
        };

        let timing_bucket = self.timing_bucket(response.elapsed_ms);
        let attempt_pattern = self.attempt_pattern(response.attempt_number);

        let mut error_types = grade.tags.clone();
        if matches!(outcome, ResponseOutcome::Incorrect | ResponseOutcome::Partial) {
            for code in match_error_patterns(&question.error_patterns, &response.answer)? {
                if !error_types.contains(&code) {
                    error_types.push(code);
                }
            }
        }

        let outcome_confidence = outcome_confidence(outcome, timing_bucket, attempt_pattern);
        let confidence = match response.self_confidence {
            Some(self_report) => {
                let w = self.config.outcome_weight;
                w * outcome_confidence + (1.0 - w) * (self_report / 100.0)
            }
            None => outcome_confidence,
        }
        .clamp(0.0, 1.0);

        tracing::debug!(
            question = %question.id,
            ?outcome,
            ?timing_bucket,
            ?attempt_pattern,
            confidence,
            errors = error_types.len(),
            "response classified"
        );

        Ok(Classification {
            is_correct: grade.is_correct,
            is_partially_correct: grade.is_partial,
            outcome,
            error_types,
            confidence,
            timing_bucket,
            attempt_pattern,
        })
    }

    pub fn timing_bucket(&self, elapsed_ms: u64) -> TimingBucket {
        if elapsed_ms < self.config.too_fast_ms {
            TimingBucket::TooFast
        } else if elapsed_ms > self.config.slow_ms {
            TimingBucket::Slow
        } else {
            TimingBucket::Normal
        }
    }

    pub fn attempt_pattern(&self, attempt_number: u32) -> AttemptPattern {
        if attempt_number <= 1 {
            AttemptPattern::FirstTry
        } else if attempt_number > self.config.gave_up_after {
            AttemptPattern::GaveUp
        } else {
            AttemptPattern::MultipleAttempts
        }
    }
}

/// Confidence implied by the outcome alone
fn outcome_confidence(
    outcome: ResponseOutcome,
    timing: TimingBucket,
    attempts: AttemptPattern,
) -> f64 {
    if attempts == AttemptPattern::GaveUp {
        return 0.2;
    }
    let first_try = attempts == AttemptPattern::FirstTry;
    match outcome {
        ResponseOutcome::Correct if first_try && timing == TimingBucket::Normal => 0.9,
        ResponseOutcome::Correct if first_try => 0.75,
        ResponseOutcome::Correct => 0.6,
        ResponseOutcome::Partial => 0.5,
        ResponseOutcome::Incorrect if first_try && timing == TimingBucket::Normal => 0.6,
        ResponseOutcome::Incorrect => 0.45,
        ResponseOutcome::NoAttempt => 0.3,
    }
}

/// Codes of every declared pattern the answer matches, in declaration order
pub fn match_error_patterns(patterns: &[ErrorPattern], answer: &AnswerPayload) -> Result<Vec<String>> {
    let text = answer.as_text();
    let lowered = text.to_lowercase();
    let mut codes = Vec::new();

    for pattern in patterns {
        let hit = match &pattern.matcher {
            ErrorMatcher::Choice { value } => match answer {
                AnswerPayload::Choice(c) => c.trim() == value.trim(),
                AnswerPayload::Selection(v) => v.iter().any(|c| c.trim() == value.trim()),
                AnswerPayload::Hybrid { choice, .. } => choice.trim() == value.trim(),
                _ => false,
            },
            ErrorMatcher::Contains { text } => {
                !text.is_empty() && lowered.contains(&text.to_lowercase())
            }
            ErrorMatcher::Regex { pattern: source } => RegexBuilder::new(source)
                .case_insensitive(true)
                .build()
                .map_err(|e| AssessError::InvalidPattern {
                    code: pattern.code.clone(),
                    reason: e.to_string(),
                })?
                .is_match(&text),
            ErrorMatcher::NumericValue { value, tolerance } => answer
                .as_number()
                .map(|x| (x - value).abs() <= tolerance.abs())
                .unwrap_or(false),
        };
        if hit && !codes.contains(&pattern.code) {
            codes.push(pattern.code.clone());
        }
    }

    Ok(codes)
}
