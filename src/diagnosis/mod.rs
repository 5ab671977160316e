//! Diagnosis Generator
//!
//! Builds the final report from the full response history once a session
//! terminates.
//!
//! - strength: per-skill accuracy ≥ 70%
//! - weakness: per-skill error rate ≥ 30% and not already a strength
//! - finding confidence = 0.6 · evidence confidence + 0.4 · session confidence
//! - hours = base(level) × (1 + 0.3 · weaknesses) × (1 + 0.5 · mean weakness confidence)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::DiagnosisConfig;
use crate::session::AttemptRecord;
use crate::types::{mean, LearnerLevel};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillFinding {
    pub skill_code: String,
    pub accuracy: f64,
    pub attempts: u32,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorFrequency {
    pub code: String,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosisReport {
    pub level: LearnerLevel,
    pub total_attempts: u32,
    pub overall_accuracy: f64,
    pub strengths: Vec<SkillFinding>,
    pub weaknesses: Vec<SkillFinding>,
    /// Most frequent first
    pub error_patterns: Vec<ErrorFrequency>,
    pub confidence: f64,
    pub recommended_path: String,
    pub estimated_hours: f64,
}

#[derive(Default)]
struct SkillTally {
    attempts: u32,
    correct: u32,
    confidences: Vec<f64>,
}

/// Deterministic report from an attempt history
pub fn generate_diagnosis(
    history: &[AttemptRecord],
    level: LearnerLevel,
    session_confidence: f64,
    config: &DiagnosisConfig,
) -> DiagnosisReport {
    let session_confidence = if session_confidence.is_finite() {
        session_confidence.clamp(0.0, 1.0)
    } else {
        0.0
    };

    let mut per_skill: BTreeMap<&str, SkillTally> = BTreeMap::new();
    let mut errors: BTreeMap<&str, u32> = BTreeMap::new();
    let mut correct_total = 0u32;

    for attempt in history {
        let c = &attempt.classification;
        if c.is_correct {
            correct_total += 1;
        }
        for code in &c.error_types {
            *errors.entry(code.as_str()).or_insert(0) += 1;
        }
        for skill in &attempt.skill_codes {
            let tally = per_skill.entry(skill.as_str()).or_default();
            tally.attempts += 1;
            if c.is_correct {
                tally.correct += 1;
            }
            tally.confidences.push(c.confidence);
        }
    }

    let blend = |evidence: f64| {
        config.evidence_weight * evidence + (1.0 - config.evidence_weight) * session_confidence
    };

    let mut strengths = Vec::new();
    let mut weaknesses = Vec::new();
    for (skill, tally) in &per_skill {
        if tally.attempts == 0 {
            continue;
        }
        let accuracy = tally.correct as f64 / tally.attempts as f64;
        let finding = SkillFinding {
            skill_code: skill.to_string(),
            accuracy,
            attempts: tally.attempts,
            confidence: blend(mean(&tally.confidences).unwrap_or(0.0)),
        };
        if accuracy >= config.strength_accuracy {
            strengths.push(finding);
        } else if 1.0 - accuracy >= config.weakness_error_rate {
            weaknesses.push(finding);
        }
    }
    // weakest first; ties by skill code (BTreeMap order is kept by the stable sort)
    weaknesses.sort_by(|a, b| a.accuracy.total_cmp(&b.accuracy));

    let mut error_patterns: Vec<ErrorFrequency> = errors
        .into_iter()
        .map(|(code, count)| ErrorFrequency {
            code: code.to_string(),
            count,
        })
        .collect();
    error_patterns.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.code.cmp(&b.code)));

    let total_attempts = u32::try_from(history.len()).unwrap_or(u32::MAX);
    let overall_accuracy = if history.is_empty() {
        0.0
    } else {
        correct_total as f64 / history.len() as f64
    };

    let findings: Vec<f64> = strengths
        .iter()
        .chain(weaknesses.iter())
        .map(|f| f.confidence)
        .collect();
    let confidence = mean(&findings).unwrap_or(session_confidence);

    let weakness_confidence: Vec<f64> = weaknesses.iter().map(|f| f.confidence).collect();
    let estimated_hours = estimate_hours(
        config,
        level,
        weaknesses.len(),
        mean(&weakness_confidence).unwrap_or(0.0),
    );
    let recommended_path = recommended_path(level, &strengths, &weaknesses, &error_patterns);

    tracing::info!(
        attempts = total_attempts,
        strengths = strengths.len(),
        weaknesses = weaknesses.len(),
        estimated_hours,
        "diagnosis generated"
    );

    DiagnosisReport {
        level,
        total_attempts,
        overall_accuracy,
        strengths,
        weaknesses,
        error_patterns,
        confidence,
        recommended_path,
        estimated_hours,
    }
}

pub fn estimate_hours(
    config: &DiagnosisConfig,
    level: LearnerLevel,
    weakness_count: usize,
    mean_weakness_confidence: f64,
) -> f64 {
    config.base_hours(level)
        * (1.0 + config.weakness_factor * weakness_count as f64)
        * (1.0 + config.confidence_factor * mean_weakness_confidence)
}

fn join_codes(findings: &[SkillFinding]) -> String {
    findings
        .iter()
        .map(|f| f.skill_code.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn recommended_path(
    level: LearnerLevel,
    strengths: &[SkillFinding],
    weaknesses: &[SkillFinding],
    errors: &[ErrorFrequency],
) -> String {
    let track = level.as_str();
    if weaknesses.is_empty() {
        if strengths.is_empty() {
            return format!("{track}: gather more evidence before choosing a path");
        }
        return format!("{track}: extend {} with challenge material", join_codes(strengths));
    }

    let mut path = format!("{track}: remediate {}", join_codes(weaknesses));
    if let Some(top) = errors.first() {
        path.push_str(&format!(", addressing {}", top.code));
    }
    if !strengths.is_empty() {
        path.push_str(&format!(", then build on {}", join_codes(strengths)));
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{AttemptPattern, Classification, ResponseOutcome, TimingBucket};

    fn attempt(skill: &str, correct: bool, errors: &[&str]) -> AttemptRecord {
        AttemptRecord {
            item_id: format!("{skill}-item"),
            skill_codes: vec![skill.to_string()],
            classification: Classification {
                is_correct: correct,
                is_partially_correct: false,
                outcome: if correct {
                    ResponseOutcome::Correct
                } else {
                    ResponseOutcome::Incorrect
                },
                error_types: errors.iter().map(|e| e.to_string()).collect(),
                confidence: 0.8,
                timing_bucket: TimingBucket::Normal,
                attempt_pattern: AttemptPattern::FirstTry,
            },
            elapsed_ms: 60_000,
            timestamp: 0,
        }
    }

    #[test]
    fn test_strengths_and_weaknesses() {
        let mut history = Vec::new();
        for _ in 0..4 {
            history.push(attempt("ALG", true, &[]));
        }
        history.push(attempt("GEO", true, &[]));
        history.push(attempt("GEO", false, &["sign-error"]));
        history.push(attempt("GEO", false, &["sign-error"]));

        let report = generate_diagnosis(&history, LearnerLevel::Beginner, 0.5, &DiagnosisConfig::default());
        assert_eq!(report.strengths.len(), 1);
        assert_eq!(report.strengths[0].skill_code, "ALG");
        assert_eq!(report.weaknesses.len(), 1);
        assert_eq!(report.weaknesses[0].skill_code, "GEO");
        // 0.6 · 0.8 + 0.4 · 0.5
        assert!((report.weaknesses[0].confidence - 0.68).abs() < 1e-9);
        assert_eq!(report.error_patterns, vec![ErrorFrequency { code: "sign-error".into(), count: 2 }]);
        assert_eq!(report.total_attempts, 7);
        assert!((report.overall_accuracy - 5.0 / 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_boundary_accuracy_counts_as_strength_only() {
        let mut history = Vec::new();
        for i in 0..10 {
            history.push(attempt("S", i < 7, &[]));
        }
        let report = generate_diagnosis(&history, LearnerLevel::Beginner, 0.5, &DiagnosisConfig::default());
        assert_eq!(report.strengths.len(), 1);
        assert!(report.weaknesses.is_empty());
    }

    #[test]
    fn test_estimated_hours_formula() {
        let config = DiagnosisConfig::default();
        let hours = estimate_hours(&config, LearnerLevel::Beginner, 2, 0.6);
        // 20 × 1.6 × 1.3
        assert!((hours - 41.6).abs() < 1e-9);
        assert!((estimate_hours(&config, LearnerLevel::Advanced, 0, 0.0) - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_recommended_path_is_deterministic() {
        let history = vec![
            attempt("B", false, &["x"]),
            attempt("A", false, &["y"]),
            attempt("C", true, &[]),
        ];
        let config = DiagnosisConfig::default();
        let first = generate_diagnosis(&history, LearnerLevel::Intermediate, 0.7, &config);
        let second = generate_diagnosis(&history, LearnerLevel::Intermediate, 0.7, &config);
        assert_eq!(first, second);
        assert_eq!(
            first.recommended_path,
            "intermediate: remediate A, B, addressing x, then build on C"
        );
    }

    #[test]
    fn test_empty_history() {
        let report = generate_diagnosis(&[], LearnerLevel::Advanced, 0.4, &DiagnosisConfig::default());
        assert!(report.strengths.is_empty());
        assert!(report.weaknesses.is_empty());
        assert_eq!(report.overall_accuracy, 0.0);
        assert!((report.confidence - 0.4).abs() < 1e-12);
        assert!((report.estimated_hours - 8.0).abs() < 1e-9);
        assert!(report.recommended_path.starts_with("advanced: gather"));
    }
}
