//! Caller-owned session state.
//!
//! Everything that persists between turns lives here and is passed in on
//! every call; the core keeps no per-session state of its own.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::bkt::{MasteryMap, MasteryTracker};
use crate::classifier::Classification;
use crate::error::{AssessError, Result};
use crate::sanitize::diagnose_masteries;
use crate::types::LearnerLevel;

pub use crate::selector::SelectionWindows;

/// A testable competency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Skill {
    pub code: String,
    /// Informational only
    #[serde(default)]
    pub prerequisites: Vec<String>,
}

impl Skill {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            prerequisites: Vec::new(),
        }
    }
}

/// One answered item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    pub item_id: String,
    pub skill_codes: Vec<String>,
    pub classification: Classification,
    pub elapsed_ms: u64,
    /// Unix millis
    pub timestamp: i64,
}

/// Diagnostic payload a branching rule can contribute
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DiagnosisPayload {
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub error_patterns: Vec<String>,
    pub confidence: Option<f64>,
}

/// Diagnosis accumulated turn by turn
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PartialDiagnosis {
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    /// Error code → occurrences
    pub error_patterns: BTreeMap<String, u32>,
    /// Running average
    pub confidence: f64,
    pub confidence_samples: u32,
}

fn insert_unique(set: &mut Vec<String>, id: &str) {
    if !set.iter().any(|s| s == id) {
        set.push(id.to_string());
    }
}

impl PartialDiagnosis {
    /// Set-union of strengths/weaknesses and error patterns, averaged confidence
    pub fn merge(&mut self, payload: &DiagnosisPayload) {
        for id in &payload.strengths {
            insert_unique(&mut self.strengths, id);
        }
        for id in &payload.weaknesses {
            insert_unique(&mut self.weaknesses, id);
        }
        for code in &payload.error_patterns {
            self.error_patterns.entry(code.clone()).or_insert(1);
        }
        if let Some(confidence) = payload.confidence.filter(|c| c.is_finite()) {
            self.record_confidence(confidence);
        }
    }

    pub fn record_confidence(&mut self, confidence: f64) {
        let confidence = confidence.clamp(0.0, 1.0);
        let n = self.confidence_samples as f64;
        self.confidence = (self.confidence * n + confidence) / (n + 1.0);
        self.confidence_samples += 1;
    }

    pub fn tally_errors(&mut self, codes: &[String]) {
        for code in codes {
            *self.error_patterns.entry(code.clone()).or_insert(0) += 1;
        }
    }

    /// Evidence-driven: a skill is a strength or a weakness, never both
    pub fn mark_strength(&mut self, skill_code: &str) {
        self.weaknesses.retain(|s| s != skill_code);
        insert_unique(&mut self.strengths, skill_code);
    }

    pub fn mark_weakness(&mut self, skill_code: &str) {
        self.strengths.retain(|s| s != skill_code);
        insert_unique(&mut self.weaknesses, skill_code);
    }

    pub fn is_weak(&self, skill_code: &str) -> bool {
        self.weaknesses.iter().any(|s| s == skill_code)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionState {
    /// In presentation order; may repeat
    pub items_presented: Vec<String>,
    pub attempts: Vec<AttemptRecord>,
    pub mastery_states: MasteryMap,
    pub diagnosis: PartialDiagnosis,
    pub windows: SelectionWindows,
    pub level: LearnerLevel,
}

impl SessionState {
    /// Fresh state with every skill at its initial mastery
    pub fn new(skills: &[Skill], tracker: &MasteryTracker, level: LearnerLevel) -> Self {
        let mastery_states = skills
            .iter()
            .map(|skill| (skill.code.clone(), tracker.initialize(&skill.code)))
            .collect();

        Self {
            mastery_states,
            level,
            ..Self::default()
        }
    }

    /// Questions answered so far
    pub fn asked_count(&self) -> u32 {
        u32::try_from(self.attempts.len()).unwrap_or(u32::MAX)
    }

    pub fn presentation_count(&self, item_id: &str) -> usize {
        self.items_presented.iter().filter(|id| *id == item_id).count()
    }

    pub fn last_presented(&self) -> Option<&str> {
        self.items_presented.last().map(String::as_str)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Load a snapshot, rejecting mastery entries that break the bounds or
    /// counter invariants
    pub fn from_json(raw: &str) -> Result<Self> {
        let state: Self = serde_json::from_str(raw)?;
        state.check_masteries()?;
        Ok(state)
    }

    pub fn check_masteries(&self) -> Result<()> {
        let report = diagnose_masteries(self.mastery_states.values());
        if report.is_healthy {
            Ok(())
        } else {
            tracing::warn!(message = %report.message, "unhealthy session snapshot");
            Err(AssessError::invalid_field("masteryStates", report.message))
        }
    }
}
