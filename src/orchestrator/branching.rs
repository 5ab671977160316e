//! Branching rules and branch heuristics

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::classifier::{Classification, ResponseOutcome};
use crate::error::AssessError;
use crate::session::DiagnosisPayload;

const SPECIFIC_ERROR_PREFIX: &str = "specific-error:";

/// Condition a rule is keyed on. Wire form: `correct`, `incorrect`,
/// `partial`, `no-attempt` or `specific-error:<code>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BranchCondition {
    Correct,
    Incorrect,
    Partial,
    NoAttempt,
    SpecificError(String),
}

impl BranchCondition {
    pub fn matches(&self, classification: &Classification) -> bool {
        match self {
            Self::Correct => classification.outcome == ResponseOutcome::Correct,
            Self::Incorrect => classification.outcome == ResponseOutcome::Incorrect,
            Self::Partial => classification.outcome == ResponseOutcome::Partial,
            Self::NoAttempt => classification.outcome == ResponseOutcome::NoAttempt,
            Self::SpecificError(code) => classification.error_types.iter().any(|e| e == code),
        }
    }
}

impl fmt::Display for BranchCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Correct => f.write_str("correct"),
            Self::Incorrect => f.write_str("incorrect"),
            Self::Partial => f.write_str("partial"),
            Self::NoAttempt => f.write_str("no-attempt"),
            Self::SpecificError(code) => write!(f, "{SPECIFIC_ERROR_PREFIX}{code}"),
        }
    }
}

impl FromStr for BranchCondition {
    type Err = AssessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "correct" => Ok(Self::Correct),
            "incorrect" => Ok(Self::Incorrect),
            "partial" => Ok(Self::Partial),
            "no-attempt" => Ok(Self::NoAttempt),
            other => match other.strip_prefix(SPECIFIC_ERROR_PREFIX) {
                Some(code) if !code.is_empty() => Ok(Self::SpecificError(code.to_string())),
                _ => Err(AssessError::invalid_field(
                    "branchRules.condition",
                    format!("unknown condition '{other}'"),
                )),
            },
        }
    }
}

impl TryFrom<String> for BranchCondition {
    type Error = AssessError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BranchCondition> for String {
    fn from(condition: BranchCondition) -> Self {
        condition.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchRule {
    pub condition: BranchCondition,
    pub target_item_id: String,
    #[serde(default)]
    pub diagnosis: Option<DiagnosisPayload>,
}

/// First rule, in declared order, that matches and whose target is unused
pub fn find_branch<'a, F>(
    rules: &'a [BranchRule],
    classification: &Classification,
    is_used: F,
) -> Option<&'a BranchRule>
where
    F: Fn(&str) -> bool,
{
    rules
        .iter()
        .find(|rule| rule.condition.matches(classification) && !is_used(&rule.target_item_id))
}

/// Track an item belongs to in the assessment graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemBranch {
    #[default]
    Core,
    Remediation,
    Extension,
}

/// Branch suggested by the latest classification
pub fn implied_branch(
    classification: &Classification,
    low_confidence: f64,
    high_confidence: f64,
) -> ItemBranch {
    if !classification.error_types.is_empty()
        || classification.gave_up()
        || classification.confidence < low_confidence
    {
        ItemBranch::Remediation
    } else if classification.is_correct && classification.confidence >= high_confidence {
        ItemBranch::Extension
    } else {
        ItemBranch::Core
    }
}
