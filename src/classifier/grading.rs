//! Per-format grading strategies.
//!
//! Each `AnswerFormat` owns exactly one grading rule; the submitted and
//! canonical payloads must have the shape that format expects.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{AssessError, Result};

pub const TAG_SIGN_ERROR: &str = "sign-error";
pub const TAG_INCOMPLETE_SELECTION: &str = "incomplete-selection";
pub const TAG_STEP_ORDER: &str = "step-order";
pub const TAG_NON_NUMERIC: &str = "non-numeric";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnswerFormat {
    MultipleChoice,
    MultiSelect,
    Numeric,
    FreeResponse,
    StepSelection,
    HybridVerify,
}

impl AnswerFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MultipleChoice => "MCQ",
            Self::MultiSelect => "MULTI_SELECT",
            Self::Numeric => "NUM",
            Self::FreeResponse => "FR",
            Self::StepSelection => "STEP_SELECTION",
            Self::HybridVerify => "HYBRID_VERIFY",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_uppercase().as_str() {
            "MCQ" | "MULTIPLE_CHOICE" => Some(Self::MultipleChoice),
            "MULTI_SELECT" | "MSQ" => Some(Self::MultiSelect),
            "NUM" | "NUMERIC" => Some(Self::Numeric),
            "FR" | "FREE_RESPONSE" => Some(Self::FreeResponse),
            "STEP_SELECTION" => Some(Self::StepSelection),
            "HYBRID_VERIFY" => Some(Self::HybridVerify),
            _ => None,
        }
    }

    fn expected_kind(&self) -> &'static str {
        match self {
            Self::MultipleChoice => "choice",
            Self::MultiSelect => "selection",
            Self::Numeric => "number",
            Self::FreeResponse => "text",
            Self::StepSelection => "steps",
            Self::HybridVerify => "hybrid",
        }
    }
}

/// What the test-taker submitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum AnswerPayload {
    Choice(String),
    Selection(Vec<String>),
    Number(f64),
    Text(String),
    Steps(Vec<String>),
    Hybrid { choice: String, verification: String },
    Skipped,
}

impl AnswerPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Choice(_) => "choice",
            Self::Selection(_) => "selection",
            Self::Number(_) => "number",
            Self::Text(_) => "text",
            Self::Steps(_) => "steps",
            Self::Hybrid { .. } => "hybrid",
            Self::Skipped => "skipped",
        }
    }

    /// Blank submissions count as no attempt
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Skipped => true,
            Self::Choice(s) | Self::Text(s) => s.trim().is_empty(),
            Self::Selection(v) | Self::Steps(v) => v.iter().all(|s| s.trim().is_empty()),
            Self::Number(x) => !x.is_finite(),
            Self::Hybrid {
                choice,
                verification,
            } => choice.trim().is_empty() && verification.trim().is_empty(),
        }
    }

    /// Flat text rendering used by error-pattern matching
    pub fn as_text(&self) -> String {
        match self {
            Self::Choice(s) | Self::Text(s) => s.clone(),
            Self::Selection(v) => v.join(", "),
            Self::Steps(v) => v.join(" > "),
            Self::Number(x) => x.to_string(),
            Self::Hybrid {
                choice,
                verification,
            } => format!("{choice} | {verification}"),
            Self::Skipped => String::new(),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(x) if x.is_finite() => Some(*x),
            Self::Text(s) => s.trim().parse::<f64>().ok().filter(|x| x.is_finite()),
            _ => None,
        }
    }
}

/// Accepted answer(s) supplied by the caller's answer resolver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CanonicalAnswer {
    Choice {
        value: String,
    },
    Selection {
        values: Vec<String>,
    },
    Number {
        value: f64,
        #[serde(default)]
        tolerance: Option<f64>,
    },
    /// Any of the accepted alternatives
    Text {
        accepted: Vec<String>,
    },
    Steps {
        values: Vec<String>,
    },
    Hybrid {
        choice: String,
        verification: Vec<String>,
    },
}

impl CanonicalAnswer {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Choice { .. } => "choice",
            Self::Selection { .. } => "selection",
            Self::Number { .. } => "number",
            Self::Text { .. } => "text",
            Self::Steps { .. } => "steps",
            Self::Hybrid { .. } => "hybrid",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GradeResult {
    pub is_correct: bool,
    pub is_partial: bool,
    pub no_attempt: bool,
    /// Format-level error tags (sign error, step order, ...)
    pub tags: Vec<String>,
}

impl GradeResult {
    fn correct() -> Self {
        Self {
            is_correct: true,
            ..Self::default()
        }
    }

    fn incorrect() -> Self {
        Self::default()
    }

    fn partial() -> Self {
        Self {
            is_partial: true,
            ..Self::default()
        }
    }

    fn with_tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }
}

fn mismatch(field: &str, format: AnswerFormat, found: &str) -> AssessError {
    AssessError::AnswerShapeMismatch {
        field: field.to_string(),
        expected: format!("{} for {}", format.expected_kind(), format.as_str()),
        found: found.to_string(),
    }
}

fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn normalized_set(values: &[String]) -> HashSet<String> {
    values
        .iter()
        .map(|v| normalize(v))
        .filter(|v| !v.is_empty())
        .collect()
}

/// Grade a submission against the canonical answer for the declared format
pub fn grade(
    format: AnswerFormat,
    submitted: &AnswerPayload,
    canonical: &CanonicalAnswer,
    numeric_tolerance: f64,
) -> Result<GradeResult> {
    if canonical.kind() != format.expected_kind() {
        return Err(mismatch("canonical", format, canonical.kind()));
    }

    if submitted.is_blank() {
        return Ok(GradeResult {
            no_attempt: true,
            ..GradeResult::default()
        });
    }

    match (format, submitted, canonical) {
        (AnswerFormat::MultipleChoice, AnswerPayload::Choice(s), CanonicalAnswer::Choice { value }) => {
            Ok(if s.trim() == value.trim() {
                GradeResult::correct()
            } else {
                GradeResult::incorrect()
            })
        }
        (AnswerFormat::MultiSelect, AnswerPayload::Selection(sub), CanonicalAnswer::Selection { values }) => {
            Ok(grade_selection(sub, values))
        }
        (AnswerFormat::Numeric, AnswerPayload::Number(_) | AnswerPayload::Text(_), CanonicalAnswer::Number { value, tolerance }) => {
            let tol = tolerance
                .filter(|t| t.is_finite() && *t >= 0.0)
                .unwrap_or(numeric_tolerance);
            Ok(grade_number(submitted.as_number(), *value, tol))
        }
        (AnswerFormat::FreeResponse, AnswerPayload::Text(s), CanonicalAnswer::Text { accepted }) => {
            let answer = normalize(s);
            Ok(if accepted.iter().any(|a| normalize(a) == answer) {
                GradeResult::correct()
            } else {
                GradeResult::incorrect()
            })
        }
        (AnswerFormat::StepSelection, AnswerPayload::Steps(sub), CanonicalAnswer::Steps { values }) => {
            Ok(grade_steps(sub, values))
        }
        (
            AnswerFormat::HybridVerify,
            AnswerPayload::Hybrid {
                choice,
                verification,
            },
            CanonicalAnswer::Hybrid {
                choice: expected_choice,
                verification: accepted,
            },
        ) => {
            let choice_ok = choice.trim() == expected_choice.trim();
            let verification = normalize(verification);
            let verification_ok = accepted.iter().any(|a| normalize(a) == verification);
            Ok(match (choice_ok, verification_ok) {
                (true, true) => GradeResult::correct(),
                (false, false) => GradeResult::incorrect(),
                _ => GradeResult::partial(),
            })
        }
        _ => Err(mismatch("response.answer", format, submitted.kind())),
    }
}

/// Correct iff every canonical option was selected; partial on any overlap
fn grade_selection(submitted: &[String], canonical: &[String]) -> GradeResult {
    let sub = normalized_set(submitted);
    let canon = normalized_set(canonical);

    if canon.is_subset(&sub) {
        GradeResult::correct()
    } else if canon.intersection(&sub).next().is_some() {
        GradeResult::partial().with_tag(TAG_INCOMPLETE_SELECTION)
    } else {
        GradeResult::incorrect()
    }
}

fn grade_number(submitted: Option<f64>, expected: f64, tolerance: f64) -> GradeResult {
    let Some(x) = submitted else {
        return GradeResult::incorrect().with_tag(TAG_NON_NUMERIC);
    };
    if (x - expected).abs() <= tolerance {
        GradeResult::correct()
    } else if expected != 0.0 && (x + expected).abs() <= tolerance {
        GradeResult::incorrect().with_tag(TAG_SIGN_ERROR)
    } else {
        GradeResult::incorrect()
    }
}

/// Canonical steps must appear in the submission in the same relative order
fn grade_steps(submitted: &[String], canonical: &[String]) -> GradeResult {
    let sub: Vec<String> = submitted.iter().map(|s| normalize(s)).collect();
    let canon: Vec<String> = canonical
        .iter()
        .map(|s| normalize(s))
        .filter(|s| !s.is_empty())
        .collect();

    let mut cursor = sub.iter();
    let in_order = canon
        .iter()
        .all(|step| cursor.by_ref().any(|candidate| candidate == step));
    if in_order {
        return GradeResult::correct();
    }

    let present = canon.iter().filter(|step| sub.contains(step)).count();
    if present == canon.len() {
        GradeResult::partial().with_tag(TAG_STEP_ORDER)
    } else if present > 0 {
        GradeResult::partial()
    } else {
        GradeResult::incorrect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_multiple_choice_exact() {
        let canon = CanonicalAnswer::Choice { value: "B".into() };
        let ok = grade(AnswerFormat::MultipleChoice, &AnswerPayload::Choice(" B ".into()), &canon, 1e-6).unwrap();
        assert!(ok.is_correct);
        let bad = grade(AnswerFormat::MultipleChoice, &AnswerPayload::Choice("C".into()), &canon, 1e-6).unwrap();
        assert!(!bad.is_correct && !bad.is_partial);
    }

    #[test]
    fn test_selection_subset_rule() {
        let canon = CanonicalAnswer::Selection { values: strings(&["a", "c"]) };
        let superset = AnswerPayload::Selection(strings(&["c", "a", "d"]));
        assert!(grade(AnswerFormat::MultiSelect, &superset, &canon, 0.0).unwrap().is_correct);

        let overlap = AnswerPayload::Selection(strings(&["a"]));
        let result = grade(AnswerFormat::MultiSelect, &overlap, &canon, 0.0).unwrap();
        assert!(result.is_partial);
        assert_eq!(result.tags, vec![TAG_INCOMPLETE_SELECTION.to_string()]);

        let disjoint = AnswerPayload::Selection(strings(&["b"]));
        let result = grade(AnswerFormat::MultiSelect, &disjoint, &canon, 0.0).unwrap();
        assert!(!result.is_correct && !result.is_partial);
    }

    #[test]
    fn test_numeric_tolerance_and_sign_error() {
        let canon = CanonicalAnswer::Number { value: 2.5, tolerance: Some(0.01) };
        assert!(grade(AnswerFormat::Numeric, &AnswerPayload::Number(2.505), &canon, 1e-6).unwrap().is_correct);
        assert!(grade(AnswerFormat::Numeric, &AnswerPayload::Text("2.5".into()), &canon, 1e-6).unwrap().is_correct);

        let flipped = grade(AnswerFormat::Numeric, &AnswerPayload::Number(-2.5), &canon, 1e-6).unwrap();
        assert_eq!(flipped.tags, vec![TAG_SIGN_ERROR.to_string()]);

        let garbage = grade(AnswerFormat::Numeric, &AnswerPayload::Text("two".into()), &canon, 1e-6).unwrap();
        assert_eq!(garbage.tags, vec![TAG_NON_NUMERIC.to_string()]);
    }

    #[test]
    fn test_free_response_normalizes() {
        let canon = CanonicalAnswer::Text { accepted: strings(&["common denominator", "LCD"]) };
        let answer = AnswerPayload::Text("  Common   Denominator ".into());
        assert!(grade(AnswerFormat::FreeResponse, &answer, &canon, 0.0).unwrap().is_correct);
        assert!(grade(AnswerFormat::FreeResponse, &AnswerPayload::Text("lcd".into()), &canon, 0.0).unwrap().is_correct);
    }

    #[test]
    fn test_steps_require_order() {
        let canon = CanonicalAnswer::Steps { values: strings(&["expand", "collect", "solve"]) };
        let in_order = AnswerPayload::Steps(strings(&["expand", "check", "collect", "solve"]));
        assert!(grade(AnswerFormat::StepSelection, &in_order, &canon, 0.0).unwrap().is_correct);

        let swapped = AnswerPayload::Steps(strings(&["collect", "expand", "solve"]));
        let result = grade(AnswerFormat::StepSelection, &swapped, &canon, 0.0).unwrap();
        assert!(result.is_partial);
        assert_eq!(result.tags, vec![TAG_STEP_ORDER.to_string()]);

        let some = AnswerPayload::Steps(strings(&["expand"]));
        let result = grade(AnswerFormat::StepSelection, &some, &canon, 0.0).unwrap();
        assert!(result.is_partial && result.tags.is_empty());
    }

    #[test]
    fn test_hybrid_partial_when_one_part_matches() {
        let canon = CanonicalAnswer::Hybrid {
            choice: "A".into(),
            verification: strings(&["x = 4"]),
        };
        let both = AnswerPayload::Hybrid { choice: "A".into(), verification: "X = 4".into() };
        assert!(grade(AnswerFormat::HybridVerify, &both, &canon, 0.0).unwrap().is_correct);
        let one = AnswerPayload::Hybrid { choice: "A".into(), verification: "x = 5".into() };
        assert!(grade(AnswerFormat::HybridVerify, &one, &canon, 0.0).unwrap().is_partial);
    }

    #[test]
    fn test_blank_is_no_attempt() {
        let canon = CanonicalAnswer::Choice { value: "A".into() };
        let result = grade(AnswerFormat::MultipleChoice, &AnswerPayload::Text("   ".into()), &canon, 0.0).unwrap();
        assert!(result.no_attempt);
        let result = grade(AnswerFormat::MultipleChoice, &AnswerPayload::Skipped, &canon, 0.0).unwrap();
        assert!(result.no_attempt && !result.is_correct);
    }

    #[test]
    fn test_shape_mismatch_names_field() {
        let canon = CanonicalAnswer::Choice { value: "A".into() };
        let err = grade(AnswerFormat::MultipleChoice, &AnswerPayload::Number(1.0), &canon, 0.0).unwrap_err();
        assert_eq!(err.field(), Some("response.answer"));

        let err = grade(AnswerFormat::Numeric, &AnswerPayload::Number(1.0), &canon, 0.0).unwrap_err();
        assert_eq!(err.field(), Some("canonical"));
    }

    #[test]
    fn test_format_tags_round_trip() {
        for format in [
            AnswerFormat::MultipleChoice,
            AnswerFormat::MultiSelect,
            AnswerFormat::Numeric,
            AnswerFormat::FreeResponse,
            AnswerFormat::StepSelection,
            AnswerFormat::HybridVerify,
        ] {
            assert_eq!(AnswerFormat::from_tag(format.as_str()), Some(format));
        }
        assert_eq!(AnswerFormat::from_tag("num"), Some(AnswerFormat::Numeric));
        assert_eq!(AnswerFormat::from_tag("essay"), None);
    }
}
