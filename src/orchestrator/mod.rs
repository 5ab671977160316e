//! Session Orchestrator
//!
//! One call per answered item:
//! 1. classify the response
//! 2. update mastery for every skill the item targets
//! 3. fold the turn into the running diagnosis
//! 4. follow the first matching branch rule whose target is unused, or
//!    fall back to adaptive scoring over the unused pool
//! 5. terminate early, on the stop rule, or when nothing is left
//!
//! Fallback score = 0.3 branch affinity + 0.2 weak-concept overlap
//! + 0.2 error-target overlap + 0.1 difficulty fit + 0.2 selector score

pub mod branching;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::bkt::{MasteryTracker, MasteryUpdate, SkillContribution};
use crate::classifier::{
    AnswerFormat, CanonicalAnswer, Classification, ErrorPattern, Question, Response,
    ResponseClassifier,
};
use crate::config::AssessConfig;
use crate::diagnosis::{generate_diagnosis, DiagnosisReport};
use crate::error::{AssessError, Result};
use crate::selector::{ItemCandidate, ItemSelector, SelectionCriteria, StopReason};
use crate::session::{AttemptRecord, PartialDiagnosis, SessionState, Skill};
use crate::types::{DifficultyTier, MasteryLevel};

pub use branching::{find_branch, implied_branch, BranchCondition, BranchRule, ItemBranch};

// ==================== Data Structures ====================

/// A question-bank item as the orchestrator sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentItem {
    #[serde(flatten)]
    pub candidate: ItemCandidate,
    /// Derived from the candidate's format tag when absent
    #[serde(default)]
    pub answer_format: Option<AnswerFormat>,
    #[serde(default)]
    pub branch: ItemBranch,
    #[serde(default)]
    pub concepts: Vec<String>,
    /// Error codes this item is designed to probe
    #[serde(default)]
    pub error_targets: Vec<String>,
    /// Evaluated in declared order
    #[serde(default)]
    pub branch_rules: Vec<BranchRule>,
    #[serde(default)]
    pub error_patterns: Vec<ErrorPattern>,
    /// Skill code → contribution weight, 1.0 when absent
    #[serde(default)]
    pub skill_weights: BTreeMap<String, f64>,
}

impl AssessmentItem {
    pub fn id(&self) -> &str {
        &self.candidate.id
    }

    pub fn answer_format(&self) -> Result<AnswerFormat> {
        self.answer_format
            .or_else(|| AnswerFormat::from_tag(&self.candidate.format))
            .ok_or_else(|| {
                AssessError::invalid_field(
                    "item.format",
                    format!(
                        "'{}' on item '{}' is not a known answer format",
                        self.candidate.format, self.candidate.id
                    ),
                )
            })
    }

    pub fn question(&self) -> Result<Question> {
        Ok(Question {
            id: self.candidate.id.clone(),
            format: self.answer_format()?,
            error_patterns: self.error_patterns.clone(),
        })
    }

    pub fn contributions(&self) -> Vec<SkillContribution> {
        self.candidate
            .skill_codes
            .iter()
            .map(|code| SkillContribution {
                skill_code: code.clone(),
                weight: self.skill_weights.get(code).copied().unwrap_or(1.0),
            })
            .collect()
    }

    /// Concepts plus skill codes
    fn concept_keys(&self) -> impl Iterator<Item = &String> {
        self.concepts.iter().chain(self.candidate.skill_codes.iter())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Routing {
    Rule,
    Adaptive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "kebab-case")]
pub enum TerminationReason {
    StrongStrengths,
    ConfirmedWeaknesses,
    CleanSweep,
    StopRule(StopReason),
    PoolExhausted,
}

impl TerminationReason {
    pub fn message(&self) -> &'static str {
        match self {
            Self::StrongStrengths => "Strengths identified with high confidence",
            Self::ConfirmedWeaknesses => "Weaknesses and error patterns confirmed",
            Self::CleanSweep => "Strong across the board",
            Self::StopRule(reason) => reason.message(),
            Self::PoolExhausted => "No items remaining",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum NextStep {
    Continue {
        #[serde(rename = "itemId")]
        item_id: String,
        routing: Routing,
    },
    Terminate {
        reason: TerminationReason,
        report: DiagnosisReport,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResult {
    pub classification: Classification,
    pub updates: Vec<MasteryUpdate>,
    pub next: NextStep,
    /// Running diagnosis after this turn
    pub diagnosis: PartialDiagnosis,
}

impl TurnResult {
    pub fn next_item_id(&self) -> Option<&str> {
        match &self.next {
            NextStep::Continue { item_id, .. } => Some(item_id),
            NextStep::Terminate { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.next, NextStep::Terminate { .. })
    }
}

// ==================== Main Implementation ====================

#[derive(Debug, Clone, Default)]
pub struct SessionOrchestrator {
    config: AssessConfig,
    classifier: ResponseClassifier,
    tracker: MasteryTracker,
    selector: ItemSelector,
}

impl SessionOrchestrator {
    pub fn new(config: AssessConfig) -> Self {
        Self {
            classifier: ResponseClassifier::new(config.classifier.clone()),
            tracker: MasteryTracker::new(config.bkt.clone()),
            selector: ItemSelector::new(config.selector.clone(), config.stop.clone()),
            config,
        }
    }

    pub fn config(&self) -> &AssessConfig {
        &self.config
    }

    pub fn tracker(&self) -> &MasteryTracker {
        &self.tracker
    }

    pub fn selector(&self) -> &ItemSelector {
        &self.selector
    }

    pub fn start_session(&self, skills: &[Skill]) -> SessionState {
        SessionState::new(skills, &self.tracker, self.config.session.level)
    }

    /// Adaptive pick for the opening item; marks it presented
    pub fn first_question(
        &self,
        state: &mut SessionState,
        pool: &mut [AssessmentItem],
    ) -> Option<String> {
        let candidates: Vec<ItemCandidate> = pool.iter().map(|i| i.candidate.clone()).collect();
        let selection = self.selector.select_next(
            &candidates,
            &state.mastery_states,
            &SelectionCriteria::default(),
            &state.items_presented,
            &mut state.windows,
        )?;

        mark_presented(state, &mut pool[selection.index]);
        Some(selection.item.id)
    }

    /// Record an item as shown without scoring (caller-chosen first item)
    pub fn present_item(
        &self,
        state: &mut SessionState,
        pool: &mut [AssessmentItem],
        item_id: &str,
    ) -> Result<()> {
        let index = position(pool, item_id)?;
        self.record_window(state, &pool[index].candidate);
        mark_presented(state, &mut pool[index]);
        Ok(())
    }

    pub fn get_next_question(
        &self,
        state: &mut SessionState,
        pool: &mut [AssessmentItem],
        current_item_id: &str,
        canonical: &CanonicalAnswer,
        response: &Response,
    ) -> Result<TurnResult> {
        let current = pool[position(pool, current_item_id)?].clone();

        let classification = self
            .classifier
            .classify(&current.question()?, canonical, response)?;

        let updates = self.tracker.update_multiple_skills(
            &mut state.mastery_states,
            &current.contributions(),
            classification.is_correct,
            classification.bkt_confidence(),
            Some(response.elapsed_ms),
        );

        state.attempts.push(AttemptRecord {
            item_id: current.candidate.id.clone(),
            skill_codes: current.candidate.skill_codes.clone(),
            classification: classification.clone(),
            elapsed_ms: response.elapsed_ms,
            timestamp: chrono::Utc::now().timestamp_millis(),
        });
        self.fold_into_diagnosis(state, &classification, &updates);

        let next = match self.follow_rule(state, pool, &current, &classification) {
            Some(index) => Some((index, Routing::Rule)),
            None => self
                .adaptive_fallback(state, pool, &current, &classification)
                .map(|index| (index, Routing::Adaptive)),
        };

        let asked = state.asked_count();
        let session = &self.config.session;
        let stop = self.selector.should_stop(
            &state.mastery_states,
            asked,
            session.min_questions,
            session.max_questions,
        );

        let termination = self
            .early_termination(&state.diagnosis, asked)
            .or_else(|| stop.stop.then_some(TerminationReason::StopRule(stop.reason)))
            .or_else(|| next.is_none().then_some(TerminationReason::PoolExhausted));

        let next = match (termination, next) {
            (None, Some((index, routing))) => {
                self.record_window(state, &pool[index].candidate);
                mark_presented(state, &mut pool[index]);
                let item_id = pool[index].candidate.id.clone();
                tracing::debug!(item = %item_id, ?routing, asked, "next item");
                NextStep::Continue { item_id, routing }
            }
            (reason, _) => {
                let reason = reason.unwrap_or(TerminationReason::PoolExhausted);
                tracing::info!(asked, reason = reason.message(), "session terminated");
                NextStep::Terminate {
                    reason,
                    report: self.finish(state),
                }
            }
        };

        Ok(TurnResult {
            classification,
            updates,
            next,
            diagnosis: state.diagnosis.clone(),
        })
    }

    /// Final report from the full history
    pub fn finish(&self, state: &SessionState) -> DiagnosisReport {
        generate_diagnosis(
            &state.attempts,
            state.level,
            state.diagnosis.confidence,
            &self.config.diagnosis,
        )
    }

    // ==================== Turn Steps ====================

    fn fold_into_diagnosis(
        &self,
        state: &mut SessionState,
        classification: &Classification,
        updates: &[MasteryUpdate],
    ) {
        let diagnosis = &mut state.diagnosis;
        diagnosis.tally_errors(&classification.error_types);
        diagnosis.record_confidence(classification.confidence);

        let min_evidence = self.config.orchestrator.diagnosis_min_evidence;
        for update in updates {
            let Some(mastery) = state.mastery_states.get(&update.skill_code) else {
                continue;
            };
            if mastery.evidence_count < min_evidence {
                continue;
            }
            match self.tracker.level(mastery) {
                MasteryLevel::Mastered => diagnosis.mark_strength(&update.skill_code),
                MasteryLevel::Weak => diagnosis.mark_weakness(&update.skill_code),
                MasteryLevel::Developing => {}
            }
        }
    }

    fn follow_rule(
        &self,
        state: &mut SessionState,
        pool: &[AssessmentItem],
        current: &AssessmentItem,
        classification: &Classification,
    ) -> Option<usize> {
        let is_used = |id: &str| {
            state.presentation_count(id) > 0 || pool.iter().all(|item| item.id() != id)
        };
        let rule = find_branch(&current.branch_rules, classification, is_used)?;
        let index = pool.iter().position(|item| item.id() == rule.target_item_id)?;

        tracing::info!(
            from = %current.candidate.id,
            to = %rule.target_item_id,
            condition = %rule.condition,
            "branch rule matched"
        );
        if let Some(payload) = &rule.diagnosis {
            state.diagnosis.merge(payload);
        }
        Some(index)
    }

    fn adaptive_fallback(
        &self,
        state: &SessionState,
        pool: &[AssessmentItem],
        current: &AssessmentItem,
        classification: &Classification,
    ) -> Option<usize> {
        let candidates: Vec<ItemCandidate> = pool.iter().map(|i| i.candidate.clone()).collect();
        let scored = self.selector.score_candidates(
            &candidates,
            &state.mastery_states,
            &SelectionCriteria::default(),
            &state.items_presented,
            &state.windows,
        );

        let cfg = &self.config.orchestrator;
        let weights = &cfg.fallback;
        let wanted_branch = implied_branch(classification, cfg.low_confidence, cfg.high_confidence);
        let here = current.candidate.difficulty;
        let wanted_tier = if classification.gave_up() {
            DifficultyTier::Easy
        } else if classification.is_fast_correct() {
            DifficultyTier::Hard
        } else if !classification.is_correct {
            here.easier()
        } else if classification.confidence >= cfg.high_confidence {
            here.harder()
        } else {
            here
        };

        let mut best: Option<(usize, f64)> = None;
        for (index, score) in scored {
            let item = &pool[index];

            let affinity = if item.branch == wanted_branch { 1.0 } else { 0.0 };

            let keys: Vec<&String> = item.concept_keys().collect();
            let weak_overlap = if keys.is_empty() {
                0.0
            } else {
                keys.iter().filter(|k| state.diagnosis.is_weak(k)).count() as f64
                    / keys.len() as f64
            };

            let error_overlap = if item
                .error_targets
                .iter()
                .any(|t| classification.error_types.contains(t))
            {
                1.0
            } else {
                0.0
            };

            let gap = tier_rank(item.candidate.difficulty).abs_diff(tier_rank(wanted_tier));
            let difficulty_fit = 1.0 - gap as f64 / 2.0;

            let total = weights.branch_affinity * affinity
                + weights.weak_concept * weak_overlap
                + weights.error_target * error_overlap
                + weights.difficulty * difficulty_fit
                + weights.information * score.total;

            tracing::debug!(item = %item.candidate.id, total, affinity, weak_overlap, error_overlap, "fallback score");

            if !total.is_finite() {
                tracing::warn!(item = %item.candidate.id, "non-finite fallback score, skipping");
                continue;
            }
            if best.map_or(true, |(_, current_best)| total > current_best) {
                best = Some((index, total));
            }
        }

        best.map(|(index, _)| index)
    }

    fn early_termination(&self, diagnosis: &PartialDiagnosis, asked: u32) -> Option<TerminationReason> {
        if asked < self.config.session.min_questions {
            return None;
        }
        let t = &self.config.termination;
        let strengths = diagnosis.strengths.len();
        let weaknesses = diagnosis.weaknesses.len();
        let confidence = diagnosis.confidence;

        if strengths >= t.min_strengths && confidence > t.strengths_confidence {
            Some(TerminationReason::StrongStrengths)
        } else if weaknesses >= t.min_weaknesses
            && diagnosis.error_patterns.len() >= t.min_error_patterns
            && confidence > t.weaknesses_confidence
        {
            Some(TerminationReason::ConfirmedWeaknesses)
        } else if strengths >= t.clean_strengths && weaknesses == 0 && confidence > t.clean_confidence {
            Some(TerminationReason::CleanSweep)
        } else {
            None
        }
    }

    fn record_window(&self, state: &mut SessionState, item: &ItemCandidate) {
        let selector = self.selector.config();
        state.windows.record(
            item,
            selector.recent_items_capacity,
            selector.recent_skills_capacity,
        );
    }
}

fn position(pool: &[AssessmentItem], item_id: &str) -> Result<usize> {
    pool.iter().position(|item| item.id() == item_id).ok_or_else(|| {
        AssessError::invalid_field("currentItemId", format!("'{item_id}' is not in the item pool"))
    })
}

fn mark_presented(state: &mut SessionState, item: &mut AssessmentItem) {
    state.items_presented.push(item.candidate.id.clone());
    item.candidate.presented_count += 1;
}

fn tier_rank(tier: DifficultyTier) -> u8 {
    match tier {
        DifficultyTier::Easy => 0,
        DifficultyTier::Medium => 1,
        DifficultyTier::Hard => 2,
    }
}
