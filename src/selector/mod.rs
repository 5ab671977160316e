//! Item Selector
//!
//! Scores a pool of candidate items against the current mastery state and
//! picks the most informative next item. Also decides, independently,
//! whether testing should stop.
//!
//! Score = 0.4 · EIG + 0.3 · difficulty match + 0.2 · diversity + 0.1 · recency
//!
//! - EIG: mean entropy of the item's skills now, minus the entropy expected
//!   after a simulated response, weighted by the item's 3PL P(correct)
//! - difficulty match: exp(−|b − (θ + 0.5)| / 2)
//! - diversity: share of the item's skills not tested recently
//! - recency: 1 when the item is outside the recent window, lower the more
//!   recently it was shown
//!
//! Ties resolve to the earliest candidate in input order.

pub mod irt;

use std::collections::{HashMap, HashSet, VecDeque};

use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::bkt::{mean_entropy, MasteryMap, MasteryTracker, SkillMastery};
use crate::config::{SelectorConfig, SelectorWeights, StopRuleConfig};
use crate::types::{mean, DifficultyTier};

// ==================== Data Structures ====================

/// An assessable question as the question bank supplies it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemCandidate {
    pub id: String,
    pub skill_codes: Vec<String>,
    #[serde(default)]
    pub difficulty: DifficultyTier,
    /// Opaque format tag
    #[serde(default)]
    pub format: String,
    /// Discrimination
    pub irt_a: f64,
    /// Difficulty
    pub irt_b: f64,
    /// Pseudo-guessing
    pub irt_c: f64,
    #[serde(default)]
    pub presented_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DifficultyRange {
    pub min: f64,
    pub max: f64,
}

impl DifficultyRange {
    pub fn contains(&self, b: f64) -> bool {
        b >= self.min && b <= self.max
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SelectionCriteria {
    pub target_skills: Option<Vec<String>>,
    pub avoid_skills: Option<Vec<String>>,
    pub difficulty_range: Option<DifficultyRange>,
    pub format_preference: Option<Vec<String>>,
    /// Maximum presentations of one item within a session
    pub max_repeats: u32,
    pub diversity_weight: Option<f64>,
}

impl Default for SelectionCriteria {
    fn default() -> Self {
        Self {
            target_skills: None,
            avoid_skills: None,
            difficulty_range: None,
            format_preference: None,
            max_repeats: 1,
            diversity_weight: None,
        }
    }
}

/// Session-scoped rolling windows used for diversity and recency
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionWindows {
    /// Most recent first
    pub recent_items: VecDeque<String>,
    /// Most recent first
    pub recent_skills: VecDeque<String>,
}

impl SelectionWindows {
    pub fn record(&mut self, item: &ItemCandidate, item_capacity: usize, skill_capacity: usize) {
        self.recent_items.push_front(item.id.clone());
        self.recent_items.truncate(item_capacity);
        for skill in &item.skill_codes {
            self.recent_skills.push_front(skill.clone());
        }
        self.recent_skills.truncate(skill_capacity);
    }

    /// 0 = shown most recently
    pub fn item_rank(&self, item_id: &str) -> Option<usize> {
        self.recent_items.iter().position(|id| id == item_id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub information_gain: f64,
    pub difficulty_match: f64,
    pub diversity: f64,
    pub recency: f64,
    pub total: f64,
    pub theta: f64,
    pub p_correct: f64,
    pub item_information: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemSelection {
    pub item: ItemCandidate,
    /// Position in the candidate slice
    pub index: usize,
    pub score: ScoreBreakdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    BelowMinimum,
    MaximumReached,
    AllStable,
    NeedMoreEvidence,
    LowUncertainty,
    NoSkills,
    Continue,
}

impl StopReason {
    pub fn message(&self) -> &'static str {
        match self {
            Self::BelowMinimum => "Minimum questions not reached",
            Self::MaximumReached => "Maximum questions reached",
            Self::AllStable => "All skills stable",
            Self::NeedMoreEvidence => "Need more evidence",
            Self::LowUncertainty => "Low uncertainty",
            Self::NoSkills => "No skills tracked",
            Self::Continue => "Uncertainty remains",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopDecision {
    pub stop: bool,
    pub reason: StopReason,
}

impl StopDecision {
    fn stop(reason: StopReason) -> Self {
        Self { stop: true, reason }
    }

    fn go_on(reason: StopReason) -> Self {
        Self { stop: false, reason }
    }
}

// ==================== Main Implementation ====================

#[derive(Debug, Clone, Default)]
pub struct ItemSelector {
    config: SelectorConfig,
    stop: StopRuleConfig,
}

impl ItemSelector {
    pub fn new(config: SelectorConfig, stop: StopRuleConfig) -> Self {
        Self { config, stop }
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    // ==================== Filtering ====================

    /// Candidates surviving the criteria, with their input positions.
    /// Falls back to "not over max repeats" when the criteria empty the pool.
    pub fn filter<'a>(
        &self,
        candidates: &'a [ItemCandidate],
        criteria: &SelectionCriteria,
        already_presented: &[String],
    ) -> Vec<(usize, &'a ItemCandidate)> {
        let mut counts: HashMap<&str, u32> = HashMap::new();
        for id in already_presented {
            *counts.entry(id.as_str()).or_insert(0) += 1;
        }

        let under_cap: Vec<(usize, &ItemCandidate)> = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| {
                let shown = counts
                    .get(c.id.as_str())
                    .copied()
                    .unwrap_or(0)
                    .max(c.presented_count);
                shown < criteria.max_repeats
            })
            .collect();

        let overlaps = |skills: &[String], set: &[String]| skills.iter().any(|s| set.contains(s));

        let filtered: Vec<(usize, &ItemCandidate)> = under_cap
            .iter()
            .copied()
            .filter(|(_, c)| {
                criteria
                    .target_skills
                    .as_deref()
                    .map_or(true, |targets| overlaps(&c.skill_codes, targets))
            })
            .filter(|(_, c)| {
                criteria
                    .avoid_skills
                    .as_deref()
                    .map_or(true, |avoid| !overlaps(&c.skill_codes, avoid))
            })
            .filter(|(_, c)| {
                criteria
                    .difficulty_range
                    .map_or(true, |range| range.contains(c.irt_b))
            })
            .filter(|(_, c)| {
                criteria
                    .format_preference
                    .as_deref()
                    .map_or(true, |formats| formats.contains(&c.format))
            })
            .collect();

        if filtered.is_empty() && !under_cap.is_empty() {
            tracing::debug!(
                pool = under_cap.len(),
                "selection criteria emptied the pool, relaxing to repeat cap only"
            );
            return under_cap;
        }
        filtered
    }

    // ==================== Scoring ====================

    fn weights(&self, criteria: &SelectionCriteria) -> SelectorWeights {
        let mut weights = self.config.weights.clone();
        if let Some(diversity) = criteria.diversity_weight.filter(|w| w.is_finite()) {
            weights.diversity = diversity;
        }
        weights
    }

    /// Known masteries for the item's skills; unknown skills contribute nothing
    fn relevant<'m>(item: &ItemCandidate, masteries: &'m MasteryMap) -> Vec<&'m SkillMastery> {
        item.skill_codes
            .iter()
            .filter_map(|code| masteries.get(code))
            .collect()
    }

    /// Expected entropy reduction from presenting `item`, in [0, 1]
    pub fn expected_information_gain(
        &self,
        item: &ItemCandidate,
        masteries: &MasteryMap,
        p_correct: f64,
    ) -> f64 {
        let relevant = Self::relevant(item, masteries);
        if relevant.is_empty() {
            return 0.0;
        }
        let confidence = self.config.simulation_confidence;

        let current = mean_entropy(relevant.iter().map(|m| m.p_mastery));
        let after_correct = mean_entropy(relevant.iter().map(|m| {
            MasteryTracker::preview_untimed(m.p_mastery, &m.params, true, confidence)
        }));
        let after_incorrect = mean_entropy(relevant.iter().map(|m| {
            MasteryTracker::preview_untimed(m.p_mastery, &m.params, false, confidence)
        }));

        let expected = p_correct * after_correct + (1.0 - p_correct) * after_incorrect;
        (current - expected).clamp(0.0, 1.0)
    }

    pub fn score(
        &self,
        item: &ItemCandidate,
        masteries: &MasteryMap,
        windows: &SelectionWindows,
        weights: &SelectorWeights,
    ) -> ScoreBreakdown {
        let relevant: Vec<f64> = Self::relevant(item, masteries)
            .iter()
            .map(|m| m.p_mastery)
            .collect();
        let theta = irt::ability_from_mastery(mean(&relevant).unwrap_or(0.5));
        let p_correct = irt::probability(theta, item.irt_a, item.irt_b, item.irt_c);

        let information_gain = self.expected_information_gain(item, masteries, p_correct);
        let difficulty_match = irt::difficulty_match(
            theta,
            item.irt_b,
            self.config.difficulty_offset,
            self.config.difficulty_scale,
        );

        let diversity = if item.skill_codes.is_empty() {
            1.0
        } else {
            let recent: HashSet<&str> = windows.recent_skills.iter().map(String::as_str).collect();
            let overlap = item
                .skill_codes
                .iter()
                .filter(|s| recent.contains(s.as_str()))
                .count();
            1.0 - overlap as f64 / item.skill_codes.len() as f64
        };

        let recency = match windows.item_rank(&item.id) {
            None => 1.0,
            Some(rank) => rank as f64 / self.config.recent_items_capacity.max(1) as f64,
        };

        let total = weights.information_gain * information_gain
            + weights.difficulty_match * difficulty_match
            + weights.diversity * diversity
            + weights.recency * recency;

        ScoreBreakdown {
            information_gain,
            difficulty_match,
            diversity,
            recency,
            total,
            theta,
            p_correct,
            item_information: irt::item_information(theta, item.irt_a, item.irt_b, item.irt_c),
        }
    }

    /// Score every candidate surviving the filter, in input order
    pub fn score_candidates(
        &self,
        candidates: &[ItemCandidate],
        masteries: &MasteryMap,
        criteria: &SelectionCriteria,
        already_presented: &[String],
        windows: &SelectionWindows,
    ) -> Vec<(usize, ScoreBreakdown)> {
        let pool = self.filter(candidates, criteria, already_presented);
        let weights = self.weights(criteria);

        pool.par_iter()
            .map(|(index, item)| (*index, self.score(item, masteries, windows, &weights)))
            .collect()
    }

    // ==================== Selection ====================

    /// Highest-scoring candidate; records it in the rolling windows
    pub fn select_next(
        &self,
        candidates: &[ItemCandidate],
        masteries: &MasteryMap,
        criteria: &SelectionCriteria,
        already_presented: &[String],
        windows: &mut SelectionWindows,
    ) -> Option<ItemSelection> {
        let scored =
            self.score_candidates(candidates, masteries, criteria, already_presented, windows);

        let mut best: Option<(usize, ScoreBreakdown)> = None;
        for (index, score) in scored {
            if !score.total.is_finite() {
                continue;
            }
            if best.map_or(true, |(_, current)| score.total > current.total) {
                best = Some((index, score));
            }
        }

        let (index, score) = best?;
        let item = candidates[index].clone();
        windows.record(
            &item,
            self.config.recent_items_capacity,
            self.config.recent_skills_capacity,
        );

        tracing::debug!(item = %item.id, total = score.total, eig = score.information_gain, "item selected");

        Some(ItemSelection { item, index, score })
    }

    /// Pre-fetch up to `n` items against simulated outcomes. Works on clones;
    /// the caller's masteries and windows are untouched.
    pub fn select_batch<R: Rng>(
        &self,
        n: usize,
        candidates: &[ItemCandidate],
        masteries: &MasteryMap,
        criteria: &SelectionCriteria,
        already_presented: &[String],
        windows: &SelectionWindows,
        rng: &mut R,
    ) -> Vec<ItemSelection> {
        let mut sim_masteries = masteries.clone();
        let mut sim_windows = windows.clone();
        let mut presented = already_presented.to_vec();
        let p_correct = match self.config.batch_correct_probability {
            p if p.is_finite() => p.clamp(0.0, 1.0),
            p => {
                tracing::warn!(value = p, "non-finite batch correct probability, using default");
                SelectorConfig::default().batch_correct_probability
            }
        };
        let confidence = self.config.simulation_confidence;

        let mut batch = Vec::with_capacity(n);
        for _ in 0..n {
            let Some(selection) = self.select_next(
                candidates,
                &sim_masteries,
                criteria,
                &presented,
                &mut sim_windows,
            ) else {
                break;
            };

            presented.push(selection.item.id.clone());
            // One simulated answer per item, shared by all of its skills
            let correct = rng.gen_bool(p_correct);
            for code in &selection.item.skill_codes {
                if let Some(m) = sim_masteries.get_mut(code) {
                    m.p_mastery =
                        MasteryTracker::preview_untimed(m.p_mastery, &m.params, correct, confidence);
                    m.evidence_count += 1;
                    if correct {
                        m.correct_count += 1;
                    } else {
                        m.incorrect_count += 1;
                    }
                }
            }
            batch.push(selection);
        }

        batch
    }

    // ==================== Stopping ====================

    pub fn should_stop(
        &self,
        masteries: &MasteryMap,
        asked_count: u32,
        min_questions: u32,
        max_questions: u32,
    ) -> StopDecision {
        if asked_count < min_questions {
            return StopDecision::go_on(StopReason::BelowMinimum);
        }
        if asked_count >= max_questions {
            return StopDecision::stop(StopReason::MaximumReached);
        }
        if masteries.is_empty() {
            return StopDecision::go_on(StopReason::NoSkills);
        }

        let epsilon = self.stop.stability_epsilon;
        if masteries.values().all(|m| crate::bkt::is_stable(m, epsilon)) {
            return StopDecision::stop(StopReason::AllStable);
        }

        let thin = masteries
            .values()
            .filter(|m| m.evidence_count < self.stop.min_evidence)
            .count();
        if thin as f64 / masteries.len() as f64 > self.stop.insufficient_evidence_ratio {
            return StopDecision::go_on(StopReason::NeedMoreEvidence);
        }

        if crate::bkt::information_gain(masteries.values()) < self.stop.entropy_threshold {
            return StopDecision::stop(StopReason::LowUncertainty);
        }

        StopDecision::go_on(StopReason::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bkt::BktParameters;
    use rand::{RngCore, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn item(id: &str, skills: &[&str], b: f64) -> ItemCandidate {
        ItemCandidate {
            id: id.to_string(),
            skill_codes: skills.iter().map(|s| s.to_string()).collect(),
            difficulty: DifficultyTier::Medium,
            format: "MCQ".to_string(),
            irt_a: 1.0,
            irt_b: b,
            irt_c: 0.2,
            presented_count: 0,
        }
    }

    fn masteries(entries: &[(&str, f64)]) -> MasteryMap {
        entries
            .iter()
            .map(|(code, p)| {
                let mut m = SkillMastery::new(*code, BktParameters::default());
                m.p_mastery = *p;
                (code.to_string(), m)
            })
            .collect()
    }

    fn selector() -> ItemSelector {
        ItemSelector::default()
    }

    // ==================== Filtering Tests ====================

    #[test]
    fn test_repeat_cap_filters_presented() {
        let pool = vec![item("A", &["S1"], 0.0), item("B", &["S1"], 0.0)];
        let kept = selector().filter(&pool, &SelectionCriteria::default(), &["A".to_string()]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].1.id, "B");
    }

    #[test]
    fn test_criteria_relax_when_pool_empties() {
        let pool = vec![item("A", &["S1"], 0.0), item("B", &["S2"], 0.0)];
        let criteria = SelectionCriteria {
            target_skills: Some(vec!["S9".to_string()]),
            ..SelectionCriteria::default()
        };
        let kept = selector().filter(&pool, &criteria, &["A".to_string()]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].1.id, "B");
    }

    #[test]
    fn test_avoid_difficulty_and_format_filters() {
        let mut hard = item("H", &["S2"], 2.5);
        hard.format = "NUM".to_string();
        let pool = vec![item("A", &["S1"], 0.0), item("B", &["S2"], 0.0), hard];

        let criteria = SelectionCriteria {
            avoid_skills: Some(vec!["S1".to_string()]),
            difficulty_range: Some(DifficultyRange { min: 1.0, max: 3.0 }),
            format_preference: Some(vec!["NUM".to_string()]),
            ..SelectionCriteria::default()
        };
        let kept = selector().filter(&pool, &criteria, &[]);
        assert_eq!(kept.iter().map(|(_, c)| c.id.as_str()).collect::<Vec<_>>(), vec!["H"]);
    }

    // ==================== Scoring Tests ====================

    /// Item difficulty sitting exactly at the preferred point for one skill
    fn matched_b(p_mastery: f64) -> f64 {
        irt::ability_from_mastery(p_mastery) + SelectorConfig::default().difficulty_offset
    }

    #[test]
    fn test_prefers_uncertain_skill() {
        let pool = vec![
            item("Y", &["CERTAIN"], matched_b(0.98)),
            item("X", &["UNCERTAIN"], matched_b(0.5)),
            item("Z", &["OTHER"], matched_b(0.9)),
        ];
        let ms = masteries(&[("UNCERTAIN", 0.5), ("CERTAIN", 0.98), ("OTHER", 0.9)]);
        let windows = SelectionWindows::default();

        let scored =
            selector().score_candidates(&pool, &ms, &SelectionCriteria::default(), &[], &windows);
        for (_, score) in &scored {
            assert!((score.difficulty_match - 1.0).abs() < 1e-12);
            assert!((score.diversity - 1.0).abs() < 1e-12);
            assert!((score.recency - 1.0).abs() < 1e-12);
        }
        let eig = |id: &str| {
            scored
                .iter()
                .find(|(i, _)| pool[*i].id == id)
                .map(|(_, s)| s.information_gain)
                .unwrap()
        };
        assert!(eig("X") > eig("Y"));
        assert!(eig("X") > eig("Z"));

        let mut windows = windows;
        let picked = selector()
            .select_next(&pool, &ms, &SelectionCriteria::default(), &[], &mut windows)
            .unwrap();
        assert_eq!(picked.item.id, "X");
        assert_eq!(windows.recent_items.front().map(String::as_str), Some("X"));
        assert_eq!(windows.recent_skills.front().map(String::as_str), Some("UNCERTAIN"));
    }

    #[test]
    fn test_eig_higher_for_uncertain_skill() {
        let ms = masteries(&[("U", 0.5), ("C", 0.98)]);
        let s = selector();
        let uncertain = s.expected_information_gain(&item("X", &["U"], 0.0), &ms, 0.5);
        let certain = s.expected_information_gain(&item("Y", &["C"], 0.0), &ms, 0.95);
        assert!(uncertain > certain);
        assert!((0.0..=1.0).contains(&uncertain));
        assert_eq!(s.expected_information_gain(&item("G", &["GHOST"], 0.0), &ms, 0.5), 0.0);
    }

    #[test]
    fn test_ties_resolve_by_input_order() {
        let pool = vec![item("FIRST", &["S1"], 0.0), item("SECOND", &["S1"], 0.0)];
        let ms = masteries(&[("S1", 0.4)]);
        let picked = selector()
            .select_next(&pool, &ms, &SelectionCriteria::default(), &[], &mut SelectionWindows::default())
            .unwrap();
        assert_eq!(picked.item.id, "FIRST");
        assert_eq!(picked.index, 0);
    }

    #[test]
    fn test_diversity_and_recency_penalize_recent() {
        let s = selector();
        let ms = masteries(&[("S1", 0.5), ("S2", 0.5)]);
        let mut windows = SelectionWindows::default();
        windows.record(&item("OLD", &["S1"], 0.0), 10, 15);

        let weights = SelectorWeights::default();
        let recent = s.score(&item("OLD", &["S1"], 0.0), &ms, &windows, &weights);
        let fresh = s.score(&item("NEW", &["S2"], 0.0), &ms, &windows, &weights);
        assert_eq!(recent.diversity, 0.0);
        assert_eq!(recent.recency, 0.0);
        assert_eq!(fresh.diversity, 1.0);
        assert_eq!(fresh.recency, 1.0);
        assert!(fresh.total > recent.total);
    }

    #[test]
    fn test_windows_are_bounded() {
        let mut windows = SelectionWindows::default();
        for i in 0..30 {
            windows.record(&item(&format!("I{i}"), &["A", "B"], 0.0), 10, 15);
        }
        assert_eq!(windows.recent_items.len(), 10);
        assert_eq!(windows.recent_skills.len(), 15);
        assert_eq!(windows.item_rank("I29"), Some(0));
    }

    #[test]
    fn test_diversity_weight_override() {
        let criteria = SelectionCriteria {
            diversity_weight: Some(0.0),
            ..SelectionCriteria::default()
        };
        assert_eq!(selector().weights(&criteria).diversity, 0.0);
    }

    #[test]
    fn test_empty_pool_returns_none() {
        let ms = masteries(&[("S1", 0.5)]);
        let picked = selector().select_next(
            &[],
            &ms,
            &SelectionCriteria::default(),
            &[],
            &mut SelectionWindows::default(),
        );
        assert!(picked.is_none());
    }

    // ==================== Batch Tests ====================

    #[test]
    fn test_batch_does_not_mutate_inputs_and_is_seeded() {
        let pool: Vec<ItemCandidate> = (0..6)
            .map(|i| item(&format!("I{i}"), &[if i % 2 == 0 { "S1" } else { "S2" }], i as f64 * 0.3))
            .collect();
        let ms = masteries(&[("S1", 0.5), ("S2", 0.4)]);
        let windows = SelectionWindows::default();
        let s = selector();

        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let first = s.select_batch(4, &pool, &ms, &SelectionCriteria::default(), &[], &windows, &mut rng);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let second = s.select_batch(4, &pool, &ms, &SelectionCriteria::default(), &[], &windows, &mut rng);

        assert_eq!(first.len(), 4);
        assert_eq!(
            first.iter().map(|s| &s.item.id).collect::<Vec<_>>(),
            second.iter().map(|s| &s.item.id).collect::<Vec<_>>()
        );
        let ids: HashSet<_> = first.iter().map(|s| s.item.id.clone()).collect();
        assert_eq!(ids.len(), 4);
        assert!((ms["S1"].p_mastery - 0.5).abs() < 1e-12);
        assert_eq!(ms["S1"].evidence_count, 0);
        assert!(windows.recent_items.is_empty());
    }

    #[test]
    fn test_batch_stops_when_pool_exhausted() {
        let pool = vec![item("A", &["S1"], 0.0), item("B", &["S1"], 0.0)];
        let ms = masteries(&[("S1", 0.5)]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let batch = selector().select_batch(
            5,
            &pool,
            &ms,
            &SelectionCriteria::default(),
            &[],
            &SelectionWindows::default(),
            &mut rng,
        );
        assert_eq!(batch.len(), 2);
    }

    /// Counts every word pulled from the wrapped generator
    struct CountingRng {
        inner: ChaCha8Rng,
        draws: usize,
    }

    impl RngCore for CountingRng {
        fn next_u32(&mut self) -> u32 {
            self.draws += 1;
            self.inner.next_u32()
        }

        fn next_u64(&mut self) -> u64 {
            self.draws += 1;
            self.inner.next_u64()
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            self.draws += 1;
            self.inner.fill_bytes(dest)
        }

        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> std::result::Result<(), rand::Error> {
            self.draws += 1;
            self.inner.try_fill_bytes(dest)
        }
    }

    #[test]
    fn test_batch_draws_one_outcome_per_multi_skill_item() {
        let pool = vec![
            item("AB", &["A", "B"], 0.0),
            item("BC", &["B", "C"], 0.5),
            item("CA", &["C", "A"], 1.0),
        ];
        let ms = masteries(&[("A", 0.5), ("B", 0.45), ("C", 0.55)]);
        let mut rng = CountingRng {
            inner: ChaCha8Rng::seed_from_u64(3),
            draws: 0,
        };

        let batch = selector().select_batch(
            1,
            &pool,
            &ms,
            &SelectionCriteria::default(),
            &[],
            &SelectionWindows::default(),
            &mut rng,
        );
        assert_eq!(batch.len(), 1);
        assert_eq!(rng.draws, 1);

        rng.draws = 0;
        let batch = selector().select_batch(
            3,
            &pool,
            &ms,
            &SelectionCriteria::default(),
            &[],
            &SelectionWindows::default(),
            &mut rng,
        );
        assert_eq!(batch.len(), 3);
        assert_eq!(rng.draws, 3);
    }

    #[test]
    fn test_batch_tolerates_nan_correct_probability() {
        let s = ItemSelector::new(
            SelectorConfig {
                batch_correct_probability: f64::NAN,
                ..SelectorConfig::default()
            },
            StopRuleConfig::default(),
        );
        let pool = vec![item("A", &["S1"], 0.0), item("B", &["S1"], 0.5)];
        let ms = masteries(&[("S1", 0.5)]);
        let mut rng = ChaCha8Rng::seed_from_u64(11);

        let batch = s.select_batch(
            2,
            &pool,
            &ms,
            &SelectionCriteria::default(),
            &[],
            &SelectionWindows::default(),
            &mut rng,
        );
        assert_eq!(batch.len(), 2);
    }

    // ==================== Stop Rule Tests ====================

    #[test]
    fn test_never_stops_before_minimum() {
        let ms = masteries(&[("S1", 0.99), ("S2", 0.01)]);
        let decision = selector().should_stop(&ms, 2, 5, 20);
        assert!(!decision.stop);
        assert_eq!(decision.reason, StopReason::BelowMinimum);
    }

    #[test]
    fn test_stops_at_maximum() {
        let ms = masteries(&[("S1", 0.5)]);
        let decision = selector().should_stop(&ms, 20, 5, 20);
        assert!(decision.stop);
        assert_eq!(decision.reason.to_string(), "Maximum questions reached");
    }

    #[test]
    fn test_stops_when_all_stable() {
        let ms = masteries(&[("S1", 0.9), ("S2", 0.05)]);
        let decision = selector().should_stop(&ms, 6, 5, 20);
        assert_eq!(decision, StopDecision { stop: true, reason: StopReason::AllStable });
    }

    #[test]
    fn test_needs_more_evidence() {
        let ms = masteries(&[("S1", 0.5), ("S2", 0.6)]);
        let decision = selector().should_stop(&ms, 6, 5, 20);
        assert_eq!(decision.reason, StopReason::NeedMoreEvidence);
        assert!(!decision.stop);
    }

    #[test]
    fn test_low_uncertainty_and_continue() {
        let mut ms = masteries(&[("S1", 0.97), ("S2", 0.97), ("S3", 0.8)]);
        for m in ms.values_mut() {
            m.evidence_count = 3;
            m.correct_count = 3;
        }
        // S3 is unstable; mean entropy ≈ (0.194·2 + 0.722)/3 ≈ 0.37
        let decision = selector().should_stop(&ms, 6, 5, 20);
        assert_eq!(decision.reason, StopReason::Continue);

        ms.get_mut("S3").unwrap().p_mastery = 0.84;
        let relaxed = ItemSelector::new(
            SelectorConfig::default(),
            StopRuleConfig {
                entropy_threshold: 0.5,
                ..StopRuleConfig::default()
            },
        );
        let decision = relaxed.should_stop(&ms, 6, 5, 20);
        assert_eq!(decision, StopDecision { stop: true, reason: StopReason::LowUncertainty });
    }

    #[test]
    fn test_empty_masteries_continue() {
        let decision = selector().should_stop(&MasteryMap::new(), 6, 5, 20);
        assert_eq!(decision.reason, StopReason::NoSkills);
        assert!(!decision.stop);
    }
}
