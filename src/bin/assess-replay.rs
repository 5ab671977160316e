use std::collections::BTreeMap;
use std::process::ExitCode;

use serde::Deserialize;

use adaptive_assess::logging::init_tracing;
use adaptive_assess::{
    AnswerPayload, AssessConfig, AssessError, AssessmentItem, CanonicalAnswer, NextStep, Response,
    SessionOrchestrator, Skill,
};

/// Scripted session: items, their accepted answers and one scripted
/// response per item. Items without a scripted response are skipped.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Scenario {
    #[serde(default)]
    config: Option<AssessConfig>,
    skills: Vec<Skill>,
    items: Vec<AssessmentItem>,
    answers: BTreeMap<String, CanonicalAnswer>,
    #[serde(default)]
    responses: BTreeMap<String, Response>,
    #[serde(default)]
    first_item: Option<String>,
}

fn skipped() -> Response {
    Response {
        answer: AnswerPayload::Skipped,
        elapsed_ms: 0,
        attempt_number: 1,
        self_confidence: None,
    }
}

fn replay(path: &str, env_config: AssessConfig) -> Result<String, AssessError> {
    let raw = std::fs::read_to_string(path)?;
    let scenario: Scenario = serde_json::from_str(&raw)?;

    let config = match scenario.config {
        Some(config) => {
            config.validate()?;
            config
        }
        None => env_config,
    };
    let orchestrator = SessionOrchestrator::new(config);
    let mut pool = scenario.items;
    let mut state = orchestrator.start_session(&scenario.skills);

    let mut current = match scenario.first_item {
        Some(id) => {
            orchestrator.present_item(&mut state, &mut pool, &id)?;
            id
        }
        None => match orchestrator.first_question(&mut state, &mut pool) {
            Some(id) => id,
            None => return Ok(serde_json::to_string_pretty(&orchestrator.finish(&state))?),
        },
    };

    loop {
        let canonical = scenario.answers.get(&current).ok_or_else(|| {
            AssessError::invalid_field("answers", format!("no accepted answer for '{current}'"))
        })?;
        let response = scenario
            .responses
            .get(&current)
            .cloned()
            .unwrap_or_else(skipped);

        let turn =
            orchestrator.get_next_question(&mut state, &mut pool, &current, canonical, &response)?;
        tracing::info!(
            item = %current,
            outcome = ?turn.classification.outcome,
            confidence = turn.classification.confidence,
            "replayed response"
        );

        match turn.next {
            NextStep::Continue { item_id, .. } => current = item_id,
            NextStep::Terminate { reason, report } => {
                let summary = orchestrator
                    .tracker()
                    .summarize(state.mastery_states.values());
                tracing::info!(
                    reason = reason.message(),
                    mastered = summary.mastered,
                    developing = summary.developing,
                    weak = summary.weak,
                    mean_mastery = summary.mean_mastery,
                    "replay finished"
                );
                return Ok(serde_json::to_string_pretty(&report)?);
            }
        }
    }
}

fn main() -> ExitCode {
    let env_config = AssessConfig::from_env();
    let _guard = init_tracing(&env_config.logging);

    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: assess-replay <scenario.json>");
        return ExitCode::from(2);
    };

    match replay(&path, env_config) {
        Ok(report) => {
            println!("{report}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, field = err.field(), "replay failed");
            eprintln!("assess-replay: {err}");
            ExitCode::FAILURE
        }
    }
}
