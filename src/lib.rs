#![deny(clippy::all)]

pub mod bkt;
pub mod classifier;
pub mod config;
pub mod diagnosis;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod sanitize;
pub mod selector;
pub mod session;
pub mod types;

// Re-export the main types and functions
pub use bkt::{
    information_gain, is_stable, response_probability, BktParameters, MasteryMap,
    MasterySummary, MasteryTracker, MasteryUpdate, SkillContribution, SkillMastery,
};
pub use classifier::{
    AnswerFormat, AnswerPayload, AttemptPattern, CanonicalAnswer, Classification, ErrorMatcher,
    ErrorPattern, Question, Response, ResponseClassifier, ResponseOutcome, TimingBucket,
};
pub use config::AssessConfig;
pub use diagnosis::{generate_diagnosis, DiagnosisReport, ErrorFrequency, SkillFinding};
pub use error::{AssessError, Result};
pub use orchestrator::{
    AssessmentItem, BranchCondition, BranchRule, ItemBranch, NextStep, Routing,
    SessionOrchestrator, TerminationReason, TurnResult,
};
pub use selector::{
    DifficultyRange, ItemCandidate, ItemSelection, ItemSelector, ScoreBreakdown,
    SelectionCriteria, SelectionWindows, StopDecision, StopReason,
};
pub use session::{AttemptRecord, DiagnosisPayload, PartialDiagnosis, SessionState, Skill};
pub use types::*;
