//! Skill validation (§4.7): format check, the layer-1/layer-2 blind-test
//! pipeline, scoring, and the pending/approved/rejected lifecycle that
//! backs `SKILL.md` uploads.
//!
//! Grounded on the original's skill validation service, widened with a
//! resumable per-skill checkpoint so a crash mid-pipeline doesn't strand
//! a skill in `validating` forever.

pub mod format;
pub mod json_extract;
pub mod lifecycle;
pub mod orchestrator;
pub mod scorer;
pub mod task_store;

pub use format::FormatReport;
pub use format::FormatValidator;
pub use format::SkillMetadata;
pub use json_extract::extract_json_block;
pub use lifecycle::SkillDirs;
pub use lifecycle::SkillLifecycle;
pub use orchestrator::ValidationOrchestrator;
pub use orchestrator::ValidationOutcome;
pub use scorer::ScoreBreakdown;
pub use scorer::TaskEvaluation;
pub use scorer::completion_score;
pub use scorer::convert_raw_score;
pub use scorer::is_passing;
pub use scorer::offline_score;
pub use scorer::overall_score;
pub use scorer::trigger_score;
pub use task_store::BlindTestTask;
pub use task_store::merge_tasks;
pub use task_store::tasks_from_value;
pub use task_store::tasks_to_value;
