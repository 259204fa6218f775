//! Validation Orchestrator (§4.7): the per-skill pipeline — format check
//! (already run at upload time), layer-1 online/offline blind tests,
//! scoring, layer-2 regression over already-approved skills, and
//! crash-recovery via a reserved checkpoint thread id.

use std::sync::Arc;
use std::time::Duration;

use backend_agent::LlmClient;
use backend_agent::LlmClientKind;
use backend_checkpoint::CheckpointState;
use backend_checkpoint::CheckpointStore;
use backend_checkpoint::ConversationMessage;
use backend_common::AppError;
use backend_common::AppResult;
use backend_protocol::SkillId;
use backend_sandbox::OwnerKey;
use backend_sandbox::SandboxExecutor;
use backend_sandbox::SandboxManager;
use backend_storage::Skill;
use backend_storage::ValidationStage;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::sync::Semaphore;

use crate::json_extract::extract_json_block;
use crate::lifecycle::SkillLifecycle;
use crate::scorer::ScoreBreakdown;
use crate::scorer::TaskEvaluation;
use crate::scorer::completion_score;
use crate::scorer::is_passing;
use crate::scorer::offline_score;
use crate::scorer::overall_score;
use crate::scorer::trigger_score;
use crate::task_store::BlindTestTask;
use crate::task_store::merge_tasks;
use crate::task_store::tasks_from_value;
use crate::task_store::tasks_to_value;

const MAX_CONCURRENT: usize = 5;
const EXEC_TIMEOUT: Duration = Duration::from_secs(300);
const ONLINE_PASS_THRESHOLD: f64 = 50.0;
const LAYER2_TASK_COUNT: usize = 2;
const LAYER2_PASS_FRACTION: f64 = 0.5;
const FULL_TEST_EXTRA_TASKS: usize = 2;

#[derive(Debug, Clone, Serialize)]
pub struct ValidationOutcome {
    pub passed: bool,
    pub layer1_report: Value,
    pub layer2_report: Option<Value>,
    pub scores: Option<ScoreBreakdown>,
    pub installed_dependencies: Vec<String>,
    pub tasks: Vec<BlindTestTask>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StepCheckpoint {
    tasks: Vec<BlindTestTask>,
    online: Option<OnlineOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OnlineOutcome {
    evaluations: Vec<TaskEvaluation>,
    completion_score: f64,
    trigger_score: f64,
    installed_dependencies: Vec<String>,
}

pub struct ValidationOrchestrator {
    lifecycle: Arc<SkillLifecycle>,
    checkpoints: Arc<dyn CheckpointStore>,
    sandboxes: Arc<SandboxManager>,
    llm: Arc<dyn LlmClient>,
    lock: Mutex<()>,
    semaphore: Semaphore,
}

impl ValidationOrchestrator {
    pub fn new(
        lifecycle: Arc<SkillLifecycle>,
        checkpoints: Arc<dyn CheckpointStore>,
        sandboxes: Arc<SandboxManager>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        Self {
            lifecycle,
            checkpoints,
            sandboxes,
            llm,
            lock: Mutex::new(()),
            semaphore: Semaphore::new(MAX_CONCURRENT),
        }
    }

    /// Runs the full per-skill pipeline (§4.7 steps 1-5). Serialized
    /// process-wide by `lock` so two skills never produce overlapping
    /// reports; layer-2's own fan-out still runs concurrently inside this
    /// call via `semaphore`.
    pub async fn validate_skill(&self, skill_id: SkillId) -> AppResult<ValidationOutcome> {
        let _guard = self.lock.lock().await;
        self.lifecycle.set_validating(skill_id).await?;

        let result = self.run_pipeline(skill_id).await;
        match &result {
            Ok(outcome) if outcome.passed => {
                self.lifecycle
                    .update_validation_result(
                        skill_id,
                        ValidationStage::Completed,
                        Some(outcome.layer1_report.clone()),
                        outcome.layer2_report.clone(),
                        outcome.scores.map(|s| serde_json::to_value(s).unwrap_or(Value::Null)),
                        outcome.scores.map(|s| s.overall),
                        Some(outcome.installed_dependencies.clone()),
                    )
                    .await?;
            }
            _ => {
                self.lifecycle.set_validation_failed(skill_id).await?;
            }
        }
        // Terminal outcome either way: the checkpoint's job is done.
        self.checkpoints.delete(&checkpoint_thread_id(skill_id)).await?;
        result
    }

    async fn run_pipeline(&self, skill_id: SkillId) -> AppResult<ValidationOutcome> {
        let skill = self.lifecycle.get(skill_id).await?;
        let mut step = self.read_checkpoint(skill_id).await?.unwrap_or_default();

        let online = match step.online.clone() {
            Some(online) => online,
            None => {
                let sandbox = self.sandboxes.get_or_create(OwnerKey::Validation(skill_id)).await?;
                let (tasks, evaluations, installed_dependencies) =
                    self.synthesize_and_evaluate(&skill, sandbox.as_ref()).await?;
                let online = OnlineOutcome {
                    completion_score: completion_score(&evaluations),
                    trigger_score: trigger_score(&evaluations),
                    evaluations,
                    installed_dependencies,
                };
                step = StepCheckpoint { tasks, online: Some(online.clone()) };
                self.write_checkpoint(skill_id, &step).await?;
                online
            }
        };

        let online_passed = online.completion_score >= ONLINE_PASS_THRESHOLD;
        if !online_passed {
            self.sandboxes.destroy_validation_backends(skill_id).await;
            return Ok(ValidationOutcome {
                passed: false,
                layer1_report: json!({
                    "passed": false,
                    "online_blind_test": { "passed": false, "task_results": online.evaluations },
                    "offline_blind_test": Value::Null,
                    "scores": Value::Null,
                }),
                layer2_report: None,
                scores: None,
                installed_dependencies: online.installed_dependencies,
                tasks: step.tasks,
            });
        }

        self.lifecycle.record_tasks(skill_id, tasks_to_value(&step.tasks)).await?;

        let offline_backend = self.sandboxes.get_or_create(OwnerKey::Offline(skill_id)).await?;
        let (offline_blocked_calls, offline_capable) =
            self.run_offline_validation(&skill, offline_backend.as_ref(), &step.tasks).await?;
        self.sandboxes.destroy_validation_backends(skill_id).await;

        let offline = offline_score(offline_blocked_calls);
        let scores = overall_score(online.completion_score, online.trigger_score, offline as f64);
        let passed = is_passing(scores.overall, &online.evaluations);

        let layer1_report = json!({
            "passed": passed,
            "online_blind_test": {
                "passed": online.evaluations.iter().all(|e| e.raw_score >= 3),
                "task_results": online.evaluations,
            },
            "offline_blind_test": {
                "passed": offline >= 70,
                "blocked_network_calls": offline_blocked_calls,
                "offline_capable": offline_capable,
            },
            "scores": scores,
        });

        if !passed {
            return Ok(ValidationOutcome {
                passed: false,
                layer1_report,
                layer2_report: None,
                scores: Some(scores),
                installed_dependencies: online.installed_dependencies,
                tasks: step.tasks,
            });
        }

        let layer2_report = self.run_layer2_regression().await?;
        let layer2_passed = layer2_report
            .get("passed")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Ok(ValidationOutcome {
            passed: layer2_passed,
            layer1_report,
            layer2_report: Some(layer2_report),
            scores: Some(scores),
            installed_dependencies: online.installed_dependencies,
            tasks: step.tasks,
        })
    }

    /// Layer-1 online step (§4.7 step 1): synthesize 3 blind tasks that
    /// never mention the skill by name, execute/evaluate each, and
    /// snapshot the sandbox's installed-dependency set.
    async fn synthesize_and_evaluate(
        &self,
        skill: &Skill,
        sandbox: &dyn SandboxExecutor,
    ) -> AppResult<(Vec<BlindTestTask>, Vec<TaskEvaluation>, Vec<String>)> {
        let before = snapshot_dependencies(sandbox).await;

        let skill_md = read_skill_md(&skill.skill_path).await;
        let prompt = format!(
            "Skill under test: {}\n\n{skill_md}\n\n\
             Synthesize exactly 3 blind test tasks that do NOT mention the skill's name, \
             then evaluate how well a sub-agent used this skill to complete each task on a \
             1-5 scale, noting whether the correct skill was triggered. Respond with JSON: \
             {{\"tasks\":[{{\"task_id\":1,\"task\":\"...\"}}],\
             \"task_evaluations\":[{{\"raw_score\":1,\"correct_skill_used\":true}}]}}",
            skill.name
        );
        let raw = self.llm.complete(LlmClientKind::Big, &prompt).await?;
        let parsed = parse_evaluation_response(&raw);

        let after = snapshot_dependencies(sandbox).await;
        let installed_dependencies = diff_dependencies(&before, &after);

        Ok((parsed.tasks, parsed.task_evaluations, installed_dependencies))
    }

    /// Layer-1 offline step (§4.7 step 2): replay the same tasks in a
    /// sandbox created with the network blocked at construction, and ask
    /// the model to report how many outbound calls the skill attempted.
    async fn run_offline_validation(
        &self,
        skill: &Skill,
        sandbox: &dyn SandboxExecutor,
        tasks: &[BlindTestTask],
    ) -> AppResult<(u32, bool)> {
        let probe = sandbox
            .exec("curl -s --connect-timeout 2 http://example.com 2>&1 || echo BLOCKED", EXEC_TIMEOUT)
            .await?;
        if !probe.stdout.contains("BLOCKED") && !probe.stdout.contains("unreachable") {
            tracing::warn!(skill = %skill.name, "offline sandbox did not appear to block outbound network access");
        }

        let tasks_json = serde_json::to_string(tasks).unwrap_or_default();
        let prompt = format!(
            "Skill under test: {}\n\nReplay these tasks with network access blocked:\n{tasks_json}\n\n\
             Respond with JSON: {{\"blocked_network_calls\":0,\"offline_capable\":true}}",
            skill.name
        );
        let raw = self.llm.complete(LlmClientKind::Big, &prompt).await?;
        let parsed: OfflineResponse = serde_json::from_str(extract_json_block(&raw)).unwrap_or(OfflineResponse {
            blocked_network_calls: 0,
            offline_capable: true,
        });
        Ok((parsed.blocked_network_calls, parsed.offline_capable))
    }

    /// Layer-2 regression (§4.7 step 4): every currently-approved skill
    /// gets a fresh 2-task sanity check, fanned out up to
    /// [`MAX_CONCURRENT`] at a time. The whole layer passes iff every
    /// approved skill's check passes.
    async fn run_layer2_regression(&self) -> AppResult<Value> {
        let approved = self.lifecycle.list_approved().await?;
        if approved.is_empty() {
            return Ok(json!({ "passed": true, "checked": [] }));
        }

        let mut handles = Vec::with_capacity(approved.len());
        for skill in approved {
            let permit = self.semaphore.acquire().await.map_err(|e| AppError::Internal(e.into()))?;
            let llm = self.llm.clone();
            let sandboxes = self.sandboxes.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let outcome = regression_check(&llm, &sandboxes, &skill).await;
                (skill.skill_id, skill.name, outcome)
            }));
        }

        let mut checked = Vec::new();
        let mut all_passed = true;
        for handle in handles {
            let (skill_id, name, outcome) = handle.await.map_err(|e| AppError::Internal(e.into()))?;
            let passed = outcome.unwrap_or(false);
            all_passed &= passed;
            checked.push(json!({ "skill_id": skill_id, "name": name, "passed": passed }));
        }

        Ok(json!({ "passed": all_passed, "checked": checked }))
    }

    /// Full-test command (§4.7 "Full-test command"): reuses a skill's 3
    /// originally-stored tasks plus 2 freshly generated ones.
    pub async fn run_full_test(&self) -> AppResult<Value> {
        let approved = self.lifecycle.list_approved().await?;
        if approved.is_empty() {
            return Ok(json!({ "passed": true, "total_tested": 0 }));
        }

        let mut failed = Vec::new();
        let mut results = serde_json::Map::new();
        for skill in approved {
            let _permit = self.semaphore.acquire().await.map_err(|e| AppError::Internal(e.into()))?;
            let result = self.run_full_test_single(&skill).await;
            let (passed, value) = match result {
                Ok(value) => (value.get("passed").and_then(Value::as_bool).unwrap_or(false), value),
                Err(err) => (false, json!({ "passed": false, "error": err.to_string() })),
            };
            if !passed {
                failed.push(skill.skill_id);
            }
            results.insert(skill.skill_id.to_string(), value);
        }

        Ok(json!({
            "passed": failed.is_empty(),
            "total_tested": results.len(),
            "failed_count": failed.len(),
            "failed_skills": failed,
            "results": results,
        }))
    }

    async fn run_full_test_single(&self, skill: &Skill) -> AppResult<Value> {
        let old_tasks = tasks_from_value(skill.validation_tasks.as_ref());
        let new_tasks = self.generate_extra_tasks(skill, &old_tasks, FULL_TEST_EXTRA_TASKS).await?;
        let all_tasks = merge_tasks(old_tasks, new_tasks);

        let sandbox = self.sandboxes.get_or_create(OwnerKey::Validation(skill.skill_id)).await?;
        let evaluations = self.evaluate_given_tasks(skill, sandbox.as_ref(), &all_tasks).await?;
        self.sandboxes.destroy(&OwnerKey::Validation(skill.skill_id)).await?;

        let completion = completion_score(&evaluations);
        let trigger = trigger_score(&evaluations);
        let passed = completion >= ONLINE_PASS_THRESHOLD;

        let result = json!({
            "passed": passed,
            "completion_score": completion,
            "trigger_score": trigger,
            "tasks": all_tasks,
        });
        self.lifecycle.record_full_test_result(skill.skill_id, result.clone()).await?;
        self.lifecycle.record_tasks(skill.skill_id, tasks_to_value(&all_tasks)).await?;
        Ok(result)
    }

    async fn generate_extra_tasks(
        &self,
        skill: &Skill,
        existing: &[BlindTestTask],
        count: usize,
    ) -> AppResult<Vec<BlindTestTask>> {
        let existing_descriptions: Vec<&str> = existing.iter().map(|t| t.task.as_str()).collect();
        let skill_md = read_skill_md(&skill.skill_path).await;
        let prompt = format!(
            "Generate {count} additional blind test tasks for the skill \"{}\" that do not \
             duplicate any of these existing tasks: {existing_descriptions:?}\n\n{skill_md}\n\n\
             Respond with a JSON array: [{{\"task_id\":1,\"task\":\"...\"}}]",
            skill.name
        );
        let raw = self.llm.complete(LlmClientKind::Big, &prompt).await?;
        let mut tasks: Vec<BlindTestTask> =
            serde_json::from_str(extract_json_block(&raw)).unwrap_or_default();
        for (i, task) in tasks.iter_mut().enumerate() {
            task.task_id = (existing.len() + i + 1) as i64;
            task.is_new = true;
        }
        Ok(tasks)
    }

    async fn evaluate_given_tasks(
        &self,
        skill: &Skill,
        _sandbox: &dyn SandboxExecutor,
        tasks: &[BlindTestTask],
    ) -> AppResult<Vec<TaskEvaluation>> {
        let tasks_json = serde_json::to_string(tasks).unwrap_or_default();
        let prompt = format!(
            "Skill under test: {}\n\nEvaluate a sub-agent executing each of these tasks on a \
             1-5 scale: {tasks_json}\n\nRespond with JSON: \
             {{\"task_evaluations\":[{{\"raw_score\":1,\"correct_skill_used\":true}}]}}",
            skill.name
        );
        let raw = self.llm.complete(LlmClientKind::Big, &prompt).await?;
        Ok(parse_evaluation_response(&raw).task_evaluations)
    }

    /// Startup reconciliation (§4.7 cross-cutting durability): any skill
    /// left `validating`/`layer1`/`layer2` from a prior process either
    /// resumes from its checkpoint or is marked lost.
    pub async fn reconcile_on_startup(&self) -> AppResult<()> {
        for skill in self.lifecycle.list_pending_validation().await? {
            let thread = checkpoint_thread_id(skill.skill_id);
            if self.checkpoints.exists(&thread).await? {
                tracing::info!(skill = %skill.name, "resuming validation from checkpoint after restart");
                if let Err(err) = self.validate_skill(skill.skill_id).await {
                    tracing::error!(skill = %skill.name, %err, "resumed validation failed");
                }
            } else {
                tracing::warn!(skill = %skill.name, "no checkpoint for in-flight validation, marking lost");
                self.lifecycle.set_validation_failed(skill.skill_id).await?;
            }
        }
        Ok(())
    }

    async fn read_checkpoint(&self, skill_id: SkillId) -> AppResult<Option<StepCheckpoint>> {
        let state = self.checkpoints.get(&checkpoint_thread_id(skill_id)).await?;
        Ok(state.and_then(|s| {
            s.messages
                .last()
                .and_then(|m| serde_json::from_str::<StepCheckpoint>(&m.content).ok())
        }))
    }

    async fn write_checkpoint(&self, skill_id: SkillId, step: &StepCheckpoint) -> AppResult<()> {
        let content = serde_json::to_string(step)?;
        let state = CheckpointState { messages: vec![ConversationMessage::system(content)], pending_interrupts: vec![] };
        self.checkpoints.put(&checkpoint_thread_id(skill_id), state).await
    }
}

async fn regression_check(llm: &Arc<dyn LlmClient>, sandboxes: &Arc<SandboxManager>, skill: &Skill) -> AppResult<bool> {
    let _sandbox = sandboxes.get_or_create(OwnerKey::Validation(skill.skill_id)).await?;
    let skill_md = read_skill_md(&skill.skill_path).await;
    let prompt = format!(
        "Regression sanity check for the approved skill \"{}\": run {LAYER2_TASK_COUNT} short tasks \
         against it.\n\n{skill_md}\n\nRespond with JSON: \
         {{\"task_evaluations\":[{{\"raw_score\":1,\"correct_skill_used\":true}}]}}",
        skill.name
    );
    let raw = llm.complete(LlmClientKind::Big, &prompt).await?;
    let evaluations = parse_evaluation_response(&raw).task_evaluations;
    sandboxes.destroy(&OwnerKey::Validation(skill.skill_id)).await?;

    if evaluations.is_empty() {
        return Ok(false);
    }
    let completed = evaluations.iter().filter(|e| e.raw_score >= 3).count();
    Ok(completed as f64 / evaluations.len() as f64 >= LAYER2_PASS_FRACTION)
}

#[derive(Debug, Default, Deserialize)]
struct EvaluationResponse {
    #[serde(default)]
    tasks: Vec<BlindTestTask>,
    #[serde(default)]
    task_evaluations: Vec<TaskEvaluation>,
}

fn parse_evaluation_response(raw: &str) -> EvaluationResponse {
    serde_json::from_str(extract_json_block(raw)).unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct OfflineResponse {
    #[serde(default)]
    blocked_network_calls: u32,
    #[serde(default = "default_true")]
    offline_capable: bool,
}

fn default_true() -> bool {
    true
}

fn checkpoint_thread_id(skill_id: SkillId) -> String {
    format!("validation_{skill_id}")
}

async fn read_skill_md(skill_path: &str) -> String {
    tokio::fs::read_to_string(format!("{skill_path}/SKILL.md")).await.unwrap_or_default()
}

/// Stand-in for "snapshot shell-history deltas": diffing the installed
/// Python package set before and after the online run is a concrete,
/// observable analogue for skills that install dependencies via pip.
async fn snapshot_dependencies(sandbox: &dyn SandboxExecutor) -> Vec<String> {
    match sandbox.exec("pip freeze 2>/dev/null || true", Duration::from_secs(10)).await {
        Ok(result) => result.stdout.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect(),
        Err(_) => Vec::new(),
    }
}

fn diff_dependencies(before: &[String], after: &[String]) -> Vec<String> {
    after.iter().filter(|pkg| !before.contains(pkg)).cloned().collect()
}
