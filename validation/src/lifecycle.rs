//! Skill CRUD and state transitions (§3 Skill lifecycle, §4.7): the
//! pending→approved/rejected state machine plus the directory moves that
//! back it, mirroring the original's manager module one transition at a
//! time.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use backend_common::AppError;
use backend_common::AppResult;
use backend_protocol::SkillId;
use backend_protocol::UserId;
use backend_storage::Skill;
use backend_storage::SkillRepository;
use backend_storage::SkillStatus;
use backend_storage::ValidationStage;
use chrono::Utc;
use serde_json::Value;
use tokio::fs;

use crate::format::FormatReport;

/// Where pending and approved skill directories live on disk. Moving a
/// skill between these roots is how `approve`/`reject` take effect on the
/// filesystem; the DB row's `skill_path` is the single source of truth
/// for which root a skill currently lives under.
pub struct SkillDirs {
    pub pending_dir: PathBuf,
    pub approved_dir: PathBuf,
}

pub struct SkillLifecycle {
    repo: Arc<dyn SkillRepository>,
    dirs: SkillDirs,
}

impl SkillLifecycle {
    pub fn new(repo: Arc<dyn SkillRepository>, dirs: SkillDirs) -> Self {
        Self { repo, dirs }
    }

    /// Registers a freshly-extracted skill directory (already moved into
    /// `pending_dir/{name}` by the caller) as a new `Skill` row in
    /// `pending` status. Format errors are recorded but never reject the
    /// upload (§4.7 step 0).
    pub async fn record_upload(
        &self,
        name: String,
        extracted_path: &Path,
        format: FormatReport,
        created_by: UserId,
    ) -> AppResult<Skill> {
        let skill = Skill {
            skill_id: SkillId::new(),
            name,
            display_name: format.metadata.as_ref().and_then(|m| m.display_name.clone()),
            description: format.metadata.as_ref().map(|m| m.description.clone()),
            status: SkillStatus::Pending,
            validation_stage: None,
            skill_path: extracted_path.to_string_lossy().into_owned(),
            format_valid: format.valid,
            format_errors: format.errors,
            format_warnings: format.warnings,
            layer1_report: None,
            layer2_report: None,
            score_breakdown: None,
            overall_score: None,
            installed_dependencies: None,
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            reject_reason: None,
            created_by,
            created_at: Utc::now(),
            validation_tasks: None,
            full_test_results: None,
            last_full_test_at: None,
        };
        self.repo.create(skill).await
    }

    pub async fn get(&self, skill_id: SkillId) -> AppResult<Skill> {
        self.repo
            .get(skill_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("skill {skill_id}")))
    }

    /// `status -> validating`, `validationStage -> layer1`.
    pub async fn set_validating(&self, skill_id: SkillId) -> AppResult<Skill> {
        let mut skill = self.get(skill_id).await?;
        skill.status = SkillStatus::Validating;
        skill.validation_stage = Some(ValidationStage::Layer1);
        self.repo.update(skill.clone()).await?;
        Ok(skill)
    }

    /// Records whichever of layer1/layer2 report, scores, and installed
    /// dependencies the caller has for this step, and advances
    /// `validationStage`. Passing `None` for a field leaves it untouched.
    #[allow(clippy::too_many_arguments)]
    pub async fn update_validation_result(
        &self,
        skill_id: SkillId,
        validation_stage: ValidationStage,
        layer1_report: Option<Value>,
        layer2_report: Option<Value>,
        score_breakdown: Option<Value>,
        overall_score: Option<f64>,
        installed_dependencies: Option<Vec<String>>,
    ) -> AppResult<Skill> {
        let mut skill = self.get(skill_id).await?;
        skill.validation_stage = Some(validation_stage);
        if let Some(report) = layer1_report {
            skill.layer1_report = Some(report);
        }
        if let Some(report) = layer2_report {
            skill.layer2_report = Some(report);
        }
        if let Some(scores) = score_breakdown {
            skill.score_breakdown = Some(scores);
        }
        if overall_score.is_some() {
            skill.overall_score = overall_score;
        }
        if let Some(deps) = installed_dependencies {
            skill.installed_dependencies = Some(deps);
        }
        self.repo.update(skill.clone()).await?;
        Ok(skill)
    }

    /// `status -> pending`, `validationStage -> failed` (§4.7 step 5: any
    /// layer failure reverts status to `pending` so the skill can be
    /// resubmitted rather than stranding it in `validating`).
    /// Persists the blind-test tasks synthesized during layer-1 online
    /// validation so `runFullTest` can reuse them later (§4.7 "Full-test
    /// command").
    pub async fn record_tasks(&self, skill_id: SkillId, tasks: Value) -> AppResult<()> {
        let mut skill = self.get(skill_id).await?;
        skill.validation_tasks = Some(tasks);
        self.repo.update(skill).await
    }

    pub async fn set_validation_failed(&self, skill_id: SkillId) -> AppResult<Skill> {
        let mut skill = self.get(skill_id).await?;
        skill.status = SkillStatus::Pending;
        skill.validation_stage = Some(ValidationStage::Failed);
        self.repo.update(skill.clone()).await?;
        Ok(skill)
    }

    /// Moves the skill's directory from `pending_dir` to `approved_dir`
    /// and THEN commits the status change — files move first, matching
    /// the original's ordering, so a crash between the two leaves a
    /// recoverable (not silently lost) skill: the startup reconciliation
    /// pass logs a warning when a row's `status` and its directory
    /// location disagree.
    pub async fn approve(&self, skill_id: SkillId, admin: UserId) -> AppResult<Skill> {
        let mut skill = self.get(skill_id).await?;
        if !skill.is_approvable() {
            return Err(AppError::StateIllegal(format!(
                "skill {skill_id} is not approvable (status={:?}, stage={:?})",
                skill.status, skill.validation_stage
            )));
        }

        let old_path = PathBuf::from(&skill.skill_path);
        let new_path = self.dirs.approved_dir.join(&skill.name);
        move_dir_replacing(&old_path, &new_path).await?;

        skill.status = SkillStatus::Approved;
        skill.approved_by = Some(admin);
        skill.approved_at = Some(Utc::now());
        skill.skill_path = new_path.to_string_lossy().into_owned();
        self.repo.update(skill.clone()).await?;
        Ok(skill)
    }

    pub async fn reject(&self, skill_id: SkillId, admin: UserId, reason: String) -> AppResult<Skill> {
        let mut skill = self.get(skill_id).await?;
        skill.status = SkillStatus::Rejected;
        skill.rejected_by = Some(admin);
        skill.rejected_at = Some(Utc::now());
        skill.reject_reason = Some(reason);
        self.repo.update(skill.clone()).await?;
        Ok(skill)
    }

    pub async fn delete(&self, skill_id: SkillId) -> AppResult<()> {
        let skill = self.get(skill_id).await?;
        let path = PathBuf::from(&skill.skill_path);
        if fs::metadata(&path).await.is_ok() {
            fs::remove_dir_all(&path).await?;
        }
        self.repo.delete_row(skill_id).await
    }

    /// Records a `runFullTest` result for one skill (§4.7 "Full-test
    /// command").
    pub async fn record_full_test_result(&self, skill_id: SkillId, result: Value) -> AppResult<()> {
        let mut skill = self.get(skill_id).await?;
        skill.full_test_results = Some(result);
        skill.last_full_test_at = Some(Utc::now());
        self.repo.update(skill).await
    }

    pub async fn list_approved(&self) -> AppResult<Vec<Skill>> {
        self.repo.list(Some(SkillStatus::Approved)).await
    }

    /// Skills mid-pipeline at the moment of a crash or restart: either
    /// `status=validating`, or a non-terminal `validationStage` left over
    /// from a process that died before the stage could advance.
    pub async fn list_pending_validation(&self) -> AppResult<Vec<Skill>> {
        let mut skills = self.repo.list(Some(SkillStatus::Validating)).await?;
        let pending = self.repo.list(Some(SkillStatus::Pending)).await?;
        skills.extend(pending.into_iter().filter(|s| {
            matches!(s.validation_stage, Some(ValidationStage::Layer1) | Some(ValidationStage::Layer2))
        }));
        Ok(skills)
    }
}

async fn move_dir_replacing(old_path: &Path, new_path: &Path) -> AppResult<()> {
    if fs::metadata(new_path).await.is_ok() {
        fs::remove_dir_all(new_path).await?;
    }
    if let Some(parent) = new_path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::rename(old_path, new_path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend_storage::InMemorySkillRepository;
    use tempfile::tempdir;
    use tokio::fs;

    async fn lifecycle() -> (SkillLifecycle, tempfile::TempDir) {
        let root = tempdir().unwrap();
        let pending_dir = root.path().join("pending");
        let approved_dir = root.path().join("approved");
        fs::create_dir_all(&pending_dir).await.unwrap();
        fs::create_dir_all(&approved_dir).await.unwrap();
        let repo: Arc<dyn SkillRepository> = Arc::new(InMemorySkillRepository::new());
        (SkillLifecycle::new(repo, SkillDirs { pending_dir, approved_dir }), root)
    }

    async fn upload(lifecycle: &SkillLifecycle, root: &tempfile::TempDir, name: &str) -> Skill {
        let skill_dir = root.path().join("pending").join(name);
        fs::create_dir_all(&skill_dir).await.unwrap();
        let format = FormatReport { valid: true, errors: vec![], warnings: vec![], metadata: None };
        lifecycle
            .record_upload(name.to_string(), &skill_dir, format, UserId::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn approve_rejects_a_skill_not_yet_validated() {
        let (lifecycle, root) = lifecycle().await;
        let skill = upload(&lifecycle, &root, "echo-helper").await;
        let err = lifecycle.approve(skill.skill_id, UserId::new()).await.unwrap_err();
        assert!(matches!(err, AppError::StateIllegal(_)));
    }

    #[tokio::test]
    async fn approve_moves_directory_and_flips_status() {
        let (lifecycle, root) = lifecycle().await;
        let skill = upload(&lifecycle, &root, "echo-helper").await;
        lifecycle.set_validating(skill.skill_id).await.unwrap();
        lifecycle
            .update_validation_result(skill.skill_id, ValidationStage::Completed, None, None, None, None, None)
            .await
            .unwrap();

        let admin = UserId::new();
        let approved = lifecycle.approve(skill.skill_id, admin).await.unwrap();
        assert_eq!(approved.status, SkillStatus::Approved);
        assert_eq!(approved.approved_by, Some(admin));
        assert!(approved.skill_path.contains("approved"));
        assert!(fs::metadata(&approved.skill_path).await.is_ok());
        assert!(fs::metadata(root.path().join("pending").join("echo-helper")).await.is_err());
    }

    #[tokio::test]
    async fn failed_validation_reverts_to_pending_so_it_can_be_resubmitted() {
        let (lifecycle, root) = lifecycle().await;
        let skill = upload(&lifecycle, &root, "echo-helper").await;
        lifecycle.set_validating(skill.skill_id).await.unwrap();
        let failed = lifecycle.set_validation_failed(skill.skill_id).await.unwrap();
        assert_eq!(failed.status, SkillStatus::Pending);
        assert_eq!(failed.validation_stage, Some(ValidationStage::Failed));
    }

    #[tokio::test]
    async fn list_pending_validation_includes_mid_pipeline_skills() {
        let (lifecycle, root) = lifecycle().await;
        let a = upload(&lifecycle, &root, "skill-a").await;
        let _b = upload(&lifecycle, &root, "skill-b").await;
        lifecycle.set_validating(a.skill_id).await.unwrap();

        let pending = lifecycle.list_pending_validation().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].skill_id, a.skill_id);
    }
}
