use std::str::FromStr;
use std::sync::Mutex;

use async_trait::async_trait;
use backend_common::AppError;
use backend_common::AppResult;
use backend_protocol::SkillId;
use backend_protocol::UserId;
use chrono::DateTime;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::models::Skill;
use crate::models::SkillStatus;
use crate::models::ValidationStage;

/// Persistence for `Skill` rows (§3, §4.7). Follows the same
/// read-mutate-write-back-wholesale shape as `CheckpointStore::put`: the
/// validation orchestrator holds the authoritative in-memory `Skill` for
/// the duration of one pipeline run and calls `update` once per step
/// rather than this trait exposing a setter per column.
#[async_trait]
pub trait SkillRepository: Send + Sync {
    async fn create(&self, skill: Skill) -> AppResult<Skill>;
    async fn get(&self, skill_id: SkillId) -> AppResult<Option<Skill>>;
    /// `name` is unique across all non-deleted skills (§3 invariant).
    async fn get_by_name(&self, name: &str) -> AppResult<Option<Skill>>;
    async fn list(&self, status: Option<SkillStatus>) -> AppResult<Vec<Skill>>;
    async fn update(&self, skill: Skill) -> AppResult<()>;
    async fn delete_row(&self, skill_id: SkillId) -> AppResult<()>;
}

fn status_str(status: SkillStatus) -> &'static str {
    match status {
        SkillStatus::Pending => "pending",
        SkillStatus::Validating => "validating",
        SkillStatus::Approved => "approved",
        SkillStatus::Rejected => "rejected",
    }
}

fn parse_status(raw: &str) -> AppResult<SkillStatus> {
    match raw {
        "pending" => Ok(SkillStatus::Pending),
        "validating" => Ok(SkillStatus::Validating),
        "approved" => Ok(SkillStatus::Approved),
        "rejected" => Ok(SkillStatus::Rejected),
        other => Err(AppError::Internal(anyhow::anyhow!(
            "unknown skill status in storage: {other}"
        ))),
    }
}

fn stage_str(stage: ValidationStage) -> &'static str {
    match stage {
        ValidationStage::Layer1 => "layer1",
        ValidationStage::Layer2 => "layer2",
        ValidationStage::Completed => "completed",
        ValidationStage::Failed => "failed",
    }
}

fn parse_stage(raw: &str) -> AppResult<ValidationStage> {
    match raw {
        "layer1" => Ok(ValidationStage::Layer1),
        "layer2" => Ok(ValidationStage::Layer2),
        "completed" => Ok(ValidationStage::Completed),
        "failed" => Ok(ValidationStage::Failed),
        other => Err(AppError::Internal(anyhow::anyhow!(
            "unknown validation stage in storage: {other}"
        ))),
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SkillRow {
    skill_id: String,
    name: String,
    display_name: Option<String>,
    description: Option<String>,
    status: String,
    validation_stage: Option<String>,
    skill_path: String,
    format_valid: bool,
    format_errors: String,
    format_warnings: String,
    layer1_report: Option<String>,
    layer2_report: Option<String>,
    score_breakdown: Option<String>,
    overall_score: Option<f64>,
    installed_dependencies: Option<String>,
    approved_by: Option<String>,
    approved_at: Option<DateTime<Utc>>,
    rejected_by: Option<String>,
    rejected_at: Option<DateTime<Utc>>,
    reject_reason: Option<String>,
    created_by: String,
    created_at: DateTime<Utc>,
    validation_tasks: Option<String>,
    full_test_results: Option<String>,
    last_full_test_at: Option<DateTime<Utc>>,
}

impl TryFrom<SkillRow> for Skill {
    type Error = AppError;

    fn try_from(row: SkillRow) -> Result<Self, Self::Error> {
        let parse_json = |s: Option<String>| -> AppResult<Option<serde_json::Value>> {
            s.map(|s| serde_json::from_str(&s)).transpose().map_err(AppError::from)
        };
        let parse_user = |s: Option<String>| -> AppResult<Option<UserId>> {
            s.map(|s| UserId::from_str(&s).map_err(|e| AppError::Internal(e.into())))
                .transpose()
        };
        Ok(Skill {
            skill_id: SkillId(uuid::Uuid::from_str(&row.skill_id).map_err(|e| AppError::Internal(e.into()))?),
            name: row.name,
            display_name: row.display_name,
            description: row.description,
            status: parse_status(&row.status)?,
            validation_stage: row.validation_stage.as_deref().map(parse_stage).transpose()?,
            skill_path: row.skill_path,
            format_valid: row.format_valid,
            format_errors: serde_json::from_str(&row.format_errors)?,
            format_warnings: serde_json::from_str(&row.format_warnings)?,
            layer1_report: parse_json(row.layer1_report)?,
            layer2_report: parse_json(row.layer2_report)?,
            score_breakdown: parse_json(row.score_breakdown)?,
            overall_score: row.overall_score,
            installed_dependencies: row
                .installed_dependencies
                .map(|s| serde_json::from_str(&s))
                .transpose()?,
            approved_by: parse_user(row.approved_by)?,
            approved_at: row.approved_at,
            rejected_by: parse_user(row.rejected_by)?,
            rejected_at: row.rejected_at,
            reject_reason: row.reject_reason,
            created_by: UserId::from_str(&row.created_by).map_err(|e| AppError::Internal(e.into()))?,
            created_at: row.created_at,
            validation_tasks: parse_json(row.validation_tasks)?,
            full_test_results: parse_json(row.full_test_results)?,
            last_full_test_at: row.last_full_test_at,
        })
    }
}

pub struct SqliteSkillRepository {
    pool: SqlitePool,
}

impl SqliteSkillRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SkillRepository for SqliteSkillRepository {
    async fn create(&self, skill: Skill) -> AppResult<Skill> {
        self.write(&skill, true).await?;
        Ok(skill)
    }

    async fn get(&self, skill_id: SkillId) -> AppResult<Option<Skill>> {
        let row: Option<SkillRow> = sqlx::query_as("SELECT * FROM skills WHERE skill_id = ?")
            .bind(skill_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Internal(e.into()))?;
        row.map(Skill::try_from).transpose()
    }

    async fn get_by_name(&self, name: &str) -> AppResult<Option<Skill>> {
        let row: Option<SkillRow> = sqlx::query_as("SELECT * FROM skills WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Internal(e.into()))?;
        row.map(Skill::try_from).transpose()
    }

    async fn list(&self, status: Option<SkillStatus>) -> AppResult<Vec<Skill>> {
        let rows: Vec<SkillRow> = match status {
            Some(status) => sqlx::query_as("SELECT * FROM skills WHERE status = ? ORDER BY created_at DESC")
                .bind(status_str(status))
                .fetch_all(&self.pool)
                .await,
            None => sqlx::query_as("SELECT * FROM skills ORDER BY created_at DESC")
                .fetch_all(&self.pool)
                .await,
        }
        .map_err(|e| AppError::Internal(e.into()))?;
        rows.into_iter().map(Skill::try_from).collect()
    }

    async fn update(&self, skill: Skill) -> AppResult<()> {
        self.write(&skill, false).await
    }

    async fn delete_row(&self, skill_id: SkillId) -> AppResult<()> {
        sqlx::query("DELETE FROM skills WHERE skill_id = ?")
            .bind(skill_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Internal(e.into()))?;
        Ok(())
    }
}

impl SqliteSkillRepository {
    async fn write(&self, skill: &Skill, insert: bool) -> AppResult<()> {
        let sql = if insert {
            "INSERT INTO skills (skill_id, name, display_name, description, status, validation_stage, \
             skill_path, format_valid, format_errors, format_warnings, layer1_report, layer2_report, \
             score_breakdown, overall_score, installed_dependencies, approved_by, approved_at, \
             rejected_by, rejected_at, reject_reason, created_by, created_at, validation_tasks, \
             full_test_results, last_full_test_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        } else {
            "UPDATE skills SET name = ?2, display_name = ?3, description = ?4, status = ?5, \
             validation_stage = ?6, skill_path = ?7, format_valid = ?8, format_errors = ?9, \
             format_warnings = ?10, layer1_report = ?11, layer2_report = ?12, score_breakdown = ?13, \
             overall_score = ?14, installed_dependencies = ?15, approved_by = ?16, approved_at = ?17, \
             rejected_by = ?18, rejected_at = ?19, reject_reason = ?20, created_by = ?21, \
             created_at = ?22, validation_tasks = ?23, full_test_results = ?24, last_full_test_at = ?25 \
             WHERE skill_id = ?1"
        };
        sqlx::query(sql)
            .bind(skill.skill_id.to_string())
            .bind(&skill.name)
            .bind(&skill.display_name)
            .bind(&skill.description)
            .bind(status_str(skill.status))
            .bind(skill.validation_stage.map(stage_str))
            .bind(&skill.skill_path)
            .bind(skill.format_valid)
            .bind(serde_json::to_string(&skill.format_errors)?)
            .bind(serde_json::to_string(&skill.format_warnings)?)
            .bind(skill.layer1_report.as_ref().map(serde_json::to_string).transpose()?)
            .bind(skill.layer2_report.as_ref().map(serde_json::to_string).transpose()?)
            .bind(skill.score_breakdown.as_ref().map(serde_json::to_string).transpose()?)
            .bind(skill.overall_score)
            .bind(
                skill
                    .installed_dependencies
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
            )
            .bind(skill.approved_by.map(|u| u.to_string()))
            .bind(skill.approved_at)
            .bind(skill.rejected_by.map(|u| u.to_string()))
            .bind(skill.rejected_at)
            .bind(&skill.reject_reason)
            .bind(skill.created_by.to_string())
            .bind(skill.created_at)
            .bind(skill.validation_tasks.as_ref().map(serde_json::to_string).transpose()?)
            .bind(
                skill
                    .full_test_results
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
            )
            .bind(skill.last_full_test_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db) = e {
                    if db.is_unique_violation() {
                        return AppError::Conflict(format!("skill name `{}` is already taken", skill.name));
                    }
                }
                AppError::Internal(e.into())
            })?;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemorySkillRepository {
    rows: Mutex<Vec<Skill>>,
}

impl InMemorySkillRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SkillRepository for InMemorySkillRepository {
    async fn create(&self, skill: Skill) -> AppResult<Skill> {
        let mut guard = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        if guard.iter().any(|s| s.name == skill.name) {
            return Err(AppError::Conflict(format!(
                "skill name `{}` is already taken",
                skill.name
            )));
        }
        guard.push(skill.clone());
        Ok(skill)
    }

    async fn get(&self, skill_id: SkillId) -> AppResult<Option<Skill>> {
        Ok(self
            .rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|s| s.skill_id == skill_id)
            .cloned())
    }

    async fn get_by_name(&self, name: &str) -> AppResult<Option<Skill>> {
        Ok(self
            .rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|s| s.name == name)
            .cloned())
    }

    async fn list(&self, status: Option<SkillStatus>) -> AppResult<Vec<Skill>> {
        Ok(self
            .rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|s| status.is_none_or(|st| s.status == st))
            .cloned()
            .collect())
    }

    async fn update(&self, skill: Skill) -> AppResult<()> {
        let mut guard = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        let Some(existing) = guard.iter_mut().find(|s| s.skill_id == skill.skill_id) else {
            return Err(AppError::NotFound(format!("skill {}", skill.skill_id)));
        };
        *existing = skill;
        Ok(())
    }

    async fn delete_row(&self, skill_id: SkillId) -> AppResult<()> {
        let mut guard = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        guard.retain(|s| s.skill_id != skill_id);
        Ok(())
    }
}
