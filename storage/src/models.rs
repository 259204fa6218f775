//! Row shapes for the relational store (§3 Data Model). Each maps onto a
//! table in `migrations/0001_init.sql`.

use backend_protocol::SkillId;
use backend_protocol::ThreadId;
use backend_protocol::UserId;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: UserId,
    pub username: String,
    pub password_hash: String,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub thread_id: ThreadId,
    pub user_id: UserId,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillStatus {
    Pending,
    Validating,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStage {
    Layer1,
    Layer2,
    Completed,
    Failed,
}

/// A third-party skill package and its validation state. Mirrors the
/// columns `skill_format_validator.py`/`skill_manager.py` populate on the
/// original's `skills` table, widened with the `overall_score`/
/// `score_breakdown` pair the scoring function (§4.7 step 3) produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub skill_id: SkillId,
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub status: SkillStatus,
    pub validation_stage: Option<ValidationStage>,
    pub skill_path: String,
    pub format_valid: bool,
    pub format_errors: Vec<String>,
    pub format_warnings: Vec<String>,
    pub layer1_report: Option<Value>,
    pub layer2_report: Option<Value>,
    pub score_breakdown: Option<Value>,
    pub overall_score: Option<f64>,
    pub installed_dependencies: Option<Vec<String>>,
    pub approved_by: Option<UserId>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<UserId>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub reject_reason: Option<String>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub validation_tasks: Option<Value>,
    pub full_test_results: Option<Value>,
    pub last_full_test_at: Option<DateTime<Utc>>,
}

impl Skill {
    /// `approve` is only legal when `status=pending ∧ validationStage=completed` (§3).
    pub fn is_approvable(&self) -> bool {
        self.status == SkillStatus::Pending
            && matches!(self.validation_stage, Some(ValidationStage::Completed))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageVersion {
    pub version: i64,
    pub skill_id: Option<SkillId>,
    pub created_at: DateTime<Utc>,
    pub is_current: bool,
    pub dependencies_snapshot: Option<Value>,
}
