//! `/admin/skills/*` (§6, §4.7): skill upload, listing, validation,
//! approval/rejection and the full-test sweep. Every route here requires
//! [`AdminUser`].

use std::io::Cursor;
use std::path::Path as StdPath;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::Multipart;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::routing::delete;
use axum::routing::get;
use axum::routing::post;
use backend_common::AppError;
use backend_common::AppResult;
use backend_protocol::SkillId;
use backend_storage::Skill;
use backend_storage::SkillStatus;
use backend_validation::FormatValidator;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tokio::fs;
use uuid::Uuid;

use crate::auth::AdminUser;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin/skills/upload", post(upload_skill))
        .route("/admin/skills", get(list_skills))
        .route("/admin/skills/full-test", post(full_test))
        .route("/admin/skills/{id}", get(get_skill).delete(delete_skill))
        .route("/admin/skills/{id}/validate", post(validate_skill))
        .route("/admin/skills/{id}/revalidate", post(revalidate_skill))
        .route("/admin/skills/{id}/approve", post(approve_skill))
        .route("/admin/skills/{id}/reject", post(reject_skill))
        .route("/admin/skills/{id}/report", get(report))
}

fn parse_skill_id(raw: &str) -> AppResult<SkillId> {
    Uuid::parse_str(raw)
        .map(SkillId)
        .map_err(|_| AppError::BadRequest(format!("{raw} is not a valid skill id")))
}

/// Extracts `archive` into `dest`, rejecting any entry whose normalized
/// path would escape `dest` (a hostile `../../etc/passwd` entry name).
fn extract_zip(archive: &[u8], dest: &StdPath) -> AppResult<()> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive))
        .map_err(|e| AppError::BadRequest(format!("not a valid zip file: {e}")))?;
    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| AppError::BadRequest(format!("corrupt zip entry: {e}")))?;
        let Some(name) = entry.enclosed_name() else {
            return Err(AppError::BadRequest(format!(
                "zip entry {} has an unsafe path",
                entry.name()
            )));
        };
        let out_path = dest.join(name);
        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)
                .map_err(|e| AppError::Internal(anyhow::anyhow!("creating {out_path:?}: {e}")))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AppError::Internal(anyhow::anyhow!("creating {parent:?}: {e}")))?;
        }
        let mut out = std::fs::File::create(&out_path)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("writing {out_path:?}: {e}")))?;
        std::io::copy(&mut entry, &mut out)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("writing {out_path:?}: {e}")))?;
    }
    Ok(())
}

async fn upload_skill(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    mut multipart: Multipart,
) -> AppResult<Json<Skill>> {
    let mut name = None;
    let mut archive = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| AppError::BadRequest(e.to_string()))? {
        match field.name() {
            Some("name") => name = Some(field.text().await.map_err(|e| AppError::BadRequest(e.to_string()))?),
            Some("file") => archive = Some(field.bytes().await.map_err(|e| AppError::BadRequest(e.to_string()))?),
            _ => {}
        }
    }
    let archive = archive.ok_or_else(|| AppError::BadRequest("missing file field".to_string()))?;
    let name = name.unwrap_or_else(|| format!("skill-{}", SkillId::new()));

    let dest: PathBuf = state.skill_pending_dir.join(&name);
    if fs::metadata(&dest).await.is_ok() {
        fs::remove_dir_all(&dest).await?;
    }
    fs::create_dir_all(&dest).await?;
    extract_zip(&archive, &dest)?;

    let format = FormatValidator.validate(&dest.to_string_lossy()).await;
    let skill = state
        .lifecycle
        .record_upload(name, &dest, format, admin)
        .await?;
    Ok(Json(skill))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
    #[serde(default)]
    page: u32,
    #[serde(default = "default_page_size")]
    size: u32,
}

fn default_page_size() -> u32 {
    20
}

#[derive(Debug, Serialize)]
struct ListSkillsResponse {
    skills: Vec<Skill>,
    total: u64,
    page: u32,
    size: u32,
}

fn parse_status(raw: &str) -> AppResult<SkillStatus> {
    match raw {
        "pending" => Ok(SkillStatus::Pending),
        "validating" => Ok(SkillStatus::Validating),
        "approved" => Ok(SkillStatus::Approved),
        "rejected" => Ok(SkillStatus::Rejected),
        other => Err(AppError::BadRequest(format!("unknown status filter: {other}"))),
    }
}

async fn list_skills(
    State(state): State<Arc<AppState>>,
    AdminUser(_admin): AdminUser,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<ListSkillsResponse>> {
    let status = query.status.as_deref().map(parse_status).transpose()?;
    let all = state.skills.list(status).await?;
    let total = all.len() as u64;
    let start = (query.page as usize) * (query.size as usize);
    let skills = all.into_iter().skip(start).take(query.size as usize).collect();
    Ok(Json(ListSkillsResponse {
        skills,
        total,
        page: query.page,
        size: query.size,
    }))
}

async fn get_skill(
    State(state): State<Arc<AppState>>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<String>,
) -> AppResult<Json<Skill>> {
    let skill_id = parse_skill_id(&id)?;
    Ok(Json(state.lifecycle.get(skill_id).await?))
}

async fn delete_skill(
    State(state): State<Arc<AppState>>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<String>,
) -> AppResult<()> {
    let skill_id = parse_skill_id(&id)?;
    state.lifecycle.delete(skill_id).await
}

/// Runs the pipeline synchronously and returns its outcome (§6: `validate`
/// blocks; `revalidate` is the identical pipeline fired in the background).
async fn validate_skill(
    State(state): State<Arc<AppState>>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    let skill_id = parse_skill_id(&id)?;
    let outcome = state.orchestrator.validate_skill(skill_id).await?;
    Ok(Json(serde_json::to_value(outcome)?))
}

#[derive(Debug, Serialize)]
struct Scheduled {
    status: &'static str,
}

async fn revalidate_skill(
    State(state): State<Arc<AppState>>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<String>,
) -> AppResult<Json<Scheduled>> {
    let skill_id = parse_skill_id(&id)?;
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        if let Err(err) = orchestrator.validate_skill(skill_id).await {
            tracing::error!(%skill_id, %err, "background revalidation failed");
        }
    });
    Ok(Json(Scheduled { status: "started" }))
}

/// Approving bumps the shared image: a new [`backend_storage::ImageVersion`]
/// row is recorded and marked current, carrying forward whatever
/// dependency set the pipeline installed while validating this skill
/// (§3 Data Model: exactly one `ImageVersion` has `isCurrent=true`).
async fn approve_skill(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> AppResult<Json<Skill>> {
    let skill_id = parse_skill_id(&id)?;
    let skill = state.lifecycle.approve(skill_id, admin).await?;
    let deps = skill
        .installed_dependencies
        .as_ref()
        .map(|deps| serde_json::to_value(deps))
        .transpose()?;
    state.images.record(Some(skill_id), deps).await?;
    Ok(Json(skill))
}

#[derive(Debug, Deserialize)]
struct RejectRequest {
    reason: String,
}

async fn reject_skill(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    Json(body): Json<RejectRequest>,
) -> AppResult<Json<Skill>> {
    let skill_id = parse_skill_id(&id)?;
    Ok(Json(state.lifecycle.reject(skill_id, admin, body.reason).await?))
}

async fn full_test(
    State(state): State<Arc<AppState>>,
    AdminUser(_admin): AdminUser,
) -> AppResult<Json<Scheduled>> {
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        if let Err(err) = orchestrator.run_full_test().await {
            tracing::error!(%err, "full-test sweep failed");
        }
    });
    Ok(Json(Scheduled { status: "started" }))
}

#[derive(Debug, Serialize)]
struct ReportResponse {
    content: String,
    content_type: &'static str,
}

/// Renders the skill's stored validation fields as a markdown report
/// (§6: `GET /admin/skills/{id}/report`).
async fn report(
    State(state): State<Arc<AppState>>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<String>,
) -> AppResult<Json<ReportResponse>> {
    let skill_id = parse_skill_id(&id)?;
    let skill = state.lifecycle.get(skill_id).await?;

    let mut content = format!(
        "# Validation report: {}\n\nStatus: {:?}\nStage: {:?}\n",
        skill.name, skill.status, skill.validation_stage
    );
    if let Some(score) = skill.overall_score {
        content.push_str(&format!("\nOverall score: {score:.1}\n"));
    }
    if let Some(breakdown) = &skill.score_breakdown {
        content.push_str(&format!("\n## Score breakdown\n\n```json\n{breakdown:#}\n```\n"));
    }
    if let Some(report) = &skill.layer1_report {
        content.push_str(&format!("\n## Layer 1\n\n```json\n{report:#}\n```\n"));
    }
    if let Some(report) = &skill.layer2_report {
        content.push_str(&format!("\n## Layer 2\n\n```json\n{report:#}\n```\n"));
    }
    if let Some(results) = &skill.full_test_results {
        content.push_str(&format!("\n## Full test\n\n```json\n{results:#}\n```\n"));
    }
    if !skill.format_errors.is_empty() {
        content.push_str(&format!("\n## Format errors\n\n{}\n", skill.format_errors.join("\n")));
    }

    Ok(Json(ReportResponse {
        content,
        content_type: "text/markdown",
    }))
}
