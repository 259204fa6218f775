use std::str::FromStr;
use std::sync::Mutex;

use async_trait::async_trait;
use backend_common::AppError;
use backend_common::AppResult;
use backend_protocol::SkillId;
use chrono::DateTime;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::models::ImageVersion;

/// Persistence for `ImageVersion` rows (§3): monotonic version tags of the
/// shared skills image, exactly one of which has `isCurrent=true`.
#[async_trait]
pub trait ImageVersionRepository: Send + Sync {
    /// Records a new version for `skill_id` and marks it current,
    /// demoting whatever was previously current.
    async fn record(&self, skill_id: Option<SkillId>, dependencies_snapshot: Option<serde_json::Value>) -> AppResult<ImageVersion>;
    async fn current(&self) -> AppResult<Option<ImageVersion>>;
    async fn history(&self, limit: u32) -> AppResult<Vec<ImageVersion>>;
}

#[derive(Debug, sqlx::FromRow)]
struct ImageVersionRow {
    version: i64,
    skill_id: Option<String>,
    created_at: DateTime<Utc>,
    is_current: bool,
    dependencies_snapshot: Option<String>,
}

impl TryFrom<ImageVersionRow> for ImageVersion {
    type Error = AppError;

    fn try_from(row: ImageVersionRow) -> Result<Self, Self::Error> {
        Ok(ImageVersion {
            version: row.version,
            skill_id: row
                .skill_id
                .map(|s| uuid::Uuid::from_str(&s).map(SkillId))
                .transpose()
                .map_err(|e| AppError::Internal(e.into()))?,
            created_at: row.created_at,
            is_current: row.is_current,
            dependencies_snapshot: row
                .dependencies_snapshot
                .map(|s| serde_json::from_str(&s))
                .transpose()?,
        })
    }
}

pub struct SqliteImageVersionRepository {
    pool: SqlitePool,
}

impl SqliteImageVersionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ImageVersionRepository for SqliteImageVersionRepository {
    async fn record(
        &self,
        skill_id: Option<SkillId>,
        dependencies_snapshot: Option<serde_json::Value>,
    ) -> AppResult<ImageVersion> {
        let mut tx = self.pool.begin().await.map_err(|e| AppError::Internal(e.into()))?;
        sqlx::query("UPDATE image_versions SET is_current = 0 WHERE is_current = 1")
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::Internal(e.into()))?;

        let next_version: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) + 1 FROM image_versions")
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| AppError::Internal(e.into()))?;
        let now = Utc::now();
        let snapshot_json = dependencies_snapshot.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            "INSERT INTO image_versions (version, skill_id, created_at, is_current, dependencies_snapshot) \
             VALUES (?, ?, ?, 1, ?)",
        )
        .bind(next_version)
        .bind(skill_id.map(|s| s.to_string()))
        .bind(now)
        .bind(&snapshot_json)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::Internal(e.into()))?;

        tx.commit().await.map_err(|e| AppError::Internal(e.into()))?;
        Ok(ImageVersion {
            version: next_version,
            skill_id,
            created_at: now,
            is_current: true,
            dependencies_snapshot,
        })
    }

    async fn current(&self) -> AppResult<Option<ImageVersion>> {
        let row: Option<ImageVersionRow> =
            sqlx::query_as("SELECT * FROM image_versions WHERE is_current = 1")
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| AppError::Internal(e.into()))?;
        row.map(ImageVersion::try_from).transpose()
    }

    async fn history(&self, limit: u32) -> AppResult<Vec<ImageVersion>> {
        let rows: Vec<ImageVersionRow> =
            sqlx::query_as("SELECT * FROM image_versions ORDER BY version DESC LIMIT ?")
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await
                .map_err(|e| AppError::Internal(e.into()))?;
        rows.into_iter().map(ImageVersion::try_from).collect()
    }
}

#[derive(Default)]
pub struct InMemoryImageVersionRepository {
    rows: Mutex<Vec<ImageVersion>>,
}

impl InMemoryImageVersionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ImageVersionRepository for InMemoryImageVersionRepository {
    async fn record(
        &self,
        skill_id: Option<SkillId>,
        dependencies_snapshot: Option<serde_json::Value>,
    ) -> AppResult<ImageVersion> {
        let mut guard = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        for row in guard.iter_mut() {
            row.is_current = false;
        }
        let version = ImageVersion {
            version: guard.len() as i64 + 1,
            skill_id,
            created_at: Utc::now(),
            is_current: true,
            dependencies_snapshot,
        };
        guard.push(version.clone());
        Ok(version)
    }

    async fn current(&self) -> AppResult<Option<ImageVersion>> {
        Ok(self
            .rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|v| v.is_current)
            .cloned())
    }

    async fn history(&self, limit: u32) -> AppResult<Vec<ImageVersion>> {
        let guard = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        let mut rows: Vec<ImageVersion> = guard.clone();
        rows.sort_by(|a, b| b.version.cmp(&a.version));
        rows.truncate(limit as usize);
        Ok(rows)
    }
}
