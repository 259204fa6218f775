use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use backend_common::AppError;
use backend_common::AppResult;
use chrono::Duration as ChronoDuration;
use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tokio::fs;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::CHUNK_SIZE_BYTES;
use crate::UPLOAD_EXPIRE_HOURS;
use crate::meta::UploadMeta;

#[derive(Debug, Clone, Serialize)]
pub struct UploadProgress {
    pub total_chunks: u32,
    pub received: Vec<u32>,
    pub total_size: u64,
    pub filename: String,
}

/// Resumable chunked-upload scratch area, rooted at
/// `{workspace_root}/.uploads/{uploadId}/`. Grounded 1:1 on
/// `ChunkUploadManager` in `original_source/src/chunk_upload.py`.
pub struct ChunkUploadManager {
    upload_dir: PathBuf,
    workspace_root: PathBuf,
    /// Per-session lock guarding read-modify-write of `meta.json`, the
    /// on-disk analogue of the original's implicit single-process
    /// in-order execution (§5: "callers must treat two concurrent `put`
    /// ... as undefined" applies equally to this scratch metadata).
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ChunkUploadManager {
    pub fn new(workspace_root: PathBuf) -> Self {
        Self {
            upload_dir: workspace_root.join(".uploads"),
            workspace_root,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, upload_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(upload_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn session_dir(&self, upload_id: &str) -> PathBuf {
        self.upload_dir.join(upload_id)
    }

    fn meta_path(&self, upload_id: &str) -> PathBuf {
        self.session_dir(upload_id).join("meta.json")
    }

    /// Initializes a chunked upload session and returns its id.
    pub async fn init(
        &self,
        user_id: &str,
        filename: &str,
        total_chunks: u32,
        total_size: u64,
        target_path: Option<&str>,
    ) -> AppResult<String> {
        let upload_id = Uuid::new_v4().to_string();
        let session_dir = self.session_dir(&upload_id);
        fs::create_dir_all(&session_dir).await?;

        let meta = UploadMeta {
            user_id: user_id.to_string(),
            filename: filename.to_string(),
            total_chunks,
            total_size,
            target_path: target_path.unwrap_or(filename).to_string(),
            received: Default::default(),
            created_at: Utc::now(),
        };
        self.save_meta(&upload_id, &meta).await?;
        Ok(upload_id)
    }

    /// Writes one chunk to scratch. Idempotent: saving the same index
    /// twice (even with different bytes) leaves the `received` set
    /// unchanged and simply overwrites the chunk file with the latest
    /// call's data (R3).
    pub async fn save_chunk(&self, upload_id: &str, chunk_index: i64, data: &[u8]) -> AppResult<()> {
        if data.len() as u64 > CHUNK_SIZE_BYTES {
            return Err(AppError::PayloadTooLarge(format!(
                "chunk exceeds {CHUNK_SIZE_BYTES} bytes"
            )));
        }
        let lock = self.lock_for(upload_id);
        let _guard = lock.lock().await;

        let mut meta = self.load_meta(upload_id).await?;
        if chunk_index < 0 || chunk_index as u32 >= meta.total_chunks {
            return Err(AppError::BadRequest(format!(
                "invalid chunk index: {chunk_index}"
            )));
        }
        let chunk_index = chunk_index as u32;

        let chunk_path = self.session_dir(upload_id).join(format!("chunk_{chunk_index}"));
        fs::write(&chunk_path, data).await?;

        if meta.received.insert(chunk_index) {
            self.save_meta(upload_id, &meta).await?;
        }
        Ok(())
    }

    pub async fn progress(&self, upload_id: &str) -> AppResult<UploadProgress> {
        let meta = self.load_meta(upload_id).await?;
        Ok(UploadProgress {
            total_chunks: meta.total_chunks,
            received: meta.received.into_iter().collect(),
            total_size: meta.total_size,
            filename: meta.filename,
        })
    }

    /// Concatenates all chunks in index order into
    /// `{workspace_root}/{userId}/{targetPath}` and deletes the scratch
    /// session (P3). `target_path` is resolved against the user's root
    /// and rejected if it would escape it (§4.8 "Path safety").
    pub async fn complete(
        &self,
        upload_id: &str,
        user_id: &str,
        target_path: &str,
    ) -> AppResult<PathBuf> {
        let lock = self.lock_for(upload_id);
        let _guard = lock.lock().await;

        let meta = self.load_meta(upload_id).await?;
        if meta.user_id != user_id {
            return Err(AppError::Forbidden("upload session user mismatch".to_string()));
        }
        if !meta.is_complete() {
            return Err(AppError::BadRequest(format!(
                "not all chunks received, missing: {:?}",
                meta.missing_chunks()
            )));
        }

        let target = resolve_user_path(&self.workspace_root, user_id, target_path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut out = Vec::with_capacity(meta.total_size as usize);
        for i in 0..meta.total_chunks {
            let chunk_path = self.session_dir(upload_id).join(format!("chunk_{i}"));
            let bytes = fs::read(&chunk_path).await?;
            out.extend_from_slice(&bytes);
        }
        fs::write(&target, &out).await?;

        drop(_guard);
        self.cancel(upload_id).await?;
        Ok(target)
    }

    /// Idempotent scratch delete.
    pub async fn cancel(&self, upload_id: &str) -> AppResult<()> {
        let dir = self.session_dir(upload_id);
        if fs::metadata(&dir).await.is_ok() {
            fs::remove_dir_all(&dir).await?;
        }
        self.locks.remove(upload_id);
        Ok(())
    }

    /// Removes any session whose `created_at` is older than
    /// [`UPLOAD_EXPIRE_HOURS`]. Run once at startup.
    pub async fn cleanup_stale(&self) -> AppResult<usize> {
        fs::create_dir_all(&self.upload_dir).await?;
        let threshold = Utc::now() - ChronoDuration::hours(UPLOAD_EXPIRE_HOURS);
        let mut count = 0;
        let mut entries = fs::read_dir(&self.upload_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let stale = match self.load_meta(&name).await {
                Ok(meta) => meta.created_at < threshold,
                Err(_) => true,
            };
            if stale {
                self.cancel(&name).await?;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn load_meta(&self, upload_id: &str) -> AppResult<UploadMeta> {
        let path = self.meta_path(upload_id);
        let raw = fs::read_to_string(&path)
            .await
            .map_err(|_| AppError::NotFound(format!("upload session not found: {upload_id}")))?;
        serde_json::from_str(&raw).map_err(|e| AppError::Internal(e.into()))
    }

    async fn save_meta(&self, upload_id: &str, meta: &UploadMeta) -> AppResult<()> {
        let raw = serde_json::to_string(meta)?;
        fs::write(self.meta_path(upload_id), raw).await?;
        Ok(())
    }
}

/// Resolves `target_path` against `{workspace_root}/{user_id}`, rejecting
/// any path that would escape that root once `..`/symlink-free
/// normalization is applied.
fn resolve_user_path(workspace_root: &Path, user_id: &str, target_path: &str) -> AppResult<PathBuf> {
    let base = normalize(&workspace_root.join(user_id));
    let trimmed = target_path.trim_start_matches('/');
    let target = normalize(&base.join(trimmed));
    if !target.starts_with(&base) {
        return Err(AppError::BadRequest("invalid target path".to_string()));
    }
    Ok(target)
}

/// Lexical normalization (no filesystem access, no symlink resolution):
/// the destination file need not exist yet when `complete` computes it,
/// so `Path::canonicalize` is unusable here.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manager() -> (ChunkUploadManager, tempfile::TempDir) {
        let root = tempdir().unwrap();
        (ChunkUploadManager::new(root.path().to_path_buf()), root)
    }

    #[tokio::test]
    async fn init_then_progress_reports_zero_received() {
        let (mgr, _root) = manager();
        let id = mgr.init("alice", "f.bin", 3, 30, None).await.unwrap();
        let progress = mgr.progress(&id).await.unwrap();
        assert_eq!(progress.total_chunks, 3);
        assert!(progress.received.is_empty());
    }

    #[tokio::test]
    async fn save_chunk_rejects_out_of_range_index() {
        let (mgr, _root) = manager();
        let id = mgr.init("alice", "f.bin", 3, 30, None).await.unwrap();
        let err = mgr.save_chunk(&id, -1, b"x").await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        let err = mgr.save_chunk(&id, 3, b"x").await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn save_chunk_is_idempotent_on_received_set() {
        let (mgr, _root) = manager();
        let id = mgr.init("alice", "f.bin", 3, 30, None).await.unwrap();
        mgr.save_chunk(&id, 0, &[0u8; 10]).await.unwrap();
        mgr.save_chunk(&id, 0, &[0u8; 10]).await.unwrap();
        let progress = mgr.progress(&id).await.unwrap();
        assert_eq!(progress.received, vec![0]);
    }

    #[tokio::test]
    async fn complete_reorders_out_of_order_chunks_by_index() {
        let (mgr, root) = manager();
        let id = mgr.init("alice", "f.bin", 3, 30, Some("nested/f.bin")).await.unwrap();
        mgr.save_chunk(&id, 2, &[2u8; 10]).await.unwrap();
        mgr.save_chunk(&id, 0, &[0u8; 10]).await.unwrap();
        mgr.save_chunk(&id, 1, &[1u8; 10]).await.unwrap();

        let path = mgr.complete(&id, "alice", "nested/f.bin").await.unwrap();
        let bytes = fs::read(&path).await.unwrap();
        let mut expected = vec![0u8; 10];
        expected.extend(vec![1u8; 10]);
        expected.extend(vec![2u8; 10]);
        assert_eq!(bytes, expected);
        assert_eq!(path, root.path().join("alice").join("nested/f.bin"));

        // Scratch is gone afterward (P3).
        assert!(fs::metadata(mgr.session_dir(&id)).await.is_err());
    }

    #[tokio::test]
    async fn complete_rejects_missing_chunks() {
        let (mgr, _root) = manager();
        let id = mgr.init("alice", "f.bin", 2, 20, None).await.unwrap();
        mgr.save_chunk(&id, 0, &[0u8; 10]).await.unwrap();
        let err = mgr.complete(&id, "alice", "f.bin").await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn complete_rejects_path_traversal() {
        let (mgr, _root) = manager();
        let id = mgr.init("alice", "f.bin", 1, 5, None).await.unwrap();
        mgr.save_chunk(&id, 0, b"hello").await.unwrap();
        let err = mgr.complete(&id, "alice", "../../etc/passwd").await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn complete_rejects_user_mismatch() {
        let (mgr, _root) = manager();
        let id = mgr.init("alice", "f.bin", 1, 5, None).await.unwrap();
        mgr.save_chunk(&id, 0, b"hello").await.unwrap();
        let err = mgr.complete(&id, "bob", "f.bin").await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let (mgr, _root) = manager();
        let id = mgr.init("alice", "f.bin", 1, 5, None).await.unwrap();
        mgr.cancel(&id).await.unwrap();
        mgr.cancel(&id).await.unwrap();
    }

    #[tokio::test]
    async fn cleanup_stale_removes_old_sessions_only() {
        let (mgr, root) = manager();
        let id = mgr.init("alice", "f.bin", 1, 5, None).await.unwrap();

        // Backdate the session's meta.json past the expiry threshold.
        let meta_path = root.path().join(".uploads").join(&id).join("meta.json");
        let mut meta: UploadMeta = serde_json::from_str(&fs::read_to_string(&meta_path).await.unwrap()).unwrap();
        meta.created_at = Utc::now() - ChronoDuration::hours(UPLOAD_EXPIRE_HOURS + 1);
        fs::write(&meta_path, serde_json::to_string(&meta).unwrap()).await.unwrap();

        let fresh_id = mgr.init("alice", "g.bin", 1, 5, None).await.unwrap();

        let removed = mgr.cleanup_stale().await.unwrap();
        assert_eq!(removed, 1);
        assert!(mgr.progress(&id).await.is_err());
        assert!(mgr.progress(&fresh_id).await.is_ok());
    }
}
