use std::path::Path;
use std::path::PathBuf;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use backend_common::AppError;
use backend_common::AppResult;
use chrono::DateTime;
use chrono::Utc;
use tokio::fs;

use crate::path_safety::resolve;
use crate::propfind::DavEntry;
use crate::propfind::build_multistatus_xml;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    pub etag: String,
}

/// Backs `/dav/{path}` against `{workspace_root}/{user_id}/{path}` on
/// the local filesystem (§4.9). Grounded on `src/webdav.py`'s
/// `WebDAVHandler`, widened with the ETag/If-Match contract.
pub struct WebDavGateway {
    workspace_root: PathBuf,
}

impl WebDavGateway {
    pub fn new(workspace_root: PathBuf) -> Self {
        Self { workspace_root }
    }

    fn resolve(&self, user_id: &str, path: &str) -> AppResult<PathBuf> {
        resolve(&self.workspace_root, user_id, path)
    }

    /// PROPFIND. Depth 0 returns the resource itself; Depth 1 returns
    /// the resource plus its immediate children (§4.9).
    pub async fn propfind(&self, user_id: &str, path: &str, depth: Depth) -> AppResult<String> {
        let target = self.resolve(user_id, path)?;
        let meta = fs::metadata(&target)
            .await
            .map_err(|_| AppError::NotFound(format!("no such path: {path}")))?;

        let mut entries = vec![dav_entry(path, &target, &meta).await?];
        if depth == Depth::One && meta.is_dir() {
            let mut read_dir = fs::read_dir(&target).await?;
            while let Some(child) = read_dir.next_entry().await? {
                let child_meta = child.metadata().await?;
                let child_name = child.file_name().to_string_lossy().into_owned();
                let child_href = join_href(path, &child_name);
                entries.push(dav_entry(&child_href, &child.path(), &child_meta).await?);
            }
        }
        Ok(build_multistatus_xml(&entries))
    }

    /// GET. Returns the raw bytes and the resource's basename (for the
    /// caller to build `Content-Disposition`). A directory target is a
    /// 404, matching `webdav.py::get`.
    pub async fn get(&self, user_id: &str, path: &str) -> AppResult<(Vec<u8>, String)> {
        let target = self.resolve(user_id, path)?;
        let meta = fs::metadata(&target)
            .await
            .map_err(|_| AppError::NotFound(format!("no such path: {path}")))?;
        if meta.is_dir() {
            return Err(AppError::NotFound(format!("{path} is a directory")));
        }
        let bytes = fs::read(&target).await?;
        let filename = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok((bytes, filename))
    }

    /// PUT. Unconditionally overwrites unless `if_match` is given and
    /// does not equal the resource's current ETag, in which case the
    /// write is rejected with 409 and the file is left untouched (R2).
    pub async fn put(
        &self,
        user_id: &str,
        path: &str,
        body: &[u8],
        if_match: Option<&str>,
    ) -> AppResult<PutOutcome> {
        let target = self.resolve(user_id, path)?;

        if let Some(expected) = if_match {
            let current = fs::metadata(&target).await.ok();
            let current_etag = match current {
                Some(meta) if meta.is_file() => Some(etag_for(&meta)),
                _ => None,
            };
            if current_etag.as_deref() != Some(expected) {
                return Err(AppError::Conflict(format!(
                    "If-Match `{expected}` does not match the current ETag"
                )));
            }
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&target, body).await?;

        let meta = fs::metadata(&target).await?;
        Ok(PutOutcome { etag: etag_for(&meta) })
    }

    /// MKCOL. 405 if the path already exists (file or directory), per
    /// §4.9 "MKCOL on existing path → 405".
    pub async fn mkcol(&self, user_id: &str, path: &str) -> AppResult<()> {
        let target = self.resolve(user_id, path)?;
        if fs::metadata(&target).await.is_ok() {
            return Err(AppError::MethodNotAllowed(format!("{path} already exists")));
        }
        fs::create_dir_all(&target).await?;
        Ok(())
    }

    /// DELETE. Recursive for directories.
    pub async fn delete(&self, user_id: &str, path: &str) -> AppResult<()> {
        let target = self.resolve(user_id, path)?;
        let meta = fs::metadata(&target)
            .await
            .map_err(|_| AppError::NotFound(format!("no such path: {path}")))?;
        if meta.is_dir() {
            fs::remove_dir_all(&target).await?;
        } else {
            fs::remove_file(&target).await?;
        }
        Ok(())
    }

    /// MOVE. Creates missing parents of the destination; 404 if the
    /// source doesn't exist.
    pub async fn mv(&self, user_id: &str, src: &str, dst: &str) -> AppResult<()> {
        let src_path = self.resolve(user_id, src)?;
        let dst_path = self.resolve(user_id, dst)?;
        if fs::metadata(&src_path).await.is_err() {
            return Err(AppError::NotFound(format!("source not found: {src}")));
        }
        if let Some(parent) = dst_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&src_path, &dst_path).await?;
        Ok(())
    }
}

/// `"{mtime_ns}-{size}"`, the local-FS-backed ETag contract from §4.9.
fn etag_for(meta: &std::fs::Metadata) -> String {
    let mtime_ns = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("\"{mtime_ns}-{}\"", meta.len())
}

fn join_href(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), name)
    }
}

async fn dav_entry(href: &str, fs_path: &Path, meta: &std::fs::Metadata) -> AppResult<DavEntry> {
    let name = fs_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mtime: DateTime<Utc> = meta
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    let href = if meta.is_dir() && !href.ends_with('/') {
        format!("{href}/")
    } else {
        href.to_string()
    };
    Ok(DavEntry {
        href,
        name,
        is_dir: meta.is_dir(),
        size: meta.len(),
        mtime,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn gateway() -> (WebDavGateway, tempfile::TempDir) {
        let root = tempdir().unwrap();
        (WebDavGateway::new(root.path().to_path_buf()), root)
    }

    #[tokio::test]
    async fn put_then_get_round_trips_bytes() {
        let (gw, _root) = gateway();
        gw.put("alice", "f.txt", b"A", None).await.unwrap();
        let (bytes, name) = gw.get("alice", "f.txt").await.unwrap();
        assert_eq!(bytes, b"A");
        assert_eq!(name, "f.txt");
    }

    #[tokio::test]
    async fn put_with_wrong_if_match_is_rejected_and_file_unmodified() {
        let (gw, _root) = gateway();
        gw.put("alice", "f.txt", b"A", None).await.unwrap();
        let err = gw.put("alice", "f.txt", b"B", Some("\"wrong\"")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        let (bytes, _) = gw.get("alice", "f.txt").await.unwrap();
        assert_eq!(bytes, b"A");
    }

    #[tokio::test]
    async fn put_with_correct_if_match_succeeds() {
        let (gw, _root) = gateway();
        let first = gw.put("alice", "f.txt", b"A", None).await.unwrap();
        let second = gw.put("alice", "f.txt", b"B", Some(&first.etag)).await.unwrap();
        assert_ne!(first.etag, second.etag);
        let (bytes, _) = gw.get("alice", "f.txt").await.unwrap();
        assert_eq!(bytes, b"B");
    }

    #[tokio::test]
    async fn get_on_directory_is_not_found() {
        let (gw, _root) = gateway();
        gw.mkcol("alice", "docs").await.unwrap();
        let err = gw.get("alice", "docs").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn mkcol_on_existing_path_is_method_not_allowed() {
        let (gw, _root) = gateway();
        gw.mkcol("alice", "docs").await.unwrap();
        let err = gw.mkcol("alice", "docs").await.unwrap_err();
        assert!(matches!(err, AppError::MethodNotAllowed(_)));
    }

    #[tokio::test]
    async fn propfind_on_missing_path_is_not_found() {
        let (gw, _root) = gateway();
        let err = gw.propfind("alice", "nope", Depth::Zero).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn propfind_depth_one_lists_immediate_children() {
        let (gw, _root) = gateway();
        gw.put("alice", "docs/a.txt", b"a", None).await.unwrap();
        gw.put("alice", "docs/b.txt", b"bb", None).await.unwrap();
        let xml = gw.propfind("alice", "docs", Depth::One).await.unwrap();
        assert_eq!(xml.matches("<D:response>").count(), 3);
    }

    #[tokio::test]
    async fn propfind_depth_zero_returns_only_self() {
        let (gw, _root) = gateway();
        gw.put("alice", "docs/a.txt", b"a", None).await.unwrap();
        let xml = gw.propfind("alice", "docs", Depth::Zero).await.unwrap();
        assert_eq!(xml.matches("<D:response>").count(), 1);
    }

    #[tokio::test]
    async fn delete_is_recursive_for_directories() {
        let (gw, _root) = gateway();
        gw.put("alice", "docs/a.txt", b"a", None).await.unwrap();
        gw.delete("alice", "docs").await.unwrap();
        assert!(gw.propfind("alice", "docs", Depth::Zero).await.is_err());
    }

    #[tokio::test]
    async fn move_creates_missing_destination_parents() {
        let (gw, _root) = gateway();
        gw.put("alice", "a.txt", b"a", None).await.unwrap();
        gw.mv("alice", "a.txt", "nested/deep/b.txt").await.unwrap();
        let (bytes, _) = gw.get("alice", "nested/deep/b.txt").await.unwrap();
        assert_eq!(bytes, b"a");
        assert!(gw.get("alice", "a.txt").await.is_err());
    }

    #[tokio::test]
    async fn move_missing_source_is_not_found() {
        let (gw, _root) = gateway();
        let err = gw.mv("alice", "nope.txt", "dst.txt").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
