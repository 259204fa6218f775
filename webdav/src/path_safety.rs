use std::path::Path;
use std::path::PathBuf;

use backend_common::AppError;
use backend_common::AppResult;

/// Resolves `path` (a WebDAV-request-relative path) against
/// `{workspace_root}/{user_id}`, rejecting anything that would escape
/// that root. Purely lexical (`..`/`.` components are collapsed without
/// touching the filesystem) since the target need not exist yet for
/// `PUT`/`MKCOL` (§4.9 "Path safety: every path is resolved against the
/// user base; a resolved path outside that base yields 403").
pub fn resolve(workspace_root: &Path, user_id: &str, path: &str) -> AppResult<PathBuf> {
    let base = normalize(&workspace_root.join(user_id));
    let trimmed = path.trim_start_matches('/');
    let resolved = normalize(&base.join(trimmed));
    if resolved != base && !resolved.starts_with(&base) {
        return Err(AppError::Forbidden(format!("path `{path}` escapes the user root")));
    }
    Ok(resolved)
}

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

    #[test]
    fn resolves_simple_path_under_user_root() {
        let root = PathBuf::from("/workspaces");
        let resolved = resolve(&root, "alice", "docs/f.txt").unwrap();
        assert_eq!(resolved, PathBuf::from("/workspaces/alice/docs/f.txt"));
    }

    #[test]
    fn rejects_parent_traversal_escaping_the_root() {
        let root = PathBuf::from("/workspaces");
        let err = resolve(&root, "alice", "../bob/f.txt").unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn rejects_absolute_style_traversal() {
        let root = PathBuf::from("/workspaces");
        let err = resolve(&root, "alice", "../../../etc/passwd").unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn empty_path_resolves_to_the_user_root_itself() {
        let root = PathBuf::from("/workspaces");
        let resolved = resolve(&root, "alice", "").unwrap();
        assert_eq!(resolved, PathBuf::from("/workspaces/alice"));
    }
}
