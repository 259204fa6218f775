use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

/// Process-wide configuration, resolved once at startup from environment
/// variables (with sane local defaults) and then passed down by
/// reference to every crate that needs it.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Root directory under which each user gets a `{workspace_root}/{user_id}`
    /// working tree (agent files, WebDAV root, upload staging area).
    pub workspace_root: PathBuf,
    /// Directory approved skills are copied into once they pass validation.
    pub shared_dir: PathBuf,
    /// Container image used to materialize a sandbox.
    pub sandbox_image: String,
    pub container_workspace_dir: PathBuf,
    pub container_shared_dir: PathBuf,
    pub database_url: String,
    pub jwt_secret: String,
    pub access_token_expire_hours: u64,
    pub sandbox_exec_timeout: Duration,
    pub validation_concurrency: usize,
    pub chunk_size_bytes: u64,
    pub upload_expire: Duration,
    /// Base URL of the OpenAI-chat-completions-compatible endpoint the
    /// "big"/"flash" model kinds are dispatched against.
    pub llm_base_url: String,
    pub llm_api_key: String,
    pub llm_big_model: String,
    pub llm_flash_model: String,
    pub bind_addr: String,
    pub checkpoint_dir: PathBuf,
    pub simple_upload_max_bytes: u64,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_path_or(key: &str, default: &str) -> PathBuf {
    resolve_path(&env_or(key, default))
}

/// Mirrors the original service's path resolution: relative paths are
/// anchored at the current working directory, `~` is expanded.
fn resolve_path(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return Path::new(&home).join(rest);
        }
    }
    PathBuf::from(raw)
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            workspace_root: env_path_or("WORKSPACE_ROOT", "./data/workspaces"),
            shared_dir: env_path_or("SHARED_DIR", "./data/shared"),
            sandbox_image: env_or("SANDBOX_IMAGE", "backend-sandbox:latest"),
            container_workspace_dir: resolve_path(&env_or(
                "CONTAINER_WORKSPACE_DIR",
                "/workspace",
            )),
            container_shared_dir: resolve_path(&env_or("CONTAINER_SHARED_DIR", "/shared")),
            database_url: env_or("DATABASE_URL", "sqlite://./data/backend.db"),
            jwt_secret: env_or("JWT_SECRET", "dev-secret-change-me"),
            access_token_expire_hours: env_or("ACCESS_TOKEN_EXPIRE_HOURS", "24")
                .parse()
                .unwrap_or(24),
            sandbox_exec_timeout: Duration::from_secs(
                env_or("SANDBOX_EXEC_TIMEOUT_SECS", "300")
                    .parse()
                    .unwrap_or(300),
            ),
            validation_concurrency: env_or("VALIDATION_CONCURRENCY", "5")
                .parse()
                .unwrap_or(5),
            chunk_size_bytes: 10 * 1024 * 1024,
            upload_expire: Duration::from_secs(24 * 3600),
            llm_base_url: env_or("LLM_BASE_URL", "https://api.openai.com"),
            llm_api_key: env_or("LLM_API_KEY", ""),
            llm_big_model: env_or("LLM_BIG_MODEL", "gpt-4.1"),
            llm_flash_model: env_or("LLM_FLASH_MODEL", "gpt-4.1-mini"),
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:8000"),
            checkpoint_dir: env_path_or("CHECKPOINT_DIR", "./data/checkpoints"),
            simple_upload_max_bytes: 50 * 1024 * 1024,
        }
    }

    pub fn user_workspace(&self, user_id: &str) -> PathBuf {
        self.workspace_root.join(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_path_expands_home() {
        // SAFETY in tests only: scoped to this process, not shared state
        // a production server depends on.
        unsafe {
            std::env::set_var("HOME", "/home/tester");
        }
        assert_eq!(resolve_path("~/x"), PathBuf::from("/home/tester/x"));
        assert_eq!(resolve_path("/abs/x"), PathBuf::from("/abs/x"));
    }

    #[test]
    fn defaults_are_sane() {
        let cfg = AppConfig::from_env();
        assert_eq!(cfg.chunk_size_bytes, 10 * 1024 * 1024);
        assert_eq!(cfg.upload_expire, Duration::from_secs(24 * 3600));
    }
}
