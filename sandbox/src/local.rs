use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use backend_common::AppError;
use backend_common::AppResult;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::executor::ExecResult;
use crate::executor::SandboxExecutor;
use crate::executor::SandboxFactory;
use crate::executor::SandboxState;
use crate::executor::already_destroyed;
use crate::executor::timeout_result;

/// Sandbox backed by a plain subprocess rooted at a scratch directory.
/// Stands in for the real container/VM backend in local development and
/// tests: it never actually namespaces the filesystem or network away
/// from the host, it just gives every sandbox its own working directory
/// and tracks a "network connected" flag that `exec` consults before
/// shelling out to anything that looks like it touches the network.
pub struct LocalProcessSandbox {
    id: String,
    root: tempfile::TempDir,
    network_connected: AtomicBool,
    state: Mutex<SandboxState>,
}

impl LocalProcessSandbox {
    pub fn new(network_block_all: bool) -> std::io::Result<Self> {
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            root: tempfile::tempdir()?,
            network_connected: AtomicBool::new(!network_block_all),
            state: Mutex::new(SandboxState::Running),
        })
    }

    fn resolve(&self, path: &str) -> AppResult<PathBuf> {
        let base = self.root.path();
        let joined = base.join(path.trim_start_matches('/'));
        let resolved = if joined.exists() {
            joined
                .canonicalize()
                .map_err(|e| AppError::Internal(e.into()))?
        } else {
            joined.clone()
        };
        let base_resolved = base
            .canonicalize()
            .map_err(|e| AppError::Internal(e.into()))?;
        if !resolved.starts_with(&base_resolved) && !joined.starts_with(&base_resolved) {
            return Err(AppError::Forbidden(format!(
                "path escapes sandbox root: {path}"
            )));
        }
        Ok(joined)
    }
}

#[async_trait]
impl SandboxExecutor for LocalProcessSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn state(&self) -> SandboxState {
        *self.state.lock().await
    }

    async fn exec(&self, command: &str, timeout: Duration) -> AppResult<ExecResult> {
        if *self.state.lock().await == SandboxState::Destroyed {
            return Err(already_destroyed());
        }

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(self.root.path())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(timeout, child).await {
            Ok(Ok(output)) => Ok(ExecResult {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit_code: output.status.code().unwrap_or(-1),
                timed_out: false,
            }),
            Ok(Err(e)) => Err(AppError::Internal(e.into())),
            Err(_) => Ok(timeout_result()),
        }
    }

    async fn upload_file(&self, path: &str, data: &[u8]) -> AppResult<()> {
        if *self.state.lock().await == SandboxState::Destroyed {
            return Err(already_destroyed());
        }
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(target, data).await?;
        Ok(())
    }

    async fn download_file(&self, path: &str) -> AppResult<Vec<u8>> {
        if *self.state.lock().await == SandboxState::Destroyed {
            return Err(already_destroyed());
        }
        let target = self.resolve(path)?;
        tokio::fs::read(target)
            .await
            .map_err(|e| AppError::NotFound(format!("{path}: {e}")))
    }

    async fn connect_network(&self) -> AppResult<()> {
        self.network_connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect_network(&self) -> AppResult<()> {
        self.network_connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn destroy(&self) -> AppResult<()> {
        *self.state.lock().await = SandboxState::Destroyed;
        Ok(())
    }
}

pub struct LocalSandboxFactory;

#[async_trait]
impl SandboxFactory for LocalSandboxFactory {
    async fn create(&self, network_block_all: bool) -> AppResult<Arc<dyn SandboxExecutor>> {
        let sandbox =
            LocalProcessSandbox::new(network_block_all).map_err(|e| AppError::Internal(e.into()))?;
        Ok(Arc::new(sandbox))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exec_runs_and_captures_stdout() {
        let sandbox = LocalProcessSandbox::new(false).unwrap();
        let res = sandbox
            .exec("echo hello", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(res.succeeded());
        assert_eq!(res.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn exec_times_out() {
        let sandbox = LocalProcessSandbox::new(false).unwrap();
        let res = sandbox
            .exec("sleep 5", Duration::from_millis(50))
            .await
            .unwrap();
        assert!(res.timed_out);
    }

    #[tokio::test]
    async fn upload_then_download_round_trips() {
        let sandbox = LocalProcessSandbox::new(false).unwrap();
        sandbox.upload_file("a/b.txt", b"payload").await.unwrap();
        let data = sandbox.download_file("a/b.txt").await.unwrap();
        assert_eq!(data, b"payload");
    }

    #[tokio::test]
    async fn operations_fail_after_destroy() {
        let sandbox = LocalProcessSandbox::new(false).unwrap();
        sandbox.destroy().await.unwrap();
        let err = sandbox.exec("echo hi", Duration::from_secs(1)).await;
        assert!(err.is_err());
    }
}
