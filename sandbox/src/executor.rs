use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backend_common::AppError;
use backend_common::AppResult;

#[derive(Debug, Clone)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// `true` if the command was killed because it ran past its
    /// deadline. `exit_code` is meaningless in that case.
    pub timed_out: bool,
}

impl ExecResult {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    Running,
    Destroyed,
}

/// A single remote execution environment: one thread's agent workspace,
/// one user's files workspace, or one skill's validation/offline
/// workspace. The concrete implementation (Daytona, Docker, a bare
/// subprocess) is swapped out behind this trait; the rest of the crate
/// only depends on it.
#[async_trait]
pub trait SandboxExecutor: Send + Sync {
    fn id(&self) -> &str;

    async fn state(&self) -> SandboxState;

    async fn exec(&self, command: &str, timeout: Duration) -> AppResult<ExecResult>;

    async fn upload_file(&self, path: &str, data: &[u8]) -> AppResult<()>;

    async fn download_file(&self, path: &str) -> AppResult<Vec<u8>>;

    /// No-op on sandboxes created with the network blocked at
    /// construction time (see [`crate::owner_key::OwnerKey::requires_network_block_at_construction`]).
    async fn connect_network(&self) -> AppResult<()>;

    async fn disconnect_network(&self) -> AppResult<()>;

    async fn destroy(&self) -> AppResult<()>;
}

/// Creates sandboxes for a given owner kind. Implementations talk to
/// whatever backend provisions real execution environments; tests use
/// [`crate::local::LocalProcessSandbox`] via [`LocalSandboxFactory`].
#[async_trait]
pub trait SandboxFactory: Send + Sync {
    async fn create(&self, network_block_all: bool) -> AppResult<Arc<dyn SandboxExecutor>>;
}

pub(crate) fn timeout_result() -> ExecResult {
    ExecResult {
        stdout: String::new(),
        stderr: String::new(),
        exit_code: -1,
        timed_out: true,
    }
}

pub(crate) fn already_destroyed() -> AppError {
    AppError::Conflict("sandbox already destroyed".to_string())
}
