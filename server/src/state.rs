//! Wiring: every long-lived collaborator the route handlers share,
//! built once at startup and handed around as `Arc<AppState>` (the same
//! shape `codex-core`'s `Config`/`ConversationManager` pair is handed to
//! `codex-mcp-server`'s request handlers).

use std::sync::Arc;

use backend_agent::AgentRunner;
use backend_agent::HttpLlmClient;
use backend_agent::InterruptHandler;
use backend_agent::LlmClient;
use backend_agent::SessionManager;
use backend_agent::StreamMultiplexer;
use backend_checkpoint::CheckpointStore;
use backend_checkpoint::SledCheckpointStore;
use backend_common::AppConfig;
use backend_sandbox::SandboxManager;
use backend_sandbox::local::LocalSandboxFactory;
use backend_storage::ImageVersionRepository;
use backend_storage::SkillRepository;
use backend_storage::SqliteImageVersionRepository;
use backend_storage::SqliteSkillRepository;
use backend_storage::SqliteThreadRepository;
use backend_storage::SqliteUserRepository;
use backend_storage::ThreadRepository;
use backend_storage::UserRepository;
use backend_uploads::ChunkUploadManager;
use backend_validation::SkillDirs;
use backend_validation::SkillLifecycle;
use backend_validation::ValidationOrchestrator;
use backend_webdav::WebDavGateway;
use sqlx::SqlitePool;

pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserRepository>,
    pub threads: Arc<dyn ThreadRepository>,
    pub skills: Arc<dyn SkillRepository>,
    pub images: Arc<dyn ImageVersionRepository>,
    pub sandboxes: Arc<SandboxManager>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub runner: Arc<AgentRunner>,
    pub interrupts: Arc<InterruptHandler>,
    pub stream_mux: Arc<StreamMultiplexer>,
    pub sessions: Arc<SessionManager>,
    pub uploads: Arc<ChunkUploadManager>,
    pub dav: Arc<WebDavGateway>,
    pub lifecycle: Arc<SkillLifecycle>,
    pub orchestrator: Arc<ValidationOrchestrator>,
    pub skill_pending_dir: std::path::PathBuf,
}

impl AppState {
    pub async fn build(config: AppConfig) -> anyhow::Result<Arc<Self>> {
        let config = Arc::new(config);

        let pool = SqlitePool::connect(&config.database_url).await?;
        sqlx::migrate!("../storage/migrations").run(&pool).await?;

        let users: Arc<dyn UserRepository> = Arc::new(SqliteUserRepository::new(pool.clone()));
        let threads: Arc<dyn ThreadRepository> = Arc::new(SqliteThreadRepository::new(pool.clone()));
        let skills: Arc<dyn SkillRepository> = Arc::new(SqliteSkillRepository::new(pool.clone()));
        let images: Arc<dyn ImageVersionRepository> =
            Arc::new(SqliteImageVersionRepository::new(pool.clone()));

        let sandboxes = Arc::new(SandboxManager::new(Arc::new(LocalSandboxFactory)));
        let checkpoints: Arc<dyn CheckpointStore> =
            Arc::new(SledCheckpointStore::open(&config.checkpoint_dir)?);

        let llm: Arc<dyn LlmClient> = Arc::new(HttpLlmClient::new(
            config.llm_base_url.clone(),
            config.llm_api_key.clone(),
            config.llm_big_model.clone(),
            config.llm_flash_model.clone(),
        ));

        let runner = Arc::new(AgentRunner::new(
            llm.clone(),
            checkpoints.clone(),
            sandboxes.clone(),
            config.sandbox_exec_timeout,
        ));
        let interrupts = Arc::new(InterruptHandler::new(runner.clone(), checkpoints.clone()));
        let stream_mux = Arc::new(StreamMultiplexer::new(llm.clone(), threads.clone()));
        let sessions = Arc::new(SessionManager::new(
            threads.clone(),
            checkpoints.clone(),
            sandboxes.clone(),
        ));

        let uploads = Arc::new(ChunkUploadManager::new(config.workspace_root.clone()));
        let dav = Arc::new(WebDavGateway::new(config.workspace_root.clone()));

        let skill_pending_dir = config.workspace_root.join(".skills").join("pending");
        let skill_dirs = SkillDirs {
            pending_dir: skill_pending_dir.clone(),
            approved_dir: config.shared_dir.clone(),
        };
        let lifecycle = Arc::new(SkillLifecycle::new(skills.clone(), skill_dirs));
        let orchestrator = Arc::new(ValidationOrchestrator::new(
            lifecycle.clone(),
            checkpoints.clone(),
            sandboxes.clone(),
            llm,
        ));

        Ok(Arc::new(Self {
            config,
            users,
            threads,
            skills,
            images,
            sandboxes,
            checkpoints,
            runner,
            interrupts,
            stream_mux,
            sessions,
            uploads,
            dav,
            lifecycle,
            orchestrator,
            skill_pending_dir,
        }))
    }

    /// Builds an `AppState` wired entirely to in-memory/tempdir
    /// collaborators and a scripted [`LlmClient`], for integration tests
    /// that exercise the router without a database or a real model
    /// endpoint. Mirrors `build` field-for-field, swapping every
    /// `Sqlite*Repository` for its `InMemory*Repository` twin.
    #[cfg(test)]
    pub async fn build_for_test(
        llm: Arc<dyn LlmClient>,
        workspace_root: std::path::PathBuf,
        shared_dir: std::path::PathBuf,
        simple_upload_max_bytes: u64,
    ) -> Arc<Self> {
        use backend_storage::InMemoryImageVersionRepository;
        use backend_storage::InMemorySkillRepository;
        use backend_storage::InMemoryThreadRepository;
        use backend_storage::InMemoryUserRepository;

        let mut config = AppConfig::from_env();
        config.workspace_root = workspace_root.clone();
        config.shared_dir = shared_dir.clone();
        config.jwt_secret = "test-secret".to_string();
        config.simple_upload_max_bytes = simple_upload_max_bytes;
        let config = Arc::new(config);

        let users: Arc<dyn UserRepository> = Arc::new(InMemoryUserRepository::new());
        let threads: Arc<dyn ThreadRepository> = Arc::new(InMemoryThreadRepository::new());
        let skills: Arc<dyn SkillRepository> = Arc::new(InMemorySkillRepository::new());
        let images: Arc<dyn ImageVersionRepository> = Arc::new(InMemoryImageVersionRepository::new());

        let sandboxes = Arc::new(SandboxManager::new(Arc::new(LocalSandboxFactory)));
        let checkpoints: Arc<dyn CheckpointStore> =
            Arc::new(backend_checkpoint::MemoryCheckpointStore::new());

        let runner = Arc::new(AgentRunner::new(
            llm.clone(),
            checkpoints.clone(),
            sandboxes.clone(),
            config.sandbox_exec_timeout,
        ));
        let interrupts = Arc::new(InterruptHandler::new(runner.clone(), checkpoints.clone()));
        let stream_mux = Arc::new(StreamMultiplexer::new(llm.clone(), threads.clone()));
        let sessions = Arc::new(SessionManager::new(
            threads.clone(),
            checkpoints.clone(),
            sandboxes.clone(),
        ));

        let uploads = Arc::new(ChunkUploadManager::new(config.workspace_root.clone()));
        let dav = Arc::new(WebDavGateway::new(config.workspace_root.clone()));

        let skill_pending_dir = config.workspace_root.join(".skills").join("pending");
        let skill_dirs = SkillDirs {
            pending_dir: skill_pending_dir.clone(),
            approved_dir: config.shared_dir.clone(),
        };
        let lifecycle = Arc::new(SkillLifecycle::new(skills.clone(), skill_dirs));
        let orchestrator = Arc::new(ValidationOrchestrator::new(
            lifecycle.clone(),
            checkpoints.clone(),
            sandboxes.clone(),
            llm,
        ));

        Arc::new(Self {
            config,
            users,
            threads,
            skills,
            images,
            sandboxes,
            checkpoints,
            runner,
            interrupts,
            stream_mux,
            sessions,
            uploads,
            dav,
            lifecycle,
            orchestrator,
            skill_pending_dir,
        })
    }
}
