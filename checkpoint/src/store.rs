use async_trait::async_trait;
use backend_common::AppResult;
use dashmap::DashMap;

use crate::state::CheckpointState;

/// Durable storage for thread checkpoints. `put` overwrites wholesale;
/// the agent runner is responsible for reading, mutating and writing
/// back a full [`CheckpointState`] rather than the store supporting
/// partial updates.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get(&self, thread_id: &str) -> AppResult<Option<CheckpointState>>;
    async fn put(&self, thread_id: &str, state: CheckpointState) -> AppResult<()>;
    async fn delete(&self, thread_id: &str) -> AppResult<()>;
    async fn exists(&self, thread_id: &str) -> AppResult<bool>;
}

/// In-memory store. Used in tests and as the default when no durable
/// backend is configured; state does not survive a process restart.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    states: DashMap<String, CheckpointState>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get(&self, thread_id: &str) -> AppResult<Option<CheckpointState>> {
        Ok(self.states.get(thread_id).map(|v| v.clone()))
    }

    async fn put(&self, thread_id: &str, state: CheckpointState) -> AppResult<()> {
        self.states.insert(thread_id.to_string(), state);
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> AppResult<()> {
        self.states.remove(thread_id);
        Ok(())
    }

    async fn exists(&self, thread_id: &str) -> AppResult<bool> {
        Ok(self.states.contains_key(thread_id))
    }
}
