use std::path::Path;

use async_trait::async_trait;
use backend_common::AppError;
use backend_common::AppResult;

use crate::state::CheckpointState;
use crate::store::CheckpointStore;

/// Durable, crash-safe store backed by an embedded `sled` database.
/// Every call does a blocking sled operation, so it's dispatched onto
/// `spawn_blocking` rather than run directly on the async executor.
pub struct SledCheckpointStore {
    db: sled::Db,
}

impl SledCheckpointStore {
    pub fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        let db = sled::open(path).map_err(|e| AppError::Internal(e.into()))?;
        Ok(Self { db })
    }
}

#[async_trait]
impl CheckpointStore for SledCheckpointStore {
    async fn get(&self, thread_id: &str) -> AppResult<Option<CheckpointState>> {
        let db = self.db.clone();
        let key = thread_id.to_string();
        tokio::task::spawn_blocking(move || -> AppResult<Option<CheckpointState>> {
            match db.get(key.as_bytes()).map_err(|e| AppError::Internal(e.into()))? {
                Some(bytes) => {
                    let state: CheckpointState = serde_json::from_slice(&bytes)?;
                    Ok(Some(state))
                }
                None => Ok(None),
            }
        })
        .await
        .map_err(|e| AppError::Internal(e.into()))?
    }

    async fn put(&self, thread_id: &str, state: CheckpointState) -> AppResult<()> {
        let db = self.db.clone();
        let key = thread_id.to_string();
        let bytes = serde_json::to_vec(&state)?;
        tokio::task::spawn_blocking(move || -> AppResult<()> {
            db.insert(key.as_bytes(), bytes)
                .map_err(|e| AppError::Internal(e.into()))?;
            db.flush().map_err(|e| AppError::Internal(e.into()))?;
            Ok(())
        })
        .await
        .map_err(|e| AppError::Internal(e.into()))?
    }

    async fn delete(&self, thread_id: &str) -> AppResult<()> {
        let db = self.db.clone();
        let key = thread_id.to_string();
        tokio::task::spawn_blocking(move || -> AppResult<()> {
            db.remove(key.as_bytes())
                .map_err(|e| AppError::Internal(e.into()))?;
            db.flush().map_err(|e| AppError::Internal(e.into()))?;
            Ok(())
        })
        .await
        .map_err(|e| AppError::Internal(e.into()))?
    }

    async fn exists(&self, thread_id: &str) -> AppResult<bool> {
        let db = self.db.clone();
        let key = thread_id.to_string();
        tokio::task::spawn_blocking(move || db.contains_key(key.as_bytes()))
            .await
            .map_err(|e| AppError::Internal(e.into()))?
            .map_err(|e| AppError::Internal(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ConversationMessage;

    #[tokio::test]
    async fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledCheckpointStore::open(dir.path()).unwrap();

        let mut state = CheckpointState::default();
        state.messages.push(ConversationMessage::assistant("hello"));
        store.put("t1", state).await.unwrap();

        let loaded = store.get("t1").await.unwrap().unwrap();
        assert_eq!(loaded.messages[0].content, "hello");

        store.delete("t1").await.unwrap();
        assert!(store.get("t1").await.unwrap().is_none());
    }
}
