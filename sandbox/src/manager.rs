use std::sync::Arc;

use backend_common::AppResult;
use backend_protocol::SkillId;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::executor::SandboxExecutor;
use crate::executor::SandboxFactory;
use crate::executor::SandboxState;
use crate::owner_key::OwnerKey;

type Slot = Arc<Mutex<Option<Arc<dyn SandboxExecutor>>>>;

/// Guarantees at most one live sandbox per [`OwnerKey`].
///
/// Each key gets its own `Mutex`-guarded slot so creating a sandbox for
/// one owner never blocks lookups for another. Reusing a dead sandbox
/// (one whose backend reports [`SandboxState::Destroyed`]) transparently
/// recreates it rather than handing back a unusable handle.
pub struct SandboxManager {
    factory: Arc<dyn SandboxFactory>,
    slots: DashMap<OwnerKey, Slot>,
}

impl SandboxManager {
    pub fn new(factory: Arc<dyn SandboxFactory>) -> Self {
        Self {
            factory,
            slots: DashMap::new(),
        }
    }

    /// Returns the live sandbox for `key`, creating one if none exists
    /// yet or the existing one has died.
    pub async fn get_or_create(&self, key: OwnerKey) -> AppResult<Arc<dyn SandboxExecutor>> {
        let slot = self
            .slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();

        let mut guard = slot.lock().await;
        if let Some(existing) = guard.as_ref() {
            if existing.state().await == SandboxState::Running {
                return Ok(existing.clone());
            }
            tracing::info!(?key, "cached sandbox is dead, recreating");
        }

        let network_block_all = key.requires_network_block_at_construction();
        let sandbox = self.factory.create(network_block_all).await?;
        *guard = Some(sandbox.clone());
        Ok(sandbox)
    }

    /// Destroys and forgets the sandbox for `key`, if any. Returns
    /// `false` if there was nothing to destroy.
    pub async fn destroy(&self, key: &OwnerKey) -> AppResult<bool> {
        let Some((_, slot)) = self.slots.remove(key) else {
            return Ok(false);
        };
        let mut guard = slot.lock().await;
        if let Some(sandbox) = guard.take() {
            sandbox.destroy().await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Destroys both the online and offline validation sandboxes for a
    /// skill. Best-effort: a failure to destroy one backend doesn't
    /// prevent the other from being cleaned up.
    pub async fn destroy_validation_backends(&self, skill_id: SkillId) {
        for key in [OwnerKey::Validation(skill_id), OwnerKey::Offline(skill_id)] {
            if let Err(err) = self.destroy(&key).await {
                tracing::warn!(?key, %err, "failed to destroy validation sandbox");
            }
        }
    }
}
