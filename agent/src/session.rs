//! Session Manager (§4.6): thread lifecycle on top of the checkpoint
//! store and the thread repository.

use std::sync::Arc;

use backend_checkpoint::CheckpointStore;
use backend_checkpoint::Role;
use backend_common::AppError;
use backend_common::AppResult;
use backend_protocol::ThreadId;
use backend_protocol::UserId;
use backend_sandbox::OwnerKey;
use backend_sandbox::SandboxManager;
use backend_storage::Thread;
use backend_storage::ThreadRepository;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Idle,
    Interrupted,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreadSummary {
    pub thread_id: ThreadId,
    pub title: Option<String>,
    pub status: ThreadStatus,
    pub message_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreadStatusView {
    pub status: ThreadStatus,
    pub has_pending_tasks: bool,
    pub interrupt_info: Option<backend_checkpoint::PendingInterrupt>,
    pub message_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryMessage {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<backend_checkpoint::ToolCallRecord>,
}

pub struct SessionManager {
    threads: Arc<dyn ThreadRepository>,
    checkpoints: Arc<dyn CheckpointStore>,
    sandboxes: Arc<SandboxManager>,
}

impl SessionManager {
    pub fn new(
        threads: Arc<dyn ThreadRepository>,
        checkpoints: Arc<dyn CheckpointStore>,
        sandboxes: Arc<SandboxManager>,
    ) -> Self {
        Self {
            threads,
            checkpoints,
            sandboxes,
        }
    }

    /// Allocates `{userId}-{uuid}`, persists the thread row, and pre-warms
    /// the user's agent sandbox fire-and-forget (§4.6).
    pub async fn create(&self, user: UserId) -> AppResult<ThreadId> {
        let thread_id = ThreadId::new(user);
        self.threads.create(thread_id.clone(), user).await?;

        let sandboxes = self.sandboxes.clone();
        tokio::spawn(async move {
            if let Err(err) = sandboxes.get_or_create(OwnerKey::Agent(user)).await {
                tracing::warn!(%user, %err, "failed to pre-warm agent sandbox");
            }
        });

        Ok(thread_id)
    }

    pub async fn list(
        &self,
        user: UserId,
        page: u32,
        page_size: u32,
    ) -> AppResult<(Vec<ThreadSummary>, u64)> {
        let (rows, total) = self.threads.list(user, page, page_size).await?;
        let mut summaries = Vec::with_capacity(rows.len());
        for row in rows {
            summaries.push(self.summarize(row).await?);
        }
        Ok((summaries, total))
    }

    pub async fn get_status(&self, thread: &ThreadId, caller: UserId) -> AppResult<ThreadStatusView> {
        self.authorize(thread, caller)?;
        let snapshot = self.checkpoints.get(thread.as_str()).await?.unwrap_or_default();
        let interrupted = snapshot.is_interrupted();
        Ok(ThreadStatusView {
            status: if interrupted {
                ThreadStatus::Interrupted
            } else {
                ThreadStatus::Idle
            },
            has_pending_tasks: interrupted,
            interrupt_info: snapshot.pending_interrupts.last().cloned(),
            message_count: snapshot.messages.len(),
        })
    }

    /// System messages and empty messages are suppressed; assistant
    /// messages carry their tool-call metadata when present (§4.6).
    pub async fn get_history(&self, thread: &ThreadId, caller: UserId) -> AppResult<Vec<HistoryMessage>> {
        self.authorize(thread, caller)?;
        let snapshot = self.checkpoints.get(thread.as_str()).await?.unwrap_or_default();
        Ok(snapshot
            .messages
            .into_iter()
            .filter(|m| m.role != Role::System && !m.content.is_empty())
            .map(|m| HistoryMessage {
                role: match m.role {
                    Role::User => "user".to_string(),
                    Role::Assistant => "assistant".to_string(),
                    Role::System => unreachable!("system messages filtered above"),
                },
                content: m.content,
                tool_calls: m.tool_calls,
            })
            .collect())
    }

    /// Destroys the user's shared sandbox. Design consequence (§4.6):
    /// this tears down the live state of ALL of the user's threads, not
    /// just the one named here.
    pub async fn destroy(&self, thread: &ThreadId, caller: UserId) -> AppResult<()> {
        self.authorize(thread, caller)?;
        self.sandboxes.destroy(&OwnerKey::Agent(caller)).await?;
        self.checkpoints.delete(thread.as_str()).await?;
        self.threads.delete(thread).await?;
        Ok(())
    }

    fn authorize(&self, thread: &ThreadId, caller: UserId) -> AppResult<()> {
        if thread.is_owned_by(caller) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "thread {thread} is not owned by the calling user"
            )))
        }
    }

    async fn summarize(&self, thread: Thread) -> AppResult<ThreadSummary> {
        let snapshot = self
            .checkpoints
            .get(thread.thread_id.as_str())
            .await?
            .unwrap_or_default();
        Ok(ThreadSummary {
            thread_id: thread.thread_id,
            title: thread.title,
            status: if snapshot.is_interrupted() {
                ThreadStatus::Interrupted
            } else {
                ThreadStatus::Idle
            },
            message_count: snapshot.messages.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend_checkpoint::CheckpointState;
    use backend_checkpoint::ConversationMessage;
    use backend_checkpoint::MemoryCheckpointStore;
    use backend_checkpoint::PendingInterrupt;
    use backend_sandbox::local::LocalSandboxFactory;
    use backend_storage::InMemoryThreadRepository;
    use serde_json::json;

    fn manager() -> (SessionManager, Arc<dyn CheckpointStore>) {
        let checkpoints: Arc<dyn CheckpointStore> = Arc::new(MemoryCheckpointStore::new());
        let manager = SessionManager::new(
            Arc::new(InMemoryThreadRepository::new()),
            checkpoints.clone(),
            Arc::new(SandboxManager::new(Arc::new(LocalSandboxFactory))),
        );
        (manager, checkpoints)
    }

    #[tokio::test]
    async fn create_then_list_shows_one_idle_thread() {
        let (manager, _checkpoints) = manager();
        let user = UserId::new();
        let thread = manager.create(user).await.unwrap();
        assert!(thread.is_owned_by(user));

        let (threads, total) = manager.list(user, 0, 10).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(threads[0].status, ThreadStatus::Idle);
    }

    #[tokio::test]
    async fn status_reflects_pending_interrupt() {
        let (manager, checkpoints) = manager();
        let user = UserId::new();
        let thread = manager.create(user).await.unwrap();

        let mut state = CheckpointState::default();
        state.pending_interrupts.push(PendingInterrupt {
            tool_name: "ask_user".into(),
            args: json!({}),
            summary: "Ask a question".into(),
        });
        checkpoints.put(thread.as_str(), state).await.unwrap();

        let status = manager.get_status(&thread, user).await.unwrap();
        assert_eq!(status.status, ThreadStatus::Interrupted);
        assert!(status.has_pending_tasks);
    }

    #[tokio::test]
    async fn history_suppresses_system_and_empty_messages() {
        let (manager, checkpoints) = manager();
        let user = UserId::new();
        let thread = manager.create(user).await.unwrap();

        let mut state = CheckpointState::default();
        state.messages.push(ConversationMessage::system("files attached: a.txt"));
        state.messages.push(ConversationMessage::user("hello"));
        state.messages.push(ConversationMessage::assistant(""));
        state.messages.push(ConversationMessage::assistant("hi there"));
        checkpoints.put(thread.as_str(), state).await.unwrap();

        let history = manager.get_history(&thread, user).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "hello");
        assert_eq!(history[1].content, "hi there");
    }

    #[tokio::test]
    async fn destroy_rejects_non_owner() {
        let (manager, _checkpoints) = manager();
        let owner = UserId::new();
        let other = UserId::new();
        let thread = manager.create(owner).await.unwrap();
        let err = manager.destroy(&thread, other).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }
}
