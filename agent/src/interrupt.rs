//! Interrupt Handler (§4.4): turns a client decision on a suspended thread
//! into a resume command and re-drives the [`AgentRunner`].

use std::sync::Arc;

use backend_checkpoint::CheckpointStore;
use backend_protocol::InternalEvent;
use backend_protocol::ThreadId;
use backend_protocol::interrupt::InterruptAction;
use backend_protocol::interrupt::build_resume_command;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::mode::Mode;
use crate::runner::AgentRunner;

pub struct InterruptHandler {
    runner: Arc<AgentRunner>,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl InterruptHandler {
    pub fn new(runner: Arc<AgentRunner>, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self { runner, checkpoints }
    }

    /// Resolves the pending interrupt on `thread` against `action`/`answers`
    /// and re-drives the agent. An invalid action/tool combination, or a
    /// thread with nothing pending, yields an immediate `Error` + `Done`
    /// without touching the agent (§4.4: "invalid combinations ... do not
    /// advance the agent state").
    pub async fn resume(
        &self,
        thread: ThreadId,
        action: InterruptAction,
        answers: Vec<String>,
        mode: Mode,
    ) -> ReceiverStream<InternalEvent> {
        match self.validate(&thread, action, &answers).await {
            Ok(payload) => self.runner.resume_turn(thread, mode, payload),
            Err(message) => immediate_error_stream(message),
        }
    }

    async fn validate(
        &self,
        thread: &ThreadId,
        action: InterruptAction,
        answers: &[String],
    ) -> Result<Value, String> {
        let snapshot = self
            .checkpoints
            .get(thread.as_str())
            .await
            .map_err(|err| err.to_string())?
            .ok_or_else(|| format!("no checkpoint for thread {thread}"))?;
        let pending = snapshot
            .pending_interrupts
            .last()
            .ok_or_else(|| "thread is not suspended on an interrupt".to_string())?;
        let resume_cmd = build_resume_command(&pending.tool_name, action, answers, &pending.args)
            .map_err(|err| err.to_string())?;
        serde_json::to_value(&resume_cmd).map_err(|err| err.to_string())
    }
}

fn immediate_error_stream(message: String) -> ReceiverStream<InternalEvent> {
    let (tx, rx) = mpsc::channel(2);
    tokio::spawn(async move {
        let _ = tx.send(InternalEvent::Error { message }).await;
        let _ = tx
            .send(InternalEvent::Done {
                action: Some("error".to_string()),
            })
            .await;
    });
    ReceiverStream::new(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_llm::FakeLlmClient;
    use crate::fake_llm::ScriptedTurn;
    use crate::llm::LlmChunk;
    use backend_checkpoint::CheckpointState;
    use backend_checkpoint::MemoryCheckpointStore;
    use backend_protocol::UserId;
    use backend_sandbox::SandboxManager;
    use backend_sandbox::local::LocalSandboxFactory;
    use serde_json::json;
    use std::time::Duration;
    use tokio_stream::StreamExt;

    async fn collect(mut stream: ReceiverStream<InternalEvent>) -> Vec<InternalEvent> {
        let mut out = Vec::new();
        while let Some(event) = stream.next().await {
            out.push(event);
        }
        out
    }

    fn handler(llm: FakeLlmClient) -> (InterruptHandler, Arc<dyn CheckpointStore>, ThreadId) {
        let owner = UserId::new();
        let thread = ThreadId::new(owner);
        let checkpoints: Arc<dyn CheckpointStore> = Arc::new(MemoryCheckpointStore::new());
        let runner = Arc::new(AgentRunner::new(
            Arc::new(llm),
            checkpoints.clone(),
            Arc::new(SandboxManager::new(Arc::new(LocalSandboxFactory))),
            Duration::from_secs(5),
        ));
        (InterruptHandler::new(runner, checkpoints.clone()), checkpoints, thread)
    }

    #[tokio::test]
    async fn resuming_a_thread_with_no_pending_interrupt_errors_without_calling_agent() {
        let (handler, _checkpoints, thread) = handler(FakeLlmClient::new(vec![]));
        let events = collect(
            handler
                .resume(thread, InterruptAction::Continue, vec![], Mode::Build)
                .await,
        )
        .await;
        assert!(events.iter().any(|e| matches!(e, InternalEvent::Error { .. })));
        assert!(matches!(
            events.last(),
            Some(InternalEvent::Done { action: Some(a) }) if a == "error"
        ));
    }

    #[tokio::test]
    async fn ask_user_continue_is_rejected_as_invalid() {
        let (handler, checkpoints, thread) = handler(FakeLlmClient::new(vec![]));
        let mut state = CheckpointState::default();
        state.pending_interrupts.push(backend_checkpoint::PendingInterrupt {
            tool_name: "ask_user".into(),
            args: json!({"questions": ["color?"]}),
            summary: "Ask a question: color?".into(),
        });
        checkpoints.put(thread.as_str(), state).await.unwrap();

        let events = collect(
            handler
                .resume(thread, InterruptAction::Continue, vec![], Mode::Build)
                .await,
        )
        .await;
        assert!(matches!(
            events.last(),
            Some(InternalEvent::Done { action: Some(a) }) if a == "error"
        ));
    }

    #[tokio::test]
    async fn continuing_a_paused_non_ask_user_tool_re_drives_the_agent() {
        let llm = FakeLlmClient::new(vec![ScriptedTurn::new(vec![
            LlmChunk::Token("resumed".into()),
            LlmChunk::Done,
        ])]);
        let (handler, checkpoints, thread) = handler(llm);
        let mut state = CheckpointState::default();
        state.pending_interrupts.push(backend_checkpoint::PendingInterrupt {
            tool_name: "execute".into(),
            args: json!({"command": "echo hi"}),
            summary: "Run command: echo hi".into(),
        });
        checkpoints.put(thread.as_str(), state).await.unwrap();

        let events = collect(
            handler
                .resume(thread, InterruptAction::Continue, vec![], Mode::Build)
                .await,
        )
        .await;
        assert!(events.iter().any(|e| matches!(e, InternalEvent::Token { text } if text == "resumed")));
        assert!(matches!(events.last(), Some(InternalEvent::Done { action: None })));
    }
}
