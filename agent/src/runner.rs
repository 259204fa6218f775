//! Agent Runner (§4.3): drives one turn of the LLM agent over a thread,
//! mediating build-mode auto-approval and plan-mode write rejection.

use std::sync::Arc;
use std::time::Duration;

use backend_checkpoint::CheckpointStore;
use backend_checkpoint::ConversationMessage;
use backend_checkpoint::PendingInterrupt;
use backend_checkpoint::ToolCallRecord;
use backend_protocol::InternalEvent;
use backend_protocol::ThreadId;
use backend_protocol::interrupt::InterruptAction;
use backend_protocol::interrupt::build_resume_command;
use backend_sandbox::OwnerKey;
use backend_sandbox::SandboxManager;
use serde_json::Value;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::llm::LlmChunk;
use crate::llm::LlmClient;
use crate::llm::LlmClientKind;
use crate::mode::Mode;
use crate::tool_exec;
use crate::tool_policy;

const SYSTEM_PROMPT: &str = "You are a coding agent with access to a sandboxed workspace.";
const EVENT_BUFFER: usize = 64;
const LLM_CHUNK_BUFFER: usize = 64;

/// Drives the Agent Runner, Interrupt Handler and Session Manager
/// components over a shared [`CheckpointStore`]/[`SandboxManager`] pair.
pub struct AgentRunner {
    llm: Arc<dyn LlmClient>,
    checkpoints: Arc<dyn CheckpointStore>,
    sandboxes: Arc<SandboxManager>,
    exec_timeout: Duration,
}

enum TurnOutcome {
    Completed,
    Paused,
    Errored,
}

impl AgentRunner {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        checkpoints: Arc<dyn CheckpointStore>,
        sandboxes: Arc<SandboxManager>,
        exec_timeout: Duration,
    ) -> Self {
        Self {
            llm,
            checkpoints,
            sandboxes,
            exec_timeout,
        }
    }

    /// Runs one turn, starting from a fresh user message. Returns a lazy
    /// stream of [`InternalEvent`]s terminated by exactly one `Done`.
    pub fn run_turn(
        self: &Arc<Self>,
        thread: ThreadId,
        user_message: String,
        attached_files: Vec<String>,
        mode: Mode,
    ) -> ReceiverStream<InternalEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let this = self.clone();
        tokio::spawn(async move {
            this.drive(thread, Some((user_message, attached_files)), mode, None, tx)
                .await;
        });
        ReceiverStream::new(rx)
    }

    /// Resumes a turn already paused on an interrupt, feeding the given
    /// resume payload back into the agent instead of composing a new user
    /// message. Used by the Interrupt Handler (§4.4).
    pub fn resume_turn(
        self: &Arc<Self>,
        thread: ThreadId,
        mode: Mode,
        resume_payload: Value,
    ) -> ReceiverStream<InternalEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let this = self.clone();
        tokio::spawn(async move {
            this.drive(thread, None, mode, Some(resume_payload), tx)
                .await;
        });
        ReceiverStream::new(rx)
    }

    async fn drive(
        &self,
        thread: ThreadId,
        new_input: Option<(String, Vec<String>)>,
        mode: Mode,
        mut resume_payload: Option<Value>,
        tx: mpsc::Sender<InternalEvent>,
    ) {
        let emit = |event: InternalEvent| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(event).await;
            }
        };

        let owner_key = match OwnerKey::for_thread(&thread) {
            Some(key) => key,
            None => {
                emit(InternalEvent::Error {
                    message: format!("malformed thread id: {thread}"),
                })
                .await;
                emit(InternalEvent::Done {
                    action: Some("error".to_string()),
                })
                .await;
                return;
            }
        };

        let sandbox = match self.sandboxes.get_or_create(owner_key).await {
            Ok(sandbox) => sandbox,
            Err(err) => {
                tracing::warn!(%thread, %err, "sandbox unavailable for turn");
                emit(InternalEvent::Error {
                    message: format!("sandbox unavailable: {err}"),
                })
                .await;
                emit(InternalEvent::Done {
                    action: Some("error".to_string()),
                })
                .await;
                return;
            }
        };

        let mut state = self
            .checkpoints
            .get(thread.as_str())
            .await
            .unwrap_or(None)
            .unwrap_or_default();

        if let Some((user_message, attached_files)) = new_input {
            if !attached_files.is_empty() {
                state.messages.push(ConversationMessage::system(format!(
                    "Files attached: {}",
                    attached_files.join(", ")
                )));
            }
            if mode == Mode::Plan {
                state.messages.push(ConversationMessage::system(
                    "Plan mode: write tools (execute, write_file, edit_file) are forbidden this turn.",
                ));
            }
            state.messages.push(ConversationMessage::user(user_message));
        }
        state.pending_interrupts.clear();
        if let Err(err) = self.checkpoints.put(thread.as_str(), state.clone()).await {
            emit(InternalEvent::Error {
                message: format!("failed to persist checkpoint: {err}"),
            })
            .await;
            emit(InternalEvent::Done {
                action: Some("error".to_string()),
            })
            .await;
            return;
        }

        let mut assistant_text = String::new();
        let mut tool_calls: Vec<ToolCallRecord> = Vec::new();

        let outcome = loop {
            let (ltx, mut lrx) = mpsc::channel(LLM_CHUNK_BUFFER);
            let llm = self.llm.clone();
            let messages_snapshot = state.messages.clone();
            let payload = resume_payload.take();
            let join = tokio::spawn(async move {
                llm.stream_turn(
                    LlmClientKind::Big,
                    SYSTEM_PROMPT,
                    &messages_snapshot,
                    payload,
                    ltx,
                )
                .await
            });

            let mut paused: Option<(String, String, Value)> = None;
            while let Some(chunk) = lrx.recv().await {
                match chunk {
                    LlmChunk::Token(text) => {
                        assistant_text.push_str(&text);
                        emit(InternalEvent::Token { text }).await;
                    }
                    LlmChunk::ToolCallRequested {
                        call_id,
                        name,
                        args,
                    } => {
                        emit(InternalEvent::ToolStart {
                            call_id,
                            tool_name: name,
                            args,
                        })
                        .await;
                    }
                    LlmChunk::ToolCallResult {
                        call_id,
                        name,
                        result,
                        is_error,
                    } => {
                        emit(InternalEvent::ToolEnd {
                            call_id,
                            tool_name: name,
                            result,
                            is_error,
                        })
                        .await;
                    }
                    LlmChunk::Interrupted {
                        call_id,
                        name,
                        args,
                    } => {
                        paused = Some((call_id, name, args));
                        break;
                    }
                    LlmChunk::Done => {}
                }
            }

            match join.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    emit(InternalEvent::Error {
                        message: err.to_string(),
                    })
                    .await;
                    break TurnOutcome::Errored;
                }
                Err(err) => {
                    emit(InternalEvent::Error {
                        message: format!("agent stream task panicked: {err}"),
                    })
                    .await;
                    break TurnOutcome::Errored;
                }
            }

            let Some((call_id, name, args)) = paused else {
                break TurnOutcome::Completed;
            };

            if mode == Mode::Plan && tool_policy::is_write_tool(&name) {
                emit(InternalEvent::Error {
                    message: format!("plan mode forbids `{name}`"),
                })
                .await;
                break TurnOutcome::Errored;
            }

            if mode == Mode::Build && tool_policy::is_auto_approvable(&name) {
                emit(InternalEvent::ToolStart {
                    call_id: call_id.clone(),
                    tool_name: name.clone(),
                    args: args.clone(),
                })
                .await;
                let result = tool_exec::execute_tool_call(&sandbox, self.exec_timeout, &name, &args)
                    .await;
                let (result_value, is_error) = match result {
                    Ok(value) => (value, false),
                    Err(err) => (json!({ "error": err.to_string() }), true),
                };
                emit(InternalEvent::ToolEnd {
                    call_id,
                    tool_name: name.clone(),
                    result: result_value.clone(),
                    is_error,
                })
                .await;
                tool_calls.push(ToolCallRecord {
                    tool_name: name.clone(),
                    args: args.clone(),
                    result: Some(result_value),
                });

                // Persist incrementally so a mid-turn disconnect (§5) never
                // loses work already committed to the sandbox.
                let mut snapshot = state.clone();
                let mut msg = ConversationMessage::assistant(assistant_text.clone());
                msg.tool_calls = tool_calls.clone();
                snapshot.messages.push(msg);
                let _ = self.checkpoints.put(thread.as_str(), snapshot).await;

                if tx.is_closed() {
                    return;
                }

                let resume_cmd =
                    match build_resume_command(&name, InterruptAction::Continue, &[], &args) {
                        Ok(cmd) => cmd,
                        Err(err) => {
                            emit(InternalEvent::Error {
                                message: err.to_string(),
                            })
                            .await;
                            break TurnOutcome::Errored;
                        }
                    };
                resume_payload = Some(serde_json::to_value(&resume_cmd).unwrap_or(Value::Null));
                continue;
            }

            // ask_user, or any tool that isn't auto-approvable: surface the
            // interrupt and halt this turn (§4.3 step 5).
            let summary = interrupt_summary(&name, &args);
            state.pending_interrupts.push(PendingInterrupt {
                tool_name: name.clone(),
                args: args.clone(),
                summary: summary.clone(),
            });
            emit(InternalEvent::Interrupt {
                tool_name: name,
                summary,
                raw: args,
            })
            .await;
            break TurnOutcome::Paused;
        };

        if !assistant_text.is_empty() || !tool_calls.is_empty() {
            let mut msg = ConversationMessage::assistant(assistant_text);
            msg.tool_calls = tool_calls;
            state.messages.push(msg);
        }
        if let Err(err) = self.checkpoints.put(thread.as_str(), state).await {
            tracing::error!(%thread, %err, "failed to persist final checkpoint state");
        }

        let done_action = match outcome {
            TurnOutcome::Completed | TurnOutcome::Paused => None,
            TurnOutcome::Errored => Some("error".to_string()),
        };
        emit(InternalEvent::Done {
            action: done_action,
        })
        .await;
    }
}

fn interrupt_summary(tool_name: &str, args: &Value) -> String {
    let label = tool_policy::display_name(tool_name);
    match tool_name {
        tool_policy::TOOL_ASK_USER => {
            let questions = args
                .get("questions")
                .and_then(Value::as_array)
                .map(|qs| {
                    qs.iter()
                        .filter_map(Value::as_str)
                        .collect::<Vec<_>>()
                        .join("; ")
                })
                .unwrap_or_default();
            if questions.is_empty() {
                label.to_string()
            } else {
                format!("{label}: {questions}")
            }
        }
        tool_policy::TOOL_EXECUTE => {
            let command = args.get("command").and_then(Value::as_str).unwrap_or("");
            format!("{label}: {command}")
        }
        tool_policy::TOOL_WRITE_FILE | tool_policy::TOOL_EDIT_FILE => {
            let path = args.get("path").and_then(Value::as_str).unwrap_or("");
            format!("{label}: {path}")
        }
        _ => label.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_llm::FakeLlmClient;
    use crate::fake_llm::ScriptedTurn;
    use backend_checkpoint::MemoryCheckpointStore;
    use backend_protocol::UserId;
    use backend_sandbox::local::LocalSandboxFactory;
    use tokio_stream::StreamExt;

    async fn collect(mut stream: ReceiverStream<InternalEvent>) -> Vec<InternalEvent> {
        let mut out = Vec::new();
        while let Some(event) = stream.next().await {
            out.push(event);
        }
        out
    }

    fn runner(llm: FakeLlmClient) -> (Arc<AgentRunner>, ThreadId) {
        let owner = UserId::new();
        let thread = ThreadId::new(owner);
        let runner = Arc::new(AgentRunner::new(
            Arc::new(llm),
            Arc::new(MemoryCheckpointStore::new()),
            Arc::new(SandboxManager::new(Arc::new(LocalSandboxFactory))),
            Duration::from_secs(5),
        ));
        (runner, thread)
    }

    #[tokio::test]
    async fn clean_completion_emits_tokens_then_done() {
        let llm = FakeLlmClient::new(vec![ScriptedTurn::new(vec![
            LlmChunk::Token("hi".into()),
            LlmChunk::Token(" there".into()),
            LlmChunk::Done,
        ])]);
        let (runner, thread) = runner(llm);
        let events = collect(runner.run_turn(thread, "hello".into(), vec![], Mode::Build)).await;
        assert!(matches!(events.last(), Some(InternalEvent::Done { action: None })));
        assert_eq!(events.len(), 3);
    }

    #[tokio::test]
    async fn ask_user_always_surfaces_as_interrupt() {
        let llm = FakeLlmClient::new(vec![ScriptedTurn::new(vec![LlmChunk::Interrupted {
            call_id: "c1".into(),
            name: "ask_user".into(),
            args: json!({"questions": ["color?"]}),
        }])]);
        let (runner, thread) = runner(llm);
        let events = collect(runner.run_turn(thread, "do a thing".into(), vec![], Mode::Build)).await;
        assert!(events.iter().any(|e| matches!(e, InternalEvent::Interrupt { tool_name, .. } if tool_name == "ask_user")));
        assert!(matches!(events.last(), Some(InternalEvent::Done { action: None })));
    }

    #[tokio::test]
    async fn build_mode_auto_approves_execute_without_surfacing_interrupt() {
        let llm = FakeLlmClient::new(vec![
            ScriptedTurn::new(vec![LlmChunk::Interrupted {
                call_id: "c1".into(),
                name: "execute".into(),
                args: json!({"command": "echo hi"}),
            }]),
            ScriptedTurn::new(vec![LlmChunk::Token("done".into()), LlmChunk::Done]),
        ]);
        let (runner, thread) = runner(llm);
        let events = collect(runner.run_turn(thread, "run echo".into(), vec![], Mode::Build)).await;
        assert!(!events.iter().any(|e| matches!(e, InternalEvent::Interrupt { .. })));
        assert!(events.iter().any(|e| matches!(e, InternalEvent::ToolEnd { tool_name, .. } if tool_name == "execute")));
        assert!(matches!(events.last(), Some(InternalEvent::Done { action: None })));
    }

    #[tokio::test]
    async fn plan_mode_rejects_write_tool_with_error() {
        let llm = FakeLlmClient::new(vec![ScriptedTurn::new(vec![LlmChunk::Interrupted {
            call_id: "c1".into(),
            name: "write_file".into(),
            args: json!({"path": "a.txt", "content": "x"}),
        }])]);
        let (runner, thread) = runner(llm);
        let events = collect(runner.run_turn(thread, "write a file".into(), vec![], Mode::Plan)).await;
        assert!(events.iter().any(|e| matches!(e, InternalEvent::Error { .. })));
        assert!(matches!(
            events.last(),
            Some(InternalEvent::Done {
                action: Some(a)
            }) if a == "error"
        ));
    }
}
