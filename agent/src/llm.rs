use async_trait::async_trait;
use backend_common::AppResult;
use serde_json::Value;
use tokio::sync::mpsc;

/// Which model variant a call should use. `Big` is the reasoning model
/// used for actual turns; `Flash` is the short-task model used for
/// title generation and validation-report summarization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmClientKind {
    Big,
    Flash,
}

/// A normalized unit of an LLM's streamed output. Whatever the
/// underlying client's wire format looks like, it gets mapped down to
/// this before anything else in the crate sees it.
#[derive(Debug, Clone)]
pub enum LlmChunk {
    Token(String),
    /// A tool call the agent executed transparently (not one of the
    /// gated tools) — pure telemetry, already resolved by the time this
    /// arrives.
    ToolCallRequested {
        call_id: String,
        name: String,
        args: Value,
    },
    ToolCallResult {
        call_id: String,
        name: String,
        result: Value,
        is_error: bool,
    },
    /// The agent paused on a gated tool call (`execute`, `write_file`,
    /// `edit_file`, `ask_user`) awaiting a resume decision. The caller
    /// must either execute the tool and call `stream_turn` again with an
    /// `approve` resume payload (build-mode auto-approve), or stop
    /// driving this stream and surface the pause to the human.
    Interrupted {
        call_id: String,
        name: String,
        args: Value,
    },
    Done,
}

/// The out-of-scope collaborator: an actual model provider integration.
/// Implementations stream [`LlmChunk`]s onto the given channel as they
/// arrive; the agent runner never sees a provider-specific type.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn stream_turn(
        &self,
        kind: LlmClientKind,
        system_prompt: &str,
        messages: &[backend_checkpoint::ConversationMessage],
        resume_payload: Option<Value>,
        tx: mpsc::Sender<LlmChunk>,
    ) -> AppResult<()>;

    /// A single non-streaming short completion. Used by title generation
    /// and, in the `validation` crate, blind-test task synthesis and
    /// report generation — always invoked with [`LlmClientKind::Flash`]
    /// by its callers.
    async fn complete(&self, kind: LlmClientKind, prompt: &str) -> AppResult<String>;
}
