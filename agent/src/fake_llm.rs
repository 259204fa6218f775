//! Deterministic [`LlmClient`] test double.
//!
//! Stands in for the out-of-scope "big"/"flash" model client in unit and
//! integration tests. Scripted per call via [`FakeLlmClient::script`]: each
//! call to `stream_turn` pops the next scripted turn and replays its
//! chunks; `complete` returns a scripted string. Kept outside `#[cfg(test)]`
//! so `validation` and `server` can reuse it in their own test suites,
//! mirroring how `backend_sandbox::local::LocalProcessSandbox` is a public
//! non-test module for the same reason.

use std::sync::Mutex;

use async_trait::async_trait;
use backend_common::AppError;
use backend_common::AppResult;
use tokio::sync::mpsc;

use crate::llm::LlmChunk;
use crate::llm::LlmClient;
use crate::llm::LlmClientKind;

/// One scripted agent turn: the chunks replayed by the next `stream_turn`
/// call, in order.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTurn {
    pub chunks: Vec<LlmChunk>,
}

impl ScriptedTurn {
    pub fn new(chunks: Vec<LlmChunk>) -> Self {
        Self { chunks }
    }
}

pub struct FakeLlmClient {
    turns: Mutex<std::collections::VecDeque<ScriptedTurn>>,
    completions: Mutex<std::collections::VecDeque<String>>,
}

impl FakeLlmClient {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            completions: Mutex::new(std::collections::VecDeque::new()),
        }
    }

    pub fn with_completions(mut self, completions: Vec<String>) -> Self {
        self.completions = Mutex::new(completions.into());
        self
    }
}

#[async_trait]
impl LlmClient for FakeLlmClient {
    async fn stream_turn(
        &self,
        _kind: LlmClientKind,
        _system_prompt: &str,
        _messages: &[backend_checkpoint::ConversationMessage],
        _resume_payload: Option<serde_json::Value>,
        tx: mpsc::Sender<LlmChunk>,
    ) -> AppResult<()> {
        let turn = self
            .turns
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("fake llm script exhausted")))?;
        for chunk in turn.chunks {
            if tx.send(chunk).await.is_err() {
                break;
            }
        }
        Ok(())
    }

    async fn complete(&self, _kind: LlmClientKind, _prompt: &str) -> AppResult<String> {
        Ok(self
            .completions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_default())
    }
}
