use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One tool invocation attached to an assistant message, kept for
/// `getHistory` (§4.6) so a client can render what the agent did without
/// replaying the turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub args: Value,
    pub result: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
}

impl ConversationMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }
}

/// The tool call a thread is currently paused on, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingInterrupt {
    pub tool_name: String,
    pub args: Value,
    pub summary: String,
}

/// Durable snapshot of a thread's conversation graph: everything the
/// Session Manager needs to answer `status`/`history` without replaying
/// the agent, and everything the Interrupt Handler needs to build a
/// resume command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointState {
    pub messages: Vec<ConversationMessage>,
    pub pending_interrupts: Vec<PendingInterrupt>,
}

impl CheckpointState {
    pub fn is_interrupted(&self) -> bool {
        !self.pending_interrupts.is_empty()
    }
}
