//! Event types that flow out of the agent runner and across the SSE wire.
//!
//! [`InternalEvent`] is what the agent runner and the stream multiplexer
//! pass around internally. [`SseEvent`] is the wire-level `event:` name
//! each [`InternalEvent`] maps onto. Keeping the two separate means the
//! internal representation can carry richer data than what actually gets
//! serialized to the client.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// Normalized event produced by an agent turn, regardless of which LLM
/// client or tool produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InternalEvent {
    /// A partial assistant-message token.
    Token { text: String },
    /// A tool call has started executing.
    ToolStart {
        call_id: String,
        tool_name: String,
        args: Value,
    },
    /// A tool call finished.
    ToolEnd {
        call_id: String,
        tool_name: String,
        result: Value,
        is_error: bool,
    },
    /// The agent paused on a tool call awaiting human input.
    Interrupt {
        tool_name: String,
        /// Human-readable description of what's being asked, e.g.
        /// "run `rm -rf build/`?" or "2 questions pending".
        summary: String,
        raw: Value,
    },
    /// Title of the thread changed (emitted by the background title-gen
    /// producer, not the agent itself).
    TitleUpdated { title: String },
    /// Unrecoverable error; always followed by [`InternalEvent::Done`].
    Error { message: String },
    /// Terminal event for a turn. `action` is `Some("error")` when the
    /// turn ended abnormally, `None` for a clean completion.
    Done { action: Option<String> },
}

impl InternalEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, InternalEvent::Done { .. })
    }

    /// The SSE `event:` name this internal event is framed under.
    pub fn sse_event(&self) -> SseEvent {
        match self {
            InternalEvent::Token { .. } => SseEvent::MessagesPartial,
            InternalEvent::ToolStart { .. } => SseEvent::ToolStart,
            InternalEvent::ToolEnd { .. } => SseEvent::ToolEnd,
            InternalEvent::Interrupt { .. } => SseEvent::Interrupt,
            InternalEvent::TitleUpdated { .. } => SseEvent::TitleUpdated,
            InternalEvent::Error { .. } => SseEvent::Error,
            InternalEvent::Done { .. } => SseEvent::End,
        }
    }

    /// Render as a complete `event: ...\ndata: ...\n\n` SSE frame.
    ///
    /// Falls back to `{"error":"serialization_failed"}` if the payload
    /// somehow fails to serialize (it never should, since every variant
    /// here is plain data), so a stream can never silently stop emitting
    /// bytes because of a serde bug.
    pub fn to_sse_frame(&self) -> String {
        let name = self.sse_event().as_str();
        let data = serde_json::to_string(self)
            .unwrap_or_else(|_| "{\"error\":\"serialization_failed\"}".to_string());
        format!("event: {name}\ndata: {data}\n\n")
    }
}

/// The SSE `event:` field names the server emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum SseEvent {
    #[strum(serialize = "messages/partial")]
    MessagesPartial,
    #[strum(serialize = "tool/start")]
    ToolStart,
    #[strum(serialize = "tool/end")]
    ToolEnd,
    #[strum(serialize = "interrupt")]
    Interrupt,
    #[strum(serialize = "title_updated")]
    TitleUpdated,
    #[strum(serialize = "error")]
    Error,
    #[strum(serialize = "end")]
    End,
}

impl SseEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            SseEvent::MessagesPartial => "messages/partial",
            SseEvent::ToolStart => "tool/start",
            SseEvent::ToolEnd => "tool/end",
            SseEvent::Interrupt => "interrupt",
            SseEvent::TitleUpdated => "title_updated",
            SseEvent::Error => "error",
            SseEvent::End => "end",
        }
    }
}
