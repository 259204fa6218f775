//! Agent Runner, Interrupt Handler, Stream Multiplexer and Session
//! Manager (§4.3–§4.6): the direct analogue of `codex-core`'s agent loop,
//! generalized to build/plan modes and the `ask_user` interrupt
//! vocabulary.

pub mod fake_llm;
pub mod http_llm;
pub mod interrupt;
pub mod llm;
pub mod mode;
pub mod runner;
pub mod session;
pub mod stream;
pub mod tool_exec;
pub mod tool_policy;

pub use http_llm::HttpLlmClient;
pub use interrupt::InterruptHandler;
pub use llm::LlmChunk;
pub use llm::LlmClient;
pub use llm::LlmClientKind;
pub use mode::Mode;
pub use runner::AgentRunner;
pub use session::HistoryMessage;
pub use session::SessionManager;
pub use session::ThreadStatus;
pub use session::ThreadStatusView;
pub use session::ThreadSummary;
pub use stream::StreamMultiplexer;
