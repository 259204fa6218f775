//! Wire types shared between the agent runner, the validation orchestrator
//! and the HTTP server. Nothing in this crate talks to a sandbox, a
//! database or an LLM; it only defines the shapes that cross those
//! boundaries.

pub mod event;
pub mod ids;
pub mod interrupt;

pub use event::InternalEvent;
pub use event::SseEvent;
pub use ids::SkillId;
pub use ids::ThreadId;
pub use ids::UserId;
pub use interrupt::InterruptAction;
pub use interrupt::ResumeCommand;
