//! Ambient stack shared by every crate in the workspace: configuration,
//! structured logging and the HTTP-facing error type.

pub mod config;
pub mod error;
pub mod logging;

pub use config::AppConfig;
pub use error::AppError;
pub use error::AppResult;
