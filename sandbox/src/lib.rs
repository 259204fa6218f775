//! Owner-keyed sandbox lifecycle management.
//!
//! [`SandboxExecutor`] is the contract every sandbox backend satisfies
//! (Daytona, Docker, or the in-process [`local::LocalProcessSandbox`]
//! used for tests and local development). [`manager::SandboxManager`] is
//! the single-flight cache that guarantees at most one live sandbox per
//! [`owner_key::OwnerKey`] and bakes the network-block policy into
//! offline validation sandboxes at construction time.

pub mod executor;
pub mod local;
pub mod manager;
pub mod owner_key;

pub use executor::ExecResult;
pub use executor::SandboxExecutor;
pub use executor::SandboxFactory;
pub use executor::SandboxState;
pub use manager::SandboxManager;
pub use owner_key::OwnerKey;
