//! The relational store of users, threads, skills, and image versions
//! (§1 OUT OF SCOPE item 4, §3 Data Model). The teacher has no analogue —
//! a single-user local CLI has no multi-tenant database — so this crate's
//! shape is grounded in the broader example pack's convention for a
//! `sqlx`-backed Rust service: one repository trait per entity, a
//! `sqlx::SqlitePool`-backed implementation, and an in-memory
//! implementation for tests.

pub mod image_version_repo;
pub mod models;
pub mod skill_repo;
pub mod thread_repo;
pub mod user_repo;

pub use image_version_repo::ImageVersionRepository;
pub use image_version_repo::InMemoryImageVersionRepository;
pub use image_version_repo::SqliteImageVersionRepository;
pub use models::ImageVersion;
pub use models::Skill;
pub use models::SkillStatus;
pub use models::Thread;
pub use models::User;
pub use models::ValidationStage;
pub use skill_repo::InMemorySkillRepository;
pub use skill_repo::SkillRepository;
pub use skill_repo::SqliteSkillRepository;
pub use thread_repo::InMemoryThreadRepository;
pub use thread_repo::SqliteThreadRepository;
pub use thread_repo::ThreadRepository;
pub use user_repo::InMemoryUserRepository;
pub use user_repo::SqliteUserRepository;
pub use user_repo::UserRepository;
