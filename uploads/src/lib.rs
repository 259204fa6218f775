//! Chunk Upload Manager (§4.8): resumable multi-chunk uploads over a
//! scratch area, grounded on `original_source/src/chunk_upload.py`.
//!
//! Unlike the sandbox/checkpoint/storage crates, there is no "opaque
//! external collaborator" here — the spec places this component's state
//! squarely in a scratch directory, not a database, so this crate owns
//! its own on-disk metadata format (`meta.json` per session) exactly as
//! the original did.

pub mod manager;
pub mod meta;

pub use manager::ChunkUploadManager;
pub use manager::UploadProgress;
pub use meta::UploadMeta;

/// Chunk size cap enforced by `init`/`save_chunk` (§4.8, §6 `chunk_size`).
pub const CHUNK_SIZE_BYTES: u64 = 10 * 1024 * 1024;

/// Simple (non-chunked) upload size cap; callers above this crate reject
/// with 413 and a hint to use the chunked endpoints instead (§4.8, B1).
pub const SIMPLE_UPLOAD_MAX_BYTES: u64 = 50 * 1024 * 1024;

/// Stale-session sweep threshold (§3 `UploadSession`, §4.8 `cleanupStale`).
pub const UPLOAD_EXPIRE_HOURS: i64 = 24;
