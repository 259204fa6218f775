//! WebDAV Gateway (§4.9): the subset of WebDAV the system exposes under
//! `/dav/{path}` — PROPFIND (Depth 0/1), GET, PUT, MKCOL, DELETE, MOVE —
//! against a user-rooted local directory, with ETag-based optimistic
//! concurrency and path-traversal safety.
//!
//! Grounded on `original_source/src/webdav.py` and `api/webdav.py` for
//! the PROPFIND XML shape and verb semantics; the ETag/If-Match contract
//! is this rewrite's addition (the original has no conflict detection).

pub mod gateway;
pub mod path_safety;
pub mod propfind;

pub use gateway::Depth;
pub use gateway::PutOutcome;
pub use gateway::WebDavGateway;
