pub mod admin;
pub mod auth;
pub mod chat;
pub mod dav;
pub mod files;
pub mod sessions;
