use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

/// Opaque user identifier. Wraps a [`Uuid`] so it can't be confused with a
/// [`ThreadId`] or a [`SkillId`] at the type level even though all three
/// serialize to plain strings on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for UserId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A thread (session) identifier: `"{user_id}-{uuid}"`.
///
/// The prefix is load-bearing: every route that takes a `thread_id` path
/// parameter must check [`ThreadId::is_owned_by`] before touching the
/// thread, since the id itself never proves ownership.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn new(owner: UserId) -> Self {
        Self(format!("{owner}-{}", Uuid::new_v4()))
    }

    /// `true` iff this thread id's prefix matches `owner`.
    pub fn is_owned_by(&self, owner: UserId) -> bool {
        let prefix = owner.to_string();
        self.0
            .strip_prefix(prefix.as_str())
            .is_some_and(|rest| rest.starts_with('-'))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for an uploaded skill package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SkillId(pub Uuid);

impl SkillId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SkillId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SkillId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
