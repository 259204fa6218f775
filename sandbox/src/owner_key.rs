use std::fmt;

use backend_protocol::SkillId;
use backend_protocol::ThreadId;
use backend_protocol::UserId;

/// Identifies which logical resource a sandbox belongs to. The manager
/// guarantees at most one live sandbox per key at any time.
///
/// `Agent` is keyed by [`UserId`], not by thread id: per §4.1/§9, every
/// thread belonging to the same user shares one sandbox (and therefore
/// one `/workspace`). Callers deriving this key from a thread id must use
/// the thread id's owner prefix, never the thread id itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OwnerKey {
    /// The sandbox backing all of a user's conversation threads.
    Agent(UserId),
    /// The sandbox backing a user's WebDAV / file-upload workspace.
    Files(UserId),
    /// The networked sandbox used for a skill's online (layer-1) validation.
    Validation(SkillId),
    /// The network-blocked sandbox used for a skill's offline (layer-2)
    /// validation.
    Offline(SkillId),
}

impl OwnerKey {
    /// Whether this key's sandbox must be created with all outbound
    /// network access blocked at construction time, with no runtime
    /// toggle exposed afterward.
    pub fn requires_network_block_at_construction(&self) -> bool {
        matches!(self, OwnerKey::Offline(_))
    }

    /// Derives the agent-sandbox key from a thread id, using the thread's
    /// owner prefix rather than the thread id itself (§4.1).
    ///
    /// A user id's textual form is a fixed-width uuid (36 chars), so the
    /// prefix is sliced by width rather than split on the first `-`: the
    /// owner uuid itself contains dashes.
    pub fn for_thread(thread: &ThreadId) -> Option<Self> {
        const UUID_LEN: usize = 36;
        let raw = thread.as_str();
        if raw.len() <= UUID_LEN || raw.as_bytes()[UUID_LEN] != b'-' {
            return None;
        }
        let owner: UserId = raw[..UUID_LEN].parse().ok()?;
        Some(OwnerKey::Agent(owner))
    }
}

impl fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnerKey::Agent(user) => write!(f, "agent_{user}"),
            OwnerKey::Files(user) => write!(f, "files_{user}"),
            OwnerKey::Validation(skill) => write!(f, "validation_{skill}"),
            OwnerKey::Offline(skill) => write!(f, "offline_{skill}"),
        }
    }
}
