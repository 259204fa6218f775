use serde::Deserialize;
use serde::Serialize;

/// Execution mode for a turn (§4.3). `Build` auto-approves the whitelisted
/// write tools; `Plan` rejects them outright so the agent can only read
/// and reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Build,
    Plan,
}
