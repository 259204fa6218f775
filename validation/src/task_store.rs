//! Blind-test task persistence (§4.7 "Full-test command"): the 3 tasks
//! synthesized during a skill's original layer-1 online validation are
//! kept on the skill row so `runFullTest` can reuse them.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlindTestTask {
    pub task_id: i64,
    pub task: String,
    #[serde(default)]
    pub is_new: bool,
}

/// Reads the `validation_tasks` column off a skill row into a typed
/// vector, tolerating an absent or malformed column (returns empty).
pub fn tasks_from_value(value: Option<&Value>) -> Vec<BlindTestTask> {
    value
        .and_then(|v| serde_json::from_value::<Vec<BlindTestTask>>(v.clone()).ok())
        .unwrap_or_default()
}

pub fn tasks_to_value(tasks: &[BlindTestTask]) -> Value {
    serde_json::to_value(tasks).unwrap_or(Value::Array(vec![]))
}

/// Appends `new_tasks` to `old_tasks`, marking each appended task as new.
/// Does not deduplicate by content: callers are expected to have already
/// excluded existing task descriptions when generating `new_tasks`.
pub fn merge_tasks(old_tasks: Vec<BlindTestTask>, new_tasks: Vec<BlindTestTask>) -> Vec<BlindTestTask> {
    let mut merged = old_tasks;
    for mut task in new_tasks {
        task.is_new = true;
        merged.push(task);
    }
    merged
}
