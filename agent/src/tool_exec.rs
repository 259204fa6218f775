use std::sync::Arc;
use std::time::Duration;

use backend_common::AppError;
use backend_common::AppResult;
use backend_sandbox::SandboxExecutor;
use serde_json::Value;
use serde_json::json;

use crate::tool_policy::TOOL_EDIT_FILE;
use crate::tool_policy::TOOL_EXECUTE;
use crate::tool_policy::TOOL_WRITE_FILE;

/// Runs an approved tool call against a thread's sandbox and returns the
/// JSON value fed back to the LLM as the tool's result.
///
/// `ask_user` is handled by the caller (its "result" is the human's
/// answers, not something a sandbox produces) and never reaches here.
pub async fn execute_tool_call(
    sandbox: &Arc<dyn SandboxExecutor>,
    timeout: Duration,
    name: &str,
    args: &Value,
) -> AppResult<Value> {
    match name {
        TOOL_EXECUTE => {
            let command = args
                .get("command")
                .and_then(Value::as_str)
                .ok_or_else(|| AppError::BadRequest("execute requires `command`".into()))?;
            let result = sandbox.exec(command, timeout).await?;
            Ok(json!({
                "stdout": result.stdout,
                "stderr": result.stderr,
                "exit_code": result.exit_code,
                "timed_out": result.timed_out,
            }))
        }
        TOOL_WRITE_FILE => {
            let path = args
                .get("path")
                .and_then(Value::as_str)
                .ok_or_else(|| AppError::BadRequest("write_file requires `path`".into()))?;
            let content = args.get("content").and_then(Value::as_str).unwrap_or("");
            sandbox.upload_file(path, content.as_bytes()).await?;
            Ok(json!({ "path": path, "bytes_written": content.len() }))
        }
        TOOL_EDIT_FILE => {
            let path = args
                .get("path")
                .and_then(Value::as_str)
                .ok_or_else(|| AppError::BadRequest("edit_file requires `path`".into()))?;
            let old_text = args
                .get("old_text")
                .and_then(Value::as_str)
                .ok_or_else(|| AppError::BadRequest("edit_file requires `old_text`".into()))?;
            let new_text = args.get("new_text").and_then(Value::as_str).unwrap_or("");
            let current = sandbox.download_file(path).await?;
            let current = String::from_utf8_lossy(&current);
            if !current.contains(old_text) {
                return Err(AppError::BadRequest(format!(
                    "old_text not found in {path}"
                )));
            }
            let updated = current.replacen(old_text, new_text, 1);
            sandbox.upload_file(path, updated.as_bytes()).await?;
            Ok(json!({ "path": path, "bytes_written": updated.len() }))
        }
        "read_file" => {
            let path = args
                .get("path")
                .and_then(Value::as_str)
                .ok_or_else(|| AppError::BadRequest("read_file requires `path`".into()))?;
            let data = sandbox.download_file(path).await?;
            Ok(json!({ "path": path, "content": String::from_utf8_lossy(&data) }))
        }
        "list_files" => {
            let path = args.get("path").and_then(Value::as_str).unwrap_or(".");
            let result = sandbox
                .exec(&format!("ls -la -- {path}"), timeout)
                .await?;
            Ok(json!({ "path": path, "listing": result.stdout }))
        }
        other => {
            tracing::debug!(tool = other, "tool has no sandbox-side effect, treating as noop");
            Ok(Value::Null)
        }
    }
}
