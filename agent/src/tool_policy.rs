//! Which tool calls pause a turn for human approval, and which of those
//! are auto-approved without ever surfacing to the client in build mode.

pub const TOOL_EXECUTE: &str = "execute";
pub const TOOL_WRITE_FILE: &str = "write_file";
pub const TOOL_EDIT_FILE: &str = "edit_file";
pub const TOOL_ASK_USER: &str = "ask_user";

/// Tools that always pause the turn and wait for a resume decision,
/// regardless of mode. `ask_user` pauses because it has no outcome
/// without a human answer; the write-side tools pause because they
/// mutate the sandbox or run arbitrary commands.
const INTERRUPTIBLE: &[&str] = &[TOOL_EXECUTE, TOOL_WRITE_FILE, TOOL_EDIT_FILE, TOOL_ASK_USER];

/// Tools whose interrupt is auto-approved in build mode (§4.3 step 5)
/// without ever surfacing an `Interrupt` event to the client. Notably
/// excludes `ask_user`, which always surfaces.
const AUTO_APPROVE_WHITELIST: &[&str] = &[TOOL_EXECUTE, TOOL_WRITE_FILE, TOOL_EDIT_FILE];

pub fn requires_interrupt(tool_name: &str) -> bool {
    INTERRUPTIBLE.contains(&tool_name)
}

/// Whether this tool is on the build-mode auto-approve whitelist.
pub fn is_auto_approvable(tool_name: &str) -> bool {
    AUTO_APPROVE_WHITELIST.contains(&tool_name)
}

/// Whether this tool is a write-side tool that plan mode forbids.
pub fn is_write_tool(tool_name: &str) -> bool {
    AUTO_APPROVE_WHITELIST.contains(&tool_name)
}

/// Human-readable label for a tool, used when rendering
/// [`backend_protocol::InternalEvent::Interrupt`] summaries and in the
/// thread history view. Falls back to the raw tool name for anything
/// not explicitly listed.
pub fn display_name(tool_name: &str) -> &str {
    match tool_name {
        TOOL_EXECUTE => "Run command",
        TOOL_WRITE_FILE => "Write file",
        TOOL_EDIT_FILE => "Edit file",
        TOOL_ASK_USER => "Ask a question",
        "read_file" => "Read file",
        "list_files" => "List files",
        "search" => "Search",
        other => other,
    }
}
