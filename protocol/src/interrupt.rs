//! Resume-command construction for interrupted tool calls.
//!
//! When the agent pauses on a tool call (`ask_user`, or any tool flagged
//! for approval such as `execute`/`write_file`), the caller resumes it
//! with one of [`InterruptAction::Continue`], [`InterruptAction::Cancel`]
//! or [`InterruptAction::Answer`]. Which actions are legal, and what
//! resume payload they produce, depends on which tool is currently
//! paused:
//!
//! | current tool | action   | resume payload                                   |
//! |--------------|----------|---------------------------------------------------|
//! | `ask_user`   | continue | invalid                                            |
//! | `ask_user`   | cancel   | `{decisions:[{type:"reject"}]}`                    |
//! | `ask_user`   | answer   | `{decisions:[{type:"edit", edited_action:{...}}]}` |
//! | other        | continue | `{decisions:[{type:"approve"}]}`                   |
//! | other        | cancel   | `{decisions:[{type:"reject"}]}`                    |
//! | other        | answer   | invalid                                            |

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub const TOOL_ASK_USER: &str = "ask_user";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptAction {
    Continue,
    Cancel,
    Answer,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InterruptError {
    #[error("cannot `continue` a paused ask_user tool call; answer or cancel it")]
    ContinueOnAskUser,
    #[error("cannot `answer` a paused tool call that is not ask_user")]
    AnswerOnNonAskUser,
    #[error("answer action requires at least one answer")]
    EmptyAnswers,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
    Edit { edited_action: EditedAction },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditedAction {
    pub name: String,
    pub args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeCommand {
    pub decisions: Vec<Decision>,
}

impl ResumeCommand {
    fn single(decision: Decision) -> Self {
        Self {
            decisions: vec![decision],
        }
    }
}

/// Build the resume command for a paused tool call.
///
/// `current_tool` is the name of the tool the agent is paused on.
/// `original_args` are that tool call's original arguments (only used
/// when answering `ask_user`, to merge in the `answers` field).
pub fn build_resume_command(
    current_tool: &str,
    action: InterruptAction,
    answers: &[String],
    original_args: &Value,
) -> Result<ResumeCommand, InterruptError> {
    let is_ask_user = current_tool == TOOL_ASK_USER;
    match (is_ask_user, action) {
        (true, InterruptAction::Continue) => Err(InterruptError::ContinueOnAskUser),
        (true, InterruptAction::Cancel) | (false, InterruptAction::Cancel) => {
            Ok(ResumeCommand::single(Decision::Reject))
        }
        (true, InterruptAction::Answer) => {
            if answers.is_empty() {
                return Err(InterruptError::EmptyAnswers);
            }
            let mut args = original_args.clone();
            if let Value::Object(ref mut map) = args {
                map.insert(
                    "answers".to_string(),
                    Value::Array(answers.iter().cloned().map(Value::String).collect()),
                );
            } else {
                args = serde_json::json!({ "answers": answers });
            }
            Ok(ResumeCommand::single(Decision::Edit {
                edited_action: EditedAction {
                    name: TOOL_ASK_USER.to_string(),
                    args,
                },
            }))
        }
        (false, InterruptAction::Continue) => Ok(ResumeCommand::single(Decision::Approve)),
        (false, InterruptAction::Answer) => Err(InterruptError::AnswerOnNonAskUser),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ask_user_continue_is_invalid() {
        assert_eq!(
            build_resume_command("ask_user", InterruptAction::Continue, &[], &json!({})),
            Err(InterruptError::ContinueOnAskUser)
        );
    }

    #[test]
    fn ask_user_cancel_rejects() {
        let cmd =
            build_resume_command("ask_user", InterruptAction::Cancel, &[], &json!({})).unwrap();
        assert!(matches!(cmd.decisions[0], Decision::Reject));
    }

    #[test]
    fn ask_user_answer_merges_answers_into_original_args() {
        let original = json!({"questions": ["color?"]});
        let cmd = build_resume_command(
            "ask_user",
            InterruptAction::Answer,
            &["blue".to_string()],
            &original,
        )
        .unwrap();
        match &cmd.decisions[0] {
            Decision::Edit { edited_action } => {
                assert_eq!(edited_action.name, "ask_user");
                assert_eq!(edited_action.args["questions"][0], "color?");
                assert_eq!(edited_action.args["answers"][0], "blue");
            }
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn ask_user_answer_requires_nonempty_answers() {
        assert_eq!(
            build_resume_command("ask_user", InterruptAction::Answer, &[], &json!({})),
            Err(InterruptError::EmptyAnswers)
        );
    }

    #[test]
    fn other_tool_continue_approves() {
        let cmd =
            build_resume_command("execute", InterruptAction::Continue, &[], &json!({})).unwrap();
        assert!(matches!(cmd.decisions[0], Decision::Approve));
    }

    #[test]
    fn other_tool_cancel_rejects() {
        let cmd =
            build_resume_command("execute", InterruptAction::Cancel, &[], &json!({})).unwrap();
        assert!(matches!(cmd.decisions[0], Decision::Reject));
    }

    #[test]
    fn other_tool_answer_is_invalid() {
        assert_eq!(
            build_resume_command(
                "execute",
                InterruptAction::Answer,
                &["x".to_string()],
                &json!({})
            ),
            Err(InterruptError::AnswerOnNonAskUser)
        );
    }
}
