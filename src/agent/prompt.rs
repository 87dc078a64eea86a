//! System prompt and controller messages.
//!
//! The wording here is part of the contract with the model: tool-call
//! syntax, section headers and completion markers must match what the
//! parser accepts.

use std::path::Path;

use tracing::warn;

/// Base system prompt for the code-search agent.
pub const SYSTEM_PROMPT: &str = r"You are ProbeChat, a code intelligence assistant. You answer questions about a codebase by searching and reading its source with the tools below.

Work in turns. Each of your replies contains at most one tool call; you then receive its output and decide the next step. Prefer `search` to locate code, `query` for structural patterns and `extract` to read complete functions or files once you know where they are.

Ground every claim in code you have actually seen. Quote file paths with line numbers when you reference code. If the code does not answer the question, say so.

When you have enough information, finish with `attempt_completion`.";

/// Usage block appended after the tool catalogs.
pub const TOOL_USAGE_INSTRUCTIONS: &str = r#"Tools are called by writing XML in your reply. Use exactly one tool call per message and wait for its result before continuing.

Native tools take one tag per parameter:
<search>
<query>error handling</query>
<path>src</path>
</search>

MCP tools take a single JSON object inside a <params> tag:
<tool_name>
<params>
{"parameter": "value"}
</params>
</tool_name>

Tool output arrives in the next message inside <tool_result> tags. Reasoning may go inside <thinking> tags; tool calls written there are ignored.

When the task is complete, give the final answer with:
<attempt_completion>
<result>
your final answer
</result>
</attempt_completion>"#;

/// Appends the structured-output requirement to a system prompt.
#[must_use]
pub fn with_schema_requirement(system: &str, schema: &str) -> String {
    format!(
        "{system}\n\nThe final answer must be valid JSON matching this schema, placed inside \
         the <result> tag of attempt_completion with no other text:\n{}",
        schema.trim()
    )
}

/// Final-turn warning injected at the last iteration.
#[must_use]
pub fn terminal_warning(max_iterations: u32) -> String {
    format!(
        "This is your final turn ({max_iterations} of {max_iterations}). Do not call any more \
         tools. Answer now with attempt_completion using everything you have found so far, and \
         state clearly which parts of the task are incomplete or unverified."
    )
}

/// Reminder injected when a reply has neither a tool call nor a completion.
///
/// With a schema the model is told exactly what JSON to send; when its last
/// reply already parses as JSON that reply is quoted verbatim.
#[must_use]
pub fn missing_tool_reminder(schema: Option<&str>, last_response: &str) -> String {
    let mut reminder = String::from(
        "Your last reply did not contain a tool call. Use one of the available tools in the \
         XML format described in the system prompt",
    );

    match schema {
        None => {
            reminder.push_str(
                ", or finish with:\n<attempt_completion>\n<result>\nyour final answer\n</result>\n\
                 </attempt_completion>\n\nIf your last reply already is the complete answer, \
                 reply with just <attempt_complete></attempt_complete>.",
            );
        }
        Some(schema) => {
            reminder.push_str(
                ", or finish with attempt_completion. The <result> must be valid JSON matching \
                 the schema below, with no other text.",
            );
            let trimmed = last_response.trim();
            if serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
                reminder.push_str(&format!(
                    "\n\nIf your last reply is the final answer, send it verbatim:\n\
                     <attempt_completion>\n<result>\n{trimmed}\n</result>\n</attempt_completion>"
                ));
            }
            reminder.push_str(&format!("\n\nSchema:\n{}", schema.trim()));
        }
    }

    reminder
}

/// Correction injected when a completion result does not satisfy the schema.
#[must_use]
pub fn schema_correction(schema: &str, problem: &str) -> String {
    format!(
        "Your attempt_completion result is not valid: {problem}. Send attempt_completion again \
         with only JSON matching this schema inside <result>:\n{}",
        schema.trim()
    )
}

/// Message returned when the iteration limit ends a turn without an answer.
#[must_use]
pub fn out_of_turns_message(max_iterations: u32) -> String {
    format!(
        "I ran out of turns ({max_iterations} iterations) before finishing. The task is \
         incomplete; try a narrower question or raise the iteration limit."
    )
}

/// Formats a failed tool call for the model.
#[must_use]
pub fn tool_error(message: &str) -> String {
    format!("Error: {message}")
}

/// Loads a custom base prompt, falling back to [`SYSTEM_PROMPT`].
#[must_use]
pub fn load_system_prompt(path: Option<&Path>) -> String {
    let Some(path) = path else {
        return SYSTEM_PROMPT.to_string();
    };
    match std::fs::read_to_string(path) {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => SYSTEM_PROMPT.to_string(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read system prompt, using default");
            SYSTEM_PROMPT.to_string()
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_reminder_without_schema_offers_shorthand() {
        let reminder = missing_tool_reminder(None, "some prose");
        assert!(reminder.contains("<attempt_complete></attempt_complete>"));
        assert!(!reminder.contains("Schema:"));
    }

    #[test]
    fn test_reminder_with_schema_quotes_json_reply() {
        let schema = r#"{"type":"object","required":["answer"]}"#;
        let reminder = missing_tool_reminder(Some(schema), " {\"answer\": 42} ");
        assert!(reminder.contains("<result>\n{\"answer\": 42}\n</result>"));
        assert!(reminder.ends_with(schema));
        assert!(!reminder.contains("attempt_complete>"));

        let reminder = missing_tool_reminder(Some(schema), "not json");
        assert!(!reminder.contains("send it verbatim"));
    }

    #[test]
    fn test_terminal_warning_is_distinct() {
        let warning = terminal_warning(34);
        assert!(warning.contains("final turn (34 of 34)"));
        assert!(!warning.contains("did not contain a tool call"));
    }

    #[test]
    fn test_load_system_prompt_fallbacks() {
        assert_eq!(load_system_prompt(None), SYSTEM_PROMPT);

        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        assert_eq!(load_system_prompt(Some(&dir.path().join("missing.md"))), SYSTEM_PROMPT);

        let path = dir.path().join("prompt.md");
        std::fs::write(&path, "Custom prompt").unwrap_or_else(|e| panic!("write: {e}"));
        assert_eq!(load_system_prompt(Some(&path)), "Custom prompt");
    }

    #[test]
    fn test_usage_instructions_cover_both_conventions() {
        assert!(TOOL_USAGE_INSTRUCTIONS.contains("<params>"));
        assert!(TOOL_USAGE_INSTRUCTIONS.contains("<query>error handling</query>"));
        assert!(TOOL_USAGE_INSTRUCTIONS.contains("<attempt_completion>"));
    }
}
