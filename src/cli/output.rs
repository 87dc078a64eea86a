//! Output formatting for CLI commands.

use clap::ValueEnum;
use serde::Serialize;

use crate::agent::AgentAnswer;
use crate::agent::tool::ToolDefinition;

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// Pretty-printed JSON.
    Json,
}

impl OutputFormat {
    /// Serializes `value` as pretty JSON.
    pub fn to_json<T: Serialize>(self, value: &T) -> String {
        serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
    }
}

/// Formats a chat answer.
#[must_use]
pub fn format_answer(answer: &AgentAnswer, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => {
            let mut output = answer.content.clone();
            if !answer.completed {
                output.push_str(&format!(
                    "\n\n[incomplete after {} iterations]",
                    answer.iterations
                ));
            }
            output.push('\n');
            output
        }
        OutputFormat::Json => format.to_json(answer),
    }
}

#[derive(Serialize)]
struct ToolEntry<'a> {
    name: &'a str,
    kind: &'a str,
    description: &'a str,
}

/// Formats the tool catalog: `docs` in text mode, a name list in JSON.
#[must_use]
pub fn format_tools(
    native: &[ToolDefinition],
    mcp: &[ToolDefinition],
    docs: &str,
    format: OutputFormat,
) -> String {
    match format {
        OutputFormat::Text => format!("{docs}\n"),
        OutputFormat::Json => {
            let entries: Vec<ToolEntry<'_>> = native
                .iter()
                .map(|t| ("native", t))
                .chain(mcp.iter().map(|t| ("mcp", t)))
                .map(|(kind, t)| ToolEntry {
                    name: &t.name,
                    kind,
                    description: &t.description,
                })
                .collect();
            format.to_json(&entries)
        }
    }
}
