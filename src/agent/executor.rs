//! Native tool execution through the `probe` binary.
//!
//! [`NativeToolExecutor`] is the seam the agent loop dispatches native tool
//! calls through. [`ProbeToolExecutor`] implements `search`, `query` and
//! `extract` by spawning `probe` with a timeout; the child is killed when
//! the call is cancelled or times out.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::parser::value_text;
use super::tool::{ToolDefinition, probe_tool_definitions};
use crate::error::AgentError;

/// Default time budget for a single `probe` invocation.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);
/// Maximum accepted length of a single argument value.
const MAX_ARG_LEN: usize = 10_000;
/// Upper bound for `max_results`.
const MAX_RESULTS_LIMIT: u64 = 1_000;
/// Upper bound for `context_lines`.
const MAX_CONTEXT_LINES: u64 = 200;

/// Explicit per-call context handed to tools.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Conversation session id, used by `probe` to de-duplicate results.
    pub session_id: String,
    /// Directory searched when a call gives no `path`.
    pub working_dir: PathBuf,
    /// Cancels the running tool.
    pub cancel: CancellationToken,
}

impl ToolContext {
    /// Creates a context with a fresh cancellation token.
    #[must_use]
    pub fn new(session_id: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            session_id: session_id.into(),
            working_dir: working_dir.into(),
            cancel: CancellationToken::new(),
        }
    }
}

/// Executes natively implemented tools.
#[async_trait]
pub trait NativeToolExecutor: Send + Sync {
    /// Definitions of the tools this executor handles.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Runs `name` with decoded parameters and returns its text output.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::UnknownTool`] for names it does not handle,
    /// [`AgentError::ToolExecution`] on invalid arguments or tool failure,
    /// [`AgentError::Timeout`] and [`AgentError::Cancelled`] as appropriate.
    async fn execute(
        &self,
        name: &str,
        params: &Map<String, Value>,
        ctx: &ToolContext,
    ) -> Result<String, AgentError>;

    /// Names of the tools this executor handles.
    fn tool_names(&self) -> Vec<String> {
        self.definitions().into_iter().map(|d| d.name).collect()
    }
}

/// Runs `search`, `query` and `extract` through the `probe` CLI.
#[derive(Debug, Clone)]
pub struct ProbeToolExecutor {
    probe_bin: PathBuf,
    timeout: Duration,
}

impl ProbeToolExecutor {
    /// Creates an executor invoking `probe_bin`.
    #[must_use]
    pub fn new(probe_bin: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            probe_bin: probe_bin.into(),
            timeout,
        }
    }

    /// Path of the `probe` binary.
    #[must_use]
    pub fn probe_bin(&self) -> &Path {
        &self.probe_bin
    }

    /// Builds the `probe` argument list for a tool call.
    ///
    /// Options come first and positionals follow a `--`, so model-supplied
    /// values starting with `-` are never read as flags.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::UnknownTool`] or [`AgentError::ToolExecution`]
    /// when a required parameter is missing or a value is invalid.
    pub fn build_args(
        name: &str,
        params: &Map<String, Value>,
        ctx: &ToolContext,
    ) -> Result<Vec<String>, AgentError> {
        let default_path = ctx.working_dir.display().to_string();
        let mut args = vec![name.to_string()];
        let positionals: Vec<String>;

        match name {
            "search" => {
                positionals = vec![
                    required_str(name, params, "query")?,
                    optional_str(name, params, "path")?.unwrap_or(default_path),
                ];
                if let Some(n) = optional_u64(name, params, "max_results")? {
                    args.extend(["--max-results".to_string(), n.min(MAX_RESULTS_LIMIT).to_string()]);
                }
                if let Some(n) = optional_u64(name, params, "max_tokens")? {
                    args.extend(["--max-tokens".to_string(), n.to_string()]);
                }
                push_flag(&mut args, name, params, "exact", "--exact")?;
                push_flag(&mut args, name, params, "allow_tests", "--allow-tests")?;
                push_flag(&mut args, name, params, "files_only", "--files-only")?;
                args.extend(["--session".to_string(), ctx.session_id.clone()]);
            }
            "query" => {
                positionals = vec![
                    required_str(name, params, "pattern")?,
                    optional_str(name, params, "path")?.unwrap_or(default_path),
                ];
                if let Some(language) = optional_str(name, params, "language")? {
                    args.extend(["--language".to_string(), language]);
                }
                if let Some(n) = optional_u64(name, params, "max_results")? {
                    args.extend(["--max-results".to_string(), n.min(MAX_RESULTS_LIMIT).to_string()]);
                }
                push_flag(&mut args, name, params, "allow_tests", "--allow-tests")?;
            }
            "extract" => {
                positionals = required_str(name, params, "targets")?
                    .split_whitespace()
                    .map(str::to_string)
                    .collect();
                if let Some(n) = optional_u64(name, params, "context_lines")? {
                    args.extend([
                        "--context-lines".to_string(),
                        n.min(MAX_CONTEXT_LINES).to_string(),
                    ]);
                }
                push_flag(&mut args, name, params, "allow_tests", "--allow-tests")?;
            }
            other => {
                return Err(AgentError::UnknownTool {
                    name: other.to_string(),
                });
            }
        }

        args.push("--".to_string());
        args.extend(positionals);
        Ok(args)
    }

    async fn run(&self, name: &str, args: Vec<String>, ctx: &ToolContext) -> Result<String, AgentError> {
        debug!(tool = name, bin = %self.probe_bin.display(), ?args, "running probe");

        let mut command = Command::new(&self.probe_bin);
        command
            .args(&args)
            .current_dir(&ctx.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => return Err(AgentError::Cancelled),
            result = tokio::time::timeout(self.timeout, command.output()) => match result {
                Ok(output) => output.map_err(|e| AgentError::ToolExecution {
                    name: name.to_string(),
                    message: format!("failed to run {}: {e}", self.probe_bin.display()),
                })?,
                Err(_) => {
                    return Err(AgentError::Timeout {
                        operation: format!("tool '{name}'"),
                        seconds: self.timeout.as_secs(),
                    });
                }
            },
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(AgentError::ToolExecution {
                name: name.to_string(),
                message: if stderr.is_empty() {
                    format!("probe exited with {}", output.status)
                } else {
                    stderr
                },
            });
        }

        debug!(tool = name, bytes = stdout.len(), "probe finished");
        if stdout.is_empty() {
            Ok("No results found.".to_string())
        } else {
            Ok(stdout)
        }
    }
}

#[async_trait]
impl NativeToolExecutor for ProbeToolExecutor {
    fn definitions(&self) -> Vec<ToolDefinition> {
        probe_tool_definitions()
    }

    async fn execute(
        &self,
        name: &str,
        params: &Map<String, Value>,
        ctx: &ToolContext,
    ) -> Result<String, AgentError> {
        let args = Self::build_args(name, params, ctx)?;
        self.run(name, args, ctx).await
    }
}

fn invalid(tool: &str, message: String) -> AgentError {
    AgentError::ToolExecution {
        name: tool.to_string(),
        message,
    }
}

fn optional_str(
    tool: &str,
    params: &Map<String, Value>,
    key: &str,
) -> Result<Option<String>, AgentError> {
    let Some(value) = params.get(key).filter(|v| !v.is_null()) else {
        return Ok(None);
    };
    let text = value_text(value).trim().to_string();
    if text.len() > MAX_ARG_LEN {
        return Err(invalid(
            tool,
            format!("'{key}' too long ({} bytes, max {MAX_ARG_LEN})", text.len()),
        ));
    }
    Ok(Some(text).filter(|t| !t.is_empty()))
}

fn required_str(tool: &str, params: &Map<String, Value>, key: &str) -> Result<String, AgentError> {
    optional_str(tool, params, key)?
        .ok_or_else(|| invalid(tool, format!("missing required parameter '{key}'")))
}

fn optional_u64(
    tool: &str,
    params: &Map<String, Value>,
    key: &str,
) -> Result<Option<u64>, AgentError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| invalid(tool, format!("'{key}' must be a non-negative integer"))),
        Some(other) => value_text(other)
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| invalid(tool, format!("'{key}' must be a non-negative integer"))),
    }
}

fn optional_bool(
    tool: &str,
    params: &Map<String, Value>,
    key: &str,
) -> Result<Option<bool>, AgentError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => match value_text(other).trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Some(true)),
            "false" | "0" | "no" | "" => Ok(Some(false)),
            _ => Err(invalid(tool, format!("'{key}' must be true or false"))),
        },
    }
}

fn push_flag(
    args: &mut Vec<String>,
    tool: &str,
    params: &Map<String, Value>,
    key: &str,
    flag: &str,
) -> Result<(), AgentError> {
    if optional_bool(tool, params, key)?.unwrap_or(false) {
        args.push(flag.to_string());
    }
    Ok(())
}
