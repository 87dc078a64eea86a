//! Error types for probe-agent.
//!
//! Each layer has its own `thiserror` enum: [`AgentError`] for the agent
//! loop, providers and native tools, [`McpError`] for MCP configuration and
//! connections, and [`BridgeError`] for XML dispatch through the MCP bridge.
//! Retry outcomes are described by [`crate::agent::retry::RetryError`].

use std::path::PathBuf;

use thiserror::Error;

/// Convenience result alias defaulting to [`AgentError`].
pub type Result<T, E = AgentError> = std::result::Result<T, E>;

/// Errors raised by the agent loop, LLM providers and native tools.
#[derive(Debug, Error)]
pub enum AgentError {
    /// No credentials were found for any supported provider.
    #[error(
        "no API key found: set ANTHROPIC_API_KEY, OPENAI_API_KEY or GOOGLE_API_KEY"
    )]
    ApiKeyMissing,

    /// The requested provider name is not supported.
    #[error("unsupported provider: {name}")]
    UnsupportedProvider {
        /// Name that was requested.
        name: String,
    },

    /// The provider API returned an error or could not be reached.
    #[error("API request failed: {message}")]
    ApiRequest {
        /// Error message from the provider or transport.
        message: String,
        /// HTTP status code, when known.
        status: Option<u16>,
    },

    /// An operation exceeded its time budget.
    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        /// What was being waited on.
        operation: String,
        /// Configured budget in seconds.
        seconds: u64,
    },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// A retryable error persisted after every allowed attempt.
    #[error("retries exhausted after {attempts} attempt(s): {source}")]
    RetryExhausted {
        /// Number of attempts made, including the first.
        attempts: u32,
        /// The last underlying error.
        #[source]
        source: Box<AgentError>,
    },

    /// A native tool failed.
    #[error("tool '{name}' failed: {message}")]
    ToolExecution {
        /// Tool name.
        name: String,
        /// Failure description.
        message: String,
    },

    /// A tool name that is neither native nor MCP.
    #[error("unknown tool: {name}")]
    UnknownTool {
        /// Name referenced by the model.
        name: String,
    },

    /// Invalid configuration value.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },

    /// I/O failure (reading schema files, spawning processes).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised while loading MCP configuration or talking to MCP servers.
#[derive(Debug, Error)]
pub enum McpError {
    /// The configuration file exists but could not be read.
    #[error("cannot read MCP config {}: {source}", path.display())]
    ConfigRead {
        /// Path of the file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for the expected shape.
    #[error("cannot parse MCP config {}: {source}", path.display())]
    ConfigParse {
        /// Path of the file.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// A single server failed to start or handshake.
    #[error("cannot connect to MCP server '{server}': {message}")]
    Connect {
        /// Server name from the configuration.
        server: String,
        /// Failure description.
        message: String,
    },

    /// Every configured server failed to connect.
    #[error("none of the {attempted} configured MCP server(s) could be connected")]
    NoServersConnected {
        /// Number of servers that were tried.
        attempted: usize,
    },

    /// The tool is not in the connected catalog.
    #[error("unknown MCP tool: {name}")]
    UnknownTool {
        /// Requested tool name.
        name: String,
    },

    /// The server reported a tool failure or the call could not be delivered.
    #[error("MCP tool '{name}' failed: {message}")]
    ToolCall {
        /// Tool name.
        name: String,
        /// Failure description.
        message: String,
    },

    /// The tool call exceeded its time budget.
    #[error("MCP tool '{name}' timed out after {seconds}s")]
    Timeout {
        /// Tool name.
        name: String,
        /// Configured budget in seconds.
        seconds: u64,
    },

    /// MCP support was not compiled in.
    #[error("MCP support is not available in this build (enable the `mcp` feature)")]
    Unavailable,
}

/// Errors raised by [`crate::mcp::McpXmlBridge::execute_from_xml`].
///
/// Tool execution failures are not errors here; they are reported through
/// [`crate::mcp::McpToolOutcome`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BridgeError {
    /// The text contains no call to any known MCP tool.
    #[error("no MCP tool call found in the provided text")]
    NoToolCall,

    /// The parsed call names a tool missing from the current catalog.
    #[error("unknown MCP tool: {name}")]
    UnknownTool {
        /// Parsed tool name.
        name: String,
    },

    /// The caller cancelled the tool call.
    #[error("MCP tool call cancelled")]
    Cancelled,
}

impl From<BridgeError> for AgentError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Cancelled => Self::Cancelled,
            BridgeError::UnknownTool { name } => Self::UnknownTool { name },
            BridgeError::NoToolCall => Self::ToolExecution {
                name: "mcp".to_string(),
                message: err.to_string(),
            },
        }
    }
}
