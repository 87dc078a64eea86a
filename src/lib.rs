//! probe-agent: agentic code-search chat over the probe CLI.
//!
//! An LLM answers questions about a codebase by calling tools through a
//! textual XML protocol. Native tools (`search`, `query`, `extract`) run the
//! `probe` binary; tools discovered on MCP servers are exposed through the
//! same protocol by [`mcp::McpXmlBridge`]. Provider calls are retried with
//! exponential backoff, replies without a tool call get a reminder, and the
//! iteration limit ends every turn with an explicit final-turn warning.
//!
//! # Modules
//!
//! - [`agent`]: iteration controller, parser, retry, providers, native tools
//! - [`mcp`]: MCP configuration, bridge, `rmcp` client and probe MCP server
//! - [`cli`]: command-line interface
//! - [`error`]: error types

pub mod agent;
pub mod cli;
pub mod error;
pub mod mcp;

pub use agent::{AgentAnswer, AgentConfig, AgentLoop, RetryManager, RetryOptions};
pub use error::{AgentError, BridgeError, McpError, Result};
pub use mcp::McpXmlBridge;
