//! CLI layer for probe-agent.
//!
//! Provides the command-line interface using clap, with commands for
//! chatting with a codebase, listing tools and serving MCP.

pub mod commands;
pub mod output;
pub mod parser;

pub use commands::execute;
pub use output::OutputFormat;
#[cfg(feature = "mcp")]
pub use parser::McpCommands;
pub use parser::{AgentArgs, Cli, Commands};
