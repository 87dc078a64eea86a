//! Command-line argument parsing.
//!
//! Defines the CLI structure using clap derive macros.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use super::output::OutputFormat;

/// probe-agent: chat with a codebase through the probe code-search tools.
///
/// An LLM answers questions by calling `search`, `query` and `extract`
/// (and any configured MCP tools) until it can give a grounded answer.
#[derive(Parser, Debug)]
#[command(name = "probe-agent")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose (debug) logging on stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    pub format: OutputFormat,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ask a question about the codebase.
    ///
    /// With a message, answers it and exits. Without one, starts an
    /// interactive session; type `exit` or press Ctrl-D to leave and
    /// `clear` to start a new session.
    #[command(after_help = r#"Examples:
  probe-agent chat "How are retries configured?"          # One-shot
  probe-agent chat --path ./src                            # Interactive
  probe-agent chat --schema schema.json "List the tools"   # Structured output
  probe-agent --format json chat "Where is main?" | jq .content
"#)]
    Chat {
        /// Message to send. Omit for an interactive session.
        message: Option<String>,

        /// JSON schema the final answer must match (file path or inline JSON).
        #[arg(long)]
        schema: Option<String>,

        /// Agent options.
        #[command(flatten)]
        agent: AgentArgs,
    },

    /// Print the tool documentation given to the model.
    ///
    /// Lists native tools and, unless `--no-mcp` is set, the tools of every
    /// configured MCP server. Needs no API key.
    Tools {
        /// Agent options.
        #[command(flatten)]
        agent: AgentArgs,
    },

    /// MCP (Model Context Protocol) server.
    #[cfg(feature = "mcp")]
    #[command(subcommand)]
    Mcp(McpCommands),
}

/// Options shared by the agent commands.
#[derive(Args, Debug, Clone, Default)]
pub struct AgentArgs {
    /// Directory to search (defaults to `PROBE_PATH` or the current directory).
    #[arg(short, long)]
    pub path: Option<PathBuf>,

    /// LLM provider: anthropic, openai or google.
    #[arg(long)]
    pub provider: Option<String>,

    /// Model name.
    #[arg(short, long)]
    pub model: Option<String>,

    /// Maximum LLM calls per message.
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Path to the probe binary.
    #[arg(long)]
    pub probe_bin: Option<PathBuf>,

    /// MCP configuration file.
    #[arg(long)]
    pub mcp_config: Option<PathBuf>,

    /// Disable MCP tools.
    #[arg(long)]
    pub no_mcp: bool,

    /// File with a custom base system prompt.
    #[arg(long)]
    pub system_prompt: Option<PathBuf>,
}

/// MCP subcommands.
#[cfg(feature = "mcp")]
#[derive(Subcommand, Debug)]
pub enum McpCommands {
    /// Serve the probe tools over MCP stdio.
    ///
    /// Reads JSON-RPC messages from stdin, writes responses to stdout.
    #[command(after_help = r#"Examples:
  probe-agent mcp serve                    # Serve the current directory
  probe-agent mcp serve --path ~/src/app   # Serve another project
"#)]
    Serve {
        /// Directory searched when a call gives no path.
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// Path to the probe binary.
        #[arg(long, env = "PROBE_BIN", default_value = "probe")]
        probe_bin: PathBuf,
    },
}
