//! CLI command implementations.
//!
//! Each command builds its own tokio runtime as the sync/async bridge and
//! returns the text to print on stdout.

use std::io::{self, Write as IoWrite};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::agent::executor::DEFAULT_TOOL_TIMEOUT;
use crate::agent::prompt::load_system_prompt;
use crate::agent::tool::{ToolDefinition, completion_tool_definition};
use crate::agent::{
    AgentConfig, AgentLoop, ConversationHistory, NativeToolExecutor, ProbeToolExecutor,
    create_provider,
};
use crate::cli::output::{OutputFormat, format_answer, format_tools};
#[cfg(feature = "mcp")]
use crate::cli::parser::McpCommands;
use crate::cli::parser::{AgentArgs, Cli, Commands};
use crate::error::AgentError;
use crate::mcp::{McpConfig, McpXmlBridge, create_hybrid_system_message, default_connector};

/// Executes the CLI command.
///
/// # Errors
///
/// Returns an error if configuration is incomplete or the command fails.
pub fn execute(cli: &Cli) -> Result<String> {
    match &cli.command {
        Commands::Chat {
            message,
            schema,
            agent,
        } => cmd_chat(message.as_deref(), schema.as_deref(), agent, cli.format),
        Commands::Tools { agent } => cmd_tools(agent, cli.format),
        #[cfg(feature = "mcp")]
        Commands::Mcp(sub) => cmd_mcp(sub),
    }
}

/// Resolves agent configuration: flags, then environment, then defaults.
///
/// # Errors
///
/// Returns [`AgentError::ApiKeyMissing`] when no credentials are available.
pub fn agent_config(args: &AgentArgs) -> Result<AgentConfig, AgentError> {
    let mut builder = AgentConfig::builder().mcp_enabled(!args.no_mcp);
    if let Some(provider) = &args.provider {
        builder = builder.provider(provider);
    }
    if let Some(model) = &args.model {
        builder = builder.model(model);
    }
    if let Some(n) = args.max_iterations {
        builder = builder.max_iterations(n);
    }
    if let Some(bin) = &args.probe_bin {
        builder = builder.probe_bin(bin);
    }
    if let Some(path) = &args.path {
        builder = builder.working_dir(path);
    }
    if let Some(path) = &args.mcp_config {
        builder = builder.mcp_config_path(path);
    }
    builder.from_env().build()
}

/// Reads a schema from a file, or takes the argument as inline JSON.
///
/// # Errors
///
/// Returns an error when the argument names a file that cannot be read.
pub fn load_schema(arg: &str) -> Result<String> {
    let path = Path::new(arg);
    if path.is_file() {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read schema file {}", path.display()))?;
        return Ok(text.trim().to_string());
    }
    Ok(arg.trim().to_string())
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("Failed to create async runtime")
}

/// Connects the MCP bridge when a configuration with servers exists.
async fn load_bridge(path: Option<&Path>) -> Option<McpXmlBridge> {
    match McpConfig::load(path) {
        Ok(config) if !config.servers.is_empty() => {
            let mut bridge = McpXmlBridge::new(default_connector());
            bridge.initialize_from_config(&config).await;
            Some(bridge)
        }
        Ok(_) => None,
        Err(e) => {
            warn!(error = %e, "ignoring MCP configuration");
            None
        }
    }
}

async fn build_agent(config: AgentConfig, args: &AgentArgs) -> Result<AgentLoop> {
    let provider = create_provider(&config).context("Provider creation failed")?;
    let executor = Arc::new(ProbeToolExecutor::new(
        config.probe_bin.clone(),
        config.tool_timeout,
    ));
    let bridge = if config.mcp_enabled {
        load_bridge(config.mcp_config_path.as_deref()).await
    } else {
        None
    };

    let mut agent = AgentLoop::new(Arc::from(provider), executor, config)
        .with_system_prompt(load_system_prompt(args.system_prompt.as_deref()));
    if let Some(bridge) = bridge {
        agent = agent.with_bridge(bridge);
    }
    Ok(agent)
}

fn cmd_chat(
    message: Option<&str>,
    schema: Option<&str>,
    args: &AgentArgs,
    format: OutputFormat,
) -> Result<String> {
    let config = agent_config(args).context("Agent configuration error")?;
    let schema = schema.map(load_schema).transpose()?;
    let mut history = ConversationHistory::new(config.max_history_messages);

    let rt = runtime()?;
    rt.block_on(async {
        let cancel = CancellationToken::new();
        let mut agent = build_agent(config, args).await?;
        let result = match message {
            Some(message) => {
                let watcher = cancel_on_interrupt(cancel.clone());
                let answer = agent
                    .run(&mut history, message, schema.as_deref(), &cancel)
                    .await
                    .map(|answer| format_answer(&answer, format))
                    .context("Chat failed");
                watcher.abort();
                answer
            }
            None => interactive(&agent, &mut history, schema.as_deref(), format, &cancel).await,
        };
        agent.shutdown().await;
        result
    })
}

/// Cancels `token` on the next Ctrl-C.
fn cancel_on_interrupt(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("interrupt received");
            token.cancel();
        }
    })
}

async fn interactive(
    agent: &AgentLoop,
    history: &mut ConversationHistory,
    schema: Option<&str>,
    format: OutputFormat,
    cancel: &CancellationToken,
) -> Result<String> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = io::stdout();

    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;

        let line = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };
        let input = line.trim();
        match input {
            "" => continue,
            "exit" | "quit" => break,
            "clear" => {
                history.clear();
                writeln!(stdout, "Started a new session ({}).", history.session_id())?;
                continue;
            }
            _ => {}
        }

        // Ctrl-C aborts only the turn in flight; the session keeps going.
        let turn = cancel.child_token();
        let watcher = cancel_on_interrupt(turn.clone());
        let result = agent.run(history, input, schema, &turn).await;
        watcher.abort();

        match result {
            Ok(answer) => write!(stdout, "{}", format_answer(&answer, format))?,
            Err(AgentError::Cancelled) if cancel.is_cancelled() => break,
            Err(AgentError::Cancelled) => writeln!(stdout, "\nCancelled.")?,
            Err(e) => writeln!(io::stderr(), "Error: {e}")?,
        }
    }

    Ok(String::new())
}

fn cmd_tools(args: &AgentArgs, format: OutputFormat) -> Result<String> {
    let probe_bin = args
        .probe_bin
        .clone()
        .or_else(|| std::env::var_os("PROBE_BIN").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("probe"));
    let mcp_config = args
        .mcp_config
        .clone()
        .or_else(|| std::env::var_os("MCP_CONFIG_PATH").map(PathBuf::from));

    let mut native = ProbeToolExecutor::new(probe_bin, DEFAULT_TOOL_TIMEOUT).definitions();
    native.push(completion_tool_definition());

    let rt = runtime()?;
    rt.block_on(async {
        let mut bridge = if args.no_mcp {
            None
        } else {
            load_bridge(mcp_config.as_deref()).await
        };

        let docs = create_hybrid_system_message("", &native, bridge.as_ref());
        let mcp: Vec<ToolDefinition> = bridge
            .as_ref()
            .map(|b| b.catalog().tools().cloned().collect())
            .unwrap_or_default();
        if let Some(bridge) = bridge.as_mut() {
            bridge.cleanup().await;
        }

        Ok(format_tools(&native, &mcp, docs.trim_start(), format))
    })
}

/// Serves the probe tools over MCP stdio until the client disconnects.
#[cfg(feature = "mcp")]
fn cmd_mcp(cmd: &McpCommands) -> Result<String> {
    use crate::mcp::{ProbeMcpServer, serve_stdio};

    match cmd {
        McpCommands::Serve { path, probe_bin } => {
            let working_dir = path
                .clone()
                .or_else(|| std::env::var_os("PROBE_PATH").map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from("."));
            let server = ProbeMcpServer::new(
                ProbeToolExecutor::new(probe_bin.clone(), DEFAULT_TOOL_TIMEOUT),
                working_dir,
            );

            let rt = runtime()?;
            rt.block_on(serve_stdio(server)).context("MCP server error")?;
            Ok(String::new())
        }
    }
}
