//! probe-agent binary entry point.

use std::io::{self, Write};
use std::process::ExitCode;

use clap::Parser;
use probe_agent::cli::{Cli, execute};
use tracing_subscriber::{EnvFilter, fmt};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match execute(&cli) {
        Ok(output) => {
            if !output.is_empty() {
                let _ = io::stdout().write_all(output.as_bytes());
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            let _ = writeln!(io::stderr(), "Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr; stdout carries answers and the MCP protocol.
fn init_tracing(verbose: bool) {
    let default = if verbose { "probe_agent=debug" } else { "probe_agent=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}
