//! MCP transport layer.
//!
//! The probe server speaks MCP over stdio: JSON-RPC on stdin/stdout, logs
//! on stderr.

use rmcp::ServiceExt;
use rmcp::transport::io::stdio;
use tracing::info;

use super::server::ProbeMcpServer;

/// Starts the MCP server with stdio transport and runs until the client
/// disconnects.
///
/// # Errors
///
/// Returns an error if the server fails to start or encounters a runtime error.
pub async fn serve_stdio(server: ProbeMcpServer) -> anyhow::Result<()> {
    info!(working_dir = %server.working_dir().display(), "serving probe tools over MCP stdio");
    let service = server.serve(stdio()).await?;
    service.waiting().await?;
    Ok(())
}
