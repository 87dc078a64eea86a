//! Seam between the bridge and MCP transport plumbing.
//!
//! The bridge only needs a combined tool catalog and a way to call tools;
//! [`McpConnector`] hides how servers are started and spoken to.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::config::McpServerConfig;
use crate::agent::tool::ToolDefinition;
use crate::error::McpError;

/// A live connection to one or more MCP servers.
#[async_trait]
pub trait McpSession: Send + Sync {
    /// Calls `name` and returns its text output.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::ToolCall`] when the call fails or the server
    /// reports a tool error, [`McpError::UnknownTool`] for unknown names.
    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<String, McpError>;

    /// Shuts down every underlying connection. Safe to call more than once.
    async fn close(&self);
}

/// Result of connecting to a set of servers.
pub struct McpConnection {
    /// Combined tool catalog, in server then listing order.
    pub tools: Vec<ToolDefinition>,
    /// Handle used to call tools and disconnect.
    pub session: Arc<dyn McpSession>,
}

impl std::fmt::Debug for McpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpConnection")
            .field("tools", &self.tools.len())
            .finish_non_exhaustive()
    }
}

/// Starts MCP servers and collects their tools.
#[async_trait]
pub trait McpConnector: Send + Sync {
    /// Connects to `servers`.
    ///
    /// Implementations may skip individual servers that fail, but must
    /// return an error when none could be connected.
    ///
    /// # Errors
    ///
    /// Returns [`McpError`] when no connection could be established.
    async fn connect(&self, servers: &[McpServerConfig]) -> Result<McpConnection, McpError>;
}

/// Connector for builds without MCP support; every connect fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableConnector;

#[async_trait]
impl McpConnector for UnavailableConnector {
    async fn connect(&self, _servers: &[McpServerConfig]) -> Result<McpConnection, McpError> {
        Err(McpError::Unavailable)
    }
}

/// The connector used by the application for this build.
#[must_use]
pub fn default_connector() -> Arc<dyn McpConnector> {
    #[cfg(feature = "mcp")]
    {
        Arc::new(super::client::RmcpConnector::default())
    }
    #[cfg(not(feature = "mcp"))]
    {
        Arc::new(UnavailableConnector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unavailable_connector_fails() {
        let result = UnavailableConnector
            .connect(&[McpServerConfig::stdio("x", "x", Vec::new())])
            .await;
        assert!(matches!(result, Err(McpError::Unavailable)));
    }
}
