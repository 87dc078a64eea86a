//! MCP client connector backed by `rmcp`.
//!
//! Each stdio server is spawned as a child process and initialized with a
//! timeout. Servers that fail to start are logged and skipped; connecting
//! fails only when no server could be reached.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rmcp::model::{CallToolRequestParam, Tool};
use rmcp::service::{RoleClient, RunningService, ServiceExt};
use rmcp::transport::TokioChildProcess;
use serde_json::{Map, Value};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use super::config::{McpServerConfig, TransportKind};
use super::connector::{McpConnection, McpConnector, McpSession};
use crate::agent::tool::ToolDefinition;
use crate::error::McpError;

/// Default budget for starting and initializing one server.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

type Service = RunningService<RoleClient, ()>;

/// Connects to MCP servers through `rmcp`.
#[derive(Debug, Clone, Copy)]
pub struct RmcpConnector {
    connect_timeout: Duration,
}

impl Default for RmcpConnector {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl RmcpConnector {
    /// Sets the per-server startup budget.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    async fn start(&self, config: &McpServerConfig) -> Result<Service, McpError> {
        let connect_err = |message: String| McpError::Connect {
            server: config.name.clone(),
            message,
        };

        if config.transport != TransportKind::Stdio {
            return Err(connect_err(format!(
                "transport {:?} is not supported, only stdio",
                config.transport
            )));
        }
        let program = config
            .command
            .as_deref()
            .ok_or_else(|| connect_err("missing command".to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(&config.args).stderr(Stdio::null());
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let transport = TokioChildProcess::new(cmd).map_err(|e| connect_err(e.to_string()))?;
        tokio::time::timeout(self.connect_timeout, ().serve(transport))
            .await
            .map_err(|_| {
                connect_err(format!(
                    "timed out after {}s",
                    self.connect_timeout.as_secs()
                ))
            })?
            .map_err(|e| connect_err(e.to_string()))
    }
}

fn to_definition(tool: Tool) -> ToolDefinition {
    ToolDefinition::new(
        tool.name.to_string(),
        tool.description.map(|d| d.to_string()).unwrap_or_default(),
        Value::Object((*tool.input_schema).clone()),
    )
}

#[async_trait]
impl McpConnector for RmcpConnector {
    async fn connect(&self, servers: &[McpServerConfig]) -> Result<McpConnection, McpError> {
        let mut services = Vec::new();
        let mut routes = HashMap::new();
        let mut tools = Vec::new();

        for config in servers {
            trace!(server = %config.name, "starting MCP server");
            let service = match self.start(config).await {
                Ok(service) => service,
                Err(e) => {
                    warn!(error = %e, "skipping MCP server");
                    continue;
                }
            };

            let listed = match service.peer().list_all_tools().await {
                Ok(listed) => listed,
                Err(e) => {
                    warn!(server = %config.name, error = %e, "cannot list MCP tools, skipping server");
                    service.cancel().await.ok();
                    continue;
                }
            };

            debug!(server = %config.name, tools = listed.len(), "MCP server connected");
            let index = services.len();
            for tool in listed {
                routes.entry(tool.name.to_string()).or_insert(index);
                tools.push(to_definition(tool));
            }
            services.push((config.name.clone(), service));
        }

        if services.is_empty() {
            return Err(McpError::NoServersConnected {
                attempted: servers.len(),
            });
        }

        Ok(McpConnection {
            tools,
            session: Arc::new(RmcpSession {
                services: Mutex::new(services),
                routes,
            }),
        })
    }
}

/// Live `rmcp` client sessions with a tool-to-server index.
struct RmcpSession {
    services: Mutex<Vec<(String, Service)>>,
    routes: HashMap<String, usize>,
}

#[async_trait]
impl McpSession for RmcpSession {
    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<String, McpError> {
        let index = *self.routes.get(name).ok_or_else(|| McpError::UnknownTool {
            name: name.to_string(),
        })?;
        let tool_err = |message: String| McpError::ToolCall {
            name: name.to_string(),
            message,
        };

        let services = self.services.lock().await;
        let (server, service) = services
            .get(index)
            .ok_or_else(|| tool_err("server connection is closed".to_string()))?;
        trace!(server = %server, tool = name, "MCP call");

        let result = service
            .peer()
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments: Some(arguments),
            })
            .await
            .map_err(|e| tool_err(e.to_string()))?;

        let text = result
            .content
            .iter()
            .filter_map(|c| c.as_text())
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        if result.is_error == Some(true) {
            return Err(tool_err(if text.is_empty() {
                "tool reported an error".to_string()
            } else {
                text
            }));
        }
        Ok(text)
    }

    async fn close(&self) {
        let services = std::mem::take(&mut *self.services.lock().await);
        for (server, service) in services {
            debug!(server = %server, "stopping MCP server");
            service.cancel().await.ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unsupported_transport_is_skipped() {
        let mut remote = McpServerConfig::stdio("remote", "unused", Vec::new());
        remote.transport = TransportKind::Http;
        let result = RmcpConnector::default().connect(&[remote]).await;
        assert!(matches!(result, Err(McpError::NoServersConnected { attempted: 1 })));
    }

    #[tokio::test]
    async fn test_missing_binary_fails_to_connect() {
        let server = McpServerConfig::stdio("ghost", "/nonexistent/mcp-server-binary", Vec::new());
        let connector = RmcpConnector::default().with_connect_timeout(Duration::from_secs(5));
        let result = connector.connect(&[server]).await;
        assert!(matches!(result, Err(McpError::NoServersConnected { .. })));
    }

    #[test]
    fn test_tool_conversion() {
        let schema = serde_json::json!({"type": "object", "properties": {"q": {"type": "string"}}});
        let Value::Object(object) = schema.clone() else {
            return;
        };
        let tool = Tool::new("lookup", "Look things up", Arc::new(object));
        let def = to_definition(tool);
        assert_eq!(def.name, "lookup");
        assert_eq!(def.description, "Look things up");
        assert_eq!(def.input_schema, schema);
    }
}
