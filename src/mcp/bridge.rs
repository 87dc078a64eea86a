//! Bridge between MCP tools and the XML tool-call protocol.
//!
//! [`McpXmlBridge`] connects to the configured MCP servers, documents each
//! discovered tool in the XML calling convention, and executes calls parsed
//! from model output. Failures never escape as panics or hard errors: a
//! failed connection leaves the bridge with zero tools, and a failed tool
//! call becomes an unsuccessful [`McpToolOutcome`].

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::{McpConfig, McpServerConfig};
use super::connector::{McpConnector, McpSession};
use crate::agent::parser::{self, ParsedToolCall};
use crate::agent::prompt::TOOL_USAGE_INSTRUCTIONS;
use crate::agent::tool::{ToolDefinition, mcp_xml_doc, native_xml_doc};
use crate::error::BridgeError;

/// Default time budget for one MCP tool call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Lifecycle of a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeState {
    /// Never initialized, or cleaned up.
    Uninitialized,
    /// Connecting to servers.
    Initializing,
    /// Connected, or nothing to connect to.
    Ready,
    /// Connection failed; the bridge works with zero tools.
    Failed,
}

/// Result of an MCP tool call, fed back to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct McpToolOutcome {
    /// Whether the tool succeeded.
    pub success: bool,
    /// Tool that was called.
    pub tool_name: String,
    /// Output on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Failure description otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl McpToolOutcome {
    fn ok(tool_name: &str, result: String) -> Self {
        Self {
            success: true,
            tool_name: tool_name.to_string(),
            result: Some(result),
            error: None,
        }
    }

    fn failed(tool_name: &str, error: String) -> Self {
        Self {
            success: false,
            tool_name: tool_name.to_string(),
            result: None,
            error: Some(error),
        }
    }
}

/// Tool catalog of one initialization, replaced wholesale on the next.
#[derive(Default)]
pub struct McpCatalog {
    tools: IndexMap<String, ToolDefinition>,
    xml_docs: IndexMap<String, String>,
    session: Option<Arc<dyn McpSession>>,
}

impl McpCatalog {
    /// Tool definitions in catalog order.
    pub fn tools(&self) -> impl Iterator<Item = &ToolDefinition> {
        self.tools.values()
    }

    /// Number of tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for McpCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpCatalog")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("connected", &self.session.is_some())
            .finish()
    }
}

/// Exposes MCP tools through the XML tool-call protocol.
pub struct McpXmlBridge {
    connector: Arc<dyn McpConnector>,
    state: BridgeState,
    catalog: Arc<McpCatalog>,
    call_timeout: Duration,
}

impl std::fmt::Debug for McpXmlBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpXmlBridge")
            .field("state", &self.state)
            .field("catalog", &self.catalog)
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl McpXmlBridge {
    /// Creates an uninitialized bridge using `connector`.
    #[must_use]
    pub fn new(connector: Arc<dyn McpConnector>) -> Self {
        Self {
            connector,
            state: BridgeState::Uninitialized,
            catalog: Arc::new(McpCatalog::default()),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Sets the per-call time budget.
    #[must_use]
    pub const fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> BridgeState {
        self.state
    }

    /// Snapshot of the current catalog.
    #[must_use]
    pub fn catalog(&self) -> Arc<McpCatalog> {
        Arc::clone(&self.catalog)
    }

    /// Connects to the enabled servers in `config`.
    pub async fn initialize_from_config(&mut self, config: &McpConfig) -> BridgeState {
        self.initialize(&config.enabled_servers()).await
    }

    /// Connects to `servers` and rebuilds the catalog.
    ///
    /// Any previous connection is closed first. Disabled servers are
    /// ignored; with nothing to connect the bridge is `Ready` with zero
    /// tools. A connection failure is logged and leaves the bridge `Failed`
    /// with zero tools.
    pub async fn initialize(&mut self, servers: &[McpServerConfig]) -> BridgeState {
        self.close_session().await;
        self.catalog = Arc::new(McpCatalog::default());
        self.state = BridgeState::Initializing;

        let enabled: Vec<McpServerConfig> = servers.iter().filter(|s| s.enabled).cloned().collect();
        if enabled.is_empty() {
            debug!("no enabled MCP servers configured");
            self.state = BridgeState::Ready;
            return self.state;
        }

        match self.connector.connect(&enabled).await {
            Ok(connection) => {
                let mut tools = IndexMap::new();
                let mut xml_docs = IndexMap::new();
                for tool in connection.tools {
                    if tools.contains_key(&tool.name) {
                        warn!(tool = %tool.name, "duplicate MCP tool name, keeping the first");
                        continue;
                    }
                    xml_docs.insert(tool.name.clone(), mcp_xml_doc(&tool));
                    tools.insert(tool.name.clone(), tool);
                }
                info!(
                    servers = enabled.len(),
                    tools = tools.len(),
                    "MCP bridge ready"
                );
                self.catalog = Arc::new(McpCatalog {
                    tools,
                    xml_docs,
                    session: Some(connection.session),
                });
                self.state = BridgeState::Ready;
            }
            Err(e) => {
                warn!(error = %e, "MCP initialization failed, continuing without MCP tools");
                self.state = BridgeState::Failed;
            }
        }

        self.state
    }

    /// XML documentation of every MCP tool, blank-line separated.
    #[must_use]
    pub fn xml_tool_definitions(&self) -> String {
        self.catalog
            .xml_docs
            .values()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Whether `name` is in the current catalog.
    #[must_use]
    pub fn is_mcp_tool(&self, name: &str) -> bool {
        self.catalog.tools.contains_key(name)
    }

    /// Tool names in catalog order.
    #[must_use]
    pub fn tool_names(&self) -> Vec<String> {
        self.catalog.tools.keys().cloned().collect()
    }

    /// Number of tools in the catalog.
    #[must_use]
    pub fn tool_count(&self) -> usize {
        self.catalog.tools.len()
    }

    /// Parses an MCP call from `xml` and executes it.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NoToolCall`] when `xml` holds no call to a
    /// known tool and [`BridgeError::Cancelled`] when `cancel` fires.
    /// Tool failures are reported in the outcome instead.
    pub async fn execute_from_xml(
        &self,
        xml: &str,
        cancel: &CancellationToken,
    ) -> Result<McpToolOutcome, BridgeError> {
        let call = parser::parse_mcp_tool_call(xml, &self.tool_names())
            .ok_or(BridgeError::NoToolCall)?;
        self.execute_call(&call, cancel).await
    }

    /// Executes an already parsed call.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::UnknownTool`] when the tool is not in the
    /// current catalog and [`BridgeError::Cancelled`] when `cancel` fires.
    pub async fn execute_call(
        &self,
        call: &ParsedToolCall,
        cancel: &CancellationToken,
    ) -> Result<McpToolOutcome, BridgeError> {
        let catalog = self.catalog();
        if !catalog.tools.contains_key(&call.tool_name) {
            return Err(BridgeError::UnknownTool {
                name: call.tool_name.clone(),
            });
        }
        let Some(session) = catalog.session.as_ref() else {
            return Ok(McpToolOutcome::failed(
                &call.tool_name,
                "MCP session is not connected".to_string(),
            ));
        };

        debug!(tool = %call.tool_name, "calling MCP tool");
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(BridgeError::Cancelled),
            result = tokio::time::timeout(
                self.call_timeout,
                session.call_tool(&call.tool_name, call.params.clone()),
            ) => match result {
                Ok(Ok(text)) => McpToolOutcome::ok(&call.tool_name, text),
                Ok(Err(e)) => McpToolOutcome::failed(&call.tool_name, e.to_string()),
                Err(_) => McpToolOutcome::failed(
                    &call.tool_name,
                    format!("timed out after {}s", self.call_timeout.as_secs()),
                ),
            },
        };

        debug!(tool = %call.tool_name, success = outcome.success, "MCP tool finished");
        Ok(outcome)
    }

    /// Closes every connection and empties the catalog. Idempotent.
    pub async fn cleanup(&mut self) {
        self.close_session().await;
        self.catalog = Arc::new(McpCatalog::default());
        self.state = BridgeState::Uninitialized;
    }

    async fn close_session(&self) {
        if let Some(session) = self.catalog.session.as_ref() {
            session.close().await;
        }
    }
}

/// Parses a tool call, native names first, then the bridge's MCP tools.
///
/// A name that is both native and MCP resolves to the native tool.
#[must_use]
pub fn parse_hybrid_xml_tool_call<S: AsRef<str>>(
    text: &str,
    native_names: &[S],
    bridge: Option<&McpXmlBridge>,
) -> Option<ParsedToolCall> {
    let mcp_names = bridge.map(McpXmlBridge::tool_names).unwrap_or_default();
    parser::parse_hybrid_tool_call(text, native_names, &mcp_names)
}

/// Builds the system prompt: base, native tools, MCP tools, usage.
#[must_use]
pub fn create_hybrid_system_message(
    base: &str,
    native_tools: &[ToolDefinition],
    bridge: Option<&McpXmlBridge>,
) -> String {
    let mut message = base.trim_end().to_string();

    if !native_tools.is_empty() {
        let docs: Vec<String> = native_tools.iter().map(native_xml_doc).collect();
        message.push_str("\n\n=== NATIVE TOOLS ===\n\n");
        message.push_str(&docs.join("\n\n"));
    }

    if let Some(bridge) = bridge.filter(|b| b.tool_count() > 0) {
        message.push_str("\n\n=== MCP TOOLS ===\n\n");
        message.push_str(&bridge.xml_tool_definitions());
    }

    message.push_str("\n\n=== TOOL USAGE INSTRUCTIONS ===\n\n");
    message.push_str(TOOL_USAGE_INSTRUCTIONS);
    message
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::{Map, Value, json};

    use crate::agent::tool::probe_tool_definitions;
    use crate::error::McpError;
    use crate::mcp::connector::McpConnection;

    #[derive(Default)]
    struct MockSession {
        calls: Mutex<Vec<(String, Map<String, Value>)>>,
        closed: AtomicUsize,
        hang: bool,
    }

    #[async_trait]
    impl McpSession for MockSession {
        async fn call_tool(
            &self,
            name: &str,
            arguments: Map<String, Value>,
        ) -> Result<String, McpError> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            self.calls
                .lock()
                .unwrap_or_else(|e| panic!("lock: {e}"))
                .push((name.to_string(), arguments));
            if name == "broken" {
                return Err(McpError::ToolCall {
                    name: name.to_string(),
                    message: "server exploded".to_string(),
                });
            }
            Ok(format!("{name} ok"))
        }

        async fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct MockConnector {
        catalogs: Mutex<Vec<Vec<&'static str>>>,
        session: Arc<MockSession>,
        fail: bool,
    }

    impl MockConnector {
        fn new(catalogs: Vec<Vec<&'static str>>) -> Self {
            Self {
                catalogs: Mutex::new(catalogs),
                session: Arc::new(MockSession::default()),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl McpConnector for MockConnector {
        async fn connect(&self, servers: &[McpServerConfig]) -> Result<McpConnection, McpError> {
            if self.fail {
                return Err(McpError::NoServersConnected {
                    attempted: servers.len(),
                });
            }
            let names = self
                .catalogs
                .lock()
                .unwrap_or_else(|e| panic!("lock: {e}"))
                .remove(0);
            let tools = names
                .into_iter()
                .map(|name| {
                    ToolDefinition::new(
                        name,
                        format!("{name} tool"),
                        json!({
                            "type": "object",
                            "properties": {"query": {"type": "string", "description": "Query"}},
                            "required": ["query"]
                        }),
                    )
                })
                .collect();
            Ok(McpConnection {
                tools,
                session: self.session.clone(),
            })
        }
    }

    fn servers() -> Vec<McpServerConfig> {
        vec![McpServerConfig::stdio("test", "mcp-test", Vec::new())]
    }

    async fn ready_bridge(names: Vec<&'static str>) -> (McpXmlBridge, Arc<MockSession>) {
        let connector = Arc::new(MockConnector::new(vec![names]));
        let session = connector.session.clone();
        let mut bridge = McpXmlBridge::new(connector);
        assert_eq!(bridge.initialize(&servers()).await, BridgeState::Ready);
        (bridge, session)
    }

    #[tokio::test]
    async fn test_initialize_builds_docs_in_order() {
        let (bridge, _) = ready_bridge(vec!["probe_search_code", "fetch"]).await;
        assert_eq!(bridge.tool_names(), vec!["probe_search_code", "fetch"]);
        let docs = bridge.xml_tool_definitions();
        let first = docs.find("## probe_search_code").unwrap_or(usize::MAX);
        let second = docs.find("## fetch").unwrap_or(usize::MAX);
        assert!(first < second && second != usize::MAX);
        assert!(docs.contains("\n\n## fetch"));
        assert!(docs.contains("- query: (string, required) Query"));
    }

    #[tokio::test]
    async fn test_no_servers_is_ready_with_zero_tools() {
        let mut bridge = McpXmlBridge::new(Arc::new(MockConnector::new(Vec::new())));
        let mut disabled = servers();
        disabled[0].enabled = false;
        assert_eq!(bridge.initialize(&disabled).await, BridgeState::Ready);
        assert_eq!(bridge.tool_count(), 0);
        assert_eq!(bridge.xml_tool_definitions(), "");
    }

    #[tokio::test]
    async fn test_connection_failure_degrades() {
        let mut connector = MockConnector::new(Vec::new());
        connector.fail = true;
        let mut bridge = McpXmlBridge::new(Arc::new(connector));
        assert_eq!(bridge.initialize(&servers()).await, BridgeState::Failed);
        assert!(!bridge.is_mcp_tool("anything"));

        let result = bridge
            .execute_from_xml("<fetch><params>x</params></fetch>", &CancellationToken::new())
            .await;
        assert_eq!(result, Err(BridgeError::NoToolCall));
    }

    #[tokio::test]
    async fn test_reinitialize_replaces_catalog() {
        let connector = Arc::new(MockConnector::new(vec![vec!["old_tool"], vec!["new_tool"]]));
        let session = connector.session.clone();
        let mut bridge = McpXmlBridge::new(connector);

        bridge.initialize(&servers()).await;
        assert!(bridge.is_mcp_tool("old_tool"));

        bridge.initialize(&servers()).await;
        assert!(!bridge.is_mcp_tool("old_tool"));
        assert!(bridge.is_mcp_tool("new_tool"));
        assert_eq!(session.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_execute_from_xml_success() {
        let (bridge, session) = ready_bridge(vec!["probe_search_code"]).await;
        let outcome = bridge
            .execute_from_xml(
                r#"<probe_search_code><params>{"query":"X","max_results":2}</params></probe_search_code>"#,
                &CancellationToken::new(),
            )
            .await
            .unwrap_or_else(|e| panic!("execute failed: {e}"));

        assert!(outcome.success);
        assert_eq!(outcome.result.as_deref(), Some("probe_search_code ok"));
        let calls = session.calls.lock().unwrap_or_else(|e| panic!("lock: {e}"));
        assert_eq!(Value::Object(calls[0].1.clone()), json!({"query": "X", "max_results": 2}));
    }

    #[tokio::test]
    async fn test_tool_failure_is_captured() {
        let (bridge, _) = ready_bridge(vec!["broken"]).await;
        let outcome = bridge
            .execute_from_xml("<broken><params>x</params></broken>", &CancellationToken::new())
            .await
            .unwrap_or_else(|e| panic!("execute failed: {e}"));
        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap_or_default().contains("server exploded"));
    }

    #[tokio::test]
    async fn test_no_call_and_unknown_tool() {
        let (bridge, _) = ready_bridge(vec!["fetch"]).await;
        let cancel = CancellationToken::new();
        assert_eq!(
            bridge.execute_from_xml("just text", &cancel).await,
            Err(BridgeError::NoToolCall)
        );

        let call = ParsedToolCall {
            tool_name: "ghost".to_string(),
            params: Map::new(),
            kind: crate::agent::parser::ToolCallKind::Mcp,
        };
        assert_eq!(
            bridge.execute_call(&call, &cancel).await,
            Err(BridgeError::UnknownTool {
                name: "ghost".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_cancellation_propagates() {
        let session = Arc::new(MockSession {
            hang: true,
            ..MockSession::default()
        });
        let connector = MockConnector {
            catalogs: Mutex::new(vec![vec!["slow"]]),
            session,
            fail: false,
        };
        let mut bridge = McpXmlBridge::new(Arc::new(connector));
        bridge.initialize(&servers()).await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let result = bridge
            .execute_from_xml("<slow><params>x</params></slow>", &cancel)
            .await;
        assert_eq!(result, Err(BridgeError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timeout_is_failed_outcome() {
        let session = Arc::new(MockSession {
            hang: true,
            ..MockSession::default()
        });
        let connector = MockConnector {
            catalogs: Mutex::new(vec![vec!["slow"]]),
            session,
            fail: false,
        };
        let mut bridge =
            McpXmlBridge::new(Arc::new(connector)).with_call_timeout(Duration::from_secs(1));
        bridge.initialize(&servers()).await;

        let outcome = bridge
            .execute_from_xml("<slow><params>x</params></slow>", &CancellationToken::new())
            .await
            .unwrap_or_else(|e| panic!("execute failed: {e}"));
        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap_or_default().contains("timed out"));
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let (mut bridge, session) = ready_bridge(vec!["fetch"]).await;
        bridge.cleanup().await;
        bridge.cleanup().await;
        assert_eq!(bridge.state(), BridgeState::Uninitialized);
        assert_eq!(bridge.tool_count(), 0);
        assert_eq!(session.closed.load(Ordering::SeqCst), 1);

        let mut never = McpXmlBridge::new(Arc::new(MockConnector::new(Vec::new())));
        never.cleanup().await;
    }

    #[tokio::test]
    async fn test_hybrid_parse_prefers_native() {
        let (bridge, _) = ready_bridge(vec!["search", "fetch"]).await;
        let call = parse_hybrid_xml_tool_call(
            "<search><query>X</query></search>",
            &["search"],
            Some(&bridge),
        )
        .unwrap_or_else(|| panic!("expected a call"));
        assert_eq!(call.kind, crate::agent::parser::ToolCallKind::Native);

        let call = parse_hybrid_xml_tool_call(
            "<fetch><params>{\"query\":\"y\"}</params></fetch>",
            &["search"],
            Some(&bridge),
        )
        .unwrap_or_else(|| panic!("expected a call"));
        assert_eq!(call.kind, crate::agent::parser::ToolCallKind::Mcp);
    }

    #[tokio::test]
    async fn test_hybrid_system_message_sections() {
        let (bridge, _) = ready_bridge(vec!["fetch"]).await;
        let message =
            create_hybrid_system_message("BASE", &probe_tool_definitions(), Some(&bridge));

        let native = message.find("=== NATIVE TOOLS ===").unwrap_or(usize::MAX);
        let mcp = message.find("=== MCP TOOLS ===").unwrap_or(usize::MAX);
        let usage = message.find("=== TOOL USAGE INSTRUCTIONS ===").unwrap_or(usize::MAX);
        assert!(message.starts_with("BASE\n\n"));
        assert!(native < mcp && mcp < usage && usage != usize::MAX);

        let bare = create_hybrid_system_message("BASE", &[], None);
        assert!(!bare.contains("=== NATIVE TOOLS ==="));
        assert!(!bare.contains("=== MCP TOOLS ==="));
        assert!(bare.contains("=== TOOL USAGE INSTRUCTIONS ==="));
    }
}
