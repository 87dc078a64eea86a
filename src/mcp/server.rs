//! MCP server exposing the probe code-search tools.
//!
//! Wraps [`ProbeToolExecutor`] so that other MCP clients, including this
//! crate's own bridge, can search, query and extract code. Tool failures are
//! returned as MCP tool errors rather than protocol errors.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo};
use rmcp::{ErrorData as McpError, ServerHandler, tool, tool_handler, tool_router};
use serde_json::{Map, Value};
use tracing::debug;

use super::params::{ExtractCodeParams, QueryCodeParams, SearchCodeParams, to_tool_params};
use crate::agent::executor::{NativeToolExecutor, ProbeToolExecutor, ToolContext};

/// Probe MCP server.
#[derive(Clone)]
pub struct ProbeMcpServer {
    tool_router: ToolRouter<Self>,
    executor: Arc<ProbeToolExecutor>,
    working_dir: PathBuf,
    session_id: String,
}

impl ProbeMcpServer {
    /// Creates a server running `executor` against `working_dir`.
    #[must_use]
    pub fn new(executor: ProbeToolExecutor, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            tool_router: Self::tool_router(),
            executor: Arc::new(executor),
            working_dir: working_dir.into(),
            session_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Directory searched when a call gives no path.
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    async fn run(&self, tool: &str, params: Map<String, Value>) -> CallToolResult {
        let ctx = ToolContext::new(self.session_id.clone(), self.working_dir.clone());
        debug!(tool, "MCP tool request");
        match self.executor.execute(tool, &params, &ctx).await {
            Ok(output) => CallToolResult::success(vec![Content::text(output)]),
            Err(e) => CallToolResult::error(vec![Content::text(format!("Error: {e}"))]),
        }
    }
}

#[tool_router]
impl ProbeMcpServer {
    /// Ranked code search.
    #[tool(
        name = "search_code",
        description = "Search code with Elasticsearch-style queries (AND, OR, quotes, -exclusions). Returns matching code blocks ranked by relevance, with file paths and line numbers."
    )]
    async fn search_code(
        &self,
        Parameters(params): Parameters<SearchCodeParams>,
    ) -> Result<CallToolResult, McpError> {
        Ok(self.run("search", to_tool_params(&params)).await)
    }

    /// Structural search.
    #[tool(
        name = "query_code",
        description = "Search code structurally with ast-grep patterns such as `fn $NAME($$$PARAMS)`. Use for finding specific code shapes rather than keywords."
    )]
    async fn query_code(
        &self,
        Parameters(params): Parameters<QueryCodeParams>,
    ) -> Result<CallToolResult, McpError> {
        Ok(self.run("query", to_tool_params(&params)).await)
    }

    /// Extraction of complete code blocks.
    #[tool(
        name = "extract_code",
        description = "Extract complete code blocks from files. Targets are space-separated: `file`, `file:line`, `file:start-end` or `file#symbol`."
    )]
    async fn extract_code(
        &self,
        Parameters(params): Parameters<ExtractCodeParams>,
    ) -> Result<CallToolResult, McpError> {
        Ok(self.run("extract", to_tool_params(&params)).await)
    }
}

#[tool_handler]
impl ServerHandler for ProbeMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Probe code search. Use `search_code` to locate code by keywords, `query_code` \
                 for structural ast-grep patterns and `extract_code` to read complete functions \
                 or files."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            ..Default::default()
        }
    }
}
