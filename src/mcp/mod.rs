//! Model Context Protocol support.
//!
//! Two directions are covered:
//!
//! ```text
//! Agent loop
//!   ↓ <tool><params>{json}</params></tool>
//! McpXmlBridge ── McpConnector ── rmcp child-process clients → external servers
//!
//! MCP client
//!   ↓ search_code / query_code / extract_code
//! ProbeMcpServer ── ProbeToolExecutor → probe CLI
//! ```
//!
//! # Feature Gate
//!
//! The `rmcp` client and the server require the `mcp` feature (on by
//! default). Without it the bridge still works, with zero tools.

pub mod bridge;
#[cfg(feature = "mcp")]
pub mod client;
pub mod config;
pub mod connector;
#[cfg(feature = "mcp")]
pub mod params;
#[cfg(feature = "mcp")]
pub mod server;
#[cfg(feature = "mcp")]
pub mod transport;

pub use bridge::{
    BridgeState, McpToolOutcome, McpXmlBridge, create_hybrid_system_message,
    parse_hybrid_xml_tool_call,
};
pub use config::{McpConfig, McpServerConfig, TransportKind};
pub use connector::{McpConnection, McpConnector, McpSession, default_connector};
#[cfg(feature = "mcp")]
pub use server::ProbeMcpServer;
#[cfg(feature = "mcp")]
pub use transport::serve_stdio;
