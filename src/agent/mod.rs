//! Agentic code-search chat.
//!
//! An LLM answers questions about a codebase by calling tools through a
//! textual XML protocol. Native tools run the `probe` CLI; MCP tools are
//! reached through [`crate::mcp::McpXmlBridge`]. LLM calls go through a
//! [`RetryManager`] with exponential backoff.
//!
//! # Architecture
//!
//! ```text
//! User message → AgentLoop
//!   ├── System prompt (base + native docs + MCP docs + usage)
//!   ├── LlmProvider (via RetryManager)
//!   ├── Parser (completion → native → MCP)
//!   │   ├── NativeToolExecutor → probe CLI
//!   │   └── McpXmlBridge → MCP servers
//!   └── ConversationHistory (bounded, session id)
//! ```

pub mod agentic_loop;
pub mod client;
pub mod config;
pub mod executor;
pub mod history;
pub mod message;
pub mod parser;
pub mod prompt;
pub mod provider;
pub mod providers;
pub mod retry;
pub mod tool;

// Re-export key types
pub use agentic_loop::{AgentAnswer, AgentLoop};
pub use client::{ProviderKind, create_provider};
pub use config::AgentConfig;
pub use executor::{NativeToolExecutor, ProbeToolExecutor, ToolContext};
pub use history::ConversationHistory;
pub use message::{ChatMessage, ChatRequest, ChatResponse, Role, TokenUsage};
pub use parser::{ParsedToolCall, ToolCallKind};
pub use provider::LlmProvider;
pub use retry::{RetryContext, RetryError, RetryManager, RetryOptions, RetryStats};
pub use tool::{ToolCall, ToolDefinition};
