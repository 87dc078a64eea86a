//! MCP server configuration.
//!
//! Servers are declared in a JSON file under an `mcpServers` map:
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "probe": { "command": "probe-agent", "args": ["mcp", "serve"] },
//!     "remote": { "transport": "http", "url": "http://localhost:3000/mcp", "enabled": false }
//!   }
//! }
//! ```

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::McpError;

/// How a client reaches an MCP server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Child process speaking JSON-RPC over stdin/stdout.
    #[default]
    Stdio,
    /// Legacy server-sent events.
    Sse,
    /// Streamable HTTP.
    Http,
    /// WebSocket.
    #[serde(alias = "ws")]
    Websocket,
}

/// One configured MCP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Key of the server in `mcpServers`.
    #[serde(skip)]
    pub name: String,
    /// Executable for stdio servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Arguments for `command`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Extra environment for the child process.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub env: IndexMap<String, String>,
    /// Transport kind.
    #[serde(default)]
    pub transport: TransportKind,
    /// Endpoint for network transports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Disabled servers are ignored.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

const fn default_enabled() -> bool {
    true
}

impl McpServerConfig {
    /// A stdio server running `command` with `args`.
    #[must_use]
    pub fn stdio(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command: Some(command.into()),
            args,
            env: IndexMap::new(),
            transport: TransportKind::Stdio,
            url: None,
            enabled: true,
        }
    }
}

/// Parsed MCP configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpConfig {
    /// Servers keyed by name, in file order.
    #[serde(rename = "mcpServers", default)]
    pub servers: IndexMap<String, McpServerConfig>,
}

impl McpConfig {
    /// Parses configuration text. `path` is only used in error messages.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::ConfigParse`] when the JSON is invalid.
    pub fn from_json(text: &str, path: &Path) -> Result<Self, McpError> {
        let mut config: Self = serde_json::from_str(text).map_err(|source| McpError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        for (name, server) in &mut config.servers {
            server.name.clone_from(name);
        }
        Ok(config)
    }

    /// Reads and parses a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::ConfigRead`] or [`McpError::ConfigParse`].
    pub fn from_path(path: &Path) -> Result<Self, McpError> {
        let text = std::fs::read_to_string(path).map_err(|source| McpError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text, path)
    }

    /// Loads the first configuration found.
    ///
    /// An explicit path must exist. Otherwise `./.mcp/config.json`,
    /// `./mcp.config.json`, `~/.config/probe/mcp.json` and
    /// `~/.mcp/config.json` are tried in order; finding none yields an empty
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns [`McpError`] when a found file cannot be read or parsed.
    pub fn load(explicit: Option<&Path>) -> Result<Self, McpError> {
        if let Some(path) = explicit {
            return Self::from_path(path);
        }
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let home = dirs::home_dir();
        Self::load_from(&Self::search_paths(&cwd, home.as_deref()))
    }

    /// Default search locations relative to `cwd` and `home`.
    #[must_use]
    pub fn search_paths(cwd: &Path, home: Option<&Path>) -> Vec<PathBuf> {
        let mut paths = vec![cwd.join(".mcp").join("config.json"), cwd.join("mcp.config.json")];
        if let Some(home) = home {
            paths.push(home.join(".config").join("probe").join("mcp.json"));
            paths.push(home.join(".mcp").join("config.json"));
        }
        paths
    }

    /// Loads the first existing file among `paths`.
    ///
    /// # Errors
    ///
    /// Returns [`McpError`] when that file cannot be read or parsed.
    pub fn load_from(paths: &[PathBuf]) -> Result<Self, McpError> {
        for path in paths {
            if path.is_file() {
                debug!(path = %path.display(), "loading MCP config");
                return Self::from_path(path);
            }
        }
        debug!("no MCP config found");
        Ok(Self::default())
    }

    /// Enabled servers, in file order.
    #[must_use]
    pub fn enabled_servers(&self) -> Vec<McpServerConfig> {
        self.servers
            .values()
            .filter(|s| s.enabled)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "mcpServers": {
            "probe": { "command": "probe-agent", "args": ["mcp", "serve"], "env": {"RUST_LOG": "warn"} },
            "remote": { "transport": "http", "url": "http://localhost:3000/mcp", "enabled": false },
            "socket": { "transport": "ws", "url": "ws://localhost:9000" }
        }
    }"#;

    #[test]
    fn test_parse_servers_in_order() {
        let config = McpConfig::from_json(SAMPLE, Path::new("mcp.json"))
            .unwrap_or_else(|e| panic!("parse failed: {e}"));
        let names: Vec<&str> = config.servers.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["probe", "remote", "socket"]);

        let probe = &config.servers["probe"];
        assert_eq!(probe.name, "probe");
        assert_eq!(probe.transport, TransportKind::Stdio);
        assert_eq!(probe.args, vec!["mcp", "serve"]);
        assert_eq!(probe.env.get("RUST_LOG").map(String::as_str), Some("warn"));
        assert_eq!(config.servers["socket"].transport, TransportKind::Websocket);
    }

    #[test]
    fn test_enabled_servers_skip_disabled() {
        let config = McpConfig::from_json(SAMPLE, Path::new("mcp.json"))
            .unwrap_or_else(|e| panic!("parse failed: {e}"));
        let enabled: Vec<String> = config.enabled_servers().into_iter().map(|s| s.name).collect();
        assert_eq!(enabled, vec!["probe", "socket"]);
    }

    #[test]
    fn test_invalid_json_reports_path() {
        let err = McpConfig::from_json("{ nope", Path::new("/etc/mcp.json"))
            .err()
            .unwrap_or_else(|| panic!("expected error"));
        assert!(matches!(err, McpError::ConfigParse { .. }));
        assert!(err.to_string().contains("/etc/mcp.json"));
    }

    #[test]
    fn test_load_from_first_existing() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let paths = McpConfig::search_paths(dir.path(), None);
        assert_eq!(paths.len(), 2);

        let empty = McpConfig::load_from(&paths).unwrap_or_else(|e| panic!("load: {e}"));
        assert!(empty.servers.is_empty());

        std::fs::write(dir.path().join("mcp.config.json"), SAMPLE)
            .unwrap_or_else(|e| panic!("write: {e}"));
        let loaded = McpConfig::load_from(&paths).unwrap_or_else(|e| panic!("load: {e}"));
        assert_eq!(loaded.servers.len(), 3);
    }

    #[test]
    fn test_explicit_missing_path_is_error() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let result = McpConfig::load(Some(&dir.path().join("absent.json")));
        assert!(matches!(result, Err(McpError::ConfigRead { .. })));
    }

    #[test]
    fn test_home_paths_included() {
        let paths = McpConfig::search_paths(Path::new("/work"), Some(Path::new("/home/u")));
        assert_eq!(paths[2], PathBuf::from("/home/u/.config/probe/mcp.json"));
        assert_eq!(paths[3], PathBuf::from("/home/u/.mcp/config.json"));
    }
}
