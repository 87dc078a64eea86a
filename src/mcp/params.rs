//! MCP tool parameter types.
//!
//! Defines the input schemas for the probe MCP tools using `schemars` for
//! the JSON Schema generation required by the MCP protocol. Each type maps
//! onto the parameters of the matching native tool.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Parameters for the `search_code` MCP tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchCodeParams {
    /// Search query with Elasticsearch-style operators (AND, OR, quotes, -exclusions).
    pub query: String,

    /// Directory to search in. Defaults to the server's working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Match the query literally.
    #[serde(default)]
    pub exact: bool,

    /// Include test files in results.
    #[serde(default)]
    pub allow_tests: bool,

    /// Return file names only.
    #[serde(default)]
    pub files_only: bool,

    /// Maximum number of results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<u64>,

    /// Token budget for the returned code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
}

/// Parameters for the `query_code` MCP tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QueryCodeParams {
    /// ast-grep pattern, e.g. `fn $NAME($$$PARAMS)`.
    pub pattern: String,

    /// Directory to search in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Language of the pattern, e.g. `rust` or `python`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Include test files in results.
    #[serde(default)]
    pub allow_tests: bool,

    /// Maximum number of results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<u64>,
}

/// Parameters for the `extract_code` MCP tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExtractCodeParams {
    /// Space-separated targets: `file`, `file:line`, `file:start-end` or `file#symbol`.
    pub targets: String,

    /// Lines of context around line targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_lines: Option<u64>,

    /// Allow extracting from test files.
    #[serde(default)]
    pub allow_tests: bool,
}

/// Converts typed parameters into the map the native executor expects.
pub(crate) fn to_tool_params<T: Serialize>(params: &T) -> Map<String, Value> {
    match serde_json::to_value(params) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_fields_are_omitted() {
        let params: SearchCodeParams = serde_json::from_str(r#"{"query": "retry"}"#)
            .unwrap_or_else(|e| panic!("parse failed: {e}"));
        let map = to_tool_params(&params);
        assert_eq!(map.get("query"), Some(&Value::from("retry")));
        assert!(!map.contains_key("path"));
        assert_eq!(map.get("exact"), Some(&Value::Bool(false)));
    }

    #[test]
    fn test_extract_requires_targets() {
        let parsed = serde_json::from_str::<ExtractCodeParams>("{}");
        assert!(parsed.is_err());
    }
}
