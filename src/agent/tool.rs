//! Tool definitions and their XML usage documentation.
//!
//! Every tool, native or MCP, is described by a [`ToolDefinition`] with a
//! JSON Schema. The model is taught the textual calling convention through
//! documentation blocks rendered from that schema.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Name of the completion tool.
pub const ATTEMPT_COMPLETION: &str = "attempt_completion";
/// Shorthand completion marker: the previous reply is the answer.
pub const ATTEMPT_COMPLETE: &str = "attempt_complete";

/// A tool that can be offered to an LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name, also used as the XML tag.
    pub name: String,
    /// Human-readable description of what the tool does.
    pub description: String,
    /// JSON Schema object describing the tool's parameters.
    pub input_schema: Value,
}

impl ToolDefinition {
    /// Creates a definition.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    /// Names of required parameters, in schema order.
    #[must_use]
    pub fn required(&self) -> Vec<&str> {
        self.input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    fn properties(&self) -> Option<&Map<String, Value>> {
        self.input_schema.get("properties").and_then(Value::as_object)
    }
}

/// A structured tool call returned by a provider's function-calling API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier assigned by the provider.
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// JSON-encoded arguments.
    pub arguments: String,
}

/// Renders the documentation block for a native tool (one tag per parameter).
#[must_use]
pub fn native_xml_doc(def: &ToolDefinition) -> String {
    let mut doc = doc_header(def);
    doc.push_str("Usage:\n");
    doc.push_str(&format!("<{}>\n", def.name));
    if let Some(props) = def.properties() {
        for name in props.keys() {
            doc.push_str(&format!("<{name}>value</{name}>\n"));
        }
    }
    doc.push_str(&format!("</{}>", def.name));
    doc
}

/// Renders the documentation block for an MCP tool (one JSON `<params>` block).
#[must_use]
pub fn mcp_xml_doc(def: &ToolDefinition) -> String {
    let mut doc = doc_header(def);
    doc.push_str("Usage:\n");
    doc.push_str(&format!("<{}>\n", def.name));
    doc.push_str(&format!(
        "<params>\n{}\n</params>\n",
        Value::Object(example_arguments(def))
    ));
    doc.push_str(&format!("</{}>", def.name));
    doc
}

fn doc_header(def: &ToolDefinition) -> String {
    let mut doc = format!("## {}\n", def.name);
    if !def.description.is_empty() {
        doc.push_str(&format!("Description: {}\n", def.description.trim()));
    }

    let required = def.required();
    let Some(props) = def.properties().filter(|p| !p.is_empty()) else {
        doc.push_str("Parameters: none\n");
        return doc;
    };

    doc.push_str("Parameters:\n");
    for (name, prop) in props {
        let kind = prop.get("type").and_then(Value::as_str).unwrap_or("any");
        let presence = if required.contains(&name.as_str()) {
            "required"
        } else {
            "optional"
        };
        doc.push_str(&format!("- {name}: ({kind}, {presence})"));
        if let Some(desc) = prop.get("description").and_then(Value::as_str) {
            doc.push(' ');
            doc.push_str(desc.trim());
        }
        if let Some(choices) = prop.get("enum").and_then(Value::as_array) {
            let list: Vec<String> = choices.iter().map(|c| c.to_string()).collect();
            doc.push_str(&format!(" Choices: {}", list.join(", ")));
        }
        doc.push('\n');
    }
    doc
}

/// Placeholder arguments for the usage example: required parameters, or
/// every parameter when none are required.
fn example_arguments(def: &ToolDefinition) -> Map<String, Value> {
    let required = def.required();
    let mut example = Map::new();
    let Some(props) = def.properties() else {
        return example;
    };
    for (name, prop) in props {
        if !required.is_empty() && !required.contains(&name.as_str()) {
            continue;
        }
        let placeholder = match prop.get("type").and_then(Value::as_str) {
            Some("integer" | "number") => json!(0),
            Some("boolean") => json!(false),
            Some("array") => json!([]),
            Some("object") => json!({}),
            _ => json!("value"),
        };
        example.insert(name.clone(), placeholder);
    }
    example
}

/// Definitions of the native probe tools.
#[must_use]
pub fn probe_tool_definitions() -> Vec<ToolDefinition> {
    vec![def_search(), def_query(), def_extract()]
}

/// Definition of the completion tool.
#[must_use]
pub fn completion_tool_definition() -> ToolDefinition {
    ToolDefinition::new(
        ATTEMPT_COMPLETION,
        "Signal that the task is finished and give the final answer. Use only once all \
         needed information has been gathered.",
        json!({
            "type": "object",
            "properties": {
                "result": {
                    "type": "string",
                    "description": "The final answer for the user."
                }
            },
            "required": ["result"]
        }),
    )
}

fn def_search() -> ToolDefinition {
    ToolDefinition::new(
        "search",
        "Search code in the repository with Elasticsearch-style queries (AND, OR, quotes, \
         -exclusions). Returns matching code blocks ranked by relevance.",
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query, e.g. \"error AND handling\"."
                },
                "path": {
                    "type": "string",
                    "description": "Directory to search in. Defaults to the project root."
                },
                "exact": {
                    "type": "boolean",
                    "description": "Match the query literally, without stemming or splitting."
                },
                "allow_tests": {
                    "type": "boolean",
                    "description": "Include test files in results."
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of results."
                },
                "max_tokens": {
                    "type": "integer",
                    "description": "Maximum tokens of code returned."
                },
                "files_only": {
                    "type": "boolean",
                    "description": "Return matching file paths only."
                }
            },
            "required": ["query"]
        }),
    )
}

fn def_query() -> ToolDefinition {
    ToolDefinition::new(
        "query",
        "Search code structurally with ast-grep patterns such as `fn $NAME($$$PARAMS)`.",
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "ast-grep pattern."
                },
                "path": {
                    "type": "string",
                    "description": "Directory to search in. Defaults to the project root."
                },
                "language": {
                    "type": "string",
                    "description": "Language of the pattern.",
                    "enum": ["rust", "javascript", "typescript", "python", "go", "c", "cpp", "java", "ruby", "php", "swift", "csharp"]
                },
                "allow_tests": {
                    "type": "boolean",
                    "description": "Include test files in results."
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of results."
                }
            },
            "required": ["pattern"]
        }),
    )
}

fn def_extract() -> ToolDefinition {
    ToolDefinition::new(
        "extract",
        "Extract code blocks from files. Targets are file paths, optionally with a line \
         (`src/main.rs:42`), a range (`src/main.rs:10-20`) or a symbol (`src/main.rs#main`), \
         separated by spaces.",
        json!({
            "type": "object",
            "properties": {
                "targets": {
                    "type": "string",
                    "description": "Space-separated extraction targets."
                },
                "context_lines": {
                    "type": "integer",
                    "description": "Lines of context around each target."
                },
                "allow_tests": {
                    "type": "boolean",
                    "description": "Allow extracting from test files."
                }
            },
            "required": ["targets"]
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_definitions_have_object_schemas() {
        for def in probe_tool_definitions() {
            assert!(!def.description.is_empty());
            assert_eq!(def.input_schema["type"], "object");
            assert_eq!(def.required().len(), 1);
        }
    }

    #[test]
    fn test_native_doc_lists_parameters() {
        let doc = native_xml_doc(&def_query());
        assert!(doc.starts_with("## query\n"));
        assert!(doc.contains("- pattern: (string, required)"));
        assert!(doc.contains("- path: (string, optional)"));
        assert!(doc.contains("Choices: \"rust\""));
        assert!(doc.contains("<pattern>value</pattern>"));
        assert!(doc.ends_with("</query>"));
    }

    #[test]
    fn test_mcp_doc_uses_params_block() {
        let def = ToolDefinition::new(
            "probe_search_code",
            "Search code",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "max_results": {"type": "integer"}
                },
                "required": ["query"]
            }),
        );
        let doc = mcp_xml_doc(&def);
        assert!(doc.contains("- max_results: (integer, optional)"));
        assert!(doc.contains("<params>\n{\"query\":\"value\"}\n</params>"));
    }

    #[test]
    fn test_doc_without_properties() {
        let def = ToolDefinition::new("ping", "", json!({"type": "object"}));
        let doc = mcp_xml_doc(&def);
        assert!(doc.contains("Parameters: none"));
        assert!(doc.contains("<params>\n{}\n</params>"));
    }
}
