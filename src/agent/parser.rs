//! Tool-call extraction from LLM output.
//!
//! The model calls tools by writing tags into its reply:
//!
//! ```text
//! <search><query>X</query><path>Y</path></search>                 native
//! <probe_search_code><params>{"query":"X"}</params></probe_search_code>  MCP
//! ```
//!
//! Parsing is a permissive scanner rather than an XML parser: the model's
//! output is often malformed, and only the first matching tool tag counts.

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

/// Tag holding a JSON (or plain text) argument block for MCP tools.
const PARAMS_TAG: &str = "params";
const THINKING_OPEN: &str = "<thinking>";
const THINKING_CLOSE: &str = "</thinking>";

/// Where a parsed tool call should be dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallKind {
    /// A natively implemented tool with XML parameters.
    Native,
    /// A tool served by an MCP server with JSON parameters.
    Mcp,
}

/// A tool call found in model output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedToolCall {
    /// Tool name (the tag name).
    pub tool_name: String,
    /// Decoded parameters. Native values are always strings.
    pub params: Map<String, Value>,
    /// Dispatch target.
    pub kind: ToolCallKind,
}

impl ParsedToolCall {
    /// Returns a parameter rendered as text.
    ///
    /// Strings are returned as-is; other JSON values use their compact form.
    #[must_use]
    pub fn param_text(&self, key: &str) -> Option<String> {
        self.params.get(key).map(value_text)
    }
}

/// Renders a JSON value as plain text.
pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Removes every closed `<thinking>...</thinking>` block.
#[must_use]
pub fn strip_thinking(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(THINKING_OPEN) {
        let after_open = &rest[start + THINKING_OPEN.len()..];
        let Some(end) = after_open.find(THINKING_CLOSE) else {
            break;
        };
        out.push_str(&rest[..start]);
        rest = &after_open[end + THINKING_CLOSE.len()..];
    }
    out.push_str(rest);
    out
}

/// Returns the text between `<name>` and the first `</name>` after it.
#[must_use]
pub fn find_tool_block<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    let open = format!("<{name}>");
    let close = format!("</{name}>");
    let start = text.find(&open)? + open.len();
    let len = text[start..].find(&close)?;
    Some(&text[start..start + len])
}

/// Extracts `<tag>value</tag>` pairs from `content`.
///
/// Tag names are word characters; each pair's close tag is the first
/// matching `</tag>` after it and the whole pair is consumed, so inner tags
/// of a matched pair are not reported separately. Values are trimmed, later
/// duplicates win, and the `params` tag is ignored.
#[must_use]
pub fn extract_xml_params(content: &str) -> Map<String, Value> {
    let mut params = Map::new();
    let mut rest = content;

    while let Some(lt) = rest.find('<') {
        let after = &rest[lt + 1..];
        let name_len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        if name_len == 0 || !after[name_len..].starts_with('>') {
            rest = after;
            continue;
        }

        let name = &after[..name_len];
        let body = &after[name_len + 1..];
        let close = format!("</{name}>");
        match body.find(&close) {
            Some(end) => {
                if name != PARAMS_TAG {
                    params.insert(
                        name.to_string(),
                        Value::String(body[..end].trim().to_string()),
                    );
                }
                rest = &body[end + close.len()..];
            }
            None => rest = body,
        }
    }

    params
}

/// Finds a native tool call among `tool_names`, tried in the given order.
///
/// A tag with no extractable parameters does not count as a call, so a bare
/// mention such as `<search></search>` is skipped.
#[must_use]
pub fn parse_native_tool_call<S: AsRef<str>>(
    text: &str,
    tool_names: &[S],
) -> Option<ParsedToolCall> {
    tool_names.iter().find_map(|name| {
        let name = name.as_ref();
        let params = extract_xml_params(find_tool_block(text, name)?);
        if params.is_empty() {
            return None;
        }
        Some(ParsedToolCall {
            tool_name: name.to_string(),
            params,
            kind: ToolCallKind::Native,
        })
    })
}

/// Finds an MCP tool call among `tool_names`, ignoring `<thinking>` blocks.
///
/// Parameters come from a `<params>` block (a JSON object, or
/// `{"value": text}` for anything else) or, when there is no such block,
/// from per-tag XML extraction. Zero parameters are allowed.
#[must_use]
pub fn parse_mcp_tool_call<S: AsRef<str>>(text: &str, tool_names: &[S]) -> Option<ParsedToolCall> {
    let cleaned = strip_thinking(text);
    tool_names.iter().find_map(|name| {
        let name = name.as_ref();
        let inner = find_tool_block(&cleaned, name)?;
        Some(ParsedToolCall {
            tool_name: name.to_string(),
            params: decode_mcp_params(inner),
            kind: ToolCallKind::Mcp,
        })
    })
}

/// Native names first, then MCP names, both after stripping `<thinking>`.
///
/// A name present in both lists resolves to the native tool.
#[must_use]
pub fn parse_hybrid_tool_call<N: AsRef<str>, M: AsRef<str>>(
    text: &str,
    native_names: &[N],
    mcp_names: &[M],
) -> Option<ParsedToolCall> {
    let cleaned = strip_thinking(text);
    parse_native_tool_call(&cleaned, native_names)
        .or_else(|| parse_mcp_tool_call(&cleaned, mcp_names))
}

fn decode_mcp_params(inner: &str) -> Map<String, Value> {
    let Some(raw) = find_tool_block(inner, PARAMS_TAG) else {
        return extract_xml_params(inner);
    };

    let content = raw.trim();
    if content.starts_with('{') {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(content) {
            return map;
        }
    }

    let mut params = Map::new();
    params.insert("value".to_string(), Value::String(content.to_string()));
    params
}

/// Removes complete `<name>...</name>` blocks for every given tool name.
///
/// Used to clean a reply that is returned to the user as plain text.
#[must_use]
pub fn strip_tool_blocks<S: AsRef<str>>(text: &str, tool_names: &[S]) -> String {
    let mut cleaned = strip_thinking(text);
    for name in tool_names {
        let escaped = regex::escape(name.as_ref());
        if let Ok(re) = Regex::new(&format!(r"(?s)<{escaped}>.*?</{escaped}>")) {
            cleaned = re.replace_all(&cleaned, "").into_owned();
        }
    }
    cleaned.trim().to_string()
}
