//! Agentic tool-calling loop.
//!
//! Drives the LLM ↔ tool round-trip for one user turn over the textual XML
//! protocol: each reply is scanned for a completion marker or a native/MCP
//! tool call. Tool results are fed back as `<tool_result>` messages, replies
//! without a call get a reminder, and the last iteration carries a
//! final-turn warning.
//!
//! ```text
//! k = 1..=max (max = base + 4 with a schema)
//!   k == max → inject final-turn warning
//!   LLM (via RetryManager)
//!   ├── attempt_completion → validate (schema) → done
//!   ├── <attempt_complete> → previous reply → done
//!   ├── native / MCP tool  → execute (not on the last turn) → <tool_result>
//!   └── nothing            → reminder
//! ```

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::AgentConfig;
use super::executor::{NativeToolExecutor, ToolContext};
use super::history::ConversationHistory;
use super::message::{
    ChatMessage, ChatRequest, Role, TokenUsage, assistant_message, system_message,
    tool_result_message, user_message,
};
use super::parser::{self, ParsedToolCall, ToolCallKind};
use super::prompt;
use super::provider::LlmProvider;
use super::retry::{RetryContext, RetryManager};
use super::tool::{ATTEMPT_COMPLETE, ATTEMPT_COMPLETION, ToolCall, completion_tool_definition};
use crate::error::{AgentError, BridgeError};
use crate::mcp::bridge::{McpXmlBridge, create_hybrid_system_message, parse_hybrid_xml_tool_call};

/// Outcome of one user turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentAnswer {
    /// Final answer, or partial progress when not completed.
    pub content: String,
    /// Whether the model finished with a completion marker.
    pub completed: bool,
    /// LLM calls made during the turn.
    pub iterations: u32,
    /// Session id of the conversation.
    pub session_id: String,
    /// Token usage summed over the turn.
    pub usage: TokenUsage,
}

/// What a model reply asks the loop to do.
#[derive(Debug)]
enum Step {
    Complete(String),
    Shorthand,
    Tool(ParsedToolCall),
    Nothing,
}

/// Runs user turns against an LLM with native and MCP tools.
pub struct AgentLoop {
    provider: Arc<dyn LlmProvider>,
    executor: Arc<dyn NativeToolExecutor>,
    bridge: Option<McpXmlBridge>,
    retry: RetryManager,
    config: AgentConfig,
    base_prompt: String,
}

impl std::fmt::Debug for AgentLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentLoop")
            .field("provider", &self.provider.name())
            .field("model", &self.provider.model())
            .field("bridge", &self.bridge)
            .field("max_iterations", &self.config.max_iterations)
            .finish_non_exhaustive()
    }
}

impl AgentLoop {
    /// Creates a loop without MCP tools, using the default system prompt.
    #[must_use]
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        executor: Arc<dyn NativeToolExecutor>,
        config: AgentConfig,
    ) -> Self {
        Self {
            provider,
            executor,
            bridge: None,
            retry: RetryManager::new(config.retry.clone()),
            config,
            base_prompt: prompt::SYSTEM_PROMPT.to_string(),
        }
    }

    /// Adds MCP tools through an initialized bridge.
    #[must_use]
    pub fn with_bridge(mut self, bridge: McpXmlBridge) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Replaces the base system prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.base_prompt = prompt.into();
        self
    }

    /// The MCP bridge, if any.
    #[must_use]
    pub const fn bridge(&self) -> Option<&McpXmlBridge> {
        self.bridge.as_ref()
    }

    /// Retry manager used for LLM calls.
    #[must_use]
    pub const fn retry_manager(&self) -> &RetryManager {
        &self.retry
    }

    /// Full system message: base prompt, native and MCP tool docs, usage
    /// instructions and, with a schema, the output requirement.
    #[must_use]
    pub fn system_message(&self, schema: Option<&str>) -> String {
        let mut native = self.executor.definitions();
        native.push(completion_tool_definition());
        let message = create_hybrid_system_message(&self.base_prompt, &native, self.bridge.as_ref());
        match schema {
            Some(schema) => prompt::with_schema_requirement(&message, schema),
            None => message,
        }
    }

    /// Runs one user turn.
    ///
    /// The user message and the final content are appended to `history`.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Cancelled`] when `cancel` fires, and provider
    /// errors that are not retryable or outlive the retry budget. Tool
    /// failures are reported to the model instead.
    pub async fn run(
        &self,
        history: &mut ConversationHistory,
        user_input: &str,
        schema: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<AgentAnswer, AgentError> {
        let max = self.config.effective_max_iterations(schema.is_some());
        let native_names = self.executor.tool_names();

        let mut messages: Vec<ChatMessage> = Vec::with_capacity(history.len() + 8);
        messages.push(system_message(&self.system_message(schema)));
        messages.extend_from_slice(history.messages());
        messages.push(user_message(user_input));

        let ctx = ToolContext {
            session_id: history.session_id().to_string(),
            working_dir: self.config.working_dir.clone(),
            cancel: cancel.clone(),
        };
        let retry_ctx = RetryContext::new()
            .with_provider(self.provider.name())
            .with_model(self.provider.model())
            .with_cancel(cancel.clone());

        let mut usage = TokenUsage::default();
        let mut previous: Option<String> = None;
        let mut iterations = 0;

        info!(session = %ctx.session_id, max_iterations = max, schema = schema.is_some(), "starting turn");

        for iteration in 1..=max {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            iterations = iteration;
            let terminal = iteration == max;
            if terminal {
                debug!(iteration, "injecting final-turn warning");
                messages.push(user_message(&prompt::terminal_warning(max)));
            }

            let request = ChatRequest {
                model: self.provider.model().to_string(),
                messages: messages.clone(),
                temperature: self.config.temperature,
                max_tokens: Some(self.config.max_tokens),
                tools: Vec::new(),
            };
            let provider = self.provider.as_ref();
            let request_ref = &request;
            let response = self
                .retry
                .execute_with_retry(move || provider.chat(request_ref), &retry_ctx)
                .await?;

            usage += response.usage;
            let text = response.content;
            messages.push(assistant_message(&text));

            let answer = match self.classify(&text, &response.tool_calls, &native_names) {
                Step::Complete(result) => Some(result),
                Step::Shorthand => {
                    Some(self.clean_reply(previous.as_deref().unwrap_or(&text), &native_names))
                }
                Step::Tool(call) => {
                    if terminal {
                        debug!(iteration, tool = %call.tool_name, "skipping tool call on the final turn");
                    } else {
                        let result = self.dispatch(&call, &ctx, cancel).await?;
                        messages.push(tool_result_message(&result));
                    }
                    None
                }
                Step::Nothing => {
                    if !terminal {
                        debug!(iteration, "no tool call found, injecting reminder");
                        messages.push(user_message(&prompt::missing_tool_reminder(schema, &text)));
                    }
                    None
                }
            };

            if let Some(result) = answer {
                match schema.map(|s| (s, validate_schema_result(&result, s))) {
                    Some((schema, Err(problem))) => {
                        debug!(iteration, %problem, "completion rejected by schema");
                        messages.push(user_message(&prompt::schema_correction(schema, &problem)));
                    }
                    _ => {
                        return Ok(Self::finish(history, user_input, result, true, iteration, usage));
                    }
                }
            }

            previous = Some(text);
        }

        warn!(iterations, "turn ended without completion");
        let partial = previous
            .map(|text| self.clean_reply(&text, &native_names))
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| prompt::out_of_turns_message(max));
        Ok(Self::finish(history, user_input, partial, false, iterations, usage))
    }

    /// Releases MCP connections.
    pub async fn shutdown(&mut self) {
        if let Some(bridge) = self.bridge.as_mut() {
            bridge.cleanup().await;
        }
    }

    fn classify(&self, text: &str, structured: &[ToolCall], native_names: &[String]) -> Step {
        let cleaned = parser::strip_thinking(text);

        if let Some(body) = parser::find_tool_block(&cleaned, ATTEMPT_COMPLETION) {
            // A bare body is the answer itself; an empty one defers to the previous reply.
            let result = match parser::extract_xml_params(body).get("result") {
                Some(value) => parser::value_text(value),
                None => body.to_string(),
            };
            let result = result.trim();
            if result.is_empty() && !body.contains("<result>") {
                return Step::Shorthand;
            }
            return Step::Complete(result.to_string());
        }
        if has_shorthand(&cleaned) {
            return Step::Shorthand;
        }
        if let Some(call) = parse_hybrid_xml_tool_call(&cleaned, native_names, self.bridge.as_ref()) {
            return Step::Tool(call);
        }

        let Some(call) = structured.first() else {
            return Step::Nothing;
        };
        let params = match serde_json::from_str::<Value>(&call.arguments) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        if call.name == ATTEMPT_COMPLETION {
            let result = params.get("result").map(parser::value_text).unwrap_or_default();
            return Step::Complete(result.trim().to_string());
        }
        let is_mcp = !native_names.contains(&call.name)
            && self.bridge.as_ref().is_some_and(|b| b.is_mcp_tool(&call.name));
        Step::Tool(ParsedToolCall {
            tool_name: call.name.clone(),
            params,
            kind: if is_mcp { ToolCallKind::Mcp } else { ToolCallKind::Native },
        })
    }

    async fn dispatch(
        &self,
        call: &ParsedToolCall,
        ctx: &ToolContext,
        cancel: &CancellationToken,
    ) -> Result<String, AgentError> {
        debug!(tool = %call.tool_name, kind = ?call.kind, "executing tool");
        match call.kind {
            ToolCallKind::Native => match self.executor.execute(&call.tool_name, &call.params, ctx).await {
                Ok(output) => Ok(output),
                Err(AgentError::Cancelled) => Err(AgentError::Cancelled),
                Err(e) => {
                    warn!(tool = %call.tool_name, error = %e, "tool failed");
                    Ok(prompt::tool_error(&e.to_string()))
                }
            },
            ToolCallKind::Mcp => {
                let Some(bridge) = self.bridge.as_ref() else {
                    return Ok(prompt::tool_error(&format!("unknown tool: {}", call.tool_name)));
                };
                match bridge.execute_call(call, cancel).await {
                    Ok(outcome) if outcome.success => Ok(outcome.result.unwrap_or_default()),
                    Ok(outcome) => {
                        warn!(tool = %call.tool_name, error = ?outcome.error, "MCP tool failed");
                        Ok(prompt::tool_error(&outcome.error.unwrap_or_default()))
                    }
                    Err(BridgeError::Cancelled) => Err(AgentError::Cancelled),
                    Err(e) => Ok(prompt::tool_error(&e.to_string())),
                }
            }
        }
    }

    fn clean_reply(&self, text: &str, native_names: &[String]) -> String {
        let mut names: Vec<String> = native_names.to_vec();
        names.push(ATTEMPT_COMPLETION.to_string());
        names.push(ATTEMPT_COMPLETE.to_string());
        if let Some(bridge) = self.bridge.as_ref() {
            names.extend(bridge.tool_names());
        }
        parser::strip_tool_blocks(text, &names)
    }

    fn finish(
        history: &mut ConversationHistory,
        user_input: &str,
        content: String,
        completed: bool,
        iterations: u32,
        usage: TokenUsage,
    ) -> AgentAnswer {
        history.push(Role::User, user_input);
        history.push(Role::Assistant, content.clone());
        info!(iterations, completed, total_tokens = usage.total_tokens, "turn finished");
        AgentAnswer {
            content,
            completed,
            iterations,
            session_id: history.session_id().to_string(),
            usage,
        }
    }
}

fn has_shorthand(text: &str) -> bool {
    ["<attempt_complete>", "<attempt_complete/>", "<attempt_complete />"]
        .iter()
        .any(|tag| text.contains(tag))
}

/// Checks a completion result against the schema's required top-level keys.
///
/// The result must be JSON (a surrounding code fence is tolerated). A schema
/// that is not JSON itself only enforces that.
///
/// # Errors
///
/// Returns a description of the problem, phrased for the model.
pub fn validate_schema_result(result: &str, schema: &str) -> Result<(), String> {
    let body = strip_code_fence(result);
    let value: Value =
        serde_json::from_str(body).map_err(|e| format!("the result is not valid JSON ({e})"))?;

    let keys = required_keys(schema);
    if keys.is_empty() {
        return Ok(());
    }
    let Some(object) = value.as_object() else {
        return Err("the result must be a JSON object".to_string());
    };
    let missing: Vec<&str> = keys
        .iter()
        .map(String::as_str)
        .filter(|k| !object.contains_key(*k))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(format!("missing required keys: {}", missing.join(", ")))
    }
}

fn required_keys(schema: &str) -> Vec<String> {
    serde_json::from_str::<Value>(schema)
        .ok()
        .and_then(|s| s.get("required").and_then(Value::as_array).cloned())
        .map(|keys| keys.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::agent::message::ChatResponse;
    use crate::agent::retry::RetryOptions;
    use crate::agent::tool::{ToolDefinition, probe_tool_definitions};
    use crate::error::McpError;
    use crate::mcp::config::McpServerConfig;
    use crate::mcp::connector::{McpConnection, McpConnector, McpSession};

    /// Replays scripted replies, then keeps answering with prose.
    struct ScriptedProvider {
        replies: Mutex<VecDeque<Result<ChatResponse, AgentError>>>,
        requests: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Result<ChatResponse, AgentError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn texts(replies: &[&str]) -> Arc<Self> {
            Self::new(replies.iter().map(|r| Ok(reply(r))).collect())
        }

        fn requests(&self) -> Vec<Vec<ChatMessage>> {
            self.requests
                .lock()
                .unwrap_or_else(|e| panic!("lock: {e}"))
                .clone()
        }
    }

    fn reply(text: &str) -> ChatResponse {
        ChatResponse {
            content: text.to_string(),
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
            ..ChatResponse::default()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted-model"
        }

        async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AgentError> {
            self.requests
                .lock()
                .unwrap_or_else(|e| panic!("lock: {e}"))
                .push(request.messages.clone());
            self.replies
                .lock()
                .unwrap_or_else(|e| panic!("lock: {e}"))
                .pop_front()
                .unwrap_or_else(|| Ok(reply("Still looking around.")))
        }
    }

    #[derive(Default)]
    struct RecordingExecutor {
        calls: Mutex<Vec<(String, Map<String, Value>)>>,
    }

    impl RecordingExecutor {
        fn calls(&self) -> Vec<(String, Map<String, Value>)> {
            self.calls.lock().unwrap_or_else(|e| panic!("lock: {e}")).clone()
        }
    }

    #[async_trait]
    impl NativeToolExecutor for RecordingExecutor {
        fn definitions(&self) -> Vec<ToolDefinition> {
            probe_tool_definitions()
        }

        async fn execute(
            &self,
            name: &str,
            params: &Map<String, Value>,
            _ctx: &ToolContext,
        ) -> Result<String, AgentError> {
            self.calls
                .lock()
                .unwrap_or_else(|e| panic!("lock: {e}"))
                .push((name.to_string(), params.clone()));
            match name {
                "search" => Ok("src/retry.rs:10 fn backoff()".to_string()),
                other => Err(AgentError::ToolExecution {
                    name: other.to_string(),
                    message: "probe exited with 1".to_string(),
                }),
            }
        }
    }

    struct EchoSession;

    #[async_trait]
    impl McpSession for EchoSession {
        async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<String, McpError> {
            Ok(format!("{name}: {}", Value::Object(arguments)))
        }

        async fn close(&self) {}
    }

    struct EchoConnector;

    #[async_trait]
    impl McpConnector for EchoConnector {
        async fn connect(&self, _servers: &[McpServerConfig]) -> Result<McpConnection, McpError> {
            Ok(McpConnection {
                tools: vec![ToolDefinition::new(
                    "fetch_url",
                    "Fetch a URL",
                    serde_json::json!({"type": "object", "properties": {"url": {"type": "string"}}}),
                )],
                session: Arc::new(EchoSession),
            })
        }
    }

    fn config(max_iterations: u32) -> AgentConfig {
        AgentConfig::builder()
            .api_key("test")
            .max_iterations(max_iterations)
            .retry(
                RetryOptions::builder()
                    .max_retries(2)
                    .initial_delay(Duration::ZERO)
                    .jitter(false)
                    .build(),
            )
            .build()
            .unwrap_or_else(|e| panic!("config: {e}"))
    }

    fn agent(provider: Arc<ScriptedProvider>, executor: Arc<RecordingExecutor>, max: u32) -> AgentLoop {
        AgentLoop::new(provider, executor, config(max))
    }

    async fn run(agent: &AgentLoop, schema: Option<&str>) -> (AgentAnswer, ConversationHistory) {
        let mut history = ConversationHistory::default();
        let answer = agent
            .run(&mut history, "How does retry work?", schema, &CancellationToken::new())
            .await
            .unwrap_or_else(|e| panic!("run failed: {e}"));
        (answer, history)
    }

    const SEARCH_CALL: &str = "<search>\n<query>retry backoff</query>\n</search>";
    const DONE: &str =
        "<attempt_completion>\n<result>Retries back off exponentially.</result>\n</attempt_completion>";

    fn last_user_text(messages: &[ChatMessage]) -> String {
        messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_completes_immediately() {
        let provider = ScriptedProvider::texts(&[DONE]);
        let agent = agent(provider, Arc::new(RecordingExecutor::default()), 30);
        let (answer, history) = run(&agent, None).await;

        assert!(answer.completed);
        assert_eq!(answer.content, "Retries back off exponentially.");
        assert_eq!(answer.iterations, 1);
        assert_eq!(answer.usage.total_tokens, 15);
        assert_eq!(history.len(), 2);
        assert_eq!(history.messages()[1].content, answer.content);
    }

    #[tokio::test]
    async fn test_native_tool_result_fed_back() {
        let provider = ScriptedProvider::texts(&[SEARCH_CALL, DONE]);
        let executor = Arc::new(RecordingExecutor::default());
        let agent = agent(provider.clone(), executor.clone(), 30);
        let (answer, _) = run(&agent, None).await;

        assert!(answer.completed);
        assert_eq!(answer.iterations, 2);
        assert_eq!(answer.usage.total_tokens, 30);
        let calls = executor.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "search");
        assert_eq!(calls[0].1.get("query"), Some(&Value::from("retry backoff")));

        let second = &provider.requests()[1];
        assert_eq!(
            last_user_text(second),
            "<tool_result>\nsrc/retry.rs:10 fn backoff()\n</tool_result>"
        );
    }

    #[tokio::test]
    async fn test_tool_failure_becomes_error_result() {
        let provider = ScriptedProvider::texts(&["<extract><targets>src/lib.rs</targets></extract>", DONE]);
        let agent = agent(provider.clone(), Arc::new(RecordingExecutor::default()), 30);
        let (answer, _) = run(&agent, None).await;

        assert!(answer.completed);
        let fed_back = last_user_text(&provider.requests()[1]);
        assert!(fed_back.starts_with("<tool_result>\nError: "));
        assert!(fed_back.contains("probe exited with 1"));
    }

    #[tokio::test]
    async fn test_reminder_after_prose_reply() {
        let provider = ScriptedProvider::texts(&["Let me think about it.", DONE]);
        let agent = agent(provider.clone(), Arc::new(RecordingExecutor::default()), 30);
        let (answer, _) = run(&agent, None).await;

        assert!(answer.completed);
        let reminder = last_user_text(&provider.requests()[1]);
        assert!(reminder.contains("did not contain a tool call"));
        assert!(reminder.contains("<attempt_complete></attempt_complete>"));
    }

    #[tokio::test]
    async fn test_shorthand_returns_previous_reply() {
        let provider = ScriptedProvider::texts(&[
            "Retries use exponential backoff with jitter.",
            "<attempt_complete></attempt_complete>",
        ]);
        let agent = agent(provider, Arc::new(RecordingExecutor::default()), 30);
        let (answer, _) = run(&agent, None).await;

        assert!(answer.completed);
        assert_eq!(answer.content, "Retries use exponential backoff with jitter.");
    }

    #[tokio::test]
    async fn test_thinking_blocks_are_ignored() {
        let provider = ScriptedProvider::texts(&[
            "<thinking>maybe <search><query>x</query></search></thinking>Answering now.",
            DONE,
        ]);
        let executor = Arc::new(RecordingExecutor::default());
        let agent = agent(provider, executor.clone(), 30);
        let (answer, _) = run(&agent, None).await;

        assert!(answer.completed);
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_schema_result_is_validated() {
        let schema = r#"{"type":"object","required":["summary"]}"#;
        let provider = ScriptedProvider::texts(&[
            "<attempt_completion><result>{\"other\": 1}</result></attempt_completion>",
            "<attempt_completion><result>{\"summary\": \"backoff\"}</result></attempt_completion>",
        ]);
        let agent = agent(provider.clone(), Arc::new(RecordingExecutor::default()), 30);
        let (answer, _) = run(&agent, Some(schema)).await;

        assert!(answer.completed);
        assert_eq!(answer.iterations, 2);
        assert_eq!(answer.content, "{\"summary\": \"backoff\"}");
        let correction = last_user_text(&provider.requests()[1]);
        assert!(correction.contains("missing required keys: summary"));

        let system = &provider.requests()[0][0];
        assert!(system.content.contains("must be valid JSON matching this schema"));
    }

    #[tokio::test]
    async fn test_completion_body_without_result_tag() {
        let provider = ScriptedProvider::texts(&[
            "<attempt_completion>\nRetries back off exponentially.\n</attempt_completion>",
        ]);
        let agent = agent(provider, Arc::new(RecordingExecutor::default()), 5);
        let (answer, _) = run(&agent, None).await;

        assert!(answer.completed);
        assert_eq!(answer.iterations, 1);
        assert_eq!(answer.content, "Retries back off exponentially.");
    }

    #[tokio::test]
    async fn test_empty_completion_body_returns_previous_reply() {
        let provider = ScriptedProvider::texts(&[
            "Retries use exponential backoff with jitter.",
            "<attempt_completion></attempt_completion>",
        ]);
        let agent = agent(provider, Arc::new(RecordingExecutor::default()), 5);
        let (answer, _) = run(&agent, None).await;

        assert!(answer.completed);
        assert_eq!(answer.iterations, 2);
        assert_eq!(answer.content, "Retries use exponential backoff with jitter.");
    }

    #[tokio::test]
    async fn test_schema_json_completion_body_without_result_tag() {
        let schema = r#"{"type":"object","required":["summary"]}"#;
        let provider = ScriptedProvider::texts(&[
            "<attempt_completion>{\"summary\": \"backoff\"}</attempt_completion>",
        ]);
        let agent = agent(provider, Arc::new(RecordingExecutor::default()), 5);
        let (answer, _) = run(&agent, Some(schema)).await;

        assert!(answer.completed);
        assert_eq!(answer.iterations, 1);
        assert_eq!(answer.content, "{\"summary\": \"backoff\"}");
    }

    #[tokio::test]
    async fn test_terminal_warning_at_extended_limit_with_schema() {
        let provider = ScriptedProvider::texts(&[]);
        let agent = agent(provider.clone(), Arc::new(RecordingExecutor::default()), 30);
        let (answer, _) = run(&agent, Some(r#"{"type":"object"}"#)).await;

        let requests = provider.requests();
        assert_eq!(requests.len(), 34);
        assert!(!answer.completed);
        assert_eq!(answer.iterations, 34);
        assert!(last_user_text(&requests[33]).contains("final turn (34 of 34)"));
        assert!(
            requests[..33]
                .iter()
                .all(|r| r.iter().all(|m| !m.content.contains("final turn")))
        );
        assert_eq!(answer.content, "Still looking around.");
    }

    #[tokio::test]
    async fn test_no_tool_runs_on_terminal_iteration() {
        let provider = ScriptedProvider::texts(&[&format!("Checking.\n{SEARCH_CALL}")]);
        let executor = Arc::new(RecordingExecutor::default());
        let agent = agent(provider, executor.clone(), 1);
        let (answer, history) = run(&agent, None).await;

        assert!(!answer.completed);
        assert!(executor.calls().is_empty());
        assert_eq!(answer.content, "Checking.");
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn test_out_of_turns_message_when_nothing_usable() {
        let provider = ScriptedProvider::texts(&[SEARCH_CALL]);
        let agent = agent(provider, Arc::new(RecordingExecutor::default()), 1);
        let (answer, _) = run(&agent, None).await;

        assert!(!answer.completed);
        assert!(answer.content.contains("ran out of turns (1 iterations)"));
    }

    #[tokio::test]
    async fn test_mcp_tool_dispatched_through_bridge() {
        let mut bridge = McpXmlBridge::new(Arc::new(EchoConnector));
        bridge
            .initialize(&[McpServerConfig::stdio("web", "web-mcp", Vec::new())])
            .await;
        let provider = ScriptedProvider::texts(&[
            "<fetch_url><params>{\"url\": \"https://example.com\"}</params></fetch_url>",
            DONE,
        ]);
        let agent = agent(provider.clone(), Arc::new(RecordingExecutor::default()), 30).with_bridge(bridge);
        let (answer, _) = run(&agent, None).await;

        assert!(answer.completed);
        let fed_back = last_user_text(&provider.requests()[1]);
        assert!(fed_back.contains("fetch_url: {\"url\":\"https://example.com\"}"));
        let system = &provider.requests()[0][0].content;
        assert!(system.contains("=== MCP TOOLS ===") && system.contains("## fetch_url"));
    }

    #[tokio::test]
    async fn test_structured_tool_call_fallback() {
        let structured = ChatResponse {
            tool_calls: vec![ToolCall {
                id: "call_1".to_string(),
                name: "search".to_string(),
                arguments: r#"{"query": "backoff"}"#.to_string(),
            }],
            ..reply("")
        };
        let provider = ScriptedProvider::new(vec![Ok(structured), Ok(reply(DONE))]);
        let executor = Arc::new(RecordingExecutor::default());
        let agent = agent(provider, executor.clone(), 30);
        let (answer, _) = run(&agent, None).await;

        assert!(answer.completed);
        assert_eq!(executor.calls()[0].1.get("query"), Some(&Value::from("backoff")));
    }

    #[tokio::test]
    async fn test_retryable_provider_error_is_retried() {
        let provider = ScriptedProvider::new(vec![
            Err(AgentError::ApiRequest {
                message: "503 Service Unavailable: overloaded".to_string(),
                status: Some(503),
            }),
            Ok(reply(DONE)),
        ]);
        let agent = agent(provider.clone(), Arc::new(RecordingExecutor::default()), 30);
        let (answer, _) = run(&agent, None).await;

        assert!(answer.completed);
        assert_eq!(provider.requests().len(), 2);
        assert_eq!(agent.retry_manager().stats().successful_retries, 1);
    }

    #[tokio::test]
    async fn test_auth_error_propagates() {
        let provider = ScriptedProvider::new(vec![Err(AgentError::ApiRequest {
            message: "invalid x-api-key".to_string(),
            status: Some(401),
        })]);
        let agent = agent(provider.clone(), Arc::new(RecordingExecutor::default()), 30);
        let mut history = ConversationHistory::default();
        let result = agent
            .run(&mut history, "hi", None, &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(AgentError::ApiRequest { status: Some(401), .. })));
        assert_eq!(provider.requests().len(), 1);
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_turn() {
        let provider = ScriptedProvider::texts(&[DONE]);
        let agent = agent(provider.clone(), Arc::new(RecordingExecutor::default()), 30);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut history = ConversationHistory::default();
        let result = agent.run(&mut history, "hi", None, &cancel).await;

        assert!(matches!(result, Err(AgentError::Cancelled)));
        assert!(provider.requests().is_empty());
    }

    #[tokio::test]
    async fn test_history_carries_into_next_turn() {
        let provider = ScriptedProvider::texts(&[DONE, DONE]);
        let agent = agent(provider.clone(), Arc::new(RecordingExecutor::default()), 30);
        let mut history = ConversationHistory::default();
        let cancel = CancellationToken::new();
        for question in ["first", "second"] {
            agent
                .run(&mut history, question, None, &cancel)
                .await
                .unwrap_or_else(|e| panic!("run failed: {e}"));
        }

        let second = &provider.requests()[1];
        assert_eq!(second.len(), 4);
        assert_eq!(second[1].content, "first");
        assert_eq!(second[3].content, "second");
    }

    #[test]
    fn test_validate_schema_result() {
        let schema = r#"{"required": ["a", "b"]}"#;
        assert!(validate_schema_result(r#"{"a": 1, "b": 2}"#, schema).is_ok());
        assert!(validate_schema_result("```json\n{\"a\": 1, \"b\": 2}\n```", schema).is_ok());
        assert_eq!(
            validate_schema_result(r#"{"a": 1}"#, schema),
            Err("missing required keys: b".to_string())
        );
        assert!(validate_schema_result("[1]", schema).is_err());
        assert!(validate_schema_result("not json", "free text schema").is_err());
        assert!(validate_schema_result("[1]", "free text schema").is_ok());
    }
}
