//! `OpenAI`-compatible provider implementation using the `async-openai` crate.
//!
//! Anthropic, `OpenAI` and Google all expose `OpenAI`-compatible chat
//! completion endpoints; the [`ProviderKind`] picks the base URL and name.

use std::time::Duration;

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::error::{ApiError, OpenAIError};
use async_openai::types::{
    ChatCompletionRequestAssistantMessage, ChatCompletionRequestAssistantMessageContent,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
    ChatCompletionRequestUserMessageContent, ChatCompletionTool, ChatCompletionToolType,
    CreateChatCompletionRequest, FunctionObject,
};
use async_trait::async_trait;

use crate::agent::client::ProviderKind;
use crate::agent::config::AgentConfig;
use crate::agent::message::{ChatMessage, ChatRequest, ChatResponse, Role, TokenUsage};
use crate::agent::provider::LlmProvider;
use crate::agent::tool::ToolCall;
use crate::error::AgentError;

/// `OpenAI`-compatible LLM provider.
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    kind: ProviderKind,
    model: String,
    timeout: Duration,
}

impl OpenAiProvider {
    /// Creates a provider of `kind` from agent configuration.
    #[must_use]
    pub fn new(kind: ProviderKind, config: &AgentConfig) -> Self {
        let base_url = config
            .base_url
            .as_deref()
            .unwrap_or_else(|| kind.default_base_url());
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.api_key)
            .with_api_base(base_url);

        Self {
            client: Client::with_config(openai_config),
            kind,
            model: config.model.clone(),
            timeout: config.timeout,
        }
    }

    /// Converts our message type to the `OpenAI` SDK type.
    fn convert_message(msg: &ChatMessage) -> ChatCompletionRequestMessage {
        match msg.role {
            Role::System => {
                ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                    content: ChatCompletionRequestSystemMessageContent::Text(msg.content.clone()),
                    name: None,
                })
            }
            Role::User => ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(msg.content.clone()),
                name: None,
            }),
            Role::Assistant => {
                #[allow(deprecated)]
                ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
                    content: Some(ChatCompletionRequestAssistantMessageContent::Text(
                        msg.content.clone(),
                    )),
                    name: None,
                    tool_calls: None,
                    refusal: None,
                    audio: None,
                    function_call: None,
                })
            }
        }
    }

    /// Builds an `OpenAI` chat completion request from our generic request.
    fn build_request(request: &ChatRequest) -> CreateChatCompletionRequest {
        let messages: Vec<_> = request.messages.iter().map(Self::convert_message).collect();

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(|td| ChatCompletionTool {
                        r#type: ChatCompletionToolType::Function,
                        function: FunctionObject {
                            name: td.name.clone(),
                            description: Some(td.description.clone()),
                            parameters: Some(td.input_schema.clone()),
                            strict: None,
                        },
                    })
                    .collect(),
            )
        };

        CreateChatCompletionRequest {
            model: request.model.clone(),
            messages,
            temperature: request.temperature,
            max_completion_tokens: request.max_tokens,
            tools,
            ..Default::default()
        }
    }

    /// Maps an SDK error, keeping the HTTP status when one is known.
    ///
    /// Non-2xx responses arrive as [`OpenAIError::ApiError`] without their
    /// status, so it is recovered from the error type or code.
    fn map_error(err: &OpenAIError) -> AgentError {
        let status = match err {
            OpenAIError::Reqwest(e) => e.status().map(|s| s.as_u16()),
            OpenAIError::ApiError(api) => api_error_status(api),
            _ => None,
        };
        AgentError::ApiRequest {
            message: err.to_string(),
            status,
        }
    }
}

/// Status implied by an API error body, checking `type` before `code`.
fn api_error_status(api: &ApiError) -> Option<u16> {
    [api.r#type.as_deref(), api.code.as_deref()]
        .into_iter()
        .flatten()
        .find_map(|label| match label.to_ascii_lowercase().as_str() {
            "invalid_request_error" | "invalid_argument" => Some(400),
            "authentication_error" | "invalid_api_key" | "unauthenticated" => Some(401),
            "permission_error" | "permission_denied" => Some(403),
            "not_found_error" | "model_not_found" | "not_found" => Some(404),
            "request_too_large" => Some(413),
            "rate_limit_error" | "rate_limit_exceeded" | "resource_exhausted" => Some(429),
            "server_error" | "api_error" | "internal" | "internal_error" => Some(500),
            "unavailable" | "service_unavailable" => Some(503),
            "overloaded_error" => Some(529),
            _ => None,
        })
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("kind", &self.kind)
            .field("model", &self.model)
            .field("client", &"<async-openai::Client>")
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        self.kind.as_str()
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AgentError> {
        let openai_request = Self::build_request(request);

        let response = tokio::time::timeout(
            self.timeout,
            self.client.chat().create(openai_request),
        )
        .await
        .map_err(|_| AgentError::Timeout {
            operation: format!("{} chat request", self.kind),
            seconds: self.timeout.as_secs(),
        })?
        .map_err(|e| Self::map_error(&e))?;

        let choice = response.choices.first();

        let content = choice
            .and_then(|c| c.message.content.as_ref())
            .cloned()
            .unwrap_or_default();

        let tool_calls = choice
            .and_then(|c| c.message.tool_calls.as_ref())
            .map(|tcs| {
                tcs.iter()
                    .map(|tc| ToolCall {
                        id: tc.id.clone(),
                        name: tc.function.name.clone(),
                        arguments: tc.function.arguments.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let finish_reason = choice.and_then(|c| {
            c.finish_reason
                .as_ref()
                .map(|fr| format!("{fr:?}").to_lowercase())
        });

        let usage = response
            .usage
            .map_or_else(TokenUsage::default, |u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            });

        Ok(ChatResponse {
            content,
            usage,
            tool_calls,
            finish_reason,
        })
    }
}
