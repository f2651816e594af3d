use crate::config::{BackendKind, ProviderConfig};
use crate::llm::error::BackendError;
use crate::llm::http::HttpTransport;
use crate::llm::provider::{Backend, require_api_key, transport_settings};
use crate::llm::types::{
    BackendResponse, ChatMessage, CompletionRequest, RawDelta, Role, StreamHandle, ToolCall,
    ToolDefinition, Usage,
};
use async_stream::stream;
use futures::StreamExt;
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const COMPLETIONS_PATH: &str = "chat/completions";

/// OpenAI chat-completions backend. Any OpenAI-compatible host works through
/// `base_url`.
pub struct OpenAiBackend {
    transport: HttpTransport,
    config: Arc<ProviderConfig>,
}

impl OpenAiBackend {
    pub fn new(config: Arc<ProviderConfig>) -> Result<Self, BackendError> {
        let key = require_api_key(&config, BackendKind::OpenAi)?;
        let base_url = config
            .credentials(BackendKind::OpenAi)
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let transport = transport_settings(HttpTransport::bearer(&key, &base_url)?, &config);
        Ok(Self { transport, config })
    }

    pub(crate) fn build_body(request: &CompletionRequest) -> Result<Value, BackendError> {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .filter(|m| m.has_payload())
            .map(translate_message)
            .collect();
        if messages.is_empty() {
            return Err(BackendError::InvalidRequest(
                "No messages with content to send".to_string(),
            ));
        }

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "stream": request.stream,
        });
        if request.stream {
            body["stream_options"] = json!({ "include_usage": true });
        }
        if let Some(tools) = request.tools.as_ref().filter(|t| !t.is_empty()) {
            body["tools"] = Value::Array(tools.iter().map(translate_tool).collect());
            body["tool_choice"] = json!("auto");
        }
        Ok(body)
    }
}

fn translate_message(message: &ChatMessage) -> Value {
    match message.role {
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id,
            "content": message.text(),
        }),
        Role::Assistant if !message.tool_calls.is_empty() => json!({
            "role": "assistant",
            "content": message.content,
            "tool_calls": message.tool_calls.iter().map(|call| json!({
                "id": call.id,
                "type": "function",
                "function": { "name": call.name, "arguments": call.arguments },
            })).collect::<Vec<_>>(),
        }),
        role => json!({
            "role": role_name(role),
            "content": message.text(),
        }),
    }
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn translate_tool(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ResponseChoice>,
    usage: Option<OpenAiUsage>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

/// One `chat.completion.chunk` from the streaming endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    pub usage: Option<OpenAiUsage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkDelta {
    pub content: Option<String>,
    /// DeepSeek-style reasoning field.
    pub reasoning_content: Option<String>,
    /// OpenRouter/Groq-style reasoning field.
    pub reasoning: Option<String>,
    pub tool_calls: Option<Vec<ChunkToolCall>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkToolCall {
    #[serde(default)]
    pub index: usize,
    pub id: Option<String>,
    #[serde(default)]
    pub function: ChunkFunction,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkFunction {
    pub name: Option<String>,
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct OpenAiUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

impl ChatCompletionChunk {
    fn finish_reason(&self) -> Option<&str> {
        self.choices.first().and_then(|c| c.finish_reason.as_deref())
    }
}

impl Backend for OpenAiBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::OpenAi
    }

    fn send<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> BoxFuture<'a, Result<BackendResponse, BackendError>> {
        Box::pin(async move {
            let body = Self::build_body(request)?;
            let started = Instant::now();
            let response: ChatCompletionResponse =
                self.transport.post_json(COMPLETIONS_PATH, &body).await?;
            let latency_ms = started.elapsed().as_millis() as u64;

            let choice = response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| BackendError::Unknown("Response contained no choices".into()))?;
            if choice.finish_reason.as_deref() == Some("content_filter") {
                return Err(BackendError::ContentFilter(
                    "Response withheld by the backend content filter".to_string(),
                ));
            }

            let usage = response
                .usage
                .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens))
                .unwrap_or_default();
            let tool_calls = choice
                .message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|call| ToolCall {
                    id: call.id,
                    name: call.function.name,
                    arguments: call.function.arguments,
                })
                .collect();

            tracing::debug!(
                "OpenAI completion: model={}, in={}, out={}, {}ms",
                request.model,
                usage.input_tokens,
                usage.output_tokens,
                latency_ms
            );

            Ok(BackendResponse {
                content: choice.message.content.unwrap_or_default(),
                tool_calls,
                finish_reason: choice.finish_reason,
                cost: self.config.estimate_cost(
                    &request.model,
                    usage.input_tokens,
                    usage.output_tokens,
                ),
                usage,
                latency_ms,
                model: response.model.unwrap_or_else(|| request.model.clone()),
                backend: BackendKind::OpenAi,
            })
        })
    }

    fn open_stream<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> BoxFuture<'a, Result<StreamHandle, BackendError>> {
        Box::pin(async move {
            let mut request = request.clone();
            request.stream = true;
            let body = Self::build_body(&request)?;
            let started_at = Instant::now();
            let events = self.transport.open_sse(COMPLETIONS_PATH, &body).await?;

            let raw = stream! {
                let mut events = Box::pin(events);
                while let Some(event) = events.next().await {
                    let event = match event {
                        Ok(event) => event,
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    };
                    if event.data.trim() == "[DONE]" {
                        break;
                    }
                    match serde_json::from_str::<ChatCompletionChunk>(&event.data) {
                        Ok(chunk) => {
                            if chunk.finish_reason() == Some("content_filter") {
                                yield Err(BackendError::ContentFilter(
                                    "Stream stopped by the backend content filter".to_string(),
                                ));
                                return;
                            }
                            yield Ok(RawDelta::OpenAi(chunk));
                        }
                        Err(e) => tracing::warn!("Dropping malformed OpenAI chunk: {}", e),
                    }
                }
            };

            Ok(StreamHandle {
                backend: BackendKind::OpenAi,
                model: request.model,
                started_at,
                raw: Box::pin(raw),
            })
        })
    }
}
