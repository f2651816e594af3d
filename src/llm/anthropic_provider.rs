//! Anthropic Messages API backend.
//!
//! The Messages API differs from chat completions in three ways that matter
//! here: the system prompt is a top-level field, turns must alternate
//! between `user` and `assistant`, and tool traffic travels as typed
//! content blocks (`tool_use` / `tool_result`) instead of dedicated roles.

use crate::config::{BackendKind, ProviderConfig};
use crate::llm::error::BackendError;
use crate::llm::http::HttpTransport;
use crate::llm::provider::{Backend, require_api_key, transport_settings};
use crate::llm::types::{
    BackendResponse, ChatMessage, CompletionRequest, RawDelta, Role, StreamHandle, ToolCall,
    Usage,
};
use async_stream::stream;
use futures::StreamExt;
use futures::future::BoxFuture;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const MESSAGES_PATH: &str = "v1/messages";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicBackend {
    transport: HttpTransport,
    config: Arc<ProviderConfig>,
}

impl AnthropicBackend {
    pub fn new(config: Arc<ProviderConfig>) -> Result<Self, BackendError> {
        let key = require_api_key(&config, BackendKind::Anthropic)?;
        let base_url = config
            .credentials(BackendKind::Anthropic)
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let transport = HttpTransport::with_headers(
            &[("x-api-key", &key), ("anthropic-version", API_VERSION)],
            &base_url,
        )?;
        Ok(Self {
            transport: transport_settings(transport, &config),
            config,
        })
    }

    pub(crate) fn build_body(request: &CompletionRequest) -> Result<Value, BackendError> {
        let (system, rest) = request.split_system();

        let mut turns: Vec<(&'static str, Vec<Value>)> = Vec::new();
        for message in rest {
            let (role, blocks) = translate_message(message);
            if blocks.is_empty() {
                continue;
            }
            match turns.last_mut() {
                Some((last_role, last_blocks)) if *last_role == role => {
                    last_blocks.extend(blocks)
                }
                _ => turns.push((role, blocks)),
            }
        }
        if turns.is_empty() {
            return Err(BackendError::InvalidRequest(
                "No messages with content to send".to_string(),
            ));
        }

        let messages: Vec<Value> = turns
            .into_iter()
            .map(|(role, content)| json!({ "role": role, "content": content }))
            .collect();

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "stream": request.stream,
        });
        if let Some(system) = system {
            body["system"] = json!(system);
        }
        if let Some(tools) = request.tools.as_ref().filter(|t| !t.is_empty()) {
            body["tools"] = Value::Array(
                tools
                    .iter()
                    .map(|tool| {
                        json!({
                            "name": tool.name,
                            "description": tool.description,
                            "input_schema": tool.parameters,
                        })
                    })
                    .collect(),
            );
        }
        Ok(body)
    }
}

fn translate_message(message: &ChatMessage) -> (&'static str, Vec<Value>) {
    let mut blocks = Vec::new();
    let text = message.text().trim();

    match message.role {
        Role::Tool => {
            blocks.push(json!({
                "type": "tool_result",
                "tool_use_id": message.tool_call_id,
                "content": message.text(),
            }));
            ("user", blocks)
        }
        Role::Assistant => {
            if !text.is_empty() {
                blocks.push(json!({ "type": "text", "text": message.text() }));
            }
            for call in &message.tool_calls {
                let input = serde_json::from_str::<Value>(&call.arguments)
                    .ok()
                    .filter(Value::is_object)
                    .unwrap_or_else(|| json!({}));
                blocks.push(json!({
                    "type": "tool_use",
                    "id": call.id,
                    "name": call.name,
                    "input": input,
                }));
            }
            ("assistant", blocks)
        }
        Role::User | Role::System => {
            if !text.is_empty() {
                blocks.push(json!({ "type": "text", "text": message.text() }));
            }
            ("user", blocks)
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
    stop_reason: Option<String>,
    #[serde(default)]
    usage: AnthropicUsage,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct AnthropicUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

/// A raw SSE event from the streaming Messages API.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicEvent {
    MessageStart {
        message: MessageStartBody,
    },
    ContentBlockStart {
        index: usize,
        content_block: StartBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: BlockDelta,
    },
    ContentBlockStop {},
    MessageDelta {
        delta: MessageDeltaBody,
        #[serde(default)]
        usage: AnthropicUsage,
    },
    MessageStop,
    Ping,
    Error {
        error: ErrorBody,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageStartBody {
    #[serde(default)]
    pub usage: AnthropicUsage,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StartBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    ThinkingDelta { thinking: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageDeltaBody {
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub message: String,
}

impl ErrorBody {
    /// In-stream errors carry no HTTP status; map by error type.
    fn into_backend_error(self) -> BackendError {
        let status = match self.kind.as_str() {
            "rate_limit_error" => StatusCode::TOO_MANY_REQUESTS,
            "authentication_error" => StatusCode::UNAUTHORIZED,
            "permission_error" => StatusCode::FORBIDDEN,
            "invalid_request_error" => StatusCode::BAD_REQUEST,
            "overloaded_error" => return BackendError::Stream(self.message),
            _ => return BackendError::Stream(format!("{}: {}", self.kind, self.message)),
        };
        BackendError::from_status(status, self.message, Some(&self.kind), None)
    }
}

impl Backend for AnthropicBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Anthropic
    }

    fn send<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> BoxFuture<'a, Result<BackendResponse, BackendError>> {
        Box::pin(async move {
            let body = Self::build_body(request)?;
            let started = Instant::now();
            let response: MessagesResponse =
                self.transport.post_json(MESSAGES_PATH, &body).await?;
            let latency_ms = started.elapsed().as_millis() as u64;

            if response.stop_reason.as_deref() == Some("refusal") {
                return Err(BackendError::ContentFilter(
                    "The backend declined to answer".to_string(),
                ));
            }

            let mut content = String::new();
            let mut tool_calls = Vec::new();
            for block in response.content {
                match block {
                    ResponseBlock::Text { text } => content.push_str(&text),
                    ResponseBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                        id,
                        name,
                        arguments: input.to_string(),
                    }),
                    ResponseBlock::Other => {}
                }
            }

            let usage = Usage::new(response.usage.input_tokens, response.usage.output_tokens);
            tracing::debug!(
                "Anthropic completion: model={}, in={}, out={}, {}ms",
                request.model,
                usage.input_tokens,
                usage.output_tokens,
                latency_ms
            );

            Ok(BackendResponse {
                content,
                tool_calls,
                finish_reason: response.stop_reason,
                cost: self.config.estimate_cost(
                    &request.model,
                    usage.input_tokens,
                    usage.output_tokens,
                ),
                usage,
                latency_ms,
                model: response.model.unwrap_or_else(|| request.model.clone()),
                backend: BackendKind::Anthropic,
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
            let events = self.transport.open_sse(MESSAGES_PATH, &body).await?;

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
                    match serde_json::from_str::<AnthropicEvent>(&event.data) {
                        Ok(AnthropicEvent::Error { error }) => {
                            yield Err(error.into_backend_error());
                            return;
                        }
                        Ok(AnthropicEvent::MessageStop) => break,
                        Ok(AnthropicEvent::MessageDelta { delta, usage })
                            if delta.stop_reason.as_deref() == Some("refusal") =>
                        {
                            tracing::debug!("Refusal after {} output tokens", usage.output_tokens);
                            yield Err(BackendError::ContentFilter(
                                "The backend declined to answer".to_string(),
                            ));
                            return;
                        }
                        Ok(AnthropicEvent::Ping) => {}
                        Ok(parsed) => yield Ok(RawDelta::Anthropic(parsed)),
                        Err(e) => tracing::warn!("Dropping malformed Anthropic event: {}", e),
                    }
                }
            };

            Ok(StreamHandle {
                backend: BackendKind::Anthropic,
                model: request.model,
                started_at,
                raw: Box::pin(raw),
            })
        })
    }
}
