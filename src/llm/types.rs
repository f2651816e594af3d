use crate::config::BackendKind;
use crate::llm::anthropic_provider::AnthropicEvent;
use crate::llm::error::BackendError;
use crate::llm::gemini_provider::GeminiChunk;
use crate::llm::openai_provider::ChatCompletionChunk;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};
use std::pin::Pin;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One entry of the model context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: Role,
    pub content: Option<String>,
    /// Set on `tool` messages: the call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Set on `tool` messages: the name of the tool that produced it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Set on `assistant` messages that requested tool calls.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl ChatMessage {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_call_id: None,
            name: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Assistant turn carrying the tool calls it requested.
    pub fn assistant_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.filter(|c| !c.is_empty()),
            tool_call_id: None,
            name: None,
            tool_calls,
        }
    }

    /// Tool turn answering `call`.
    pub fn tool_result(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_call_id: Some(call.id.clone()),
            name: Some(call.name.clone()),
            tool_calls: Vec::new(),
        }
    }

    /// Text content, treating `None` as empty.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }

    /// Whether the message carries anything a backend can use.
    pub fn has_payload(&self) -> bool {
        self.content.as_deref().is_some_and(|c| !c.trim().is_empty()) || !self.tool_calls.is_empty()
    }
}

/// A model-requested tool invocation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// JSON-encoded arguments, validated against the tool schema before use.
    pub arguments: String,
}

/// Normalized tool declaration handed to backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: serde_json::Value,
}

/// Backend-independent completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// `None` for models that must not receive native tool definitions.
    pub tools: Option<Vec<ToolDefinition>>,
    pub stream: bool,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    /// Leading system prompt and the remaining messages, with payload-less
    /// messages dropped. Backends that take the system prompt out-of-band
    /// use this.
    pub fn split_system(&self) -> (Option<String>, Vec<&ChatMessage>) {
        let mut system = None;
        let mut rest = Vec::with_capacity(self.messages.len());
        for (i, message) in self.messages.iter().enumerate() {
            if i == 0 && message.role == Role::System {
                system = message.content.clone().filter(|s| !s.trim().is_empty());
                continue;
            }
            if message.role == Role::System {
                // Later system messages become user context.
                rest.push(message);
                continue;
            }
            if message.has_payload() {
                rest.push(message);
            }
        }
        (system, rest)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

impl Add for Usage {
    type Output = Usage;

    fn add(self, rhs: Usage) -> Usage {
        Usage {
            input_tokens: self.input_tokens + rhs.input_tokens,
            output_tokens: self.output_tokens + rhs.output_tokens,
            total_tokens: self.total_tokens + rhs.total_tokens,
        }
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Usage) {
        *self = *self + rhs;
    }
}

/// Fully-populated non-streaming completion.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
    pub usage: Usage,
    pub cost: f64,
    pub latency_ms: u64,
    pub model: String,
    pub backend: BackendKind,
}

/// Backend-native stream item. Only the streaming parser looks inside.
#[derive(Debug, Clone)]
pub enum RawDelta {
    OpenAi(ChatCompletionChunk),
    Anthropic(AnthropicEvent),
    Gemini(GeminiChunk),
}

pub type RawStream = Pin<Box<dyn Stream<Item = Result<RawDelta, BackendError>> + Send>>;

/// An open completion stream. The raw stream is consumed by a single
/// forward pass; dropping the handle releases the connection.
pub struct StreamHandle {
    pub backend: BackendKind,
    pub model: String,
    pub started_at: Instant,
    pub raw: RawStream,
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("backend", &self.backend)
            .field("model", &self.model)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

/// Result of [`crate::llm::Backend::complete`].
#[derive(Debug)]
pub enum Completion {
    Full(BackendResponse),
    Stream(StreamHandle),
}
