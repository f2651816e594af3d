//! Per-backend normalization of raw stream items.
//!
//! Each backend streams a different native shape. Everything downstream of
//! this module sees only [`Delta`].

use crate::llm::RawDelta;
use crate::llm::anthropic_provider::{AnthropicEvent, BlockDelta, StartBlock};
use crate::llm::gemini_provider::{GeminiChunk, call_id, normalize_args};
use crate::llm::openai_provider::ChatCompletionChunk;

/// Fragment of one tool call, keyed by its position in the response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallDelta {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// Token counts reported mid-stream. Backends report input and output at
/// different points, so either side may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageDelta {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

/// A backend-independent stream delta.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    pub content: Option<String>,
    /// Reasoning delivered in a dedicated field rather than inline tags.
    pub reasoning: Option<String>,
    pub tool_calls: Vec<ToolCallDelta>,
    pub finish_reason: Option<String>,
    pub usage: Option<UsageDelta>,
}

impl Delta {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.as_deref().is_none_or(str::is_empty)
            && self.reasoning.as_deref().is_none_or(str::is_empty)
            && self.tool_calls.is_empty()
            && self.finish_reason.is_none()
            && self.usage.is_none()
    }
}

impl From<RawDelta> for Delta {
    fn from(raw: RawDelta) -> Self {
        match raw {
            RawDelta::OpenAi(chunk) => from_openai(chunk),
            RawDelta::Anthropic(event) => from_anthropic(event),
            RawDelta::Gemini(chunk) => from_gemini(chunk),
        }
    }
}

fn from_openai(chunk: ChatCompletionChunk) -> Delta {
    let mut delta = Delta {
        usage: chunk.usage.map(|u| UsageDelta {
            input_tokens: Some(u.prompt_tokens),
            output_tokens: Some(u.completion_tokens),
        }),
        ..Delta::default()
    };

    if let Some(choice) = chunk.choices.into_iter().next() {
        delta.finish_reason = choice.finish_reason;
        delta.content = choice.delta.content;
        delta.reasoning = choice.delta.reasoning_content.or(choice.delta.reasoning);
        delta.tool_calls = choice
            .delta
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolCallDelta {
                index: call.index,
                id: call.id,
                name: call.function.name,
                arguments: call.function.arguments,
            })
            .collect();
    }

    delta
}

fn from_anthropic(event: AnthropicEvent) -> Delta {
    match event {
        AnthropicEvent::MessageStart { message } => Delta {
            usage: Some(UsageDelta {
                input_tokens: Some(message.usage.input_tokens),
                output_tokens: None,
            }),
            ..Delta::default()
        },
        AnthropicEvent::ContentBlockStart {
            index,
            content_block,
        } => match content_block {
            StartBlock::Text { text } => Delta::text(text),
            StartBlock::Thinking { thinking } => Delta {
                reasoning: Some(thinking),
                ..Delta::default()
            },
            StartBlock::ToolUse { id, name } => Delta {
                tool_calls: vec![ToolCallDelta {
                    index,
                    id: Some(id),
                    name: Some(name),
                    arguments: None,
                }],
                ..Delta::default()
            },
            StartBlock::Other => Delta::default(),
        },
        AnthropicEvent::ContentBlockDelta { index, delta } => match delta {
            BlockDelta::TextDelta { text } => Delta::text(text),
            BlockDelta::ThinkingDelta { thinking } => Delta {
                reasoning: Some(thinking),
                ..Delta::default()
            },
            BlockDelta::InputJsonDelta { partial_json } => Delta {
                tool_calls: vec![ToolCallDelta {
                    index,
                    arguments: Some(partial_json),
                    ..ToolCallDelta::default()
                }],
                ..Delta::default()
            },
            BlockDelta::Other => Delta::default(),
        },
        AnthropicEvent::MessageDelta { delta, usage } => Delta {
            finish_reason: delta.stop_reason,
            usage: Some(UsageDelta {
                input_tokens: None,
                output_tokens: Some(usage.output_tokens),
            }),
            ..Delta::default()
        },
        AnthropicEvent::ContentBlockStop {}
        | AnthropicEvent::MessageStop
        | AnthropicEvent::Ping
        | AnthropicEvent::Error { .. }
        | AnthropicEvent::Unknown => Delta::default(),
    }
}

fn from_gemini(chunk: GeminiChunk) -> Delta {
    let GeminiChunk {
        response,
        call_offset,
    } = chunk;
    let mut delta = Delta {
        usage: response.usage_metadata.map(|u| UsageDelta {
            input_tokens: Some(u.prompt_token_count),
            output_tokens: Some(u.candidates_token_count),
        }),
        ..Delta::default()
    };

    let Some(candidate) = response.candidates.into_iter().next() else {
        return delta;
    };
    delta.finish_reason = candidate.finish_reason;

    let mut content = String::new();
    let mut reasoning = String::new();
    for part in candidate.content.parts {
        if let Some(call) = part.function_call {
            let index = call_offset + delta.tool_calls.len();
            delta.tool_calls.push(ToolCallDelta {
                index,
                id: Some(call_id(index)),
                name: Some(call.name),
                arguments: Some(normalize_args(call.args)),
            });
        } else if let Some(text) = part.text {
            if part.thought {
                reasoning.push_str(&text);
            } else {
                content.push_str(&text);
            }
        }
    }
    delta.content = Some(content).filter(|c| !c.is_empty());
    delta.reasoning = Some(reasoning).filter(|r| !r.is_empty());

    delta
}
