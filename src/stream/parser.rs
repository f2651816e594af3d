//! Forward-only state machine turning [`Delta`]s into [`StreamEvent`]s.
//!
//! Reasoning arrives either in a dedicated field or inline between tags such
//! as `<think>...</think>`. Tag markers themselves are dropped from both
//! channels; everything between them is routed to `thinking`.

use crate::config::ExtractionConfig;
use crate::llm::{ErrorKind, ToolCall, Usage};
use crate::stream::delta::{Delta, ToolCallDelta};
use crate::stream::extract::{DealId, Extracted, extract_payload};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Typed event relayed to the caller of a streamed chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Text {
        content: String,
    },
    Thinking {
        content: String,
    },
    ToolCallDelta {
        index: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arguments: Option<String>,
    },
    #[serde(rename = "dealIds")]
    DealIds {
        ids: Vec<DealId>,
    },
    Error {
        kind: ErrorKind,
        message: String,
        retryable: bool,
    },
    Done {
        content: String,
        cached: bool,
    },
}

/// Everything accumulated over one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedStream {
    pub text: String,
    pub reasoning: String,
    /// Completed tool calls ordered by index.
    pub tool_calls: Vec<ToolCall>,
    pub extracted: Extracted,
    pub usage: Usage,
    pub finish_reason: Option<String>,
}

/// Parser state for one stream. The reasoning flag, the tool-call map and
/// the two text accumulators are the only state the parsing depends on.
#[derive(Debug, Clone)]
pub struct StreamState {
    inside_reasoning: bool,
    tool_calls: BTreeMap<usize, ToolCall>,
    text: String,
    reasoning: String,
    /// Tail of the last content delta that may be the start of a tag.
    pending: String,
    input_tokens: u64,
    output_tokens: u64,
    finish_reason: Option<String>,
    open_markers: Vec<String>,
    close_markers: Vec<String>,
    extraction: ExtractionConfig,
}

enum Marker {
    Open(usize),
    Close(usize),
}

impl StreamState {
    pub fn new(extraction: &ExtractionConfig) -> Self {
        Self {
            inside_reasoning: false,
            tool_calls: BTreeMap::new(),
            text: String::new(),
            reasoning: String::new(),
            pending: String::new(),
            input_tokens: 0,
            output_tokens: 0,
            finish_reason: None,
            open_markers: extraction
                .reasoning_tags
                .iter()
                .map(|t| format!("<{t}>"))
                .collect(),
            close_markers: extraction
                .reasoning_tags
                .iter()
                .map(|t| format!("</{t}>"))
                .collect(),
            extraction: extraction.clone(),
        }
    }

    pub fn inside_reasoning(&self) -> bool {
        self.inside_reasoning
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    /// Fold one delta into the state and return the events it produces.
    pub fn step(&mut self, delta: Delta) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if let Some(reasoning) = delta.reasoning.filter(|r| !r.is_empty()) {
            self.reasoning.push_str(&reasoning);
            events.push(StreamEvent::Thinking { content: reasoning });
        }

        if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
            self.route_content(content, &mut events);
        }

        for fragment in delta.tool_calls {
            events.push(self.merge_tool_call(fragment));
        }

        if let Some(reason) = delta.finish_reason {
            self.finish_reason = Some(reason);
        }
        if let Some(usage) = delta.usage {
            if let Some(input) = usage.input_tokens {
                self.input_tokens = input;
            }
            if let Some(output) = usage.output_tokens {
                self.output_tokens = output;
            }
        }

        events
    }

    fn route_content(&mut self, content: String, events: &mut Vec<StreamEvent>) {
        let mut rest = std::mem::take(&mut self.pending);
        rest.push_str(&content);

        loop {
            match self.find_marker(&rest) {
                Some((pos, Marker::Open(len))) => {
                    let before = rest[..pos].to_string();
                    self.emit(before, self.inside_reasoning, events);
                    self.inside_reasoning = true;
                    rest.drain(..pos + len);
                }
                Some((pos, Marker::Close(len))) => {
                    // Text before a closing tag is reasoning even when no
                    // opening tag was seen.
                    let before = rest[..pos].to_string();
                    self.emit(before, true, events);
                    self.inside_reasoning = false;
                    rest.drain(..pos + len);
                }
                None => {
                    let keep = self.partial_marker_len(&rest);
                    self.pending = rest.split_off(rest.len() - keep);
                    self.emit(rest, self.inside_reasoning, events);
                    return;
                }
            }
        }
    }

    fn emit(&mut self, chunk: String, as_reasoning: bool, events: &mut Vec<StreamEvent>) {
        if chunk.is_empty() {
            return;
        }
        if as_reasoning {
            self.reasoning.push_str(&chunk);
            events.push(StreamEvent::Thinking { content: chunk });
        } else {
            self.text.push_str(&chunk);
            events.push(StreamEvent::Text { content: chunk });
        }
    }

    /// Earliest opening or closing marker in `text`.
    fn find_marker(&self, text: &str) -> Option<(usize, Marker)> {
        let open = self
            .open_markers
            .iter()
            .filter_map(|m| text.find(m.as_str()).map(|pos| (pos, Marker::Open(m.len()))));
        let close = self
            .close_markers
            .iter()
            .filter_map(|m| text.find(m.as_str()).map(|pos| (pos, Marker::Close(m.len()))));
        open.chain(close).min_by_key(|(pos, _)| *pos)
    }

    /// Length of a suffix of `text` that could still grow into a marker.
    fn partial_marker_len(&self, text: &str) -> usize {
        let Some(lt) = text.rfind('<') else {
            return 0;
        };
        let tail = &text[lt..];
        let could_be_marker = self
            .open_markers
            .iter()
            .chain(self.close_markers.iter())
            .any(|m| m.len() > tail.len() && m.starts_with(tail));
        if could_be_marker { tail.len() } else { 0 }
    }

    fn merge_tool_call(&mut self, fragment: ToolCallDelta) -> StreamEvent {
        let call = self.tool_calls.entry(fragment.index).or_default();
        if let Some(id) = fragment.id.as_deref().filter(|id| !id.is_empty())
            && call.id.is_empty()
        {
            call.id = id.to_string();
        }
        if let Some(name) = &fragment.name {
            call.name.push_str(name);
        }
        if let Some(arguments) = &fragment.arguments {
            call.arguments.push_str(arguments);
        }

        StreamEvent::ToolCallDelta {
            index: fragment.index,
            id: fragment.id,
            name: fragment.name,
            arguments: fragment.arguments,
        }
    }

    /// Release text held back as a possible partial tag.
    ///
    /// Call once the stream has ended so the tail reaches consumers.
    pub fn flush(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let pending = std::mem::take(&mut self.pending);
        self.emit(pending, self.inside_reasoning, &mut events);
        events
    }

    /// Flush held-back text, order tool calls and run payload extraction.
    pub fn finish(mut self) -> ParsedStream {
        self.flush();

        let tool_calls = self
            .tool_calls
            .into_iter()
            .filter(|(_, call)| !call.name.is_empty())
            .map(|(index, mut call)| {
                if call.id.is_empty() {
                    call.id = format!("call_{}", index);
                }
                call
            })
            .collect();

        ParsedStream {
            extracted: extract_payload(&self.text, &self.extraction),
            text: self.text,
            reasoning: self.reasoning,
            tool_calls,
            usage: Usage::new(self.input_tokens, self.output_tokens),
            finish_reason: self.finish_reason,
        }
    }
}
