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
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Instant;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// JSON-Schema keywords the function-declaration endpoint rejects.
const UNSUPPORTED_SCHEMA_KEYS: [&str; 5] = [
    "$schema",
    "$defs",
    "title",
    "additionalProperties",
    "definitions",
];

/// Finish reasons that mean the answer was withheld on safety grounds.
const BLOCKED_REASONS: [&str; 4] = ["SAFETY", "PROHIBITED_CONTENT", "BLOCKLIST", "SPII"];

pub struct GeminiBackend {
    transport: HttpTransport,
    config: Arc<ProviderConfig>,
}

impl GeminiBackend {
    pub fn new(config: Arc<ProviderConfig>) -> Result<Self, BackendError> {
        let key = require_api_key(&config, BackendKind::Gemini)?;
        let base_url = config
            .credentials(BackendKind::Gemini)
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let transport = HttpTransport::with_headers(&[("x-goog-api-key", &key)], &base_url)?;
        Ok(Self {
            transport: transport_settings(transport, &config),
            config,
        })
    }

    pub(crate) fn build_body(request: &CompletionRequest) -> Result<Value, BackendError> {
        let (system, rest) = request.split_system();

        let mut contents: Vec<(&'static str, Vec<Value>)> = Vec::new();
        for message in rest {
            let (role, parts) = translate_message(message);
            if parts.is_empty() {
                continue;
            }
            match contents.last_mut() {
                Some((last_role, last_parts)) if *last_role == role => last_parts.extend(parts),
                _ => contents.push((role, parts)),
            }
        }
        if contents.is_empty() {
            return Err(BackendError::InvalidRequest(
                "No messages with content to send".to_string(),
            ));
        }

        let mut body = json!({
            "contents": contents
                .into_iter()
                .map(|(role, parts)| json!({ "role": role, "parts": parts }))
                .collect::<Vec<_>>(),
            "generationConfig": {
                "maxOutputTokens": request.max_tokens,
                "temperature": request.temperature,
            },
        });
        if let Some(system) = system {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
        if let Some(tools) = request.tools.as_ref().filter(|t| !t.is_empty()) {
            body["tools"] = json!([{
                "functionDeclarations": tools.iter().map(translate_tool).collect::<Vec<_>>(),
            }]);
        }
        Ok(body)
    }

    fn path(model: &str, stream: bool) -> String {
        if stream {
            format!("v1beta/models/{}:streamGenerateContent?alt=sse", model)
        } else {
            format!("v1beta/models/{}:generateContent", model)
        }
    }
}

fn translate_message(message: &ChatMessage) -> (&'static str, Vec<Value>) {
    let mut parts = Vec::new();
    let has_text = !message.text().trim().is_empty();

    match message.role {
        Role::Tool => {
            let response = serde_json::from_str::<Value>(message.text())
                .ok()
                .filter(Value::is_object)
                .unwrap_or_else(|| json!({ "content": message.text() }));
            parts.push(json!({
                "functionResponse": {
                    "name": message.name.clone().unwrap_or_default(),
                    "response": response,
                }
            }));
            ("user", parts)
        }
        Role::Assistant => {
            if has_text {
                parts.push(json!({ "text": message.text() }));
            }
            for call in &message.tool_calls {
                let args = serde_json::from_str::<Value>(&call.arguments)
                    .ok()
                    .filter(Value::is_object)
                    .unwrap_or_else(|| json!({}));
                parts.push(json!({ "functionCall": { "name": call.name, "args": args } }));
            }
            ("model", parts)
        }
        Role::User | Role::System => {
            if has_text {
                parts.push(json!({ "text": message.text() }));
            }
            ("user", parts)
        }
    }
}

fn translate_tool(tool: &ToolDefinition) -> Value {
    let mut parameters = tool.parameters.clone();
    sanitize_schema(&mut parameters);
    json!({
        "name": tool.name,
        "description": tool.description,
        "parameters": parameters,
    })
}

/// Rewrite a JSON Schema into the OpenAPI subset Gemini accepts.
///
/// Rejected keywords are removed, `type: [T, "null"]` and `anyOf` with a
/// null branch become `type: T` plus `nullable: true`, `default: null` is
/// dropped and formats outside the supported set are removed. Keys directly
/// under `properties` are field names, not keywords, and are kept.
pub(crate) fn sanitize_schema(schema: &mut Value) {
    match schema {
        Value::Object(map) => {
            for key in UNSUPPORTED_SCHEMA_KEYS {
                map.remove(key);
            }
            if map.get("default").is_some_and(Value::is_null) {
                map.remove("default");
            }
            collapse_nullable_type(map);
            collapse_nullable_any_of(map);
            normalize_format(map);

            for (key, value) in map.iter_mut() {
                if key == "properties" {
                    if let Value::Object(properties) = value {
                        properties.values_mut().for_each(sanitize_schema);
                    }
                } else {
                    sanitize_schema(value);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(sanitize_schema),
        _ => {}
    }
}

fn collapse_nullable_type(map: &mut Map<String, Value>) {
    let Some(Value::Array(types)) = map.get("type") else {
        return;
    };
    let nullable = types.iter().any(|t| t == "null");
    let concrete: Vec<Value> = types.iter().filter(|t| *t != "null").cloned().collect();
    if let Some(first) = concrete.into_iter().next() {
        map.insert("type".to_string(), first);
    } else {
        map.remove("type");
    }
    if nullable {
        map.insert("nullable".to_string(), Value::Bool(true));
    }
}

fn collapse_nullable_any_of(map: &mut Map<String, Value>) {
    let Some(Value::Array(branches)) = map.get("anyOf") else {
        return;
    };
    let is_null = |b: &Value| b.get("type").is_some_and(|t| t == "null");
    if !branches.iter().any(is_null) {
        return;
    }
    let rest: Vec<Value> = branches.iter().filter(|b| !is_null(b)).cloned().collect();
    map.remove("anyOf");
    map.insert("nullable".to_string(), Value::Bool(true));
    match <[Value; 1]>::try_from(rest) {
        Ok([Value::Object(only)]) => {
            for (key, value) in only {
                map.entry(key).or_insert(value);
            }
        }
        Ok([other]) => {
            map.insert("anyOf".to_string(), Value::Array(vec![other]));
        }
        Err(rest) if !rest.is_empty() => {
            map.insert("anyOf".to_string(), Value::Array(rest));
        }
        Err(_) => {}
    }
}

/// Keep the formats Gemini documents; unsigned integer formats are dropped
/// together with the `minimum` schemars derives from them.
fn normalize_format(map: &mut Map<String, Value>) {
    let Some(format) = map.get("format").and_then(Value::as_str) else {
        return;
    };
    let kind = map.get("type").and_then(Value::as_str).unwrap_or_default();
    let unsigned = format.starts_with("uint");
    let supported = match kind {
        "integer" => matches!(format, "int32" | "int64"),
        "number" => matches!(format, "float" | "double"),
        "string" => matches!(format, "enum" | "date-time"),
        _ => false,
    };
    if supported {
        return;
    }
    map.remove("format");
    if unsigned && map.get("minimum").is_some_and(|m| m.as_f64() == Some(0.0)) {
        map.remove("minimum");
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    pub usage_metadata: Option<UsageMetadata>,
    pub prompt_feedback: Option<PromptFeedback>,
    pub model_version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: CandidateContent,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    pub text: Option<String>,
    /// Set on thought-summary parts.
    #[serde(default)]
    pub thought: bool,
    pub function_call: Option<FunctionCall>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u64,
    #[serde(default)]
    pub candidates_token_count: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    pub block_reason: Option<String>,
}

impl GenerateContentResponse {
    fn blocked(&self) -> Option<String> {
        if let Some(reason) = self
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.clone())
        {
            return Some(reason);
        }
        self.candidates
            .first()
            .and_then(|c| c.finish_reason.as_deref())
            .filter(|r| BLOCKED_REASONS.contains(r))
            .map(str::to_string)
    }

    fn function_call_count(&self) -> usize {
        self.candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .filter(|p| p.function_call.is_some())
                    .count()
            })
            .unwrap_or(0)
    }
}

/// One streamed response plus the number of function calls seen in earlier
/// chunks, so calls can be given stable indices.
#[derive(Debug, Clone, Default)]
pub struct GeminiChunk {
    pub response: GenerateContentResponse,
    pub call_offset: usize,
}

/// Gemini does not assign call ids; generate stable ones from the index.
pub fn call_id(index: usize) -> String {
    format!("call_{}", index)
}

impl Backend for GeminiBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Gemini
    }

    fn send<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> BoxFuture<'a, Result<BackendResponse, BackendError>> {
        Box::pin(async move {
            let body = Self::build_body(request)?;
            let started = Instant::now();
            let response: GenerateContentResponse = self
                .transport
                .post_json(&Self::path(&request.model, false), &body)
                .await?;
            let latency_ms = started.elapsed().as_millis() as u64;

            if let Some(reason) = response.blocked() {
                return Err(BackendError::ContentFilter(format!(
                    "Response blocked: {}",
                    reason
                )));
            }

            let candidate = response.candidates.first().cloned().unwrap_or_default();
            let mut content = String::new();
            let mut tool_calls = Vec::new();
            for part in candidate.content.parts {
                if let Some(call) = part.function_call {
                    tool_calls.push(ToolCall {
                        id: call_id(tool_calls.len()),
                        name: call.name,
                        arguments: normalize_args(call.args),
                    });
                } else if !part.thought
                    && let Some(text) = part.text
                {
                    content.push_str(&text);
                }
            }

            let usage = response
                .usage_metadata
                .map(|u| Usage::new(u.prompt_token_count, u.candidates_token_count))
                .unwrap_or_default();
            tracing::debug!(
                "Gemini completion: model={}, in={}, out={}, {}ms",
                request.model,
                usage.input_tokens,
                usage.output_tokens,
                latency_ms
            );

            Ok(BackendResponse {
                content,
                tool_calls,
                finish_reason: candidate.finish_reason,
                cost: self.config.estimate_cost(
                    &request.model,
                    usage.input_tokens,
                    usage.output_tokens,
                ),
                usage,
                latency_ms,
                model: response
                    .model_version
                    .unwrap_or_else(|| request.model.clone()),
                backend: BackendKind::Gemini,
            })
        })
    }

    fn open_stream<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> BoxFuture<'a, Result<StreamHandle, BackendError>> {
        Box::pin(async move {
            let body = Self::build_body(request)?;
            let started_at = Instant::now();
            let events = self
                .transport
                .open_sse(&Self::path(&request.model, true), &body)
                .await?;

            let raw = stream! {
                let mut events = Box::pin(events);
                let mut call_offset = 0usize;
                while let Some(event) = events.next().await {
                    let event = match event {
                        Ok(event) => event,
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    };
                    match serde_json::from_str::<GenerateContentResponse>(&event.data) {
                        Ok(response) => {
                            if let Some(reason) = response.blocked() {
                                yield Err(BackendError::ContentFilter(format!(
                                    "Response blocked: {}",
                                    reason
                                )));
                                return;
                            }
                            let calls = response.function_call_count();
                            yield Ok(RawDelta::Gemini(GeminiChunk { response, call_offset }));
                            call_offset += calls;
                        }
                        Err(e) => tracing::warn!("Dropping malformed Gemini chunk: {}", e),
                    }
                }
            };

            Ok(StreamHandle {
                backend: BackendKind::Gemini,
                model: request.model.clone(),
                started_at,
                raw: Box::pin(raw),
            })
        })
    }
}

/// Function-call args arrive as an object; tool arguments travel as a JSON
/// string.
pub fn normalize_args(args: Value) -> String {
    match args {
        Value::Null => Value::Object(Map::new()).to_string(),
        other => other.to_string(),
    }
}
