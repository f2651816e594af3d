//! Manual tool execution for models that must not receive native tools.

use crate::llm::{ChatMessage, Role};
use crate::orchestrator::collaborators::ToolOutput;
use crate::orchestrator::prompts;
use crate::orchestrator::types::{Classification, Intent};
use crate::tools::{GET_COUPONS, GET_TRENDING_DEALS, SEARCH_DEALS};
use serde_json::{Map, Value, json};

/// The single tool call most relevant to an intent.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedCall {
    pub name: &'static str,
    pub arguments: Value,
}

/// Choose the tool for `classification`, or `None` when the intent needs no
/// catalog data.
pub fn plan(classification: &Classification, message: &str, limit: usize) -> Option<PlannedCall> {
    let entities = &classification.entities;
    let mut arguments = Map::new();
    let mut put = |key: &str, value: Option<Value>| {
        if let Some(value) = value {
            arguments.insert(key.to_string(), value);
        }
    };

    let name = match classification.intent {
        Intent::Search | Intent::Compare => {
            let query = entities
                .query
                .clone()
                .unwrap_or_else(|| message.trim().to_string());
            put("query", Some(json!(query)));
            put("store", entities.store.as_ref().map(|s| json!(s)));
            put("category", entities.category.as_ref().map(|c| json!(c)));
            put("max_price", entities.max_price.map(|p| json!(p)));
            put("limit", Some(json!(limit)));
            SEARCH_DEALS
        }
        Intent::Coupon => {
            put("store", entities.store.as_ref().map(|s| json!(s)));
            GET_COUPONS
        }
        Intent::Trending => {
            put("category", entities.category.as_ref().map(|c| json!(c)));
            put("limit", Some(json!(limit)));
            GET_TRENDING_DEALS
        }
        Intent::Greeting | Intent::Faq | Intent::General => return None,
    };

    Some(PlannedCall {
        name,
        arguments: Value::Object(arguments),
    })
}

/// Result limited to `max_results` deals and coupons.
pub fn truncate(output: &ToolOutput, max_results: usize) -> ToolOutput {
    let mut output = output.clone();
    output.deals.truncate(max_results);
    output.coupons.truncate(max_results);
    output
}

/// Append `output` to the last user message with the `dealIds` instruction.
pub fn inject(messages: &mut [ChatMessage], tool: &str, output: &ToolOutput) {
    let payload = serde_json::to_string(output).unwrap_or_else(|_| "{}".to_string());
    match messages.iter_mut().rev().find(|m| m.role == Role::User) {
        Some(message) => {
            let mut content = message.content.take().unwrap_or_default();
            content.push_str(&prompts::injected_data(tool, &payload));
            message.content = Some(content);
        }
        None => tracing::warn!("No user message to attach {} data to", tool),
    }
}
