use crate::orchestrator::collaborators::ToolOutput;
use std::collections::BTreeMap;

pub const SYSTEM_PROMPT: &str = "You are a shopping assistant that helps people find deals, coupons and \
trending products. Use the provided tools or data to answer; never invent prices, codes or \
deals. Keep answers short and friendly.

Always reply with a single JSON object and nothing else:
{\"message\": \"<answer shown to the user>\", \"dealIds\": [<ids of the deals you mention>]}
Use an empty dealIds array when no specific deal is referenced.";

/// Shown when no backend could answer.
pub const APOLOGY: &str =
    "Sorry, I'm having trouble answering right now. Please try again in a moment.";

pub const UNAVAILABLE: &str = "Chat is currently unavailable.";
pub const EMPTY_MESSAGE: &str = "Please enter a message.";

/// System prompt with caller context appended as `key: value` lines.
pub fn system_prompt(context: &BTreeMap<String, String>) -> String {
    if context.is_empty() {
        return SYSTEM_PROMPT.to_string();
    }

    let mut prompt = String::from(SYSTEM_PROMPT);
    prompt.push_str("\n\nContext:");
    for (key, value) in context {
        prompt.push_str(&format!("\n- {}: {}", key, value));
    }
    prompt
}

pub fn too_long(max_chars: usize) -> String {
    format!("Message is too long (maximum {} characters).", max_chars)
}

/// Appended to the user's message when data was fetched on the model's behalf.
pub fn injected_data(tool: &str, payload: &str) -> String {
    format!(
        "\n\n[Data from {}]\n{}\n\nAnswer using only this data. Put the id of every deal you \
         mention into the \"dealIds\" field of your JSON reply.",
        tool, payload
    )
}

/// Text for a degraded result that still carries plain search results.
pub fn degraded_with_results(output: &ToolOutput) -> String {
    let mut text = String::from(
        "Sorry, I'm having trouble answering right now. Here are some deals that may match your search:",
    );
    for deal in &output.deals {
        text.push_str(&format!("\n- {} at {}: ${:.2}", deal.title, deal.store, deal.price));
    }
    text
}
