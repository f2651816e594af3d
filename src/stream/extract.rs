//! Structured payload extraction from free-form model output.
//!
//! Models are asked for `{"message": ..., "dealIds": [...]}` but frequently
//! wrap it in reasoning, prose or code fences. [`extract_payload`] walks a
//! fixed ladder of increasingly loose heuristics and always produces an
//! answer: if nothing structured is found the cleaned text is the message.

use crate::config::ExtractionConfig;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// Identifier of a deal in the catalog.
pub type DealId = i64;

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").unwrap());

static TAIL_OBJECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)(\{\s*"message"\s*:.*\})\s*$"#).unwrap());

static MESSAGE_FIELD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""message"\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap());

static DEAL_IDS_FIELD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""dealIds"\s*:\s*\[([^\]]*)\]"#).unwrap());

/// Which rung of the ladder produced the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionSource {
    /// Whole-object JSON parse.
    Json,
    /// Tail `{"message": ...}` object.
    TailObject,
    /// Bare field regexes.
    Fields,
    /// Cleaned text used verbatim.
    PlainText,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub message: String,
    pub deal_ids: Vec<DealId>,
    pub source: ExtractionSource,
}

/// Run the extraction ladder over `text`. Pure and deterministic.
pub fn extract_payload(text: &str, config: &ExtractionConfig) -> Extracted {
    let cleaned = strip_reasoning(text, &config.reasoning_tags);
    let trimmed = drop_meta_prefix(&cleaned, config);
    let unfenced = strip_fence(trimmed);

    if let Some(found) = parse_object(unfenced) {
        return found.with_source(ExtractionSource::Json);
    }

    if let Some(found) = TAIL_OBJECT_RE
        .captures(unfenced)
        .and_then(|caps| caps.get(1))
        .and_then(|m| parse_object(m.as_str()))
    {
        return found.with_source(ExtractionSource::TailObject);
    }

    let deal_ids = DEAL_IDS_FIELD_RE
        .captures(unfenced)
        .and_then(|caps| caps.get(1))
        .map(|m| parse_id_list(m.as_str()))
        .unwrap_or_default();

    if let Some(raw) = MESSAGE_FIELD_RE
        .captures(unfenced)
        .and_then(|caps| caps.get(1))
    {
        tracing::warn!("Structured answer was malformed, recovered message field by pattern");
        return Extracted {
            message: unescape(raw.as_str()),
            deal_ids,
            source: ExtractionSource::Fields,
        };
    }

    tracing::debug!("No structured answer found, using text verbatim");
    Extracted {
        message: cleaned.trim().to_string(),
        deal_ids,
        source: ExtractionSource::PlainText,
    }
}

/// Remove every `<tag>...</tag>` pair, then any stray markers.
pub fn strip_reasoning(text: &str, tags: &[String]) -> String {
    let mut out = text.to_string();
    for tag in tags {
        let tag = regex::escape(tag);
        if let Ok(pair) = Regex::new(&format!(r"(?s)<{tag}>.*?</{tag}>")) {
            out = pair.replace_all(&out, "").into_owned();
        }
        if let Ok(marker) = Regex::new(&format!(r"</?{tag}>")) {
            out = marker.replace_all(&out, "").into_owned();
        }
    }
    out.trim().to_string()
}

/// Drop a long meta-commentary lead-in before the first `{`.
fn drop_meta_prefix<'a>(text: &'a str, config: &ExtractionConfig) -> &'a str {
    let Some(brace) = text.find('{') else {
        return text;
    };
    let prefix = &text[..brace];
    if prefix.chars().count() <= config.meta_prefix_min_len {
        return text;
    }

    let lowered = prefix.trim_start().to_lowercase();
    let is_meta = config
        .meta_prefixes
        .iter()
        .any(|lead| lowered.starts_with(lead.as_str()) || lowered.contains(lead.as_str()));
    if is_meta {
        tracing::debug!("Dropping {} chars of meta commentary", prefix.len());
        &text[brace..]
    } else {
        text
    }
}

fn strip_fence(text: &str) -> &str {
    FENCE_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text)
}

/// Parse from the first `{` to the last `}` as a `{message, dealIds}` object.
fn parse_object(text: &str) -> Option<Extracted> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    let value: Value = serde_json::from_str(&text[start..=end]).ok()?;
    let message = value.get("message")?.as_str()?.to_string();
    let deal_ids = value
        .get("dealIds")
        .and_then(Value::as_array)
        .map(|ids| ids.iter().filter_map(deal_id).collect())
        .unwrap_or_default();
    Some(Extracted {
        message,
        deal_ids,
        source: ExtractionSource::Json,
    })
}

impl Extracted {
    fn with_source(mut self, source: ExtractionSource) -> Self {
        self.source = source;
        self
    }
}

/// Numbers and numeric strings are both accepted as ids.
pub fn deal_id(value: &Value) -> Option<DealId> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_id_list(list: &str) -> Vec<DealId> {
    list.split(',')
        .filter_map(|item| item.trim().trim_matches(['"', '\'']).parse().ok())
        .collect()
}

fn unescape(raw: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{}\"", raw)).unwrap_or_else(|_| raw.to_string())
}
