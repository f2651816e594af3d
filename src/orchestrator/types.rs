use crate::config::Complexity;
use crate::llm::{ChatMessage, ErrorKind, Usage};
use crate::stream::DealId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// The rate-limiting principal of a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Identity {
    /// Authenticated user id.
    User(String),
    /// Anonymous caller, identified by network address.
    Guest(String),
}

impl Identity {
    /// Key used by the rate limiter: `u:<id>` or `ip:<addr>`.
    pub fn key(&self) -> String {
        match self {
            Identity::User(id) => format!("u:{}", id),
            Identity::Guest(addr) => format!("ip:{}", addr),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Identity::User(_))
    }
}

/// Input to [`crate::orchestrator::Orchestrator::chat`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub identity: Identity,
    /// Prior turns, oldest first.
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    /// Caller-supplied facts appended to the system prompt.
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>, identity: Identity) -> Self {
        Self {
            message: message.into(),
            identity,
            history: Vec::new(),
            context: BTreeMap::new(),
        }
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Search,
    Coupon,
    Trending,
    Compare,
    Greeting,
    Faq,
    General,
}

impl Intent {
    /// Intents whose answer depends on catalog data.
    pub fn needs_data(&self) -> bool {
        matches!(
            self,
            Intent::Search | Intent::Coupon | Intent::Trending | Intent::Compare
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Search => "search",
            Intent::Coupon => "coupon",
            Intent::Trending => "trending",
            Intent::Compare => "compare",
            Intent::Greeting => "greeting",
            Intent::Faq => "faq",
            Intent::General => "general",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entities {
    pub query: Option<String>,
    pub store: Option<String>,
    pub category: Option<String>,
    pub max_price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub intent: Intent,
    pub complexity: Complexity,
    pub entities: Entities,
    /// Canned answer that bypasses the model entirely.
    pub faq_response: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deal {
    pub id: DealId,
    pub title: String,
    pub store: String,
    #[serde(default)]
    pub category: Option<String>,
    pub price: f64,
    #[serde(default)]
    pub original_price: Option<f64>,
    #[serde(default)]
    pub url: Option<String>,
    /// Relative popularity used for trending lists.
    #[serde(default)]
    pub popularity: u32,
}

impl Deal {
    /// Discount in percent, if the original price is known.
    pub fn discount_pct(&self) -> Option<f64> {
        self.original_price
            .filter(|orig| *orig > 0.0 && *orig > self.price)
            .map(|orig| (orig - self.price) / orig * 100.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coupon {
    pub code: String,
    pub store: String,
    pub description: String,
    #[serde(default)]
    pub expires: Option<chrono::NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreInfo {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
    /// Whole seconds until a rate-limited caller may try again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.retryable(),
            retry_after_secs: None,
        }
    }

    /// Rounded up so a caller waiting this long is past the window.
    pub fn with_retry_after(mut self, wait: Duration) -> Self {
        let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
        self.retry_after_secs = Some(secs.max(1));
        self
    }
}

/// Terminal output of a chat call, identical for streamed and non-streamed
/// requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResult {
    pub success: bool,
    pub content: String,
    #[serde(default)]
    pub deal_ids: Vec<DealId>,
    #[serde(default)]
    pub deals: Vec<Deal>,
    #[serde(default)]
    pub coupons: Vec<Coupon>,
    #[serde(default)]
    pub store: Option<StoreInfo>,
    pub intent: Option<Intent>,
    pub request_id: Uuid,
    pub latency_ms: u64,
    pub cached: bool,
    pub usage: Usage,
    pub cost: f64,
    pub model: Option<String>,
    pub error: Option<ErrorInfo>,
    pub status_code: Option<u16>,
}

impl ChatResult {
    /// Successful answer with no usage attached yet.
    pub fn answer(request_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            deal_ids: Vec::new(),
            deals: Vec::new(),
            coupons: Vec::new(),
            store: None,
            intent: None,
            request_id,
            latency_ms: 0,
            cached: false,
            usage: Usage::default(),
            cost: 0.0,
            model: None,
            error: None,
            status_code: Some(200),
        }
    }

    /// Failed request carrying a short user-facing message.
    pub fn failure(request_id: Uuid, error: ErrorInfo, content: impl Into<String>) -> Self {
        Self {
            success: false,
            status_code: Some(error.kind.status_code()),
            error: Some(error),
            ..Self::answer(request_id, content)
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}
