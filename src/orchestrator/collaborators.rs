//! Contracts of the services the orchestrator consumes.
//!
//! The cache, the rate limiter, the intent classifier and the tool executor
//! are external to the engine. Only their operations and consistency
//! guarantees matter here: single-key get/set and atomic counter increments.

use crate::llm::ToolDefinition;
use crate::orchestrator::types::{
    ChatResult, Classification, Coupon, Deal, Identity, StoreInfo,
};
use crate::tools::ToolError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// How a cache key is matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchKind {
    /// Verbatim trimmed message text.
    Exact,
    /// Embedding-similarity match.
    Semantic,
}

#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn get(&self, key: &str, kind: MatchKind) -> Option<ChatResult>;
    async fn set(&self, key: &str, value: &ChatResult, kind: MatchKind);
}

/// Rate-limit counter windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Window {
    Minute,
    Day,
}

impl Window {
    pub fn duration(&self) -> Duration {
        match self {
            Window::Minute => Duration::from_secs(60),
            Window::Day => Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub limited: bool,
    pub message: Option<String>,
    pub retry_after: Option<Duration>,
}

impl RateLimitDecision {
    pub fn allowed() -> Self {
        Self::default()
    }

    pub fn limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            limited: true,
            message: Some(message.into()),
            retry_after,
        }
    }
}

#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn check_rate_limit(&self, identity: &Identity) -> RateLimitDecision;
    async fn increment_query_count(&self, identity: &Identity, window: Window);
}

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Classification;
}

/// Structured result of one tool execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutput {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deals: Vec<Deal>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub coupons: Vec<Coupon>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<StoreInfo>,
}

#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Declarations handed to tool-capable models.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Run `name` with JSON arguments. Unknown names and arguments that do
    /// not match the tool's schema are errors.
    async fn execute(&self, name: &str, arguments: Value) -> Result<ToolOutput, ToolError>;
}
