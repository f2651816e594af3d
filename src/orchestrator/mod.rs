//! End-to-end chat request flow.
//!
//! A request moves through validation, the rate-limit check, the exact-match
//! cache, classification (with canned FAQ answers short-circuiting), manual
//! tool preflight for models without native tool support, the primary
//! completion with one-shot fallback, at most one tool round, assembly and
//! finally caching and counting.

pub mod collaborators;
pub mod engine;
pub mod fallback;
pub mod preflight;
pub mod prompts;
pub mod types;

#[cfg(test)]
pub mod tests;

pub use collaborators::{
    IntentClassifier, MatchKind, RateLimitDecision, RateLimitStore, ResponseCache, ToolExecutor,
    ToolOutput, Window,
};
pub use engine::Orchestrator;
pub use types::*;
