//! # dealchat
//!
//! A shopping assistant that answers deal, coupon and store questions through
//! interchangeable LLM backends, with a built-in deal catalog exposed to the
//! model as tools.
//!
//! ## Architecture Overview
//!
//! - **[`llm`]**: Backend-agnostic completion interface with OpenAI, Anthropic
//!   and Gemini adapters, retry and error classification
//! - **[`stream`]**: Streaming delta parsing, reasoning separation and
//!   structured answer extraction
//! - **[`orchestrator`]**: The request pipeline: validation, rate limits,
//!   caching, classification, tool rounds and fallback
//! - **[`store`]**: In-memory response cache and sliding-window rate limiter
//! - **[`classifier`]**: Rule-based intent and entity classification
//! - **[`tools`]**: Deal catalog and the tool registry the model calls into
//! - **[`config`]**: Layered configuration (file discovery plus environment)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dealchat::classifier::KeywordClassifier;
//! use dealchat::config::ProviderConfig;
//! use dealchat::llm::BackendSet;
//! use dealchat::orchestrator::{ChatRequest, Identity, Orchestrator};
//! use dealchat::store::MemoryStore;
//! use dealchat::tools::{Catalog, ToolRegistry};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Arc::new(ProviderConfig::load(None)?);
//!     let backends = BackendSet::from_config(config.clone())?;
//!     let store = Arc::new(MemoryStore::from_config(&config));
//!     let tools = ToolRegistry::new(
//!         Arc::new(Catalog::from_json_file("catalog.json")?),
//!         config.limits.max_tool_results,
//!         config.cache_ttls.tool(),
//!     );
//!
//!     let orchestrator = Orchestrator::new(
//!         config,
//!         backends,
//!         store.clone(),
//!         store,
//!         Arc::new(KeywordClassifier::default()),
//!         Arc::new(tools),
//!     );
//!
//!     let request = ChatRequest::new("TV deals under $500", Identity::Guest("127.0.0.1".into()));
//!     let result = orchestrator.chat(request).await;
//!     println!("{}", result.content);
//!     Ok(())
//! }
//! ```

/// Provider configuration and discovery.
///
/// Settings come from built-in defaults, an optional TOML file and
/// environment variables, in that order of precedence.
pub mod config;

/// Environment constants and path utilities.
pub mod env;

/// Backend-agnostic LLM interface.
///
/// One [`llm::Backend`] trait over the OpenAI, Anthropic and Gemini wire
/// formats, with a shared retry policy and normalized error kinds.
pub mod llm;

/// Incremental stream parsing and answer extraction.
pub mod stream;

/// The chat request pipeline.
pub mod orchestrator;

/// In-memory cache and rate limiter.
pub mod store;

/// Intent classification.
pub mod classifier;

/// Deal catalog tools.
pub mod tools;

/// Token and cost accounting.
pub mod usage;

/// Command line interface.
pub mod cli;

pub use config::{BackendKind, ConfigDiscovery, ProviderConfig};
pub use llm::{Backend, BackendError, BackendSet, ErrorKind};
pub use orchestrator::{ChatRequest, ChatResult, Identity, Orchestrator};
pub use store::MemoryStore;
pub use stream::StreamEvent;
pub use usage::UsageTracker;
