pub mod anthropic_provider;
pub mod error;
pub mod gemini_provider;
pub mod http;
pub mod openai_provider;
pub mod provider;
pub mod retry;
pub mod sse;
pub mod types;


pub use anthropic_provider::AnthropicBackend;
pub use error::{BackendError, ErrorKind};
pub use gemini_provider::GeminiBackend;
pub use openai_provider::OpenAiBackend;
pub use provider::{Backend, BackendFactory, BackendSet, Secondary};
pub use retry::RetryPolicy;
pub use types::*;
