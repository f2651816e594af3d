use crate::config::{BackendKind, ProviderConfig};
use crate::llm::anthropic_provider::AnthropicBackend;
use crate::llm::error::BackendError;
use crate::llm::gemini_provider::GeminiBackend;
use crate::llm::openai_provider::OpenAiBackend;
use crate::llm::types::{BackendResponse, Completion, CompletionRequest, StreamHandle};
use futures::future::BoxFuture;
use std::sync::Arc;

/// One large-language-model backend behind the normalized contract.
///
/// Implementations translate [`CompletionRequest`] into the backend's native
/// call shape and map every native failure into a [`BackendError`].
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Non-streaming completion with usage and cost filled in.
    fn send<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> BoxFuture<'a, Result<BackendResponse, BackendError>>;

    /// Open a stream. Returns only once the backend has accepted the request
    /// and answered with an event stream.
    fn open_stream<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> BoxFuture<'a, Result<StreamHandle, BackendError>>;

    /// Dispatch on `request.stream`.
    fn complete<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> BoxFuture<'a, Result<Completion, BackendError>> {
        Box::pin(async move {
            if request.stream {
                self.open_stream(request).await.map(Completion::Stream)
            } else {
                self.send(request).await.map(Completion::Full)
            }
        })
    }
}

/// Builds backend clients from explicit configuration.
pub struct BackendFactory;

impl BackendFactory {
    pub fn create(
        kind: BackendKind,
        config: Arc<ProviderConfig>,
    ) -> Result<Arc<dyn Backend>, BackendError> {
        let backend: Arc<dyn Backend> = match kind {
            BackendKind::OpenAi => Arc::new(OpenAiBackend::new(config)?),
            BackendKind::Anthropic => Arc::new(AnthropicBackend::new(config)?),
            BackendKind::Gemini => Arc::new(GeminiBackend::new(config)?),
        };
        Ok(backend)
    }
}

/// The secondary backend and the model it is called with.
#[derive(Clone)]
pub struct Secondary {
    pub backend: Arc<dyn Backend>,
    pub model: String,
}

/// Primary backend plus the optional one-shot fallback, constructed once at
/// process start and handed to the orchestrator.
#[derive(Clone)]
pub struct BackendSet {
    pub primary: Arc<dyn Backend>,
    pub secondary: Option<Secondary>,
}

impl BackendSet {
    pub fn new(primary: Arc<dyn Backend>) -> Self {
        Self {
            primary,
            secondary: None,
        }
    }

    pub fn with_secondary(mut self, backend: Arc<dyn Backend>, model: impl Into<String>) -> Self {
        self.secondary = Some(Secondary {
            backend,
            model: model.into(),
        });
        self
    }

    pub fn from_config(config: Arc<ProviderConfig>) -> Result<Self, BackendError> {
        let primary = BackendFactory::create(config.active_backend, config.clone())?;
        let mut set = Self::new(primary);

        if let Some(fallback) = &config.fallback {
            match BackendFactory::create(fallback.backend, config.clone()) {
                Ok(backend) => {
                    tracing::info!(
                        "Fallback backend {} configured with model {}",
                        fallback.backend,
                        fallback.model
                    );
                    set = set.with_secondary(backend, fallback.model.clone());
                }
                Err(e) => {
                    tracing::warn!("Fallback backend {} unavailable: {}", fallback.backend, e);
                }
            }
        }

        Ok(set)
    }
}

/// API key for `kind`, or a `CONFIG_ERROR` naming the missing setting.
pub(crate) fn require_api_key(
    config: &ProviderConfig,
    kind: BackendKind,
) -> Result<String, BackendError> {
    config
        .credentials(kind)
        .api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| BackendError::Config(format!("No API key configured for {}", kind)))
}

/// Transport settings shared by every adapter.
pub(crate) fn transport_settings(
    transport: crate::llm::http::HttpTransport,
    config: &ProviderConfig,
) -> crate::llm::http::HttpTransport {
    transport
        .with_timeouts(config.timeout(), config.stream_idle_timeout())
        .with_retry(crate::llm::retry::RetryPolicy::new(config.request.max_attempts))
}
