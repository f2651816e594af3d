//! One-shot sequential fallback to the secondary backend.

use crate::llm::{Backend, BackendError, BackendResponse, BackendSet, CompletionRequest, StreamHandle};
use std::future::Future;
use std::sync::Arc;

/// A successful call and the backend that served it.
pub struct Routed<T> {
    pub value: T,
    pub backend: Arc<dyn Backend>,
    pub model: String,
    pub used_fallback: bool,
}

/// Call the primary; if it fails and a secondary exists, call the secondary
/// once with the original messages.
///
/// The secondary gets no tool definitions, so a fallback answer never starts
/// a tool loop. When both fail the primary's error is returned.
pub async fn with_fallback<T, F, Fut>(
    backends: &BackendSet,
    request: &CompletionRequest,
    call: F,
) -> Result<Routed<T>, BackendError>
where
    F: Fn(Arc<dyn Backend>, CompletionRequest) -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let primary_error = match call(backends.primary.clone(), request.clone()).await {
        Ok(value) => {
            return Ok(Routed {
                value,
                backend: backends.primary.clone(),
                model: request.model.clone(),
                used_fallback: false,
            });
        }
        Err(e) => e,
    };

    let Some(secondary) = &backends.secondary else {
        tracing::warn!(
            "Backend {} failed with no fallback configured: {}",
            backends.primary.kind(),
            primary_error
        );
        return Err(primary_error);
    };

    tracing::info!(
        "Backend {} failed ({}), falling back to {} with model {}",
        backends.primary.kind(),
        primary_error.kind(),
        secondary.backend.kind(),
        secondary.model
    );

    let retry = CompletionRequest {
        model: secondary.model.clone(),
        tools: None,
        ..request.clone()
    };
    match call(secondary.backend.clone(), retry).await {
        Ok(value) => Ok(Routed {
            value,
            backend: secondary.backend.clone(),
            model: secondary.model.clone(),
            used_fallback: true,
        }),
        Err(secondary_error) => {
            tracing::error!(
                "Fallback backend {} also failed: {} (primary: {})",
                secondary.backend.kind(),
                secondary_error,
                primary_error
            );
            Err(primary_error)
        }
    }
}

pub async fn send_with_fallback(
    backends: &BackendSet,
    request: &CompletionRequest,
) -> Result<Routed<BackendResponse>, BackendError> {
    with_fallback(backends, request, |backend, request| async move {
        backend.send(&request).await
    })
    .await
}

/// Fallback covers opening the stream only; errors inside an open stream
/// are not retried elsewhere.
pub async fn open_with_fallback(
    backends: &BackendSet,
    request: &CompletionRequest,
) -> Result<Routed<StreamHandle>, BackendError> {
    with_fallback(backends, request, |backend, request| async move {
        backend.open_stream(&request).await
    })
    .await
}
