//! Incremental Server-Sent Events decoding.
//!
//! Backends deliver SSE over chunked HTTP, and network chunks do not line up
//! with event boundaries: a single `data:` line (or a multi-byte UTF-8
//! character) can be split across chunks. [`SseDecoder`] buffers bytes until
//! a full line is available and dispatches an event on each blank line.

use crate::llm::error::BackendError;
use async_stream::stream;
use futures::{Stream, StreamExt};
use std::time::Duration;

/// One dispatched SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Value of the `event:` field, if any.
    pub event: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a network chunk and collect every event it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(event) = self.process_line(line) {
                events.push(event);
            }
        }

        events
    }

    /// Flush whatever is pending once the body has ended.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).into_owned();
            if let Some(event) = self.process_line(line.trim_end_matches('\r')) {
                return Some(event);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() {
            self.event = None;
            return None;
        }
        Some(SseEvent {
            event: self.event.take(),
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

/// Turn an HTTP body into a stream of SSE events.
///
/// Each chunk must arrive within `idle_timeout`, otherwise the stream ends
/// with a `Timeout` error. Transport failures end it with a `Stream` error.
pub fn decode_events<S, B>(
    body: S,
    idle_timeout: Duration,
) -> impl Stream<Item = Result<SseEvent, BackendError>> + Send
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send,
{
    stream! {
        let mut body = Box::pin(body);
        let mut decoder = SseDecoder::new();
        let mut chunk_count = 0usize;

        loop {
            let next = match tokio::time::timeout(idle_timeout, body.next()).await {
                Ok(next) => next,
                Err(_) => {
                    tracing::error!(
                        "Stream idle for more than {}s after {} chunks",
                        idle_timeout.as_secs(),
                        chunk_count
                    );
                    yield Err(BackendError::Timeout(format!(
                        "no stream data for {}s",
                        idle_timeout.as_secs()
                    )));
                    return;
                }
            };

            match next {
                Some(Ok(bytes)) => {
                    chunk_count += 1;
                    for event in decoder.push(bytes.as_ref()) {
                        yield Ok(event);
                    }
                }
                Some(Err(e)) => {
                    tracing::error!("Stream transport error after {} chunks: {}", chunk_count, e);
                    yield Err(BackendError::Stream(e.to_string()));
                    return;
                }
                None => break,
            }
        }

        if let Some(event) = decoder.finish() {
            yield Ok(event);
        }
        tracing::debug!("Stream closed normally after {} chunks", chunk_count);
    }
}
