pub mod delta;
pub mod extract;
pub mod parser;

#[cfg(test)]
pub mod tests;

pub use delta::{Delta, ToolCallDelta, UsageDelta};
pub use extract::{DealId, ExtractionSource, Extracted, extract_payload};
pub use parser::{ParsedStream, StreamEvent, StreamState};

use crate::config::ExtractionConfig;

/// Run a complete delta sequence through a fresh [`StreamState`].
pub fn parse_deltas<I>(deltas: I, extraction: &ExtractionConfig) -> (Vec<StreamEvent>, ParsedStream)
where
    I: IntoIterator<Item = Delta>,
{
    let mut state = StreamState::new(extraction);
    let mut events: Vec<StreamEvent> = deltas
        .into_iter()
        .flat_map(|delta| state.step(delta))
        .collect();
    events.extend(state.flush());
    (events, state.finish())
}
