use super::*;
use crate::config::ExtractionConfig;
use crate::llm::RawDelta;
use crate::llm::anthropic_provider::AnthropicEvent;
use crate::llm::gemini_provider::GeminiChunk;
use crate::llm::openai_provider::ChatCompletionChunk;
use serde_json::json;

fn tool_fragment(name: Option<&str>, arguments: Option<&str>) -> Delta {
    Delta {
        tool_calls: vec![ToolCallDelta {
            index: 0,
            id: None,
            name: name.map(str::to_string),
            arguments: arguments.map(str::to_string),
        }],
        ..Delta::default()
    }
}

fn texts(events: &[StreamEvent]) -> (String, String) {
    let mut text = String::new();
    let mut thinking = String::new();
    for event in events {
        match event {
            StreamEvent::Text { content } => text.push_str(content),
            StreamEvent::Thinking { content } => thinking.push_str(content),
            _ => {}
        }
    }
    (text, thinking)
}

#[test]
fn test_tool_call_fragments_merge_by_index() {
    let deltas = vec![
        tool_fragment(Some("search"), Some("{\"query\":\"")),
        tool_fragment(Some("_deals"), None),
        tool_fragment(None, Some("tv\"}")),
    ];

    let (events, parsed) = parse_deltas(deltas, &ExtractionConfig::default());

    assert_eq!(events.len(), 3);
    assert_eq!(parsed.tool_calls.len(), 1);
    assert_eq!(parsed.tool_calls[0].name, "search_deals");
    assert_eq!(parsed.tool_calls[0].arguments, "{\"query\":\"tv\"}");
    assert_eq!(parsed.tool_calls[0].id, "call_0");
}

#[test]
fn test_inline_tags_split_reasoning_from_text() {
    let deltas = vec![
        Delta::text("Sure. <think>the user"),
        Delta::text(" wants tvs</think>{\"message\":"),
        Delta::text("\"ok\",\"dealIds\":[1]}"),
    ];

    let (events, parsed) = parse_deltas(deltas, &ExtractionConfig::default());
    let (text, thinking) = texts(&events);

    assert_eq!(thinking, "the user wants tvs");
    assert_eq!(text, "Sure. {\"message\":\"ok\",\"dealIds\":[1]}");
    assert_eq!(parsed.text, text);
    assert_eq!(parsed.reasoning, thinking);
    assert_eq!(parsed.extracted.message, "ok");
    assert_eq!(parsed.extracted.deal_ids, vec![1]);
}

#[test]
fn test_tag_split_across_deltas() {
    let mut state = StreamState::new(&ExtractionConfig::default());

    let first = state.step(Delta::text("Hi <thi"));
    assert_eq!(
        first,
        vec![StreamEvent::Text {
            content: "Hi ".to_string()
        }]
    );
    assert!(!state.inside_reasoning());

    let second = state.step(Delta::text("nk>hmm"));
    assert!(state.inside_reasoning());
    assert_eq!(
        second,
        vec![StreamEvent::Thinking {
            content: "hmm".to_string()
        }]
    );
}

#[test]
fn test_trailing_partial_tag_is_released_at_end() {
    let mut state = StreamState::new(&ExtractionConfig::default());
    let mut events = state.step(Delta::text("Use code SAVE"));
    events.extend(state.step(Delta::text(" if total <")));
    let (streamed, _) = texts(&events);
    assert_eq!(streamed, "Use code SAVE if total ");

    let tail = state.flush();
    assert_eq!(
        tail,
        vec![StreamEvent::Text {
            content: "<".to_string()
        }]
    );
    assert!(state.flush().is_empty());
    events.extend(tail);

    let parsed = state.finish();
    let (text, _) = texts(&events);
    assert_eq!(text, "Use code SAVE if total <");
    assert_eq!(parsed.text, text);
}

#[test]
fn test_trailing_partial_tag_inside_reasoning_stays_reasoning() {
    let (events, parsed) = parse_deltas(
        vec![Delta::text("<think>weighing a</"), Delta::text("thi")],
        &ExtractionConfig::default(),
    );
    let (text, thinking) = texts(&events);
    assert_eq!(text, "");
    assert_eq!(thinking, "weighing a</thi");
    assert_eq!(parsed.reasoning, thinking);
}

#[test]
fn test_several_tags_in_one_delta() {
    let (events, parsed) = parse_deltas(
        vec![Delta::text("a<think>b</think>c<reasoning>d</reasoning>e")],
        &ExtractionConfig::default(),
    );
    let (text, thinking) = texts(&events);
    assert_eq!(text, "ace");
    assert_eq!(thinking, "bd");
    assert_eq!(parsed.extracted.message, "ace");
}

#[test]
fn test_orphan_closing_tag_marks_prefix_as_reasoning() {
    let (events, _) = parse_deltas(
        vec![Delta::text("planning quietly</think>Answer")],
        &ExtractionConfig::default(),
    );
    let (text, thinking) = texts(&events);
    assert_eq!(thinking, "planning quietly");
    assert_eq!(text, "Answer");
}

#[test]
fn test_reasoning_field_is_independent_of_tags() {
    let mut state = StreamState::new(&ExtractionConfig::default());
    let events = state.step(Delta {
        content: Some("visible".to_string()),
        reasoning: Some("hidden".to_string()),
        ..Delta::default()
    });
    assert_eq!(
        events,
        vec![
            StreamEvent::Thinking {
                content: "hidden".to_string()
            },
            StreamEvent::Text {
                content: "visible".to_string()
            },
        ]
    );
    assert!(!state.inside_reasoning());
}

#[test]
fn test_usage_and_finish_reason_are_tracked() {
    let deltas = vec![
        Delta {
            usage: Some(UsageDelta {
                input_tokens: Some(12),
                output_tokens: None,
            }),
            ..Delta::default()
        },
        Delta::text("done"),
        Delta {
            finish_reason: Some("end_turn".to_string()),
            usage: Some(UsageDelta {
                input_tokens: None,
                output_tokens: Some(5),
            }),
            ..Delta::default()
        },
    ];
    let (_, parsed) = parse_deltas(deltas, &ExtractionConfig::default());
    assert_eq!(parsed.usage.total_tokens, 17);
    assert_eq!(parsed.finish_reason.as_deref(), Some("end_turn"));
}

#[test]
fn test_openai_chunk_normalization() {
    let chunk: ChatCompletionChunk = serde_json::from_value(json!({
        "choices": [{
            "delta": {
                "reasoning_content": "hmm",
                "tool_calls": [{"index": 1, "id": "call_x", "function": {"name": "get_coupons", "arguments": ""}}]
            },
            "finish_reason": null
        }]
    }))
    .unwrap();

    let delta = Delta::from(RawDelta::OpenAi(chunk));
    assert_eq!(delta.reasoning.as_deref(), Some("hmm"));
    assert_eq!(delta.tool_calls[0].index, 1);
    assert_eq!(delta.tool_calls[0].name.as_deref(), Some("get_coupons"));
}

#[test]
fn test_anthropic_event_normalization() {
    let start: AnthropicEvent = serde_json::from_value(json!({
        "type": "content_block_start",
        "index": 1,
        "content_block": {"type": "tool_use", "id": "toolu_1", "name": "search_deals", "input": {}}
    }))
    .unwrap();
    let partial: AnthropicEvent = serde_json::from_value(json!({
        "type": "content_block_delta",
        "index": 1,
        "delta": {"type": "input_json_delta", "partial_json": "{\"query\":\"tv\"}"}
    }))
    .unwrap();
    let unknown: AnthropicEvent =
        serde_json::from_value(json!({"type": "something_new", "x": 1})).unwrap();

    let (events, parsed) = parse_deltas(
        [start, partial, unknown]
            .into_iter()
            .map(|e| Delta::from(RawDelta::Anthropic(e))),
        &ExtractionConfig::default(),
    );
    assert_eq!(events.len(), 2);
    assert_eq!(parsed.tool_calls[0].id, "toolu_1");
    assert_eq!(parsed.tool_calls[0].arguments, "{\"query\":\"tv\"}");
}

#[test]
fn test_gemini_chunk_normalization() {
    let response = serde_json::from_value(json!({
        "candidates": [{
            "content": {"parts": [
                {"text": "considering", "thought": true},
                {"text": "Here"},
                {"functionCall": {"name": "search_deals", "args": {"query": "tv"}}}
            ]}
        }]
    }))
    .unwrap();
    let delta = Delta::from(RawDelta::Gemini(GeminiChunk {
        response,
        call_offset: 2,
    }));

    assert_eq!(delta.reasoning.as_deref(), Some("considering"));
    assert_eq!(delta.content.as_deref(), Some("Here"));
    assert_eq!(delta.tool_calls[0].index, 2);
    assert_eq!(delta.tool_calls[0].id.as_deref(), Some("call_2"));
    assert_eq!(
        delta.tool_calls[0].arguments.as_deref(),
        Some("{\"query\":\"tv\"}")
    );
}

#[test]
fn test_stream_event_wire_format() {
    let event = StreamEvent::DealIds { ids: vec![1, 2] };
    assert_eq!(
        serde_json::to_value(&event).unwrap(),
        json!({"type": "dealIds", "ids": [1, 2]})
    );
    let event = StreamEvent::ToolCallDelta {
        index: 0,
        id: None,
        name: Some("search".to_string()),
        arguments: None,
    };
    assert_eq!(
        serde_json::to_value(&event).unwrap(),
        json!({"type": "tool_call_delta", "index": 0, "name": "search"})
    );
}
