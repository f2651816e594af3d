use crate::config::ProviderConfig;
use crate::llm::{
    BackendError, BackendSet, ChatMessage, CompletionRequest, ErrorKind, Role, StreamHandle,
    ToolCall, Usage,
};
use crate::orchestrator::collaborators::{
    IntentClassifier, MatchKind, RateLimitStore, ResponseCache, ToolExecutor, ToolOutput, Window,
};
use crate::orchestrator::fallback::{self, Routed};
use crate::orchestrator::preflight;
use crate::orchestrator::prompts;
use crate::orchestrator::types::{ChatRequest, ChatResult, Classification, ErrorInfo};
use crate::stream::{Delta, ParsedStream, StreamEvent, StreamState, extract_payload};
use crate::tools::SEARCH_DEALS;
use crate::usage::{UsageRecord, UsageSummary, UsageTracker};
use futures::StreamExt;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Coordinates validation, rate limiting, caching, classification, backend
/// calls with fallback and the single-round tool loop for one chat request.
///
/// All collaborators are injected; the orchestrator itself holds no
/// per-request state.
pub struct Orchestrator {
    config: Arc<ProviderConfig>,
    backends: BackendSet,
    cache: Arc<dyn ResponseCache>,
    limiter: Arc<dyn RateLimitStore>,
    classifier: Arc<dyn IntentClassifier>,
    tools: Arc<dyn ToolExecutor>,
    usage: UsageTracker,
}

/// Per-request data carried from preparation into the completion phase.
struct Plan {
    request_id: Uuid,
    started: Instant,
    key: String,
    classification: Classification,
    completion: CompletionRequest,
    collected: ToolOutput,
}

enum Prepared {
    /// Terminal result reached before any backend call.
    Done(ChatResult),
    Ready(Box<Plan>),
}

enum RelayError {
    Disconnected,
    Backend(BackendError),
}

impl Orchestrator {
    pub fn new(
        config: Arc<ProviderConfig>,
        backends: BackendSet,
        cache: Arc<dyn ResponseCache>,
        limiter: Arc<dyn RateLimitStore>,
        classifier: Arc<dyn IntentClassifier>,
        tools: Arc<dyn ToolExecutor>,
    ) -> Self {
        Self {
            config,
            backends,
            cache,
            limiter,
            classifier,
            tools,
            usage: UsageTracker::default(),
        }
    }

    pub fn with_usage_tracker(mut self, usage: UsageTracker) -> Self {
        self.usage = usage;
        self
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub async fn usage_summary(&self, days: u32) -> UsageSummary {
        self.usage.get_usage_summary(days).await
    }

    /// Answer one message.
    pub async fn chat(&self, request: ChatRequest) -> ChatResult {
        let plan = match self.prepare(&request, false).await {
            Prepared::Done(result) => return result,
            Prepared::Ready(plan) => plan,
        };

        let routed = match fallback::send_with_fallback(&self.backends, &plan.completion).await {
            Ok(routed) => routed,
            Err(e) => return self.degrade(&plan, e).await,
        };

        let mut usage = routed.value.usage;
        let mut cost = routed.value.cost;
        let mut collected = plan.collected.clone();
        let mut content = routed.value.content.clone();

        if let Some(messages) = self
            .tool_round(&plan, &routed, &routed.value.content, &routed.value.tool_calls, &mut collected)
            .await
        {
            let second = CompletionRequest {
                messages,
                ..plan.completion.clone()
            };
            match routed.backend.send(&second).await {
                Ok(response) => {
                    if !response.tool_calls.is_empty() {
                        debug!(
                            request_id = %plan.request_id,
                            "Ignoring {} tool calls requested after the tool round",
                            response.tool_calls.len()
                        );
                    }
                    usage += response.usage;
                    cost += response.cost;
                    content = response.content;
                }
                Err(e) => return self.tool_round_failed(&plan, e, collected, usage, cost),
            }
        }

        let result = self.assemble(&plan, &content, collected, usage, cost, &routed.model);
        self.commit(&plan, &request, &result, &routed).await;
        result
    }

    /// Answer one message, relaying events to `events` as they arrive.
    ///
    /// A closed receiver is a caller disconnect: the backend stream is
    /// released and nothing is cached or counted.
    pub async fn chat_stream(
        &self,
        request: ChatRequest,
        events: mpsc::Sender<StreamEvent>,
    ) -> ChatResult {
        if !self.config.feature_flags.streaming {
            let result = self.chat(request).await;
            emit_synthetic(&events, &result).await;
            return result;
        }

        let plan = match self.prepare(&request, true).await {
            Prepared::Done(result) => {
                emit_synthetic(&events, &result).await;
                return result;
            }
            Prepared::Ready(plan) => plan,
        };

        let routed = match fallback::open_with_fallback(&self.backends, &plan.completion).await {
            Ok(routed) => routed,
            Err(e) => {
                let result = self.degrade(&plan, e).await;
                emit_synthetic(&events, &result).await;
                return result;
            }
        };
        let Routed {
            value: handle,
            backend,
            model,
            used_fallback,
        } = routed;
        let routed = Routed {
            value: (),
            backend,
            model,
            used_fallback,
        };

        let first = match self.relay(handle, &events).await {
            Ok(parsed) => parsed,
            Err(e) => return self.stream_failed(&plan, e, &events).await,
        };

        let mut usage = first.usage;
        let mut collected = plan.collected.clone();
        let mut parsed = first;

        if let Some(messages) = self
            .tool_round(&plan, &routed, &parsed.text, &parsed.tool_calls, &mut collected)
            .await
        {
            let second = CompletionRequest {
                messages,
                ..plan.completion.clone()
            };
            let opened = routed.backend.open_stream(&second).await;
            let relayed = match opened {
                Ok(handle) => self.relay(handle, &events).await,
                Err(e) => Err(RelayError::Backend(e)),
            };
            match relayed {
                Ok(next) => {
                    usage += next.usage;
                    parsed = next;
                }
                Err(RelayError::Disconnected) => return self.disconnected(&plan),
                Err(RelayError::Backend(e)) => {
                    let cost = self.config.estimate_cost(
                        &routed.model,
                        usage.input_tokens,
                        usage.output_tokens,
                    );
                    let result = self.tool_round_failed(&plan, e, collected, usage, cost);
                    emit_error(&events, &result).await;
                    return result;
                }
            }
        }

        let cost = self
            .config
            .estimate_cost(&routed.model, usage.input_tokens, usage.output_tokens);
        let result = self.assemble_stream(&plan, &parsed, collected, usage, cost, &routed.model);

        if !result.deal_ids.is_empty()
            && events
                .send(StreamEvent::DealIds {
                    ids: result.deal_ids.clone(),
                })
                .await
                .is_err()
        {
            return self.disconnected(&plan);
        }

        self.commit(&plan, &request, &result, &routed).await;

        if events
            .send(StreamEvent::Done {
                content: result.content.clone(),
                cached: false,
            })
            .await
            .is_err()
        {
            debug!(request_id = %plan.request_id, "Caller left before the done event");
        }
        result
    }

    /// Validation, rate limit, cache, classification and context assembly.
    async fn prepare(&self, request: &ChatRequest, stream: bool) -> Prepared {
        let request_id = Uuid::new_v4();
        let started = Instant::now();
        let fail_with = |error: ErrorInfo| {
            let message = error.message.clone();
            let mut result = ChatResult::failure(request_id, error, message);
            result.latency_ms = started.elapsed().as_millis() as u64;
            Prepared::Done(result)
        };
        let fail = |kind: ErrorKind, message: String| fail_with(ErrorInfo::new(kind, message));

        let flags = &self.config.feature_flags;
        if !flags.enabled {
            return fail(ErrorKind::ConfigError, prompts::UNAVAILABLE.to_string());
        }
        let key = request.message.trim().to_string();
        if key.is_empty() {
            return fail(ErrorKind::InvalidRequest, prompts::EMPTY_MESSAGE.to_string());
        }
        let max_len = self.config.limits.max_input_len;
        if request.message.chars().count() > max_len {
            return fail(ErrorKind::InvalidRequest, prompts::too_long(max_len));
        }

        let decision = self.limiter.check_rate_limit(&request.identity).await;
        if decision.limited {
            info!(
                request_id = %request_id,
                "Rate limited {}",
                request.identity.key()
            );
            let message = decision
                .message
                .unwrap_or_else(|| "Too many requests. Please try again later.".to_string());
            let mut error = ErrorInfo::new(ErrorKind::RateLimit, message);
            if let Some(wait) = decision.retry_after {
                error = error.with_retry_after(wait);
            }
            return fail_with(error);
        }

        if flags.caching
            && let Some(mut hit) = self.cache.get(&key, MatchKind::Exact).await
        {
            info!(request_id = %request_id, "Cache hit");
            hit.request_id = request_id;
            hit.cached = true;
            hit.usage = Usage::default();
            hit.cost = 0.0;
            hit.latency_ms = started.elapsed().as_millis() as u64;
            self.usage.record_cached().await;
            return Prepared::Done(hit);
        }

        let classification = self.classifier.classify(&key).await;

        if let Some(answer) = &classification.faq_response {
            info!(
                request_id = %request_id,
                "Answered from canned {} response",
                classification.intent.as_str()
            );
            let mut result = ChatResult::answer(request_id, answer.clone());
            result.intent = Some(classification.intent);
            result.latency_ms = started.elapsed().as_millis() as u64;
            if flags.caching {
                self.cache.set(&key, &result, MatchKind::Exact).await;
            }
            self.usage.record_cached().await;
            return Prepared::Done(result);
        }

        let model = self.config.model_for(classification.complexity).to_string();
        let mut messages = self.build_messages(request, &key);
        let mut collected = ToolOutput::default();

        let native_tools = self.config.supports_tools(&model);
        if !native_tools
            && classification.intent.needs_data()
            && let Some(call) =
                preflight::plan(&classification, &key, self.config.limits.max_tool_results)
        {
            debug!(
                request_id = %request_id,
                model = %model,
                "Running {} manually",
                call.name
            );
            match self.tools.execute(call.name, call.arguments).await {
                Ok(output) => {
                    let output = preflight::truncate(&output, self.config.limits.max_tool_results);
                    preflight::inject(&mut messages, call.name, &output);
                    merge_output(&mut collected, output);
                }
                Err(e) => warn!(request_id = %request_id, "Tool {} failed: {}", call.name, e),
            }
        }

        let tools = native_tools
            .then(|| self.tools.definitions())
            .filter(|definitions| !definitions.is_empty());

        let completion = CompletionRequest {
            max_tokens: self.config.max_tokens_for(classification.complexity),
            temperature: self.config.request.temperature,
            model,
            messages,
            tools,
            stream,
        };

        Prepared::Ready(Box::new(Plan {
            request_id,
            started,
            key,
            classification,
            completion,
            collected,
        }))
    }

    /// System prompt, capped history, then the user's message.
    fn build_messages(&self, request: &ChatRequest, message: &str) -> Vec<ChatMessage> {
        let history: Vec<&ChatMessage> = request
            .history
            .iter()
            .filter(|m| m.role != Role::System && m.has_payload())
            .collect();
        let skip = history
            .len()
            .saturating_sub(self.config.limits.max_history);

        let mut messages = vec![ChatMessage::system(prompts::system_prompt(&request.context))];
        messages.extend(
            history
                .into_iter()
                .skip(skip)
                // A capped history must not open with a tool result whose call was cut.
                .skip_while(|m| m.role == Role::Tool)
                .cloned(),
        );
        messages.push(ChatMessage::user(message));
        messages
    }

    /// Execute the tool calls of the first completion and return the context
    /// for the second one, or `None` when no tool round applies.
    async fn tool_round<T>(
        &self,
        plan: &Plan,
        routed: &Routed<T>,
        content: &str,
        calls: &[ToolCall],
        collected: &mut ToolOutput,
    ) -> Option<Vec<ChatMessage>> {
        if calls.is_empty() || plan.completion.tools.is_none() || routed.used_fallback {
            return None;
        }

        info!(
            request_id = %plan.request_id,
            backend = %routed.backend.kind(),
            "Executing {} tool calls",
            calls.len()
        );

        let mut messages = plan.completion.messages.clone();
        messages.push(ChatMessage::assistant_tool_calls(
            Some(content.to_string()),
            calls.to_vec(),
        ));
        for call in calls {
            let reply = self.run_tool(plan, call, collected).await;
            messages.push(ChatMessage::tool_result(call, reply));
        }
        Some(messages)
    }

    /// Run one model-requested call. Failures become a `success: false`
    /// payload so the conversation continues without the data.
    async fn run_tool(&self, plan: &Plan, call: &ToolCall, collected: &mut ToolOutput) -> String {
        let arguments = if call.arguments.trim().is_empty() {
            Ok(Value::Null)
        } else {
            serde_json::from_str::<Value>(&call.arguments)
        };

        let outcome = match arguments {
            Ok(arguments) => self
                .tools
                .execute(&call.name, arguments)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(format!("Malformed arguments: {}", e)),
        };

        match outcome {
            Ok(output) => {
                let output = preflight::truncate(&output, self.config.limits.max_tool_results);
                let reply = serde_json::to_string(&output).unwrap_or_else(|_| "{}".to_string());
                merge_output(collected, output);
                reply
            }
            Err(message) => {
                warn!(
                    request_id = %plan.request_id,
                    "Tool {} failed: {}",
                    call.name,
                    message
                );
                json!({ "success": false, "error": message }).to_string()
            }
        }
    }

    fn assemble(
        &self,
        plan: &Plan,
        content: &str,
        collected: ToolOutput,
        usage: Usage,
        cost: f64,
        model: &str,
    ) -> ChatResult {
        let extracted = extract_payload(content, &self.config.extraction);
        self.build_result(plan, extracted.message, extracted.deal_ids, collected, usage, cost, model)
    }

    fn assemble_stream(
        &self,
        plan: &Plan,
        parsed: &ParsedStream,
        collected: ToolOutput,
        usage: Usage,
        cost: f64,
        model: &str,
    ) -> ChatResult {
        self.build_result(
            plan,
            parsed.extracted.message.clone(),
            parsed.extracted.deal_ids.clone(),
            collected,
            usage,
            cost,
            model,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build_result(
        &self,
        plan: &Plan,
        message: String,
        deal_ids: Vec<crate::stream::DealId>,
        collected: ToolOutput,
        usage: Usage,
        cost: f64,
        model: &str,
    ) -> ChatResult {
        if message.trim().is_empty() {
            warn!(request_id = %plan.request_id, model = %model, "Model returned an empty answer");
        }
        let mut result = ChatResult::answer(plan.request_id, message);
        result.deal_ids = deal_ids;
        result.deals = collected.deals;
        result.coupons = collected.coupons;
        result.store = collected.store;
        result.intent = Some(plan.classification.intent);
        result.usage = usage;
        result.cost = cost;
        result.model = Some(model.to_string());
        result.latency_ms = plan.started.elapsed().as_millis() as u64;
        result
    }

    /// Cache the result, count the request and record usage. Runs once per
    /// real completion, after assembly.
    async fn commit<T>(
        &self,
        plan: &Plan,
        request: &ChatRequest,
        result: &ChatResult,
        routed: &Routed<T>,
    ) {
        if self.config.feature_flags.caching {
            self.cache.set(&plan.key, result, MatchKind::Exact).await;
        }
        self.limiter
            .increment_query_count(&request.identity, Window::Minute)
            .await;
        self.limiter
            .increment_query_count(&request.identity, Window::Day)
            .await;
        self.usage
            .record(UsageRecord {
                model: &routed.model,
                backend: Some(routed.backend.kind()),
                usage: result.usage,
                cost: result.cost,
                latency_ms: result.latency_ms,
                used_fallback: routed.used_fallback,
            })
            .await;

        info!(
            request_id = %plan.request_id,
            backend = %routed.backend.kind(),
            model = %routed.model,
            "Completed in {}ms: {} tokens, ${:.6}, {} deal ids",
            result.latency_ms,
            result.usage.total_tokens,
            result.cost,
            result.deal_ids.len()
        );
    }

    /// Both backends failed: apologize and attach plain search results when
    /// possible.
    async fn degrade(&self, plan: &Plan, err: BackendError) -> ChatResult {
        error!(
            request_id = %plan.request_id,
            model = %plan.completion.model,
            "Completion failed: {}",
            err
        );

        let mut result = ChatResult::failure(
            plan.request_id,
            ErrorInfo::new(err.kind(), err.to_string()),
            prompts::APOLOGY,
        );
        result.intent = Some(plan.classification.intent);

        let mut output = plan.collected.clone();
        if output.deals.is_empty() && plan.classification.intent.needs_data() {
            let query = plan
                .classification
                .entities
                .query
                .clone()
                .unwrap_or_else(|| plan.key.clone());
            let arguments = json!({
                "query": query,
                "limit": self.config.limits.max_tool_results,
            });
            match self.tools.execute(SEARCH_DEALS, arguments).await {
                Ok(found) => {
                    output.deals = preflight::truncate(&found, self.config.limits.max_tool_results).deals
                }
                Err(e) => warn!(request_id = %plan.request_id, "Degraded search failed: {}", e),
            }
        }

        if !output.deals.is_empty() {
            result.content = prompts::degraded_with_results(&output);
            result.deal_ids = output.deals.iter().map(|d| d.id).collect();
        }
        result.deals = output.deals;
        result.coupons = output.coupons;
        result.store = output.store;
        result.latency_ms = plan.started.elapsed().as_millis() as u64;
        result
    }

    /// The second call of a tool round failed. No fallback at this point;
    /// the tool data gathered so far is still returned.
    fn tool_round_failed(
        &self,
        plan: &Plan,
        err: BackendError,
        collected: ToolOutput,
        usage: Usage,
        cost: f64,
    ) -> ChatResult {
        error!(
            request_id = %plan.request_id,
            "Completion after tool round failed: {}",
            err
        );
        let mut result = ChatResult::failure(
            plan.request_id,
            ErrorInfo::new(err.kind(), err.to_string()),
            prompts::APOLOGY,
        );
        result.intent = Some(plan.classification.intent);
        result.deals = collected.deals;
        result.coupons = collected.coupons;
        result.store = collected.store;
        result.usage = usage;
        result.cost = cost;
        result.model = Some(plan.completion.model.clone());
        result.latency_ms = plan.started.elapsed().as_millis() as u64;
        result
    }

    async fn stream_failed(
        &self,
        plan: &Plan,
        err: RelayError,
        events: &mpsc::Sender<StreamEvent>,
    ) -> ChatResult {
        match err {
            RelayError::Disconnected => self.disconnected(plan),
            RelayError::Backend(e) => {
                error!(request_id = %plan.request_id, "Stream failed: {}", e);
                let mut result = ChatResult::failure(
                    plan.request_id,
                    ErrorInfo::new(e.kind(), e.to_string()),
                    prompts::APOLOGY,
                );
                result.intent = Some(plan.classification.intent);
                result.model = Some(plan.completion.model.clone());
                result.latency_ms = plan.started.elapsed().as_millis() as u64;
                emit_error(events, &result).await;
                result
            }
        }
    }

    fn disconnected(&self, plan: &Plan) -> ChatResult {
        info!(request_id = %plan.request_id, "Caller disconnected, stream released");
        let mut result = ChatResult::failure(
            plan.request_id,
            ErrorInfo::new(ErrorKind::StreamError, "Client disconnected"),
            "",
        );
        result.intent = Some(plan.classification.intent);
        result.latency_ms = plan.started.elapsed().as_millis() as u64;
        result
    }

    /// Single forward pass over the backend stream. The handle is consumed
    /// and dropped on every exit path.
    async fn relay(
        &self,
        handle: StreamHandle,
        events: &mpsc::Sender<StreamEvent>,
    ) -> Result<ParsedStream, RelayError> {
        let StreamHandle {
            backend, mut raw, ..
        } = handle;
        let mut state = StreamState::new(&self.config.extraction);
        let mut chunks = 0usize;

        while let Some(item) = raw.next().await {
            let delta = Delta::from(item.map_err(RelayError::Backend)?);
            chunks += 1;
            for event in state.step(delta) {
                events
                    .send(event)
                    .await
                    .map_err(|_| RelayError::Disconnected)?;
            }
        }

        debug!("Stream from {} ended after {} chunks", backend, chunks);
        for event in state.flush() {
            events
                .send(event)
                .await
                .map_err(|_| RelayError::Disconnected)?;
        }
        Ok(state.finish())
    }
}

fn merge_output(collected: &mut ToolOutput, output: ToolOutput) {
    collected.success |= output.success;
    collected.deals.extend(output.deals);
    collected.coupons.extend(output.coupons);
    if output.store.is_some() {
        collected.store = output.store;
    }
}

/// Replay a finished result through the event channel so short-circuited
/// answers look like live streams.
async fn emit_synthetic(events: &mpsc::Sender<StreamEvent>, result: &ChatResult) {
    if !result.success {
        emit_error(events, result).await;
        return;
    }

    let mut sequence = vec![StreamEvent::Text {
        content: result.content.clone(),
    }];
    if !result.deal_ids.is_empty() {
        sequence.push(StreamEvent::DealIds {
            ids: result.deal_ids.clone(),
        });
    }
    sequence.push(StreamEvent::Done {
        content: result.content.clone(),
        cached: result.cached,
    });

    for event in sequence {
        if events.send(event).await.is_err() {
            debug!("Caller left during synthetic replay");
            return;
        }
    }
}

async fn emit_error(events: &mpsc::Sender<StreamEvent>, result: &ChatResult) {
    let Some(error) = &result.error else {
        return;
    };
    let mut sequence = vec![StreamEvent::Error {
        kind: error.kind,
        message: error.message.clone(),
        retryable: error.retryable,
    }];
    if !result.deal_ids.is_empty() {
        sequence.push(StreamEvent::DealIds {
            ids: result.deal_ids.clone(),
        });
    }
    sequence.push(StreamEvent::Done {
        content: result.content.clone(),
        cached: false,
    });

    for event in sequence {
        if events.send(event).await.is_err() {
            return;
        }
    }
}
