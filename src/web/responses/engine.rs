//! Response lifecycle engine
//!
//! Admission validates a request and resolves its conversation ancestry
//! synchronously. Generation then runs as its own task that exclusively owns
//! the in-progress response; the HTTP handler only waits on a oneshot
//! (blocking form) or drains a bounded event channel (streaming form).
//! Dropping either receiver cancels the turn.

use crate::backend::{BackendChunk, BackendRequest, InferenceBackend, OutputSchema};
use crate::models::ids::{is_valid_response_id, new_response_id};
use crate::models::responses::{
    ItemStatus, OutputContent, OutputItem, Response, ResponsesError, TextFormat,
};
use crate::store::{ConversationStore, StoreError};
use crate::web::responses::{
    builders::ResponseBuilder,
    constants::{
        CANCELLATION_BROADCAST_BUFFER, DEFAULT_CONTEXT_WINDOW_TOKENS, DEFAULT_EVENT_CHANNEL_BUFFER,
        DEFAULT_MAX_INPUT_ITEMS, DEFAULT_MAX_TOOLS, DEFAULT_TEMPERATURE, DEFAULT_TOP_P,
        TRUNCATION_AUTO, TRUNCATION_DISABLED,
    },
    context_builder::{build_messages, resolve_ancestry},
    conversions::MessageContentConverter,
    events::{ConsumerGone, ResponseEvent, SequencedEvent, SseEventEmitter},
    storage::{ResponsePersister, TurnAccumulator, TurnOutcome},
    structured_output::check_output_schema,
    tools::ToolRegistry,
    types::{RawInputItem, ResponsesCreateRequest},
};
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tracing::{debug, error, info, trace, warn};

/// How long a cancel request waits for the turn to reach its terminal state.
const CANCEL_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Engine limits
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_input_items: usize,
    pub max_tools: usize,
    pub event_buffer: usize,
    pub context_window_tokens: usize,
    /// Used when a request omits `model`.
    pub default_model: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_input_items: DEFAULT_MAX_INPUT_ITEMS,
            max_tools: DEFAULT_MAX_TOOLS,
            event_buffer: DEFAULT_EVENT_CHANNEL_BUFFER,
            context_window_tokens: DEFAULT_CONTEXT_WINDOW_TOKENS,
            default_model: None,
        }
    }
}

/// Everything a turn needs once admission succeeded.
struct AdmittedTurn {
    response: Response,
    request: BackendRequest,
    registry: ToolRegistry,
    output_schema: Option<Value>,
}

type TerminalSender = watch::Sender<Option<Arc<Response>>>;

pub struct ResponsesEngine {
    backend: Arc<dyn InferenceBackend>,
    store: Arc<dyn ConversationStore>,
    persister: ResponsePersister,
    config: EngineConfig,
    cancellation_broadcast: broadcast::Sender<String>,
    in_flight: Mutex<HashMap<String, TerminalSender>>,
}

impl ResponsesEngine {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        store: Arc<dyn ConversationStore>,
        config: EngineConfig,
    ) -> Self {
        let (cancellation_broadcast, _) = broadcast::channel(CANCELLATION_BROADCAST_BUFFER);
        Self {
            backend,
            persister: ResponsePersister::new(store.clone()),
            store,
            config,
            cancellation_broadcast,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Run a turn to its terminal state and return the frozen response.
    pub async fn create_blocking(
        self: &Arc<Self>,
        body: ResponsesCreateRequest,
    ) -> Result<Arc<Response>, ResponsesError> {
        let turn = self.admit(body).await?;
        let cancel_rx = self.register(&turn.response.id).await;
        let (result_tx, result_rx) = oneshot::channel();

        let engine = self.clone();
        tokio::spawn(async move {
            engine.run_blocking(turn, cancel_rx, result_tx).await;
        });

        result_rx
            .await
            .map_err(|_| ResponsesError::Store("turn ended without a result".to_string()))
    }

    /// Start a streamed turn. The receiver yields events until exactly one
    /// terminal event has been delivered.
    pub async fn create_streaming(
        self: &Arc<Self>,
        body: ResponsesCreateRequest,
    ) -> Result<mpsc::Receiver<SequencedEvent>, ResponsesError> {
        let turn = self.admit(body).await?;
        let cancel_rx = self.register(&turn.response.id).await;
        let (tx, rx) = mpsc::channel(self.config.event_buffer.max(1));

        let engine = self.clone();
        tokio::spawn(async move {
            engine
                .run_streaming(turn, cancel_rx, SseEventEmitter::new(tx))
                .await;
        });

        Ok(rx)
    }

    pub async fn get(&self, id: &str) -> Result<Arc<Response>, ResponsesError> {
        self.store.get(id).await.map_err(|e| match e {
            StoreError::NotFound(id) => ResponsesError::ResponseNotFound(id),
            other => ResponsesError::Store(other.to_string()),
        })
    }

    /// Signal an in-flight turn to stop and wait for its terminal state.
    pub async fn cancel(&self, id: &str) -> Result<Arc<Response>, ResponsesError> {
        let terminal_rx = self
            .in_flight
            .lock()
            .await
            .get(id)
            .map(|tx| tx.subscribe());

        let Some(mut terminal_rx) = terminal_rx else {
            return match self.get(id).await {
                Ok(response) => {
                    debug!(
                        "Cannot cancel response {} with status {}",
                        id, response.status
                    );
                    Err(ResponsesError::Validation {
                        param: None,
                        message: format!(
                            "response '{}' is already {} and cannot be cancelled",
                            id, response.status
                        ),
                    })
                }
                Err(e) => Err(e),
            };
        };

        info!("Broadcasting cancellation signal for response {}", id);
        let _ = self.cancellation_broadcast.send(id.to_string());

        let waited = tokio::time::timeout(CANCEL_WAIT_TIMEOUT, async {
            terminal_rx
                .wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|terminal| terminal.clone())
        })
        .await;

        match waited {
            Ok(Some(response)) => Ok(response),
            Ok(None) => Err(ResponsesError::Store(format!(
                "response '{}' ended without a terminal state",
                id
            ))),
            Err(_) => {
                warn!("Timed out waiting for response {} to cancel", id);
                Err(ResponsesError::Store(format!(
                    "timed out waiting for response '{}' to cancel",
                    id
                )))
            }
        }
    }

    // ------------------------------------------------------------------
    // Admission
    // ------------------------------------------------------------------

    async fn admit(&self, body: ResponsesCreateRequest) -> Result<AdmittedTurn, ResponsesError> {
        let model = body
            .model
            .filter(|m| !m.trim().is_empty())
            .or_else(|| self.config.default_model.clone())
            .ok_or_else(|| ResponsesError::validation("model", "model is required"))?;

        let raw_items = match body.input {
            Value::Array(items) => items,
            Value::String(_) => {
                return Err(ResponsesError::validation(
                    "input",
                    "input must be an array of input items; a bare string is not accepted",
                ))
            }
            Value::Null => return Err(ResponsesError::validation("input", "input is required")),
            _ => {
                return Err(ResponsesError::validation(
                    "input",
                    "input must be an array of input items",
                ))
            }
        };
        if raw_items.is_empty() {
            return Err(ResponsesError::validation(
                "input",
                "input must contain at least one item",
            ));
        }
        if raw_items.len() > self.config.max_input_items {
            return Err(ResponsesError::validation(
                "input",
                format!(
                    "too many input items: {} (maximum {})",
                    raw_items.len(),
                    self.config.max_input_items
                ),
            ));
        }
        let input = raw_items
            .into_iter()
            .enumerate()
            .map(|(i, value)| {
                let raw: RawInputItem = serde_json::from_value(value).map_err(|e| {
                    ResponsesError::validation(format!("input[{}]", i), e.to_string())
                })?;
                MessageContentConverter::to_input_item(raw, i)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let temperature = body.temperature.unwrap_or(DEFAULT_TEMPERATURE);
        if !temperature.is_finite() || !(0.0..=2.0).contains(&temperature) {
            return Err(ResponsesError::validation(
                "temperature",
                "temperature must be between 0 and 2",
            ));
        }
        let top_p = body.top_p.unwrap_or(DEFAULT_TOP_P);
        if !top_p.is_finite() || !(0.0..=1.0).contains(&top_p) {
            return Err(ResponsesError::validation(
                "top_p",
                "top_p must be between 0 and 1",
            ));
        }
        let max_output_tokens = match body.max_output_tokens {
            None => None,
            Some(n) if n > 0 => Some(u32::try_from(n).map_err(|_| {
                ResponsesError::validation("max_output_tokens", "max_output_tokens is too large")
            })?),
            Some(_) => {
                return Err(ResponsesError::validation(
                    "max_output_tokens",
                    "max_output_tokens must be greater than 0",
                ))
            }
        };
        let truncation = match body.truncation.as_deref() {
            None | Some(TRUNCATION_DISABLED) => TRUNCATION_DISABLED,
            Some(TRUNCATION_AUTO) => TRUNCATION_AUTO,
            Some(other) => {
                return Err(ResponsesError::validation(
                    "truncation",
                    format!("invalid truncation '{}': must be auto or disabled", other),
                ))
            }
        };

        let store = body.store.unwrap_or(true);
        if let Some(previous) = &body.previous_response_id {
            if !store {
                return Err(ResponsesError::validation(
                    "store",
                    "previous_response_id cannot be used with store=false",
                ));
            }
            if !is_valid_response_id(previous) {
                return Err(ResponsesError::validation(
                    "previous_response_id",
                    format!("invalid response id '{}'", previous),
                ));
            }
        }

        let tool_choice = body.tool_choice.unwrap_or_default();
        let registry =
            ToolRegistry::from_declarations(&body.tools, &tool_choice, self.config.max_tools)?;

        let text = body.text.unwrap_or_default();
        let output_schema = match &text.format {
            TextFormat::JsonSchema {
                name,
                schema,
                strict,
                ..
            } => {
                if name.is_empty() || name.len() > 64 {
                    return Err(ResponsesError::validation(
                        "text.format.name",
                        "schema name must be 1-64 characters",
                    ));
                }
                check_output_schema(schema)?;
                Some(OutputSchema {
                    name: name.clone(),
                    schema: schema.clone(),
                    strict: strict.unwrap_or(false),
                })
            }
            TextFormat::Text => None,
        };

        let ancestry = match &body.previous_response_id {
            Some(previous) => resolve_ancestry(self.store.as_ref(), previous).await?,
            None => vec![],
        };
        let messages = build_messages(
            body.instructions.as_deref(),
            &ancestry,
            &input,
            truncation,
            self.config.context_window_tokens,
        )?;
        let parallel_tool_calls = body.parallel_tool_calls.unwrap_or(true);

        let response = ResponseBuilder::new(new_response_id(), model.clone())
            .previous_response_id(body.previous_response_id)
            .instructions(body.instructions)
            .input(input)
            .tools(body.tools.clone(), tool_choice.clone())
            .text(text)
            .sampling(temperature, top_p)
            .max_output_tokens(max_output_tokens)
            .parallel_tool_calls(parallel_tool_calls)
            .store(store)
            .metadata(body.metadata.unwrap_or_default())
            .truncation(truncation)
            .build();

        info!(
            "Admitted response {} (model={}, messages={}, tools={}, ancestors={})",
            response.id,
            model,
            messages.len(),
            body.tools.len(),
            ancestry.len()
        );

        Ok(AdmittedTurn {
            request: BackendRequest {
                model,
                messages,
                tools: body.tools,
                tool_choice,
                output_schema: output_schema.clone(),
                temperature,
                top_p,
                max_output_tokens,
                parallel_tool_calls,
            },
            output_schema: output_schema.map(|s| s.schema),
            registry,
            response,
        })
    }

    /// Mark a turn in flight and subscribe to cancellation before it starts.
    async fn register(&self, id: &str) -> broadcast::Receiver<String> {
        let cancel_rx = self.cancellation_broadcast.subscribe();
        let (terminal_tx, _) = watch::channel(None);
        self.in_flight
            .lock()
            .await
            .insert(id.to_string(), terminal_tx);
        cancel_rx
    }

    // ------------------------------------------------------------------
    // Generation
    // ------------------------------------------------------------------

    async fn run_blocking(
        self: Arc<Self>,
        turn: AdmittedTurn,
        mut cancel_rx: broadcast::Receiver<String>,
        mut result_tx: oneshot::Sender<Arc<Response>>,
    ) {
        let id = turn.response.id.clone();
        let mut acc = TurnAccumulator::new(turn.response);
        debug!("Dispatching blocking generation for response {}", id);

        let outcome = tokio::select! {
            _ = wait_for_cancel(&mut cancel_rx, &id) => {
                debug!("Received cancellation signal for response {}", id);
                TurnOutcome::Cancelled
            }
            _ = result_tx.closed() => {
                debug!("Client went away while response {} was generating", id);
                TurnOutcome::Cancelled
            }
            result = self.backend.complete(turn.request) => match result {
                Ok(completion) => match acc.install_completion(completion, &turn.registry) {
                    Ok(()) => TurnOutcome::Finished,
                    Err(e) => TurnOutcome::Failed(e),
                },
                Err(e) => {
                    error!("Backend {} failed for response {}: {}", self.backend.name(), id, e);
                    TurnOutcome::Failed(ResponsesError::Backend(e.to_string()))
                }
            },
        };

        let response = self
            .finish(acc, outcome, turn.output_schema.as_ref())
            .await;
        if result_tx.send(response).is_err() {
            debug!("Blocking caller for response {} is gone", id);
        }
    }

    async fn run_streaming(
        self: Arc<Self>,
        turn: AdmittedTurn,
        cancel_rx: broadcast::Receiver<String>,
        emitter: SseEventEmitter,
    ) {
        let id = turn.response.id.clone();
        let mut acc = TurnAccumulator::new(turn.response);
        let schema = turn.output_schema;
        let mut sink = TurnSink {
            id: id.clone(),
            emitter,
            cancel_rx,
        };

        let outcome = match self
            .drive_stream(&mut acc, turn.request, &turn.registry, &mut sink)
            .await
        {
            Ok(outcome) => outcome,
            Err(StreamInterrupt::Cancelled) => {
                debug!("Received cancellation signal for response {}", id);
                TurnOutcome::Cancelled
            }
            Err(StreamInterrupt::ConsumerGone) => {
                debug!("Client disconnected from response {} stream", id);
                TurnOutcome::Cancelled
            }
        };

        let response = self.finish(acc, outcome, schema.as_ref()).await;
        if sink
            .emitter
            .emit(ResponseEvent::terminal(response))
            .await
            .is_err()
        {
            debug!("Terminal event for response {} had no consumer", id);
        }
        trace!("Streaming task for response {} completed", id);
    }

    async fn drive_stream(
        &self,
        acc: &mut TurnAccumulator,
        request: BackendRequest,
        registry: &ToolRegistry,
        sink: &mut TurnSink,
    ) -> Result<TurnOutcome, StreamInterrupt> {
        sink.send(ResponseEvent::Created {
            response: acc.snapshot(),
        })
        .await?;
        sink.send(ResponseEvent::InProgress {
            response: acc.snapshot(),
        })
        .await?;

        let started = tokio::select! {
            _ = wait_for_cancel(&mut sink.cancel_rx, &sink.id) => {
                return Err(StreamInterrupt::Cancelled)
            }
            _ = sink.emitter.closed() => return Err(StreamInterrupt::ConsumerGone),
            started = self.backend.stream(request) => started,
        };
        let mut stream = match started {
            Ok(stream) => stream,
            Err(e) => {
                error!(
                    "Backend {} failed for response {}: {}",
                    self.backend.name(),
                    sink.id,
                    e
                );
                return Ok(TurnOutcome::Failed(ResponsesError::Backend(e.to_string())));
            }
        };

        loop {
            let next = tokio::select! {
                _ = wait_for_cancel(&mut sink.cancel_rx, &sink.id) => {
                    return Err(StreamInterrupt::Cancelled)
                }
                _ = sink.emitter.closed() => return Err(StreamInterrupt::ConsumerGone),
                next = stream.next() => next,
            };

            match next {
                Some(Ok(BackendChunk::TextDelta(delta))) => {
                    if delta.is_empty() {
                        continue;
                    }
                    if let Some((output_index, item)) = acc.ensure_text_item() {
                        let item_id = item.id().to_string();
                        sink.send(ResponseEvent::OutputItemAdded { output_index, item })
                            .await?;
                        sink.send(ResponseEvent::ContentPartAdded {
                            item_id,
                            output_index,
                            content_index: 0,
                            part: OutputContent::output_text(""),
                        })
                        .await?;
                    }
                    if let Some((item_id, output_index)) = acc.push_text(&delta) {
                        sink.send(ResponseEvent::OutputTextDelta {
                            item_id,
                            output_index,
                            content_index: 0,
                            delta,
                        })
                        .await?;
                    }
                }
                Some(Ok(BackendChunk::ToolCall(call))) => {
                    close_text_item(acc, sink).await?;
                    let item = match registry.shape_call(call) {
                        Ok(item) => item,
                        Err(e) => return Ok(TurnOutcome::Failed(e)),
                    };
                    let output_index = acc.push_item(item.clone());
                    emit_function_call(sink, output_index, item).await?;
                }
                Some(Ok(BackendChunk::Usage(usage))) => acc.record_usage(usage),
                Some(Ok(BackendChunk::Finished(reason))) => {
                    acc.record_finish(reason);
                    close_text_item(acc, sink).await?;
                    return Ok(TurnOutcome::Finished);
                }
                Some(Err(e)) => {
                    error!("Backend stream failed for response {}: {}", sink.id, e);
                    return Ok(TurnOutcome::Failed(ResponsesError::Backend(e.to_string())));
                }
                None => {
                    warn!(
                        "Backend stream for response {} ended without a finish reason",
                        sink.id
                    );
                    close_text_item(acc, sink).await?;
                    return Ok(TurnOutcome::Finished);
                }
            }
        }
    }

    /// Freeze, persist and release the turn.
    async fn finish(
        &self,
        acc: TurnAccumulator,
        outcome: TurnOutcome,
        output_schema: Option<&Value>,
    ) -> Arc<Response> {
        let response = Arc::new(acc.finalize(outcome, output_schema));
        info!(
            "Response {} finished with status {}",
            response.id, response.status
        );

        // Failures are logged by the persister; the caller still gets the response.
        let _ = self.persister.persist(&response).await;

        if let Some(terminal_tx) = self.in_flight.lock().await.remove(&response.id) {
            terminal_tx.send_replace(Some(response.clone()));
        }
        response
    }
}

/// Why a streamed turn stopped before its backend finished.
enum StreamInterrupt {
    Cancelled,
    ConsumerGone,
}

/// Event output of one streamed turn, watching for cancellation while it
/// waits for room in the channel.
struct TurnSink {
    id: String,
    emitter: SseEventEmitter,
    cancel_rx: broadcast::Receiver<String>,
}

impl TurnSink {
    async fn send(&mut self, event: ResponseEvent) -> Result<(), StreamInterrupt> {
        tokio::select! {
            _ = wait_for_cancel(&mut self.cancel_rx, &self.id) => Err(StreamInterrupt::Cancelled),
            sent = self.emitter.emit(event) => {
                sent.map_err(|ConsumerGone| StreamInterrupt::ConsumerGone)
            }
        }
    }
}

async fn close_text_item(
    acc: &mut TurnAccumulator,
    sink: &mut TurnSink,
) -> Result<(), StreamInterrupt> {
    let Some((output_index, item)) = acc.close_text(ItemStatus::Completed) else {
        return Ok(());
    };
    let item_id = item.id().to_string();
    let text = item.text().unwrap_or_default();
    sink.send(ResponseEvent::OutputTextDone {
        item_id: item_id.clone(),
        output_index,
        content_index: 0,
        text: text.clone(),
    })
    .await?;
    sink.send(ResponseEvent::ContentPartDone {
        item_id,
        output_index,
        content_index: 0,
        part: OutputContent::output_text(text),
    })
    .await?;
    sink.send(ResponseEvent::OutputItemDone { output_index, item })
        .await
}

async fn emit_function_call(
    sink: &mut TurnSink,
    output_index: usize,
    item: OutputItem,
) -> Result<(), StreamInterrupt> {
    let OutputItem::FunctionCall {
        id,
        call_id,
        name,
        arguments,
        ..
    } = &item
    else {
        return Ok(());
    };
    sink.send(ResponseEvent::OutputItemAdded {
        output_index,
        item: OutputItem::FunctionCall {
            id: id.clone(),
            status: ItemStatus::InProgress,
            call_id: call_id.clone(),
            name: name.clone(),
            arguments: String::new(),
        },
    })
    .await?;
    sink.send(ResponseEvent::FunctionCallArgumentsDone {
        item_id: id.clone(),
        output_index,
        arguments: arguments.clone(),
    })
    .await?;
    sink.send(ResponseEvent::OutputItemDone { output_index, item })
        .await
}

/// Resolves when `id` is broadcast for cancellation.
async fn wait_for_cancel(rx: &mut broadcast::Receiver<String>, id: &str) {
    loop {
        match rx.recv().await {
            Ok(cancelled_id) if cancelled_id == id => return,
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Cancellation listener for {} lagged by {} signals", id, skipped);
            }
            Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}
