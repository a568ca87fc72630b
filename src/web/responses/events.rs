//! SSE event handling utilities

use crate::models::responses::{OutputContent, OutputItem, Response, ResponseStatus};
use axum::response::sse::Event;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, trace};

use super::constants::{
    ERROR_DATA_SERIALIZATION_FAILED, EVENT_RESPONSE_COMPLETED, EVENT_RESPONSE_CONTENT_PART_ADDED,
    EVENT_RESPONSE_CONTENT_PART_DONE, EVENT_RESPONSE_CREATED, EVENT_RESPONSE_FAILED,
    EVENT_RESPONSE_FUNCTION_CALL_ARGUMENTS_DONE, EVENT_RESPONSE_INCOMPLETE,
    EVENT_RESPONSE_IN_PROGRESS, EVENT_RESPONSE_OUTPUT_ITEM_ADDED, EVENT_RESPONSE_OUTPUT_ITEM_DONE,
    EVENT_RESPONSE_OUTPUT_TEXT_DELTA, EVENT_RESPONSE_OUTPUT_TEXT_DONE,
};

/// Type-safe event wrapper for all Response API events
///
/// Serializes with a `type` discriminant so every payload names its own
/// event type; `event_type()` returns the same string for the SSE `event:`
/// line.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ResponseEvent {
    #[serde(rename = "response.created")]
    Created { response: Arc<Response> },
    #[serde(rename = "response.in_progress")]
    InProgress { response: Arc<Response> },
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded {
        output_index: usize,
        item: OutputItem,
    },
    #[serde(rename = "response.content_part.added")]
    ContentPartAdded {
        item_id: String,
        output_index: usize,
        content_index: usize,
        part: OutputContent,
    },
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta {
        item_id: String,
        output_index: usize,
        content_index: usize,
        delta: String,
    },
    #[serde(rename = "response.output_text.done")]
    OutputTextDone {
        item_id: String,
        output_index: usize,
        content_index: usize,
        text: String,
    },
    #[serde(rename = "response.content_part.done")]
    ContentPartDone {
        item_id: String,
        output_index: usize,
        content_index: usize,
        part: OutputContent,
    },
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        item_id: String,
        output_index: usize,
        arguments: String,
    },
    #[serde(rename = "response.output_item.done")]
    OutputItemDone {
        output_index: usize,
        item: OutputItem,
    },
    #[serde(rename = "response.completed")]
    Completed { response: Arc<Response> },
    #[serde(rename = "response.failed")]
    Failed { response: Arc<Response> },
    #[serde(rename = "response.incomplete")]
    Incomplete { response: Arc<Response> },
}

impl ResponseEvent {
    /// Get the event type string for SSE
    pub fn event_type(&self) -> &'static str {
        match self {
            ResponseEvent::Created { .. } => EVENT_RESPONSE_CREATED,
            ResponseEvent::InProgress { .. } => EVENT_RESPONSE_IN_PROGRESS,
            ResponseEvent::OutputItemAdded { .. } => EVENT_RESPONSE_OUTPUT_ITEM_ADDED,
            ResponseEvent::ContentPartAdded { .. } => EVENT_RESPONSE_CONTENT_PART_ADDED,
            ResponseEvent::OutputTextDelta { .. } => EVENT_RESPONSE_OUTPUT_TEXT_DELTA,
            ResponseEvent::OutputTextDone { .. } => EVENT_RESPONSE_OUTPUT_TEXT_DONE,
            ResponseEvent::ContentPartDone { .. } => EVENT_RESPONSE_CONTENT_PART_DONE,
            ResponseEvent::FunctionCallArgumentsDone { .. } => {
                EVENT_RESPONSE_FUNCTION_CALL_ARGUMENTS_DONE
            }
            ResponseEvent::OutputItemDone { .. } => EVENT_RESPONSE_OUTPUT_ITEM_DONE,
            ResponseEvent::Completed { .. } => EVENT_RESPONSE_COMPLETED,
            ResponseEvent::Failed { .. } => EVENT_RESPONSE_FAILED,
            ResponseEvent::Incomplete { .. } => EVENT_RESPONSE_INCOMPLETE,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ResponseEvent::Completed { .. }
                | ResponseEvent::Failed { .. }
                | ResponseEvent::Incomplete { .. }
        )
    }

    /// The terminal event matching a finished response's status.
    pub fn terminal(response: Arc<Response>) -> Self {
        match response.status {
            ResponseStatus::Completed => ResponseEvent::Completed { response },
            ResponseStatus::Incomplete => ResponseEvent::Incomplete { response },
            ResponseStatus::Failed | ResponseStatus::InProgress => {
                ResponseEvent::Failed { response }
            }
        }
    }
}

/// An event stamped with its position in the stream.
#[derive(Debug, Clone, Serialize)]
pub struct SequencedEvent {
    #[serde(flatten)]
    pub event: ResponseEvent,
    pub sequence_number: u64,
}

/// The client side of the stream went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerGone;

/// Producer half of one response's event stream
///
/// Sequence numbers are assigned here, so they are dense and strictly
/// increasing in emission order. `emit` waits for room in the channel
/// instead of dropping events.
pub struct SseEventEmitter {
    tx: mpsc::Sender<SequencedEvent>,
    sequence_number: u64,
}

impl SseEventEmitter {
    pub fn new(tx: mpsc::Sender<SequencedEvent>) -> Self {
        Self {
            tx,
            sequence_number: 0,
        }
    }

    pub async fn emit(&mut self, event: ResponseEvent) -> Result<(), ConsumerGone> {
        let event_type = event.event_type();
        let sequenced = SequencedEvent {
            event,
            sequence_number: self.sequence_number,
        };
        self.tx.send(sequenced).await.map_err(|_| ConsumerGone)?;
        trace!("Emitted {} event (seq: {})", event_type, self.sequence_number);
        self.sequence_number += 1;
        Ok(())
    }

    /// Resolves once the consumer has dropped its receiver.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Convert a sequenced event into an SSE frame.
pub fn to_sse_event(event: &SequencedEvent) -> Event {
    let event_type = event.event.event_type();
    match serde_json::to_string(event) {
        Ok(json) => Event::default().event(event_type).data(json),
        Err(e) => {
            error!("Failed to serialize {}: {:?}", event_type, e);
            Event::default()
                .event("error")
                .data(ERROR_DATA_SERIALIZATION_FAILED)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::responses::builders::{OutputItemBuilder, ResponseBuilder};

    fn all_events() -> Vec<ResponseEvent> {
        let response = Arc::new(ResponseBuilder::new("resp_1", "mock-model").build());
        let item = OutputItemBuilder::new_message().build();
        vec![
            ResponseEvent::Created {
                response: response.clone(),
            },
            ResponseEvent::InProgress {
                response: response.clone(),
            },
            ResponseEvent::OutputItemAdded {
                output_index: 0,
                item: item.clone(),
            },
            ResponseEvent::ContentPartAdded {
                item_id: "msg_1".into(),
                output_index: 0,
                content_index: 0,
                part: OutputContent::output_text(""),
            },
            ResponseEvent::OutputTextDelta {
                item_id: "msg_1".into(),
                output_index: 0,
                content_index: 0,
                delta: "Hi".into(),
            },
            ResponseEvent::OutputTextDone {
                item_id: "msg_1".into(),
                output_index: 0,
                content_index: 0,
                text: "Hi".into(),
            },
            ResponseEvent::ContentPartDone {
                item_id: "msg_1".into(),
                output_index: 0,
                content_index: 0,
                part: OutputContent::output_text("Hi"),
            },
            ResponseEvent::FunctionCallArgumentsDone {
                item_id: "fc_1".into(),
                output_index: 1,
                arguments: "{}".into(),
            },
            ResponseEvent::OutputItemDone {
                output_index: 0,
                item,
            },
            ResponseEvent::Completed {
                response: response.clone(),
            },
            ResponseEvent::Failed {
                response: response.clone(),
            },
            ResponseEvent::Incomplete { response },
        ]
    }

    #[test]
    fn test_serialized_type_matches_event_type() {
        for event in all_events() {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["type"], event.event_type());
        }
    }

    #[test]
    fn test_only_completion_events_are_terminal() {
        let terminal: Vec<_> = all_events()
            .into_iter()
            .filter(ResponseEvent::is_terminal)
            .map(|e| e.event_type())
            .collect();
        assert_eq!(
            terminal,
            vec!["response.completed", "response.failed", "response.incomplete"]
        );
    }

    #[test]
    fn test_delta_payload_shape() {
        let event = SequencedEvent {
            event: ResponseEvent::OutputTextDelta {
                item_id: "msg_1".into(),
                output_index: 0,
                content_index: 0,
                delta: "Hel".into(),
            },
            sequence_number: 4,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "response.output_text.delta");
        assert_eq!(value["delta"], "Hel");
        assert_eq!(value["sequence_number"], 4);
        assert_eq!(value["item_id"], "msg_1");
    }

    #[tokio::test]
    async fn test_emitter_sequences_in_order() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut emitter = SseEventEmitter::new(tx);

        let producer = tokio::spawn(async move {
            for i in 0..5 {
                emitter
                    .emit(ResponseEvent::OutputTextDelta {
                        item_id: "msg_1".into(),
                        output_index: 0,
                        content_index: 0,
                        delta: i.to_string(),
                    })
                    .await
                    .unwrap();
            }
        });

        let mut seen = vec![];
        while let Some(event) = rx.recv().await {
            seen.push(event.sequence_number);
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn test_emit_fails_after_consumer_drops() {
        let (tx, rx) = mpsc::channel(4);
        let mut emitter = SseEventEmitter::new(tx);
        drop(rx);
        emitter.closed().await;
        let result = emitter
            .emit(ResponseEvent::Created {
                response: Arc::new(ResponseBuilder::new("resp_1", "m").build()),
            })
            .await;
        assert_eq!(result, Err(ConsumerGone));
    }
}
