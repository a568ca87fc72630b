//! Accumulation of one in-flight turn and persistence of its terminal state

use crate::{
    backend::{BackendCompletion, FinishReason, TokenUsage},
    models::responses::{
        IncompleteDetails, ItemStatus, OutputContent, OutputItem, Response, ResponseStatus,
        ResponsesError,
    },
    store::{ConversationStore, StoreError},
    web::responses::{
        builders::{build_usage, OutputItemBuilder},
        constants::{INCOMPLETE_REASON_CANCELLED, INCOMPLETE_REASON_MAX_OUTPUT_TOKENS},
        structured_output,
        tools::ToolRegistry,
    },
};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// How generation ended, before the terminal status is decided.
#[derive(Debug)]
pub enum TurnOutcome {
    /// The backend finished on its own.
    Finished,
    Failed(ResponsesError),
    /// Explicit cancel or client disconnect.
    Cancelled,
}

/// Owns the in-progress [`Response`] of a single turn.
///
/// Nothing else can reach the response while it is accumulating, so no
/// locking is involved. `finalize` consumes the accumulator and hands back
/// the terminal response, ready to be frozen.
pub(crate) struct TurnAccumulator {
    response: Response,
    open_text: Option<usize>,
    usage: Option<TokenUsage>,
    finish_reason: Option<FinishReason>,
}

impl TurnAccumulator {
    pub fn new(response: Response) -> Self {
        Self {
            response,
            open_text: None,
            usage: None,
            finish_reason: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.response.id
    }

    pub fn snapshot(&self) -> Arc<Response> {
        Arc::new(self.response.clone())
    }

    /// Open a text item unless one is already open.
    ///
    /// Returns the new item's index and an in-progress copy when one was opened.
    pub fn ensure_text_item(&mut self) -> Option<(usize, OutputItem)> {
        if self.open_text.is_some() {
            return None;
        }
        let item = OutputItemBuilder::new_message().build();
        self.response.output.push(item.clone());
        let index = self.response.output.len() - 1;
        self.open_text = Some(index);
        trace!("Opened text item {} at index {}", item.id(), index);
        Some((index, item))
    }

    /// Append a text fragment to the open text item, returning its id and index.
    pub fn push_text(&mut self, delta: &str) -> Option<(String, usize)> {
        let index = self.open_text?;
        match self.response.output.get_mut(index) {
            Some(OutputItem::Message { id, content, .. }) => {
                match content.first_mut() {
                    Some(OutputContent::OutputText { text, .. }) => text.push_str(delta),
                    _ => content.insert(0, OutputContent::output_text(delta)),
                }
                Some((id.clone(), index))
            }
            _ => None,
        }
    }

    /// Close the open text item, returning its final form.
    pub fn close_text(&mut self, status: ItemStatus) -> Option<(usize, OutputItem)> {
        let index = self.open_text.take()?;
        let item = self.response.output.get_mut(index)?;
        if let OutputItem::Message {
            status: item_status,
            content,
            ..
        } = item
        {
            *item_status = status;
            if content.is_empty() {
                content.push(OutputContent::output_text(""));
            }
        }
        Some((index, item.clone()))
    }

    pub fn push_item(&mut self, item: OutputItem) -> usize {
        self.response.output.push(item);
        self.response.output.len() - 1
    }

    pub fn record_usage(&mut self, usage: TokenUsage) {
        debug!(
            "Turn {} usage - prompt_tokens={}, completion_tokens={}",
            self.response.id, usage.prompt_tokens, usage.completion_tokens
        );
        self.usage = Some(usage);
    }

    pub fn record_finish(&mut self, reason: FinishReason) {
        self.finish_reason = Some(reason);
    }

    /// Install a blocking completion in one step.
    pub fn install_completion(
        &mut self,
        completion: BackendCompletion,
        registry: &ToolRegistry,
    ) -> Result<(), ResponsesError> {
        if let Some(usage) = completion.usage {
            self.record_usage(usage);
        }
        self.record_finish(completion.finish_reason);

        if let Some(text) = completion.text {
            self.push_item(
                OutputItemBuilder::new_message()
                    .status(ItemStatus::Completed)
                    .text(text)
                    .build(),
            );
        }
        for call in completion.tool_calls {
            let item = registry.shape_call(call)?;
            self.push_item(item);
        }
        Ok(())
    }

    /// Decide the terminal status and produce the finished response.
    pub fn finalize(mut self, outcome: TurnOutcome, output_schema: Option<&Value>) -> Response {
        self.response.refresh_output_text();

        let (status, failure, incomplete_reason) = match outcome {
            TurnOutcome::Finished => self.settle_finished(output_schema),
            TurnOutcome::Failed(e) => (ResponseStatus::Failed, Some(e), None),
            TurnOutcome::Cancelled => (
                ResponseStatus::Incomplete,
                None,
                Some(INCOMPLETE_REASON_CANCELLED),
            ),
        };

        let open_item_status = if status == ResponseStatus::Completed {
            ItemStatus::Completed
        } else {
            ItemStatus::Incomplete
        };
        for item in self.response.output.iter_mut() {
            match item {
                OutputItem::Message { status, .. } | OutputItem::FunctionCall { status, .. }
                    if *status == ItemStatus::InProgress =>
                {
                    *status = open_item_status;
                }
                _ => {}
            }
        }

        if let Some(e) = &failure {
            warn!("Response {} failed: {}", self.response.id, e);
            self.response.error = Some(e.to_error_detail());
        }
        if let Some(reason) = incomplete_reason {
            info!("Response {} incomplete: {}", self.response.id, reason);
            self.response.incomplete_details = Some(IncompleteDetails {
                reason: reason.to_string(),
            });
        }

        self.response.usage = self.usage.map(build_usage);
        if status == ResponseStatus::Completed {
            self.response.completed_at = Some(Utc::now().timestamp());
        }

        if let Err(e) = self.response.transition(status) {
            error!("Response {} could not be finalized: {}", self.response.id, e);
            self.response.status = ResponseStatus::Failed;
            self.response.error = Some(e.to_error_detail());
            self.response.incomplete_details = None;
            self.response.output_parsed = None;
            self.response.completed_at = None;
        }
        self.response
    }

    fn settle_finished(
        &mut self,
        output_schema: Option<&Value>,
    ) -> (ResponseStatus, Option<ResponsesError>, Option<&'static str>) {
        if self.response.output.is_empty() {
            return (
                ResponseStatus::Failed,
                Some(ResponsesError::Backend(
                    "backend produced no output".to_string(),
                )),
                None,
            );
        }

        match self.finish_reason {
            Some(FinishReason::Length) => {
                return (
                    ResponseStatus::Incomplete,
                    None,
                    Some(INCOMPLETE_REASON_MAX_OUTPUT_TOKENS),
                )
            }
            Some(FinishReason::ContentFilter) => {
                return (ResponseStatus::Incomplete, None, Some("content_filter"))
            }
            _ => {}
        }

        let has_text = self
            .response
            .output
            .iter()
            .any(|item| matches!(item, OutputItem::Message { .. }));
        if let (Some(schema), true) = (output_schema, has_text) {
            match structured_output::validate(&self.response.output_text, schema) {
                Ok(parsed) => self.response.output_parsed = Some(parsed),
                Err(e) => return (ResponseStatus::Failed, Some(e.into()), None),
            }
        }

        (ResponseStatus::Completed, None, None)
    }
}

/// Handles persistence of terminal responses
pub(crate) struct ResponsePersister {
    store: Arc<dyn ConversationStore>,
}

impl ResponsePersister {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    /// Write a frozen response to the store unless the caller opted out.
    pub async fn persist(&self, response: &Arc<Response>) -> Result<(), StoreError> {
        if !response.store {
            debug!("Response {} has store=false, not persisting", response.id);
            return Ok(());
        }
        match self.store.put(response.clone()).await {
            Ok(()) => {
                debug!(
                    "Persisted response {} with status {}",
                    response.id, response.status
                );
                Ok(())
            }
            Err(e) => {
                error!("Failed to persist response {}: {}", response.id, e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendToolCall;
    use crate::models::responses::ToolChoice;
    use crate::store::InMemoryConversationStore;
    use crate::web::responses::builders::ResponseBuilder;
    use serde_json::json;

    fn accumulator() -> TurnAccumulator {
        TurnAccumulator::new(ResponseBuilder::new("resp_test", "mock-model").build())
    }

    #[test]
    fn test_streamed_text_accumulates_into_one_item() {
        let mut acc = accumulator();
        let (index, opened) = acc.ensure_text_item().unwrap();
        assert_eq!(index, 0);
        assert!(acc.ensure_text_item().is_none());
        assert!(matches!(opened, OutputItem::Message { status: ItemStatus::InProgress, .. }));

        acc.push_text("Hello");
        acc.push_text(", world");
        let (_, closed) = acc.close_text(ItemStatus::Completed).unwrap();
        assert_eq!(closed.text().as_deref(), Some("Hello, world"));

        let response = acc.finalize(TurnOutcome::Finished, None);
        assert_eq!(response.status, ResponseStatus::Completed);
        assert_eq!(response.output_text, "Hello, world");
        assert!(response.completed_at.is_some());
    }

    #[test]
    fn test_empty_output_fails() {
        let response = accumulator().finalize(TurnOutcome::Finished, None);
        assert_eq!(response.status, ResponseStatus::Failed);
        assert_eq!(response.error.unwrap().code, "backend_error");
    }

    #[test]
    fn test_cancelled_keeps_partial_output() {
        let mut acc = accumulator();
        acc.ensure_text_item();
        acc.push_text("partial");
        let response = acc.finalize(TurnOutcome::Cancelled, None);
        assert_eq!(response.status, ResponseStatus::Incomplete);
        assert_eq!(response.incomplete_details.unwrap().reason, "cancelled");
        assert_eq!(response.output_text, "partial");
        assert!(matches!(
            response.output[0],
            OutputItem::Message { status: ItemStatus::Incomplete, .. }
        ));
    }

    #[test]
    fn test_rejected_transition_finalizes_as_failed() {
        let mut response = ResponseBuilder::new("resp_test", "mock-model").build();
        response.status = ResponseStatus::Completed;
        let response = TurnAccumulator::new(response).finalize(TurnOutcome::Cancelled, None);

        assert_eq!(response.status, ResponseStatus::Failed);
        assert!(response.incomplete_details.is_none());
        let error = response.error.unwrap();
        assert_eq!(error.error_type, "server_error");
        assert_eq!(error.code, "internal_error");
    }

    #[test]
    fn test_length_finish_is_incomplete() {
        let mut acc = accumulator();
        acc.ensure_text_item();
        acc.push_text("truncated");
        acc.record_finish(FinishReason::Length);
        let response = acc.finalize(TurnOutcome::Finished, None);
        assert_eq!(response.status, ResponseStatus::Incomplete);
        assert_eq!(response.incomplete_details.unwrap().reason, "max_output_tokens");
    }

    #[test]
    fn test_structured_output_validation() {
        let schema = json!({
            "type": "object",
            "properties": {"colors": {"type": "array", "items": {"type": "string"}}},
            "required": ["colors"]
        });

        let mut acc = accumulator();
        acc.ensure_text_item();
        acc.push_text(r#"{"colors": ["red"]}"#);
        let response = acc.finalize(TurnOutcome::Finished, Some(&schema));
        assert_eq!(response.status, ResponseStatus::Completed);
        assert_eq!(response.output_parsed, Some(json!({"colors": ["red"]})));

        let mut acc = accumulator();
        acc.ensure_text_item();
        acc.push_text("not json");
        let response = acc.finalize(TurnOutcome::Finished, Some(&schema));
        assert_eq!(response.status, ResponseStatus::Failed);
        assert_eq!(response.error.unwrap().code, "structured_output_parse_error");

        let mut acc = accumulator();
        acc.ensure_text_item();
        acc.push_text(r#"{"shades": []}"#);
        let response = acc.finalize(TurnOutcome::Finished, Some(&schema));
        assert_eq!(
            response.error.unwrap().code,
            "structured_output_schema_mismatch"
        );
    }

    #[test]
    fn test_install_completion_rejects_undeclared_tool() {
        let registry = ToolRegistry::from_declarations(&[], &ToolChoice::default(), 128).unwrap();
        let mut acc = accumulator();
        let err = acc
            .install_completion(
                BackendCompletion {
                    text: None,
                    tool_calls: vec![BackendToolCall {
                        id: "call_1".into(),
                        name: "ghost".into(),
                        arguments: "{}".into(),
                    }],
                    finish_reason: FinishReason::ToolCalls,
                    usage: None,
                },
                &registry,
            )
            .unwrap_err();

        let response = acc.finalize(TurnOutcome::Failed(err), None);
        assert_eq!(response.status, ResponseStatus::Failed);
        assert_eq!(response.error.unwrap().code, "tool_contract_violation");
        assert!(response.output.is_empty());
    }

    #[tokio::test]
    async fn test_persister_honours_store_flag() {
        let store = Arc::new(InMemoryConversationStore::default());
        let persister = ResponsePersister::new(store.clone());

        let mut kept = ResponseBuilder::new("resp_kept", "m").build();
        kept.status = ResponseStatus::Completed;
        persister.persist(&Arc::new(kept)).await.unwrap();

        let mut skipped = ResponseBuilder::new("resp_skipped", "m").store(false).build();
        skipped.status = ResponseStatus::Completed;
        persister.persist(&Arc::new(skipped)).await.unwrap();

        assert!(store.get("resp_kept").await.is_ok());
        assert!(store.get("resp_skipped").await.is_err());
    }
}
