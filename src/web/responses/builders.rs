//! Builder patterns for complex response structures

use crate::backend::TokenUsage;
use crate::models::ids::new_message_item_id;
use crate::models::responses::{
    InputItem, InputTokenDetails, ItemStatus, OutputContent, OutputItem, OutputTokenDetails,
    Response, ResponseStatus, Role, TextConfig, ToolChoice, ToolDefinition, Usage,
};
use crate::web::responses::constants::{
    DEFAULT_TEMPERATURE, DEFAULT_TOP_P, OBJECT_TYPE_RESPONSE, TRUNCATION_DISABLED,
};
use chrono::Utc;
use serde_json::{Map, Value};

/// Builder for a fresh `in_progress` [`Response`]
///
/// # Example
/// ```ignore
/// let response = ResponseBuilder::new(new_response_id(), "mock-model")
///     .input(items)
///     .tools(tools)
///     .build();
/// ```
pub struct ResponseBuilder {
    response: Response,
}

impl ResponseBuilder {
    pub fn new(id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            response: Response {
                id: id.into(),
                object: OBJECT_TYPE_RESPONSE,
                created_at: Utc::now().timestamp(),
                completed_at: None,
                status: ResponseStatus::InProgress,
                error: None,
                incomplete_details: None,
                model: model.into(),
                previous_response_id: None,
                instructions: None,
                input: vec![],
                output: vec![],
                output_text: String::new(),
                output_parsed: None,
                tools: vec![],
                tool_choice: ToolChoice::default(),
                text: TextConfig::default(),
                temperature: DEFAULT_TEMPERATURE,
                top_p: DEFAULT_TOP_P,
                max_output_tokens: None,
                parallel_tool_calls: true,
                store: true,
                usage: None,
                metadata: Map::new(),
                truncation: TRUNCATION_DISABLED,
            },
        }
    }

    pub fn previous_response_id(mut self, id: Option<String>) -> Self {
        self.response.previous_response_id = id;
        self
    }

    pub fn instructions(mut self, instructions: Option<String>) -> Self {
        self.response.instructions = instructions;
        self
    }

    pub fn input(mut self, input: Vec<InputItem>) -> Self {
        self.response.input = input;
        self
    }

    pub fn tools(mut self, tools: Vec<ToolDefinition>, tool_choice: ToolChoice) -> Self {
        self.response.tools = tools;
        self.response.tool_choice = tool_choice;
        self
    }

    pub fn text(mut self, text: TextConfig) -> Self {
        self.response.text = text;
        self
    }

    pub fn sampling(mut self, temperature: f32, top_p: f32) -> Self {
        self.response.temperature = temperature;
        self.response.top_p = top_p;
        self
    }

    pub fn max_output_tokens(mut self, max_output_tokens: Option<u32>) -> Self {
        self.response.max_output_tokens = max_output_tokens;
        self
    }

    pub fn parallel_tool_calls(mut self, parallel: bool) -> Self {
        self.response.parallel_tool_calls = parallel;
        self
    }

    pub fn store(mut self, store: bool) -> Self {
        self.response.store = store;
        self
    }

    pub fn metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.response.metadata = metadata;
        self
    }

    pub fn truncation(mut self, truncation: &'static str) -> Self {
        self.response.truncation = truncation;
        self
    }

    pub fn build(self) -> Response {
        self.response
    }
}

/// Builder for an assistant message output item
pub struct OutputItemBuilder {
    id: String,
    status: ItemStatus,
    content: Vec<OutputContent>,
}

impl OutputItemBuilder {
    pub fn new_message() -> Self {
        Self::with_id(new_message_item_id())
    }

    pub fn with_id(id: String) -> Self {
        Self {
            id,
            status: ItemStatus::InProgress,
            content: vec![],
        }
    }

    pub fn status(mut self, status: ItemStatus) -> Self {
        self.status = status;
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.content.push(OutputContent::output_text(text));
        self
    }

    pub fn build(self) -> OutputItem {
        OutputItem::Message {
            id: self.id,
            status: self.status,
            role: Role::Assistant,
            content: self.content,
        }
    }
}

/// Helper function to build Usage from backend token counts
pub fn build_usage(usage: TokenUsage) -> Usage {
    Usage {
        input_tokens: usage.prompt_tokens,
        input_tokens_details: InputTokenDetails { cached_tokens: 0 },
        output_tokens: usage.completion_tokens,
        output_tokens_details: OutputTokenDetails {
            reasoning_tokens: 0,
        },
        total_tokens: usage.prompt_tokens + usage.completion_tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_builder_defaults() {
        let response = ResponseBuilder::new("resp_1", "mock-model").build();
        assert_eq!(response.object, "response");
        assert_eq!(response.status, ResponseStatus::InProgress);
        assert!(response.output.is_empty());
        assert!(response.store);
        assert_eq!(response.truncation, "disabled");
        assert!(response.created_at > 0);
    }

    #[test]
    fn test_response_builder_with_custom_values() {
        let mut metadata = Map::new();
        metadata.insert("key".to_string(), Value::String("value".to_string()));
        let response = ResponseBuilder::new("resp_1", "mock-model")
            .previous_response_id(Some("resp_0".to_string()))
            .sampling(0.2, 0.9)
            .store(false)
            .metadata(metadata)
            .build();
        assert_eq!(response.previous_response_id.as_deref(), Some("resp_0"));
        assert_eq!(response.temperature, 0.2);
        assert!(!response.store);
        assert_eq!(response.metadata["key"], "value");
    }

    #[test]
    fn test_output_item_builder() {
        let item = OutputItemBuilder::new_message()
            .status(ItemStatus::Completed)
            .text("Hello")
            .build();
        assert!(item.id().starts_with("msg_"));
        assert_eq!(item.text().as_deref(), Some("Hello"));
    }

    #[test]
    fn test_build_usage() {
        let usage = build_usage(TokenUsage {
            prompt_tokens: 100,
            completion_tokens: 50,
        });
        assert_eq!(usage.input_tokens, 100);
        assert_eq!(usage.output_tokens, 50);
        assert_eq!(usage.total_tokens, 150);
    }
}
