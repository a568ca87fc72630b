//! Deterministic stand-in backend for local runs and tests.

use super::{
    BackendChunk, BackendCompletion, BackendError, BackendRequest, BackendStream,
    BackendToolCall, ChatRole, FinishReason, InferenceBackend, TokenUsage,
};
use crate::models::ids::new_call_id;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;

pub const MOCK_MODEL: &str = "mock-model";

const GREETING: &str = "Hello, nice day!";
const COUNTING: &str = "1, 2, 3, 4, 5";
const IMAGE_REPLY: &str =
    "I can see the image you shared. It appears to be a small red icon or symbol.";
const SAMPLE_COLORS: [&str; 3] = ["red", "green", "blue"];

/// Scripted behaviour knobs. The defaults produce well-formed answers.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    failure: Option<String>,
    stream_failure_after: Option<usize>,
    chunk_delay: Option<Duration>,
    undeclared_tool: Option<String>,
    text_override: Option<String>,
    finish_reason: Option<FinishReason>,
    empty_output: bool,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every request before producing anything.
    pub fn with_failure(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Fail a streamed generation after `chunks` text deltas.
    pub fn with_stream_failure_after(mut self, chunks: usize) -> Self {
        self.stream_failure_after = Some(chunks);
        self
    }

    /// Sleep before each streamed chunk and before a blocking completion.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Answer with a call to a tool the caller never declared.
    pub fn with_undeclared_tool(mut self, name: impl Into<String>) -> Self {
        self.undeclared_tool = Some(name.into());
        self
    }

    /// Reply with exactly this text, bypassing tool and schema handling.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text_override = Some(text.into());
        self
    }

    pub fn with_finish_reason(mut self, reason: FinishReason) -> Self {
        self.finish_reason = Some(reason);
        self
    }

    pub fn with_empty_output(mut self) -> Self {
        self.empty_output = true;
        self
    }

    fn plan(&self, request: &BackendRequest) -> Result<BackendCompletion, BackendError> {
        if let Some(message) = &self.failure {
            return Err(BackendError::Status {
                status: 503,
                body: message.clone(),
            });
        }

        let prompt_tokens = request
            .messages
            .iter()
            .map(|m| m.text_content().split_whitespace().count() as u32)
            .sum::<u32>()
            .max(1);

        if self.empty_output {
            return Ok(BackendCompletion {
                text: None,
                tool_calls: vec![],
                finish_reason: FinishReason::Stop,
                usage: Some(TokenUsage {
                    prompt_tokens,
                    completion_tokens: 0,
                }),
            });
        }

        if let Some(name) = &self.undeclared_tool {
            return Ok(tool_completion(name, "{}".to_string(), prompt_tokens));
        }

        if self.text_override.is_none()
            && !request.tools.is_empty()
            && !request.tool_choice.is_none()
        {
            let tool = request
                .tool_choice
                .forced_function()
                .and_then(|name| request.tools.iter().find(|t| t.name == name))
                .unwrap_or(&request.tools[0]);
            let arguments = tool
                .parameters
                .as_ref()
                .map(sample_for_schema)
                .unwrap_or_else(|| json!({}));
            return Ok(tool_completion(
                &tool.name,
                arguments.to_string(),
                prompt_tokens,
            ));
        }

        let text = if let Some(text) = &self.text_override {
            text.clone()
        } else if let Some(schema) = &request.output_schema {
            sample_for_schema(&schema.schema).to_string()
        } else if request
            .messages
            .iter()
            .any(|m| m.role == ChatRole::User && m.has_image())
        {
            IMAGE_REPLY.to_string()
        } else if request
            .last_user_text()
            .map(|t| t.to_lowercase().contains("count from 1 to 5"))
            .unwrap_or(false)
        {
            COUNTING.to_string()
        } else {
            GREETING.to_string()
        };

        let completion_tokens = split_tokens(&text).len() as u32;
        Ok(BackendCompletion {
            text: Some(text),
            tool_calls: vec![],
            finish_reason: self.finish_reason.unwrap_or(FinishReason::Stop),
            usage: Some(TokenUsage {
                prompt_tokens,
                completion_tokens,
            }),
        })
    }
}

#[async_trait]
impl InferenceBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: BackendRequest) -> Result<BackendCompletion, BackendError> {
        if let Some(delay) = self.chunk_delay {
            tokio::time::sleep(delay).await;
        }
        let completion = self.plan(&request)?;
        debug!(
            "Mock backend completed (text={}, tool_calls={})",
            completion.text.is_some(),
            completion.tool_calls.len()
        );
        Ok(completion)
    }

    async fn stream(&self, request: BackendRequest) -> Result<BackendStream, BackendError> {
        let completion = self.plan(&request)?;
        let delay = self.chunk_delay;
        let fail_after = self.stream_failure_after;

        let stream = async_stream::stream! {
            if let Some(text) = &completion.text {
                for (index, token) in split_tokens(text).into_iter().enumerate() {
                    if fail_after == Some(index) {
                        yield Err(BackendError::Request("mock stream interrupted".to_string()));
                        return;
                    }
                    if let Some(delay) = delay {
                        tokio::time::sleep(delay).await;
                    }
                    yield Ok(BackendChunk::TextDelta(token));
                }
            }
            for call in completion.tool_calls {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(BackendChunk::ToolCall(call));
            }
            if let Some(usage) = completion.usage {
                yield Ok(BackendChunk::Usage(usage));
            }
            yield Ok(BackendChunk::Finished(completion.finish_reason));
        };

        Ok(Box::pin(stream))
    }

    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        Ok(vec![MOCK_MODEL.to_string()])
    }
}

fn tool_completion(name: &str, arguments: String, prompt_tokens: u32) -> BackendCompletion {
    BackendCompletion {
        text: None,
        tool_calls: vec![BackendToolCall {
            id: new_call_id(),
            name: name.to_string(),
            arguments,
        }],
        finish_reason: FinishReason::ToolCalls,
        usage: Some(TokenUsage {
            prompt_tokens,
            completion_tokens: 15,
        }),
    }
}

/// Split text into word-sized deltas that concatenate back to the input.
pub fn split_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch == ' ' && !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
        current.push(ch);
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Produce a value that satisfies the supported schema subset.
pub fn sample_for_schema(schema: &Value) -> Value {
    if let Some(values) = schema.get("enum").and_then(Value::as_array) {
        if let Some(first) = values.first() {
            return first.clone();
        }
    }

    match schema.get("type").and_then(Value::as_str) {
        Some("object") => {
            let mut object = Map::new();
            if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
                for (name, property) in properties {
                    object.insert(name.clone(), sample_for_schema(property));
                }
            }
            Value::Object(object)
        }
        Some("array") => {
            let items = schema.get("items").cloned().unwrap_or_else(|| json!({}));
            if items.get("type").and_then(Value::as_str) == Some("string")
                && items.get("enum").is_none()
            {
                Value::Array(SAMPLE_COLORS.iter().map(|c| json!(c)).collect())
            } else {
                Value::Array(vec![sample_for_schema(&items)])
            }
        }
        Some("string") => json!("sample"),
        Some("integer") => json!(1),
        Some("number") => json!(1.5),
        Some("boolean") => json!(true),
        Some("null") => Value::Null,
        _ => json!({}),
    }
}
