//! Inference backend capability.
//!
//! The engine never generates text itself. It resolves a turn into a flat list
//! of chat messages plus the declared tools and the optional output schema,
//! and hands that to an [`InferenceBackend`]. The backend decides whether the
//! answer is text or a function call.

use crate::models::responses::{ToolChoice, ToolDefinition};
use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

pub mod mock;
pub mod openai_compat;
pub mod stream_processor;

pub use mock::MockBackend;
pub use openai_compat::OpenAiCompatBackend;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Request(String),
    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("backend response could not be decoded: {0}")]
    Decode(String),
    #[error("backend timed out after {0:?}")]
    Timeout(Duration),
}

impl BackendError {
    /// Transport failures and 5xx answers are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Request(_) | BackendError::Timeout(_) => true,
            BackendError::Status { status, .. } => *status >= 500,
            BackendError::Decode(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::Tool => "tool",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatContentPart {
    Text(String),
    ImageUrl { url: String, detail: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackendToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: Vec<ChatContentPart>,
    pub tool_calls: Vec<BackendToolCall>,
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn text(role: ChatRole, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ChatContentPart::Text(text.into())],
            tool_calls: vec![],
            tool_call_id: None,
        }
    }

    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ChatContentPart::Text(text) => Some(text.as_str()),
                ChatContentPart::ImageUrl { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn has_image(&self) -> bool {
        self.content
            .iter()
            .any(|part| matches!(part, ChatContentPart::ImageUrl { .. }))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputSchema {
    pub name: String,
    pub schema: Value,
    pub strict: bool,
}

/// Fully resolved input for one generation.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: ToolChoice,
    pub output_schema: Option<OutputSchema>,
    pub temperature: f32,
    pub top_p: f32,
    pub max_output_tokens: Option<u32>,
    pub parallel_tool_calls: bool,
}

impl BackendRequest {
    pub fn last_user_text(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(ChatMessage::text_content)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

impl FinishReason {
    pub fn parse(reason: &str) -> Self {
        match reason {
            "length" => FinishReason::Length,
            "tool_calls" | "function_call" => FinishReason::ToolCalls,
            "content_filter" => FinishReason::ContentFilter,
            _ => FinishReason::Stop,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackendCompletion {
    pub text: Option<String>,
    pub tool_calls: Vec<BackendToolCall>,
    pub finish_reason: FinishReason,
    pub usage: Option<TokenUsage>,
}

/// One increment of a streamed generation.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendChunk {
    TextDelta(String),
    /// A fully assembled tool call; argument fragments are joined by the backend.
    ToolCall(BackendToolCall),
    Usage(TokenUsage),
    Finished(FinishReason),
}

pub type BackendStream = Pin<Box<dyn Stream<Item = Result<BackendChunk, BackendError>> + Send>>;

#[async_trait]
pub trait InferenceBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: BackendRequest) -> Result<BackendCompletion, BackendError>;

    /// Start a streamed generation. Dropping the returned stream stops it.
    async fn stream(&self, request: BackendRequest) -> Result<BackendStream, BackendError>;

    async fn list_models(&self) -> Result<Vec<String>, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_reason_parse() {
        assert_eq!(FinishReason::parse("stop"), FinishReason::Stop);
        assert_eq!(FinishReason::parse("length"), FinishReason::Length);
        assert_eq!(FinishReason::parse("tool_calls"), FinishReason::ToolCalls);
        assert_eq!(FinishReason::parse("something_new"), FinishReason::Stop);
    }

    #[test]
    fn test_retryable_errors() {
        assert!(BackendError::Request("reset".into()).is_retryable());
        assert!(BackendError::Status {
            status: 502,
            body: String::new()
        }
        .is_retryable());
        assert!(!BackendError::Status {
            status: 400,
            body: String::new()
        }
        .is_retryable());
        assert!(!BackendError::Decode("bad".into()).is_retryable());
    }

    #[test]
    fn test_text_content_skips_images() {
        let message = ChatMessage {
            role: ChatRole::User,
            content: vec![
                ChatContentPart::Text("look ".into()),
                ChatContentPart::ImageUrl {
                    url: "data:image/png;base64,AAAA".into(),
                    detail: None,
                },
                ChatContentPart::Text("here".into()),
            ],
            tool_calls: vec![],
            tool_call_id: None,
        };
        assert_eq!(message.text_content(), "look here");
        assert!(message.has_image());
    }
}
