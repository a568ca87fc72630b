use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

// ============================================================================
// Error types
// ============================================================================

/// Failure taxonomy for a single response turn.
///
/// Variants before dispatch (`Validation`, `PreviousResponseNotFound`) are
/// surfaced synchronously and never produce a stored response. Variants
/// discovered during or after dispatch end up as the `error` object of a
/// `failed` response.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResponsesError {
    #[error("{message}")]
    Validation {
        param: Option<String>,
        message: String,
    },
    #[error("previous response '{0}' not found")]
    PreviousResponseNotFound(String),
    #[error("response '{0}' not found")]
    ResponseNotFound(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("structured output is not valid JSON: {0}")]
    StructuredOutputParse(String),
    #[error("structured output does not match schema: {0}")]
    StructuredOutputSchema(String),
    #[error("tool contract violation: {0}")]
    ToolContract(String),
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: ResponseStatus,
        to: ResponseStatus,
    },
    #[error("storage error: {0}")]
    Store(String),
}

impl ResponsesError {
    pub fn validation(param: impl Into<String>, message: impl Into<String>) -> Self {
        ResponsesError::Validation {
            param: Some(param.into()),
            message: message.into(),
        }
    }

    /// Build the `error` object carried by a failed response.
    pub fn to_error_detail(&self) -> ResponseErrorDetail {
        let (error_type, code) = match self {
            ResponsesError::Backend(_) => ("server_error", "backend_error"),
            ResponsesError::StructuredOutputParse(_) => {
                ("model_error", "structured_output_parse_error")
            }
            ResponsesError::StructuredOutputSchema(_) => {
                ("model_error", "structured_output_schema_mismatch")
            }
            ResponsesError::ToolContract(_) => ("model_error", "tool_contract_violation"),
            ResponsesError::Validation { .. } => ("invalid_request", "invalid_request"),
            ResponsesError::PreviousResponseNotFound(_) | ResponsesError::ResponseNotFound(_) => {
                ("not_found", "not_found")
            }
            ResponsesError::InvalidTransition { .. } | ResponsesError::Store(_) => {
                ("server_error", "internal_error")
            }
        };
        ResponseErrorDetail {
            error_type: error_type.to_string(),
            code: code.to_string(),
            message: self.to_string(),
        }
    }
}

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    InProgress,
    Completed,
    Failed,
    Incomplete,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::InProgress => "in_progress",
            ResponseStatus::Completed => "completed",
            ResponseStatus::Failed => "failed",
            ResponseStatus::Incomplete => "incomplete",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ResponseStatus::InProgress)
    }

    /// Forward-only: `in_progress` may move to any terminal status, terminal
    /// statuses have no outgoing transitions.
    pub fn can_transition_to(&self, next: ResponseStatus) -> bool {
        matches!(
            (self, next),
            (
                ResponseStatus::InProgress,
                ResponseStatus::Completed | ResponseStatus::Failed | ResponseStatus::Incomplete
            )
        )
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    InProgress,
    Completed,
    Incomplete,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Developer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Developer => "developer",
        }
    }
}

// ============================================================================
// Input items (the turn's own input, normalized at admission)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputContent {
    InputText {
        text: String,
    },
    OutputText {
        text: String,
    },
    InputImage {
        #[serde(skip_serializing_if = "Option::is_none")]
        image_url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

impl InputContent {
    pub fn text(&self) -> Option<&str> {
        match self {
            InputContent::InputText { text } | InputContent::OutputText { text } => Some(text),
            InputContent::InputImage { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputItem {
    Message {
        id: String,
        role: Role,
        content: Vec<InputContent>,
    },
    FunctionCall {
        id: String,
        call_id: String,
        name: String,
        arguments: String,
    },
    FunctionCallOutput {
        id: String,
        call_id: String,
        output: String,
    },
}

impl InputItem {
    pub fn id(&self) -> &str {
        match self {
            InputItem::Message { id, .. }
            | InputItem::FunctionCall { id, .. }
            | InputItem::FunctionCallOutput { id, .. } => id,
        }
    }
}

// ============================================================================
// Output items
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputContent {
    OutputText {
        text: String,
        annotations: Vec<Value>,
        logprobs: Vec<Value>,
    },
    Refusal {
        refusal: String,
    },
}

impl OutputContent {
    pub fn output_text(text: impl Into<String>) -> Self {
        OutputContent::OutputText {
            text: text.into(),
            annotations: vec![],
            logprobs: vec![],
        }
    }
}

/// One element of a response's output, tagged by `type`.
///
/// Structured (schema-constrained) output travels as a `message` whose
/// `output_text` part holds the validated JSON document, so clients that
/// aggregate `output_text` see it unchanged.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    Message {
        id: String,
        status: ItemStatus,
        role: Role,
        content: Vec<OutputContent>,
    },
    FunctionCall {
        id: String,
        status: ItemStatus,
        call_id: String,
        name: String,
        arguments: String,
    },
}

impl OutputItem {
    pub fn id(&self) -> &str {
        match self {
            OutputItem::Message { id, .. } | OutputItem::FunctionCall { id, .. } => id,
        }
    }

    /// Concatenated `output_text` parts of a message item.
    pub fn text(&self) -> Option<String> {
        match self {
            OutputItem::Message { content, .. } => {
                let mut text = String::new();
                for part in content {
                    if let OutputContent::OutputText { text: t, .. } = part {
                        text.push_str(t);
                    }
                }
                Some(text)
            }
            OutputItem::FunctionCall { .. } => None,
        }
    }
}

// ============================================================================
// Request echo fields
// ============================================================================

/// A caller-declared function tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    #[serde(default)]
    pub strict: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    Mode(String),
    Function {
        #[serde(rename = "type")]
        choice_type: String,
        name: String,
    },
}

impl Default for ToolChoice {
    fn default() -> Self {
        ToolChoice::Mode("auto".to_string())
    }
}

impl ToolChoice {
    pub fn is_none(&self) -> bool {
        matches!(self, ToolChoice::Mode(mode) if mode == "none")
    }

    pub fn forced_function(&self) -> Option<&str> {
        match self {
            ToolChoice::Function { name, .. } => Some(name),
            ToolChoice::Mode(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextFormat {
    Text,
    JsonSchema {
        name: String,
        schema: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        strict: Option<bool>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextConfig {
    pub format: TextFormat,
}

impl Default for TextConfig {
    fn default() -> Self {
        TextConfig {
            format: TextFormat::Text,
        }
    }
}

// ============================================================================
// Usage and error detail
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InputTokenDetails {
    pub cached_tokens: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OutputTokenDetails {
    pub reasoning_tokens: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub input_tokens_details: InputTokenDetails,
    pub output_tokens: u32,
    pub output_tokens_details: OutputTokenDetails,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseErrorDetail {
    #[serde(rename = "type")]
    pub error_type: String,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncompleteDetails {
    pub reason: String,
}

// ============================================================================
// Response
// ============================================================================

/// One generation turn.
///
/// Mutated only by the engine while `in_progress`; once terminal it is wrapped
/// in an `Arc` and never touched again.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub id: String,
    pub object: &'static str,
    pub created_at: i64,
    pub completed_at: Option<i64>,
    pub status: ResponseStatus,
    pub error: Option<ResponseErrorDetail>,
    pub incomplete_details: Option<IncompleteDetails>,
    pub model: String,
    pub previous_response_id: Option<String>,
    pub instructions: Option<String>,
    /// The turn's own input; kept for chaining and input listing.
    #[serde(skip)]
    pub input: Vec<InputItem>,
    pub output: Vec<OutputItem>,
    pub output_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_parsed: Option<Value>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: ToolChoice,
    pub text: TextConfig,
    pub temperature: f32,
    pub top_p: f32,
    pub max_output_tokens: Option<u32>,
    pub parallel_tool_calls: bool,
    pub store: bool,
    pub usage: Option<Usage>,
    pub metadata: Map<String, Value>,
    pub truncation: &'static str,
}

impl Response {
    /// Move to `next`, rejecting backwards or repeated terminal transitions.
    pub fn transition(&mut self, next: ResponseStatus) -> Result<(), ResponsesError> {
        if !self.status.can_transition_to(next) {
            return Err(ResponsesError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Recompute the `output_text` aggregate from the message items.
    pub fn refresh_output_text(&mut self) {
        self.output_text = self.output.iter().filter_map(OutputItem::text).collect();
    }

    pub fn function_calls(&self) -> impl Iterator<Item = &OutputItem> {
        self.output
            .iter()
            .filter(|item| matches!(item, OutputItem::FunctionCall { .. }))
    }
}
