//! Request-side wire types for the Responses API
//!
//! Inputs are accepted loosely here and normalized into
//! [`crate::models::responses::InputItem`] by the conversions module.

use crate::models::responses::{InputItem, Response, TextConfig, ToolChoice, ToolDefinition};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

// ============================================================================
// Message Content Types (Input)
// ============================================================================

/// Content part for input messages
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum MessageContentPart {
    /// Legacy: "text" as used by chat completions
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "input_text")]
    InputText { text: String },

    /// Assistant text echoed back as input
    #[serde(rename = "output_text")]
    OutputText { text: String },

    #[serde(rename = "refusal")]
    Refusal { refusal: String },

    #[serde(rename = "input_image")]
    InputImage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>, // "low" | "high" | "auto"
    },

    /// Accepted by the parser so it can be rejected with a clear message
    #[serde(rename = "input_file")]
    InputFile {
        #[serde(default)]
        filename: Option<String>,
    },
}

/// Content that can be either a string or array of content parts
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<MessageContentPart>),
}

/// One element of the `input` array before normalization.
///
/// `type` is optional; an item with a `role` and no `type` is a message.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawInputItem {
    #[serde(rename = "type", default)]
    pub item_type: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<MessageContent>,
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
    /// Tool result; strings pass through, other JSON is re-encoded
    #[serde(default)]
    pub output: Option<Value>,
}

// ============================================================================
// Requests
// ============================================================================

/// Body of `POST /v1/responses`
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ResponsesCreateRequest {
    #[serde(default)]
    pub model: Option<String>,

    /// Kept as raw JSON so that a bare string can be rejected explicitly.
    #[serde(default)]
    pub input: Value,

    #[serde(default)]
    pub instructions: Option<String>,

    #[serde(default)]
    pub previous_response_id: Option<String>,

    #[serde(default)]
    pub stream: bool,

    #[serde(default)]
    pub store: Option<bool>,

    #[serde(default)]
    pub tools: Vec<ToolDefinition>,

    #[serde(default)]
    pub tool_choice: Option<ToolChoice>,

    #[serde(default)]
    pub text: Option<TextConfig>,

    #[serde(default)]
    pub temperature: Option<f32>,

    #[serde(default)]
    pub top_p: Option<f32>,

    #[serde(default)]
    pub max_output_tokens: Option<i64>,

    #[serde(default)]
    pub parallel_tool_calls: Option<bool>,

    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,

    #[serde(default)]
    pub truncation: Option<String>,
}

/// Query parameters shared by the list endpoints
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ListQuery {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub order: Option<String>,
    #[serde(default)]
    pub after: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InputItemList {
    pub object: &'static str,
    pub data: Vec<InputItem>,
    pub first_id: Option<String>,
    pub last_id: Option<String>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseList {
    pub object: &'static str,
    pub data: Vec<Arc<Response>>,
    pub first_id: Option<String>,
    pub last_id: Option<String>,
    pub has_more: bool,
}
