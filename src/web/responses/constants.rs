//! Constants used throughout the Responses API

/// Channel buffer sizes
pub const DEFAULT_EVENT_CHANNEL_BUFFER: usize = 64;
pub const CANCELLATION_BROADCAST_BUFFER: usize = 256;

/// Default values
pub const DEFAULT_TEMPERATURE: f32 = 1.0;
pub const DEFAULT_TOP_P: f32 = 1.0;
pub const DEFAULT_MAX_INPUT_ITEMS: usize = 1000;
pub const DEFAULT_MAX_TOOLS: usize = 128;
pub const DEFAULT_CONTEXT_WINDOW_TOKENS: usize = 64_000;

/// Pagination
pub const DEFAULT_PAGINATION_LIMIT: i64 = 20;
pub const MAX_PAGINATION_LIMIT: i64 = 100;

/// Object types
pub const OBJECT_TYPE_RESPONSE: &str = "response";
pub const OBJECT_TYPE_LIST: &str = "list";
pub const OBJECT_TYPE_MODEL: &str = "model";

/// Event types for SSE streaming
pub const EVENT_RESPONSE_CREATED: &str = "response.created";
pub const EVENT_RESPONSE_IN_PROGRESS: &str = "response.in_progress";
pub const EVENT_RESPONSE_OUTPUT_ITEM_ADDED: &str = "response.output_item.added";
pub const EVENT_RESPONSE_CONTENT_PART_ADDED: &str = "response.content_part.added";
pub const EVENT_RESPONSE_OUTPUT_TEXT_DELTA: &str = "response.output_text.delta";
pub const EVENT_RESPONSE_OUTPUT_TEXT_DONE: &str = "response.output_text.done";
pub const EVENT_RESPONSE_CONTENT_PART_DONE: &str = "response.content_part.done";
pub const EVENT_RESPONSE_FUNCTION_CALL_ARGUMENTS_DONE: &str =
    "response.function_call_arguments.done";
pub const EVENT_RESPONSE_OUTPUT_ITEM_DONE: &str = "response.output_item.done";
pub const EVENT_RESPONSE_COMPLETED: &str = "response.completed";
pub const EVENT_RESPONSE_FAILED: &str = "response.failed";
pub const EVENT_RESPONSE_INCOMPLETE: &str = "response.incomplete";

/// Error event data
pub const ERROR_DATA_SERIALIZATION_FAILED: &str = "serialization_failed";

/// Incomplete reasons
pub const INCOMPLETE_REASON_CANCELLED: &str = "cancelled";
pub const INCOMPLETE_REASON_MAX_OUTPUT_TOKENS: &str = "max_output_tokens";

/// Truncation strategies
pub const TRUNCATION_AUTO: &str = "auto";
pub const TRUNCATION_DISABLED: &str = "disabled";

/// Tool choice strategies
pub const TOOL_CHOICE_AUTO: &str = "auto";
pub const TOOL_CHOICE_NONE: &str = "none";
pub const TOOL_CHOICE_REQUIRED: &str = "required";

/// Tool and item types
pub const TOOL_TYPE_FUNCTION: &str = "function";
pub const ITEM_TYPE_MESSAGE: &str = "message";
pub const ITEM_TYPE_FUNCTION_CALL: &str = "function_call";
pub const ITEM_TYPE_FUNCTION_CALL_OUTPUT: &str = "function_call_output";

/// Text format types

pub const TRUNCATION_NOTICE: &str = "[Previous messages truncated due to context limits]";
