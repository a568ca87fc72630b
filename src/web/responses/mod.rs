//! Modular Responses API implementation
//!
//! The lifecycle engine, its streaming event protocol, tool shaping and
//! structured-output validation, separated by concern.

pub mod builders;
pub mod constants;
pub mod context_builder;
pub mod conversions;
pub mod engine;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod pagination;
pub mod storage;
pub mod structured_output;
pub mod tools;
pub mod types;

// Re-export commonly used types
pub use conversions::MessageContentConverter;
pub use engine::{EngineConfig, ResponsesEngine};
pub use errors::error_mapping;
pub use events::{ResponseEvent, SequencedEvent, SseEventEmitter};
pub use tools::ToolRegistry;
pub use types::{MessageContent, MessageContentPart, ResponsesCreateRequest};

pub use handlers::router;
