//! Message content conversion utilities

use crate::backend::{BackendToolCall, ChatContentPart, ChatMessage, ChatRole};
use crate::models::ids::{new_function_call_item_id, new_message_item_id};
use crate::models::responses::{
    InputContent, InputItem, OutputContent, OutputItem, ResponsesError, Role,
};
use crate::web::responses::constants::{
    ITEM_TYPE_FUNCTION_CALL, ITEM_TYPE_FUNCTION_CALL_OUTPUT, ITEM_TYPE_MESSAGE,
};
use crate::web::responses::types::{MessageContent, MessageContentPart, RawInputItem};
use serde_json::Value;

/// Centralized message content conversion utilities
///
/// Single place for moving between the loose request shapes, the normalized
/// [`InputItem`]/[`OutputItem`] model and the backend's chat messages.
pub struct MessageContentConverter;

impl MessageContentConverter {
    pub fn parse_role(role: &str) -> Result<Role, ResponsesError> {
        match role {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            "developer" => Ok(Role::Developer),
            other => Err(ResponsesError::validation(
                "input",
                format!(
                    "invalid role '{}': must be one of user, assistant, system, developer",
                    other
                ),
            )),
        }
    }

    /// Normalize MessageContent to a list of typed parts
    ///
    /// Plain strings become `input_text` (or `output_text` for assistant
    /// messages). `input_file` is rejected.
    pub fn normalize_content(
        content: MessageContent,
        role: Role,
    ) -> Result<Vec<InputContent>, ResponsesError> {
        let text_part = |text: String| {
            if role == Role::Assistant {
                InputContent::OutputText { text }
            } else {
                InputContent::InputText { text }
            }
        };

        match content {
            MessageContent::Text(text) => Ok(vec![text_part(text)]),
            MessageContent::Parts(parts) => parts
                .into_iter()
                .map(|part| match part {
                    MessageContentPart::Text { text } | MessageContentPart::InputText { text } => {
                        Ok(text_part(text))
                    }
                    MessageContentPart::OutputText { text } => {
                        Ok(InputContent::OutputText { text })
                    }
                    MessageContentPart::Refusal { refusal } => {
                        Ok(InputContent::OutputText { text: refusal })
                    }
                    MessageContentPart::InputImage {
                        image_url, detail, ..
                    } => match image_url {
                        Some(url) if !url.is_empty() => Ok(InputContent::InputImage {
                            image_url: Some(url),
                            detail,
                        }),
                        _ => Err(ResponsesError::validation(
                            "input",
                            "input_image requires an image_url",
                        )),
                    },
                    MessageContentPart::InputFile { .. } => Err(ResponsesError::validation(
                        "input",
                        "input_file content is not supported",
                    )),
                })
                .collect(),
        }
    }

    /// Normalize one raw `input` element, assigning it an item id.
    pub fn to_input_item(raw: RawInputItem, index: usize) -> Result<InputItem, ResponsesError> {
        let item_type = raw.item_type.as_deref().unwrap_or(ITEM_TYPE_MESSAGE);
        let param = format!("input[{}]", index);

        match item_type {
            ITEM_TYPE_MESSAGE => {
                let role = raw.role.as_deref().ok_or_else(|| {
                    ResponsesError::validation(param.clone(), "message item requires a role")
                })?;
                let role = Self::parse_role(role)?;
                let content = raw.content.ok_or_else(|| {
                    ResponsesError::validation(param.clone(), "message item requires content")
                })?;
                let content = Self::normalize_content(content, role)?;
                if content.is_empty() {
                    return Err(ResponsesError::validation(
                        param,
                        "message content must not be empty",
                    ));
                }
                Ok(InputItem::Message {
                    id: raw.id.unwrap_or_else(new_message_item_id),
                    role,
                    content,
                })
            }
            ITEM_TYPE_FUNCTION_CALL => {
                let call_id = non_empty(raw.call_id, &param, "call_id")?;
                let name = non_empty(raw.name, &param, "name")?;
                Ok(InputItem::FunctionCall {
                    id: raw.id.unwrap_or_else(new_function_call_item_id),
                    call_id,
                    name,
                    arguments: raw.arguments.unwrap_or_else(|| "{}".to_string()),
                })
            }
            ITEM_TYPE_FUNCTION_CALL_OUTPUT => {
                let call_id = non_empty(raw.call_id, &param, "call_id")?;
                let output = match raw.output {
                    Some(Value::String(s)) => s,
                    Some(other) => other.to_string(),
                    None => {
                        return Err(ResponsesError::validation(
                            param,
                            "function_call_output item requires output",
                        ))
                    }
                };
                Ok(InputItem::FunctionCallOutput {
                    id: raw.id.unwrap_or_else(new_message_item_id),
                    call_id,
                    output,
                })
            }
            other => Err(ResponsesError::validation(
                param,
                format!("unsupported input item type '{}'", other),
            )),
        }
    }

    fn chat_role(role: Role) -> ChatRole {
        match role {
            Role::User => ChatRole::User,
            Role::Assistant => ChatRole::Assistant,
            Role::System | Role::Developer => ChatRole::System,
        }
    }

    fn to_chat_content(content: &[InputContent]) -> Vec<ChatContentPart> {
        content
            .iter()
            .map(|part| match part {
                InputContent::InputText { text } | InputContent::OutputText { text } => {
                    ChatContentPart::Text(text.clone())
                }
                InputContent::InputImage { image_url, detail } => ChatContentPart::ImageUrl {
                    url: image_url.clone().unwrap_or_default(),
                    detail: detail.clone(),
                },
            })
            .collect()
    }

    pub fn input_item_to_chat_message(item: &InputItem) -> ChatMessage {
        match item {
            InputItem::Message { role, content, .. } => ChatMessage {
                role: Self::chat_role(*role),
                content: Self::to_chat_content(content),
                tool_calls: vec![],
                tool_call_id: None,
            },
            InputItem::FunctionCall {
                call_id,
                name,
                arguments,
                ..
            } => tool_call_message(call_id, name, arguments),
            InputItem::FunctionCallOutput {
                call_id, output, ..
            } => ChatMessage {
                role: ChatRole::Tool,
                content: vec![ChatContentPart::Text(output.clone())],
                tool_calls: vec![],
                tool_call_id: Some(call_id.clone()),
            },
        }
    }

    pub fn output_item_to_chat_message(item: &OutputItem) -> ChatMessage {
        match item {
            OutputItem::Message { content, .. } => ChatMessage {
                role: ChatRole::Assistant,
                content: content
                    .iter()
                    .map(|part| match part {
                        OutputContent::OutputText { text, .. } => {
                            ChatContentPart::Text(text.clone())
                        }
                        OutputContent::Refusal { refusal } => {
                            ChatContentPart::Text(refusal.clone())
                        }
                    })
                    .collect(),
                tool_calls: vec![],
                tool_call_id: None,
            },
            OutputItem::FunctionCall {
                call_id,
                name,
                arguments,
                ..
            } => tool_call_message(call_id, name, arguments),
        }
    }
}

fn tool_call_message(call_id: &str, name: &str, arguments: &str) -> ChatMessage {
    ChatMessage {
        role: ChatRole::Assistant,
        content: vec![],
        tool_calls: vec![BackendToolCall {
            id: call_id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }],
        tool_call_id: None,
    }
}

fn non_empty(value: Option<String>, param: &str, field: &str) -> Result<String, ResponsesError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ResponsesError::validation(
            param,
            format!("{} is required", field),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::responses::ItemStatus;
    use serde_json::json;

    fn raw(value: Value) -> RawInputItem {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_message_without_type_defaults_to_message() {
        let item =
            MessageContentConverter::to_input_item(raw(json!({"role": "user", "content": "hi"})), 0)
                .unwrap();
        match item {
            InputItem::Message { id, role, content } => {
                assert!(id.starts_with("msg_"));
                assert_eq!(role, Role::User);
                assert_eq!(content, vec![InputContent::InputText { text: "hi".into() }]);
            }
            other => panic!("unexpected item {:?}", other),
        }
    }

    #[test]
    fn test_assistant_text_becomes_output_text() {
        let content = MessageContentConverter::normalize_content(
            MessageContent::Text("earlier answer".into()),
            Role::Assistant,
        )
        .unwrap();
        assert_eq!(
            content,
            vec![InputContent::OutputText {
                text: "earlier answer".into()
            }]
        );
    }

    #[test]
    fn test_rejects_input_file_and_bad_roles() {
        let err = MessageContentConverter::to_input_item(
            raw(json!({"role": "user", "content": [{"type": "input_file", "filename": "a.pdf"}]})),
            0,
        )
        .unwrap_err();
        assert!(err.to_string().contains("input_file"));

        let err = MessageContentConverter::to_input_item(
            raw(json!({"role": "robot", "content": "hi"})),
            0,
        )
        .unwrap_err();
        assert!(matches!(err, ResponsesError::Validation { .. }));
    }

    #[test]
    fn test_function_call_output_stringifies_json() {
        let item = MessageContentConverter::to_input_item(
            raw(json!({
                "type": "function_call_output",
                "call_id": "call_1",
                "output": {"temp": 21}
            })),
            2,
        )
        .unwrap();
        match item {
            InputItem::FunctionCallOutput { output, call_id, .. } => {
                assert_eq!(call_id, "call_1");
                assert_eq!(output, r#"{"temp":21}"#);
            }
            other => panic!("unexpected item {:?}", other),
        }
    }

    #[test]
    fn test_missing_call_id_names_param() {
        let err = MessageContentConverter::to_input_item(
            raw(json!({"type": "function_call_output", "output": "x"})),
            4,
        )
        .unwrap_err();
        match err {
            ResponsesError::Validation { param, .. } => {
                assert_eq!(param.as_deref(), Some("input[4]"))
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_items_to_chat_messages() {
        let developer = InputItem::Message {
            id: "msg_1".into(),
            role: Role::Developer,
            content: vec![InputContent::InputText { text: "rules".into() }],
        };
        assert_eq!(
            MessageContentConverter::input_item_to_chat_message(&developer).role,
            ChatRole::System
        );

        let output = InputItem::FunctionCallOutput {
            id: "msg_2".into(),
            call_id: "call_1".into(),
            output: "sunny".into(),
        };
        let message = MessageContentConverter::input_item_to_chat_message(&output);
        assert_eq!(message.role, ChatRole::Tool);
        assert_eq!(message.tool_call_id.as_deref(), Some("call_1"));

        let call = OutputItem::FunctionCall {
            id: "fc_1".into(),
            status: ItemStatus::Completed,
            call_id: "call_1".into(),
            name: "get_weather".into(),
            arguments: "{}".into(),
        };
        let message = MessageContentConverter::output_item_to_chat_message(&call);
        assert_eq!(message.role, ChatRole::Assistant);
        assert_eq!(message.tool_calls[0].name, "get_weather");
    }
}
