//! Resolve conversation ancestry and build the backend message array
//! respecting the context window.

use super::constants::{TRUNCATION_AUTO, TRUNCATION_NOTICE};
use super::conversions::MessageContentConverter;
use crate::backend::{ChatMessage, ChatRole};
use crate::models::responses::{InputItem, Response, ResponsesError};
use crate::store::{ConversationStore, StoreError};
use crate::tokens::count_tokens;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Per-message framing overhead added to the content's token count.
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Walk `previous_response_id` links back to the root of the conversation.
///
/// Returns the ancestors oldest first. A missing direct parent is an error;
/// a missing grandparent (evicted from a bounded store) ends the chain there.
pub async fn resolve_ancestry(
    store: &dyn ConversationStore,
    previous_response_id: &str,
) -> Result<Vec<Arc<Response>>, ResponsesError> {
    let mut chain = Vec::new();
    let mut visited = HashSet::new();
    let mut next = Some(previous_response_id.to_string());

    while let Some(id) = next.take() {
        if !visited.insert(id.clone()) {
            return Err(ResponsesError::validation(
                "previous_response_id",
                format!("conversation chain contains a cycle at '{}'", id),
            ));
        }
        match store.get(&id).await {
            Ok(response) => {
                next = response.previous_response_id.clone();
                chain.push(response);
            }
            Err(StoreError::NotFound(_)) if chain.is_empty() => {
                return Err(ResponsesError::PreviousResponseNotFound(id));
            }
            Err(StoreError::NotFound(_)) => {
                warn!("Ancestor {} is no longer stored, truncating chain", id);
            }
            Err(e) => return Err(ResponsesError::Store(e.to_string())),
        }
    }

    chain.reverse();
    debug!(
        "Resolved {} ancestors for previous_response_id {}",
        chain.len(),
        previous_response_id
    );
    Ok(chain)
}

#[derive(Debug, Clone)]
struct CountedMessage {
    message: ChatMessage,
    tok: usize,
}

fn message_tokens(message: &ChatMessage) -> usize {
    let calls: usize = message
        .tool_calls
        .iter()
        .map(|call| count_tokens(&call.name) + count_tokens(&call.arguments))
        .sum();
    count_tokens(&message.text_content()) + calls + MESSAGE_OVERHEAD_TOKENS
}

/// Append, folding consecutive assistant tool-call messages into one.
/// Returns true when the message was folded into the previous one.
fn push_merged(messages: &mut Vec<ChatMessage>, message: ChatMessage) -> bool {
    let is_call = message.role == ChatRole::Assistant && !message.tool_calls.is_empty();
    if is_call {
        if let Some(last) = messages.last_mut() {
            if last.role == ChatRole::Assistant
                && !last.tool_calls.is_empty()
                && message.content.is_empty()
            {
                last.tool_calls.extend(message.tool_calls);
                return true;
            }
        }
    }
    messages.push(message);
    false
}

/// Flatten instructions, ancestry and the new input into backend messages.
///
/// Instructions apply to this turn only; ancestors contribute their input
/// followed by their output, oldest first. Truncation only ever drops
/// history, never the new turn's input.
pub fn build_messages(
    instructions: Option<&str>,
    ancestry: &[Arc<Response>],
    input: &[InputItem],
    truncation: &str,
    context_window: usize,
) -> Result<Vec<ChatMessage>, ResponsesError> {
    let mut messages = Vec::new();

    if let Some(text) = instructions.filter(|t| !t.is_empty()) {
        messages.push(ChatMessage::text(ChatRole::System, text));
    }
    for ancestor in ancestry {
        for item in &ancestor.input {
            push_merged(
                &mut messages,
                MessageContentConverter::input_item_to_chat_message(item),
            );
        }
        for item in &ancestor.output {
            push_merged(
                &mut messages,
                MessageContentConverter::output_item_to_chat_message(item),
            );
        }
    }

    let mut current_start = messages.len();
    for (i, item) in input.iter().enumerate() {
        let merged = push_merged(
            &mut messages,
            MessageContentConverter::input_item_to_chat_message(item),
        );
        if i == 0 && merged {
            current_start = current_start.saturating_sub(1);
        }
    }

    let counted: Vec<CountedMessage> = messages
        .into_iter()
        .map(|message| CountedMessage {
            tok: message_tokens(&message),
            message,
        })
        .collect();
    let total: usize = counted.iter().map(|m| m.tok).sum();

    if total <= context_window {
        return Ok(counted.into_iter().map(|m| m.message).collect());
    }
    if truncation != TRUNCATION_AUTO {
        return Err(ResponsesError::validation(
            "input",
            format!(
                "conversation is {} tokens which exceeds the context window of {} tokens; \
                 set truncation to \"auto\" to drop older turns",
                total, context_window
            ),
        ));
    }

    truncate_middle(counted, current_start, context_window)
}

/// Tool results must stay behind the assistant message that requested them,
/// so a turn opening with tool messages pins that message too.
fn pinned_turn_start(msgs: &[CountedMessage], current_start: usize) -> usize {
    if msgs.get(current_start).map(|m| m.message.role) != Some(ChatRole::Tool) {
        return current_start;
    }
    let mut start = current_start;
    while start > 0 && msgs[start].message.role == ChatRole::Tool {
        start -= 1;
    }
    let requester = &msgs[start].message;
    if requester.role == ChatRole::Assistant && !requester.tool_calls.is_empty() {
        start
    } else {
        current_start
    }
}

/// Keep the leading system message, the first user message when it fits,
/// as much recent history as fits and the whole of the current turn.
fn truncate_middle(
    msgs: Vec<CountedMessage>,
    current_start: usize,
    budget: usize,
) -> Result<Vec<ChatMessage>, ResponsesError> {
    let raw_msg_count = msgs.len();
    let (history, pinned) = msgs.split_at(pinned_turn_start(&msgs, current_start));

    let mut system = None;
    let mut first_user = None;
    for (i, m) in history.iter().enumerate() {
        match m.message.role {
            ChatRole::System if system.is_none() => system = Some(i),
            ChatRole::User => {
                first_user = Some(i);
                break;
            }
            _ => {}
        }
    }

    let tokens_at = |idx: Option<usize>| idx.map_or(0, |i| history[i].tok);
    let pinned_tokens: usize = pinned.iter().map(|m| m.tok).sum();
    let notice_tokens = count_tokens(TRUNCATION_NOTICE) + MESSAGE_OVERHEAD_TOKENS;
    let required = tokens_at(system) + pinned_tokens + notice_tokens;
    if required > budget {
        return Err(ResponsesError::validation(
            "input",
            format!(
                "input is {} tokens which does not fit the context window of {} tokens \
                 even after dropping earlier turns",
                pinned_tokens, budget
            ),
        ));
    }

    let mut remaining = budget - required;
    let first_user = first_user.filter(|&i| history[i].tok <= remaining);
    remaining -= tokens_at(first_user);
    let head_end = first_user.or(system).map_or(0, |i| i + 1);

    let mut tail: Vec<&CountedMessage> = Vec::new();
    for m in history[head_end..].iter().rev() {
        if m.tok > remaining {
            break;
        }
        remaining -= m.tok;
        tail.push(m);
    }
    tail.reverse();
    let tail: Vec<&CountedMessage> = tail
        .into_iter()
        .skip_while(|m| m.message.role != ChatRole::User)
        .collect();

    let kept = usize::from(system.is_some())
        + usize::from(first_user.is_some())
        + tail.len()
        + pinned.len();
    let did_truncate = kept < raw_msg_count;
    if did_truncate {
        warn!(
            "Truncated conversation from {} to {} messages to fit {} tokens",
            raw_msg_count, kept, budget
        );
    }

    let mut result: Vec<ChatMessage> = system
        .into_iter()
        .chain(first_user)
        .map(|i| history[i].message.clone())
        .collect();
    if did_truncate {
        result.push(ChatMessage::text(ChatRole::Assistant, TRUNCATION_NOTICE));
    }
    result.extend(tail.into_iter().map(|m| m.message.clone()));
    result.extend(pinned.iter().map(|m| m.message.clone()));
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::responses::{InputContent, ItemStatus, OutputItem, ResponseStatus, Role};
    use crate::store::InMemoryConversationStore;
    use crate::web::responses::builders::{OutputItemBuilder, ResponseBuilder};

    fn user(text: &str) -> InputItem {
        InputItem::Message {
            id: format!("msg_{}", text.len()),
            role: Role::User,
            content: vec![InputContent::InputText {
                text: text.to_string(),
            }],
        }
    }

    fn finished(id: &str, previous: Option<&str>, input: &str, answer: &str) -> Arc<Response> {
        let mut response = ResponseBuilder::new(id, "mock-model")
            .previous_response_id(previous.map(str::to_string))
            .input(vec![user(input)])
            .build();
        response.output.push(
            OutputItemBuilder::new_message()
                .status(ItemStatus::Completed)
                .text(answer)
                .build(),
        );
        response.status = ResponseStatus::Completed;
        Arc::new(response)
    }

    #[tokio::test]
    async fn test_resolve_ancestry_oldest_first() {
        let store = InMemoryConversationStore::default();
        store.put(finished("resp_a", None, "one", "1")).await.unwrap();
        store
            .put(finished("resp_b", Some("resp_a"), "two", "2"))
            .await
            .unwrap();

        let chain = resolve_ancestry(&store, "resp_b").await.unwrap();
        let ids: Vec<_> = chain.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["resp_a", "resp_b"]);
    }

    #[tokio::test]
    async fn test_missing_parent_is_not_found() {
        let store = InMemoryConversationStore::default();
        let err = resolve_ancestry(&store, "resp_missing").await.unwrap_err();
        assert_eq!(
            err,
            ResponsesError::PreviousResponseNotFound("resp_missing".into())
        );
    }

    #[tokio::test]
    async fn test_evicted_grandparent_ends_chain() {
        let store = InMemoryConversationStore::default();
        store
            .put(finished("resp_b", Some("resp_gone"), "two", "2"))
            .await
            .unwrap();
        let chain = resolve_ancestry(&store, "resp_b").await.unwrap();
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_build_messages_orders_history() {
        let ancestry = vec![finished("resp_a", None, "Remember this: alpha.", "Noted.")];
        let messages = build_messages(
            Some("Be brief."),
            &ancestry,
            &[user("What did I say?")],
            "disabled",
            64_000,
        )
        .unwrap();

        let roles: Vec<_> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                ChatRole::System,
                ChatRole::User,
                ChatRole::Assistant,
                ChatRole::User
            ]
        );
        assert_eq!(messages[1].text_content(), "Remember this: alpha.");
        assert_eq!(messages[3].text_content(), "What did I say?");
    }

    #[test]
    fn test_parallel_tool_calls_merge_into_one_message() {
        let mut response = ResponseBuilder::new("resp_a", "mock-model")
            .input(vec![user("weather in two cities")])
            .build();
        for (call_id, city) in [("call_1", "Berlin"), ("call_2", "Paris")] {
            response.output.push(OutputItem::FunctionCall {
                id: format!("fc_{}", call_id),
                status: ItemStatus::Completed,
                call_id: call_id.to_string(),
                name: "get_weather".to_string(),
                arguments: format!(r#"{{"location":"{}"}}"#, city),
            });
        }
        response.status = ResponseStatus::Completed;

        let outputs = vec![
            InputItem::FunctionCallOutput {
                id: "msg_o1".into(),
                call_id: "call_1".into(),
                output: "sunny".into(),
            },
            InputItem::FunctionCallOutput {
                id: "msg_o2".into(),
                call_id: "call_2".into(),
                output: "rain".into(),
            },
        ];
        let messages =
            build_messages(None, &[Arc::new(response)], &outputs, "disabled", 64_000).unwrap();

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].role, ChatRole::Assistant);
        assert_eq!(messages[1].tool_calls.len(), 2);
        assert_eq!(messages[2].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(messages[3].tool_call_id.as_deref(), Some("call_2"));
    }

    #[test]
    fn test_overflow_without_truncation_is_rejected() {
        let long = "word ".repeat(400);
        let err = build_messages(None, &[], &[user(&long)], "disabled", 50).unwrap_err();
        assert!(matches!(err, ResponsesError::Validation { .. }));
    }

    #[test]
    fn test_auto_truncation_preserves_first_and_last() {
        let filler = "lorem ipsum dolor sit amet ".repeat(40);
        let mut ancestry = vec![finished("resp_0", None, "First user message", "First reply")];
        for i in 1..10 {
            ancestry.push(finished(
                &format!("resp_{}", i),
                Some(&format!("resp_{}", i - 1)),
                &filler,
                &filler,
            ));
        }

        let messages = build_messages(
            Some("System rules"),
            &ancestry,
            &[user("Latest question")],
            TRUNCATION_AUTO,
            600,
        )
        .unwrap();

        assert_eq!(messages[0].role, ChatRole::System);
        assert_eq!(messages[1].text_content(), "First user message");
        assert_eq!(messages[2].text_content(), TRUNCATION_NOTICE);
        assert_eq!(
            messages.last().map(ChatMessage::text_content).as_deref(),
            Some("Latest question")
        );
        assert!(messages.len() < 22);
    }

    #[test]
    fn test_auto_truncation_never_drops_new_input() {
        let ancestry = vec![finished("resp_a", None, "first", "ok")];
        let long = "lorem ipsum ".repeat(200);
        let err = build_messages(None, &ancestry, &[user(&long)], TRUNCATION_AUTO, 300)
            .unwrap_err();
        assert!(matches!(
            err,
            ResponsesError::Validation { ref param, .. } if param.as_deref() == Some("input")
        ));

        let filler = "lorem ipsum dolor sit amet ".repeat(40);
        let ancestry = vec![
            finished("resp_a", None, "first", "ok"),
            finished("resp_b", Some("resp_a"), &filler, &filler),
        ];
        let question = "lorem ipsum ".repeat(60);
        let messages =
            build_messages(None, &ancestry, &[user(&question)], TRUNCATION_AUTO, 300).unwrap();
        assert_eq!(
            messages.last().map(ChatMessage::text_content),
            Some(question)
        );
        assert!(messages
            .iter()
            .any(|m| m.text_content() == TRUNCATION_NOTICE));
    }

    #[test]
    fn test_auto_truncation_keeps_tool_result_with_its_call() {
        let filler = "lorem ipsum dolor sit amet ".repeat(40);
        let mut ancestry = vec![finished("resp_a", None, &filler, &filler)];
        let mut caller = ResponseBuilder::new("resp_b", "mock-model")
            .previous_response_id(Some("resp_a".to_string()))
            .input(vec![user("weather in Berlin?")])
            .build();
        caller.output.push(OutputItem::FunctionCall {
            id: "fc_1".to_string(),
            status: ItemStatus::Completed,
            call_id: "call_1".to_string(),
            name: "get_weather".to_string(),
            arguments: r#"{"location":"Berlin"}"#.to_string(),
        });
        caller.status = ResponseStatus::Completed;
        ancestry.push(Arc::new(caller));

        let tool_result = InputItem::FunctionCallOutput {
            id: "msg_o1".into(),
            call_id: "call_1".into(),
            output: "sunny".into(),
        };
        let messages =
            build_messages(None, &ancestry, &[tool_result], TRUNCATION_AUTO, 200).unwrap();

        let n = messages.len();
        assert!(n >= 2);
        assert_eq!(messages[n - 1].role, ChatRole::Tool);
        assert_eq!(messages[n - 1].text_content(), "sunny");
        assert_eq!(messages[n - 2].role, ChatRole::Assistant);
        assert_eq!(messages[n - 2].tool_calls[0].name, "get_weather");
    }
}
