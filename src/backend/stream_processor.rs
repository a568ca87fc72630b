//! Incremental parser for upstream chat-completion SSE streams

use super::{BackendChunk, BackendToolCall, FinishReason, TokenUsage};
use crate::models::ids::new_call_id;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessorError {
    #[error("JSON parse error: {0}")]
    JsonParse(String),
    #[error("frame is not valid UTF-8: {0}")]
    InvalidUtf8(String),
}

#[derive(Debug, Default)]
struct ToolCallBuffer {
    id: String,
    name: String,
    arguments: String,
}

/// Turns raw upstream bytes into [`BackendChunk`]s.
///
/// Frames may be split across reads (even inside a multi-byte character), so
/// raw bytes are buffered until a full blank-line-terminated frame is
/// available and only complete frames are decoded. Tool call arguments arrive as
/// fragments keyed by index and are only emitted once complete.
pub struct ChunkProcessor {
    buffer: Vec<u8>,
    tool_calls: BTreeMap<u64, ToolCallBuffer>,
    finished: bool,
    done: bool,
}

impl Default for ChunkProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkProcessor {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(8192),
            tool_calls: BTreeMap::new(),
            finished: false,
            done: false,
        }
    }

    /// `true` once the `[DONE]` sentinel was seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Process a chunk of bytes from the upstream stream
    pub fn process_bytes(&mut self, bytes: &[u8]) -> Result<Vec<BackendChunk>, ProcessorError> {
        self.buffer.extend_from_slice(bytes);

        let mut out = Vec::new();
        while let Some(frame) = self.extract_sse_frame()? {
            self.handle_sse_frame(&frame, &mut out)?;
            if self.done {
                break;
            }
        }
        Ok(out)
    }

    /// Flush whatever is pending when the upstream closes without `[DONE]`.
    pub fn finish(&mut self) -> Vec<BackendChunk> {
        let mut out = Vec::new();
        if !self.finished {
            let reason = if self.tool_calls.is_empty() {
                FinishReason::Stop
            } else {
                FinishReason::ToolCalls
            };
            self.flush_finish(reason, &mut out);
        }
        out
    }

    fn extract_sse_frame(&mut self) -> Result<Option<String>, ProcessorError> {
        loop {
            let Some((pos, separator_len)) = find_frame_end(&self.buffer) else {
                return Ok(None);
            };
            let raw: Vec<u8> = self.buffer.drain(..pos + separator_len).take(pos).collect();
            let frame =
                String::from_utf8(raw).map_err(|e| ProcessorError::InvalidUtf8(e.to_string()))?;

            if frame.trim().is_empty() {
                continue;
            }
            return Ok(Some(frame));
        }
    }

    fn handle_sse_frame(
        &mut self,
        frame: &str,
        out: &mut Vec<BackendChunk>,
    ) -> Result<(), ProcessorError> {
        // Skip comments and non-data lines
        let Some(data) = frame
            .lines()
            .find_map(|line| line.strip_prefix("data:"))
            .map(str::trim)
        else {
            return Ok(());
        };

        if data == "[DONE]" {
            trace!("Upstream stream sent [DONE]");
            self.done = true;
            out.extend(self.finish());
            return Ok(());
        }

        let json: Value =
            serde_json::from_str(data).map_err(|e| ProcessorError::JsonParse(e.to_string()))?;

        let choice = &json["choices"][0];

        if let Some(content) = choice["delta"]["content"].as_str() {
            if !content.is_empty() {
                out.push(BackendChunk::TextDelta(content.to_string()));
            }
        }

        if let Some(calls) = choice["delta"]["tool_calls"].as_array() {
            for call in calls {
                let index = call["index"].as_u64().unwrap_or(0);
                let buffer = self.tool_calls.entry(index).or_default();
                if let Some(id) = call["id"].as_str() {
                    buffer.id = id.to_string();
                }
                if let Some(name) = call["function"]["name"].as_str() {
                    buffer.name.push_str(name);
                }
                if let Some(arguments) = call["function"]["arguments"].as_str() {
                    buffer.arguments.push_str(arguments);
                }
            }
        }

        if let Some(usage) = extract_usage(&json) {
            debug!(
                "Upstream usage: prompt_tokens={}, completion_tokens={}",
                usage.prompt_tokens, usage.completion_tokens
            );
            out.push(BackendChunk::Usage(usage));
        }

        if let Some(reason) = choice["finish_reason"].as_str() {
            trace!("Upstream finish_reason: {}", reason);
            if !self.finished {
                self.flush_finish(FinishReason::parse(reason), out);
            }
        }

        Ok(())
    }

    fn flush_finish(&mut self, reason: FinishReason, out: &mut Vec<BackendChunk>) {
        for (_, buffer) in std::mem::take(&mut self.tool_calls) {
            let id = if buffer.id.is_empty() {
                new_call_id()
            } else {
                buffer.id
            };
            let arguments = if buffer.arguments.is_empty() {
                "{}".to_string()
            } else {
                buffer.arguments
            };
            out.push(BackendChunk::ToolCall(BackendToolCall {
                id,
                name: buffer.name,
                arguments,
            }));
        }
        out.push(BackendChunk::Finished(reason));
        self.finished = true;
    }
}

/// Position and length of the first `\n\n` or `\r\n\r\n` frame separator.
fn find_frame_end(buffer: &[u8]) -> Option<(usize, usize)> {
    (0..buffer.len()).find_map(|i| {
        let rest = &buffer[i..];
        if rest.starts_with(b"\n\n") {
            Some((i, 2))
        } else if rest.starts_with(b"\r\n\r\n") {
            Some((i, 4))
        } else {
            None
        }
    })
}

/// Usage block of a chat completion (streamed or not)
pub fn extract_usage(json: &Value) -> Option<TokenUsage> {
    let usage = json.get("usage")?;
    if !usage.is_object() {
        return None;
    }
    Some(TokenUsage {
        prompt_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
        completion_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(json: &str) -> String {
        format!("data: {}\n\n", json)
    }

    #[test]
    fn test_text_deltas_across_split_reads() {
        let mut processor = ChunkProcessor::new();
        let data = frame(r#"{"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#);
        let (a, b) = data.split_at(20);

        assert!(processor.process_bytes(a.as_bytes()).unwrap().is_empty());
        let chunks = processor.process_bytes(b.as_bytes()).unwrap();
        assert_eq!(chunks, vec![BackendChunk::TextDelta("Hel".to_string())]);
    }

    #[test]
    fn test_finish_usage_and_done() {
        let mut processor = ChunkProcessor::new();
        let mut input = frame(r#"{"choices":[{"delta":{"content":"Hi"},"finish_reason":null}]}"#);
        input.push_str(&frame(concat!(
            r#"{"choices":[{"delta":{},"finish_reason":"stop"}],"#,
            r#""usage":{"prompt_tokens":10,"completion_tokens":2}}"#
        )));
        input.push_str("data: [DONE]\n\n");

        let chunks = processor.process_bytes(input.as_bytes()).unwrap();
        assert_eq!(
            chunks,
            vec![
                BackendChunk::TextDelta("Hi".to_string()),
                BackendChunk::Usage(TokenUsage {
                    prompt_tokens: 10,
                    completion_tokens: 2
                }),
                BackendChunk::Finished(FinishReason::Stop),
            ]
        );
        assert!(processor.is_done());
        assert!(processor.finish().is_empty());
    }

    #[test]
    fn test_tool_call_fragments_are_assembled() {
        let mut processor = ChunkProcessor::new();
        let mut input = frame(concat!(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","#,
            r#""function":{"name":"get_weather","arguments":"{\"loc"}}]},"#,
            r#""finish_reason":null}]}"#
        ));
        input.push_str(&frame(concat!(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"#,
            r#""function":{"arguments":"ation\":\"Paris\"}"}}]},"finish_reason":null}]}"#
        )));
        input.push_str(&frame(
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
        ));

        let chunks = processor.process_bytes(input.as_bytes()).unwrap();
        assert_eq!(
            chunks,
            vec![
                BackendChunk::ToolCall(BackendToolCall {
                    id: "call_1".to_string(),
                    name: "get_weather".to_string(),
                    arguments: r#"{"location":"Paris"}"#.to_string(),
                }),
                BackendChunk::Finished(FinishReason::ToolCalls),
            ]
        );
    }

    #[test]
    fn test_comments_are_skipped_and_eof_flushes() {
        let mut processor = ChunkProcessor::new();
        let mut input = ": keep-alive\n\n".to_string();
        input.push_str(&frame(r#"{"choices":[{"delta":{"content":"x"}}]}"#));

        let chunks = processor.process_bytes(input.as_bytes()).unwrap();
        assert_eq!(chunks, vec![BackendChunk::TextDelta("x".to_string())]);
        assert_eq!(
            processor.finish(),
            vec![BackendChunk::Finished(FinishReason::Stop)]
        );
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        let mut processor = ChunkProcessor::new();
        let err = processor.process_bytes(b"data: {not json\n\n").unwrap_err();
        assert!(matches!(err, ProcessorError::JsonParse(_)));
    }

    #[test]
    fn test_multibyte_character_split_across_reads() {
        let mut processor = ChunkProcessor::new();
        let data = frame(r#"{"choices":[{"delta":{"content":"café"}}]}"#);
        let bytes = data.as_bytes();
        let split = data.find('é').unwrap() + 1;

        assert!(processor.process_bytes(&bytes[..split]).unwrap().is_empty());
        let chunks = processor.process_bytes(&bytes[split..]).unwrap();
        assert_eq!(chunks, vec![BackendChunk::TextDelta("café".to_string())]);
    }

    #[test]
    fn test_crlf_frame_separators() {
        let mut processor = ChunkProcessor::new();
        let input = "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\r\n\r\n\
                     data: [DONE]\r\n\r\n";
        let chunks = processor.process_bytes(input.as_bytes()).unwrap();
        assert_eq!(
            chunks,
            vec![
                BackendChunk::TextDelta("a".to_string()),
                BackendChunk::Finished(FinishReason::Stop),
            ]
        );
    }

    #[test]
    fn test_invalid_utf8_frame_is_an_error() {
        let mut processor = ChunkProcessor::new();
        let err = processor.process_bytes(b"data: \xff\xfe\n\n").unwrap_err();
        assert!(matches!(err, ProcessorError::InvalidUtf8(_)));
    }
}
