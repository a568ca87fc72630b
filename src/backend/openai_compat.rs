//! Backend that forwards generations to an OpenAI-compatible
//! `/v1/chat/completions` endpoint.

use super::stream_processor::{extract_usage, ChunkProcessor};
use super::{
    BackendChunk, BackendCompletion, BackendError, BackendRequest, BackendStream,
    BackendToolCall, ChatContentPart, ChatMessage, ChatRole, FinishReason, InferenceBackend,
};
use crate::models::ids::new_call_id;
use crate::models::responses::ToolChoice;
use async_trait::async_trait;
use futures::StreamExt;
use hyper::body::to_bytes;
use hyper::client::HttpConnector;
use hyper::{Body, Client, Method, Request};
use hyper_tls::HttpsConnector;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, trace, warn};

const MAX_ATTEMPTS: u32 = 3;
const STREAM_CHANNEL_BUFFER: usize = 64;

type HttpsClient = Client<HttpsConnector<HttpConnector>, Body>;

pub struct OpenAiCompatBackend {
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
    client: HttpsClient,
}

impl OpenAiCompatBackend {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        let https = HttpsConnector::new();
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build::<_, Body>(https);

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            timeout,
            client,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        if self.base_url.ends_with("/v1") {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/v1{}", self.base_url, path)
        }
    }

    fn build_request(
        &self,
        method: Method,
        path: &str,
        body: Body,
    ) -> Result<Request<Body>, BackendError> {
        let mut req = Request::builder()
            .method(method)
            .uri(self.endpoint(path))
            .header("Content-Type", "application/json");

        if let Some(api_key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", api_key));
        }

        req.body(body)
            .map_err(|e| BackendError::Request(format!("failed to build request: {}", e)))
    }

    /// Send once; non-2xx answers are turned into `BackendError::Status`.
    async fn try_send(
        &self,
        method: Method,
        path: &str,
        body: &str,
    ) -> Result<hyper::Response<Body>, BackendError> {
        let req = self.build_request(method, path, Body::from(body.to_string()))?;

        trace!("Sending to {} body_len={}", self.endpoint(path), body.len());

        match timeout(self.timeout, self.client.request(req)).await {
            Ok(Ok(response)) => {
                if response.status().is_success() {
                    return Ok(response);
                }
                let status = response.status().as_u16();
                let body = match to_bytes(response.into_body()).await {
                    Ok(bytes) => String::from_utf8_lossy(&bytes).to_string(),
                    Err(_) => String::new(),
                };
                error!("Backend returned non-success status {}: {}", status, body);
                Err(BackendError::Status { status, body })
            }
            Ok(Err(e)) => {
                error!("Failed to send request to backend: {:?}", e);
                Err(BackendError::Request(e.to_string()))
            }
            Err(_) => {
                error!("Backend request timed out after {:?}", self.timeout);
                Err(BackendError::Timeout(self.timeout))
            }
        }
    }

    /// Retry transport errors and 5xx answers with a linearly growing delay.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: &str,
    ) -> Result<hyper::Response<Body>, BackendError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_send(method.clone(), path, body).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    let delay = Duration::from_millis(500 * attempt as u64);
                    warn!(
                        "Backend attempt {} failed ({}), retrying in {:?}",
                        attempt, e, delay
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl InferenceBackend for OpenAiCompatBackend {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: BackendRequest) -> Result<BackendCompletion, BackendError> {
        let body = build_chat_body(&request, false).to_string();
        debug!("Sending blocking completion for model {}", request.model);

        let response = self.send(Method::POST, "/chat/completions", &body).await?;
        let bytes = timeout(self.timeout, to_bytes(response.into_body()))
            .await
            .map_err(|_| BackendError::Timeout(self.timeout))?
            .map_err(|e| BackendError::Request(e.to_string()))?;
        let json: Value =
            serde_json::from_slice(&bytes).map_err(|e| BackendError::Decode(e.to_string()))?;

        parse_completion(&json)
    }

    async fn stream(&self, request: BackendRequest) -> Result<BackendStream, BackendError> {
        let body = build_chat_body(&request, true).to_string();
        debug!("Starting streamed completion for model {}", request.model);

        let response = self.send(Method::POST, "/chat/completions", &body).await?;
        let chunk_timeout = self.timeout;
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_BUFFER);

        tokio::spawn(async move {
            let mut body_stream = response.into_body();
            let mut processor = ChunkProcessor::new();

            loop {
                let next = tokio::select! {
                    _ = tx.closed() => {
                        debug!("Stream consumer dropped, closing upstream body");
                        return;
                    }
                    next = timeout(chunk_timeout, body_stream.next()) => next,
                };

                let (chunks, eof) = match next {
                    Ok(Some(Ok(bytes))) => match processor.process_bytes(&bytes) {
                        Ok(chunks) => (chunks, false),
                        Err(e) => {
                            error!("Failed to parse upstream frame: {}", e);
                            let _ = tx.send(Err(BackendError::Decode(e.to_string()))).await;
                            return;
                        }
                    },
                    Ok(Some(Err(e))) => {
                        error!("Upstream stream error: {:?}", e);
                        let _ = tx.send(Err(BackendError::Request(e.to_string()))).await;
                        return;
                    }
                    Ok(None) => (processor.finish(), true),
                    Err(_) => {
                        error!("Stream chunk timeout after {:?}", chunk_timeout);
                        let _ = tx.send(Err(BackendError::Timeout(chunk_timeout))).await;
                        return;
                    }
                };

                for chunk in chunks {
                    if tx.send(Ok(chunk)).await.is_err() {
                        return;
                    }
                }
                // Usage may trail the finish chunk, so keep reading until [DONE] or EOF.
                if eof || processor.is_done() {
                    return;
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        let req = self.build_request(Method::GET, "/models", Body::empty())?;
        let response = timeout(self.timeout, self.client.request(req))
            .await
            .map_err(|_| BackendError::Timeout(self.timeout))?
            .map_err(|e| BackendError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        let bytes = to_bytes(response.into_body())
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(BackendError::Status {
                status,
                body: String::from_utf8_lossy(&bytes).to_string(),
            });
        }

        let json: Value =
            serde_json::from_slice(&bytes).map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok(json["data"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m["id"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Translate a resolved request into a chat completions body.
pub fn build_chat_body(request: &BackendRequest, stream: bool) -> Value {
    let mut body = Map::new();
    body.insert("model".to_string(), json!(request.model));
    body.insert(
        "messages".to_string(),
        Value::Array(request.messages.iter().map(message_to_json).collect()),
    );
    body.insert("temperature".to_string(), json!(request.temperature));
    body.insert("top_p".to_string(), json!(request.top_p));

    if let Some(max_tokens) = request.max_output_tokens {
        body.insert("max_tokens".to_string(), json!(max_tokens));
    }

    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|tool| {
                let mut function = Map::new();
                function.insert("name".to_string(), json!(tool.name));
                if let Some(description) = &tool.description {
                    function.insert("description".to_string(), json!(description));
                }
                if let Some(parameters) = &tool.parameters {
                    function.insert("parameters".to_string(), parameters.clone());
                }
                if tool.strict {
                    function.insert("strict".to_string(), json!(true));
                }
                json!({"type": "function", "function": function})
            })
            .collect();
        body.insert("tools".to_string(), Value::Array(tools));
        body.insert(
            "tool_choice".to_string(),
            match &request.tool_choice {
                ToolChoice::Mode(mode) => json!(mode),
                ToolChoice::Function { name, .. } => {
                    json!({"type": "function", "function": {"name": name}})
                }
            },
        );
        body.insert(
            "parallel_tool_calls".to_string(),
            json!(request.parallel_tool_calls),
        );
    }

    if let Some(schema) = &request.output_schema {
        body.insert(
            "response_format".to_string(),
            json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "schema": schema.schema,
                    "strict": schema.strict,
                }
            }),
        );
    }

    if stream {
        body.insert("stream".to_string(), json!(true));
        body.insert("stream_options".to_string(), json!({"include_usage": true}));
    }

    Value::Object(body)
}

fn message_to_json(message: &ChatMessage) -> Value {
    let mut out = Map::new();
    out.insert("role".to_string(), json!(message.role.as_str()));

    let content = if message.has_image() {
        Value::Array(
            message
                .content
                .iter()
                .map(|part| match part {
                    ChatContentPart::Text(text) => json!({"type": "text", "text": text}),
                    ChatContentPart::ImageUrl { url, detail } => {
                        let mut image = Map::new();
                        image.insert("url".to_string(), json!(url));
                        if let Some(detail) = detail {
                            image.insert("detail".to_string(), json!(detail));
                        }
                        json!({"type": "image_url", "image_url": image})
                    }
                })
                .collect(),
        )
    } else if message.content.is_empty() && !message.tool_calls.is_empty() {
        Value::Null
    } else {
        json!(message.text_content())
    };
    out.insert("content".to_string(), content);

    if !message.tool_calls.is_empty() {
        out.insert(
            "tool_calls".to_string(),
            Value::Array(
                message
                    .tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {"name": call.name, "arguments": call.arguments}
                        })
                    })
                    .collect(),
            ),
        );
    }

    if message.role == ChatRole::Tool {
        if let Some(id) = &message.tool_call_id {
            out.insert("tool_call_id".to_string(), json!(id));
        }
    }

    Value::Object(out)
}

/// Parse a non-streaming chat completion body.
pub fn parse_completion(json: &Value) -> Result<BackendCompletion, BackendError> {
    let choice = json["choices"]
        .get(0)
        .ok_or_else(|| BackendError::Decode("completion has no choices".to_string()))?;
    let message = &choice["message"];

    let text = message["content"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let tool_calls = message["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .map(|call| BackendToolCall {
                    id: call["id"]
                        .as_str()
                        .filter(|id| !id.is_empty())
                        .map(str::to_string)
                        .unwrap_or_else(new_call_id),
                    name: call["function"]["name"].as_str().unwrap_or_default().to_string(),
                    arguments: call["function"]["arguments"]
                        .as_str()
                        .unwrap_or("{}")
                        .to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(BackendCompletion {
        text,
        tool_calls,
        finish_reason: choice["finish_reason"]
            .as_str()
            .map(FinishReason::parse)
            .unwrap_or(FinishReason::Stop),
        usage: extract_usage(json),
    })
}
