//! OpenAI-compatible provider implementation.
//!
//! Works with: Docker Model Runner, Ollama, llama.cpp server, vLLM, OpenAI,
//! and any endpoint exposing `/chat/completions` and `/embeddings`.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Tool use / function calling (requests are returned, never executed)
//! - Embeddings, model listing and health checks

use async_trait::async_trait;
use futures::StreamExt;
use grimoire_core::error::ProviderError;
use grimoire_core::message::{Message, Part, Role, ToolRequest};
use grimoire_core::provider::*;
use grimoire_core::tool::ToolDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, trace, warn};

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        }
    }

    /// Docker Model Runner (convenience constructor). Needs no key.
    pub fn model_runner(base_url: Option<&str>) -> Self {
        Self::new(
            "model-runner",
            base_url.unwrap_or("http://localhost:12434/engines/v1/"),
            None,
        )
    }

    /// Create an Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new("ollama", base_url.unwrap_or("http://localhost:11434/v1"), None)
    }

    /// Build from the `[engine]` configuration section.
    pub fn from_config(engine: &grimoire_config::EngineConfig) -> Self {
        Self::new("model-runner", engine.base_url.clone(), engine.api_key.clone())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .post(url)
            .header("Content-Type", "application/json");
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {key}")),
            None => builder,
        }
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let builder = self.client.get(url);
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {key}")),
            None => builder,
        }
    }

    /// Build the `/chat/completions` body. System instructions go first.
    fn request_body(request: &CompletionRequest, stream: bool) -> serde_json::Value {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = request.system.as_deref().filter(|s| !s.trim().is_empty()) {
            messages.push(ApiMessage {
                role: "system".into(),
                content: Some(system.to_string()),
                tool_calls: None,
                tool_call_id: None,
            });
        }
        messages.extend(Self::to_api_messages(&request.messages));

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.temperature,
            "stream": stream,
        });

        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        if let Some(top_p) = request.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
            body["tool_choice"] = serde_json::json!("auto");
            body["parallel_tool_calls"] = serde_json::json!(true);
        }

        if let Some(format) = &request.response_format {
            body["response_format"] = serde_json::json!({
                "type": "json_schema",
                "json_schema": {
                    "name": format.name,
                    "schema": format.schema,
                    "strict": true,
                },
            });
        }

        body
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| match m.role {
                Role::Tool => {
                    let response = m.tool_response_part();
                    ApiMessage {
                        role: "tool".into(),
                        content: Some(
                            response
                                .map(|r| r.output.to_string())
                                .unwrap_or_else(|| m.text()),
                        ),
                        tool_calls: None,
                        tool_call_id: response.map(|r| r.correlation_ref.clone()),
                    }
                }
                role => {
                    let tool_calls: Vec<ApiToolCall> = m
                        .parts
                        .iter()
                        .filter_map(|p| match p {
                            Part::ToolRequest(req) => Some(ApiToolCall {
                                id: req.correlation_ref.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: req.name.clone(),
                                    arguments: req.input.to_string(),
                                },
                            }),
                            _ => None,
                        })
                        .collect();
                    let text = m.text();
                    ApiMessage {
                        role: role.to_string(),
                        content: if text.is_empty() && !tool_calls.is_empty() {
                            None
                        } else {
                            Some(text)
                        },
                        tool_calls: if tool_calls.is_empty() {
                            None
                        } else {
                            Some(tool_calls)
                        },
                        tool_call_id: None,
                    }
                }
            })
            .collect()
    }

    /// Convert tool descriptors to OpenAI API format.
    fn to_api_tools(tools: &[ToolDescriptor]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.input_schema.clone(),
                },
            })
            .collect()
    }

    /// Turn an API message into an assistant [`Message`].
    fn from_api_message(message: ApiMessage) -> Result<Message, ProviderError> {
        let requests = message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| to_tool_request(tc.id, tc.function.name, &tc.function.arguments))
            .collect::<Result<Vec<_>, _>>()?;
        let text = message.content.unwrap_or_default();
        Ok(if requests.is_empty() {
            Message::assistant(text)
        } else {
            Message::assistant_with_requests(text, requests)
        })
    }
}

/// Build a tool request from wire fields.
///
/// Some local models omit call ids or send empty arguments; both are
/// tolerated. Arguments that are not JSON are a malformed step.
fn to_tool_request(id: String, name: String, arguments: &str) -> Result<ToolRequest, ProviderError> {
    let input = if arguments.trim().is_empty() {
        serde_json::json!({})
    } else {
        serde_json::from_str(arguments).map_err(|e| {
            ProviderError::MalformedOutput(format!("arguments for '{name}' are not JSON: {e}"))
        })?
    };
    let id = if id.is_empty() {
        format!("call_{}", uuid::Uuid::new_v4().simple())
    } else {
        id
    };
    Ok(ToolRequest::new(name, id, input))
}

/// Map non-success HTTP statuses to provider errors.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();

    if status == 429 {
        return Err(ProviderError::RateLimited {
            retry_after_secs: 5,
        });
    }

    if status == 401 || status == 403 {
        return Err(ProviderError::AuthenticationFailed(
            "Invalid API key or insufficient permissions".into(),
        ));
    }

    if status == 404 {
        let error_body = response.text().await.unwrap_or_default();
        return Err(ProviderError::ModelNotFound(error_body));
    }

    if !(200..300).contains(&status) {
        let error_body = response.text().await.unwrap_or_default();
        warn!(status, body = %error_body, "Provider returned error");
        return Err(ProviderError::ApiError {
            status_code: status,
            message: error_body,
        });
    }

    Ok(response)
}

fn network_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

#[async_trait]
impl grimoire_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::request_body(&request, false);

        debug!(
            provider = %self.name,
            model = %request.model,
            tools = request.tools.len(),
            "Sending completion request"
        );

        let response = self.post(&url).json(&body).send().await.map_err(network_error)?;
        let response = check_status(response).await?;

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        let choice =
            api_response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| ProviderError::ApiError {
                    status_code: 200,
                    message: "No choices in response".into(),
                })?;

        let message = Self::from_api_message(choice.message)?;

        let usage = api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(ProviderResponse {
            message,
            usage,
            model: api_response.model.unwrap_or(request.model),
        })
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self.get(&url).send().await.map_err(network_error)?;
        Ok(response.status().is_success())
    }

    async fn embed(
        &self,
        request: EmbeddingRequest,
    ) -> std::result::Result<EmbeddingResponse, ProviderError> {
        let url = format!("{}/embeddings", self.base_url);

        let body = serde_json::json!({
            "model": request.model,
            "input": request.inputs,
            "encoding_format": "float",
        });

        debug!(
            provider = %self.name,
            model = %request.model,
            count = request.inputs.len(),
            "Sending embedding request"
        );

        let response = self.post(&url).json(&body).send().await.map_err(network_error)?;
        let response = check_status(response).await?;

        let mut api_resp: EmbeddingApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse embedding response: {e}"),
            })?;

        api_resp.data.sort_by_key(|d| d.index);
        if api_resp.data.len() != request.inputs.len() {
            return Err(ProviderError::MalformedOutput(format!(
                "expected {} embeddings, got {}",
                request.inputs.len(),
                api_resp.data.len()
            )));
        }

        Ok(EmbeddingResponse {
            embeddings: api_resp.data.into_iter().map(|d| d.embedding).collect(),
            model: api_resp.model.unwrap_or(request.model),
        })
    }

    async fn stream(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::request_body(&request, true);

        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let response = self
            .post(&url)
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(network_error)?;
        let response = check_status(response).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

        // Read the SSE byte stream and forward parsed chunks
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut accumulators: BTreeMap<u32, ToolCallAccumulator> = BTreeMap::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim_end_matches('\r').to_string();
                    buffer.drain(..=line_end);

                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }

                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();

                    if data == "[DONE]" {
                        let _ = tx.send(final_chunk(&accumulators, None)).await;
                        return;
                    }

                    let stream_resp = match serde_json::from_str::<StreamResponse>(data) {
                        Ok(r) => r,
                        Err(e) => {
                            trace!(
                                provider = %provider_name,
                                data = %data,
                                error = %e,
                                "Ignoring unparseable SSE chunk"
                            );
                            continue;
                        }
                    };

                    if let Some(choice) = stream_resp.choices.first() {
                        let delta = &choice.delta;

                        if let Some(ref tc_deltas) = delta.tool_calls {
                            for tc_delta in tc_deltas {
                                accumulators.entry(tc_delta.index).or_default().apply(tc_delta);
                            }
                        }

                        if delta.content.as_ref().is_some_and(|c| !c.is_empty()) {
                            let chunk = StreamChunk {
                                content: delta.content.clone(),
                                ..StreamChunk::default()
                            };
                            if tx.send(Ok(chunk)).await.is_err() {
                                return; // receiver dropped
                            }
                        }
                    }

                    if let Some(usage) = stream_resp.usage {
                        let usage = Usage {
                            prompt_tokens: usage.prompt_tokens,
                            completion_tokens: usage.completion_tokens,
                            total_tokens: usage.total_tokens,
                        };
                        let _ = tx.send(final_chunk(&accumulators, Some(usage))).await;
                        return;
                    }
                }
            }

            // Stream ended without [DONE]
            let _ = tx.send(final_chunk(&accumulators, None)).await;
        });

        Ok(rx)
    }
}

/// The closing chunk, carrying every accumulated tool request.
fn final_chunk(
    accumulators: &BTreeMap<u32, ToolCallAccumulator>,
    usage: Option<Usage>,
) -> Result<StreamChunk, ProviderError> {
    let tool_requests = accumulators
        .values()
        .map(ToolCallAccumulator::to_tool_request)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(StreamChunk {
        content: None,
        tool_requests,
        done: true,
        usage,
    })
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    #[serde(default)]
    id: String,
    #[serde(default = "function_type")]
    r#type: String,
    function: ApiFunction,
}

fn function_type() -> String {
    "function".into()
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

// --- Embedding API types ---

#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    #[allow(dead_code)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta, arriving incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Accumulates incremental tool call deltas into a complete request.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn apply(&mut self, delta: &StreamToolCallDelta) {
        if let Some(ref id) = delta.id {
            self.id = id.clone();
        }
        if let Some(ref func) = delta.function {
            if let Some(ref name) = func.name {
                self.name = name.clone();
            }
            if let Some(ref args) = func.arguments {
                self.arguments.push_str(args);
            }
        }
    }

    fn to_tool_request(&self) -> Result<ToolRequest, ProviderError> {
        to_tool_request(self.id.clone(), self.name.clone(), &self.arguments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grimoire_core::Provider;
    use grimoire_core::message::ToolResponse;

    #[test]
    fn model_runner_constructor() {
        let provider = OpenAiCompatProvider::model_runner(None);
        assert_eq!(provider.name(), "model-runner");
        assert_eq!(provider.base_url(), "http://localhost:12434/engines/v1");
    }

    #[test]
    fn ollama_constructor() {
        let provider = OpenAiCompatProvider::ollama(None);
        assert_eq!(provider.name(), "ollama");
        assert!(provider.base_url.contains("localhost:11434"));
    }

    #[test]
    fn from_config_keeps_key() {
        let engine = grimoire_config::EngineConfig {
            base_url: "http://example.test/v1/".into(),
            api_key: Some("sk-test".into()),
        };
        let provider = OpenAiCompatProvider::from_config(&engine);
        assert_eq!(provider.base_url(), "http://example.test/v1");
        assert_eq!(provider.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn message_conversion() {
        let messages = vec![Message::system("Some lore"), Message::user("Hello")];
        let api_messages = OpenAiCompatProvider::to_api_messages(&messages);
        assert_eq!(api_messages.len(), 2);
        assert_eq!(api_messages[0].role, "system");
        assert_eq!(api_messages[1].role, "user");
        assert_eq!(api_messages[1].content.as_deref(), Some("Hello"));
    }

    #[test]
    fn message_conversion_with_tool_requests() {
        let msg = Message::assistant_with_requests(
            "",
            vec![ToolRequest::new(
                "roll_dice",
                "call_1",
                serde_json::json!({"num_dice": 3, "num_faces": 6}),
            )],
        );
        let api_msgs = OpenAiCompatProvider::to_api_messages(&[msg]);
        assert_eq!(api_msgs.len(), 1);
        assert!(api_msgs[0].content.is_none());
        let tc = api_msgs[0].tool_calls.as_ref().unwrap();
        assert_eq!(tc.len(), 1);
        assert_eq!(tc[0].id, "call_1");
        assert_eq!(tc[0].function.name, "roll_dice");
        let args: serde_json::Value = serde_json::from_str(&tc[0].function.arguments).unwrap();
        assert_eq!(args["num_faces"], 6);
    }

    #[test]
    fn message_conversion_tool_response() {
        let msg = Message::tool_response(ToolResponse {
            name: "roll_dice".into(),
            correlation_ref: "call_1".into(),
            output: serde_json::json!({"rolls": [2, 5], "total": 7}),
        });
        let api_msgs = OpenAiCompatProvider::to_api_messages(&[msg]);
        assert_eq!(api_msgs[0].role, "tool");
        assert_eq!(api_msgs[0].tool_call_id.as_deref(), Some("call_1"));
        assert!(api_msgs[0].content.as_ref().unwrap().contains("\"total\":7"));
    }

    #[test]
    fn request_body_prepends_system_and_sets_tool_choice() {
        let mut request = CompletionRequest::new("ai/qwen2.5", vec![Message::user("Roll a d20")]);
        request.system = Some("You are a dungeon master.".into());
        request.top_p = Some(0.9);
        request.tools = vec![ToolDescriptor {
            name: "roll_dice".into(),
            description: "Roll dice".into(),
            input_schema: serde_json::json!({"type": "object"}),
        }];

        let body = OpenAiCompatProvider::request_body(&request, false);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["tools"][0]["function"]["name"], "roll_dice");
        assert_eq!(body["stream"], false);
        assert!(body.get("stream_options").is_none());
        assert!((body["top_p"].as_f64().unwrap() - 0.9).abs() < 1e-6);
    }

    #[test]
    fn request_body_without_tools_omits_tool_choice() {
        let request = CompletionRequest::new("m", vec![Message::user("hi")]);
        let body = OpenAiCompatProvider::request_body(&request, true);
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn request_body_carries_json_schema() {
        let mut request = CompletionRequest::new("m", vec![Message::user("Describe a tavern")]);
        request.response_format = Some(ResponseFormat::json_schema(
            "tavern",
            serde_json::json!({"type": "object", "properties": {"name": {"type": "string"}}}),
        ));

        let body = OpenAiCompatProvider::request_body(&request, false);
        let format = &body["response_format"];
        assert_eq!(format["type"], "json_schema");
        assert_eq!(format["json_schema"]["name"], "tavern");
        assert_eq!(format["json_schema"]["schema"]["properties"]["name"]["type"], "string");
        assert_eq!(format["json_schema"]["strict"], true);
    }

    #[test]
    fn parse_response_with_tool_calls() {
        let data = r#"{
            "model": "jan-nano",
            "choices": [{"message": {"role": "assistant", "content": null, "tool_calls": [
                {"id": "call_a", "type": "function", "function": {"name": "roll_dice", "arguments": "{\"num_dice\":2,\"num_faces\":8}"}},
                {"id": "", "type": "function", "function": {"name": "generate_character_name", "arguments": ""}}
            ]}}]
        }"#;
        let parsed: ApiResponse = serde_json::from_str(data).unwrap();
        let message = OpenAiCompatProvider::from_api_message(
            parsed.choices.into_iter().next().unwrap().message,
        )
        .unwrap();

        let requests: Vec<_> = message.tool_requests().collect();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].correlation_ref, "call_a");
        assert_eq!(requests[0].input["num_dice"], 2);
        assert!(requests[1].correlation_ref.starts_with("call_"));
        assert_eq!(requests[1].input, serde_json::json!({}));
    }

    #[test]
    fn malformed_arguments_are_a_provider_error() {
        let err = to_tool_request("c".into(), "roll_dice".into(), "{not json").unwrap_err();
        assert!(matches!(err, ProviderError::MalformedOutput(_)));
    }

    // --- SSE parsing tests ---

    #[test]
    fn parse_stream_content_delta() {
        let data = r#"{"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#;
        let parsed: StreamResponse = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.choices.len(), 1);
        assert_eq!(parsed.choices[0].delta.content.as_deref(), Some("Hello"));
    }

    #[test]
    fn parse_stream_usage() {
        let data = r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#;
        let parsed: StreamResponse = serde_json::from_str(data).unwrap();
        let usage = parsed.usage.unwrap();
        assert_eq!(usage.total_tokens, 15);
    }

    #[test]
    fn accumulator_assembles_fragments_in_index_order() {
        let first = r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"call_b","function":{"name":"generate_character_name","arguments":"{\"race\""}},{"index":0,"id":"call_a","function":{"name":"roll_dice","arguments":""}}]}}]}"#;
        let second = r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"function":{"arguments":":\"elf\"}"}}]}}]}"#;

        let mut accumulators: BTreeMap<u32, ToolCallAccumulator> = BTreeMap::new();
        for data in [first, second] {
            let parsed: StreamResponse = serde_json::from_str(data).unwrap();
            for delta in parsed.choices[0].delta.tool_calls.as_ref().unwrap() {
                accumulators.entry(delta.index).or_default().apply(delta);
            }
        }

        let chunk = final_chunk(&accumulators, None).unwrap();
        assert!(chunk.done);
        assert_eq!(chunk.tool_requests.len(), 2);
        assert_eq!(chunk.tool_requests[0].name, "roll_dice");
        assert_eq!(chunk.tool_requests[1].input["race"], "elf");
    }

    #[test]
    fn parse_embedding_response() {
        let data = r#"{
            "data": [
                {"embedding": [0.4, 0.5, 0.6], "index": 1},
                {"embedding": [0.1, 0.2, 0.3], "index": 0}
            ],
            "model": "ai/mxbai-embed-large",
            "usage": {"prompt_tokens": 8, "total_tokens": 8}
        }"#;
        let mut parsed: EmbeddingApiResponse = serde_json::from_str(data).unwrap();
        parsed.data.sort_by_key(|d| d.index);
        assert_eq!(parsed.data[0].embedding, vec![0.1, 0.2, 0.3]);
        assert_eq!(parsed.model.as_deref(), Some("ai/mxbai-embed-large"));
    }
}
