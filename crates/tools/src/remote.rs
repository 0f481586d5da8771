//! Remote tools over JSON-RPC 2.0 / streamable HTTP.
//!
//! The dungeon server and the Docker MCP gateway expose their tools through
//! `initialize`, `tools/list` and `tools/call`. Each listed tool becomes a
//! [`RemoteTool`], indistinguishable from a local one once it is in a
//! [`ToolCatalog`].

use async_trait::async_trait;
use grimoire_core::error::ToolError;
use grimoire_core::tool::{Tool, ToolCatalog, ToolDescriptor};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

const PROTOCOL_VERSION: &str = "2025-03-26";
const SESSION_HEADER: &str = "Mcp-Session-Id";

/// A connection to one remote tool server.
pub struct RemoteToolClient {
    endpoint: String,
    client: reqwest::Client,
    session_id: RwLock<Option<String>>,
    next_id: AtomicU64,
}

impl RemoteToolClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
            session_id: RwLock::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a client and perform the initialize handshake.
    pub async fn connect(endpoint: impl Into<String>) -> Result<Arc<Self>, ToolError> {
        let client = Arc::new(Self::new(endpoint));
        client.initialize().await?;
        Ok(client)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// `initialize` followed by `notifications/initialized`.
    pub async fn initialize(&self) -> Result<(), ToolError> {
        let result = self
            .send_request(
                "initialize",
                serde_json::json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "grimoire",
                        "version": env!("CARGO_PKG_VERSION")
                    }
                }),
            )
            .await?;
        debug!(endpoint = %self.endpoint, server = %result["serverInfo"], "Remote tool server initialized");

        self.send_notification("notifications/initialized").await
    }

    /// Descriptors of every tool the server offers.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError> {
        let result = self.send_request("tools/list", serde_json::json!({})).await?;
        Ok(parse_tool_list(&result))
    }

    /// Invoke a remote tool.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        // Servers expect an object, never null
        let arguments = if arguments.is_null() {
            serde_json::json!({})
        } else {
            arguments
        };
        let result = self
            .send_request(
                "tools/call",
                serde_json::json!({ "name": name, "arguments": arguments }),
            )
            .await?;
        extract_call_output(name, &result)
    }

    /// A catalog of [`RemoteTool`]s, one per listed tool.
    pub async fn catalog(self: &Arc<Self>) -> Result<ToolCatalog, ToolError> {
        let descriptors = self.list_tools().await?;
        info!(endpoint = %self.endpoint, tools = descriptors.len(), "Loaded remote tools");
        let mut catalog = ToolCatalog::new();
        for descriptor in descriptors {
            catalog.register(Arc::new(RemoteTool {
                descriptor,
                client: Arc::clone(self),
            }));
        }
        Ok(catalog)
    }

    fn post(&self, body: &serde_json::Value) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .json(body);
        let session = self.session_id.read().ok().and_then(|s| s.clone());
        match session {
            Some(id) => builder.header(SESSION_HEADER, id),
            None => builder,
        }
    }

    async fn send_request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        debug!(method, id, "Sending remote tool request");
        let response = self
            .post(&request)
            .send()
            .await
            .map_err(|e| ToolError::Remote(format!("{method}: {e}")))?;

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            if let Ok(mut slot) = self.session_id.write() {
                *slot = Some(session.to_string());
            }
        }

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/json")
            .to_string();
        let body = response
            .text()
            .await
            .map_err(|e| ToolError::Remote(format!("{method}: {e}")))?;

        if !status.is_success() {
            return Err(ToolError::Remote(format!(
                "{method}: HTTP {}: {body}",
                status.as_u16()
            )));
        }

        let message = parse_rpc_body(&content_type, &body, id)?;
        if let Some(err) = message.get("error") {
            return Err(ToolError::Remote(format!("{method}: {err}")));
        }
        Ok(message.get("result").cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn send_notification(&self, method: &str) -> Result<(), ToolError> {
        let notification = serde_json::json!({ "jsonrpc": "2.0", "method": method });
        let response = self
            .post(&notification)
            .send()
            .await
            .map_err(|e| ToolError::Remote(format!("{method}: {e}")))?;
        if !response.status().is_success() {
            return Err(ToolError::Remote(format!(
                "{method}: HTTP {}",
                response.status().as_u16()
            )));
        }
        Ok(())
    }
}

/// Pick the JSON-RPC response with id `id` out of a plain JSON or SSE body.
fn parse_rpc_body(content_type: &str, body: &str, id: u64) -> Result<serde_json::Value, ToolError> {
    if !content_type.starts_with("text/event-stream") {
        return serde_json::from_str(body)
            .map_err(|e| ToolError::Remote(format!("invalid JSON-RPC response: {e}")));
    }

    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .filter_map(|data| serde_json::from_str::<serde_json::Value>(data.trim()).ok())
        .find(|msg| msg.get("id").and_then(|v| v.as_u64()) == Some(id))
        .ok_or_else(|| ToolError::Remote(format!("no response for request {id} in event stream")))
}

fn parse_tool_list(result: &serde_json::Value) -> Vec<ToolDescriptor> {
    result["tools"]
        .as_array()
        .map(|tools| {
            tools
                .iter()
                .filter_map(|tool| {
                    let name = tool.get("name")?.as_str()?.to_string();
                    Some(ToolDescriptor {
                        name,
                        description: tool["description"].as_str().unwrap_or("").to_string(),
                        input_schema: tool
                            .get("inputSchema")
                            .cloned()
                            .unwrap_or_else(|| serde_json::json!({"type": "object"})),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Turn a `tools/call` result into tool output.
///
/// `structuredContent` wins when present; otherwise the text items are
/// joined and parsed as JSON when possible.
fn extract_call_output(
    name: &str,
    result: &serde_json::Value,
) -> Result<serde_json::Value, ToolError> {
    let text = result["content"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();

    if result["isError"].as_bool().unwrap_or(false) {
        return Err(ToolError::ExecutionFailed {
            tool_name: name.to_string(),
            reason: if text.is_empty() {
                "remote tool reported an error".into()
            } else {
                text
            },
        });
    }

    if let Some(structured) = result.get("structuredContent").filter(|v| !v.is_null()) {
        return Ok(structured.clone());
    }

    Ok(serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text)))
}

/// One tool living on a remote server.
pub struct RemoteTool {
    descriptor: ToolDescriptor,
    client: Arc<RemoteToolClient>,
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn description(&self) -> &str {
        &self.descriptor.description
    }

    fn input_schema(&self) -> serde_json::Value {
        self.descriptor.input_schema.clone()
    }

    async fn invoke(&self, input: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        self.client.call_tool(&self.descriptor.name, input).await
    }
}
