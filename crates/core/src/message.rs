//! Message and conversation history domain types.
//!
//! These are the value objects that flow through the tool-call loop:
//! the user asks → the model answers or requests tools → tool responses are
//! appended → the model sees the whole transcript on the next round.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The player / end user
    User,
    /// The model
    Assistant,
    /// System instructions or injected context
    System,
    /// Tool execution result
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        };
        f.write_str(s)
    }
}

/// A model-issued request to run a named tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    /// Name of the tool to invoke
    pub name: String,

    /// Opaque id pairing this request with its response
    pub correlation_ref: String,

    /// Structured input; schema-less at the engine level
    #[serde(default)]
    pub input: serde_json::Value,
}

impl ToolRequest {
    pub fn new(
        name: impl Into<String>,
        correlation_ref: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            correlation_ref: correlation_ref.into(),
            input,
        }
    }
}

/// The answer to a [`ToolRequest`], appended to history as a tool message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub name: String,
    pub correlation_ref: String,
    pub output: serde_json::Value,
}

impl ToolResponse {
    /// Response for a request that was not executed (denied, failed).
    ///
    /// The payload is `{"error": reason}` so the model still sees a complete
    /// request/response pairing.
    pub fn sentinel(request: &ToolRequest, reason: &str) -> Self {
        Self {
            name: request.name.clone(),
            correlation_ref: request.correlation_ref.clone(),
            output: serde_json::json!({ "error": reason }),
        }
    }
}

/// One piece of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
    ToolRequest(ToolRequest),
    ToolResponse(ToolResponse),
}

/// A single turn in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// Ordered content parts
    pub parts: Vec<Part>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn with_parts(role: Role, parts: Vec<Part>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            parts,
            timestamp: Utc::now(),
        }
    }

    fn text_message(role: Role, text: impl Into<String>) -> Self {
        Self::with_parts(role, vec![Part::Text { text: text.into() }])
    }

    /// Create a new user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::text_message(Role::User, text)
    }

    /// Create a new assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text_message(Role::Assistant, text)
    }

    /// Create a new system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::text_message(Role::System, text)
    }

    /// An assistant turn that asks for tools before answering.
    ///
    /// Empty `text` produces no text part.
    pub fn assistant_with_requests(text: impl Into<String>, requests: Vec<ToolRequest>) -> Self {
        let text = text.into();
        let mut parts = Vec::with_capacity(requests.len() + 1);
        if !text.is_empty() {
            parts.push(Part::Text { text });
        }
        parts.extend(requests.into_iter().map(Part::ToolRequest));
        Self::with_parts(Role::Assistant, parts)
    }

    /// A tool message carrying exactly one response.
    pub fn tool_response(response: ToolResponse) -> Self {
        Self::with_parts(Role::Tool, vec![Part::ToolResponse(response)])
    }

    /// Concatenation of all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Tool requests carried by this message, in order.
    pub fn tool_requests(&self) -> impl Iterator<Item = &ToolRequest> {
        self.parts.iter().filter_map(|p| match p {
            Part::ToolRequest(req) => Some(req),
            _ => None,
        })
    }

    pub fn has_tool_requests(&self) -> bool {
        self.tool_requests().next().is_some()
    }

    /// The response carried by a tool message.
    pub fn tool_response_part(&self) -> Option<&ToolResponse> {
        self.parts.iter().find_map(|p| match p {
            Part::ToolResponse(resp) => Some(resp),
            _ => None,
        })
    }
}

/// An ordered, append-only log of messages.
///
/// A tool-call loop only ever calls [`push`](Self::push). Everything else
/// (reset, export, import) is for the owner between runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationHistory {
    messages: Vec<Message>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// Append a message.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Text of the most recent message, empty when there is none.
    pub fn last_text(&self) -> String {
        self.messages.last().map(Message::text).unwrap_or_default()
    }

    /// Drop every message.
    pub fn reset(&mut self) {
        self.messages.clear();
    }

    /// Serialize the history as a JSON array.
    pub fn export_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(&self.messages)?)
    }

    /// Load a history previously produced by [`export_json`](Self::export_json).
    pub fn import_json(json: &str) -> crate::Result<Self> {
        let messages: Vec<Message> = serde_json::from_str(json)?;
        Ok(Self { messages })
    }

    /// Human-readable transcript: one `[index] role: text` line per message.
    pub fn transcript(&self) -> String {
        let mut out = String::new();
        for (i, msg) in self.messages.iter().enumerate() {
            let mut segments: Vec<String> = Vec::new();
            for part in &msg.parts {
                match part {
                    Part::Text { text } => segments.push(text.trim().to_string()),
                    Part::ToolRequest(req) => segments.push(format!("[tool request {}]", req.name)),
                    Part::ToolResponse(resp) => {
                        segments.push(format!("[tool response {}]", resp.name))
                    }
                }
            }
            out.push_str(&format!("[{}] {}: {}\n", i, msg.role, segments.join(" ")));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dice_request() -> ToolRequest {
        ToolRequest::new("roll_dice", "call_1", serde_json::json!({"num_dice": 3, "num_faces": 6}))
    }

    #[test]
    fn create_user_message() {
        let msg = Message::user("Hello, innkeeper!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.text(), "Hello, innkeeper!");
        assert!(!msg.has_tool_requests());
    }

    #[test]
    fn assistant_with_requests_skips_empty_text() {
        let msg = Message::assistant_with_requests("", vec![dice_request()]);
        assert_eq!(msg.parts.len(), 1);
        assert_eq!(msg.tool_requests().count(), 1);
        assert_eq!(msg.text(), "");
    }

    #[test]
    fn tool_message_carries_one_response() {
        let resp = ToolResponse::sentinel(&dice_request(), "denied by operator");
        let msg = Message::tool_response(resp);
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.parts.len(), 1);
        let part = msg.tool_response_part().unwrap();
        assert_eq!(part.correlation_ref, "call_1");
        assert_eq!(part.output["error"], "denied by operator");
    }

    #[test]
    fn transcript_is_a_pure_projection() {
        let mut history = ConversationHistory::new();
        history.push(Message::user("Roll for me"));
        history.push(Message::assistant_with_requests("Rolling.", vec![dice_request()]));
        history.push(Message::tool_response(ToolResponse {
            name: "roll_dice".into(),
            correlation_ref: "call_1".into(),
            output: serde_json::json!({"total": 11}),
        }));

        let before = history.len();
        let transcript = history.transcript();
        assert_eq!(history.len(), before);
        assert!(transcript.contains("[0] user: Roll for me"));
        assert!(transcript.contains("[1] assistant: Rolling. [tool request roll_dice]"));
        assert!(transcript.contains("[2] tool: [tool response roll_dice]"));
    }

    #[test]
    fn history_export_import() {
        let mut history = ConversationHistory::new();
        history.push(Message::user("Who guards the gate?"));
        history.push(Message::assistant("Sir Aramil does."));

        let json = history.export_json().unwrap();
        let restored = ConversationHistory::import_json(&json).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.messages()[1].text(), "Sir Aramil does.");
    }

    #[test]
    fn reset_clears_history() {
        let mut history = ConversationHistory::from_messages(vec![Message::user("hi")]);
        assert_eq!(history.last_text(), "hi");
        history.reset();
        assert!(history.is_empty());
        assert_eq!(history.last_text(), "");
    }

    #[test]
    fn part_serialization_is_tagged() {
        let part = Part::ToolRequest(dice_request());
        let json = serde_json::to_string(&part).unwrap();
        assert!(json.contains(r#""type":"tool_request""#));
        assert!(json.contains(r#""correlation_ref":"call_1""#));
    }
}
