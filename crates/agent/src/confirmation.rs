//! Confirmation channels — how an operator approves tool invocations.
//!
//! The loop only ever asks "may I run this?" and awaits an answer. Where the
//! answer comes from is up to the channel: a terminal prompt, a queue
//! resolved by a web handler, or a fixed script.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grimoire_core::error::ConfirmationError;
use grimoire_core::message::ToolRequest;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

/// The operator's answer to one tool request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Run the tool
    Approve,
    /// Skip this tool, keep going
    Deny,
    /// Stop the whole run
    Abort,
}

impl Decision {
    /// Parse operator input: `y`/`yes`, `n`/`no`, `q`/`quit`, any case.
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "y" | "yes" => Some(Self::Approve),
            "n" | "no" => Some(Self::Deny),
            "q" | "quit" => Some(Self::Abort),
            _ => None,
        }
    }
}

/// Something that can approve, deny, or abort a tool request.
///
/// Invalid operator input must be handled inside the channel (re-ask);
/// an `Err` means the channel itself is unusable.
#[async_trait]
pub trait ConfirmationChannel: Send + Sync {
    async fn ask(&self, request: &ToolRequest) -> Result<Decision, ConfirmationError>;
}

// --- Terminal ---

struct TerminalIo<R, W> {
    reader: R,
    writer: W,
}

/// Prompts on a writer and reads answers line by line from a reader.
pub struct TerminalConfirmation<R, W> {
    io: tokio::sync::Mutex<TerminalIo<R, W>>,
}

impl<R, W> TerminalConfirmation<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            io: tokio::sync::Mutex::new(TerminalIo { reader, writer }),
        }
    }

    /// Give back the reader and writer.
    pub fn into_inner(self) -> (R, W) {
        let io = self.io.into_inner();
        (io.reader, io.writer)
    }
}

impl TerminalConfirmation<tokio::io::BufReader<tokio::io::Stdin>, tokio::io::Stdout> {
    /// Prompt on stdout, read from stdin.
    pub fn stdio() -> Self {
        Self::new(
            tokio::io::BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
        )
    }
}

impl TerminalConfirmation<tokio::io::BufReader<tokio::io::Stdin>, tokio::io::Stderr> {
    /// Prompt on stderr, read from stdin. Keeps stdout for machine output.
    pub fn stderr() -> Self {
        Self::new(
            tokio::io::BufReader::new(tokio::io::stdin()),
            tokio::io::stderr(),
        )
    }
}

#[async_trait]
impl<R, W> ConfirmationChannel for TerminalConfirmation<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn ask(&self, request: &ToolRequest) -> Result<Decision, ConfirmationError> {
        let mut io = self.io.lock().await;
        let prompt = format!("Do you want to execute tool {:?}? (y/n/q): ", request.name);

        loop {
            io.writer.write_all(prompt.as_bytes()).await?;
            io.writer.flush().await?;

            let mut line = String::new();
            if io.reader.read_line(&mut line).await? == 0 {
                // EOF: nobody left to ask
                return Ok(Decision::Abort);
            }

            match Decision::parse(&line) {
                Some(decision) => return Ok(decision),
                None => {
                    io.writer
                        .write_all(b"Please enter 'y', 'n' or 'q'.\n")
                        .await?;
                }
            }
        }
    }
}

// --- Approval queue ---

/// A request waiting for an operator decision.
#[derive(Debug, Clone, Serialize)]
pub struct PendingApproval {
    pub token: String,
    pub tool_name: String,
    pub input: serde_json::Value,
    pub requested_at: DateTime<Utc>,
}

type PendingMap = HashMap<String, (PendingApproval, oneshot::Sender<Decision>)>;

/// Removes a token from the pending map when its asker goes away.
struct PendingGuard<'a> {
    pending: &'a Mutex<PendingMap>,
    token: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&self.token);
        }
    }
}

/// Asynchronous approvals for server front ends.
///
/// `ask` parks the loop on a token; a handler elsewhere calls
/// [`resolve`](Self::resolve) with that token to resume it.
pub struct ApprovalQueue {
    pending: Mutex<PendingMap>,
    announcements: broadcast::Sender<PendingApproval>,
    timeout: Option<Duration>,
}

impl ApprovalQueue {
    pub fn new() -> Self {
        let (announcements, _) = broadcast::channel(64);
        Self {
            pending: Mutex::new(HashMap::new()),
            announcements,
            timeout: None,
        }
    }

    /// Deny requests nobody answers within `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Be told about every new pending approval.
    pub fn subscribe(&self) -> broadcast::Receiver<PendingApproval> {
        self.announcements.subscribe()
    }

    /// Outstanding approvals, oldest first.
    pub fn pending(&self) -> Vec<PendingApproval> {
        let mut list: Vec<PendingApproval> = self
            .pending
            .lock()
            .map(|p| p.values().map(|(a, _)| a.clone()).collect())
            .unwrap_or_default();
        list.sort_by_key(|a| a.requested_at);
        list
    }

    /// Answer a pending approval.
    pub fn resolve(&self, token: &str, decision: Decision) -> Result<(), ConfirmationError> {
        let entry = self
            .pending
            .lock()
            .map_err(|_| ConfirmationError::Closed)?
            .remove(token);
        let (approval, sender) =
            entry.ok_or_else(|| ConfirmationError::UnknownToken(token.to_string()))?;
        info!(token, tool = %approval.tool_name, ?decision, "Approval resolved");
        // The asker may have timed out meanwhile
        let _ = sender.send(decision);
        Ok(())
    }

    /// Drop every pending approval; their askers see `Abort`.
    pub fn cancel_all(&self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
    }
}

impl Default for ApprovalQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfirmationChannel for ApprovalQueue {
    async fn ask(&self, request: &ToolRequest) -> Result<Decision, ConfirmationError> {
        let approval = PendingApproval {
            token: uuid::Uuid::new_v4().to_string(),
            tool_name: request.name.clone(),
            input: request.input.clone(),
            requested_at: Utc::now(),
        };
        let token = approval.token.clone();
        let (tx, rx) = oneshot::channel();

        self.pending
            .lock()
            .map_err(|_| ConfirmationError::Closed)?
            .insert(token.clone(), (approval.clone(), tx));
        let _guard = PendingGuard {
            pending: &self.pending,
            token: token.clone(),
        };
        debug!(token = %token, tool = %request.name, "Approval requested");
        let _ = self.announcements.send(approval);

        let answer = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(answer) => answer,
                Err(_) => {
                    warn!(token = %token, tool = %request.name, "Approval timed out, denying");
                    return Ok(Decision::Deny);
                }
            },
            None => rx.await,
        };

        // A dropped sender means the queue was cancelled
        Ok(answer.unwrap_or(Decision::Abort))
    }
}

// --- Scripted ---

/// Answers from a fixed list, in order. Errors once the list runs out.
pub struct ScriptedConfirmation {
    decisions: Mutex<VecDeque<Decision>>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedConfirmation {
    pub fn new(decisions: impl IntoIterator<Item = Decision>) -> Self {
        Self {
            decisions: Mutex::new(decisions.into_iter().collect()),
            asked: Mutex::new(Vec::new()),
        }
    }

    /// Tool names asked about so far.
    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ConfirmationChannel for ScriptedConfirmation {
    async fn ask(&self, request: &ToolRequest) -> Result<Decision, ConfirmationError> {
        if let Ok(mut asked) = self.asked.lock() {
            asked.push(request.name.clone());
        }
        self.decisions
            .lock()
            .map_err(|_| ConfirmationError::Closed)?
            .pop_front()
            .ok_or(ConfirmationError::Closed)
    }
}
