//! Execution policies — whether a resolved tool request runs.

use async_trait::async_trait;
use grimoire_core::message::ToolRequest;
use std::sync::Arc;
use tracing::warn;

use crate::confirmation::{ConfirmationChannel, Decision};

/// Reason recorded when the operator declines a request.
pub const DENIED_BY_OPERATOR: &str = "denied by operator";

/// What to do with one resolved request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Invoke the tool
    Execute,
    /// Do not invoke; answer the model with this reason
    Skip(String),
    /// Stop this round and every later one
    Halt,
}

#[async_trait]
pub trait ExecutionPolicy: Send + Sync {
    async fn review(&self, request: &ToolRequest) -> Verdict;
}

/// Every resolved request runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct Automatic;

#[async_trait]
impl ExecutionPolicy for Automatic {
    async fn review(&self, _request: &ToolRequest) -> Verdict {
        Verdict::Execute
    }
}

/// Every resolved request is put to an operator first.
pub struct Confirmed {
    channel: Arc<dyn ConfirmationChannel>,
}

impl Confirmed {
    pub fn new(channel: Arc<dyn ConfirmationChannel>) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl ExecutionPolicy for Confirmed {
    async fn review(&self, request: &ToolRequest) -> Verdict {
        match self.channel.ask(request).await {
            Ok(Decision::Approve) => Verdict::Execute,
            Ok(Decision::Deny) => Verdict::Skip(DENIED_BY_OPERATOR.into()),
            Ok(Decision::Abort) => Verdict::Halt,
            Err(e) => {
                warn!(tool = %request.name, error = %e, "Confirmation channel failed, halting");
                Verdict::Halt
            }
        }
    }
}
