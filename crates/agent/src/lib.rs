//! The tool-call loop and the NPC agents built on it.
//!
//! A run follows a **Request → Review → Respond** cycle:
//!
//! 1. **Append** the user message to a history
//! 2. **Ask** the provider for a step (tool requests or a final answer)
//! 3. **Resolve** each request against the tool catalog
//! 4. **Review** it with the execution policy (automatic or confirmed)
//! 5. **Respond** with exactly one tool response per resolved request, loop back to 2
//!
//! The loop ends when the model answers, the operator aborts, or the round
//! cap is reached. A provider failure ends it with an error that still
//! carries the partial result.

pub mod confirmation;
pub mod loop_runner;
pub mod npc;
pub mod policy;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use confirmation::{
    ApprovalQueue, ConfirmationChannel, Decision, PendingApproval, ScriptedConfirmation,
    TerminalConfirmation,
};
pub use loop_runner::{
    DEFAULT_MAX_ROUNDS, Outcome, Termination, ToolCallRecord, ToolCallsResult, ToolLoop,
    ToolLoopError,
};
pub use npc::NpcAgent;
pub use policy::{Automatic, Confirmed, DENIED_BY_OPERATOR, ExecutionPolicy, Verdict};
