//! The tool-call loop.
//!
//! One run: append the user message, then repeatedly ask the provider for a
//! step. Tool requests are resolved against the catalog, reviewed by the
//! execution policy and answered in order; a final answer ends the run.

use chrono::Utc;
use grimoire_core::error::ProviderError;
use grimoire_core::event::{DomainEvent, EventBus};
use grimoire_core::message::{ConversationHistory, Message, ToolRequest, ToolResponse};
use grimoire_core::provider::{CompletionRequest, Provider, StepResult};
use grimoire_core::tool::ToolCatalog;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::policy::{ExecutionPolicy, Verdict};

/// Default round cap.
pub const DEFAULT_MAX_ROUNDS: u32 = 25;

/// How one processed request ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "lowercase")]
pub enum Outcome {
    /// The tool ran; this is its output
    Executed(serde_json::Value),
    /// The tool did not run, or failed; this is why
    Cancelled(String),
}

/// One resolved request and what became of it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub correlation_ref: String,
    pub outcome: Outcome,
}

impl ToolCallRecord {
    pub fn is_executed(&self) -> bool {
        matches!(self.outcome, Outcome::Executed(_))
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Termination {
    /// The model gave a final answer
    Answered,
    /// The operator aborted
    Aborted,
    /// The round cap was reached
    Exhausted,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Termination::Answered => "answered",
            Termination::Aborted => "aborted",
            Termination::Exhausted => "exhausted",
        };
        f.write_str(s)
    }
}

/// What a run produced.
///
/// `total_calls` counts every request the model issued, including ones
/// naming unknown tools; `records` holds only resolved ones, so
/// `records.len() <= total_calls`. Requests left undispatched by an abort
/// are in neither `records` nor `not_found`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallsResult {
    pub total_calls: usize,
    pub records: Vec<ToolCallRecord>,
    /// Requests that named a tool outside the catalog
    pub not_found: usize,
    /// Empty unless the run was answered
    pub final_message: String,
    pub rounds: u32,
    pub termination: Termination,
}

impl ToolCallsResult {
    fn started() -> Self {
        Self {
            total_calls: 0,
            records: Vec::new(),
            not_found: 0,
            final_message: String::new(),
            rounds: 0,
            termination: Termination::Aborted,
        }
    }

    pub fn executed(&self) -> impl Iterator<Item = &ToolCallRecord> {
        self.records.iter().filter(|r| r.is_executed())
    }

    pub fn cancelled(&self) -> impl Iterator<Item = &ToolCallRecord> {
        self.records.iter().filter(|r| !r.is_executed())
    }

    /// Requests that named a tool outside the catalog.
    pub fn unresolved(&self) -> usize {
        self.not_found
    }
}

/// Loop-fatal failures.
#[derive(Debug, thiserror::Error)]
pub enum ToolLoopError {
    /// The provider failed to produce a step. `partial` holds what earlier
    /// rounds accumulated.
    #[error("generation failed in round {round}: {source}")]
    Generation {
        round: u32,
        partial: Box<ToolCallsResult>,
        #[source]
        source: ProviderError,
    },
}

impl ToolLoopError {
    pub fn partial(&self) -> &ToolCallsResult {
        match self {
            ToolLoopError::Generation { partial, .. } => partial,
        }
    }

    pub fn into_partial(self) -> ToolCallsResult {
        match self {
            ToolLoopError::Generation { partial, .. } => *partial,
        }
    }
}

enum Dispatch {
    Recorded(ToolCallRecord),
    Dropped,
    Halt,
}

/// Drives tool-call rounds against one provider and model.
pub struct ToolLoop {
    provider: Arc<dyn Provider>,
    model: String,
    system_instructions: Option<String>,
    temperature: f32,
    top_p: Option<f32>,
    max_tokens: Option<u32>,
    /// 0 = no cap
    max_rounds: u32,
    event_bus: Option<Arc<EventBus>>,
}

impl ToolLoop {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            system_instructions: None,
            temperature: 0.0,
            top_p: None,
            max_tokens: None,
            max_rounds: DEFAULT_MAX_ROUNDS,
            event_bus: None,
        }
    }

    pub fn with_system_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.system_instructions = Some(instructions.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Cap the number of rounds. 0 removes the cap.
    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Run one user turn to completion.
    ///
    /// Only appends to `history`: the user message once, each assistant
    /// turn carrying tool requests, and one tool response per resolved
    /// request. A final answer is returned, not appended.
    pub async fn run(
        &self,
        history: &mut ConversationHistory,
        user_message: &str,
        catalog: &ToolCatalog,
        policy: &dyn ExecutionPolicy,
    ) -> Result<ToolCallsResult, ToolLoopError> {
        info!(
            model = %self.model,
            tools = catalog.len(),
            max_rounds = self.max_rounds,
            "Starting tool loop"
        );

        history.push(Message::user(user_message));
        let mut result = ToolCallsResult::started();
        let descriptors = catalog.descriptors();

        loop {
            if self.max_rounds > 0 && result.rounds >= self.max_rounds {
                warn!(rounds = result.rounds, "Round cap reached, stopping");
                result.termination = Termination::Exhausted;
                break;
            }
            result.rounds += 1;
            let round = result.rounds;

            let mut request = CompletionRequest::new(&self.model, history.messages().to_vec());
            request.system = self.system_instructions.clone();
            request.tools = descriptors.clone();
            request.temperature = self.temperature;
            request.top_p = self.top_p;
            request.max_tokens = self.max_tokens;

            debug!(round, messages = history.len(), "Requesting step");
            let step = match self.provider.step(request).await {
                Ok(step) => step,
                Err(source) => {
                    warn!(round, error = %source, "Generation failed");
                    self.publish(DomainEvent::ErrorOccurred {
                        context: format!("tool loop round {round}"),
                        error_message: source.to_string(),
                        timestamp: Utc::now(),
                    });
                    result.termination = Termination::Aborted;
                    self.publish_finished(&result);
                    return Err(ToolLoopError::Generation {
                        round,
                        partial: Box::new(result),
                        source,
                    });
                }
            };

            match step {
                StepResult::FinalAnswer(text) => {
                    result.final_message = text;
                    result.termination = Termination::Answered;
                    break;
                }
                StepResult::ToolRequests { message, requests } => {
                    history.push(message);
                    result.total_calls += requests.len();
                    debug!(round, requests = requests.len(), "Dispatching tool requests");

                    let mut halted = false;
                    for request in &requests {
                        match self.dispatch(request, catalog, policy, history).await {
                            Dispatch::Recorded(record) => result.records.push(record),
                            Dispatch::Dropped => result.not_found += 1,
                            Dispatch::Halt => {
                                halted = true;
                                break;
                            }
                        }
                    }

                    self.publish(DomainEvent::RoundCompleted {
                        round,
                        requests: requests.len(),
                        timestamp: Utc::now(),
                    });

                    if halted {
                        info!(round, "Tool loop aborted by operator");
                        result.termination = Termination::Aborted;
                        break;
                    }
                }
            }
        }

        info!(
            termination = %result.termination,
            total_calls = result.total_calls,
            records = result.records.len(),
            rounds = result.rounds,
            "Tool loop finished"
        );
        self.publish_finished(&result);
        Ok(result)
    }

    async fn dispatch(
        &self,
        request: &ToolRequest,
        catalog: &ToolCatalog,
        policy: &dyn ExecutionPolicy,
        history: &mut ConversationHistory,
    ) -> Dispatch {
        let Some(tool) = catalog.resolve(&request.name) else {
            warn!(tool = %request.name, "Unknown tool requested, dropping");
            self.publish(DomainEvent::ToolNotFound {
                tool_name: request.name.clone(),
                timestamp: Utc::now(),
            });
            return Dispatch::Dropped;
        };

        let outcome = match policy.review(request).await {
            Verdict::Halt => return Dispatch::Halt,
            Verdict::Skip(reason) => {
                debug!(tool = %request.name, %reason, "Tool request skipped");
                self.publish(DomainEvent::ToolCancelled {
                    tool_name: request.name.clone(),
                    timestamp: Utc::now(),
                });
                Outcome::Cancelled(reason)
            }
            Verdict::Execute => {
                debug!(tool = %request.name, input = %request.input, "Invoking tool");
                let start = Instant::now();
                let invoked = tool.invoke(request.input.clone()).await;
                let duration_ms = start.elapsed().as_millis() as u64;
                self.publish(DomainEvent::ToolExecuted {
                    tool_name: request.name.clone(),
                    success: invoked.is_ok(),
                    duration_ms,
                    timestamp: Utc::now(),
                });
                match invoked {
                    Ok(output) => Outcome::Executed(output),
                    Err(e) => {
                        warn!(tool = %request.name, error = %e, "Tool invocation failed");
                        Outcome::Cancelled(format!("execution error: {e}"))
                    }
                }
            }
        };

        let response = match &outcome {
            Outcome::Executed(output) => ToolResponse {
                name: request.name.clone(),
                correlation_ref: request.correlation_ref.clone(),
                output: output.clone(),
            },
            Outcome::Cancelled(reason) => ToolResponse::sentinel(request, reason),
        };
        history.push(Message::tool_response(response));

        Dispatch::Recorded(ToolCallRecord {
            tool_name: request.name.clone(),
            correlation_ref: request.correlation_ref.clone(),
            outcome,
        })
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }

    fn publish_finished(&self, result: &ToolCallsResult) {
        self.publish(DomainEvent::LoopFinished {
            termination: result.termination.to_string(),
            total_calls: result.total_calls,
            rounds: result.rounds,
            timestamp: Utc::now(),
        });
    }
}
