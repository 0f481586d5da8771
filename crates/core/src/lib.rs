//! # Grimoire Core
//!
//! Domain types, traits, and error definitions for the Grimoire NPC agent
//! engine. This crate performs **no I/O**: it defines the
//! conversation model, the tool capability, and the completion gateway that
//! every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every collaborator of the tool-call loop is a trait here:
//! - [`Provider`] — the completion gateway (LLM backend)
//! - [`Tool`] — an invocable capability with a name and an input schema
//! - [`KnowledgeSource`] — "query text in, relevant context text out"
//!
//! Implementations live in their own crates, so agents can be tested with
//! scripted stand-ins and wired to real backends via configuration.

pub mod error;
pub mod event;
pub mod knowledge;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{ConfirmationError, Error, MemoryError, ProviderError, Result, ToolError};
pub use event::{DomainEvent, EventBus};
pub use knowledge::KnowledgeSource;
pub use message::{ConversationHistory, Message, Part, Role, ToolRequest, ToolResponse};
pub use provider::{
    CompletionRequest, EmbeddingRequest, EmbeddingResponse, Provider, ProviderResponse, StepResult,
    ResponseFormat, StreamChunk, Usage,
};
pub use tool::{Tool, ToolCatalog, ToolDescriptor};
