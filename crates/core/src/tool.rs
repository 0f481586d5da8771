//! Tool trait — the abstraction over NPC capabilities.
//!
//! Tools are what let an agent act on the game world: roll dice, name a
//! character, move through the dungeon. Local and remote tools implement the
//! same [`Tool`] capability, so the loop never needs to check what kind of
//! tool it is holding.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::ToolError;

/// What the model is told about a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// The tool name, unique within a catalog
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's input
    pub input_schema: serde_json::Value,
}

/// The tool capability.
///
/// Every catalog entry must be able to describe itself and run. There is no
/// "reference-only" tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "roll_dice").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's input.
    fn input_schema(&self) -> serde_json::Value;

    /// Run the tool. Input and output are schema-less at this boundary.
    async fn invoke(&self, input: serde_json::Value) -> Result<serde_json::Value, ToolError>;

    /// Describe this tool for the model.
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// The set of tools made available to the model for one turn.
///
/// Catalogs are small, so lookup is a linear scan in registration order.
/// Registering two tools with the same name is a caller error; the first
/// one wins on lookup.
#[derive(Clone, Default)]
pub struct ToolCatalog {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        if self.resolve(tool.name()).is_some() {
            tracing::warn!(tool = tool.name(), "Duplicate tool name, earlier registration wins");
        }
        self.tools.push(tool);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    /// Append every tool of `other`.
    pub fn extend(&mut self, other: ToolCatalog) {
        self.tools.extend(other.tools);
    }

    /// Find a tool by name.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    /// Descriptors for every tool, in registration order.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCatalog").field("tools", &self.names()).finish()
    }
}
