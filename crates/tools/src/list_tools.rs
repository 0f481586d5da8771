//! `list_tools` — lets the model ask what it can do.

use async_trait::async_trait;
use grimoire_core::error::ToolError;
use grimoire_core::tool::{Tool, ToolCatalog, ToolDescriptor};

/// Describes a snapshot of the catalog it was built from.
pub struct ListToolsTool {
    descriptors: Vec<ToolDescriptor>,
}

impl ListToolsTool {
    pub fn new(catalog: &ToolCatalog) -> Self {
        Self {
            descriptors: catalog.descriptors(),
        }
    }
}

#[async_trait]
impl Tool for ListToolsTool {
    fn name(&self) -> &str {
        "list_tools"
    }

    fn description(&self) -> &str {
        "List all the tools available to you, with their descriptions and parameters"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn invoke(&self, _input: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let tools: Vec<serde_json::Value> = self
            .descriptors
            .iter()
            .map(|d| {
                serde_json::json!({
                    "name": d.name,
                    "description": d.description,
                    "parameters": d.input_schema,
                })
            })
            .collect();
        Ok(serde_json::json!({ "count": tools.len(), "tools": tools }))
    }
}
