//! Built-in tool implementations for Grimoire.
//!
//! Tools give an NPC the ability to act on the game: roll dice, invent a
//! character name, describe its own abilities, or call tools hosted by a
//! remote server (the dungeon, the MCP gateway).

pub mod dice;
pub mod list_tools;
pub mod names;
pub mod remote;

use grimoire_core::tool::ToolCatalog;
use std::sync::Arc;

pub use dice::RollDiceTool;
pub use list_tools::ListToolsTool;
pub use names::CharacterNameTool;
pub use remote::{RemoteTool, RemoteToolClient};

/// Create a catalog with the local game tools.
///
/// `list_tools` is added last and describes the tools registered before it.
pub fn default_catalog() -> ToolCatalog {
    let catalog = ToolCatalog::new()
        .with(Arc::new(RollDiceTool::new()))
        .with(Arc::new(CharacterNameTool::new()));
    with_listing(catalog)
}

/// Append a `list_tools` tool describing everything already in `catalog`.
pub fn with_listing(catalog: ToolCatalog) -> ToolCatalog {
    let listing = ListToolsTool::new(&catalog);
    catalog.with(Arc::new(listing))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_contents() {
        let catalog = default_catalog();
        assert_eq!(
            catalog.names(),
            vec!["roll_dice", "generate_character_name", "list_tools"]
        );
    }

    #[tokio::test]
    async fn listing_excludes_itself() {
        let catalog = default_catalog();
        let out = catalog
            .resolve("list_tools")
            .unwrap()
            .invoke(serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(out["count"], 2);
    }
}
