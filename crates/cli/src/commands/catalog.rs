//! `grimoire catalog` — List the tools an NPC can use.

use std::path::Path;

use super::{CmdResult, build_catalog, load_config};

pub async fn run(config: Option<&Path>, remote: Option<&str>) -> CmdResult {
    let config = load_config(config)?;
    let catalog = build_catalog(&config, remote).await?;

    println!("Tools ({}):", catalog.len());
    for descriptor in catalog.descriptors() {
        println!("  {:<28} {}", descriptor.name, descriptor.description);
        if let Some(properties) = descriptor.input_schema["properties"].as_object() {
            for (name, schema) in properties {
                let kind = schema["type"].as_str().unwrap_or("any");
                println!("      {name}: {kind}");
            }
        }
    }
    Ok(())
}
