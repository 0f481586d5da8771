//! `grimoire init` — Print or write the default configuration.

use grimoire_config::AppConfig;
use std::path::Path;

use super::{CmdResult, config_path};

pub fn run(config: Option<&Path>, write: bool) -> CmdResult {
    let default_toml = AppConfig::default_toml();
    if !write {
        print!("{default_toml}");
        return Ok(());
    }

    let path = config_path(config);
    if path.exists() {
        println!("Config already exists at: {}", path.display());
        println!("Edit it manually or delete it and re-run init.");
        return Ok(());
    }

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(&path, &default_toml)?;
    println!("Created config at: {}", path.display());
    println!("Next: run `grimoire chat` and say hello.");
    Ok(())
}
