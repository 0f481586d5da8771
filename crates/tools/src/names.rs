//! Character name generator — `generate_character_name {race}` → `{name, race}`.

use async_trait::async_trait;
use grimoire_core::error::ToolError;
use grimoire_core::tool::Tool;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

const ELF: &[&str] = &[
    "Aerdrie", "Ahvonna", "Aramil", "Aranea", "Berrian", "Caelynn", "Carric", "Dayereth", "Enna",
    "Galinndan",
];
const DWARF: &[&str] = &[
    "Adrik", "Baern", "Darrak", "Eberk", "Fargrim", "Gardain", "Harbek", "Kildrak", "Morgran",
    "Thorek",
];
const HUMAN: &[&str] = &[
    "Aerdrie", "Aramil", "Berris", "Cithreth", "Dayereth", "Enna", "Galinndan", "Hadarai",
    "Immeral", "Lamlis",
];
const HALFLING: &[&str] = &[
    "Alton", "Ander", "Bernie", "Bobbin", "Cade", "Callus", "Corrin", "Dannad", "Garret", "Lindal",
];
const ORC: &[&str] = &[
    "Gash", "Gell", "Henk", "Holg", "Imsh", "Keth", "Krusk", "Mhurren", "Ront", "Shump",
];
const TIEFLING: &[&str] = &[
    "Akmenos", "Amnon", "Barakas", "Damakos", "Ekemon", "Iados", "Kairon", "Leucis", "Melech",
    "Mordai",
];

/// Name table for a race; unknown races use human names.
pub fn names_for(race: &str) -> &'static [&'static str] {
    match race.trim().to_lowercase().as_str() {
        "elf" => ELF,
        "dwarf" => DWARF,
        "halfling" => HALFLING,
        "orc" => ORC,
        "tiefling" => TIEFLING,
        _ => HUMAN,
    }
}

pub struct CharacterNameTool {
    rng: Mutex<StdRng>,
}

impl CharacterNameTool {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for CharacterNameTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for CharacterNameTool {
    fn name(&self) -> &str {
        "generate_character_name"
    }

    fn description(&self) -> &str {
        "Generate a D&D character name for a specific race"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "race": {
                    "type": "string",
                    "description": "The character's race: elf, dwarf, human, halfling, orc or tiefling"
                }
            },
            "required": ["race"]
        })
    }

    async fn invoke(&self, input: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let race = input["race"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'race' argument".into()))?;

        let names = names_for(race);
        let index = {
            let mut rng = self.rng.lock().map_err(|e| ToolError::ExecutionFailed {
                tool_name: "generate_character_name".into(),
                reason: e.to_string(),
            })?;
            rng.random_range(0..names.len())
        };

        Ok(serde_json::json!({ "name": names[index], "race": race }))
    }
}
