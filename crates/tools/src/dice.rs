//! Dice roller — `roll_dice {num_dice, num_faces}` → `{rolls, total}`.

use async_trait::async_trait;
use grimoire_core::error::ToolError;
use grimoire_core::tool::Tool;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

/// Largest pool a single call may roll.
const MAX_DICE: u64 = 1000;
/// Largest die. With `MAX_DICE` this keeps the total far below `u64::MAX`.
const MAX_FACES: u64 = 1000;

pub struct RollDiceTool {
    rng: Mutex<StdRng>,
}

impl RollDiceTool {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Deterministic rolls, for tests and replays.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn roll(&self, num_dice: u64, num_faces: u64) -> Result<Vec<u64>, ToolError> {
        let mut rng = self.rng.lock().map_err(|e| ToolError::ExecutionFailed {
            tool_name: "roll_dice".into(),
            reason: e.to_string(),
        })?;
        Ok((0..num_dice).map(|_| rng.random_range(1..=num_faces)).collect())
    }
}

impl Default for RollDiceTool {
    fn default() -> Self {
        Self::new()
    }
}

fn positive_count(input: &serde_json::Value, field: &str) -> Result<u64, ToolError> {
    let value = input
        .get(field)
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{field}' argument")))?;
    // Small models sometimes send numbers as strings or floats
    let n = value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64))
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .ok_or_else(|| {
            ToolError::InvalidArguments(format!("'{field}' must be a whole number, got {value}"))
        })?;
    if n == 0 {
        return Err(ToolError::InvalidArguments(format!("'{field}' must be at least 1")));
    }
    Ok(n)
}

#[async_trait]
impl Tool for RollDiceTool {
    fn name(&self) -> &str {
        "roll_dice"
    }

    fn description(&self) -> &str {
        "Roll n dice with n faces each"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "num_dice": {
                    "type": "integer",
                    "description": "How many dice to roll",
                    "minimum": 1,
                    "maximum": MAX_DICE
                },
                "num_faces": {
                    "type": "integer",
                    "description": "How many faces each die has",
                    "minimum": 1,
                    "maximum": MAX_FACES
                }
            },
            "required": ["num_dice", "num_faces"]
        })
    }

    async fn invoke(&self, input: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let num_dice = positive_count(&input, "num_dice")?;
        let num_faces = positive_count(&input, "num_faces")?;
        if num_dice > MAX_DICE {
            return Err(ToolError::InvalidArguments(format!(
                "cannot roll more than {MAX_DICE} dice at once"
            )));
        }
        if num_faces > MAX_FACES {
            return Err(ToolError::InvalidArguments(format!(
                "a die cannot have more than {MAX_FACES} faces"
            )));
        }

        let rolls = self.roll(num_dice, num_faces)?;
        let total = rolls
            .iter()
            .try_fold(0u64, |acc, r| acc.checked_add(*r))
            .ok_or_else(|| ToolError::InvalidArguments("dice total overflows".into()))?;
        Ok(serde_json::json!({ "rolls": rolls, "total": total }))
    }
}
