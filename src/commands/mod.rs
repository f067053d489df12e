pub mod backtest;
pub mod files;
pub mod presets;
pub mod results;
pub mod run_stdin;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;

/// Parameter bag given inline (`--inputs`) or as a file (`--inputs-file`).
pub fn read_inputs(inline: Option<&str>, file: Option<&Path>) -> Result<Option<Value>> {
    match (inline, file) {
        (Some(_), Some(_)) => Err(anyhow!("use either --inputs or --inputs-file, not both")),
        (Some(raw), None) => serde_json::from_str(raw)
            .map(Some)
            .context("--inputs is not valid JSON"),
        (None, Some(path)) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&text)
                .map(Some)
                .with_context(|| format!("{} is not valid JSON", path.display()))
        }
        (None, None) => Ok(None),
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
