use crate::commands::print_json;
use crate::context::AppContext;
use crate::parameters::{bag_from_input, resolve_bag};
use crate::strategy::strategy_parameter_specs;
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Strategy-unit side of the process runner: one parameter object on stdin,
/// results documents written to the configured results location.
pub async fn run(app: &AppContext, template_id: &str, data_file: Option<&Path>) -> Result<()> {
    let mut raw = String::new();
    tokio::io::stdin()
        .read_to_string(&mut raw)
        .await
        .context("failed to read parameters from stdin")?;
    let input: Value = if raw.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&raw).context("stdin is not a JSON parameter object")?
    };

    let specs = strategy_parameter_specs(template_id)?;
    let parameters = resolve_bag(&bag_from_input(input)?, &specs)?;
    let report = app.engine(data_file)?.run(template_id, &parameters).await?;
    print_json(&report)
}
