use crate::commands::print_json;
use crate::context::AppContext;
use crate::parameters::bag_from_input;
use anyhow::Result;
use serde_json::{json, Value};

pub fn list(app: &AppContext, scope: &str) -> Result<()> {
    let names = app.presets().list(scope)?;
    print_json(&json!({ "scope": scope, "presets": names }))
}

/// Prints the bag, or `null` when the preset does not exist.
pub fn load(app: &AppContext, scope: &str, name: &str) -> Result<()> {
    let preset = app.presets().load(scope, name)?;
    print_json(&preset.map(Value::Object).unwrap_or(Value::Null))
}

pub fn active(app: &AppContext, scope: &str) -> Result<()> {
    match app.presets().active(scope)? {
        Some((name, bag)) => print_json(&json!({ "name": name, "inputs": bag })),
        None => print_json(&Value::Null),
    }
}

pub fn save(app: &AppContext, scope: &str, name: &str, inputs: Option<Value>) -> Result<()> {
    let bag = bag_from_input(inputs.unwrap_or(Value::Null))?;
    app.presets().save(scope, name, bag)?;
    print_json(&json!({ "saved": name, "scope": scope }))
}

pub fn delete(app: &AppContext, scope: &str, name: &str) -> Result<()> {
    let deleted = app.presets().delete(scope, name)?;
    print_json(&json!({ "scope": scope, "deleted": deleted }))
}
