use crate::commands::print_json;
use crate::context::AppContext;
use crate::parameters::bag_from_input;
use anyhow::Result;
use serde_json::{json, Value};

pub fn tree(app: &AppContext) -> Result<()> {
    print_json(&app.presets().list_tree())
}

pub fn load(app: &AppContext, path: &str) -> Result<()> {
    let document = app.presets().load_file(path)?;
    print_json(&document.unwrap_or(Value::Null))
}

pub fn save(app: &AppContext, path: &str, inputs: Option<Value>) -> Result<()> {
    let bag = bag_from_input(inputs.unwrap_or(Value::Null))?;
    app.presets().save_file(path, bag)?;
    print_json(&json!({ "saved": path }))
}

pub fn delete(app: &AppContext, path: &str) -> Result<()> {
    let deleted = app.presets().delete_file(path)?;
    print_json(&json!({ "path": path, "deleted": deleted }))
}
