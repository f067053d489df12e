use crate::commands::print_json;
use crate::context::AppContext;
use anyhow::Result;

pub fn equity(app: &AppContext) -> Result<()> {
    print_json(&app.results().equity_document()?)
}

pub fn trades(app: &AppContext) -> Result<()> {
    print_json(&app.results().trades_document()?)
}
