use crate::commands::print_json;
use crate::context::{AppContext, RunnerSelection};
use crate::parameters::ParameterSource;
use crate::runner::RunRequest;
use crate::strategy::strategy_parameter_specs;
use anyhow::Result;
use log::info;

pub async fn run(
    app: &AppContext,
    scope: &str,
    source: ParameterSource,
    template_id: &str,
    selection: RunnerSelection,
) -> Result<()> {
    let specs = strategy_parameter_specs(template_id)?;
    let parameters = app.resolver().resolve(scope, &source, &specs)?;
    info!(
        "Resolved {} parameter(s) for {} in scope `{}` from {:?}",
        parameters.len(),
        template_id,
        scope,
        source
    );

    let runner = app.runner(&selection)?;
    let response = runner
        .run(&RunRequest {
            strategy: template_id.to_string(),
            parameters,
        })
        .await?;
    print_json(&response)
}
