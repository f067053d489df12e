use crate::error::EngineError;
use crate::models::{Candle, SignalPoint};
use crate::parameters::{platform_parameter_specs, ParameterSpec, ResolvedParameters};

pub trait Strategy: Send + Sync {
    fn template_id(&self) -> &str;
    /// One signal point per bar, aligned with `candles`.
    fn generate_signals(&self, candles: &[Candle]) -> Result<Vec<SignalPoint>, EngineError>;
}

#[path = "strategies/ema_cross.rs"]
pub mod ema_cross;

pub use ema_cross::EmaCrossStrategy;

pub const DEFAULT_TEMPLATE_ID: &str = ema_cross::TEMPLATE_ID;

/// Platform inputs plus the strategy's own declared parameters.
pub fn strategy_parameter_specs(template_id: &str) -> Result<Vec<ParameterSpec>, EngineError> {
    let mut specs = platform_parameter_specs();
    match template_id {
        ema_cross::TEMPLATE_ID => specs.extend(EmaCrossStrategy::parameter_specs()),
        _ => return Err(unknown_template(template_id)),
    }
    Ok(specs)
}

pub fn create_strategy(
    template_id: &str,
    parameters: &ResolvedParameters,
) -> Result<Box<dyn Strategy>, EngineError> {
    match template_id {
        ema_cross::TEMPLATE_ID => Ok(Box::new(EmaCrossStrategy::new(parameters)?)),
        _ => Err(unknown_template(template_id)),
    }
}

fn unknown_template(template_id: &str) -> EngineError {
    EngineError::invalid_parameter(
        "strategy",
        format!("unknown strategy template `{}`", template_id),
    )
}
