use crate::error::EngineError;
use crate::models::{Candle, SignalPoint};
use crate::parameters::{ParameterKind, ParameterSpec, ResolvedParameters};
use crate::signals::generate_crossover_signals;

pub const TEMPLATE_ID: &str = "ema_cross";

pub struct EmaCrossStrategy {
    pub template_id: String,
    fast_span: usize,
    slow_span: usize,
}

impl EmaCrossStrategy {
    pub fn new(parameters: &ResolvedParameters) -> Result<Self, EngineError> {
        let fast_span = parameters.positive_integer("ema_fast")?;
        let slow_span = parameters.positive_integer("ema_slow")?;
        Ok(Self {
            template_id: TEMPLATE_ID.to_string(),
            fast_span,
            slow_span,
        })
    }

    pub fn parameter_specs() -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::required("ema_fast", ParameterKind::PositiveInteger),
            ParameterSpec::required("ema_slow", ParameterKind::PositiveInteger),
        ]
    }
}

impl super::Strategy for EmaCrossStrategy {
    fn template_id(&self) -> &str {
        &self.template_id
    }

    fn generate_signals(&self, candles: &[Candle]) -> Result<Vec<SignalPoint>, EngineError> {
        generate_crossover_signals(candles, self.fast_span, self.slow_span)
    }
}
