use crate::error::EngineError;
use crate::indicators::calculate_ema;
use crate::models::{Candle, SignalPoint};

/// Builds the fast/slow EMA crossover series over closing prices.
///
/// `position` is 1 exactly when the fast EMA is strictly above the slow one,
/// including on the seed bar where both equal the first close (so it is 0).
pub fn generate_crossover_signals(
    candles: &[Candle],
    fast_span: usize,
    slow_span: usize,
) -> Result<Vec<SignalPoint>, EngineError> {
    if fast_span == 0 {
        return Err(EngineError::invalid_parameter(
            "ema_fast",
            "span must be positive",
        ));
    }
    if slow_span == 0 {
        return Err(EngineError::invalid_parameter(
            "ema_slow",
            "span must be positive",
        ));
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let fast = calculate_ema(&closes, fast_span);
    let slow = calculate_ema(&closes, slow_span);

    Ok(candles
        .iter()
        .zip(fast.into_iter().zip(slow))
        .map(|(candle, (ema_fast, ema_slow))| SignalPoint {
            time: candle.time,
            ema_fast,
            ema_slow,
            position: u8::from(ema_fast > ema_slow),
        })
        .collect())
}
