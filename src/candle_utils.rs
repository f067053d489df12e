use crate::error::EngineError;
use crate::models::Candle;

/// Normalizes a symbol string by trimming whitespace and uppercasing.
pub fn normalize_symbol(value: &str) -> Option<String> {
    let normalized = value.trim().to_uppercase();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Checks that a fetched window is usable: non-empty, finite closes and
/// strictly increasing timestamps.
pub fn validate_bar_sequence(candles: &[Candle]) -> Result<(), EngineError> {
    if candles.is_empty() {
        return Err(EngineError::UpstreamFailure(
            "market data window is empty".to_string(),
        ));
    }

    if let Some(bad) = candles.iter().find(|c| !c.close.is_finite()) {
        return Err(EngineError::UpstreamFailure(format!(
            "non-finite close price at {}",
            bad.time
        )));
    }

    if let Some(pair) = candles.windows(2).find(|pair| pair[1].time <= pair[0].time) {
        return Err(EngineError::UpstreamFailure(format!(
            "bar timestamps are not strictly increasing ({} followed by {})",
            pair[0].time, pair[1].time
        )));
    }

    Ok(())
}

/// Keeps the most recent `limit` bars.
pub fn tail_window(mut candles: Vec<Candle>, limit: usize) -> Vec<Candle> {
    if candles.len() > limit {
        candles.drain(..candles.len() - limit);
    }
    candles
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn candle(offset_minutes: i64, close: f64) -> Candle {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Candle {
            time: base + Duration::minutes(offset_minutes),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn normalizes_symbols() {
        assert_eq!(normalize_symbol(" btcusdt "), Some("BTCUSDT".to_string()));
        assert_eq!(normalize_symbol("   "), None);
    }

    #[test]
    fn rejects_unordered_or_duplicate_timestamps() {
        assert!(validate_bar_sequence(&[candle(0, 1.0), candle(1, 2.0)]).is_ok());
        assert!(validate_bar_sequence(&[candle(1, 1.0), candle(1, 2.0)]).is_err());
        assert!(validate_bar_sequence(&[candle(2, 1.0), candle(1, 2.0)]).is_err());
        assert!(validate_bar_sequence(&[]).is_err());
        assert!(validate_bar_sequence(&[candle(0, f64::NAN)]).is_err());
    }

    #[test]
    fn tail_window_keeps_latest_bars() {
        let candles: Vec<Candle> = (0..5).map(|i| candle(i, i as f64)).collect();
        let tail = tail_window(candles, 2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].close, 3.0);
        assert_eq!(tail[1].close, 4.0);
    }
}
