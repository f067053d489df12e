use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV bar of a market data window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarRequest {
    pub symbol: String,
    pub timeframe: String,
    pub limit: usize,
}

/// Indicator values and the derived position flag for one bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalPoint {
    pub time: DateTime<Utc>,
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub position: u8,
}

impl SignalPoint {
    pub fn is_long(&self) -> bool {
        self.position == 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// Ledger entry in the shape of the trades results document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub date: DateTime<Utc>,
    #[serde(rename = "type")]
    pub side: TradeSide,
    pub price: f64,
    pub pnl: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub time: DateTime<Utc>,
    pub value: f64,
}
