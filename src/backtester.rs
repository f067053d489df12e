use crate::error::EngineError;
use crate::models::{Candle, EquityPoint, SignalPoint, TradeRecord, TradeSide};
use crate::parameters::DEFAULT_INITIAL_CAPITAL;
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
enum PositionState {
    Flat,
    Long { entry_price: f64 },
}

/// Trade ledger and equity curve of one simulation run.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationOutcome {
    pub trades: Vec<TradeRecord>,
    pub equity: Vec<EquityPoint>,
    pub initial_capital: f64,
    pub final_capital: f64,
    /// Entry price of a long position still open at the last bar.
    pub open_entry: Option<f64>,
}

/// Flat/long state machine over a price series and its aligned signals.
///
/// Buys at the close of the bar where the position flag turns on, sells at
/// the close of the bar where it turns off. Only realized P&L reaches the
/// equity curve, and an open position at the end is left open.
#[derive(Debug, Clone)]
pub struct Backtester {
    initial_capital: f64,
}

impl Default for Backtester {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_CAPITAL)
    }
}

impl Backtester {
    pub fn new(initial_capital: f64) -> Self {
        Self { initial_capital }
    }

    pub fn run(
        &self,
        bars: &[Candle],
        signals: &[SignalPoint],
    ) -> Result<SimulationOutcome, EngineError> {
        if bars.len() != signals.len() {
            return Err(EngineError::SeriesMismatch {
                bars: bars.len(),
                signals: signals.len(),
            });
        }

        let mut state = PositionState::Flat;
        let mut capital = self.initial_capital;
        let mut trades = Vec::new();
        let mut equity = Vec::with_capacity(bars.len().saturating_sub(1));

        // The seed bar has no prior state to transition from.
        for (bar, signal) in bars.iter().zip(signals).skip(1) {
            match (state, signal.is_long()) {
                (PositionState::Flat, true) => {
                    trades.push(TradeRecord {
                        date: bar.time,
                        side: TradeSide::Buy,
                        price: bar.close,
                        pnl: 0.0,
                    });
                    state = PositionState::Long {
                        entry_price: bar.close,
                    };
                }
                (PositionState::Long { entry_price }, false) => {
                    let pnl = bar.close - entry_price;
                    capital += pnl;
                    trades.push(TradeRecord {
                        date: bar.time,
                        side: TradeSide::Sell,
                        price: bar.close,
                        pnl,
                    });
                    state = PositionState::Flat;
                }
                _ => {}
            }

            equity.push(EquityPoint {
                time: bar.time,
                value: capital,
            });
        }

        let open_entry = match state {
            PositionState::Long { entry_price } => Some(entry_price),
            PositionState::Flat => None,
        };

        debug!(
            "Simulated {} bars: {} trades, final capital {:.4}{}",
            bars.len(),
            trades.len(),
            capital,
            if open_entry.is_some() {
                " (position left open)"
            } else {
                ""
            }
        );

        Ok(SimulationOutcome {
            trades,
            equity,
            initial_capital: self.initial_capital,
            final_capital: capital,
            open_entry,
        })
    }
}
