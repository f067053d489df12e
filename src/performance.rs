use crate::backtester::SimulationOutcome;
use crate::models::{EquityPoint, TradeSide};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSummary {
    pub closed_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub realized_pnl: f64,
    pub initial_capital: f64,
    pub final_capital: f64,
    pub max_drawdown: f64,
    pub max_drawdown_percent: f64,
    pub position_open: bool,
}

struct DrawdownInfo {
    max_drawdown: f64,
    max_drawdown_percent: f64,
}

pub struct PerformanceCalculator;

impl PerformanceCalculator {
    pub fn summarize(outcome: &SimulationOutcome) -> PerformanceSummary {
        let sell_pnls: Vec<f64> = outcome
            .trades
            .iter()
            .filter(|trade| trade.side == TradeSide::Sell)
            .map(|trade| trade.pnl)
            .collect();

        let closed_trades = sell_pnls.len();
        let winning_trades = sell_pnls.iter().filter(|pnl| **pnl > 0.0).count();
        let losing_trades = sell_pnls.iter().filter(|pnl| **pnl < 0.0).count();
        let win_rate = if closed_trades > 0 {
            winning_trades as f64 / closed_trades as f64
        } else {
            0.0
        };

        let drawdown_info = Self::calculate_max_drawdown(outcome.initial_capital, &outcome.equity);

        PerformanceSummary {
            closed_trades,
            winning_trades,
            losing_trades,
            win_rate,
            realized_pnl: sell_pnls.iter().sum(),
            initial_capital: outcome.initial_capital,
            final_capital: outcome.final_capital,
            max_drawdown: drawdown_info.max_drawdown,
            max_drawdown_percent: drawdown_info.max_drawdown_percent,
            position_open: outcome.open_entry.is_some(),
        }
    }

    // Peak starts at the initial capital since the curve begins after the seed bar.
    fn calculate_max_drawdown(initial_capital: f64, equity: &[EquityPoint]) -> DrawdownInfo {
        let mut max_drawdown = 0.0;
        let mut max_drawdown_percent = 0.0;
        let mut peak_value = initial_capital;

        for point in equity {
            if point.value > peak_value {
                peak_value = point.value;
            } else {
                let drawdown = peak_value - point.value;
                let drawdown_percent = if peak_value > 0.0 {
                    (drawdown / peak_value) * 100.0
                } else {
                    0.0
                };

                if drawdown > max_drawdown {
                    max_drawdown = drawdown;
                }
                if drawdown_percent > max_drawdown_percent {
                    max_drawdown_percent = drawdown_percent;
                }
            }
        }

        DrawdownInfo {
            max_drawdown,
            max_drawdown_percent,
        }
    }
}
