use crate::backtester::{Backtester, SimulationOutcome};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::market_data::{fetch_window, MarketDataSource};
use crate::parameters::{ParameterResolver, ParameterSource, ResolvedParameters};
use crate::performance::{PerformanceCalculator, PerformanceSummary};
use crate::results::ResultStore;
use crate::strategy::{create_strategy, strategy_parameter_specs};
use log::info;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestReport {
    pub run_id: Uuid,
    pub strategy: String,
    pub symbol: String,
    pub timeframe: String,
    pub bar_count: usize,
    #[serde(skip)]
    pub outcome: SimulationOutcome,
    pub summary: PerformanceSummary,
}

/// Fetch, signal, simulate and publish for one run.
///
/// Parameters are a snapshot taken before the run starts. Results are only
/// published once every earlier step has succeeded.
#[derive(Clone)]
pub struct BacktestEngine {
    market_data: Arc<dyn MarketDataSource>,
    results: ResultStore,
    fetch_timeout: Duration,
}

impl BacktestEngine {
    pub fn new(
        market_data: Arc<dyn MarketDataSource>,
        results: ResultStore,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            market_data,
            results,
            fetch_timeout,
        }
    }

    pub fn results(&self) -> &ResultStore {
        &self.results
    }

    /// Resolves parameters for `template_id` from `source`, then runs.
    /// Resolution failures happen before any market data is requested.
    pub async fn resolve_and_run(
        &self,
        resolver: &ParameterResolver<'_>,
        scope: &str,
        source: &ParameterSource,
        template_id: &str,
    ) -> Result<BacktestReport, EngineError> {
        let specs = strategy_parameter_specs(template_id)?;
        let parameters = resolver.resolve(scope, source, &specs)?;
        self.run(template_id, &parameters).await
    }

    pub async fn run(
        &self,
        template_id: &str,
        parameters: &ResolvedParameters,
    ) -> Result<BacktestReport, EngineError> {
        let started = Instant::now();
        let run_id = Uuid::new_v4();
        let strategy = create_strategy(template_id, parameters)?;
        let config = EngineConfig::from_parameters(parameters)?;

        let bars = fetch_window(
            self.market_data.as_ref(),
            &config.bar_request,
            self.fetch_timeout,
        )
        .await?;
        let signals = strategy.generate_signals(&bars)?;
        let outcome = Backtester::new(config.initial_capital).run(&bars, &signals)?;
        let summary = PerformanceCalculator::summarize(&outcome);

        self.results.publish(&outcome.equity, &outcome.trades)?;

        info!(
            "Run {} ({} on {} {}): {} bars, {} closed trades, realized P&L {:.4}, final capital {:.4} in {:.2}s",
            run_id,
            strategy.template_id(),
            config.bar_request.symbol,
            config.bar_request.timeframe,
            bars.len(),
            summary.closed_trades,
            summary.realized_pnl,
            summary.final_capital,
            started.elapsed().as_secs_f64()
        );

        Ok(BacktestReport {
            run_id,
            strategy: strategy.template_id().to_string(),
            symbol: config.bar_request.symbol,
            timeframe: config.bar_request.timeframe,
            bar_count: bars.len(),
            outcome,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BarRequest, Candle};
    use crate::parameters::resolve_bag;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedBars {
        closes: Vec<f64>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MarketDataSource for FixedBars {
        fn describe(&self) -> String {
            "fixed".to_string()
        }

        async fn fetch_bars(&self, request: &BarRequest) -> Result<Vec<Candle>, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
            let bars = self
                .closes
                .iter()
                .enumerate()
                .map(|(idx, &close)| Candle {
                    time: start + ChronoDuration::minutes(idx as i64),
                    open: close,
                    high: close,
                    low: close,
                    close,
                    volume: 1.0,
                })
                .collect();
            Ok(crate::candle_utils::tail_window(bars, request.limit))
        }
    }

    fn engine(closes: Vec<f64>, dir: &std::path::Path) -> (BacktestEngine, Arc<FixedBars>) {
        let source = Arc::new(FixedBars {
            closes,
            calls: AtomicUsize::new(0),
        });
        let engine = BacktestEngine::new(
            source.clone(),
            ResultStore::new(dir),
            Duration::from_secs(5),
        );
        (engine, source)
    }

    fn parameters(bag: serde_json::Value) -> ResolvedParameters {
        let specs = strategy_parameter_specs("ema_cross").unwrap();
        resolve_bag(bag.as_object().unwrap(), &specs).unwrap()
    }

    #[tokio::test]
    async fn run_publishes_ledger_matching_report() {
        let dir = tempfile::tempdir().unwrap();
        let mut closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        closes.extend((0..20).map(|i| 119.0 - 3.0 * (i + 1) as f64));
        let (engine, source) = engine(closes, dir.path());

        let report = engine
            .run("ema_cross", &parameters(json!({"ema_fast": 2, "ema_slow": 6})))
            .await
            .unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.bar_count, 40);
        assert_eq!(report.symbol, "BTCUSDT");
        assert_eq!(report.outcome.equity.len(), 39);
        assert_eq!(report.summary.closed_trades, 1);

        let trades = engine.results().trades_document().unwrap();
        assert_eq!(trades.as_array().unwrap().len(), report.outcome.trades.len());
        assert_eq!(trades[0]["type"], "buy");
        assert_eq!(trades[1]["type"], "sell");
        let equity = engine.results().equity_document().unwrap();
        assert_eq!(equity.as_array().unwrap().len(), 39);
    }

    #[tokio::test]
    async fn limit_bounds_the_window() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine((0..50).map(|i| 10.0 + i as f64).collect(), dir.path());
        let report = engine
            .run(
                "ema_cross",
                &parameters(json!({"ema_fast": 3, "ema_slow": 5, "limit": 10})),
            )
            .await
            .unwrap();
        assert_eq!(report.bar_count, 10);
    }

    #[tokio::test]
    async fn failed_run_publishes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine(Vec::new(), dir.path());
        let result = engine
            .run("ema_cross", &parameters(json!({"ema_fast": 3, "ema_slow": 5})))
            .await;
        assert!(matches!(result, Err(EngineError::UpstreamFailure(_))));
        assert!(!engine.results().equity_path().exists());
        assert!(!engine.results().trades_path().exists());
    }
}
