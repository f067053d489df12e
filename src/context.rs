use crate::config::EngineSettings;
use crate::engine::BacktestEngine;
use crate::market_data::{BinanceKlinesClient, MarketDataSource, SnapshotMarketData};
use crate::parameters::ParameterResolver;
use crate::preset_store::PresetStore;
use crate::results::ResultStore;
use crate::runner::{InProcessRunner, ProcessRunner, StrategyRunner};
use anyhow::{Context, Result};
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// How a backtest is executed.
#[derive(Debug, Clone)]
pub enum RunnerSelection {
    InProcess { data_file: Option<PathBuf> },
    Process { program: PathBuf, args: Vec<String> },
}

impl RunnerSelection {
    /// Process runner whose unit receives `--data-file <path>` after `args`
    /// when a snapshot is given.
    pub fn process(program: PathBuf, mut args: Vec<String>, data_file: Option<PathBuf>) -> Self {
        if let Some(path) = data_file {
            args.push("--data-file".to_string());
            args.push(path.to_string_lossy().into_owned());
        }
        RunnerSelection::Process { program, args }
    }
}

#[derive(Clone)]
pub struct AppContext {
    settings: EngineSettings,
    presets: PresetStore,
    results: ResultStore,
}

impl AppContext {
    pub fn initialize(settings: EngineSettings) -> Self {
        let presets = PresetStore::new(&settings.strategies_dir, &settings.presets_dir);
        let results = ResultStore::new(&settings.results_dir);
        Self {
            settings,
            presets,
            results,
        }
    }

    pub fn presets(&self) -> &PresetStore {
        &self.presets
    }

    pub fn results(&self) -> &ResultStore {
        &self.results
    }

    pub fn resolver(&self) -> ParameterResolver<'_> {
        ParameterResolver::new(&self.presets)
    }

    /// Local snapshot when `data_file` is given, the configured exchange otherwise.
    pub fn market_data(&self, data_file: Option<&Path>) -> Result<Arc<dyn MarketDataSource>> {
        match data_file {
            Some(path) => {
                info!("Using market data snapshot {}", path.display());
                Ok(Arc::new(SnapshotMarketData::new(path)))
            }
            None => {
                let client = BinanceKlinesClient::new(
                    &self.settings.market_data_base_url,
                    self.settings.fetch_timeout,
                )
                .context("failed to create market data client")?;
                Ok(Arc::new(client))
            }
        }
    }

    pub fn engine(&self, data_file: Option<&Path>) -> Result<BacktestEngine> {
        Ok(BacktestEngine::new(
            self.market_data(data_file)?,
            self.results.clone(),
            self.settings.fetch_timeout,
        ))
    }

    pub fn runner(&self, selection: &RunnerSelection) -> Result<Box<dyn StrategyRunner>> {
        match selection {
            RunnerSelection::InProcess { data_file } => Ok(Box::new(InProcessRunner::new(
                self.engine(data_file.as_deref())?,
            ))),
            RunnerSelection::Process { program, args } => Ok(Box::new(ProcessRunner::new(
                program.clone(),
                args.clone(),
                self.results.clone(),
                self.settings.runner_timeout,
            ))),
        }
    }
}
