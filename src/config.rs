use crate::error::EngineError;
use crate::models::BarRequest;
use crate::parameters::{
    ResolvedParameters, INITIAL_CAPITAL_PARAM, LIMIT_PARAM, SYMBOL_PARAM, TIMEFRAME_PARAM,
};
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_STRATEGIES_DIR: &str = "strategies";
pub const DEFAULT_PRESETS_DIR: &str = "presets";
pub const DEFAULT_RESULTS_DIR: &str = "data";
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_RUNNER_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_MARKET_DATA_BASE_URL: &str = "https://fapi.binance.com";

/// Process-level settings, read from the environment.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub strategies_dir: PathBuf,
    pub presets_dir: PathBuf,
    pub results_dir: PathBuf,
    pub fetch_timeout: Duration,
    pub runner_timeout: Duration,
    pub market_data_base_url: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            strategies_dir: PathBuf::from(DEFAULT_STRATEGIES_DIR),
            presets_dir: PathBuf::from(DEFAULT_PRESETS_DIR),
            results_dir: PathBuf::from(DEFAULT_RESULTS_DIR),
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            runner_timeout: Duration::from_secs(DEFAULT_RUNNER_TIMEOUT_SECS),
            market_data_base_url: DEFAULT_MARKET_DATA_BASE_URL.to_string(),
        }
    }
}

impl EngineSettings {
    pub fn from_env() -> Result<Self> {
        let settings: HashMap<String, String> = std::env::vars().collect();
        Self::from_settings_map(&settings)
    }

    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let strategies_dir = optional_setting(settings, "STRATEGIES_DIR")
            .unwrap_or(DEFAULT_STRATEGIES_DIR);
        let presets_dir = optional_setting(settings, "PRESETS_DIR").unwrap_or(DEFAULT_PRESETS_DIR);
        let results_dir = optional_setting(settings, "RESULTS_DIR").unwrap_or(DEFAULT_RESULTS_DIR);
        let fetch_timeout_secs =
            setting_u64_or(settings, "FETCH_TIMEOUT_SECS", DEFAULT_FETCH_TIMEOUT_SECS, 1)?;
        let runner_timeout_secs =
            setting_u64_or(settings, "RUNNER_TIMEOUT_SECS", DEFAULT_RUNNER_TIMEOUT_SECS, 1)?;
        let market_data_base_url = optional_setting(settings, "MARKET_DATA_BASE_URL")
            .unwrap_or(DEFAULT_MARKET_DATA_BASE_URL);

        if !market_data_base_url.starts_with("http://")
            && !market_data_base_url.starts_with("https://")
        {
            return Err(anyhow!(
                "MARKET_DATA_BASE_URL must be an http(s) URL (value: {})",
                market_data_base_url
            ));
        }

        Ok(Self {
            strategies_dir: PathBuf::from(strategies_dir),
            presets_dir: PathBuf::from(presets_dir),
            results_dir: PathBuf::from(results_dir),
            fetch_timeout: Duration::from_secs(fetch_timeout_secs),
            runner_timeout: Duration::from_secs(runner_timeout_secs),
            market_data_base_url: market_data_base_url.trim_end_matches('/').to_string(),
        })
    }
}

/// Per-run simulation and fetch settings taken from resolved parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub initial_capital: f64,
    pub bar_request: BarRequest,
}

impl EngineConfig {
    pub fn from_parameters(parameters: &ResolvedParameters) -> Result<Self, EngineError> {
        let initial_capital = parameters.number(INITIAL_CAPITAL_PARAM)?;
        if !initial_capital.is_finite() || initial_capital <= 0.0 {
            return Err(EngineError::invalid_parameter(
                INITIAL_CAPITAL_PARAM,
                format!("must be a positive number (value: {})", initial_capital),
            ));
        }

        Ok(Self {
            initial_capital,
            bar_request: BarRequest {
                symbol: parameters.text(SYMBOL_PARAM)?.to_string(),
                timeframe: parameters.text(TIMEFRAME_PARAM)?.to_string(),
                limit: parameters.positive_integer(LIMIT_PARAM)?,
            },
        })
    }
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn setting_u64_or(
    settings: &HashMap<String, String>,
    key: &str,
    default: u64,
    min: u64,
) -> Result<u64> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<u64>()
        .map_err(|_| anyhow!("Setting {} must be a non-negative integer (value: {})", key, raw))?;
    if value < min {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::{platform_parameter_specs, resolve_bag};
    use serde_json::json;

    fn settings(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let parsed = EngineSettings::from_settings_map(&HashMap::new()).unwrap();
        assert_eq!(parsed.strategies_dir, PathBuf::from("strategies"));
        assert_eq!(parsed.presets_dir, PathBuf::from("presets"));
        assert_eq!(parsed.results_dir, PathBuf::from("data"));
        assert_eq!(parsed.fetch_timeout, Duration::from_secs(30));
        assert_eq!(parsed.runner_timeout, Duration::from_secs(300));
        assert_eq!(parsed.market_data_base_url, "https://fapi.binance.com");
    }

    #[test]
    fn overrides_are_applied_and_validated() {
        let parsed = EngineSettings::from_settings_map(&settings(&[
            ("RESULTS_DIR", " /tmp/results "),
            ("FETCH_TIMEOUT_SECS", "5"),
            ("MARKET_DATA_BASE_URL", "http://localhost:8080/"),
        ]))
        .unwrap();
        assert_eq!(parsed.results_dir, PathBuf::from("/tmp/results"));
        assert_eq!(parsed.fetch_timeout, Duration::from_secs(5));
        assert_eq!(parsed.market_data_base_url, "http://localhost:8080");

        assert!(EngineSettings::from_settings_map(&settings(&[("FETCH_TIMEOUT_SECS", "0")])).is_err());
        assert!(EngineSettings::from_settings_map(&settings(&[("RUNNER_TIMEOUT_SECS", "soon")])).is_err());
        assert!(
            EngineSettings::from_settings_map(&settings(&[("MARKET_DATA_BASE_URL", "ftp://x")]))
                .is_err()
        );
    }

    #[test]
    fn engine_config_reads_platform_parameters() {
        let bag = json!({"symbol": "ethusdt", "limit": "250"});
        let resolved = resolve_bag(bag.as_object().unwrap(), &platform_parameter_specs()).unwrap();
        let config = EngineConfig::from_parameters(&resolved).unwrap();
        assert_eq!(config.initial_capital, 100.0);
        assert_eq!(config.bar_request.symbol, "ETHUSDT");
        assert_eq!(config.bar_request.timeframe, "1m");
        assert_eq!(config.bar_request.limit, 250);
    }

    #[test]
    fn non_positive_capital_is_rejected() {
        let bag = json!({"initial_capital": -5});
        let resolved = resolve_bag(bag.as_object().unwrap(), &platform_parameter_specs()).unwrap();
        assert!(matches!(
            EngineConfig::from_parameters(&resolved),
            Err(EngineError::InvalidParameter { .. })
        ));
    }
}
