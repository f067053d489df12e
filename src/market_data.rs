use crate::candle_utils::{tail_window, validate_bar_sequence};
use crate::error::EngineError;
use crate::models::{BarRequest, Candle};
use crate::retry::retry_fetch_operation;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use log::{debug, info};
use serde_json::Value;
use std::path::PathBuf;
use std::time::{Duration, Instant};

pub const KLINES_PATH: &str = "/fapi/v1/klines";

#[async_trait]
pub trait MarketDataSource: Send + Sync {
    fn describe(&self) -> String;

    async fn fetch_bars(&self, request: &BarRequest) -> Result<Vec<Candle>, EngineError>;
}

/// Fetches a bar window bounded by `timeout` and checks it before use.
///
/// A timeout, a transport failure or an unusable window all surface as
/// `UpstreamFailure`, which aborts the run before anything is published.
pub async fn fetch_window(
    source: &dyn MarketDataSource,
    request: &BarRequest,
    timeout: Duration,
) -> Result<Vec<Candle>, EngineError> {
    let started = Instant::now();
    info!(
        "Fetching {} {} bars (limit {}) from {}",
        request.symbol,
        request.timeframe,
        request.limit,
        source.describe()
    );

    let bars = tokio::time::timeout(timeout, source.fetch_bars(request))
        .await
        .map_err(|_| {
            EngineError::UpstreamFailure(format!(
                "timed out after {}s fetching {} {} from {}",
                timeout.as_secs_f64(),
                request.symbol,
                request.timeframe,
                source.describe()
            ))
        })??;

    validate_bar_sequence(&bars)?;
    info!(
        "Fetched {} bars for {} in {:.2}s",
        bars.len(),
        request.symbol,
        started.elapsed().as_secs_f64()
    );
    Ok(bars)
}

pub fn build_async_client(timeout: Option<Duration>) -> Result<reqwest::Client, EngineError> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder
        .build()
        .map_err(|err| EngineError::UpstreamFailure(format!("failed to build HTTP client: {}", err)))
}

/// Futures klines endpoint client.
pub struct BinanceKlinesClient {
    client: reqwest::Client,
    base_url: String,
}

impl BinanceKlinesClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, EngineError> {
        Ok(Self {
            client: build_async_client(Some(request_timeout))?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn fetch_once(&self, request: &BarRequest) -> Result<Vec<Candle>, EngineError> {
        let url = format!("{}{}", self.base_url, KLINES_PATH);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("symbol", request.symbol.as_str()),
                ("interval", request.timeframe.as_str()),
                ("limit", request.limit.to_string().as_str()),
            ])
            .send()
            .await
            .map_err(|err| upstream(&url, err))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::UpstreamFailure(format!(
                "{} returned {}: {}",
                url,
                status,
                body.trim()
            )));
        }

        let rows: Vec<Vec<Value>> = response.json().await.map_err(|err| upstream(&url, err))?;
        debug!("Received {} kline rows from {}", rows.len(), url);
        rows.iter().map(|row| parse_kline_row(row)).collect()
    }
}

#[async_trait]
impl MarketDataSource for BinanceKlinesClient {
    fn describe(&self) -> String {
        self.base_url.clone()
    }

    async fn fetch_bars(&self, request: &BarRequest) -> Result<Vec<Candle>, EngineError> {
        retry_fetch_operation!(
            format!("klines {} {}", request.symbol, request.timeframe),
            self.fetch_once(request)
        )
    }
}

/// Bars read from a local JSON snapshot (`[{time, open, high, low, close, volume}]`).
pub struct SnapshotMarketData {
    path: PathBuf,
}

impl SnapshotMarketData {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl MarketDataSource for SnapshotMarketData {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn fetch_bars(&self, request: &BarRequest) -> Result<Vec<Candle>, EngineError> {
        let text = tokio::fs::read_to_string(&self.path).await.map_err(|err| {
            EngineError::UpstreamFailure(format!(
                "failed to read snapshot {}: {}",
                self.path.display(),
                err
            ))
        })?;
        let candles: Vec<Candle> = serde_json::from_str(&text).map_err(|err| {
            EngineError::UpstreamFailure(format!(
                "snapshot {} is not a bar array: {}",
                self.path.display(),
                err
            ))
        })?;
        Ok(tail_window(candles, request.limit))
    }
}

/// Parses one `[openTime, open, high, low, close, volume, ...]` row.
pub fn parse_kline_row(row: &[Value]) -> Result<Candle, EngineError> {
    if row.len() < 6 {
        return Err(EngineError::UpstreamFailure(format!(
            "kline row has {} fields, expected at least 6",
            row.len()
        )));
    }

    let open_time = row[0]
        .as_i64()
        .or_else(|| row[0].as_str().and_then(|text| text.parse().ok()))
        .ok_or_else(|| EngineError::UpstreamFailure(format!("invalid kline open time {}", row[0])))?;
    let time = Utc
        .timestamp_millis_opt(open_time)
        .single()
        .ok_or_else(|| EngineError::UpstreamFailure(format!("kline open time {} out of range", open_time)))?;

    Ok(Candle {
        time,
        open: field_f64(&row[1], "open")?,
        high: field_f64(&row[2], "high")?,
        low: field_f64(&row[3], "low")?,
        close: field_f64(&row[4], "close")?,
        volume: field_f64(&row[5], "volume")?,
    })
}

fn field_f64(value: &Value, field: &str) -> Result<f64, EngineError> {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| EngineError::UpstreamFailure(format!("invalid kline {} value {}", field, value)))
}

fn upstream(url: &str, err: reqwest::Error) -> EngineError {
    EngineError::UpstreamFailure(format!("request to {} failed: {}", url, err))
}
