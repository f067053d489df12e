pub mod backtester;
pub mod candle_utils;
pub mod commands;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod market_data;
pub mod models;
pub mod parameters;
pub mod performance;
pub mod preset_name;
pub mod preset_store;
pub mod results;
pub(crate) mod retry;
pub mod runner;
pub mod signals;
pub mod strategy;

pub use error::{EngineError, ErrorKind, FailureReport};
