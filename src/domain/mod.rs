//! Core domain types and logic: bars, indicators, the script language,
//! strategies, risk, and the backtester.

pub mod ohlcv;
pub mod timeframe;
pub mod position;
pub mod risk;
pub mod indicator;
pub mod script;
pub mod strategy;
pub mod evaluator;
pub mod backtest;
pub mod metrics;
pub mod bot;
pub mod config_validation;
pub mod error;
