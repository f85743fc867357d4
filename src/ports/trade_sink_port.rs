//! Append-only sink for trade records and per-bot log lines.

use crate::domain::error::TradescriptError;
use crate::domain::position::TradeRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    pub time: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

pub trait TradeSinkPort: Send + Sync {
    fn record_trade(&self, trade: &TradeRecord) -> Result<(), TradescriptError>;
    fn record_log(&self, bot_id: &str, line: &LogLine) -> Result<(), TradescriptError>;
}
