//! Strategy descriptors: a built-in indicator rule or a custom script.
//!
//! A descriptor is fixed for the life of a bot session. Adding a built-in
//! kind means adding a [`BuiltInKind`] variant; the evaluator matches on it
//! exhaustively.

use crate::domain::risk::RiskConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltInKind {
    EmaCross,
    EmaCrossWithRsi,
    Rsi,
    MacdCross,
}

impl BuiltInKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BuiltInKind::EmaCross => "ema_cross",
            BuiltInKind::EmaCrossWithRsi => "ema_cross_with_rsi",
            BuiltInKind::Rsi => "rsi",
            BuiltInKind::MacdCross => "macd_cross",
        }
    }
}

impl fmt::Display for BuiltInKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuiltInKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ema_cross" => Ok(BuiltInKind::EmaCross),
            "ema_cross_with_rsi" => Ok(BuiltInKind::EmaCrossWithRsi),
            "rsi" => Ok(BuiltInKind::Rsi),
            "macd_cross" => Ok(BuiltInKind::MacdCross),
            other => Err(format!(
                "unknown strategy kind '{other}' (expected ema_cross, ema_cross_with_rsi, rsi, macd_cross, or script)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntryParams {
    pub fast_period: usize,
    pub slow_period: usize,
    pub rsi_period: usize,
    pub rsi_oversold: f64,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
}

impl Default for EntryParams {
    fn default() -> Self {
        Self {
            fast_period: 9,
            slow_period: 21,
            rsi_period: 14,
            rsi_oversold: 30.0,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExitParams {
    pub rsi_overbought: f64,
    pub risk: RiskConfig,
}

impl Default for ExitParams {
    fn default() -> Self {
        Self {
            rsi_overbought: 70.0,
            risk: RiskConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BuiltInStrategy {
    pub kind: BuiltInKind,
    pub entry: EntryParams,
    pub exit: ExitParams,
}

impl BuiltInStrategy {
    pub fn new(kind: BuiltInKind) -> Self {
        Self {
            kind,
            entry: EntryParams::default(),
            exit: ExitParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyDescriptor {
    BuiltIn(BuiltInStrategy),
    CustomScript { source: String },
}

impl StrategyDescriptor {
    pub fn script(source: impl Into<String>) -> Self {
        StrategyDescriptor::CustomScript {
            source: source.into(),
        }
    }

    /// Short human-readable name for logs.
    pub fn label(&self) -> &'static str {
        match self {
            StrategyDescriptor::BuiltIn(b) => b.kind.as_str(),
            StrategyDescriptor::CustomScript { .. } => "script",
        }
    }
}
