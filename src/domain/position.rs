//! Open positions, trade records, and signals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A directional instruction produced by one strategy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Buy,
    Sell,
}

impl Signal {
    /// The position side this signal opens.
    pub fn side(self) -> Side {
        match self {
            Signal::Buy => Side::Long,
            Signal::Sell => Side::Short,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    fn direction(self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => f.write_str("long"),
            Side::Short => f.write_str("short"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub side: Side,
    pub entry_price: f64,
    pub quantity: f64,
    pub entry_time: DateTime<Utc>,
    /// Highest price seen since entry for longs, lowest for shorts.
    pub best_price: f64,
    pub broker_order_id: Option<String>,
}

impl Position {
    pub fn open(side: Side, entry_price: f64, quantity: f64, entry_time: DateTime<Utc>) -> Self {
        Self {
            side,
            entry_price,
            quantity,
            entry_time,
            best_price: entry_price,
            broker_order_id: None,
        }
    }

    pub fn with_broker_order(mut self, order_id: impl Into<String>) -> Self {
        self.broker_order_id = Some(order_id.into());
        self
    }

    pub fn is_long(&self) -> bool {
        self.side == Side::Long
    }

    /// Ratchet the best favorable price.
    pub fn observe(&mut self, price: f64) {
        match self.side {
            Side::Long if price > self.best_price => self.best_price = price,
            Side::Short if price < self.best_price => self.best_price = price,
            _ => {}
        }
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.side.direction() * (price - self.entry_price) * self.quantity
    }

    /// Favorable move from entry to `price`, in percent.
    pub fn favorable_move_pct(&self, price: f64) -> f64 {
        if self.entry_price == 0.0 {
            return 0.0;
        }
        self.side.direction() * (price - self.entry_price) / self.entry_price * 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeReason {
    Entry,
    Signal,
    StopLoss,
    TakeProfit,
    TrailingStop,
    EndOfData,
    ManualStop,
}

impl fmt::Display for TradeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TradeReason::Entry => "entry",
            TradeReason::Signal => "signal",
            TradeReason::StopLoss => "stop_loss",
            TradeReason::TakeProfit => "take_profit",
            TradeReason::TrailingStop => "trailing_stop",
            TradeReason::EndOfData => "end_of_data",
            TradeReason::ManualStop => "manual_stop",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Execution {
    Simulated,
    Real,
}

/// An emitted fill, never mutated after emission.
///
/// `side` is the side of the order that was filled: entering a long and
/// closing a short are both `Buy`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub bot_id: String,
    pub symbol: String,
    pub side: Signal,
    pub quantity: f64,
    pub price: f64,
    pub pnl: f64,
    pub reason: TradeReason,
    pub execution: Execution,
    pub timestamp: DateTime<Utc>,
}
