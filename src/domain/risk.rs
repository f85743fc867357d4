//! Risk configuration and exit checks shared by backtesting and live trading.

use super::position::{Position, Side, TradeReason};
use serde::{Deserialize, Serialize};

pub const DEFAULT_STOP_LOSS_PCT: f64 = 2.0;
pub const DEFAULT_TAKE_PROFIT_PCT: f64 = 4.0;
pub const DEFAULT_TRAILING_PCT: f64 = 2.0;
pub const DEFAULT_TRAILING_ACTIVATION_PCT: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub trailing_enabled: bool,
    pub trailing_pct: f64,
    pub trailing_activation_pct: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            stop_loss_pct: DEFAULT_STOP_LOSS_PCT,
            take_profit_pct: DEFAULT_TAKE_PROFIT_PCT,
            trailing_enabled: false,
            trailing_pct: DEFAULT_TRAILING_PCT,
            trailing_activation_pct: DEFAULT_TRAILING_ACTIVATION_PCT,
        }
    }
}

/// Why a position should be closed at a given price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TrailingStop,
}

impl From<ExitReason> for TradeReason {
    fn from(reason: ExitReason) -> Self {
        match reason {
            ExitReason::StopLoss => TradeReason::StopLoss,
            ExitReason::TakeProfit => TradeReason::TakeProfit,
            ExitReason::TrailingStop => TradeReason::TrailingStop,
        }
    }
}

impl RiskConfig {
    /// Fixed stop price, or `None` when the stop leg is disabled.
    pub fn stop_price(&self, position: &Position) -> Option<f64> {
        if self.stop_loss_pct <= 0.0 || !self.stop_loss_pct.is_finite() {
            return None;
        }
        let offset = position.entry_price * self.stop_loss_pct / 100.0;
        Some(match position.side {
            Side::Long => position.entry_price - offset,
            Side::Short => position.entry_price + offset,
        })
    }

    /// Take-profit price, or `None` when the target leg is disabled.
    pub fn target_price(&self, position: &Position) -> Option<f64> {
        if self.take_profit_pct <= 0.0 || !self.take_profit_pct.is_finite() {
            return None;
        }
        let offset = position.entry_price * self.take_profit_pct / 100.0;
        Some(match position.side {
            Side::Long => position.entry_price + offset,
            Side::Short => position.entry_price - offset,
        })
    }

    /// Trailing stop price once the best price has moved past the activation
    /// threshold.
    pub fn trailing_price(&self, position: &Position) -> Option<f64> {
        if !self.trailing_enabled || self.trailing_pct <= 0.0 {
            return None;
        }
        if position.favorable_move_pct(position.best_price) < self.trailing_activation_pct {
            return None;
        }
        let offset = position.best_price * self.trailing_pct / 100.0;
        Some(match position.side {
            Side::Long => position.best_price - offset,
            Side::Short => position.best_price + offset,
        })
    }

    /// Check an open position against `price`. The caller ratchets
    /// `position.best_price` before calling.
    ///
    /// An active trailing stop replaces the fixed stop only where it is
    /// tighter.
    pub fn exit_reason(&self, position: &Position, price: f64) -> Option<ExitReason> {
        let long = position.is_long();
        let beyond = |level: f64| if long { price <= level } else { price >= level };
        let reached = |level: f64| if long { price >= level } else { price <= level };

        if let Some(target) = self.target_price(position) {
            if reached(target) {
                return Some(ExitReason::TakeProfit);
            }
        }

        let fixed = self.stop_price(position);
        let trailing = self.trailing_price(position);
        let (stop, reason) = match (fixed, trailing) {
            (Some(f), Some(t)) => {
                let trailing_is_tighter = if long { t > f } else { t < f };
                if trailing_is_tighter {
                    (t, ExitReason::TrailingStop)
                } else {
                    (f, ExitReason::StopLoss)
                }
            }
            (None, Some(t)) => (t, ExitReason::TrailingStop),
            (Some(f), None) => (f, ExitReason::StopLoss),
            (None, None) => return None,
        };

        if beyond(stop) { Some(reason) } else { None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{TimeZone, Utc};

    fn position(side: Side, entry: f64) -> Position {
        Position::open(side, entry, 1.0, Utc.timestamp_opt(0, 0).unwrap())
    }

    fn trailing(trail: f64, activation: f64) -> RiskConfig {
        RiskConfig {
            stop_loss_pct: 2.0,
            take_profit_pct: 20.0,
            trailing_enabled: true,
            trailing_pct: trail,
            trailing_activation_pct: activation,
        }
    }

    #[test]
    fn defaults() {
        let cfg = RiskConfig::default();
        assert_eq!(cfg.stop_loss_pct, 2.0);
        assert_eq!(cfg.take_profit_pct, 4.0);
        assert!(!cfg.trailing_enabled);
    }

    #[test]
    fn long_stop_and_target() {
        let cfg = RiskConfig::default();
        let pos = position(Side::Long, 100.0);
        assert_relative_eq!(cfg.stop_price(&pos).unwrap(), 98.0);
        assert_relative_eq!(cfg.target_price(&pos).unwrap(), 104.0);
        assert_eq!(cfg.exit_reason(&pos, 97.9), Some(ExitReason::StopLoss));
        assert_eq!(cfg.exit_reason(&pos, 104.0), Some(ExitReason::TakeProfit));
        assert_eq!(cfg.exit_reason(&pos, 101.0), None);
    }

    #[test]
    fn short_stop_and_target() {
        let cfg = RiskConfig::default();
        let pos = position(Side::Short, 100.0);
        assert_eq!(cfg.exit_reason(&pos, 102.1), Some(ExitReason::StopLoss));
        assert_eq!(cfg.exit_reason(&pos, 95.9), Some(ExitReason::TakeProfit));
        assert_eq!(cfg.exit_reason(&pos, 99.0), None);
    }

    #[test]
    fn non_positive_legs_are_disabled() {
        let cfg = RiskConfig {
            stop_loss_pct: 0.0,
            take_profit_pct: -1.0,
            ..RiskConfig::default()
        };
        let pos = position(Side::Long, 100.0);
        assert_eq!(cfg.exit_reason(&pos, 1.0), None);
        assert_eq!(cfg.exit_reason(&pos, 1000.0), None);
    }

    #[test]
    fn trailing_ratchets_and_triggers() {
        let cfg = trailing(2.0, 0.5);
        let mut pos = position(Side::Long, 100.0);

        for price in [100.0, 110.0] {
            pos.observe(price);
            assert_eq!(cfg.exit_reason(&pos, price), None);
        }
        assert_relative_eq!(cfg.trailing_price(&pos).unwrap(), 107.8, epsilon = 1e-9);

        pos.observe(105.0);
        assert_eq!(cfg.exit_reason(&pos, 105.0), Some(ExitReason::TrailingStop));
    }

    #[test]
    fn trailing_inactive_below_activation() {
        let cfg = trailing(2.0, 5.0);
        let mut pos = position(Side::Long, 100.0);
        pos.observe(103.0);
        assert_eq!(cfg.trailing_price(&pos), None);
        assert_eq!(cfg.exit_reason(&pos, 101.0), None);
    }

    #[test]
    fn trailing_never_loosens_fixed_stop() {
        let cfg = RiskConfig {
            stop_loss_pct: 1.0,
            take_profit_pct: 50.0,
            trailing_enabled: true,
            trailing_pct: 5.0,
            trailing_activation_pct: 0.1,
        };
        let mut pos = position(Side::Long, 100.0);
        pos.observe(101.0);
        // trailing stop 95.95 is looser than the fixed 99.0
        assert_eq!(cfg.exit_reason(&pos, 98.9), Some(ExitReason::StopLoss));
    }

    #[test]
    fn short_trailing() {
        let cfg = trailing(2.0, 0.5);
        let mut pos = position(Side::Short, 100.0);
        pos.observe(90.0);
        // stop at 91.8
        assert_eq!(cfg.exit_reason(&pos, 91.0), None);
        assert_eq!(cfg.exit_reason(&pos, 92.0), Some(ExitReason::TrailingStop));
    }

    #[test]
    fn exit_reason_maps_to_trade_reason() {
        assert_eq!(TradeReason::from(ExitReason::TrailingStop), TradeReason::TrailingStop);
    }
}
