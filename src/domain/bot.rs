//! Persisted bot configuration and live-engine tuning.
//!
//! Both are immutable for a running session; changing them means stopping
//! and restarting the bot.

use crate::domain::risk::RiskConfig;
use crate::domain::strategy::StrategyDescriptor;
use crate::domain::timeframe::Timeframe;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct BotConfig {
    pub id: String,
    /// Trading pair as `BASE/QUOTE`, e.g. `BTC/USDT`.
    pub pair: String,
    pub timeframe: Timeframe,
    pub strategy: StrategyDescriptor,
    /// Share of balance committed per entry, in percent.
    pub risk_percent: f64,
    /// Starting balance in the quote asset for simulated trading.
    pub balance: f64,
    pub broker_id: Option<String>,
    /// Effective risk config at start. Scripts may override it per evaluation.
    pub risk: RiskConfig,
}

impl BotConfig {
    /// Quote asset of the pair; the whole pair if it has no separator.
    pub fn quote_asset(&self) -> &str {
        self.pair
            .rsplit_once(['/', '-'])
            .map(|(_, quote)| quote)
            .unwrap_or(&self.pair)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub candle_capacity: usize,
    pub log_capacity: usize,
    pub seed_bars: usize,
    pub max_subscription_failures: u32,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub transient_cooldown: Duration,
    pub permanent_cooldown: Duration,
    pub min_notional: f64,
    pub max_balance_fraction: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            candle_capacity: 200,
            log_capacity: 500,
            seed_bars: 200,
            max_subscription_failures: 5,
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
            transient_cooldown: Duration::from_secs(5),
            permanent_cooldown: Duration::from_secs(60),
            min_notional: 10.0,
            max_balance_fraction: 0.95,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bot(pair: &str) -> BotConfig {
        BotConfig {
            id: "b1".into(),
            pair: pair.into(),
            timeframe: Timeframe::OneHour,
            strategy: StrategyDescriptor::script("buy();"),
            risk_percent: 10.0,
            balance: 1000.0,
            broker_id: None,
            risk: RiskConfig::default(),
        }
    }

    #[test]
    fn quote_asset_from_pair() {
        assert_eq!(bot("BTC/USDT").quote_asset(), "USDT");
        assert_eq!(bot("ETH-USD").quote_asset(), "USD");
        assert_eq!(bot("SOLUSDC").quote_asset(), "SOLUSDC");
    }
}
