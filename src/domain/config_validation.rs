//! Configuration loading and validation.
//!
//! Every field is checked before anything runs. All problems found are
//! reported together in one error.

use crate::domain::backtest::BacktestConfig;
use crate::domain::bot::{BotConfig, EngineSettings};
use crate::domain::error::TradescriptError;
use crate::domain::risk::RiskConfig;
use crate::domain::script;
use crate::domain::strategy::{
    BuiltInKind, BuiltInStrategy, EntryParams, ExitParams, StrategyDescriptor,
};
use crate::domain::timeframe::Timeframe;
use crate::ports::config_port::ConfigPort;
use std::time::Duration;

enum Problem {
    Missing { section: String, key: String },
    Invalid { section: String, key: String, reason: String },
}

impl Problem {
    fn describe(&self) -> String {
        match self {
            Problem::Missing { section, key } => format!("[{section}] {key} is required"),
            Problem::Invalid {
                section,
                key,
                reason,
            } => format!("[{section}] {key}: {reason}"),
        }
    }
}

/// Collects problems across a whole config file.
struct Checker<'a> {
    config: &'a dyn ConfigPort,
    problems: Vec<Problem>,
}

impl<'a> Checker<'a> {
    fn new(config: &'a dyn ConfigPort) -> Self {
        Self {
            config,
            problems: Vec::new(),
        }
    }

    fn invalid(&mut self, section: &str, key: &str, reason: impl Into<String>) {
        self.problems.push(Problem::Invalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        });
    }

    fn required_string(&mut self, section: &str, key: &str) -> Option<String> {
        match self.config.get_string(section, key) {
            Some(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => {
                self.problems.push(Problem::Missing {
                    section: section.to_string(),
                    key: key.to_string(),
                });
                None
            }
        }
    }

    fn optional_string(&self, section: &str, key: &str) -> Option<String> {
        self.config
            .get_string(section, key)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn positive(&mut self, section: &str, key: &str, default: f64) -> f64 {
        let value = self.config.get_double(section, key, default);
        if !(value > 0.0 && value.is_finite()) {
            self.invalid(section, key, format!("{key} must be positive"));
        }
        value
    }

    fn non_negative(&mut self, section: &str, key: &str, default: f64) -> f64 {
        let value = self.config.get_double(section, key, default);
        if !(value >= 0.0 && value.is_finite()) {
            self.invalid(section, key, format!("{key} must be non-negative"));
        }
        value
    }

    fn percent(&mut self, section: &str, key: &str, default: f64) -> f64 {
        let value = self.config.get_double(section, key, default);
        if !(value > 0.0 && value <= 100.0) {
            self.invalid(section, key, format!("{key} must be in (0, 100]"));
        }
        value
    }

    fn count(&mut self, section: &str, key: &str, default: usize, minimum: usize) -> usize {
        let value = self.config.get_int(section, key, default as i64);
        if value < minimum as i64 {
            self.invalid(section, key, format!("{key} must be at least {minimum}"));
            return default;
        }
        value as usize
    }

    fn finish<T>(self, value: T) -> Result<T, TradescriptError> {
        let mut problems = self.problems;
        match problems.len() {
            0 => Ok(value),
            1 => Err(match problems.remove(0) {
                Problem::Missing { section, key } => TradescriptError::ConfigMissing { section, key },
                Problem::Invalid {
                    section,
                    key,
                    reason,
                } => TradescriptError::ConfigInvalid {
                    section,
                    key,
                    reason,
                },
            }),
            _ => {
                let reason = problems
                    .iter()
                    .map(Problem::describe)
                    .collect::<Vec<_>>()
                    .join("; ");
                let (section, key) = match &problems[0] {
                    Problem::Missing { section, key } | Problem::Invalid { section, key, .. } => {
                        (section.clone(), key.clone())
                    }
                };
                Err(TradescriptError::ConfigInvalid {
                    section,
                    key,
                    reason,
                })
            }
        }
    }
}

/// Build the bot configuration from `[bot]`, `[strategy]` and `[risk]`.
///
/// For `kind = script` the source is `script_source` when given (the caller
/// has read `script_path`), else the inline `[strategy] script` value.
pub fn load_bot_config(
    config: &dyn ConfigPort,
    script_source: Option<String>,
) -> Result<BotConfig, TradescriptError> {
    let mut c = Checker::new(config);

    let id = c
        .optional_string("bot", "id")
        .unwrap_or_else(|| "bot-1".to_string());
    let pair = c.required_string("bot", "pair").unwrap_or_default();
    let timeframe = match c.optional_string("bot", "timeframe") {
        None => Timeframe::OneHour,
        Some(s) => s.parse::<Timeframe>().unwrap_or_else(|e| {
            c.invalid("bot", "timeframe", e);
            Timeframe::OneHour
        }),
    };
    let risk_percent = c.percent("bot", "risk_percent", 10.0);
    let balance = c.positive("bot", "balance", 1000.0);
    let broker_id = c.optional_string("bot", "broker_id");

    let risk = risk_section(&mut c);
    let strategy = strategy_section(&mut c, risk, script_source);

    let bot = BotConfig {
        id,
        pair,
        timeframe,
        strategy: strategy.unwrap_or_else(|| StrategyDescriptor::script("")),
        risk_percent,
        balance,
        broker_id,
        risk,
    };
    c.finish(bot)
}

fn risk_section(c: &mut Checker<'_>) -> RiskConfig {
    let defaults = RiskConfig::default();
    RiskConfig {
        stop_loss_pct: c.non_negative("risk", "stop_loss", defaults.stop_loss_pct),
        take_profit_pct: c.non_negative("risk", "take_profit", defaults.take_profit_pct),
        trailing_enabled: c.config.get_bool("risk", "trailing_enabled", false),
        trailing_pct: c.positive("risk", "trailing_percent", defaults.trailing_pct),
        trailing_activation_pct: c.non_negative(
            "risk",
            "trailing_activation",
            defaults.trailing_activation_pct,
        ),
    }
}

fn strategy_section(
    c: &mut Checker<'_>,
    risk: RiskConfig,
    script_source: Option<String>,
) -> Option<StrategyDescriptor> {
    let kind = c.required_string("strategy", "kind")?;

    if kind.eq_ignore_ascii_case("script") {
        let source = script_source.or_else(|| c.optional_string("strategy", "script"));
        let Some(source) = source else {
            c.invalid(
                "strategy",
                "script",
                "kind = script needs script or script_path",
            );
            return None;
        };
        if let Err(e) = script::validate(&source) {
            c.invalid("strategy", "script", e.to_string());
            return None;
        }
        return Some(StrategyDescriptor::script(source));
    }

    let kind = match kind.parse::<BuiltInKind>() {
        Ok(kind) => kind,
        Err(e) => {
            c.invalid("strategy", "kind", e);
            return None;
        }
    };

    let d = EntryParams::default();
    let entry = EntryParams {
        fast_period: c.count("strategy", "fast_period", d.fast_period, 1),
        slow_period: c.count("strategy", "slow_period", d.slow_period, 1),
        rsi_period: c.count("strategy", "rsi_period", d.rsi_period, 1),
        rsi_oversold: c.percent("strategy", "rsi_oversold", d.rsi_oversold),
        macd_fast: c.count("strategy", "macd_fast", d.macd_fast, 1),
        macd_slow: c.count("strategy", "macd_slow", d.macd_slow, 1),
        macd_signal: c.count("strategy", "macd_signal", d.macd_signal, 1),
    };
    let exit = ExitParams {
        rsi_overbought: c.percent("strategy", "rsi_overbought", ExitParams::default().rsi_overbought),
        risk,
    };

    if entry.fast_period >= entry.slow_period {
        c.invalid(
            "strategy",
            "fast_period",
            "fast_period must be less than slow_period",
        );
    }
    if entry.macd_fast >= entry.macd_slow {
        c.invalid("strategy", "macd_fast", "macd_fast must be less than macd_slow");
    }
    if entry.rsi_oversold >= exit.rsi_overbought {
        c.invalid(
            "strategy",
            "rsi_oversold",
            "rsi_oversold must be less than rsi_overbought",
        );
    }

    Some(StrategyDescriptor::BuiltIn(BuiltInStrategy { kind, entry, exit }))
}

/// `[engine]` settings; every key is optional.
pub fn load_engine_settings(config: &dyn ConfigPort) -> Result<EngineSettings, TradescriptError> {
    let mut c = Checker::new(config);
    let d = EngineSettings::default();
    let candle_capacity = c.count("engine", "candle_capacity", d.candle_capacity, 60);
    let seed_bars = c.count("engine", "seed_bars", d.seed_bars, 1);
    if seed_bars > candle_capacity {
        c.invalid(
            "engine",
            "seed_bars",
            "seed_bars must not exceed candle_capacity",
        );
    }
    let settings = EngineSettings {
        candle_capacity,
        log_capacity: c.count("engine", "log_capacity", d.log_capacity, 1),
        seed_bars,
        max_subscription_failures: c.count(
            "engine",
            "max_subscription_failures",
            d.max_subscription_failures as usize,
            1,
        ) as u32,
        backoff_initial: d.backoff_initial,
        backoff_max: d.backoff_max,
        transient_cooldown: Duration::from_secs(c.count(
            "engine",
            "transient_cooldown_secs",
            d.transient_cooldown.as_secs() as usize,
            0,
        ) as u64),
        permanent_cooldown: Duration::from_secs(c.count(
            "engine",
            "permanent_cooldown_secs",
            d.permanent_cooldown.as_secs() as usize,
            0,
        ) as u64),
        min_notional: c.non_negative("engine", "min_notional", d.min_notional),
        max_balance_fraction: {
            let v = c.positive("engine", "max_balance_fraction", d.max_balance_fraction);
            if v > 1.0 {
                c.invalid(
                    "engine",
                    "max_balance_fraction",
                    "max_balance_fraction must not exceed 1",
                );
            }
            v
        },
    };
    c.finish(settings)
}

/// `[backtest]` settings; every key is optional.
pub fn load_backtest_config(config: &dyn ConfigPort) -> Result<BacktestConfig, TradescriptError> {
    let mut c = Checker::new(config);
    let d = BacktestConfig::default();
    let backtest = BacktestConfig {
        initial_balance: c.positive("backtest", "initial_balance", d.initial_balance),
        risk_percent_per_trade: c.percent(
            "backtest",
            "risk_percent_per_trade",
            d.risk_percent_per_trade,
        ),
    };
    c.finish(backtest)
}

/// `[fees] bps`, default 10.
pub fn load_fee_bps(config: &dyn ConfigPort) -> Result<f64, TradescriptError> {
    let mut c = Checker::new(config);
    let bps = c.non_negative("fees", "bps", 10.0);
    c.finish(bps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    fn make_config(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    #[test]
    fn minimal_script_bot() {
        let config = make_config("[bot]\npair = BTC/USDT\n[strategy]\nkind = script\nscript = buy()\n");
        let bot = load_bot_config(&config, None).unwrap();
        assert_eq!(bot.id, "bot-1");
        assert_eq!(bot.pair, "BTC/USDT");
        assert_eq!(bot.timeframe, Timeframe::OneHour);
        assert_eq!(bot.strategy, StrategyDescriptor::script("buy()"));
        assert_eq!(bot.risk, RiskConfig::default());
        assert_eq!(bot.broker_id, None);
    }

    #[test]
    fn script_source_override_wins() {
        let config = make_config(
            "[bot]\npair = BTC/USDT\n[strategy]\nkind = script\nscript_path = s.js\n",
        );
        let bot = load_bot_config(&config, Some("sell();".into())).unwrap();
        assert_eq!(bot.strategy, StrategyDescriptor::script("sell();"));
    }

    #[test]
    fn full_built_in_bot() {
        let config = make_config(
            r#"
[bot]
id = alpha
pair = ETH/USDT
timeframe = 15m
risk_percent = 5
balance = 2500
broker_id = main

[strategy]
kind = ema_cross_with_rsi
fast_period = 5
slow_period = 13
rsi_oversold = 25
rsi_overbought = 75

[risk]
stop_loss = 1.5
take_profit = 3
trailing_enabled = true
trailing_percent = 1
trailing_activation = 0.25
"#,
        );
        let bot = load_bot_config(&config, None).unwrap();
        assert_eq!(bot.id, "alpha");
        assert_eq!(bot.timeframe, Timeframe::FifteenMinutes);
        assert_eq!(bot.broker_id.as_deref(), Some("main"));
        let StrategyDescriptor::BuiltIn(strategy) = &bot.strategy else {
            panic!("expected built-in");
        };
        assert_eq!(strategy.kind, BuiltInKind::EmaCrossWithRsi);
        assert_eq!(strategy.entry.fast_period, 5);
        assert_eq!(strategy.entry.rsi_oversold, 25.0);
        assert_eq!(strategy.exit.rsi_overbought, 75.0);
        assert!(strategy.exit.risk.trailing_enabled);
        assert_eq!(strategy.exit.risk.stop_loss_pct, 1.5);
        assert_eq!(bot.risk, strategy.exit.risk);
    }

    #[test]
    fn missing_pair_fails() {
        let config = make_config("[strategy]\nkind = rsi\n");
        let err = load_bot_config(&config, None).unwrap_err();
        assert!(matches!(err, TradescriptError::ConfigMissing { key, .. } if key == "pair"));
    }

    #[test]
    fn unknown_kind_fails() {
        let config = make_config("[bot]\npair = X/Y\n[strategy]\nkind = martingale\n");
        let err = load_bot_config(&config, None).unwrap_err();
        assert!(matches!(err, TradescriptError::ConfigInvalid { key, .. } if key == "kind"));
    }

    #[test]
    fn rejected_script_fails_validation() {
        let config = make_config("[bot]\npair = X/Y\n[strategy]\nkind = script\nscript = eval('1')\n");
        let err = load_bot_config(&config, None).unwrap_err();
        assert!(
            matches!(err, TradescriptError::ConfigInvalid { ref key, ref reason, .. } if key == "script" && reason.contains("eval"))
        );
    }

    #[test]
    fn problems_are_collected() {
        let config = make_config(
            "[bot]\npair = X/Y\nrisk_percent = 150\nbalance = -1\ntimeframe = 3h\n[strategy]\nkind = ema_cross\nfast_period = 30\n",
        );
        let err = load_bot_config(&config, None).unwrap_err();
        let TradescriptError::ConfigInvalid { reason, .. } = err else {
            panic!("expected ConfigInvalid, got {err:?}");
        };
        assert!(reason.contains("risk_percent"));
        assert!(reason.contains("balance"));
        assert!(reason.contains("timeframe"));
        assert!(reason.contains("fast_period must be less than slow_period"));
    }

    #[test]
    fn negative_stop_loss_fails() {
        let config = make_config("[bot]\npair = X/Y\n[strategy]\nkind = rsi\n[risk]\nstop_loss = -1\n");
        let err = load_bot_config(&config, None).unwrap_err();
        assert!(matches!(err, TradescriptError::ConfigInvalid { key, .. } if key == "stop_loss"));
    }

    #[test]
    fn engine_defaults() {
        let settings = load_engine_settings(&make_config("[engine]\n")).unwrap();
        assert_eq!(settings, EngineSettings::default());
    }

    #[test]
    fn engine_overrides_and_bounds() {
        let settings = load_engine_settings(&make_config(
            "[engine]\ncandle_capacity = 300\nmax_subscription_failures = 3\npermanent_cooldown_secs = 120\n",
        ))
        .unwrap();
        assert_eq!(settings.candle_capacity, 300);
        assert_eq!(settings.max_subscription_failures, 3);
        assert_eq!(settings.permanent_cooldown, Duration::from_secs(120));

        let err = load_engine_settings(&make_config("[engine]\ncandle_capacity = 10\n")).unwrap_err();
        assert!(
            matches!(err, TradescriptError::ConfigInvalid { key, .. } if key == "candle_capacity")
        );
        let err =
            load_engine_settings(&make_config("[engine]\nmax_balance_fraction = 1.5\n")).unwrap_err();
        assert!(
            matches!(err, TradescriptError::ConfigInvalid { key, .. } if key == "max_balance_fraction")
        );
    }

    #[test]
    fn backtest_config() {
        let cfg = load_backtest_config(&make_config(
            "[backtest]\ninitial_balance = 5000\nrisk_percent_per_trade = 25\n",
        ))
        .unwrap();
        assert_eq!(cfg.initial_balance, 5000.0);
        assert_eq!(cfg.risk_percent_per_trade, 25.0);

        let err = load_backtest_config(&make_config("[backtest]\ninitial_balance = 0\n")).unwrap_err();
        assert!(
            matches!(err, TradescriptError::ConfigInvalid { key, .. } if key == "initial_balance")
        );
    }

    #[test]
    fn fee_bps() {
        assert_eq!(load_fee_bps(&make_config("[fees]\nbps = 7.5\n")).unwrap(), 7.5);
        assert_eq!(load_fee_bps(&make_config("")).unwrap(), 10.0);
        assert!(load_fee_bps(&make_config("[fees]\nbps = -1\n")).is_err());
    }
}
