//! The closed binding table: every name a script can read or call.
//!
//! Nothing here touches I/O, clocks, or shared state. Effects land in the
//! per-execution [`Effects`] record and nowhere else.

use super::value::Value;
use crate::domain::error::ScriptError;
use crate::domain::indicator::{
    self, Crossover, Series, apply_on_defined, bollinger as bb, macd as macd_mod, rsi as rsi_mod,
};
use crate::domain::ohlcv::Bar;
use crate::domain::position::Signal;
use crate::domain::risk::RiskConfig;
use std::rc::Rc;

const MAX_LOG_MESSAGES: usize = 100;
const MAX_LOG_LEN: usize = 500;

/// What one execution asked for.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Effects {
    pub signal: Option<Signal>,
    pub config: Option<RiskConfig>,
    pub logs: Vec<String>,
}

const VALUE_NAMES: &[&str] = &[
    "open", "high", "low", "close", "volume", "opens", "highs", "lows", "closes", "volumes",
];

const FUNCTION_NAMES: &[&str] = &[
    "ema",
    "sma",
    "rsi",
    "macd",
    "bollinger",
    "vwap",
    "crossover",
    "crossunder",
    "highest",
    "lowest",
    "avg",
    "change",
    "percentChange",
    "buy",
    "sell",
    "setConfig",
    "log",
];

pub fn is_global(name: &str) -> bool {
    VALUE_NAMES.contains(&name)
}

pub fn is_function(name: &str) -> bool {
    FUNCTION_NAMES.contains(&name)
}

/// Read a built-in value. `None` means the name is not part of the table.
pub fn global(name: &str, bars: &[Bar]) -> Option<Value> {
    let last = bars.last();
    let scalar = |field: fn(&Bar) -> f64| last.map(|b| Value::Number(field(b))).unwrap_or(Value::Null);
    let series = |field: fn(&Bar) -> f64| Value::series(bars.iter().map(|b| Some(field(b))).collect());

    Some(match name {
        "open" => scalar(|b| b.open),
        "high" => scalar(|b| b.high),
        "low" => scalar(|b| b.low),
        "close" => scalar(|b| b.close),
        "volume" => scalar(|b| b.volume),
        "opens" => series(|b| b.open),
        "highs" => series(|b| b.high),
        "lows" => series(|b| b.low),
        "closes" => series(|b| b.close),
        "volumes" => series(|b| b.volume),
        _ => return None,
    })
}

struct Args<'a> {
    name: &'a str,
    values: Vec<Value>,
}

impl<'a> Args<'a> {
    fn error(&self, message: impl std::fmt::Display) -> ScriptError {
        ScriptError::runtime(format!("{}(): {message}", self.name))
    }

    fn at_most(&self, count: usize) -> Result<(), ScriptError> {
        if self.values.len() > count {
            return Err(self.error(format!(
                "expected at most {count} argument(s), got {}",
                self.values.len()
            )));
        }
        Ok(())
    }

    fn get(&self, index: usize) -> Option<&Value> {
        match self.values.get(index) {
            None | Some(Value::Null) => None,
            Some(v) => Some(v),
        }
    }

    fn number(&self, index: usize, default: Option<f64>) -> Result<f64, ScriptError> {
        match (self.get(index), default) {
            (Some(Value::Number(n)), _) if n.is_finite() => Ok(*n),
            (Some(other), _) => Err(self.error(format!(
                "argument {} must be a finite number, got {}",
                index + 1,
                other.type_name()
            ))),
            (None, Some(d)) => Ok(d),
            (None, None) => Err(self.error(format!("argument {} is required", index + 1))),
        }
    }

    fn period(&self, index: usize, default: Option<usize>) -> Result<usize, ScriptError> {
        let n = self.number(index, default.map(|d| d as f64))?;
        if n < 1.0 || n.fract() != 0.0 {
            return Err(self.error(format!(
                "argument {} must be a positive whole number, got {n}",
                index + 1
            )));
        }
        Ok(n as usize)
    }

    fn series(&self, index: usize) -> Result<Rc<Series>, ScriptError> {
        match self.get(index) {
            Some(Value::Series(s)) => Ok(Rc::clone(s)),
            Some(other) => Err(self.error(format!(
                "argument {} must be a series, got {}",
                index + 1,
                other.type_name()
            ))),
            None => Err(self.error(format!("argument {} is required", index + 1))),
        }
    }

    /// Optional source series, defaulting to closing prices.
    fn source(&self, index: usize, bars: &[Bar]) -> Result<Rc<Series>, ScriptError> {
        match self.get(index) {
            None => Ok(Rc::new(bars.iter().map(|b| Some(b.close)).collect())),
            Some(_) => self.series(index),
        }
    }

    /// A series, or a number broadcast to `len` positions.
    fn series_like(&self, index: usize, len: usize) -> Result<Rc<Series>, ScriptError> {
        match self.get(index) {
            Some(Value::Number(n)) => Ok(Rc::new(vec![Some(*n); len])),
            _ => self.series(index),
        }
    }
}

pub fn call(
    name: &str,
    values: Vec<Value>,
    bars: &[Bar],
    effects: &mut Effects,
) -> Result<Value, ScriptError> {
    let args = Args { name, values };
    match name {
        "ema" => {
            args.at_most(2)?;
            let period = args.period(0, None)?;
            let source = args.source(1, bars)?;
            Ok(Value::series(apply_on_defined(&source, |v| {
                indicator::ema(v, period)
            })))
        }
        "sma" => {
            args.at_most(2)?;
            let period = args.period(0, None)?;
            let source = args.source(1, bars)?;
            Ok(Value::series(apply_on_defined(&source, |v| {
                indicator::sma(v, period)
            })))
        }
        "rsi" => {
            args.at_most(2)?;
            let period = args.period(0, Some(rsi_mod::DEFAULT_PERIOD))?;
            let source = args.source(1, bars)?;
            Ok(Value::series(apply_on_defined(&source, |v| {
                indicator::rsi(v, period)
            })))
        }
        "macd" => {
            args.at_most(3)?;
            let fast = args.period(0, Some(macd_mod::DEFAULT_FAST))?;
            let slow = args.period(1, Some(macd_mod::DEFAULT_SLOW))?;
            let signal = args.period(2, Some(macd_mod::DEFAULT_SIGNAL))?;
            let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
            let out = indicator::macd(&closes, fast, slow, signal);
            Ok(Value::object([
                ("macd".to_string(), Value::series(out.macd)),
                ("signal".to_string(), Value::series(out.signal)),
                ("histogram".to_string(), Value::series(out.histogram)),
            ]))
        }
        "bollinger" => {
            args.at_most(2)?;
            let period = args.period(0, Some(bb::DEFAULT_PERIOD))?;
            let k = args.number(1, Some(bb::DEFAULT_MULTIPLIER))?;
            let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
            let out = indicator::bollinger(&closes, period, k);
            Ok(Value::object([
                ("upper".to_string(), Value::series(out.upper)),
                ("middle".to_string(), Value::series(out.middle)),
                ("lower".to_string(), Value::series(out.lower)),
            ]))
        }
        "vwap" => {
            args.at_most(0)?;
            Ok(Value::series(indicator::vwap(bars)))
        }
        "crossover" | "crossunder" => {
            args.at_most(2)?;
            let wanted = if name == "crossover" {
                Crossover::Bullish
            } else {
                Crossover::Bearish
            };
            let len = match (args.get(0), args.get(1)) {
                (Some(Value::Series(a)), _) => a.len(),
                (_, Some(Value::Series(b))) => b.len(),
                _ => return Err(args.error("at least one argument must be a series")),
            };
            let a = args.series_like(0, len)?;
            let b = args.series_like(1, len)?;
            let n = a.len().min(b.len());
            if n < 2 {
                return Ok(Value::Bool(false));
            }
            let a = &a[a.len() - n..];
            let b = &b[b.len() - n..];
            Ok(Value::Bool(
                indicator::detect_crossover(a, b, n - 1) == Some(wanted),
            ))
        }
        "highest" | "lowest" | "avg" => {
            args.at_most(2)?;
            let series = args.series(0)?;
            let lookback = args.period(1, Some(series.len().max(1)))?;
            let Some(window) = trailing_window(&series, lookback) else {
                return Ok(Value::Null);
            };
            let value = match name {
                "highest" => window.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                "lowest" => window.iter().copied().fold(f64::INFINITY, f64::min),
                _ => window.iter().sum::<f64>() / window.len() as f64,
            };
            Ok(Value::Number(value))
        }
        "change" | "percentChange" => {
            args.at_most(2)?;
            let series = args.series(0)?;
            let lookback = args.period(1, Some(1))?;
            let Some(window) = trailing_window(&series, lookback.saturating_add(1)) else {
                return Ok(Value::Null);
            };
            let (then, now) = (window[0], window[window.len() - 1]);
            if name == "change" {
                Ok(Value::Number(now - then))
            } else if then == 0.0 {
                Ok(Value::Null)
            } else {
                Ok(Value::Number((now - then) / then * 100.0))
            }
        }
        "buy" => {
            args.at_most(0)?;
            effects.signal = Some(Signal::Buy);
            Ok(Value::Null)
        }
        "sell" => {
            args.at_most(0)?;
            effects.signal = Some(Signal::Sell);
            Ok(Value::Null)
        }
        "setConfig" => {
            args.at_most(1)?;
            let Some(Value::Object(fields)) = args.get(0) else {
                return Err(args.error("argument 1 must be an object"));
            };
            let mut config = effects.config.unwrap_or_default();
            for (key, value) in fields.iter() {
                apply_config_field(&mut config, key, value)?;
            }
            effects.config = Some(config);
            Ok(Value::Null)
        }
        "log" => {
            if effects.logs.len() < MAX_LOG_MESSAGES {
                let mut line = args
                    .values
                    .iter()
                    .map(Value::to_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                if line.len() > MAX_LOG_LEN {
                    let mut cut = MAX_LOG_LEN;
                    while !line.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    line.truncate(cut);
                    line.push('…');
                }
                effects.logs.push(line);
            }
            Ok(Value::Null)
        }
        _ => Err(ScriptError::runtime(format!("'{name}' is not a function"))),
    }
}

/// The last `len` values, or `None` when there are fewer or any is undefined.
fn trailing_window(series: &[Option<f64>], len: usize) -> Option<Vec<f64>> {
    if len == 0 || series.len() < len {
        return None;
    }
    series[series.len() - len..].iter().copied().collect()
}

fn apply_config_field(config: &mut RiskConfig, key: &str, value: &Value) -> Result<(), ScriptError> {
    let positive = |v: &Value| -> Result<f64, ScriptError> {
        match v {
            Value::Number(n) if n.is_finite() && *n > 0.0 => Ok(*n),
            other => Err(ScriptError::runtime(format!(
                "setConfig(): '{key}' must be a number greater than 0, got {other}"
            ))),
        }
    };

    match key {
        "stopLoss" => config.stop_loss_pct = positive(value)?,
        "takeProfit" => config.take_profit_pct = positive(value)?,
        "trailingPercent" => config.trailing_pct = positive(value)?,
        "trailingActivation" => match value {
            Value::Number(n) if n.is_finite() && *n >= 0.0 => config.trailing_activation_pct = *n,
            other => {
                return Err(ScriptError::runtime(format!(
                    "setConfig(): 'trailingActivation' must be a non-negative number, got {other}"
                )));
            }
        },
        "trailingStop" => match value {
            Value::Bool(b) => config.trailing_enabled = *b,
            other => {
                return Err(ScriptError::runtime(format!(
                    "setConfig(): 'trailingStop' must be true or false, got {other}"
                )));
            }
        },
        other => {
            return Err(ScriptError::runtime(format!(
                "setConfig(): unknown key '{other}'"
            )));
        }
    }
    Ok(())
}
