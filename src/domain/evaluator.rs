//! Strategy evaluation: turns a descriptor and a bar window into at most one
//! signal. Backtesting and live trading both go through [`CompiledStrategy`].

use crate::domain::error::ScriptError;
use crate::domain::indicator::{self, Crossover, Series, detect_crossover, last_value};
use crate::domain::ohlcv::{Bar, closes};
use crate::domain::position::Signal;
use crate::domain::risk::RiskConfig;
use crate::domain::script::{self, ast::Program};
use crate::domain::strategy::{BuiltInKind, BuiltInStrategy, StrategyDescriptor};

/// Closed bars a built-in strategy needs before it will emit anything.
pub const MIN_BUILT_IN_BARS: usize = 50;

/// Result of one evaluation.
///
/// `risk` is the config the evaluation asks to apply from now on. Built-ins
/// always return their fixed config; scripts return one only when they
/// called `setConfig`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Evaluation {
    pub signal: Option<Signal>,
    pub risk: Option<RiskConfig>,
    pub logs: Vec<String>,
    pub error: Option<String>,
}

/// A descriptor prepared for repeated evaluation. Scripts are parsed and
/// statically validated once.
#[derive(Debug, Clone)]
pub enum CompiledStrategy {
    BuiltIn(BuiltInStrategy),
    Script(Program),
}

impl CompiledStrategy {
    pub fn compile(descriptor: &StrategyDescriptor) -> Result<Self, ScriptError> {
        match descriptor {
            StrategyDescriptor::BuiltIn(b) => Ok(CompiledStrategy::BuiltIn(*b)),
            StrategyDescriptor::CustomScript { source } => {
                Ok(CompiledStrategy::Script(script::compile(source)?))
            }
        }
    }

    pub fn evaluate(&self, bars: &[Bar]) -> Evaluation {
        match self {
            CompiledStrategy::BuiltIn(strategy) => Evaluation {
                signal: evaluate_built_in(strategy, bars),
                risk: Some(strategy.exit.risk),
                ..Evaluation::default()
            },
            CompiledStrategy::Script(program) => {
                let out = script::run(program, bars);
                Evaluation {
                    signal: out.signal,
                    risk: out.config,
                    logs: out.logs,
                    error: out.error,
                }
            }
        }
    }
}

/// Evaluate a descriptor once. Compile failures come back as an error
/// value with no signal.
pub fn evaluate(descriptor: &StrategyDescriptor, bars: &[Bar]) -> Evaluation {
    match CompiledStrategy::compile(descriptor) {
        Ok(compiled) => compiled.evaluate(bars),
        Err(e) => Evaluation {
            error: Some(e.to_string()),
            ..Evaluation::default()
        },
    }
}

fn evaluate_built_in(strategy: &BuiltInStrategy, bars: &[Bar]) -> Option<Signal> {
    if bars.len() < MIN_BUILT_IN_BARS {
        return None;
    }
    let values = closes(bars);
    let last = values.len() - 1;
    let entry = &strategy.entry;
    let overbought = strategy.exit.rsi_overbought;

    match strategy.kind {
        BuiltInKind::EmaCross => {
            let cross = ema_cross(&values, entry.fast_period, entry.slow_period, last);
            cross.map(|c| match c {
                Crossover::Bullish => Signal::Buy,
                Crossover::Bearish => Signal::Sell,
            })
        }
        BuiltInKind::EmaCrossWithRsi => {
            let cross = ema_cross(&values, entry.fast_period, entry.slow_period, last);
            let rsi = last_value(&indicator::rsi(&values, entry.rsi_period));
            match (cross, rsi) {
                (Some(Crossover::Bullish), Some(r)) if r < entry.rsi_oversold => Some(Signal::Buy),
                (Some(Crossover::Bearish), _) => Some(Signal::Sell),
                (_, Some(r)) if r > overbought => Some(Signal::Sell),
                _ => None,
            }
        }
        BuiltInKind::Rsi => {
            let r = last_value(&indicator::rsi(&values, entry.rsi_period))?;
            if r < entry.rsi_oversold {
                Some(Signal::Buy)
            } else if r > overbought {
                Some(Signal::Sell)
            } else {
                None
            }
        }
        BuiltInKind::MacdCross => {
            let m = indicator::macd(&values, entry.macd_fast, entry.macd_slow, entry.macd_signal);
            match detect_crossover(&m.macd, &m.signal, last)? {
                Crossover::Bullish => Some(Signal::Buy),
                Crossover::Bearish => Some(Signal::Sell),
            }
        }
    }
}

fn ema_cross(values: &[f64], fast: usize, slow: usize, i: usize) -> Option<Crossover> {
    let fast: Series = indicator::ema(values, fast);
    let slow: Series = indicator::ema(values, slow);
    detect_crossover(&fast, &slow, i)
}
