//! Deterministic bar-by-bar replay of a strategy over historical data.
//!
//! For each bar from the warm-up onwards the strategy is evaluated against
//! every bar up to and including the current one. Fills happen at the
//! current bar's close. No wall-clock time is read.

use crate::domain::error::ScriptError;
use crate::domain::evaluator::CompiledStrategy;
use crate::domain::metrics::Metrics;
use crate::domain::ohlcv::Bar;
use crate::domain::position::{Position, Side, TradeReason};
use crate::domain::risk::RiskConfig;
use crate::domain::strategy::StrategyDescriptor;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Bars of history preceding the first evaluation.
pub const WARMUP_BARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BacktestConfig {
    pub initial_balance: f64,
    pub risk_percent_per_trade: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_balance: 10_000.0,
            risk_percent_per_trade: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulatedTrade {
    pub side: Side,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    pub pnl: f64,
    pub exit_reason: TradeReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EquityPoint {
    pub time: DateTime<Utc>,
    pub equity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestReport {
    pub trades: Vec<SimulatedTrade>,
    pub equity_curve: Vec<EquityPoint>,
    pub final_balance: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub max_drawdown_pct: f64,
    pub metrics: Metrics,
    /// Evaluations that ended in a script error and produced no signal.
    pub script_errors: usize,
    pub first_script_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BacktestOutcome {
    Completed(BacktestReport),
    InsufficientData { bars: usize, minimum: usize },
}

/// Replay `bars` through `descriptor`. Only a script that fails to compile
/// is an error; everything after that is reported in the outcome.
pub fn run_backtest(
    descriptor: &StrategyDescriptor,
    bars: &[Bar],
    config: &BacktestConfig,
) -> Result<BacktestOutcome, ScriptError> {
    let strategy = CompiledStrategy::compile(descriptor)?;
    Ok(simulate(&strategy, bars, config))
}

/// Convenience for a custom script.
pub fn backtest(
    source: &str,
    bars: &[Bar],
    config: &BacktestConfig,
) -> Result<BacktestOutcome, ScriptError> {
    run_backtest(&StrategyDescriptor::script(source), bars, config)
}

struct Simulation {
    balance: f64,
    position: Option<Position>,
    trades: Vec<SimulatedTrade>,
}

impl Simulation {
    fn close(&mut self, bar: &Bar, reason: TradeReason) {
        let Some(position) = self.position.take() else {
            return;
        };
        let pnl = position.unrealized_pnl(bar.close);
        self.balance += pnl;
        tracing::debug!(
            side = %position.side,
            entry = position.entry_price,
            exit = bar.close,
            pnl,
            %reason,
            "backtest close"
        );
        self.trades.push(SimulatedTrade {
            side: position.side,
            entry_time: position.entry_time,
            exit_time: bar.time,
            entry_price: position.entry_price,
            exit_price: bar.close,
            quantity: position.quantity,
            pnl,
            exit_reason: reason,
        });
    }

    fn open(&mut self, side: Side, bar: &Bar, risk_percent: f64) {
        if bar.close <= 0.0 || self.balance <= 0.0 {
            return;
        }
        let quantity = risk_percent / 100.0 * self.balance / bar.close;
        if quantity > 0.0 && quantity.is_finite() {
            self.position = Some(Position::open(side, bar.close, quantity, bar.time));
        }
    }

    fn equity(&self, price: f64) -> f64 {
        self.balance
            + self
                .position
                .as_ref()
                .map(|p| p.unrealized_pnl(price))
                .unwrap_or(0.0)
    }
}

fn simulate(strategy: &CompiledStrategy, bars: &[Bar], config: &BacktestConfig) -> BacktestOutcome {
    if bars.len() <= WARMUP_BARS {
        return BacktestOutcome::InsufficientData {
            bars: bars.len(),
            minimum: WARMUP_BARS + 1,
        };
    }

    let mut sim = Simulation {
        balance: config.initial_balance,
        position: None,
        trades: Vec::new(),
    };
    let mut risk = RiskConfig::default();
    let mut equity_curve = Vec::with_capacity(bars.len() - WARMUP_BARS);
    let mut script_errors = 0usize;
    let mut first_script_error = None;

    for i in WARMUP_BARS..bars.len() {
        let bar = &bars[i];
        let evaluation = strategy.evaluate(&bars[..=i]);
        if let Some(error) = evaluation.error {
            script_errors += 1;
            first_script_error.get_or_insert(error);
        }
        if let Some(updated) = evaluation.risk {
            risk = updated;
        }

        if let Some(position) = sim.position.as_mut() {
            position.observe(bar.close);
            if let Some(exit) = risk.exit_reason(position, bar.close) {
                sim.close(bar, exit.into());
            }
        }

        if let Some(signal) = evaluation.signal {
            let side = signal.side();
            let held = sim.position.as_ref().map(|p| p.side);
            if held != Some(side) {
                if held.is_some() {
                    sim.close(bar, TradeReason::Signal);
                }
                sim.open(side, bar, config.risk_percent_per_trade);
            }
        }

        equity_curve.push(EquityPoint {
            time: bar.time,
            equity: sim.equity(bar.close),
        });
    }

    if let Some(last) = bars.last() {
        sim.close(last, TradeReason::EndOfData);
        if let Some(point) = equity_curve.last_mut() {
            point.equity = sim.balance;
        }
    }

    let metrics = Metrics::compute(
        config.initial_balance,
        sim.trades.iter().map(|t| t.pnl),
        &equity_curve,
    );

    BacktestOutcome::Completed(BacktestReport {
        final_balance: sim.balance,
        win_rate: metrics.win_rate,
        profit_factor: metrics.profit_factor,
        max_drawdown_pct: metrics.max_drawdown_pct,
        trades: sim.trades,
        equity_curve,
        metrics,
        script_errors,
        first_script_error,
    })
}
