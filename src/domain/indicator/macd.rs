//! MACD (Moving Average Convergence Divergence).
//!
//! MACD Line = EMA(fast) - EMA(slow)
//! Signal Line = EMA(signal) of MACD Line
//! Histogram = MACD Line - Signal Line
//!
//! EMAs are seeded at the first value, so all three lines are defined from
//! index 0 for non-zero periods.

use super::{Series, ema};

pub const DEFAULT_FAST: usize = 12;
pub const DEFAULT_SLOW: usize = 26;
pub const DEFAULT_SIGNAL: usize = 9;

#[derive(Debug, Clone, PartialEq)]
pub struct MacdSeries {
    pub macd: Series,
    pub signal: Series,
    pub histogram: Series,
}

pub fn macd(values: &[f64], fast: usize, slow: usize, signal_period: usize) -> MacdSeries {
    if fast == 0 || slow == 0 || signal_period == 0 {
        let undefined = vec![None; values.len()];
        return MacdSeries {
            macd: undefined.clone(),
            signal: undefined.clone(),
            histogram: undefined,
        };
    }

    let ema_fast = ema(values, fast);
    let ema_slow = ema(values, slow);

    let line: Vec<f64> = ema_fast
        .iter()
        .zip(&ema_slow)
        .map(|(f, s)| f.unwrap_or(0.0) - s.unwrap_or(0.0))
        .collect();
    let signal = ema(&line, signal_period);
    let histogram = line
        .iter()
        .zip(&signal)
        .map(|(m, s)| s.map(|s| m - s))
        .collect();

    MacdSeries {
        macd: line.into_iter().map(Some).collect(),
        signal,
        histogram,
    }
}
