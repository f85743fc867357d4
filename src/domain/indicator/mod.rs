//! Technical indicators.
//!
//! Every function is pure and total: the output is aligned index-for-index
//! with the input, and warm-up positions hold `None` rather than a computed
//! value.

pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod rsi;
pub mod signals;
pub mod sma;
pub mod stddev;
pub mod vwap;

pub use bollinger::{BollingerSeries, bollinger};
pub use ema::ema;
pub use macd::{MacdSeries, macd};
pub use rsi::rsi;
pub use signals::{Crossover, Divergence, detect_crossover, detect_divergence};
pub use sma::sma;
pub use stddev::stddev;
pub use vwap::vwap;

/// An indicator output; `None` marks positions without enough history.
pub type Series = Vec<Option<f64>>;

/// Wrap fully-defined values as a series.
pub fn defined(values: &[f64]) -> Series {
    values.iter().copied().map(Some).collect()
}

/// Apply an indicator to a series whose leading positions may be undefined
/// (for example the output of another indicator).
///
/// The indicator runs on the defined suffix and the result is re-padded to
/// the input length. A gap after the first defined value leaves nothing
/// meaningful to compute, so the whole output is undefined.
pub fn apply_on_defined<F>(input: &[Option<f64>], indicator: F) -> Series
where
    F: Fn(&[f64]) -> Series,
{
    let Some(start) = input.iter().position(Option::is_some) else {
        return vec![None; input.len()];
    };
    let suffix: Option<Vec<f64>> = input[start..].iter().copied().collect();
    match suffix {
        Some(values) => {
            let mut out = vec![None; start];
            out.extend(indicator(&values));
            out
        }
        None => vec![None; input.len()],
    }
}

/// Last defined value of a series.
pub fn last_value(series: &[Option<f64>]) -> Option<f64> {
    series.last().copied().flatten()
}
