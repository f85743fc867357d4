//! Crossover and divergence detection over indicator series.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Crossover {
    /// `a` moved from at-or-below `b` to above it.
    Bullish,
    /// `a` moved from at-or-above `b` to below it.
    Bearish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Divergence {
    Bullish,
    Bearish,
}

/// Crossover of `a` against `b` between positions `i - 1` and `i`.
///
/// Returns `None` at index 0, out of range, or when any of the four values
/// involved is undefined.
pub fn detect_crossover(a: &[Option<f64>], b: &[Option<f64>], i: usize) -> Option<Crossover> {
    if i == 0 || i >= a.len() || i >= b.len() {
        return None;
    }
    let (a_prev, a_curr) = (a[i - 1]?, a[i]?);
    let (b_prev, b_curr) = (b[i - 1]?, b[i]?);

    if a_prev <= b_prev && a_curr > b_curr {
        Some(Crossover::Bullish)
    } else if a_prev >= b_prev && a_curr < b_curr {
        Some(Crossover::Bearish)
    } else {
        None
    }
}

/// Compare the maximum of the most recent `lookback` values against the
/// maximum of the `lookback` values before them, for both series.
///
/// Bearish: price makes a higher high while the indicator makes a lower high.
/// Bullish: price makes a lower high while the indicator makes a higher high.
/// Needs `2 * lookback` defined trailing values in each series.
pub fn detect_divergence(
    price: &[Option<f64>],
    indicator: &[Option<f64>],
    lookback: usize,
) -> Option<Divergence> {
    if lookback == 0 {
        return None;
    }
    let (price_prior, price_recent) = window_maxima(price, lookback)?;
    let (ind_prior, ind_recent) = window_maxima(indicator, lookback)?;

    if price_recent > price_prior && ind_recent < ind_prior {
        Some(Divergence::Bearish)
    } else if price_recent < price_prior && ind_recent > ind_prior {
        Some(Divergence::Bullish)
    } else {
        None
    }
}

fn window_maxima(series: &[Option<f64>], lookback: usize) -> Option<(f64, f64)> {
    let span = lookback.checked_mul(2)?;
    if series.len() < span {
        return None;
    }
    let tail = &series[series.len() - span..];
    let max_of = |window: &[Option<f64>]| -> Option<f64> {
        window
            .iter()
            .try_fold(f64::NEG_INFINITY, |acc, v| v.map(|v| acc.max(v)))
    };
    Some((max_of(&tail[..lookback])?, max_of(&tail[lookback..])?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::defined;
    use proptest::prelude::*;

    #[test]
    fn bullish_cross() {
        let a = defined(&[1.0, 3.0]);
        let b = defined(&[2.0, 2.0]);
        assert_eq!(detect_crossover(&a, &b, 1), Some(Crossover::Bullish));
        assert_eq!(detect_crossover(&b, &a, 1), Some(Crossover::Bearish));
    }

    #[test]
    fn touching_then_crossing_counts() {
        let a = defined(&[2.0, 3.0]);
        let b = defined(&[2.0, 2.0]);
        assert_eq!(detect_crossover(&a, &b, 1), Some(Crossover::Bullish));
    }

    #[test]
    fn staying_above_is_not_a_cross() {
        let a = defined(&[3.0, 4.0]);
        let b = defined(&[2.0, 2.0]);
        assert_eq!(detect_crossover(&a, &b, 1), None);
    }

    #[test]
    fn index_zero_and_undefined() {
        let a = defined(&[1.0, 3.0]);
        let b = vec![None, Some(2.0)];
        assert_eq!(detect_crossover(&a, &a, 0), None);
        assert_eq!(detect_crossover(&a, &b, 1), None);
        assert_eq!(detect_crossover(&a, &a, 5), None);
    }

    #[test]
    fn bearish_divergence() {
        let price = defined(&[10.0, 11.0, 10.5, 12.0]);
        let rsi = defined(&[70.0, 75.0, 65.0, 68.0]);
        assert_eq!(detect_divergence(&price, &rsi, 2), Some(Divergence::Bearish));
    }

    #[test]
    fn bullish_divergence() {
        let price = defined(&[12.0, 11.0, 10.0, 10.5]);
        let rsi = defined(&[30.0, 32.0, 35.0, 40.0]);
        assert_eq!(detect_divergence(&price, &rsi, 2), Some(Divergence::Bullish));
    }

    #[test]
    fn divergence_needs_two_windows() {
        let price = defined(&[1.0, 2.0, 3.0]);
        assert_eq!(detect_divergence(&price, &price, 2), None);
        assert_eq!(detect_divergence(&price, &price, 0), None);
    }

    #[test]
    fn no_divergence_when_aligned() {
        let price = defined(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(detect_divergence(&price, &price, 2), None);
    }

    proptest! {
        #[test]
        fn crossover_never_fires_same_direction_both_ways(
            a in prop::collection::vec(-100.0f64..100.0, 2..40),
            b in prop::collection::vec(-100.0f64..100.0, 2..40),
        ) {
            let a = defined(&a);
            let b = defined(&b);
            let len = a.len().min(b.len());
            for i in 0..len {
                let ab = detect_crossover(&a, &b, i);
                let ba = detect_crossover(&b, &a, i);
                prop_assert!(ab.is_none() || ab != ba);
            }
        }
    }
}
