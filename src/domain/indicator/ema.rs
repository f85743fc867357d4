//! Exponential Moving Average.
//!
//! k = 2/(n+1), seeded with the first value, then EMA[i] = x[i]*k + EMA[i-1]*(1-k).
//! Every position is defined.

use super::Series;

pub fn ema(values: &[f64], period: usize) -> Series {
    if period == 0 {
        return vec![None; values.len()];
    }

    let k = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev: Option<f64> = None;

    for &x in values {
        let next = match prev {
            None => x,
            Some(p) => x * k + p * (1.0 - k),
        };
        prev = Some(next);
        out.push(Some(next));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn ema_hand_computed() {
        let series = ema(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);
        let expected = [1.0, 1.5, 2.25, 3.125, 4.0625];
        assert_eq!(series.len(), 5);
        for (got, want) in series.iter().zip(expected) {
            assert_relative_eq!(got.unwrap(), want, epsilon = 1e-12);
        }
    }

    #[test]
    fn ema_period_1_tracks_input() {
        let series = ema(&[10.0, 20.0, 30.0], 1);
        assert_eq!(series, vec![Some(10.0), Some(20.0), Some(30.0)]);
    }

    #[test]
    fn ema_equal_prices() {
        let series = ema(&[100.0; 5], 3);
        for v in series {
            assert_relative_eq!(v.unwrap(), 100.0);
        }
    }

    #[test]
    fn ema_empty() {
        assert!(ema(&[], 3).is_empty());
    }

    #[test]
    fn ema_period_0_is_undefined() {
        assert_eq!(ema(&[10.0, 20.0], 0), vec![None, None]);
    }
}
