//! Bollinger Bands.
//!
//! - Middle: SMA over n periods
//! - Upper: Middle + k × StdDev
//! - Lower: Middle - k × StdDev
//!
//! StdDev is the population standard deviation (divides by N). Undefined for
//! the first (n-1) positions.

use super::{Series, sma, stddev};

pub const DEFAULT_PERIOD: usize = 20;
pub const DEFAULT_MULTIPLIER: f64 = 2.0;

#[derive(Debug, Clone, PartialEq)]
pub struct BollingerSeries {
    pub upper: Series,
    pub middle: Series,
    pub lower: Series,
}

pub fn bollinger(values: &[f64], period: usize, k: f64) -> BollingerSeries {
    let middle = sma(values, period);
    let deviation = stddev(values, period);

    let band = |sign: f64| -> Series {
        middle
            .iter()
            .zip(&deviation)
            .map(|(m, d)| match (m, d) {
                (Some(m), Some(d)) => Some(m + sign * k * d),
                _ => None,
            })
            .collect()
    };

    BollingerSeries {
        upper: band(1.0),
        lower: band(-1.0),
        middle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn bands_around_sma() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let bands = bollinger(&values, 8, 2.0);
        assert_relative_eq!(bands.middle[7].unwrap(), 5.0);
        assert_relative_eq!(bands.upper[7].unwrap(), 9.0);
        assert_relative_eq!(bands.lower[7].unwrap(), 1.0);
    }

    #[test]
    fn warmup_undefined() {
        let bands = bollinger(&[1.0, 2.0, 3.0], DEFAULT_PERIOD, DEFAULT_MULTIPLIER);
        assert!(bands.upper.iter().all(Option::is_none));
        assert!(bands.middle.iter().all(Option::is_none));
        assert!(bands.lower.iter().all(Option::is_none));
    }

    #[test]
    fn flat_series_collapses_bands() {
        let bands = bollinger(&[10.0; 25], 20, 2.0);
        let last = 24;
        assert_relative_eq!(bands.upper[last].unwrap(), 10.0);
        assert_relative_eq!(bands.lower[last].unwrap(), 10.0);
    }
}
