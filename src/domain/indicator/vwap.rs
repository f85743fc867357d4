//! Volume-weighted average price, cumulative over the whole window with no
//! session reset. Undefined while cumulative volume is zero.

use super::Series;
use crate::domain::ohlcv::Bar;

pub fn vwap(bars: &[Bar]) -> Series {
    let mut cum_pv = 0.0;
    let mut cum_volume = 0.0;

    bars.iter()
        .map(|bar| {
            cum_pv += bar.typical_price() * bar.volume;
            cum_volume += bar.volume;
            if cum_volume > 0.0 {
                Some(cum_pv / cum_volume)
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{TimeZone, Utc};

    fn bar(i: i64, high: f64, low: f64, close: f64, volume: f64) -> Bar {
        Bar {
            time: Utc.timestamp_opt(i * 60, 0).unwrap(),
            open: close,
            high,
            low,
            close,
            volume,
        }
    }

    #[test]
    fn vwap_weights_by_volume() {
        let bars = vec![bar(0, 12.0, 9.0, 9.0, 100.0), bar(1, 22.0, 19.0, 19.0, 300.0)];
        let series = vwap(&bars);
        // typical prices 10 and 20
        assert_relative_eq!(series[0].unwrap(), 10.0);
        assert_relative_eq!(series[1].unwrap(), (10.0 * 100.0 + 20.0 * 300.0) / 400.0);
    }

    #[test]
    fn vwap_undefined_without_volume() {
        let bars = vec![bar(0, 1.0, 1.0, 1.0, 0.0), bar(1, 4.0, 1.0, 1.0, 2.0)];
        let series = vwap(&bars);
        assert_eq!(series[0], None);
        assert_relative_eq!(series[1].unwrap(), 2.0);
    }
}
