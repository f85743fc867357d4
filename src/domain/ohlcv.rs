//! OHLCV bar representation and the bounded candle buffer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// (high + low + close) / 3
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }
}

/// Closing prices of a bar window, in order.
pub fn closes(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|b| b.close).collect()
}

/// What [`CandleBuffer::upsert`] did with a bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Appended,
    /// Same timestamp as the newest bar; the still-forming bar was replaced.
    Replaced,
    /// Older than the newest bar; ignored.
    Rejected,
}

/// Bounded, strictly time-ordered ring of bars.
#[derive(Debug, Clone)]
pub struct CandleBuffer {
    bars: VecDeque<Bar>,
    capacity: usize,
}

impl CandleBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            bars: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn upsert(&mut self, bar: Bar) -> Upsert {
        match self.bars.back() {
            Some(last) if bar.time < last.time => Upsert::Rejected,
            Some(last) if bar.time == last.time => {
                if let Some(slot) = self.bars.back_mut() {
                    *slot = bar;
                }
                Upsert::Replaced
            }
            _ => {
                if self.bars.len() == self.capacity {
                    self.bars.pop_front();
                }
                self.bars.push_back(bar);
                Upsert::Appended
            }
        }
    }

    /// Seed from history, keeping only the newest `capacity` bars.
    pub fn extend<I: IntoIterator<Item = Bar>>(&mut self, bars: I) {
        for bar in bars {
            self.upsert(bar);
        }
    }

    pub fn window(&mut self) -> &[Bar] {
        self.bars.make_contiguous()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.back()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar_at(minute: i64, close: f64) -> Bar {
        Bar {
            time: Utc.timestamp_opt(1_700_000_000 + minute * 60, 0).unwrap(),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10.0,
        }
    }

    #[test]
    fn typical_price() {
        let bar = Bar {
            time: Utc.timestamp_opt(0, 0).unwrap(),
            open: 100.0,
            high: 110.0,
            low: 90.0,
            close: 105.0,
            volume: 1.0,
        };
        let expected = (110.0 + 90.0 + 105.0) / 3.0;
        assert!((bar.typical_price() - expected).abs() < f64::EPSILON);
    }

    #[test]
    fn upsert_appends_newer_bars() {
        let mut buffer = CandleBuffer::new(10);
        assert_eq!(buffer.upsert(bar_at(0, 1.0)), Upsert::Appended);
        assert_eq!(buffer.upsert(bar_at(1, 2.0)), Upsert::Appended);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn upsert_replaces_forming_bar() {
        let mut buffer = CandleBuffer::new(10);
        buffer.upsert(bar_at(0, 1.0));
        buffer.upsert(bar_at(1, 2.0));
        assert_eq!(buffer.upsert(bar_at(1, 2.5)), Upsert::Replaced);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.last().unwrap().close, 2.5);
    }

    #[test]
    fn upsert_rejects_older_bars() {
        let mut buffer = CandleBuffer::new(10);
        buffer.upsert(bar_at(5, 1.0));
        assert_eq!(buffer.upsert(bar_at(4, 9.0)), Upsert::Rejected);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.last().unwrap().close, 1.0);
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let mut buffer = CandleBuffer::new(3);
        buffer.extend((0..5).map(|i| bar_at(i, i as f64)));
        let closes: Vec<f64> = buffer.window().iter().map(|b| b.close).collect();
        assert_eq!(closes, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn window_is_strictly_ordered() {
        let mut buffer = CandleBuffer::new(50);
        for i in [0, 1, 1, 3, 2, 4, 4] {
            buffer.upsert(bar_at(i, i as f64));
        }
        let window = buffer.window();
        assert!(window.windows(2).all(|w| w[0].time < w[1].time));
    }
}
