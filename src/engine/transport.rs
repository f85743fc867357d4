//! Streaming transport state machine with reconnect backoff and a one-way
//! fallback to polling.
//!
//! ```text
//! Disconnected --connect--> Connecting{n} --ok--> Connected
//!      ^                         |                    |
//!      +------ failure (< max) --+------ failure -----+
//!                                |
//!                          failure (= max)
//!                                v
//!                            Degraded (polling for the rest of the session)
//! ```

use crate::domain::timeframe::Timeframe;
use serde::Serialize;
use std::time::Duration;

const MIN_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TransportState {
    Disconnected,
    Connecting { attempt: u32 },
    Connected,
    Degraded,
}

/// What to do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    RetryAfter(Duration),
    Poll,
}

#[derive(Debug, Clone)]
pub struct TransportMachine {
    state: TransportState,
    consecutive_failures: u32,
    max_failures: u32,
    backoff_initial: Duration,
    backoff_max: Duration,
}

impl TransportMachine {
    pub fn new(max_failures: u32, backoff_initial: Duration, backoff_max: Duration) -> Self {
        Self {
            state: TransportState::Disconnected,
            consecutive_failures: 0,
            max_failures: max_failures.max(1),
            backoff_initial,
            backoff_max,
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn is_degraded(&self) -> bool {
        self.state == TransportState::Degraded
    }

    pub fn begin_connect(&mut self) -> TransportState {
        if !self.is_degraded() {
            self.state = TransportState::Connecting {
                attempt: self.consecutive_failures + 1,
            };
        }
        self.state
    }

    pub fn on_connected(&mut self) {
        if matches!(self.state, TransportState::Connecting { .. }) {
            self.state = TransportState::Connected;
        }
    }

    /// An event arrived; the connection is proven healthy.
    pub fn on_event(&mut self) {
        if self.state == TransportState::Connected {
            self.consecutive_failures = 0;
        }
    }

    /// A subscribe attempt failed or an open stream ended.
    pub fn on_failure(&mut self) -> Recovery {
        if self.is_degraded() {
            return Recovery::Poll;
        }
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.max_failures {
            self.state = TransportState::Degraded;
            return Recovery::Poll;
        }
        self.state = TransportState::Disconnected;
        Recovery::RetryAfter(self.backoff(self.consecutive_failures))
    }

    /// Delay before retry number `failures`: initial, doubling, capped.
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        self.backoff_initial
            .saturating_mul(1u32 << exponent)
            .min(self.backoff_max)
    }
}

/// Fixed polling period for degraded mode: a quarter of the timeframe,
/// clamped to 5..=60 seconds.
pub fn poll_interval(timeframe: Timeframe) -> Duration {
    (timeframe.duration() / 4).clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> TransportMachine {
        TransportMachine::new(5, Duration::from_secs(1), Duration::from_secs(30))
    }

    #[test]
    fn connect_cycle() {
        let mut m = machine();
        assert_eq!(m.state(), TransportState::Disconnected);
        assert_eq!(m.begin_connect(), TransportState::Connecting { attempt: 1 });
        m.on_connected();
        assert_eq!(m.state(), TransportState::Connected);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let m = machine();
        let delays: Vec<u64> = (1..=7).map(|n| m.backoff(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn degrades_after_max_consecutive_failures() {
        let mut m = machine();
        for attempt in 1..=4 {
            assert_eq!(m.begin_connect(), TransportState::Connecting { attempt });
            assert!(matches!(m.on_failure(), Recovery::RetryAfter(_)));
        }
        m.begin_connect();
        assert_eq!(m.on_failure(), Recovery::Poll);
        assert!(m.is_degraded());
        assert_eq!(m.begin_connect(), TransportState::Degraded);
    }

    #[test]
    fn connection_without_events_still_counts_as_failure() {
        let mut m = machine();
        for _ in 0..4 {
            m.begin_connect();
            m.on_connected();
            m.on_failure();
        }
        assert_eq!(m.consecutive_failures(), 4);
    }

    #[test]
    fn event_resets_failures() {
        let mut m = machine();
        for _ in 0..4 {
            m.begin_connect();
            m.on_failure();
        }
        m.begin_connect();
        m.on_connected();
        m.on_event();
        assert_eq!(m.consecutive_failures(), 0);
        assert_eq!(m.on_failure(), Recovery::RetryAfter(Duration::from_secs(1)));
    }

    #[test]
    fn poll_interval_scales_with_timeframe() {
        assert_eq!(poll_interval(Timeframe::OneMinute), Duration::from_secs(15));
        assert_eq!(poll_interval(Timeframe::FiveMinutes), Duration::from_secs(60));
        assert_eq!(poll_interval(Timeframe::OneDay), Duration::from_secs(60));
    }
}
