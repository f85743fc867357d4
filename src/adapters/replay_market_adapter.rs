//! Market data replayed from a fixed bar series.
//!
//! The first `seed` bars are history. Each subscription then replays the
//! remainder, one bar per `pace`, as ticks along the bar's range followed
//! by its close. The replay position is shared, so a resubscribe resumes
//! where the previous stream stopped. Serves one pair and timeframe to one
//! bot.

use crate::domain::error::MarketDataError;
use crate::domain::ohlcv::Bar;
use crate::domain::timeframe::Timeframe;
use crate::ports::market_data_port::{MarketDataPort, MarketEvent, Subscription};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

const CHANNEL_CAPACITY: usize = 64;

fn lock(cursor: &Mutex<usize>) -> MutexGuard<'_, usize> {
    cursor.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Intra-bar price path: open, the extreme against the bar's direction,
/// the extreme with it, close.
fn price_path(bar: &Bar) -> [f64; 4] {
    if bar.close >= bar.open {
        [bar.open, bar.low, bar.high, bar.close]
    } else {
        [bar.open, bar.high, bar.low, bar.close]
    }
}

pub struct ReplayMarketData {
    pair: String,
    timeframe: Timeframe,
    bars: Arc<Vec<Bar>>,
    /// Number of bars already visible as history.
    cursor: Arc<Mutex<usize>>,
    pace: Duration,
    finished: Arc<watch::Sender<bool>>,
}

impl ReplayMarketData {
    pub fn new(
        pair: impl Into<String>,
        timeframe: Timeframe,
        bars: Vec<Bar>,
        seed: usize,
        pace: Duration,
    ) -> Self {
        let seed = seed.min(bars.len());
        let (finished, _) = watch::channel(seed == bars.len());
        Self {
            pair: pair.into(),
            timeframe,
            bars: Arc::new(bars),
            cursor: Arc::new(Mutex::new(seed)),
            pace,
            finished: Arc::new(finished),
        }
    }

    /// Flips to `true` once every bar has been replayed.
    pub fn finished(&self) -> watch::Receiver<bool> {
        self.finished.subscribe()
    }

    pub fn replayed(&self) -> usize {
        *lock(&self.cursor)
    }

    fn check(&self, pair: &str, timeframe: Timeframe) -> Result<(), MarketDataError> {
        if pair != self.pair || timeframe != self.timeframe {
            return Err(MarketDataError::Unavailable {
                reason: format!(
                    "replay serves {} {}, not {pair} {timeframe}",
                    self.pair, self.timeframe
                ),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MarketDataPort for ReplayMarketData {
    async fn historical_bars(
        &self,
        pair: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Bar>, MarketDataError> {
        self.check(pair, timeframe)?;
        let visible = self.replayed();
        Ok(self.bars[visible.saturating_sub(count)..visible].to_vec())
    }

    async fn subscribe(
        &self,
        pair: &str,
        timeframe: Timeframe,
    ) -> Result<Subscription, MarketDataError> {
        self.check(pair, timeframe)?;
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let bars = Arc::clone(&self.bars);
        let cursor = Arc::clone(&self.cursor);
        let finished = Arc::clone(&self.finished);
        let pace = self.pace;

        let feeder = tokio::spawn(async move {
            loop {
                let next = *lock(&cursor);
                let Some(bar) = bars.get(next).cloned() else {
                    finished.send_replace(true);
                    // Hold the stream open; the replay has nothing more to say.
                    std::future::pending::<()>().await;
                    return;
                };
                tokio::time::sleep(pace).await;
                for price in price_path(&bar) {
                    let tick = MarketEvent::Tick {
                        price,
                        time: bar.time,
                    };
                    if tx.send(tick).await.is_err() {
                        return;
                    }
                }
                if tx.send(MarketEvent::BarClose(bar)).await.is_err() {
                    return;
                }
                *lock(&cursor) = next + 1;
            }
        });
        Ok(Subscription::new(rx).with_feeder(feeder))
    }

    async fn current_price(&self, pair: &str) -> Result<f64, MarketDataError> {
        self.check(pair, self.timeframe)?;
        let visible = self.replayed();
        visible
            .checked_sub(1)
            .and_then(|i| self.bars.get(i))
            .map(|bar| bar.close)
            .ok_or_else(|| MarketDataError::Unavailable {
                reason: "no bars replayed yet".into(),
            })
    }
}
