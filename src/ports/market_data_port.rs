//! Live market data provider.

use crate::domain::error::MarketDataError;
use crate::domain::ohlcv::Bar;
use crate::domain::timeframe::Timeframe;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq)]
pub enum MarketEvent {
    /// Sub-bar price update.
    Tick { price: f64, time: DateTime<Utc> },
    /// A bar that will not change any more.
    BarClose(Bar),
}

/// A live event stream. The stream ends (`recv` returns `None`) when the
/// provider drops the connection.
pub struct Subscription {
    events: mpsc::Receiver<MarketEvent>,
    feeder: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(events: mpsc::Receiver<MarketEvent>) -> Self {
        Self {
            events,
            feeder: None,
        }
    }

    /// Tie a provider task to the subscription so it is aborted on
    /// unsubscribe.
    pub fn with_feeder(mut self, feeder: JoinHandle<()>) -> Self {
        self.feeder = Some(feeder);
        self
    }

    pub async fn recv(&mut self) -> Option<MarketEvent> {
        self.events.recv().await
    }

    pub fn unsubscribe(mut self) {
        self.events.close();
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
        }
    }
}

#[async_trait]
pub trait MarketDataPort: Send + Sync {
    /// The most recent `count` bars, oldest first. The last one may still
    /// be forming.
    async fn historical_bars(
        &self,
        pair: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Bar>, MarketDataError>;

    async fn subscribe(
        &self,
        pair: &str,
        timeframe: Timeframe,
    ) -> Result<Subscription, MarketDataError>;

    async fn current_price(&self, pair: &str) -> Result<f64, MarketDataError>;
}
