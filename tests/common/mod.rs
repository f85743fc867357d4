#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tradescript::domain::bot::{BotConfig, EngineSettings};
use tradescript::domain::error::{MarketDataError, RoutingError, TradescriptError};
pub use tradescript::domain::ohlcv::Bar;
use tradescript::domain::position::TradeRecord;
use tradescript::domain::risk::RiskConfig;
use tradescript::domain::strategy::StrategyDescriptor;
use tradescript::domain::timeframe::Timeframe;
use tradescript::ports::market_data_port::{MarketDataPort, MarketEvent, Subscription};
use tradescript::ports::order_port::{OrderFill, OrderPort, OrderRequest};
use tradescript::ports::trade_sink_port::{LogLine, TradeSinkPort};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Bars one minute apart starting at [`t0`], open at the previous close.
pub fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
    let mut prev = closes.first().copied().unwrap_or(0.0);
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let bar = Bar {
                time: t0() + ChronoDuration::minutes(i as i64),
                open: prev,
                high: prev.max(close),
                low: prev.min(close),
                close,
                volume: 1_000.0,
            };
            prev = close;
            bar
        })
        .collect()
}

pub fn flat_bars(n: usize, price: f64) -> Vec<Bar> {
    bars_from_closes(&vec![price; n])
}

/// Gently oscillating series with an upward drift.
pub fn wave_bars(n: usize) -> Vec<Bar> {
    let closes: Vec<f64> = (0..n)
        .map(|i| {
            let x = i as f64;
            100.0 + x * 0.05 + (x / 6.0).sin() * 4.0
        })
        .collect();
    bars_from_closes(&closes)
}

pub fn bar_at(minute: i64, close: f64) -> Bar {
    Bar {
        time: t0() + ChronoDuration::minutes(minute),
        open: close,
        high: close,
        low: close,
        close,
        volume: 1_000.0,
    }
}

pub fn bot_config(id: &str, source: &str) -> BotConfig {
    BotConfig {
        id: id.to_string(),
        pair: "BTC/USDT".to_string(),
        timeframe: Timeframe::OneMinute,
        strategy: StrategyDescriptor::script(source),
        risk_percent: 10.0,
        balance: 1_000.0,
        broker_id: None,
        risk: RiskConfig::default(),
    }
}

/// Fast settings for paused-clock engine tests.
pub fn test_settings() -> EngineSettings {
    EngineSettings {
        candle_capacity: 200,
        seed_bars: 100,
        ..EngineSettings::default()
    }
}

/// Market data whose history grows by one bar per `step` of tokio time.
///
/// `historical_bars` returns everything visible so far, the newest bar
/// still forming. The first `failures` subscribe calls fail; successful
/// subscriptions hand their sender to the test via [`MockMarketData::sender`].
pub struct MockMarketData {
    bars: Vec<Bar>,
    initial_visible: usize,
    step: Duration,
    started: Instant,
    failures_left: Mutex<u32>,
    subscribe_calls: Mutex<u32>,
    history_calls: Mutex<u32>,
    sender: Mutex<Option<mpsc::Sender<MarketEvent>>>,
}

impl MockMarketData {
    pub fn new(bars: Vec<Bar>, initial_visible: usize, step: Duration) -> Self {
        Self {
            bars,
            initial_visible,
            step,
            started: Instant::now(),
            failures_left: Mutex::new(0),
            subscribe_calls: Mutex::new(0),
            history_calls: Mutex::new(0),
            sender: Mutex::new(None),
        }
    }

    /// All bars visible from the start; history never grows.
    pub fn fixed(bars: Vec<Bar>) -> Self {
        let n = bars.len();
        Self::new(bars, n, Duration::from_secs(u32::MAX as u64))
    }

    pub fn failing_subscriptions(self, failures: u32) -> Self {
        *self.failures_left.lock().unwrap() = failures;
        self
    }

    pub fn visible(&self) -> usize {
        let grown = (self.started.elapsed().as_secs_f64() / self.step.as_secs_f64()) as usize;
        (self.initial_visible + grown).min(self.bars.len())
    }

    pub fn subscribe_calls(&self) -> u32 {
        *self.subscribe_calls.lock().unwrap()
    }

    pub fn history_calls(&self) -> u32 {
        *self.history_calls.lock().unwrap()
    }

    pub fn sender(&self) -> Option<mpsc::Sender<MarketEvent>> {
        self.sender.lock().unwrap().clone()
    }

    /// Drop the open stream's sender so the subscriber sees it end.
    pub fn close_stream(&self) {
        self.sender.lock().unwrap().take();
    }

    /// Wait (in tokio time) until a subscription is open.
    pub async fn wait_for_subscription(&self) -> mpsc::Sender<MarketEvent> {
        loop {
            if let Some(tx) = self.sender() {
                return tx;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl MarketDataPort for MockMarketData {
    async fn historical_bars(
        &self,
        _pair: &str,
        _timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Bar>, MarketDataError> {
        *self.history_calls.lock().unwrap() += 1;
        let visible = self.visible();
        Ok(self.bars[visible.saturating_sub(count)..visible].to_vec())
    }

    async fn subscribe(
        &self,
        _pair: &str,
        _timeframe: Timeframe,
    ) -> Result<Subscription, MarketDataError> {
        *self.subscribe_calls.lock().unwrap() += 1;
        {
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(MarketDataError::SubscriptionFailed {
                    reason: "connection refused".into(),
                });
            }
        }
        let (tx, rx) = mpsc::channel(64);
        *self.sender.lock().unwrap() = Some(tx);
        Ok(Subscription::new(rx))
    }

    async fn current_price(&self, _pair: &str) -> Result<f64, MarketDataError> {
        let visible = self.visible();
        visible
            .checked_sub(1)
            .map(|i| self.bars[i].close)
            .ok_or_else(|| MarketDataError::Unavailable {
                reason: "no bars".into(),
            })
    }
}

/// Order router that fills at the requested price unless a scripted
/// response is queued.
pub struct MockOrderRouter {
    pub balances: Mutex<HashMap<String, f64>>,
    pub responses: Mutex<VecDeque<Result<OrderFill, RoutingError>>>,
    pub requests: Mutex<Vec<OrderRequest>>,
    pub balance_calls: Mutex<u32>,
}

impl MockOrderRouter {
    pub fn funded(asset: &str, amount: f64) -> Self {
        Self {
            balances: Mutex::new(HashMap::from([(asset.to_string(), amount)])),
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            balance_calls: Mutex::new(0),
        }
    }

    pub fn then_reject(self, reason: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(RoutingError::Rejected {
                reason: reason.to_string(),
            }));
        self
    }

    /// Queue a rejection for the next order on an already shared router.
    pub fn reject_next(&self, reason: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(RoutingError::Rejected {
                reason: reason.to_string(),
            }));
    }

    pub fn requests(&self) -> Vec<OrderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl OrderPort for MockOrderRouter {
    async fn place_order(
        &self,
        _broker_id: &str,
        request: &OrderRequest,
    ) -> Result<OrderFill, RoutingError> {
        let mut requests = self.requests.lock().unwrap();
        requests.push(request.clone());
        if let Some(response) = self.responses.lock().unwrap().pop_front() {
            return response;
        }
        Ok(OrderFill {
            id: format!("ord-{}", requests.len()),
            status: "filled".into(),
            filled_price: request.price,
            filled_qty: request.quantity,
            confirmed: true,
        })
    }

    async fn get_balances(&self, _broker_id: &str) -> Result<HashMap<String, f64>, RoutingError> {
        *self.balance_calls.lock().unwrap() += 1;
        Ok(self.balances.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub trades: Mutex<Vec<TradeRecord>>,
    pub logs: Mutex<Vec<(String, LogLine)>>,
}

impl RecordingSink {
    pub fn trades(&self) -> Vec<TradeRecord> {
        self.trades.lock().unwrap().clone()
    }

    pub fn messages(&self, bot_id: &str) -> Vec<String> {
        self.logs
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == bot_id)
            .map(|(_, line)| line.message.clone())
            .collect()
    }
}

impl TradeSinkPort for RecordingSink {
    fn record_trade(&self, trade: &TradeRecord) -> Result<(), TradescriptError> {
        self.trades.lock().unwrap().push(trade.clone());
        Ok(())
    }

    fn record_log(&self, bot_id: &str, line: &LogLine) -> Result<(), TradescriptError> {
        self.logs
            .lock()
            .unwrap()
            .push((bot_id.to_string(), line.clone()));
        Ok(())
    }
}

/// Poll `condition` every 10ms of tokio time, giving up after `limit`.
pub async fn eventually<F: Fn() -> bool>(limit: Duration, condition: F) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
