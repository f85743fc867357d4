//! The per-bot task: seed, evaluate, stream (or poll), and tear down.

use crate::domain::bot::{BotConfig, EngineSettings};
use crate::domain::evaluator::CompiledStrategy;
use crate::domain::ohlcv::{Bar, Upsert};
use crate::engine::context::{BotContext, BotLog, BotState, Telemetry};
use crate::engine::position_manager::PositionManager;
use crate::engine::transport::{poll_interval, Recovery, TransportMachine, TransportState};
use crate::engine::EngineDeps;
use crate::ports::market_data_port::MarketEvent;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Bars fetched per poll once the first poll has caught up.
const POLL_LOOKBACK: usize = 5;

enum Flow {
    Continue,
    Stop,
}

/// Resolves once a stop is requested or the engine side went away.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|requested| *requested).await;
}

pub struct BotRunner {
    ctx: BotContext,
    deps: EngineDeps,
    settings: EngineSettings,
    strategy: CompiledStrategy,
    positions: PositionManager,
    transport: TransportMachine,
    log: BotLog,
    state: BotState,
    telemetry: watch::Sender<Telemetry>,
    stop: watch::Receiver<bool>,
}

impl BotRunner {
    pub fn new(
        config: BotConfig,
        strategy: CompiledStrategy,
        deps: EngineDeps,
        settings: EngineSettings,
        log: BotLog,
        stop: watch::Receiver<bool>,
        telemetry: watch::Sender<Telemetry>,
    ) -> Self {
        let transport = TransportMachine::new(
            settings.max_subscription_failures,
            settings.backoff_initial,
            settings.backoff_max,
        );
        Self {
            ctx: BotContext::new(config, &settings),
            positions: PositionManager::new(deps.clone(), settings.clone(), log.clone()),
            deps,
            settings,
            strategy,
            transport,
            log,
            state: BotState::Starting,
            telemetry,
            stop,
        }
    }

    pub async fn run(mut self) {
        self.log.info(format!(
            "starting {} on {} {}",
            self.ctx.config.strategy.label(),
            self.ctx.config.pair,
            self.ctx.config.timeframe
        ));
        self.publish();

        if self.seed().await {
            self.positions.detect_funding(&mut self.ctx).await;
            self.state = BotState::Running;
            if let Some(last) = self.ctx.candles.last() {
                let (price, time) = (last.close, last.time);
                self.evaluate("initial evaluation".to_string(), price, time).await;
            }
            self.publish();

            loop {
                if self.transport.is_degraded() {
                    self.poll().await;
                    break;
                }
                if let Flow::Stop = self.stream().await {
                    break;
                }
            }
        }
        self.finish().await;
    }

    /// Fetch seed history, retrying with backoff. `false` if stopped first.
    async fn seed(&mut self) -> bool {
        let mut stop = self.stop.clone();
        let mut failures = 0u32;
        loop {
            let fetch = self.deps.market.historical_bars(
                &self.ctx.config.pair,
                self.ctx.config.timeframe,
                self.settings.seed_bars,
            );
            let result = tokio::select! {
                _ = stopped(&mut stop) => return false,
                result = fetch => result,
            };
            match result {
                Ok(bars) => {
                    let count = bars.len();
                    self.ctx.watermark = count.checked_sub(2).map(|i| bars[i].time);
                    self.ctx.last_price = bars.last().map(|b| b.close);
                    self.ctx.candles.extend(bars);
                    self.log.info(format!("seeded {count} bars"));
                    return true;
                }
                Err(e) => {
                    failures += 1;
                    let delay = self.transport.backoff(failures);
                    self.log.warn(format!(
                        "seed fetch failed ({e}), retrying in {}s",
                        delay.as_secs()
                    ));
                    tokio::select! {
                        _ = stopped(&mut stop) => return false,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// One subscribe attempt and, if it succeeds, the life of that stream.
    async fn stream(&mut self) -> Flow {
        let mut stop = self.stop.clone();
        self.transport.begin_connect();
        self.publish();

        let subscribe = self
            .deps
            .market
            .subscribe(&self.ctx.config.pair, self.ctx.config.timeframe);
        let result = tokio::select! {
            _ = stopped(&mut stop) => return Flow::Stop,
            result = subscribe => result,
        };

        match result {
            Ok(mut subscription) => {
                self.transport.on_connected();
                self.log.info(format!(
                    "subscribed to {} {}",
                    self.ctx.config.pair, self.ctx.config.timeframe
                ));
                self.publish();
                self.backfill().await;
                loop {
                    let event = tokio::select! {
                        _ = stopped(&mut stop) => {
                            subscription.unsubscribe();
                            return Flow::Stop;
                        }
                        event = subscription.recv() => event,
                    };
                    let Some(event) = event else {
                        break;
                    };
                    self.transport.on_event();
                    match event {
                        MarketEvent::Tick { price, time } => self.on_tick(price, time).await,
                        MarketEvent::BarClose(bar) => self.on_bar_close(bar).await,
                    }
                }
                self.log.warn("market data stream ended");
            }
            Err(e) => self.log.warn(format!("subscribe failed: {e}")),
        }

        match self.transport.on_failure() {
            Recovery::RetryAfter(delay) => {
                self.log.info(format!(
                    "reconnecting in {}s after {} consecutive failures",
                    delay.as_secs(),
                    self.transport.consecutive_failures()
                ));
                self.publish();
                tokio::select! {
                    _ = stopped(&mut stop) => Flow::Stop,
                    _ = tokio::time::sleep(delay) => Flow::Continue,
                }
            }
            Recovery::Poll => {
                self.log.warn(format!(
                    "{} consecutive subscription failures, switching to polling",
                    self.transport.consecutive_failures()
                ));
                self.publish();
                Flow::Continue
            }
        }
    }

    /// Catch up on bars closed while no stream was delivering.
    async fn backfill(&mut self) {
        let fetch = self.deps.market.historical_bars(
            &self.ctx.config.pair,
            self.ctx.config.timeframe,
            self.settings.seed_bars,
        );
        match fetch.await {
            Ok(bars) => self.absorb(bars).await,
            Err(e) => self.log.warn(format!("backfill failed: {e}")),
        }
    }

    /// Degraded mode: fixed-interval polling until stopped.
    async fn poll(&mut self) {
        let period = poll_interval(self.ctx.config.timeframe);
        self.log.info(format!("polling every {}s", period.as_secs()));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stop = self.stop.clone();
        let mut lookback = self.settings.seed_bars;
        loop {
            tokio::select! {
                _ = stopped(&mut stop) => return,
                _ = ticker.tick() => {}
            }
            let fetch = self.deps.market.historical_bars(
                &self.ctx.config.pair,
                self.ctx.config.timeframe,
                lookback,
            );
            match fetch.await {
                Ok(bars) => {
                    self.absorb(bars).await;
                    lookback = POLL_LOOKBACK.min(self.settings.seed_bars);
                }
                Err(e) => self.log.warn(format!("poll failed: {e}")),
            }
        }
    }

    /// All but the last bar are closed; the last one is still forming and
    /// only moves the price.
    async fn absorb(&mut self, mut bars: Vec<Bar>) {
        let Some(forming) = bars.pop() else {
            return;
        };
        for bar in bars {
            self.on_bar_close(bar).await;
        }
        let (price, time) = (forming.close, forming.time);
        if self.ctx.watermark.is_none_or(|w| time > w) {
            self.ctx.candles.upsert(forming);
        }
        self.on_tick(price, time).await;
    }

    async fn on_tick(&mut self, price: f64, time: DateTime<Utc>) {
        self.ctx.last_price = Some(price);
        self.positions.check_exits(&mut self.ctx, price, time).await;
        self.publish();
    }

    async fn on_bar_close(&mut self, bar: Bar) {
        if self.ctx.watermark.is_some_and(|w| bar.time <= w) {
            tracing::debug!(bot = %self.ctx.config.id, time = %bar.time, "bar already evaluated");
            return;
        }
        let (price, time) = (bar.close, bar.time);
        if self.ctx.candles.upsert(bar) == Upsert::Rejected {
            self.log.warn(format!("out-of-order bar {} ignored", time.to_rfc3339()));
            return;
        }
        self.ctx.watermark = Some(time);
        self.ctx.last_price = Some(price);
        self.positions.check_exits(&mut self.ctx, price, time).await;
        self.evaluate(format!("evaluated bar {}", time.to_rfc3339()), price, time)
            .await;
    }

    async fn evaluate(&mut self, label: String, price: f64, time: DateTime<Utc>) {
        let evaluation = self.strategy.evaluate(self.ctx.candles.window());
        self.ctx.evaluations += 1;
        for line in &evaluation.logs {
            self.log.info(format!("script: {line}"));
        }
        if let Some(error) = &evaluation.error {
            self.log.error(format!("evaluation failed: {error}"));
        }
        if let Some(risk) = evaluation.risk {
            self.ctx.risk = risk;
        }
        self.ctx.last_signal = evaluation.signal;
        match evaluation.signal {
            Some(signal) => self.log.info(format!("{label} -> {signal:?}")),
            None => self.log.info(label),
        }
        if let Some(signal) = evaluation.signal {
            self.positions
                .handle_signal(&mut self.ctx, signal, price, time)
                .await;
        }
        self.publish();
    }

    async fn finish(mut self) {
        if self.ctx.position.is_some() {
            match self.stop_price().await {
                Some(price) => {
                    if !self
                        .positions
                        .close_on_stop(&mut self.ctx, price, Utc::now())
                        .await
                    {
                        self.log.error("close on stop failed, position left open at broker");
                    }
                }
                None => self.log.error("no price to close position on stop"),
            }
        }
        self.state = BotState::Stopped;
        self.log.info("stopped");
        self.telemetry.send_replace(
            self.ctx
                .snapshot(BotState::Stopped, TransportState::Disconnected),
        );
    }

    /// Last seen price, or a fresh quote when the bot has seen none.
    async fn stop_price(&self) -> Option<f64> {
        if let Some(price) = self.ctx.mark_price() {
            return Some(price);
        }
        match self.deps.market.current_price(&self.ctx.config.pair).await {
            Ok(price) => {
                self.log.info(format!("closing at quoted price {price}"));
                Some(price)
            }
            Err(e) => {
                self.log.warn(format!("price quote on stop failed: {e}"));
                None
            }
        }
    }

    fn publish(&self) {
        let transport = self.transport.state();
        self.telemetry
            .send_replace(self.ctx.snapshot(self.state, transport));
    }
}
