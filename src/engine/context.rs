//! Per-bot mutable state, the bounded log ring, and published telemetry.

use crate::domain::bot::{BotConfig, EngineSettings};
use crate::domain::ohlcv::CandleBuffer;
use crate::domain::position::{Position, Signal};
use crate::domain::risk::RiskConfig;
use crate::engine::transport::TransportState;
use crate::ports::trade_sink_port::{LogLevel, LogLine, TradeSinkPort};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BotState {
    Stopped,
    Starting,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Transient,
    Permanent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Failure {
    pub at: Instant,
    pub severity: Severity,
}

/// Everything a running bot owns. Created on start, dropped on stop.
pub struct BotContext {
    pub config: BotConfig,
    pub candles: CandleBuffer,
    pub position: Option<Position>,
    pub risk: RiskConfig,
    pub balance: f64,
    pub funded: bool,
    pub last_failure: Option<Failure>,
    /// Time of the newest bar already evaluated as closed.
    pub watermark: Option<DateTime<Utc>>,
    pub last_price: Option<f64>,
    pub last_signal: Option<Signal>,
    pub evaluations: u64,
}

impl BotContext {
    pub fn new(config: BotConfig, settings: &EngineSettings) -> Self {
        Self {
            candles: CandleBuffer::new(settings.candle_capacity),
            position: None,
            risk: config.risk,
            balance: config.balance,
            funded: false,
            last_failure: None,
            watermark: None,
            last_price: None,
            last_signal: None,
            evaluations: 0,
            config,
        }
    }

    /// Remaining cooldown after the last order failure, if any.
    pub fn cooldown_remaining(&self, now: Instant, settings: &EngineSettings) -> Option<std::time::Duration> {
        let failure = self.last_failure?;
        let cooldown = match failure.severity {
            Severity::Transient => settings.transient_cooldown,
            Severity::Permanent => settings.permanent_cooldown,
        };
        let elapsed = now.saturating_duration_since(failure.at);
        (elapsed < cooldown).then(|| cooldown - elapsed)
    }

    pub fn mark_price(&self) -> Option<f64> {
        self.last_price.or_else(|| self.candles.last().map(|b| b.close))
    }

    pub fn snapshot(&self, state: BotState, transport: TransportState) -> Telemetry {
        let price = self.mark_price();
        Telemetry {
            state,
            transport,
            last_price: price,
            unrealized_pnl: match (&self.position, price) {
                (Some(p), Some(price)) => p.unrealized_pnl(price),
                _ => 0.0,
            },
            position: self.position.clone(),
            balance: self.balance,
            risk: self.risk,
            funded: self.funded,
            evaluations: self.evaluations,
            last_signal: self.last_signal,
            candles: self.candles.len(),
        }
    }
}

/// Live view of a bot, published on every change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Telemetry {
    pub state: BotState,
    pub transport: TransportState,
    pub last_price: Option<f64>,
    pub position: Option<Position>,
    pub unrealized_pnl: f64,
    pub balance: f64,
    pub risk: RiskConfig,
    pub funded: bool,
    pub evaluations: u64,
    pub last_signal: Option<Signal>,
    pub candles: usize,
}

impl Telemetry {
    pub fn starting(config: &BotConfig) -> Self {
        Self {
            state: BotState::Starting,
            transport: TransportState::Disconnected,
            last_price: None,
            position: None,
            unrealized_pnl: 0.0,
            balance: config.balance,
            risk: config.risk,
            funded: false,
            evaluations: 0,
            last_signal: None,
            candles: 0,
        }
    }
}

/// Bounded in-memory log; the oldest line is dropped when full.
#[derive(Debug)]
pub struct LogRing {
    lines: VecDeque<LogLine>,
    capacity: usize,
}

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, line: LogLine) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn lines(&self) -> Vec<LogLine> {
        self.lines.iter().cloned().collect()
    }
}

pub type SharedLog = Arc<Mutex<LogRing>>;

/// Per-bot logger: writes to the ring, to tracing, and to the sink.
#[derive(Clone)]
pub struct BotLog {
    bot_id: String,
    ring: SharedLog,
    sink: Option<Arc<dyn TradeSinkPort>>,
}

impl BotLog {
    pub fn new(bot_id: impl Into<String>, ring: SharedLog, sink: Option<Arc<dyn TradeSinkPort>>) -> Self {
        Self {
            bot_id: bot_id.into(),
            ring,
            sink,
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.write(LogLevel::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.write(LogLevel::Warn, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.write(LogLevel::Error, message.into());
    }

    fn write(&self, level: LogLevel, message: String) {
        match level {
            LogLevel::Info => tracing::info!(bot = %self.bot_id, "{message}"),
            LogLevel::Warn => tracing::warn!(bot = %self.bot_id, "{message}"),
            LogLevel::Error => tracing::error!(bot = %self.bot_id, "{message}"),
        }
        let line = LogLine {
            time: Utc::now(),
            level,
            message,
        };
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.record_log(&self.bot_id, &line) {
                tracing::warn!(bot = %self.bot_id, error = %e, "log sink write failed");
            }
        }
        self.ring
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(line);
    }
}
