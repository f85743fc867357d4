//! Async live trading engine.
//!
//! One task per bot. A task owns its [`context::BotContext`] and talks to
//! the outside only through a stop signal, a telemetry channel, and the
//! shared log ring.

pub mod context;
pub mod live;
pub mod position_manager;
pub mod runner;
pub mod transport;

use crate::ports::fee_port::FeePort;
use crate::ports::market_data_port::MarketDataPort;
use crate::ports::order_port::OrderPort;
use crate::ports::trade_sink_port::TradeSinkPort;
use std::sync::Arc;

pub use context::{BotState, LogRing, Telemetry};
pub use live::LiveEngine;
pub use transport::{TransportMachine, TransportState};

/// Collaborators shared by every bot. Only market data is mandatory.
#[derive(Clone)]
pub struct EngineDeps {
    pub market: Arc<dyn MarketDataPort>,
    pub router: Option<Arc<dyn OrderPort>>,
    pub fees: Option<Arc<dyn FeePort>>,
    pub sink: Option<Arc<dyn TradeSinkPort>>,
}

impl EngineDeps {
    pub fn new(market: Arc<dyn MarketDataPort>) -> Self {
        Self {
            market,
            router: None,
            fees: None,
            sink: None,
        }
    }

    pub fn with_router(mut self, router: Arc<dyn OrderPort>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn with_fees(mut self, fees: Arc<dyn FeePort>) -> Self {
        self.fees = Some(fees);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn TradeSinkPort>) -> Self {
        self.sink = Some(sink);
        self
    }
}
