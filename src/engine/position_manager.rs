//! Opening, closing, and risk-checking a bot's single position.
//!
//! Fills go to the order router when the bot has a funded broker link and
//! are simulated otherwise. Both paths emit the same trade record shape.

use crate::domain::bot::EngineSettings;
use crate::domain::error::RoutingError;
use crate::domain::position::{Execution, Position, Side, Signal, TradeReason, TradeRecord};
use crate::engine::context::{BotContext, BotLog, Failure, Severity};
use crate::engine::EngineDeps;
use crate::ports::order_port::{OrderFill, OrderRequest};
use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Rejection reasons that will not go away by retrying soon.
const PERMANENT_REJECTIONS: &[&str] = &[
    "insufficient",
    "invalid",
    "not allowed",
    "unauthorized",
    "forbidden",
    "unknown symbol",
    "min notional",
    "precision",
];

pub fn classify_rejection(error: &RoutingError) -> Severity {
    match error {
        RoutingError::Rejected { reason } => {
            let reason = reason.to_ascii_lowercase();
            if PERMANENT_REJECTIONS.iter().any(|k| reason.contains(k)) {
                Severity::Permanent
            } else {
                Severity::Transient
            }
        }
        RoutingError::Unavailable { .. } => Severity::Transient,
    }
}

/// Order quantity for a new position: `balance · risk%`, floored at the
/// minimum notional and capped at a fraction of balance. `None` when the
/// capped notional is below the minimum or the price is unusable.
pub fn position_size(
    balance: f64,
    risk_percent: f64,
    price: f64,
    settings: &EngineSettings,
) -> Option<f64> {
    if !(price > 0.0 && balance > 0.0) {
        return None;
    }
    let cap = balance * settings.max_balance_fraction;
    let notional = (balance * risk_percent / 100.0)
        .max(settings.min_notional)
        .min(cap);
    if notional < settings.min_notional {
        return None;
    }
    Some(notional / price)
}

fn order_side(side: Side) -> Signal {
    match side {
        Side::Long => Signal::Buy,
        Side::Short => Signal::Sell,
    }
}

pub struct PositionManager {
    deps: EngineDeps,
    settings: EngineSettings,
    log: BotLog,
}

impl PositionManager {
    pub fn new(deps: EngineDeps, settings: EngineSettings, log: BotLog) -> Self {
        Self {
            deps,
            settings,
            log,
        }
    }

    /// Decide whether the bot trades for real. Needs a broker id, a router,
    /// and a positive quote balance at the broker.
    pub async fn detect_funding(&self, ctx: &mut BotContext) {
        let (Some(broker), Some(router)) = (ctx.config.broker_id.clone(), self.deps.router.clone())
        else {
            self.log.info("no broker link, fills are simulated");
            return;
        };
        match router.get_balances(&broker).await {
            Ok(balances) => match balances.get(ctx.config.quote_asset()) {
                Some(&quote) if quote > 0.0 => {
                    ctx.funded = true;
                    ctx.balance = quote;
                    self.log.info(format!(
                        "broker '{broker}' funded with {quote} {}",
                        ctx.config.quote_asset()
                    ));
                }
                _ => self.log.warn(format!(
                    "broker '{broker}' has no {} balance, fills are simulated",
                    ctx.config.quote_asset()
                )),
            },
            Err(e) => self
                .log
                .warn(format!("broker '{broker}' balance check failed ({e}), fills are simulated")),
        }
    }

    /// Ratchet the best price and close if a stop or target is breached.
    pub async fn check_exits(&self, ctx: &mut BotContext, price: f64, time: DateTime<Utc>) {
        let Some(position) = ctx.position.as_mut() else {
            return;
        };
        position.observe(price);
        if let Some(exit) = ctx.risk.exit_reason(position, price) {
            self.close(ctx, exit.into(), price, time).await;
        }
    }

    /// Act on a signal: close an opposing position first, then open.
    pub async fn handle_signal(
        &self,
        ctx: &mut BotContext,
        signal: Signal,
        price: f64,
        time: DateTime<Utc>,
    ) {
        let side = signal.side();
        if let Some(held) = ctx.position.as_ref().map(|p| p.side) {
            if held == side {
                return;
            }
            if !self.close(ctx, TradeReason::Signal, price, time).await {
                self.log
                    .warn(format!("{signal:?} signal skipped: opposing position still open"));
                return;
            }
        }
        self.open(ctx, side, price, time).await;
    }

    async fn open(&self, ctx: &mut BotContext, side: Side, price: f64, time: DateTime<Utc>) {
        if let Some(remaining) = ctx.cooldown_remaining(Instant::now(), &self.settings) {
            self.log.warn(format!(
                "entry skipped: order cooldown for another {:.1}s",
                remaining.as_secs_f64()
            ));
            return;
        }
        let Some(quantity) = position_size(ctx.balance, ctx.config.risk_percent, price, &self.settings)
        else {
            self.log.warn(format!(
                "entry skipped: balance {:.2} cannot cover minimum notional {:.2}",
                ctx.balance, self.settings.min_notional
            ));
            return;
        };

        let request = OrderRequest {
            symbol: ctx.config.pair.clone(),
            side: order_side(side),
            quantity,
            price,
        };
        let (position, execution) = if ctx.funded {
            match self.route(ctx, &request).await {
                Some(fill) => (
                    Position::open(side, fill.filled_price, fill.filled_qty, time).with_broker_order(fill.id),
                    Execution::Real,
                ),
                None => return,
            }
        } else {
            (Position::open(side, price, quantity, time), Execution::Simulated)
        };

        self.log.info(format!(
            "opened {side} {:.6} @ {:.4}",
            position.quantity, position.entry_price
        ));
        self.emit(
            ctx,
            TradeRecord {
                bot_id: ctx.config.id.clone(),
                symbol: ctx.config.pair.clone(),
                side: order_side(side),
                quantity: position.quantity,
                price: position.entry_price,
                pnl: 0.0,
                reason: TradeReason::Entry,
                execution,
                timestamp: time,
            },
        );
        ctx.position = Some(position);
        if execution == Execution::Real {
            self.resync_balance(ctx).await;
        }
    }

    /// Close the open position. Returns `false` when a routed close was
    /// rejected or held back by the order cooldown; the position stays open.
    pub async fn close(
        &self,
        ctx: &mut BotContext,
        reason: TradeReason,
        price: f64,
        time: DateTime<Utc>,
    ) -> bool {
        self.close_position(ctx, reason, price, time, true).await
    }

    /// Close on shutdown. Routes even during a cooldown, since there is no
    /// later tick to retry on.
    pub async fn close_on_stop(&self, ctx: &mut BotContext, price: f64, time: DateTime<Utc>) -> bool {
        self.close_position(ctx, TradeReason::ManualStop, price, time, false)
            .await
    }

    async fn close_position(
        &self,
        ctx: &mut BotContext,
        reason: TradeReason,
        price: f64,
        time: DateTime<Utc>,
        respect_cooldown: bool,
    ) -> bool {
        let Some(position) = ctx.position.clone() else {
            return true;
        };
        let routed = ctx.funded && position.broker_order_id.is_some();
        if routed && respect_cooldown {
            if let Some(remaining) = ctx.cooldown_remaining(Instant::now(), &self.settings) {
                self.log.warn(format!(
                    "close ({reason}) skipped: order cooldown for another {:.1}s",
                    remaining.as_secs_f64()
                ));
                return false;
            }
        }
        let request = OrderRequest {
            symbol: ctx.config.pair.clone(),
            side: order_side(position.side.opposite()),
            quantity: position.quantity,
            price,
        };
        let (exit_price, execution) = if routed {
            match self.route(ctx, &request).await {
                Some(fill) => (fill.filled_price, Execution::Real),
                None => return false,
            }
        } else {
            (price, Execution::Simulated)
        };

        let pnl = position.unrealized_pnl(exit_price);
        ctx.position = None;
        if execution == Execution::Simulated {
            ctx.balance += pnl;
        }
        self.log.info(format!(
            "closed {} {:.6} @ {:.4} ({reason}), pnl {:.4}",
            position.side, position.quantity, exit_price, pnl
        ));
        self.emit(
            ctx,
            TradeRecord {
                bot_id: ctx.config.id.clone(),
                symbol: ctx.config.pair.clone(),
                side: request.side,
                quantity: position.quantity,
                price: exit_price,
                pnl,
                reason,
                execution,
                timestamp: time,
            },
        );
        if execution == Execution::Real {
            self.resync_balance(ctx).await;
        }
        true
    }

    async fn route(&self, ctx: &mut BotContext, request: &OrderRequest) -> Option<OrderFill> {
        let (Some(router), Some(broker)) = (self.deps.router.as_ref(), ctx.config.broker_id.as_deref())
        else {
            return None;
        };
        let result = router.place_order(broker, request).await;
        match result {
            Ok(fill) if fill.filled_qty > 0.0 => {
                if !fill.confirmed {
                    self.log
                        .warn(format!("order {} filled but not yet confirmed ({})", fill.id, fill.status));
                }
                ctx.last_failure = None;
                Some(fill)
            }
            Ok(fill) => {
                self.fail(ctx, Severity::Transient, format!("order {} not filled ({})", fill.id, fill.status));
                None
            }
            Err(e) => {
                let severity = classify_rejection(&e);
                self.fail(ctx, severity, e.to_string());
                None
            }
        }
    }

    fn fail(&self, ctx: &mut BotContext, severity: Severity, reason: String) {
        ctx.last_failure = Some(Failure {
            at: Instant::now(),
            severity,
        });
        let cooldown = match severity {
            Severity::Transient => self.settings.transient_cooldown,
            Severity::Permanent => self.settings.permanent_cooldown,
        };
        self.log.error(format!(
            "order failed ({severity:?}): {reason}; cooling down {}s",
            cooldown.as_secs()
        ));
    }

    async fn resync_balance(&self, ctx: &mut BotContext) {
        let (Some(router), Some(broker)) = (self.deps.router.as_ref(), ctx.config.broker_id.as_deref())
        else {
            return;
        };
        let result = router.get_balances(broker).await;
        match result {
            Ok(balances) => {
                if let Some(&quote) = balances.get(ctx.config.quote_asset()) {
                    ctx.balance = quote;
                }
            }
            Err(e) => self.log.warn(format!("balance resync failed: {e}")),
        }
    }

    fn emit(&self, ctx: &BotContext, record: TradeRecord) {
        self.charge_fee(record.price, record.quantity, &ctx.config.id);
        if let Some(sink) = &self.deps.sink {
            if let Err(e) = sink.record_trade(&record) {
                self.log.error(format!("trade sink write failed: {e}"));
            }
        }
    }

    fn charge_fee(&self, price: f64, quantity: f64, bot_id: &str) {
        let Some(fees) = self.deps.fees.clone() else {
            return;
        };
        let bot_id = bot_id.to_string();
        tokio::task::spawn_blocking(move || match fees.apply_volume_fee(price, quantity) {
            Ok(fee) => tracing::debug!(bot = %bot_id, fee, "volume fee applied"),
            Err(e) => tracing::warn!(bot = %bot_id, error = %e, "volume fee failed"),
        });
    }
}
