//! Order routing to a broker. Optional per bot.

use crate::domain::error::RoutingError;
use crate::domain::position::Signal;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A market order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Signal,
    pub quantity: f64,
    /// Reference price used for sizing; the venue fills at market.
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderFill {
    pub id: String,
    pub status: String,
    pub filled_price: f64,
    pub filled_qty: f64,
    pub confirmed: bool,
}

#[async_trait]
pub trait OrderPort: Send + Sync {
    async fn place_order(
        &self,
        broker_id: &str,
        request: &OrderRequest,
    ) -> Result<OrderFill, RoutingError>;

    /// Free balance per asset.
    async fn get_balances(&self, broker_id: &str) -> Result<HashMap<String, f64>, RoutingError>;
}
