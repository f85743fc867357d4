//! Port traits: the seams between the domain and the outside world.

pub mod config_port;
pub mod data_port;
pub mod fee_port;
pub mod market_data_port;
pub mod order_port;
pub mod trade_sink_port;
