//! Concrete adapter implementations for ports.

pub mod csv_adapter;
pub mod fee_adapter;
pub mod file_config_adapter;
pub mod jsonl_sink_adapter;
pub mod replay_market_adapter;
#[cfg(feature = "sqlite")]
pub mod sqlite_adapter;
