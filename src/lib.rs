//! tradescript: scriptable trading strategies, backtested offline and run
//! live.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! the async live engine in [`engine`], concrete implementations in
//! [`adapters`].

pub mod domain;
pub mod ports;
pub mod engine;
pub mod adapters;
pub mod cli;
