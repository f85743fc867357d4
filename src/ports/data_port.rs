//! Historical bar source used for backtests and seeding.

use crate::domain::error::TradescriptError;
use crate::domain::ohlcv::Bar;
use crate::domain::timeframe::Timeframe;
use chrono::{DateTime, Utc};

pub trait DataPort {
    /// All stored bars for `pair` at `timeframe`, oldest first.
    fn fetch_bars(&self, pair: &str, timeframe: Timeframe) -> Result<Vec<Bar>, TradescriptError>;

    fn list_pairs(&self) -> Result<Vec<String>, TradescriptError>;

    /// First and last bar time plus bar count, or `None` without data.
    fn get_data_range(
        &self,
        pair: &str,
        timeframe: Timeframe,
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>, usize)>, TradescriptError>;
}
