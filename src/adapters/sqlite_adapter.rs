//! SQLite storage: historical bars, the trade log, and per-bot log lines.
//!
//! Times are stored as unix milliseconds. Enum columns hold the same
//! lowercase tags used in JSON output.

use crate::domain::error::TradescriptError;
use crate::domain::ohlcv::Bar;
use crate::domain::position::TradeRecord;
use crate::domain::timeframe::Timeframe;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use crate::ports::trade_sink_port::{LogLine, TradeSinkPort};
use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use serde::de::DeserializeOwned;
use serde::Serialize;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS bars (
    pair TEXT NOT NULL,
    timeframe TEXT NOT NULL,
    time INTEGER NOT NULL,
    open REAL NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    close REAL NOT NULL,
    volume REAL NOT NULL,
    PRIMARY KEY (pair, timeframe, time)
);
CREATE TABLE IF NOT EXISTS trades (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    bot_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    side TEXT NOT NULL,
    quantity REAL NOT NULL,
    price REAL NOT NULL,
    pnl REAL NOT NULL,
    reason TEXT NOT NULL,
    execution TEXT NOT NULL,
    time INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_trades_bot ON trades(bot_id);
CREATE TABLE IF NOT EXISTS bot_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    bot_id TEXT NOT NULL,
    time INTEGER NOT NULL,
    level TEXT NOT NULL,
    message TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_bot_logs_bot ON bot_logs(bot_id);
";

fn db_error(e: r2d2::Error) -> TradescriptError {
    TradescriptError::Database {
        reason: e.to_string(),
    }
}

fn query_error(e: rusqlite::Error) -> TradescriptError {
    TradescriptError::DatabaseQuery {
        reason: e.to_string(),
    }
}

/// Serialized tag of a unit enum variant, e.g. `stop_loss`.
fn tag<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        Ok(other) => other.to_string(),
        Err(_) => String::new(),
    }
}

fn untag<T: DeserializeOwned>(column: usize, raw: String) -> rusqlite::Result<T> {
    serde_json::from_value(serde_json::Value::String(raw)).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn from_millis(column: usize, millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or(rusqlite::Error::IntegralValueOutOfRange(
        column, millis,
    ))
}

pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteAdapter {
    /// Open the database named by `[sink] sqlite_path` and create the schema.
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, TradescriptError> {
        let db_path =
            config
                .get_string("sink", "sqlite_path")
                .ok_or_else(|| TradescriptError::ConfigMissing {
                    section: "sink".into(),
                    key: "sqlite_path".into(),
                })?;
        let pool_size = config.get_int("sink", "sqlite_pool_size", 4).max(1) as u32;
        Self::open(&db_path, pool_size)
    }

    pub fn open(path: &str, pool_size: u32) -> Result<Self, TradescriptError> {
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(db_error)?;
        let adapter = Self { pool };
        adapter.initialize_schema()?;
        Ok(adapter)
    }

    /// A private database on a single pooled connection.
    pub fn in_memory() -> Result<Self, TradescriptError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager).map_err(db_error)?;
        let adapter = Self { pool };
        adapter.initialize_schema()?;
        Ok(adapter)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, TradescriptError> {
        self.pool.get().map_err(db_error)
    }

    pub fn initialize_schema(&self) -> Result<(), TradescriptError> {
        self.conn()?.execute_batch(SCHEMA).map_err(query_error)
    }

    pub fn insert_bars(
        &self,
        pair: &str,
        timeframe: Timeframe,
        bars: &[Bar],
    ) -> Result<(), TradescriptError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_error)?;
        for bar in bars {
            tx.execute(
                "INSERT OR REPLACE INTO bars (pair, timeframe, time, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    pair,
                    timeframe.as_str(),
                    bar.time.timestamp_millis(),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume
                ],
            )
            .map_err(query_error)?;
        }
        tx.commit().map_err(query_error)
    }

    /// Every trade recorded for a bot, in insertion order.
    pub fn trades(&self, bot_id: &str) -> Result<Vec<TradeRecord>, TradescriptError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT bot_id, symbol, side, quantity, price, pnl, reason, execution, time
                 FROM trades WHERE bot_id = ?1 ORDER BY id ASC",
            )
            .map_err(query_error)?;
        let rows = stmt
            .query_map(params![bot_id], |row| {
                Ok(TradeRecord {
                    bot_id: row.get(0)?,
                    symbol: row.get(1)?,
                    side: untag(2, row.get(2)?)?,
                    quantity: row.get(3)?,
                    price: row.get(4)?,
                    pnl: row.get(5)?,
                    reason: untag(6, row.get(6)?)?,
                    execution: untag(7, row.get(7)?)?,
                    timestamp: from_millis(8, row.get(8)?)?,
                })
            })
            .map_err(query_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_error)
    }

    pub fn log_lines(&self, bot_id: &str) -> Result<Vec<LogLine>, TradescriptError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT time, level, message FROM bot_logs WHERE bot_id = ?1 ORDER BY id ASC")
            .map_err(query_error)?;
        let rows = stmt
            .query_map(params![bot_id], |row| {
                Ok(LogLine {
                    time: from_millis(0, row.get(0)?)?,
                    level: untag(1, row.get(1)?)?,
                    message: row.get(2)?,
                })
            })
            .map_err(query_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_error)
    }
}

impl DataPort for SqliteAdapter {
    fn fetch_bars(&self, pair: &str, timeframe: Timeframe) -> Result<Vec<Bar>, TradescriptError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT time, open, high, low, close, volume FROM bars
                 WHERE pair = ?1 AND timeframe = ?2 ORDER BY time ASC",
            )
            .map_err(query_error)?;
        let rows = stmt
            .query_map(params![pair, timeframe.as_str()], |row| {
                Ok(Bar {
                    time: from_millis(0, row.get(0)?)?,
                    open: row.get(1)?,
                    high: row.get(2)?,
                    low: row.get(3)?,
                    close: row.get(4)?,
                    volume: row.get(5)?,
                })
            })
            .map_err(query_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_error)
    }

    fn list_pairs(&self) -> Result<Vec<String>, TradescriptError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT pair FROM bars ORDER BY pair")
            .map_err(query_error)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(query_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_error)
    }

    fn get_data_range(
        &self,
        pair: &str,
        timeframe: Timeframe,
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>, usize)>, TradescriptError> {
        let conn = self.conn()?;
        let (min, max, count): (Option<i64>, Option<i64>, i64) = conn
            .query_row(
                "SELECT MIN(time), MAX(time), COUNT(*) FROM bars WHERE pair = ?1 AND timeframe = ?2",
                params![pair, timeframe.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(query_error)?;
        match (min, max) {
            (Some(min), Some(max)) => {
                let first = from_millis(0, min).map_err(query_error)?;
                let last = from_millis(1, max).map_err(query_error)?;
                Ok(Some((first, last, count as usize)))
            }
            _ => Ok(None),
        }
    }
}

impl TradeSinkPort for SqliteAdapter {
    fn record_trade(&self, trade: &TradeRecord) -> Result<(), TradescriptError> {
        self.conn()?
            .execute(
                "INSERT INTO trades (bot_id, symbol, side, quantity, price, pnl, reason, execution, time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    trade.bot_id,
                    trade.symbol,
                    tag(&trade.side),
                    trade.quantity,
                    trade.price,
                    trade.pnl,
                    tag(&trade.reason),
                    tag(&trade.execution),
                    trade.timestamp.timestamp_millis()
                ],
            )
            .map_err(query_error)?;
        Ok(())
    }

    fn record_log(&self, bot_id: &str, line: &LogLine) -> Result<(), TradescriptError> {
        self.conn()?
            .execute(
                "INSERT INTO bot_logs (bot_id, time, level, message) VALUES (?1, ?2, ?3, ?4)",
                params![
                    bot_id,
                    line.time.timestamp_millis(),
                    tag(&line.level),
                    line.message
                ],
            )
            .map_err(query_error)?;
        Ok(())
    }
}
