//! JSON-lines trade sink: one self-describing object per line, appended.

use crate::domain::error::TradescriptError;
use crate::domain::position::TradeRecord;
use crate::ports::trade_sink_port::{LogLine, TradeSinkPort};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkEntry {
    Trade(TradeRecord),
    Log {
        bot_id: String,
        #[serde(flatten)]
        line: LogLine,
    },
}

pub struct JsonlTradeSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonlTradeSink {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, TradescriptError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, entry: &SinkEntry) -> Result<(), TradescriptError> {
        let json = serde_json::to_string(entry)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        writeln!(writer, "{json}")?;
        writer.flush()?;
        Ok(())
    }
}

impl TradeSinkPort for JsonlTradeSink {
    fn record_trade(&self, trade: &TradeRecord) -> Result<(), TradescriptError> {
        self.append(&SinkEntry::Trade(trade.clone()))
    }

    fn record_log(&self, bot_id: &str, line: &LogLine) -> Result<(), TradescriptError> {
        self.append(&SinkEntry::Log {
            bot_id: bot_id.to_string(),
            line: line.clone(),
        })
    }
}

/// Read a sink file back. Malformed lines are skipped.
pub fn read_entries(path: &Path) -> Result<Vec<SinkEntry>, TradescriptError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = io::BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<SinkEntry>(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping malformed sink line"),
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::position::{Execution, Signal, TradeReason};
    use crate::ports::trade_sink_port::LogLevel;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn trade() -> TradeRecord {
        TradeRecord {
            bot_id: "bot-1".into(),
            symbol: "ETH/USDT".into(),
            side: Signal::Buy,
            quantity: 1.5,
            price: 2000.0,
            pnl: 0.0,
            reason: TradeReason::Entry,
            execution: Execution::Simulated,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn appends_trades_and_logs_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("trades.jsonl");
        let sink = JsonlTradeSink::open(&path).unwrap();

        sink.record_trade(&trade()).unwrap();
        let line = LogLine {
            time: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 1).unwrap(),
            level: LogLevel::Info,
            message: "opened long".into(),
        };
        sink.record_log("bot-1", &line).unwrap();

        let entries = read_entries(&path).unwrap();
        assert_eq!(
            entries,
            vec![
                SinkEntry::Trade(trade()),
                SinkEntry::Log {
                    bot_id: "bot-1".into(),
                    line,
                },
            ]
        );
    }

    #[test]
    fn lines_are_tagged_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trades.jsonl");
        JsonlTradeSink::open(&path)
            .unwrap()
            .record_trade(&trade())
            .unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(value["type"], "trade");
        assert_eq!(value["side"], "buy");
        assert_eq!(value["reason"], "entry");
        assert_eq!(value["execution"], "simulated");
    }

    #[test]
    fn reopening_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trades.jsonl");
        JsonlTradeSink::open(&path).unwrap().record_trade(&trade()).unwrap();
        JsonlTradeSink::open(&path).unwrap().record_trade(&trade()).unwrap();
        fs::write(
            dir.path().join("other.jsonl"),
            "not json\n",
        )
        .unwrap();

        assert_eq!(read_entries(&path).unwrap().len(), 2);
        assert!(read_entries(&dir.path().join("other.jsonl")).unwrap().is_empty());
        assert!(read_entries(&dir.path().join("missing.jsonl")).unwrap().is_empty());
    }
}
