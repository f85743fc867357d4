//! CSV bar files.
//!
//! One file per pair and timeframe, named `BASE-QUOTE_tf.csv` (for example
//! `BTC-USDT_1h.csv`), with a header row and the columns
//! `time,open,high,low,close,volume`. The time column accepts RFC 3339,
//! `YYYY-MM-DD[ HH:MM:SS]` (UTC), or unix seconds / milliseconds.

use crate::domain::error::TradescriptError;
use crate::domain::ohlcv::Bar;
use crate::domain::timeframe::Timeframe;
use crate::ports::data_port::DataPort;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};

/// Integer timestamps above this are taken as milliseconds.
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, pair: &str, timeframe: Timeframe) -> PathBuf {
        self.base_path
            .join(format!("{}_{}.csv", pair.replace('/', "-"), timeframe))
    }
}

fn data_error(reason: impl Into<String>) -> TradescriptError {
    TradescriptError::Data {
        reason: reason.into(),
    }
}

pub fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<i64>() {
        return if n.abs() >= MILLIS_THRESHOLD {
            DateTime::from_timestamp_millis(n)
        } else {
            DateTime::from_timestamp(n, 0)
        };
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(t.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
}

fn field(record: &csv::StringRecord, index: usize, name: &str, line: u64) -> Result<f64, TradescriptError> {
    let raw = record
        .get(index)
        .ok_or_else(|| data_error(format!("line {line}: missing {name} column")))?;
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|e| data_error(format!("line {line}: invalid {name} value '{raw}': {e}")))?;
    if !value.is_finite() {
        return Err(data_error(format!("line {line}: {name} is not finite")));
    }
    Ok(value)
}

/// Read and validate one bar file. Bars come back sorted by time with
/// duplicate timestamps removed (first one wins).
pub fn read_file(path: &Path) -> Result<Vec<Bar>, TradescriptError> {
    let content = fs::read_to_string(path)
        .map_err(|e| data_error(format!("failed to read {}: {e}", path.display())))?;

    let mut rdr = csv::Reader::from_reader(content.as_bytes());
    let mut bars = Vec::new();
    for result in rdr.records() {
        let record = result.map_err(|e| data_error(format!("CSV parse error: {e}")))?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);

        let raw_time = record
            .get(0)
            .ok_or_else(|| data_error(format!("line {line}: missing time column")))?;
        let time = parse_time(raw_time)
            .ok_or_else(|| data_error(format!("line {line}: invalid time '{raw_time}'")))?;

        let bar = Bar {
            time,
            open: field(&record, 1, "open", line)?,
            high: field(&record, 2, "high", line)?,
            low: field(&record, 3, "low", line)?,
            close: field(&record, 4, "close", line)?,
            volume: field(&record, 5, "volume", line)?,
        };
        if bar.high < bar.low {
            return Err(data_error(format!("line {line}: high is below low")));
        }
        bars.push(bar);
    }

    bars.sort_by_key(|b| b.time);
    bars.dedup_by_key(|b| b.time);
    Ok(bars)
}

impl DataPort for CsvAdapter {
    fn fetch_bars(&self, pair: &str, timeframe: Timeframe) -> Result<Vec<Bar>, TradescriptError> {
        read_file(&self.csv_path(pair, timeframe))
    }

    fn list_pairs(&self) -> Result<Vec<String>, TradescriptError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| {
            data_error(format!(
                "failed to read directory {}: {e}",
                self.base_path.display()
            ))
        })?;

        let mut pairs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| data_error(format!("directory entry error: {e}")))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(stem) = name.strip_suffix(".csv") else {
                continue;
            };
            if let Some((pair, tf)) = stem.rsplit_once('_') {
                if tf.parse::<Timeframe>().is_ok() {
                    pairs.push(pair.replace('-', "/"));
                }
            }
        }

        pairs.sort();
        pairs.dedup();
        Ok(pairs)
    }

    fn get_data_range(
        &self,
        pair: &str,
        timeframe: Timeframe,
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>, usize)>, TradescriptError> {
        let path = self.csv_path(pair, timeframe);
        if !path.exists() {
            return Ok(None);
        }
        let bars = read_file(&path)?;
        Ok(match (bars.first(), bars.last()) {
            (Some(first), Some(last)) => Some((first.time, last.time, bars.len())),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    const HEADER: &str = "time,open,high,low,close,volume\n";

    fn setup_test_data() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_path_buf();

        let content = format!(
            "{HEADER}\
            2024-01-15T02:00:00Z,102.0,104.0,101.0,103.0,7.5\n\
            2024-01-15T00:00:00Z,100.0,110.0,90.0,105.0,12\n\
            2024-01-15T01:00:00Z,105.0,115.0,100.0,110.0,9\n"
        );
        fs::write(path.join("BTC-USDT_1h.csv"), content).unwrap();
        fs::write(path.join("BTC-USDT_1d.csv"), HEADER).unwrap();
        fs::write(path.join("ETH-USDT_5m.csv"), HEADER).unwrap();
        fs::write(path.join("notes.txt"), "not data").unwrap();
        fs::write(path.join("readme_v2.csv"), HEADER).unwrap();

        (dir, path)
    }

    #[test]
    fn fetch_bars_sorted_by_time() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        let bars = adapter.fetch_bars("BTC/USDT", Timeframe::OneHour).unwrap();
        assert_eq!(bars.len(), 3);
        assert_eq!(bars[0].time, Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap());
        assert_eq!(bars[0].open, 100.0);
        assert_eq!(bars[0].high, 110.0);
        assert_eq!(bars[0].low, 90.0);
        assert_eq!(bars[0].close, 105.0);
        assert_eq!(bars[0].volume, 12.0);
        assert_eq!(bars[2].volume, 7.5);
    }

    #[test]
    fn fetch_bars_errors_for_missing_file() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);
        let err = adapter.fetch_bars("XRP/USDT", Timeframe::OneHour).unwrap_err();
        assert!(matches!(err, TradescriptError::Data { .. }));
    }

    #[test]
    fn list_pairs_from_file_names() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);
        assert_eq!(adapter.list_pairs().unwrap(), vec!["BTC/USDT", "ETH/USDT"]);
    }

    #[test]
    fn data_range() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        let (first, last, count) = adapter
            .get_data_range("BTC/USDT", Timeframe::OneHour)
            .unwrap()
            .unwrap();
        assert_eq!(first, Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap());
        assert_eq!(last, Utc.with_ymd_and_hms(2024, 1, 15, 2, 0, 0).unwrap());
        assert_eq!(count, 3);

        assert_eq!(adapter.get_data_range("BTC/USDT", Timeframe::OneDay).unwrap(), None);
        assert_eq!(adapter.get_data_range("SOL/USDT", Timeframe::OneDay).unwrap(), None);
    }

    #[test]
    fn time_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(parse_time("2024-03-01T12:00:00Z"), Some(expected));
        assert_eq!(parse_time("2024-03-01T14:00:00+02:00"), Some(expected));
        assert_eq!(parse_time("2024-03-01 12:00:00"), Some(expected));
        assert_eq!(parse_time("1709294400"), Some(expected));
        assert_eq!(parse_time("1709294400000"), Some(expected));
        assert_eq!(
            parse_time("2024-03-01"),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_time("yesterday"), None);
    }

    #[test]
    fn malformed_rows_are_rejected() {
        let dir = TempDir::new().unwrap();
        let bad_price = dir.path().join("bad.csv");
        fs::write(&bad_price, format!("{HEADER}2024-01-01,1,2,0.5,abc,10\n")).unwrap();
        let err = read_file(&bad_price).unwrap_err();
        assert!(err.to_string().contains("invalid close value"), "{err}");

        let inverted = dir.path().join("inverted.csv");
        fs::write(&inverted, format!("{HEADER}2024-01-01,1,0.5,2,1,10\n")).unwrap();
        assert!(read_file(&inverted).is_err());
    }

    #[test]
    fn duplicate_timestamps_keep_first() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dup.csv");
        fs::write(
            &path,
            format!("{HEADER}1704067200,1,2,0.5,1.5,10\n1704067200,9,9,9,9,9\n"),
        )
        .unwrap();
        let bars = read_file(&path).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, 1.5);
    }
}
