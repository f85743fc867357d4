//! CLI integration tests.
//!
//! Tests cover:
//! - Bot config loading from INI files, including `script_path`
//! - Exit codes of `backtest` and `validate`
//! - `run` replaying a CSV through the live engine into a JSONL sink

mod common;

use common::*;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tradescript::adapters::file_config_adapter::FileConfigAdapter;
use tradescript::adapters::jsonl_sink_adapter::{read_entries, SinkEntry};
use tradescript::cli::{self, Cli, Command};
use tradescript::domain::error::TradescriptError;
use tradescript::domain::position::TradeReason;
use tradescript::domain::strategy::{BuiltInKind, StrategyDescriptor};
use tradescript::domain::timeframe::Timeframe;

fn write_temp_ini(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn write_csv(path: &Path, bars: &[Bar]) {
    let mut text = String::from("time,open,high,low,close,volume\n");
    for b in bars {
        text.push_str(&format!(
            "{},{},{},{},{},{}\n",
            b.time.timestamp(),
            b.open,
            b.high,
            b.low,
            b.close,
            b.volume
        ));
    }
    fs::write(path, text).unwrap();
}

const BUILT_IN_INI: &str = r#"
[bot]
id = trend-1
pair = ETH/USDT
timeframe = 15m
risk_percent = 5
balance = 2500

[strategy]
kind = ema_cross
fast_period = 5
slow_period = 20

[risk]
stop_loss = 1.5
take_profit = 3
trailing_enabled = yes
trailing_percent = 1
"#;

mod config_loading {
    use super::*;

    #[test]
    fn built_in_strategy_from_ini() {
        let adapter = FileConfigAdapter::from_string(BUILT_IN_INI).unwrap();
        let bot = cli::load_bot(&adapter).unwrap();

        assert_eq!(bot.id, "trend-1");
        assert_eq!(bot.pair, "ETH/USDT");
        assert_eq!(bot.timeframe, Timeframe::FifteenMinutes);
        assert_eq!(bot.balance, 2500.0);
        assert!(bot.risk.trailing_enabled);
        assert_eq!(bot.risk.trailing_pct, 1.0);
        match bot.strategy {
            StrategyDescriptor::BuiltIn(s) => {
                assert_eq!(s.kind, BuiltInKind::EmaCross);
                assert_eq!(s.entry.fast_period, 5);
                assert_eq!(s.entry.slow_period, 20);
                assert_eq!(s.exit.risk, bot.risk);
            }
            other => panic!("expected a built-in strategy, got {other:?}"),
        }
    }

    #[test]
    fn script_path_is_relative_to_the_config_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("scripts")).unwrap();
        fs::write(dir.path().join("scripts/entry.js"), "if (close > 0) { buy(); }").unwrap();
        let config_path = dir.path().join("bot.ini");
        fs::write(
            &config_path,
            "[bot]\npair = BTC/USDT\n[strategy]\nkind = script\nscript = sell()\nscript_path = scripts/entry.js\n",
        )
        .unwrap();

        let adapter = FileConfigAdapter::from_file(&config_path).unwrap();
        let bot = cli::load_bot(&adapter).unwrap();
        assert_eq!(
            bot.strategy,
            StrategyDescriptor::script("if (close > 0) { buy(); }")
        );
    }

    #[test]
    fn unreadable_script_path_is_a_config_error() {
        let file = write_temp_ini(
            "[bot]\npair = BTC/USDT\n[strategy]\nkind = script\nscript_path = missing.js\n",
        );
        let adapter = FileConfigAdapter::from_file(file.path()).unwrap();
        let err = cli::load_bot(&adapter).unwrap_err();
        assert!(matches!(
            err,
            TradescriptError::ConfigInvalid { ref key, .. } if key == "script_path"
        ));
    }

    #[test]
    fn every_problem_is_reported_at_once() {
        let adapter = FileConfigAdapter::from_string(
            "[bot]\nrisk_percent = 150\n[strategy]\nkind = ema_cross\nfast_period = 30\nslow_period = 10\n",
        )
        .unwrap();
        let message = cli::load_bot(&adapter).unwrap_err().to_string();
        assert!(message.contains("pair"), "{message}");
        assert!(message.contains("risk_percent"), "{message}");
        assert!(message.contains("fast_period"), "{message}");
    }

    #[test]
    fn missing_config_file_exits_with_config_code() {
        match cli::load_config(Path::new("/nonexistent/tradescript.ini")) {
            Ok(_) => panic!("missing file loaded"),
            Err(code) => assert_eq!(code, ExitCode::from(2)),
        }
    }
}

mod commands {
    use super::*;

    fn backtest(config: PathBuf, data: PathBuf) -> ExitCode {
        cli::run(Cli {
            command: Command::Backtest {
                config,
                data,
                json: false,
            },
        })
    }

    fn validate(script: PathBuf) -> ExitCode {
        cli::run(Cli {
            command: Command::Validate { script },
        })
    }

    #[test]
    fn backtest_exit_codes() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("bot.ini");
        fs::write(
            &config,
            "[bot]\npair = BTC/USDT\ntimeframe = 1m\n[strategy]\nkind = script\nscript = buy()\n",
        )
        .unwrap();

        let data = dir.path().join("BTC-USDT_1m.csv");
        write_csv(&data, &wave_bars(120));
        assert_eq!(backtest(config.clone(), data.clone()), ExitCode::SUCCESS);

        write_csv(&data, &wave_bars(30));
        assert_eq!(backtest(config.clone(), data.clone()), ExitCode::from(4));

        fs::write(&data, "time,open,high,low,close,volume\nnot-a-time,1,1,1,1,1\n").unwrap();
        assert_eq!(backtest(config.clone(), data), ExitCode::from(4));

        let broken = dir.path().join("broken.ini");
        fs::write(&broken, "[bot]\npair = BTC/USDT\n[strategy]\nkind = script\nscript = buy(\n")
            .unwrap();
        assert_eq!(
            backtest(broken, dir.path().join("BTC-USDT_1m.csv")),
            ExitCode::from(2)
        );
    }

    #[test]
    fn validate_exit_codes() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.js");
        fs::write(&good, "let r = rsi(14);\nif (crossunder(r, 30)) { buy(); }\n").unwrap();
        assert_eq!(validate(good), ExitCode::SUCCESS);

        let syntax = dir.path().join("syntax.js");
        fs::write(&syntax, "let r = rsi(14;\n").unwrap();
        assert_eq!(validate(syntax), ExitCode::from(3));

        let escape = dir.path().join("escape.js");
        fs::write(&escape, "closes.constructor\n").unwrap();
        assert_eq!(validate(escape), ExitCode::from(3));

        assert_eq!(validate(dir.path().join("absent.js")), ExitCode::from(1));
    }

    #[test]
    fn run_replays_csv_into_jsonl_sink() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("BTC-USDT_1m.csv");
        write_csv(&data, &wave_bars(100));
        let config = dir.path().join("bot.ini");
        fs::write(
            &config,
            "[bot]\nid = replay-1\npair = BTC/USDT\ntimeframe = 1m\n\
             [strategy]\nkind = script\nscript = buy()\n\
             [risk]\nstop_loss = 50\ntake_profit = 50\n\
             [engine]\ncandle_capacity = 60\nseed_bars = 60\n\
             [fees]\nbps = 10\n\
             [sink]\njsonl_path = out/trades.jsonl\n",
        )
        .unwrap();

        let code = cli::run(Cli {
            command: Command::Run {
                config,
                data,
                pace_ms: 0,
            },
        });
        assert_eq!(code, ExitCode::SUCCESS);

        let entries = read_entries(&dir.path().join("out/trades.jsonl")).unwrap();
        let trades: Vec<_> = entries
            .iter()
            .filter_map(|e| match e {
                SinkEntry::Trade(t) => Some(t.clone()),
                SinkEntry::Log { .. } => None,
            })
            .collect();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].reason, TradeReason::Entry);
        assert_eq!(trades[1].reason, TradeReason::ManualStop);
        assert!(trades.iter().all(|t| t.bot_id == "replay-1"));

        let messages: Vec<&str> = entries
            .iter()
            .filter_map(|e| match e {
                SinkEntry::Log { bot_id, line } if bot_id == "replay-1" => Some(line.message.as_str()),
                _ => None,
            })
            .collect();
        assert!(messages.contains(&"seeded 60 bars"));
        assert_eq!(
            messages.iter().filter(|m| m.starts_with("evaluated bar ")).count(),
            40
        );
        assert_eq!(messages.last(), Some(&"stopped"));
    }
}
