//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::csv_adapter;
use crate::adapters::fee_adapter::BpsFeeModel;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::jsonl_sink_adapter::JsonlTradeSink;
use crate::adapters::replay_market_adapter::ReplayMarketData;
use crate::domain::backtest::{run_backtest, BacktestOutcome, BacktestReport};
use crate::domain::bot::BotConfig;
use crate::domain::config_validation::{
    load_backtest_config, load_bot_config, load_engine_settings, load_fee_bps,
};
use crate::domain::error::{ScriptError, TradescriptError};
use crate::domain::script;
use crate::engine::{EngineDeps, LiveEngine};
use crate::ports::config_port::ConfigPort;
use crate::ports::trade_sink_port::{LogLevel, TradeSinkPort};

/// How long to wait for the bot to evaluate the final replayed bars.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "tradescript", about = "Scriptable trading strategies: backtest and live replay")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Backtest the configured strategy over a CSV bar file
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        data: PathBuf,
        /// Print the full report as JSON on stdout
        #[arg(long)]
        json: bool,
    },
    /// Check a strategy script without running it
    Validate {
        #[arg(short, long)]
        script: PathBuf,
    },
    /// Run the configured bot through the live engine against a CSV replay
    Run {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        data: PathBuf,
        /// Delay between replayed bars, in milliseconds
        #[arg(long, default_value_t = 0)]
        pace_ms: u64,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Backtest { config, data, json } => run_backtest_command(&config, &data, json),
        Command::Validate { script } => run_validate(&script),
        Command::Run {
            config,
            data,
            pace_ms,
        } => run_live_replay(&config, &data, Duration::from_millis(pace_ms)),
    }
}

fn fail(err: &TradescriptError) -> ExitCode {
    eprintln!("error: {err}");
    err.into()
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| fail(&e))
}

/// Read `[strategy] script_path` if set, relative to the config file.
pub fn load_script_override(
    adapter: &FileConfigAdapter,
) -> Result<Option<String>, TradescriptError> {
    let Some(raw) = adapter
        .get_string("strategy", "script_path")
        .filter(|s| !s.trim().is_empty())
    else {
        return Ok(None);
    };
    let path = adapter.resolve_path(raw.trim());
    fs::read_to_string(&path)
        .map(Some)
        .map_err(|e| TradescriptError::ConfigInvalid {
            section: "strategy".into(),
            key: "script_path".into(),
            reason: format!("cannot read {}: {e}", path.display()),
        })
}

/// Load and validate `[bot]`, `[strategy]` and `[risk]` from a config file.
pub fn load_bot(adapter: &FileConfigAdapter) -> Result<BotConfig, TradescriptError> {
    let script = load_script_override(adapter)?;
    load_bot_config(adapter, script)
}

fn run_backtest_command(config_path: &Path, data_path: &Path, json: bool) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let bot = match load_bot(&adapter) {
        Ok(b) => b,
        Err(e) => return fail(&e),
    };
    let bt_config = match load_backtest_config(&adapter) {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };

    eprintln!("Loading bars from {}", data_path.display());
    let bars = match csv_adapter::read_file(data_path) {
        Ok(b) => b,
        Err(e) => return fail(&e),
    };
    eprintln!(
        "Backtesting {} on {} {} ({} bars)",
        bot.strategy.label(),
        bot.pair,
        bot.timeframe,
        bars.len()
    );

    let outcome = match run_backtest(&bot.strategy, &bars, &bt_config) {
        Ok(o) => o,
        Err(e) => return fail(&e.into()),
    };

    match outcome {
        BacktestOutcome::InsufficientData { bars, minimum } => fail(
            &TradescriptError::InsufficientData {
                pair: bot.pair.clone(),
                bars,
                minimum,
            },
        ),
        BacktestOutcome::Completed(report) => {
            print_summary(&report, bt_config.initial_balance);
            if json {
                match serde_json::to_string_pretty(&report) {
                    Ok(text) => println!("{text}"),
                    Err(e) => {
                        eprintln!("error: failed to serialize report: {e}");
                        return ExitCode::from(1);
                    }
                }
            }
            ExitCode::SUCCESS
        }
    }
}

fn print_summary(report: &BacktestReport, initial_balance: f64) {
    let m = &report.metrics;
    eprintln!("\n=== Backtest Results ===");
    eprintln!("Initial Balance:  {initial_balance:.2}");
    eprintln!("Final Balance:    {:.2}", report.final_balance);
    eprintln!("Total Return:     {:.2}%", m.total_return_pct);
    eprintln!("Max Drawdown:     -{:.2}%", report.max_drawdown_pct);
    eprintln!("Total Trades:     {}", report.trades.len());
    eprintln!(
        "Won/Lost/Even:    {}/{}/{}",
        m.trades_won, m.trades_lost, m.trades_breakeven
    );
    eprintln!("Win Rate:         {:.1}%", report.win_rate);
    if report.profit_factor.is_infinite() {
        eprintln!("Profit Factor:    inf");
    } else {
        eprintln!("Profit Factor:    {:.2}", report.profit_factor);
    }
    eprintln!("Avg Win/Loss:     {:.2} / {:.2}", m.avg_win, m.avg_loss);
    if report.script_errors > 0 {
        eprintln!(
            "Script Errors:    {} (first: {})",
            report.script_errors,
            report.first_script_error.as_deref().unwrap_or("-")
        );
    }
}

fn run_validate(script_path: &Path) -> ExitCode {
    let source = match fs::read_to_string(script_path) {
        Ok(s) => s,
        Err(e) => return fail(&e.into()),
    };
    match script::validate(&source) {
        Ok(()) => {
            eprintln!("{}: script is valid", script_path.display());
            ExitCode::SUCCESS
        }
        Err(ScriptError::Parse(e)) => {
            eprintln!("error: {}", e.display_with_context(&source));
            ExitCode::from(3)
        }
        Err(e) => fail(&e.into()),
    }
}

/// Sink from `[sink]`: `jsonl_path` wins over `sqlite_path`.
fn build_sink(adapter: &FileConfigAdapter) -> Result<Option<Arc<dyn TradeSinkPort>>, TradescriptError> {
    if let Some(path) = adapter.get_string("sink", "jsonl_path") {
        let sink = JsonlTradeSink::open(adapter.resolve_path(path.trim()))?;
        eprintln!("Recording trades to {}", sink.path().display());
        return Ok(Some(Arc::new(sink)));
    }
    #[cfg(feature = "sqlite")]
    if adapter.get_string("sink", "sqlite_path").is_some() {
        use crate::adapters::sqlite_adapter::SqliteAdapter;
        let sink = SqliteAdapter::from_config(adapter)?;
        return Ok(Some(Arc::new(sink)));
    }
    Ok(None)
}

fn run_live_replay(config_path: &Path, data_path: &Path, pace: Duration) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let mut bot = match load_bot(&adapter) {
        Ok(b) => b,
        Err(e) => return fail(&e),
    };
    if bot.broker_id.take().is_some() {
        eprintln!("warning: broker_id ignored, replay fills are simulated");
    }
    let settings = match load_engine_settings(&adapter) {
        Ok(s) => s,
        Err(e) => return fail(&e),
    };
    let fees = match load_fee_bps(&adapter).and_then(BpsFeeModel::new) {
        Ok(f) => Arc::new(f),
        Err(e) => return fail(&e),
    };
    let sink = match build_sink(&adapter) {
        Ok(s) => s,
        Err(e) => return fail(&e),
    };
    let bars = match csv_adapter::read_file(data_path) {
        Ok(b) => b,
        Err(e) => return fail(&e),
    };
    if bars.is_empty() {
        return fail(&TradescriptError::Data {
            reason: format!("{} has no bars", data_path.display()),
        });
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(r) => r,
        Err(e) => return fail(&e.into()),
    };

    runtime.block_on(async move {
        let seed = settings.seed_bars.min(bars.len());
        let replayed = bars.len() - seed;
        eprintln!(
            "Replaying {replayed} bars after {seed} seed bars for {} ({} {})",
            bot.id,
            bot.pair,
            bot.timeframe
        );
        let market = Arc::new(ReplayMarketData::new(
            bot.pair.clone(),
            bot.timeframe,
            bars,
            seed,
            pace,
        ));
        let mut finished = market.finished();

        let mut deps = EngineDeps::new(market).with_fees(fees.clone());
        if let Some(sink) = sink {
            deps = deps.with_sink(sink);
        }
        let engine = LiveEngine::new(deps, settings);
        let id = bot.id.clone();
        if let Err(e) = engine.start_bot(bot) {
            return fail(&e);
        }
        let Some(mut telemetry) = engine.watch_telemetry(&id) else {
            return ExitCode::from(1);
        };

        // One evaluation on start plus one per replayed bar.
        let expected = (replayed + 1) as u64;
        let drained = async {
            let _ = finished.wait_for(|done| *done).await;
            let _ = tokio::time::timeout(
                DRAIN_TIMEOUT,
                telemetry.wait_for(|t| t.evaluations >= expected),
            )
            .await;
        };
        tokio::select! {
            _ = drained => tracing::info!(bot = %id, "replay finished"),
            _ = tokio::signal::ctrl_c() => tracing::info!(bot = %id, "interrupted"),
        }
        if let Err(e) = engine.stop_bot(&id).await {
            return fail(&e);
        }

        let last = telemetry.borrow_and_update().clone();
        let totals = fees.totals();
        eprintln!("\n=== Replay Results ===");
        eprintln!("Evaluations:      {}", last.evaluations);
        eprintln!("Final Balance:    {:.2}", last.balance);
        eprintln!("Fills:            {}", totals.fills);
        eprintln!("Fees:             {:.4}", totals.fees);
        let errors = engine
            .logs(&id)
            .map(|lines| {
                lines
                    .iter()
                    .filter(|l| l.level == LogLevel::Error)
                    .count()
            })
            .unwrap_or(0);
        if errors > 0 {
            eprintln!("Errors logged:    {errors}");
        }
        ExitCode::SUCCESS
    })
}
