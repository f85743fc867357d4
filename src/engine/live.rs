//! Engine facade: starts and stops bot tasks and exposes their telemetry
//! and logs.

use crate::domain::bot::{BotConfig, EngineSettings};
use crate::domain::error::TradescriptError;
use crate::domain::evaluator::CompiledStrategy;
use crate::engine::context::{BotLog, LogRing, SharedLog, Telemetry};
use crate::engine::runner::BotRunner;
use crate::engine::EngineDeps;
use crate::ports::trade_sink_port::LogLine;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;

struct BotHandle {
    stop: watch::Sender<bool>,
    telemetry: watch::Receiver<Telemetry>,
    task: JoinHandle<()>,
}

pub struct LiveEngine {
    deps: EngineDeps,
    settings: EngineSettings,
    bots: Mutex<HashMap<String, BotHandle>>,
    /// Survives stop so logs stay readable; reused on restart.
    logs: Mutex<HashMap<String, SharedLog>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl LiveEngine {
    pub fn new(deps: EngineDeps, settings: EngineSettings) -> Self {
        Self {
            deps,
            settings,
            bots: Mutex::new(HashMap::new()),
            logs: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn a bot task. Must be called from within a tokio runtime.
    pub fn start_bot(&self, config: BotConfig) -> Result<(), TradescriptError> {
        let mut bots = lock(&self.bots);
        if bots
            .get(&config.id)
            .is_some_and(|handle| !handle.task.is_finished())
        {
            return Err(TradescriptError::BotAlreadyRunning {
                id: config.id.clone(),
            });
        }
        let strategy = CompiledStrategy::compile(&config.strategy)?;

        let ring = lock(&self.logs)
            .entry(config.id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(LogRing::new(self.settings.log_capacity))))
            .clone();
        let log = BotLog::new(config.id.clone(), ring, self.deps.sink.clone());
        let (stop_tx, stop_rx) = watch::channel(false);
        let (telemetry_tx, telemetry_rx) = watch::channel(Telemetry::starting(&config));

        let id = config.id.clone();
        let runner = BotRunner::new(
            config,
            strategy,
            self.deps.clone(),
            self.settings.clone(),
            log,
            stop_rx,
            telemetry_tx,
        );
        let task = tokio::spawn(runner.run());
        tracing::info!(bot = %id, "bot started");
        bots.insert(
            id,
            BotHandle {
                stop: stop_tx,
                telemetry: telemetry_rx,
                task,
            },
        );
        Ok(())
    }

    /// Signal the bot to stop and wait for its teardown, including the
    /// closing of any open position.
    pub async fn stop_bot(&self, id: &str) -> Result<(), TradescriptError> {
        let handle = lock(&self.bots)
            .remove(id)
            .ok_or_else(|| TradescriptError::UnknownBot { id: id.to_string() })?;
        let _ = handle.stop.send(true);
        if let Err(e) = handle.task.await {
            tracing::error!(bot = %id, error = %e, "bot task failed");
        }
        tracing::info!(bot = %id, "bot stopped");
        Ok(())
    }

    pub async fn stop_all(&self) {
        let ids: Vec<String> = lock(&self.bots).keys().cloned().collect();
        for id in ids {
            // Already removed by a concurrent stop_bot.
            let _ = self.stop_bot(&id).await;
        }
    }

    pub fn is_running(&self, id: &str) -> bool {
        lock(&self.bots)
            .get(id)
            .is_some_and(|handle| !handle.task.is_finished())
    }

    pub fn running_bots(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.bots)
            .iter()
            .filter(|(_, handle)| !handle.task.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Latest telemetry of a started bot. `None` once it has been stopped.
    pub fn telemetry(&self, id: &str) -> Option<Telemetry> {
        lock(&self.bots)
            .get(id)
            .map(|handle| handle.telemetry.borrow().clone())
    }

    pub fn watch_telemetry(&self, id: &str) -> Option<watch::Receiver<Telemetry>> {
        lock(&self.bots).get(id).map(|handle| handle.telemetry.clone())
    }

    /// Retained log lines, oldest first. Available after stop.
    pub fn logs(&self, id: &str) -> Option<Vec<LogLine>> {
        lock(&self.logs)
            .get(id)
            .map(|ring| lock(ring).lines())
    }
}
