//! Warm process pool: one long-lived process per engine kind.
//!
//! Each engine has a worker thread draining a FIFO job queue, so only one
//! request is in flight per process while different engines run in parallel.
//! Processes start lazily on first use and respawn lazily after a crash or
//! timeout. Requests are never retried here.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::types::EngineKind;
use crate::engines::{
    EngineAdapter, EngineReply, EngineRequest, ExchangeError, ExchangeOutcome, WarmSession,
    adapter_for,
};
use crate::error::EngineError;
use crate::io::config::OrchestratorConfig;
use crate::io::executor::Invoker;
use crate::io::process::{ChannelError, CommandSpawner, Spawn};

/// Lifecycle of an engine slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    Uninitialized,
    Starting,
    Ready,
    Busy,
    Crashed,
}

/// Observable state of one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotStatus {
    pub engine: EngineKind,
    pub state: SlotState,
    /// Times the process was spawned again after a crash or timeout.
    pub restarts: u32,
    pub invocations: u64,
    pub last_error: Option<String>,
}

impl SlotStatus {
    fn new(engine: EngineKind) -> Self {
        Self {
            engine,
            state: SlotState::Uninitialized,
            restarts: 0,
            invocations: 0,
            last_error: None,
        }
    }
}

struct Job {
    request: EngineRequest,
    reply: Sender<Result<EngineReply, EngineError>>,
}

struct Slot {
    jobs: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    status: Arc<Mutex<SlotStatus>>,
}

/// Owns the warm engine processes. Dropping the pool tears them down.
pub struct EnginePool {
    slots: BTreeMap<EngineKind, Slot>,
}

impl EnginePool {
    /// Start one worker per adapter. Processes are spawned on first use.
    pub fn new(
        spawner: Arc<dyn Spawn>,
        adapters: Vec<Box<dyn EngineAdapter>>,
        workdir: PathBuf,
        startup_timeout: Duration,
    ) -> Self {
        let mut slots = BTreeMap::new();
        for adapter in adapters {
            let engine = adapter.kind();
            let (tx, rx) = mpsc::channel();
            let status = Arc::new(Mutex::new(SlotStatus::new(engine)));
            let worker = Worker {
                adapter,
                spawner: Arc::clone(&spawner),
                status: Arc::clone(&status),
                workdir: workdir.clone(),
                startup_timeout,
                session: None,
            };
            let handle = thread::Builder::new()
                .name(format!("engine-{engine}"))
                .spawn(move || worker.run(rx));
            let worker = match handle {
                Ok(handle) => Some(handle),
                Err(err) => {
                    warn!(engine = %engine, err = %err, "failed to start engine worker");
                    lock(&status).last_error = Some(format!("worker thread: {err}"));
                    None
                }
            };
            let jobs = worker.is_some().then_some(tx);
            slots.insert(
                engine,
                Slot {
                    jobs,
                    worker,
                    status,
                },
            );
        }
        Self { slots }
    }

    /// Pool backed by the configured engine binaries, run in `workdir`.
    pub fn from_config(cfg: &OrchestratorConfig, workdir: impl Into<PathBuf>) -> Self {
        let workdir = workdir.into();
        let spawner = Arc::new(CommandSpawner::from_config(cfg, workdir.clone()));
        let adapters = EngineKind::ALL
            .iter()
            .map(|engine| adapter_for(*engine, cfg))
            .collect();
        Self::new(spawner, adapters, workdir, cfg.startup_timeout())
    }

    /// Stop every worker and terminate their processes. Idempotent.
    #[instrument(skip_all)]
    pub fn shutdown(&mut self) {
        for (engine, slot) in &mut self.slots {
            // Closing the queue ends the worker loop after queued jobs finish.
            drop(slot.jobs.take());
            if let Some(handle) = slot.worker.take() {
                if handle.join().is_err() {
                    warn!(engine = %engine, "engine worker panicked");
                }
                debug!(engine = %engine, "engine worker stopped");
            }
        }
    }
}

impl Invoker for EnginePool {
    fn invoke(
        &self,
        engine: EngineKind,
        request: &EngineRequest,
    ) -> Result<EngineReply, EngineError> {
        let unavailable = |reason: &str| EngineError::Unavailable {
            engine,
            reason: reason.to_string(),
        };
        let jobs = self
            .slots
            .get(&engine)
            .and_then(|slot| slot.jobs.as_ref())
            .ok_or_else(|| unavailable("engine is not running in this pool"))?;
        let (reply, response) = mpsc::channel();
        jobs.send(Job {
            request: request.clone(),
            reply,
        })
        .map_err(|_| unavailable("engine worker stopped"))?;
        response
            .recv()
            .map_err(|_| unavailable("engine worker dropped the request"))?
    }

    fn status(&self) -> Vec<SlotStatus> {
        self.slots
            .values()
            .map(|slot| lock(&slot.status).clone())
            .collect()
    }
}

impl Drop for EnginePool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock(status: &Mutex<SlotStatus>) -> MutexGuard<'_, SlotStatus> {
    status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Worker {
    adapter: Box<dyn EngineAdapter>,
    spawner: Arc<dyn Spawn>,
    status: Arc<Mutex<SlotStatus>>,
    workdir: PathBuf,
    startup_timeout: Duration,
    session: Option<WarmSession>,
}

impl Worker {
    fn run(mut self, jobs: Receiver<Job>) {
        for job in jobs {
            let result = self.serve(&job.request);
            if job.reply.send(result).is_err() {
                debug!(engine = %self.engine(), "caller went away before the reply");
            }
        }
        if let Some(mut session) = self.session.take() {
            session.terminate();
        }
        lock(&self.status).state = SlotState::Uninitialized;
    }

    fn engine(&self) -> EngineKind {
        self.adapter.kind()
    }

    fn set_state(&self, state: SlotState) {
        lock(&self.status).state = state;
    }

    fn mark_crashed(&mut self, reason: String) {
        if let Some(mut session) = self.session.take() {
            session.terminate();
        }
        let mut status = lock(&self.status);
        status.state = SlotState::Crashed;
        status.last_error = Some(reason);
    }

    #[instrument(skip_all, fields(engine = %self.engine()))]
    fn ensure_started(&mut self) -> Result<(), EngineError> {
        if self.session.is_some() {
            return Ok(());
        }
        let engine = self.engine();
        {
            let mut status = lock(&self.status);
            if status.state == SlotState::Crashed {
                status.restarts += 1;
            }
            status.state = SlotState::Starting;
        }
        let process = match self.spawner.spawn(engine) {
            Ok(process) => process,
            Err(err) => {
                let reason = format!("{err:#}");
                self.mark_crashed(reason.clone());
                return Err(EngineError::Unavailable { engine, reason });
            }
        };
        match WarmSession::start(
            process,
            self.adapter.as_ref(),
            &self.workdir,
            self.startup_timeout,
        ) {
            Ok(session) => {
                info!("engine process ready");
                self.session = Some(session);
                self.set_state(SlotState::Ready);
                Ok(())
            }
            Err(err) => {
                self.mark_crashed(err.to_string());
                Err(err)
            }
        }
    }

    fn serve(&mut self, request: &EngineRequest) -> Result<EngineReply, EngineError> {
        let engine = self.engine();
        self.ensure_started()?;
        self.set_state(SlotState::Busy);
        let Some(session) = self.session.as_mut() else {
            return Err(EngineError::Unavailable {
                engine,
                reason: "engine session missing".to_string(),
            });
        };
        let outcome = session.invoke(self.adapter.as_ref(), request);
        match outcome {
            Ok(reply) => {
                let mut status = lock(&self.status);
                status.state = SlotState::Ready;
                status.invocations += 1;
                Ok(reply)
            }
            Err(ExchangeOutcome::Engine(err)) => {
                let mut status = lock(&self.status);
                status.state = SlotState::Ready;
                status.invocations += 1;
                status.last_error = Some(err.to_string());
                Err(err)
            }
            Err(ExchangeOutcome::Exchange(ExchangeError::Rpc(err))) => {
                let mut status = lock(&self.status);
                status.state = SlotState::Ready;
                status.last_error = Some(err.to_string());
                Err(EngineError::Failed {
                    engine,
                    reason: err.to_string(),
                })
            }
            Err(ExchangeOutcome::Exchange(ExchangeError::Channel(ChannelError::Timeout))) => {
                let secs = request.timeout.as_secs();
                warn!(engine = %engine, timeout_secs = secs, "engine timed out, killing");
                self.mark_crashed(format!("timed out after {secs}s"));
                Err(EngineError::Timeout { engine, secs })
            }
            Err(ExchangeOutcome::Exchange(ExchangeError::Channel(ChannelError::Closed(reason)))) => {
                warn!(engine = %engine, reason = %reason, "engine process died");
                self.mark_crashed(reason.clone());
                Err(EngineError::Unavailable { engine, reason })
            }
        }
    }
}
