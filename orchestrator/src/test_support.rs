//! Test-only helpers: fixture builders, a scripted invoker and fake warm
//! engine processes that speak the codex and gemini wire protocols.

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde_json::{Value, json};

use crate::core::modes::{Mode, ModeRegistry};
use crate::core::output::extract_json;
use crate::core::risk::RiskThresholds;
use crate::core::types::{EngineKind, ModeId, ReasoningLevel, SafetyLevel, Subtask};
use crate::engines::{EngineReply, EngineRequest, adapter_for};
use crate::error::EngineError;
use crate::io::config::OrchestratorConfig;
use crate::io::executor::Invoker;
use crate::io::modes::default_registry;
use crate::io::pool::{EnginePool, SlotState, SlotStatus};
use crate::io::process::{ChannelError, EngineProcess, Spawn};
use crate::io::rpc::{self, Incoming};
use crate::io::run_store::RunStore;
use crate::orchestrate::{Orchestrator, Settings};
use crate::patch_gate::PatchGate;

/// Create a minimal codex mode whose template is just the task.
pub fn mode(id: &str) -> Mode {
    Mode {
        id: ModeId::new(id),
        name: id.to_string(),
        purpose: String::new(),
        preferred_engine: EngineKind::Codex,
        model: None,
        reasoning_level: ReasoningLevel::Standard,
        prompt_template: "{{ task }}".to_string(),
        allowed_tools: Vec::new(),
        sensitive: false,
        safety_notes: String::new(),
        output_schema: json!({"type": "object"}),
    }
}

/// Create a deterministic codex subtask with no dependencies.
pub fn subtask(id: &str, mode_id: &str) -> Subtask {
    Subtask {
        id: id.to_string(),
        title: format!("{id} title"),
        description: format!("{id} description"),
        mode_id: ModeId::new(mode_id),
        engine: EngineKind::Codex,
        reasoning_level: ReasoningLevel::Standard,
        safety_level: SafetyLevel::Low,
        depends_on: Vec::new(),
    }
}

/// The built-in registry.
pub fn sample_registry() -> ModeRegistry {
    default_registry().expect("built-in registry is valid")
}

/// Scratch working tree populated with `files` (relative path, contents).
pub fn scratch_tree(files: &[(&str, &str)]) -> tempfile::TempDir {
    let temp = tempfile::tempdir().expect("tempdir");
    for (rel, contents) in files {
        let path = temp.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, contents).expect("write fixture");
    }
    temp
}

/// Orchestrator over the built-in registry, rooted at `root`, driven by `invoker`.
pub fn orchestrator_at<I: Invoker>(root: &Path, invoker: I) -> Orchestrator<I> {
    Orchestrator::new(
        sample_registry(),
        invoker,
        PatchGate::new(root, RiskThresholds::default()),
        RunStore::new(runs_dir(root)),
        Settings {
            workdir: root.to_path_buf(),
            timeout: Duration::from_secs(5),
            prior_output_limit_bytes: 20_000,
        },
    )
}

/// Runs directory used by [`orchestrator_at`].
pub fn runs_dir(root: &Path) -> PathBuf {
    root.join(".orchestrator").join("runs")
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Invoker that returns queued replies in order and records every request.
#[derive(Default)]
pub struct ScriptedInvoker {
    replies: Mutex<VecDeque<Result<String, EngineError>>>,
    calls: Mutex<Vec<(EngineKind, EngineRequest)>>,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful reply with `text`.
    pub fn reply(self, text: impl Into<String>) -> Self {
        lock(&self.replies).push_back(Ok(text.into()));
        self
    }

    /// Queue a failure.
    pub fn fail(self, err: EngineError) -> Self {
        lock(&self.replies).push_back(Err(err));
        self
    }

    pub fn calls(&self) -> Vec<(EngineKind, EngineRequest)> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }
}

impl Invoker for ScriptedInvoker {
    fn invoke(
        &self,
        engine: EngineKind,
        request: &EngineRequest,
    ) -> Result<EngineReply, EngineError> {
        lock(&self.calls).push((engine, request.clone()));
        let next = lock(&self.replies).pop_front();
        match next {
            Some(Ok(text)) => Ok(EngineReply {
                structured: extract_json(&text),
                text,
                duration: Duration::from_millis(1),
            }),
            Some(Err(err)) => Err(err),
            None => Err(EngineError::Unavailable {
                engine,
                reason: "no scripted reply left".to_string(),
            }),
        }
    }

    fn status(&self) -> Vec<SlotStatus> {
        EngineKind::ALL
            .iter()
            .map(|engine| SlotStatus {
                engine: *engine,
                state: SlotState::Ready,
                restarts: 0,
                invocations: 0,
                last_error: None,
            })
            .collect()
    }
}

/// What a fake engine does with the next invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum FakeBehavior {
    /// Answer with this agent text.
    Reply(String),
    /// Send an engine-initiated request first, then answer with this text.
    AskThenReply(String),
    /// Never answer.
    Hang,
    /// Exit without answering.
    Crash,
    /// Answer with a JSON-RPC error.
    RpcError(String),
}

#[derive(Default)]
struct FakeLedger {
    scripts: BTreeMap<EngineKind, VecDeque<FakeBehavior>>,
    spawns: BTreeMap<EngineKind, u32>,
    terminations: BTreeMap<EngineKind, u32>,
    calls: Vec<(EngineKind, Value)>,
    answers: Vec<Value>,
    refuse_spawn: Vec<EngineKind>,
}

/// Spawner of in-memory engine processes sharing one behavior script.
///
/// Scripts outlive processes, so a respawned process continues where the
/// previous one stopped. Unscripted invocations reply `{"summary": "ok"}`.
#[derive(Clone, Default)]
pub struct FakeSpawner {
    ledger: Arc<Mutex<FakeLedger>>,
}

impl FakeSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `behavior` to the script of `engine`.
    pub fn script(&self, engine: EngineKind, behavior: FakeBehavior) -> &Self {
        lock(&self.ledger)
            .scripts
            .entry(engine)
            .or_default()
            .push_back(behavior);
        self
    }

    /// Make every spawn of `engine` fail as if the binary were missing.
    pub fn refuse(&self, engine: EngineKind) {
        lock(&self.ledger).refuse_spawn.push(engine);
    }

    pub fn spawns(&self, engine: EngineKind) -> u32 {
        lock(&self.ledger).spawns.get(&engine).copied().unwrap_or(0)
    }

    pub fn terminations(&self, engine: EngineKind) -> u32 {
        lock(&self.ledger)
            .terminations
            .get(&engine)
            .copied()
            .unwrap_or(0)
    }

    /// Params of every invocation call received, in arrival order.
    pub fn calls(&self) -> Vec<(EngineKind, Value)> {
        lock(&self.ledger).calls.clone()
    }

    /// Results the client sent back for engine-initiated requests.
    pub fn answers(&self) -> Vec<Value> {
        lock(&self.ledger).answers.clone()
    }

    /// Pool over both engines backed by this spawner.
    pub fn pool(&self) -> EnginePool {
        let cfg = OrchestratorConfig::default();
        let adapters = EngineKind::ALL
            .iter()
            .map(|engine| adapter_for(*engine, &cfg))
            .collect();
        EnginePool::new(
            Arc::new(self.clone()),
            adapters,
            PathBuf::from("."),
            Duration::from_secs(2),
        )
    }
}

impl Spawn for FakeSpawner {
    fn spawn(&self, engine: EngineKind) -> Result<Box<dyn EngineProcess>> {
        let mut ledger = lock(&self.ledger);
        if ledger.refuse_spawn.contains(&engine) {
            return Err(anyhow!("spawn {engine}: No such file or directory"));
        }
        *ledger.spawns.entry(engine).or_default() += 1;
        Ok(Box::new(FakeProcess {
            engine,
            ledger: Arc::clone(&self.ledger),
            outbox: VecDeque::new(),
            exited: false,
            terminated: false,
        }))
    }
}

struct FakeProcess {
    engine: EngineKind,
    ledger: Arc<Mutex<FakeLedger>>,
    outbox: VecDeque<String>,
    exited: bool,
    terminated: bool,
}

impl FakeProcess {
    fn handle_request(&mut self, id: Value, method: &str, params: Value) {
        match method {
            "initialize" => self
                .outbox
                .push_back(rpc::response(&id, json!({"protocolVersion": 1}))),
            "session/new" => self
                .outbox
                .push_back(rpc::response(&id, json!({"sessionId": "fake-session"}))),
            "tools/call" | "session/prompt" => {
                let behavior = {
                    let mut ledger = lock(&self.ledger);
                    ledger.calls.push((self.engine, params));
                    ledger
                        .scripts
                        .get_mut(&self.engine)
                        .and_then(VecDeque::pop_front)
                };
                let behavior =
                    behavior.unwrap_or_else(|| FakeBehavior::Reply(r#"{"summary": "ok"}"#.into()));
                self.perform(id, behavior);
            }
            other => self.outbox.push_back(rpc::error_response(
                &id,
                -32601,
                &format!("method not found: {other}"),
            )),
        }
    }

    fn perform(&mut self, id: Value, behavior: FakeBehavior) {
        match behavior {
            FakeBehavior::Reply(text) => self.reply(&id, &text),
            FakeBehavior::AskThenReply(text) => {
                let method = match self.engine {
                    EngineKind::Codex => "elicitation/create",
                    EngineKind::Gemini => "session/request_permission",
                };
                self.outbox.push_back(
                    json!({"jsonrpc": "2.0", "id": "engine-1", "method": method, "params": {}})
                        .to_string(),
                );
                self.reply(&id, &text);
            }
            FakeBehavior::Hang => {}
            FakeBehavior::Crash => self.exited = true,
            FakeBehavior::RpcError(message) => self
                .outbox
                .push_back(rpc::error_response(&id, -32000, &message)),
        }
    }

    fn reply(&mut self, id: &Value, text: &str) {
        match self.engine {
            EngineKind::Codex => self.outbox.push_back(rpc::response(
                id,
                json!({"content": [{"type": "text", "text": text}]}),
            )),
            EngineKind::Gemini => {
                self.outbox.push_back("gemini: warming up".to_string());
                self.outbox.push_back(rpc::notification(
                    "session/update",
                    json!({
                        "sessionId": "fake-session",
                        "update": {
                            "sessionUpdate": "agent_message_chunk",
                            "content": {"type": "text", "text": text}
                        }
                    }),
                ));
                self.outbox
                    .push_back(rpc::response(id, json!({"stopReason": "end_turn"})));
            }
        }
    }
}

impl EngineProcess for FakeProcess {
    fn send(&mut self, frame: &str) -> Result<(), ChannelError> {
        if self.exited || self.terminated {
            return Err(ChannelError::Closed("broken pipe".to_string()));
        }
        match rpc::parse_frame(frame) {
            Ok(Incoming::Request { id, method, params }) => {
                self.handle_request(id, &method, params);
            }
            Ok(Incoming::Response { outcome, .. }) => {
                let answer = outcome.unwrap_or_else(|err| json!({"error": err.message}));
                lock(&self.ledger).answers.push(answer);
            }
            Ok(Incoming::Notification { .. }) | Err(_) => {}
        }
        Ok(())
    }

    fn recv(&mut self, timeout: Duration) -> Result<String, ChannelError> {
        if let Some(line) = self.outbox.pop_front() {
            return Ok(line);
        }
        if self.exited || self.terminated {
            return Err(ChannelError::Closed("fake engine exited".to_string()));
        }
        thread::sleep(timeout);
        Err(ChannelError::Timeout)
    }

    fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        *lock(&self.ledger)
            .terminations
            .entry(self.engine)
            .or_default() += 1;
    }
}
