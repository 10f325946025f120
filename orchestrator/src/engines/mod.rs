//! Engine adapters: protocol-specific framing over a warm process.
//!
//! Each adapter owns its handshake, invocation parameters and reply decoding.
//! [`WarmSession`] drives an adapter over any [`EngineProcess`], so the pool
//! never sees protocol details.

pub mod codex;
pub mod gemini;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::output::extract_json;
use crate::core::types::{EngineKind, ReasoningLevel};
use crate::error::EngineError;
use crate::io::config::OrchestratorConfig;
use crate::io::process::{ChannelError, EngineProcess};
use crate::io::rpc::{self, Incoming, RpcError};

/// JSON-RPC "method not found".
const METHOD_NOT_FOUND: i64 = -32601;

/// One invocation submitted to an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineRequest {
    pub prompt: String,
    pub constraints: String,
    pub reasoning_level: ReasoningLevel,
    pub timeout: Duration,
    pub cwd: PathBuf,
    /// Model override from the mode, when the engine supports per-call models.
    pub model: Option<String>,
}

/// Successful engine reply.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineReply {
    pub text: String,
    pub structured: Option<Value>,
    pub duration: Duration,
}

/// Text decoded from a completed call.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub text: String,
    pub structured: Option<Value>,
}

/// A message the client sends during the handshake.
#[derive(Debug, Clone, PartialEq)]
pub enum HandshakeStep {
    Call { method: &'static str, params: Value },
    Notify { method: &'static str, params: Value },
}

/// Per-process state established by the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub session_id: Option<String>,
}

/// Protocol contract of one engine family.
pub trait EngineAdapter: Send + Sync {
    fn kind(&self) -> EngineKind;

    /// Messages sent right after spawn, in order.
    fn handshake(&self, cwd: &Path) -> Vec<HandshakeStep>;

    /// Record what a handshake call returned.
    fn on_handshake_result(
        &self,
        _method: &str,
        _result: &Value,
        _state: &mut SessionState,
    ) -> Result<(), String> {
        Ok(())
    }

    /// Method and params for one invocation.
    fn call(&self, request: &EngineRequest, state: &SessionState) -> (&'static str, Value);

    /// Answer an engine-initiated request. `Err` becomes a JSON-RPC error.
    fn answer(&self, method: &str, _params: &Value) -> Result<Value, (i64, String)> {
        Err((METHOD_NOT_FOUND, format!("method not supported: {method}")))
    }

    /// Turn the call result and the notifications seen while waiting into text.
    fn decode(
        &self,
        result: &Value,
        notifications: &[(String, Value)],
    ) -> Result<Decoded, EngineError>;
}

/// Adapters for every engine kind, configured from `cfg`.
pub fn adapter_for(engine: EngineKind, cfg: &OrchestratorConfig) -> Box<dyn EngineAdapter> {
    match engine {
        EngineKind::Codex => Box::new(codex::CodexAdapter::new(cfg.codex.clone())),
        EngineKind::Gemini => Box::new(gemini::GeminiAdapter::new()),
    }
}

/// Prompt text with constraints appended as their own section.
pub fn compose_prompt(request: &EngineRequest) -> String {
    let constraints = request.constraints.trim();
    if constraints.is_empty() {
        request.prompt.clone()
    } else {
        format!("{}\n\n## Constraints\n{constraints}", request.prompt.trim_end())
    }
}

/// Why an exchange with the process failed.
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeError {
    Channel(ChannelError),
    Rpc(RpcError),
}

/// A warm process that completed its handshake.
pub struct WarmSession {
    process: Box<dyn EngineProcess>,
    state: SessionState,
    next_id: u64,
}

impl WarmSession {
    /// Run the adapter handshake on a freshly spawned process.
    #[instrument(skip_all, fields(engine = %adapter.kind()))]
    pub fn start(
        process: Box<dyn EngineProcess>,
        adapter: &dyn EngineAdapter,
        cwd: &Path,
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        let mut session = Self {
            process,
            state: SessionState::default(),
            next_id: 1,
        };
        let deadline = Instant::now() + timeout;
        let unavailable = |reason: String| EngineError::Unavailable {
            engine: adapter.kind(),
            reason,
        };
        for step in adapter.handshake(cwd) {
            match step {
                HandshakeStep::Call { method, params } => {
                    let (result, _) = session
                        .exchange(adapter, method, params, deadline)
                        .map_err(|err| unavailable(format!("{method} failed: {}", describe(&err))))?;
                    let mut state = std::mem::take(&mut session.state);
                    adapter
                        .on_handshake_result(method, &result, &mut state)
                        .map_err(|reason| unavailable(format!("{method}: {reason}")))?;
                    session.state = state;
                }
                HandshakeStep::Notify { method, params } => {
                    session
                        .process
                        .send(&rpc::notification(method, params))
                        .map_err(|err| unavailable(err.to_string()))?;
                }
            }
        }
        debug!("engine handshake complete");
        Ok(session)
    }

    /// Submit one request and wait for its reply.
    pub fn invoke(
        &mut self,
        adapter: &dyn EngineAdapter,
        request: &EngineRequest,
    ) -> Result<EngineReply, ExchangeOutcome> {
        let started = Instant::now();
        let (method, params) = adapter.call(request, &self.state);
        let deadline = started + request.timeout;
        let (result, notifications) = self
            .exchange(adapter, method, params, deadline)
            .map_err(ExchangeOutcome::Exchange)?;
        let decoded = adapter
            .decode(&result, &notifications)
            .map_err(ExchangeOutcome::Engine)?;
        let structured = decoded.structured.or_else(|| extract_json(&decoded.text));
        Ok(EngineReply {
            text: decoded.text,
            structured,
            duration: started.elapsed(),
        })
    }

    pub fn terminate(&mut self) {
        self.process.terminate();
    }

    fn exchange(
        &mut self,
        adapter: &dyn EngineAdapter,
        method: &str,
        params: Value,
        deadline: Instant,
    ) -> Result<(Value, Vec<(String, Value)>), ExchangeError> {
        let id = self.next_id;
        self.next_id += 1;
        self.process
            .send(&rpc::request(id, method, params))
            .map_err(ExchangeError::Channel)?;

        let mut notifications = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ExchangeError::Channel(ChannelError::Timeout));
            }
            let line = self.process.recv(remaining).map_err(ExchangeError::Channel)?;
            if line.trim().is_empty() {
                continue;
            }
            let frame = match rpc::parse_frame(&line) {
                Ok(frame) => frame,
                Err(reason) => {
                    debug!(%reason, "skipping non-protocol output");
                    continue;
                }
            };
            match frame {
                Incoming::Response { id: got, outcome } if rpc::id_matches(&got, id) => {
                    return outcome
                        .map(|result| (result, notifications))
                        .map_err(ExchangeError::Rpc);
                }
                Incoming::Response { id: got, .. } => {
                    warn!(%got, expected = id, "dropping response with unexpected id");
                }
                Incoming::Notification { method, params } => notifications.push((method, params)),
                Incoming::Request {
                    id: req_id,
                    method,
                    params,
                } => {
                    let reply = match adapter.answer(&method, &params) {
                        Ok(result) => rpc::response(&req_id, result),
                        Err((code, message)) => rpc::error_response(&req_id, code, &message),
                    };
                    debug!(%method, "answered engine request");
                    self.process.send(&reply).map_err(ExchangeError::Channel)?;
                }
            }
        }
    }
}

/// How a warm invocation failed.
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeOutcome {
    /// Transport or protocol failure; the process state is suspect.
    Exchange(ExchangeError),
    /// The engine answered but the reply was unusable.
    Engine(EngineError),
}

pub fn describe(err: &ExchangeError) -> String {
    match err {
        ExchangeError::Channel(err) => err.to_string(),
        ExchangeError::Rpc(err) => err.to_string(),
    }
}

/// Concatenated text of `{"type": "text", "text": ...}` content items.
pub(crate) fn text_items(content: &Value) -> String {
    content
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}
