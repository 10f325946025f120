//! Tool-style JSON operations.
//!
//! Every operation takes a fixed input object (unknown fields rejected) and
//! returns a JSON object with a `summary`. Failures add `error_kind`.

use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::instrument;

use crate::core::router::route;
use crate::core::types::{EngineKind, ModeId, ReasoningLevel, SafetyLevel, Subtask, Task};
use crate::error::{ErrorKind, OrchestratorError};
use crate::io::executor::Invoker;
use crate::io::process::probe_version;
use crate::io::repo_scan::{ScanLimits, scan_repo};
use crate::orchestrate::Orchestrator;
use crate::patch_gate::{PatchOutcome, PatchRequest};

pub const TOOL_NAMES: [&str; 9] = [
    "orchestrate_task",
    "run_subtask",
    "apply_patch",
    "route_task",
    "list_modes",
    "warm_status",
    "codex_direct",
    "gemini_direct",
    "repo_scan",
];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct OrchestrateInput {
    task: String,
    #[serde(default)]
    context: String,
    #[serde(default)]
    constraints: String,
    #[serde(default = "default_plan_only")]
    plan_only: bool,
    #[serde(default)]
    task_type: Option<String>,
    #[serde(default)]
    confirm_token: Option<String>,
}

fn default_plan_only() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SubtaskInput {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    description: String,
    mode_id: String,
    #[serde(default)]
    engine: Option<EngineKind>,
    #[serde(default)]
    reasoning_level: Option<ReasoningLevel>,
    #[serde(default)]
    safety_level: SafetyLevel,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RunSubtaskInput {
    subtask: SubtaskInput,
    #[serde(default)]
    context: String,
    #[serde(default)]
    constraints: String,
    #[serde(default)]
    confirm_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ApplyPatchInput {
    patch_text: String,
    #[serde(default)]
    safety_level: SafetyLevel,
    #[serde(default)]
    confirm_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RouteInput {
    task: String,
    #[serde(default)]
    task_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DirectInput {
    prompt: String,
    #[serde(default)]
    constraints: String,
    #[serde(default)]
    reasoning_level: ReasoningLevel,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RepoScanInput {
    #[serde(default)]
    max_depth: Option<usize>,
    #[serde(default)]
    max_files: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EmptyInput {}

/// Tool surface over an [`Orchestrator`].
pub struct Tools<I: Invoker> {
    orchestrator: Orchestrator<I>,
    /// Binaries probed with `--version` by `warm_status`.
    engine_binaries: Vec<(EngineKind, String)>,
    probe_timeout: Duration,
}

impl<I: Invoker> Tools<I> {
    pub fn new(orchestrator: Orchestrator<I>, engine_binaries: Vec<(EngineKind, String)>) -> Self {
        Self {
            orchestrator,
            engine_binaries,
            probe_timeout: Duration::from_secs(5),
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator<I> {
        &self.orchestrator
    }

    /// Dispatch `name` with `input`. Always returns a JSON object.
    #[instrument(skip(self, input))]
    pub fn call(&self, name: &str, input: Value) -> Value {
        let result = match name {
            "orchestrate_task" => parse(input).and_then(|i| self.orchestrate_task(i)),
            "run_subtask" => parse(input).and_then(|i| self.run_subtask(i)),
            "apply_patch" => parse(input).map(|i| self.apply_patch(i)),
            "route_task" => parse(input).map(route_task),
            "list_modes" => parse::<EmptyInput>(input).map(|_| self.list_modes()),
            "warm_status" => parse::<EmptyInput>(input).map(|_| self.warm_status()),
            "codex_direct" => parse(input).and_then(|i| self.direct(EngineKind::Codex, i)),
            "gemini_direct" => parse(input).and_then(|i| self.direct(EngineKind::Gemini, i)),
            "repo_scan" => parse(input).and_then(|i| self.repo_scan(i)),
            other => Err(ToolError::new(
                ErrorKind::InvalidRequest,
                format!(
                    "unknown tool '{other}' (expected one of: {})",
                    TOOL_NAMES.join(", ")
                ),
            )),
        };
        result.unwrap_or_else(|err| err.into_json())
    }

    fn orchestrate_task(&self, input: OrchestrateInput) -> Result<Value, ToolError> {
        let task = Task {
            description: input.task,
            context: input.context,
            constraints: input.constraints,
            plan_only: input.plan_only,
            task_type: input.task_type,
        };
        let plan = self.orchestrator.plan(&task)?;
        if task.plan_only {
            return Ok(json!({
                "summary": plan.summary,
                "plan_only": true,
                "plan": plan,
            }));
        }
        let record = self
            .orchestrator
            .execute(&task, &plan, clean_token(input.confirm_token.as_deref()))?;
        let error_kind = record.result.error_kind;
        let mut out = json!({
            "summary": record.result.summary.clone(),
            "plan_only": false,
            "run_id": record.run_id.clone(),
            "run": record,
        });
        if let Some(kind) = error_kind {
            out["error_kind"] = json!(kind);
        }
        Ok(out)
    }

    fn run_subtask(&self, input: RunSubtaskInput) -> Result<Value, ToolError> {
        let spec = input.subtask;
        let mode = self
            .orchestrator
            .registry()
            .get(&spec.mode_id)
            .ok_or_else(|| OrchestratorError::UnknownMode(spec.mode_id.clone()))?;
        let subtask = Subtask {
            id: spec.id.unwrap_or_else(|| "1".to_string()),
            title: spec.title.unwrap_or_else(|| mode.name.clone()),
            description: spec.description,
            mode_id: ModeId::new(spec.mode_id),
            engine: spec.engine.unwrap_or(mode.preferred_engine),
            reasoning_level: spec.reasoning_level.unwrap_or(mode.reasoning_level),
            safety_level: spec.safety_level,
            depends_on: Vec::new(),
        };
        let invocation = self.orchestrator.run_subtask(
            &subtask,
            &input.context,
            &input.constraints,
            clean_token(input.confirm_token.as_deref()),
        )?;
        let error_kind = invocation.error_kind();
        let required_token = invocation.required_token.clone();
        let mut out = json!({
            "summary": invocation.describe(),
            "invocation": invocation,
        });
        if let Some(token) = required_token {
            out["confirm_token"] = json!(token);
        }
        if let Some(kind) = error_kind {
            out["error_kind"] = json!(kind);
        }
        Ok(out)
    }

    fn apply_patch(&self, input: ApplyPatchInput) -> Value {
        let outcome = self.orchestrator.gate().apply(&PatchRequest {
            diff: input.patch_text,
            safety_level: input.safety_level,
            confirm_token: clean_token(input.confirm_token.as_deref()).map(str::to_string),
        });
        let error_kind = outcome.error_kind();
        let required_token = match &outcome {
            PatchOutcome::TokenRequired { token, .. } => Some(token.clone()),
            _ => None,
        };
        let mut out = json!({
            "summary": outcome.describe(),
            "outcome": outcome,
        });
        if let Some(token) = required_token {
            out["confirm_token"] = json!(token);
        }
        if let Some(kind) = error_kind {
            out["error_kind"] = json!(kind);
        }
        out
    }

    fn direct(&self, engine: EngineKind, input: DirectInput) -> Result<Value, ToolError> {
        if engine == EngineKind::Gemini && input.model.is_some() {
            return Err(ToolError::new(
                ErrorKind::InvalidRequest,
                "gemini model is fixed when the engine starts; set [gemini] model in config"
                    .to_string(),
            ));
        }
        let reply = self.orchestrator.invoke_direct(
            engine,
            &input.prompt,
            &input.constraints,
            input.reasoning_level,
            input.model,
        )?;
        let duration_ms = reply.duration.as_millis() as u64;
        Ok(json!({
            "summary": format!("{engine} replied in {duration_ms} ms"),
            "engine": engine,
            "reasoning_level": input.reasoning_level,
            "text": reply.text,
            "structured": reply.structured,
            "duration_ms": duration_ms,
        }))
    }

    fn repo_scan(&self, input: RepoScanInput) -> Result<Value, ToolError> {
        let defaults = ScanLimits::default();
        let limits = ScanLimits {
            max_depth: input.max_depth.unwrap_or(defaults.max_depth),
            max_files: input.max_files.unwrap_or(defaults.max_files),
        };
        let scan = scan_repo(&self.orchestrator.settings().workdir, limits)
            .map_err(OrchestratorError::Internal)?;
        Ok(json!({
            "summary": scan.describe(),
            "scan": scan,
        }))
    }

    fn list_modes(&self) -> Value {
        let registry = self.orchestrator.registry();
        let modes: Vec<Value> = registry
            .iter()
            .map(|mode| {
                json!({
                    "id": mode.id,
                    "name": mode.name,
                    "purpose": mode.purpose,
                    "preferred_engine": mode.preferred_engine,
                    "model": mode.model,
                    "reasoning_level": mode.reasoning_level,
                    "sensitive": mode.sensitive,
                    "allowed_tools": mode.allowed_tools,
                })
            })
            .collect();
        json!({
            "summary": format!("{} modes (registry v{})", registry.len(), registry.version()),
            "version": registry.version(),
            "modes": modes,
        })
    }

    fn warm_status(&self) -> Value {
        let slots = self.orchestrator.invoker().status();
        let engines: Vec<Value> = self
            .engine_binaries
            .iter()
            .map(|(engine, binary)| {
                json!({
                    "engine": engine,
                    "command": binary,
                    "version": probe_version(binary, self.probe_timeout),
                })
            })
            .collect();
        let ready = slots
            .iter()
            .filter(|s| s.state == crate::io::pool::SlotState::Ready)
            .count();
        json!({
            "summary": format!("{ready}/{} engine slots ready", slots.len()),
            "slots": slots,
            "engines": engines,
        })
    }
}

fn route_task(input: RouteInput) -> Value {
    let routed = route(&input.task, input.task_type.as_deref());
    let summary = if routed.fallback {
        format!("no routing keywords matched; using {}", routed.primary())
    } else {
        format!("routed to {}", routed.primary())
    };
    json!({
        "summary": summary,
        "modes": routed.modes,
        "reasoning_level": routed.reasoning_level,
        "fallback": routed.fallback,
    })
}

/// Failure surfaced as `{summary, error_kind}`.
#[derive(Debug)]
pub struct ToolError {
    kind: ErrorKind,
    message: String,
}

impl ToolError {
    fn new(kind: ErrorKind, message: String) -> Self {
        Self { kind, message }
    }

    fn into_json(self) -> Value {
        json!({"summary": self.message, "error_kind": self.kind})
    }
}

impl From<OrchestratorError> for ToolError {
    fn from(err: OrchestratorError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

/// Trim pasted tokens. Everything past the tool boundary compares exactly.
fn clean_token(token: Option<&str>) -> Option<&str> {
    token.map(str::trim).filter(|t| !t.is_empty())
}

fn parse<T: DeserializeOwned>(input: Value) -> Result<T, ToolError> {
    let input = if input.is_null() { json!({}) } else { input };
    serde_json::from_value(input)
        .map_err(|err| ToolError::new(ErrorKind::InvalidRequest, format!("invalid input: {err}")))
}
