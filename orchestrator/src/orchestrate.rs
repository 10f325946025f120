//! Plan and execute tasks across engines.
//!
//! `plan` is pure. `execute` runs subtasks sequentially in plan order,
//! forwards diffs to the patch gate and persists a run record even when
//! subtasks fail.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use tracing::{info, instrument, warn};

use crate::core::decompose::build_plan;
use crate::core::invariants::validate_plan;
use crate::core::modes::{Mode, ModeRegistry};
use crate::core::output::{OutputProblem, check_output, diff_payload};
use crate::core::redact::{redact_secrets, redact_value};
use crate::core::slug::run_id;
use crate::core::token;
use crate::core::types::{EngineKind, Plan, ReasoningLevel, Subtask, Task};
use crate::engines::{EngineReply, EngineRequest};
use crate::error::{ErrorKind, OrchestratorError};
use crate::io::config::OrchestratorConfig;
use crate::io::executor::Invoker;
use crate::io::prompt::{PriorOutput, PromptInputs, render_subtask_prompt, truncate_output};
use crate::io::run_store::{RunHandle, RunStore};
use crate::patch_gate::{PatchGate, PatchRequest};
use crate::record::{EngineInvocation, ErrorReport, InvocationStatus, RunRecord, RunResult};

/// Tunables taken from configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Working tree the engines run in and patches apply to.
    pub workdir: PathBuf,
    pub timeout: Duration,
    pub prior_output_limit_bytes: usize,
}

impl Settings {
    pub fn from_config(cfg: &OrchestratorConfig, workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            timeout: cfg.default_timeout(),
            prior_output_limit_bytes: cfg.prior_output_limit_bytes,
        }
    }
}

/// Inputs shared by every subtask of one execution.
struct SubtaskInputs<'a> {
    overall_task: Option<&'a str>,
    context: &'a str,
    constraints: &'a str,
    confirm_token: Option<&'a str>,
    prior_outputs: Vec<PriorOutput>,
}

pub struct Orchestrator<I: Invoker> {
    registry: ModeRegistry,
    invoker: I,
    gate: PatchGate,
    store: RunStore,
    settings: Settings,
}

impl<I: Invoker> Orchestrator<I> {
    pub fn new(
        registry: ModeRegistry,
        invoker: I,
        gate: PatchGate,
        store: RunStore,
        settings: Settings,
    ) -> Self {
        Self {
            registry,
            invoker,
            gate,
            store,
            settings,
        }
    }

    pub fn registry(&self) -> &ModeRegistry {
        &self.registry
    }

    pub fn invoker(&self) -> &I {
        &self.invoker
    }

    pub fn gate(&self) -> &PatchGate {
        &self.gate
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Decompose `task` into a plan. No engine calls, no filesystem writes.
    #[instrument(skip_all)]
    pub fn plan(&self, task: &Task) -> Result<Plan, OrchestratorError> {
        if task.description.trim().is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "task must not be empty".to_string(),
            ));
        }
        let plan = build_plan(task, &self.registry);
        self.check_plan(&plan)?;
        info!(subtasks = plan.subtasks.len(), "plan built");
        Ok(plan)
    }

    /// Run every subtask of `plan` and persist the run record.
    ///
    /// Subtask failures are recorded, not returned. The call only fails for
    /// invalid plans, or when persistence fails after a patch was applied.
    #[instrument(skip_all, fields(subtasks = plan.subtasks.len()))]
    pub fn execute(
        &self,
        task: &Task,
        plan: &Plan,
        confirm_token: Option<&str>,
    ) -> Result<RunRecord, OrchestratorError> {
        self.check_plan(plan)?;
        let started = Utc::now();
        let mut persistence_error: Option<anyhow::Error> = None;
        let handle = match self.open_run(&run_id(started, &task.description), task, plan) {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "run record could not be created");
                persistence_error = Some(err);
                None
            }
        };

        let multi = plan.subtasks.len() > 1;
        let mut inputs = SubtaskInputs {
            overall_task: multi.then_some(task.description.as_str()),
            context: &task.context,
            constraints: &task.constraints,
            confirm_token,
            prior_outputs: Vec::new(),
        };
        let mut invocations: Vec<EngineInvocation> = Vec::new();
        let mut outputs: HashMap<&str, (bool, String)> = HashMap::new();

        for (index, subtask) in plan.subtasks.iter().enumerate() {
            let seq = index as u32 + 1;
            let failed_dep = subtask
                .depends_on
                .iter()
                .find(|dep| !outputs.get(dep.as_str()).is_some_and(|(ok, _)| *ok));
            let invocation = match failed_dep {
                Some(dep) => skipped(seq, subtask, format!("dependency {dep} did not succeed")),
                None => {
                    inputs.prior_outputs = subtask
                        .depends_on
                        .iter()
                        .filter_map(|dep| {
                            let (_, output) = outputs.get(dep.as_str())?;
                            let mode_id = plan.subtask(dep)?.mode_id.to_string();
                            Some(PriorOutput {
                                subtask_id: dep.clone(),
                                mode_id,
                                output: truncate_output(
                                    output,
                                    self.settings.prior_output_limit_bytes,
                                ),
                            })
                        })
                        .collect();
                    let mode = self.mode(subtask)?;
                    self.run_one(seq, subtask, mode, &inputs)
                }
            };

            outputs.insert(
                subtask.id.as_str(),
                (
                    invocation.succeeded(),
                    invocation.raw_output.clone().unwrap_or_default(),
                ),
            );
            if let Some(handle) = &handle {
                if let Err(err) = handle.write_invocation(&invocation) {
                    warn!(err = %format!("{err:#}"), "failed to persist invocation");
                    persistence_error.get_or_insert(err);
                }
            }
            invocations.push(invocation);
        }

        let result = RunResult::aggregate(&invocations);
        let record = RunRecord {
            run_id: handle
                .as_ref()
                .map(|h| h.run_id.clone())
                .unwrap_or_else(|| run_id(started, &task.description)),
            started_at: started.to_rfc3339_opts(SecondsFormat::Secs, true),
            finished_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            task: task.clone(),
            plan: plan.clone(),
            invocations,
            result,
            run_dir: handle.as_ref().map(|h| h.dir.display().to_string()),
        };
        if let Some(handle) = &handle {
            if let Err(err) = handle.write_record(&record) {
                warn!(err = %format!("{err:#}"), "failed to persist run record");
                persistence_error.get_or_insert(err);
            }
        }

        if let Some(err) = persistence_error {
            if !record.result.applied_files.is_empty() {
                return Err(OrchestratorError::RunPersistence(err.context(format!(
                    "patch applied to {} file(s) but run {} was not recorded",
                    record.result.applied_files.len(),
                    record.run_id
                ))));
            }
        }
        info!(run_id = %record.run_id, summary = %record.result.summary, "run finished");
        Ok(record)
    }

    /// Send a prompt straight to one engine: no mode, no schema check, no
    /// patch forwarding, nothing persisted.
    #[instrument(skip_all, fields(engine = %engine))]
    pub fn invoke_direct(
        &self,
        engine: EngineKind,
        prompt: &str,
        constraints: &str,
        reasoning_level: ReasoningLevel,
        model: Option<String>,
    ) -> Result<EngineReply, OrchestratorError> {
        if prompt.trim().is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "prompt must not be empty".to_string(),
            ));
        }
        let request = EngineRequest {
            prompt: prompt.to_string(),
            constraints: constraints.to_string(),
            reasoning_level,
            timeout: self.settings.timeout,
            cwd: self.settings.workdir.clone(),
            model,
        };
        Ok(self.invoker.invoke(engine, &request)?)
    }

    /// Run a single subtask outside any plan. Nothing is persisted.
    #[instrument(skip_all, fields(subtask = %subtask.id, mode = %subtask.mode_id))]
    pub fn run_subtask(
        &self,
        subtask: &Subtask,
        context: &str,
        constraints: &str,
        confirm_token: Option<&str>,
    ) -> Result<EngineInvocation, OrchestratorError> {
        let mode = self.mode(subtask)?;
        let inputs = SubtaskInputs {
            overall_task: None,
            context,
            constraints,
            confirm_token,
            prior_outputs: Vec::new(),
        };
        Ok(self.run_one(1, subtask, mode, &inputs))
    }

    fn mode(&self, subtask: &Subtask) -> Result<&Mode, OrchestratorError> {
        self.registry
            .get(subtask.mode_id.as_str())
            .ok_or_else(|| OrchestratorError::UnknownMode(subtask.mode_id.to_string()))
    }

    fn check_plan(&self, plan: &Plan) -> Result<(), OrchestratorError> {
        let errors = validate_plan(plan);
        if !errors.is_empty() {
            return Err(OrchestratorError::InvalidRequest(format!(
                "invalid plan: {}",
                errors.join("; ")
            )));
        }
        for subtask in &plan.subtasks {
            self.mode(subtask)?;
        }
        Ok(())
    }

    fn open_run(&self, run_id: &str, task: &Task, plan: &Plan) -> anyhow::Result<RunHandle> {
        let handle = self.store.create_run(run_id)?;
        handle.write_task(task)?;
        handle.write_plan(plan)?;
        Ok(handle)
    }

    fn run_one(
        &self,
        seq: u32,
        subtask: &Subtask,
        mode: &Mode,
        inputs: &SubtaskInputs<'_>,
    ) -> EngineInvocation {
        let mut invocation = blank(seq, subtask);

        if mode.sensitive {
            let required = token::token_for_subtask(mode.id.as_str(), &subtask.description);
            match inputs.confirm_token {
                None => {
                    info!(subtask = %subtask.id, "sensitive mode needs confirmation");
                    invocation.status = InvocationStatus::ConfirmationRequired;
                    invocation.required_token = Some(required);
                    invocation.note = Some(format!(
                        "mode {} is sensitive; resubmit with confirm_token",
                        mode.id
                    ));
                    return invocation;
                }
                Some(supplied) if supplied != required => {
                    return failed(
                        invocation,
                        ErrorKind::TokenMismatch,
                        "confirmation token does not match this subtask".to_string(),
                    );
                }
                Some(_) => {}
            }
        }

        let prompt = match render_subtask_prompt(&PromptInputs {
            mode,
            task: &subtask.description,
            overall_task: inputs.overall_task,
            context: inputs.context,
            prior_outputs: &inputs.prior_outputs,
        }) {
            Ok(prompt) => prompt,
            Err(err) => return failed(invocation, ErrorKind::Internal, format!("{err:#}")),
        };
        invocation.prompt = redact_secrets(&prompt);

        let request = EngineRequest {
            prompt,
            constraints: inputs.constraints.to_string(),
            reasoning_level: subtask.reasoning_level,
            timeout: self.settings.timeout,
            cwd: self.settings.workdir.clone(),
            model: mode.model.clone(),
        };
        let started = Instant::now();
        let reply = self.invoker.invoke(subtask.engine, &request);
        invocation.duration_ms = started.elapsed().as_millis() as u64;
        let reply = match reply {
            Ok(reply) => reply,
            Err(err) => {
                warn!(subtask = %subtask.id, err = %err, "engine invocation failed");
                return failed(invocation, err.kind(), err.to_string());
            }
        };
        invocation.raw_output = Some(redact_secrets(&reply.text));
        invocation.structured_output = reply.structured.as_ref().map(redact_value);

        let Some(validator) = self.registry.output_validator(mode.id.as_str()) else {
            return failed(
                invocation,
                ErrorKind::Internal,
                format!("mode {} has no compiled output schema", mode.id),
            );
        };
        let checked = check_output(&mode.output_schema, validator, reply.structured.as_ref());
        if let Err(problem) = checked {
            let (kind, message) = match problem {
                OutputProblem::NotStructured => (
                    ErrorKind::MalformedOutput,
                    "reply contained no JSON object but the mode requires fields".to_string(),
                ),
                OutputProblem::Violations(messages) => {
                    (ErrorKind::SchemaViolation, messages.join("; "))
                }
            };
            return failed(invocation, kind, message);
        }

        invocation.status = InvocationStatus::Succeeded;
        if let Some(diff) = reply.structured.as_ref().and_then(diff_payload) {
            let outcome = self.gate.apply(&PatchRequest {
                diff: diff.to_string(),
                safety_level: subtask.safety_level,
                confirm_token: inputs.confirm_token.map(str::to_string),
            });
            invocation.patch = Some(outcome);
        }
        invocation
    }
}

fn blank(seq: u32, subtask: &Subtask) -> EngineInvocation {
    EngineInvocation {
        seq,
        subtask_id: subtask.id.clone(),
        mode_id: subtask.mode_id.clone(),
        engine: subtask.engine,
        reasoning_level: subtask.reasoning_level,
        status: InvocationStatus::Failed,
        prompt: String::new(),
        raw_output: None,
        structured_output: None,
        error: None,
        required_token: None,
        patch: None,
        note: None,
        duration_ms: 0,
    }
}

fn failed(mut invocation: EngineInvocation, kind: ErrorKind, message: String) -> EngineInvocation {
    invocation.status = InvocationStatus::Failed;
    invocation.error = Some(ErrorReport { kind, message });
    invocation
}

fn skipped(seq: u32, subtask: &Subtask, reason: String) -> EngineInvocation {
    let mut invocation = blank(seq, subtask);
    invocation.status = InvocationStatus::Skipped;
    invocation.note = Some(reason);
    invocation
}
