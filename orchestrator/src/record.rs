//! Run record artifacts: invocations and the aggregated run result.

use serde::Serialize;
use serde_json::Value;

use crate::core::types::{EngineKind, ModeId, Plan, ReasoningLevel, Task};
use crate::error::ErrorKind;
use crate::patch_gate::PatchOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Succeeded,
    Failed,
    /// A dependency did not succeed; the engine was not called.
    Skipped,
    /// Sensitive mode without a token; the engine was not called.
    ConfirmationRequired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

/// One subtask attempt. Appended in plan order and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineInvocation {
    pub seq: u32,
    pub subtask_id: String,
    pub mode_id: ModeId,
    pub engine: EngineKind,
    pub reasoning_level: ReasoningLevel,
    pub status: InvocationStatus,
    /// Rendered prompt with secrets redacted. Empty when the engine was not called.
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
    /// Token that would authorize this sensitive subtask.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<PatchOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub duration_ms: u64,
}

impl EngineInvocation {
    pub fn succeeded(&self) -> bool {
        self.status == InvocationStatus::Succeeded
    }

    /// Failure category of the invocation itself, or of its patch.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self.status {
            InvocationStatus::ConfirmationRequired => Some(ErrorKind::ConfirmationRequired),
            _ => self
                .error
                .as_ref()
                .map(|e| e.kind)
                .or_else(|| self.patch.as_ref().and_then(PatchOutcome::error_kind)),
        }
    }

    /// Short description used in summaries.
    pub fn describe(&self) -> String {
        let head = format!("[{}] {} ({})", self.subtask_id, self.mode_id, self.engine);
        let status = match (&self.status, &self.error) {
            (InvocationStatus::Succeeded, _) => "ok".to_string(),
            (InvocationStatus::Skipped, _) => {
                format!("skipped: {}", self.note.as_deref().unwrap_or("dependency failed"))
            }
            (InvocationStatus::ConfirmationRequired, _) => format!(
                "confirmation required (token {})",
                self.required_token.as_deref().unwrap_or("?")
            ),
            (InvocationStatus::Failed, Some(err)) => format!("{}: {}", err.kind, err.message),
            (InvocationStatus::Failed, None) => "failed".to_string(),
        };
        match &self.patch {
            Some(patch) => format!("{head} {status}; {}", patch.describe()),
            None => format!("{head} {status}"),
        }
    }
}

/// Aggregated outcome of an execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunResult {
    pub summary: String,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub confirmation_required: usize,
    pub applied_files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl RunResult {
    pub fn aggregate(invocations: &[EngineInvocation]) -> Self {
        let mut result = RunResult::default();
        for inv in invocations {
            match inv.status {
                InvocationStatus::Succeeded => result.succeeded += 1,
                InvocationStatus::Failed => result.failed += 1,
                InvocationStatus::Skipped => result.skipped += 1,
                InvocationStatus::ConfirmationRequired => result.confirmation_required += 1,
            }
            if let Some(patch) = &inv.patch {
                result.applied_files.extend(patch.applied_files().iter().cloned());
            }
        }
        result.error_kind = invocations.iter().find_map(EngineInvocation::error_kind);
        let mut parts = vec![format!(
            "{}/{} subtasks succeeded",
            result.succeeded,
            invocations.len()
        )];
        if result.failed > 0 {
            parts.push(format!("{} failed", result.failed));
        }
        if result.skipped > 0 {
            parts.push(format!("{} skipped", result.skipped));
        }
        if result.confirmation_required > 0 {
            parts.push(format!(
                "{} awaiting confirmation",
                result.confirmation_required
            ));
        }
        if !result.applied_files.is_empty() {
            parts.push(format!("{} file(s) patched", result.applied_files.len()));
        }
        result.summary = parts.join(", ");
        result
    }
}

/// Persisted artifact of one execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub task: Task,
    pub plan: Plan,
    pub invocations: Vec<EngineInvocation>,
    pub result: RunResult,
    /// Directory holding the artifacts; absent if persistence failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_dir: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation(id: &str, status: InvocationStatus) -> EngineInvocation {
        EngineInvocation {
            seq: 1,
            subtask_id: id.to_string(),
            mode_id: ModeId::fallback(),
            engine: EngineKind::Codex,
            reasoning_level: ReasoningLevel::Standard,
            status,
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

    #[test]
    fn aggregate_counts_statuses_and_picks_first_error() {
        let mut failed = invocation("2", InvocationStatus::Failed);
        failed.error = Some(ErrorReport {
            kind: ErrorKind::EngineTimeout,
            message: "slow".to_string(),
        });
        let invocations = vec![
            invocation("1", InvocationStatus::Succeeded),
            failed,
            invocation("3", InvocationStatus::Skipped),
            invocation("4", InvocationStatus::ConfirmationRequired),
        ];
        let result = RunResult::aggregate(&invocations);
        assert_eq!(
            (result.succeeded, result.failed, result.skipped, result.confirmation_required),
            (1, 1, 1, 1)
        );
        assert_eq!(result.error_kind, Some(ErrorKind::EngineTimeout));
        assert_eq!(
            result.summary,
            "1/4 subtasks succeeded, 1 failed, 1 skipped, 1 awaiting confirmation"
        );
    }

    #[test]
    fn invocation_serializes_without_empty_fields() {
        let json = serde_json::to_value(invocation("1", InvocationStatus::Succeeded)).expect("json");
        assert_eq!(json["status"], "succeeded");
        assert_eq!(json["engine"], "codex_cli");
        assert!(json.get("error").is_none());
        assert!(json.get("patch").is_none());
    }
}
