//! Patch gate: the only path by which engine output modifies the tree.
//!
//! `apply` runs parse, path checks, safety level, risk/token and then an
//! all-or-nothing write. Applies are serialized process-wide.

use std::path::PathBuf;
use std::sync::Mutex;

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::core::diff::{PatchSummary, parse_patch};
use crate::core::risk::{RiskThresholds, classify_summary, classify_text};
use crate::core::token;
use crate::core::types::{RiskClassification, SafetyLevel};
use crate::error::ErrorKind;
use crate::io::patch_apply::{StageError, check_paths, commit, stage};

static APPLY_LOCK: Mutex<()> = Mutex::new(());

/// A unified diff submitted for application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRequest {
    pub diff: String,
    pub safety_level: SafetyLevel,
    pub confirm_token: Option<String>,
}

/// Result of [`PatchGate::apply`]. Failures are values, never panics or errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PatchOutcome {
    Applied {
        files: Vec<String>,
        summary: PatchSummary,
        risk: RiskClassification,
    },
    /// Risky patch without a token. Resubmit the same diff with `token`.
    TokenRequired {
        token: String,
        summary: PatchSummary,
        risk: RiskClassification,
    },
    TokenMismatch {
        summary: PatchSummary,
        risk: RiskClassification,
    },
    Rejected {
        error_kind: ErrorKind,
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<PatchSummary>,
    },
}

impl PatchOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, PatchOutcome::Applied { .. })
    }

    /// `None` when applied.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            PatchOutcome::Applied { .. } => None,
            PatchOutcome::TokenRequired { .. } => Some(ErrorKind::ConfirmationRequired),
            PatchOutcome::TokenMismatch { .. } => Some(ErrorKind::TokenMismatch),
            PatchOutcome::Rejected { error_kind, .. } => Some(*error_kind),
        }
    }

    /// One-line human description.
    pub fn describe(&self) -> String {
        match self {
            PatchOutcome::Applied { files, .. } => format!("applied patch to {} file(s)", files.len()),
            PatchOutcome::TokenRequired { token, risk, .. } => format!(
                "risky patch ({}); resubmit with confirm_token {token}",
                risk.reasons.join(", ")
            ),
            PatchOutcome::TokenMismatch { .. } => {
                "confirmation token does not match this patch".to_string()
            }
            PatchOutcome::Rejected { reason, .. } => format!("patch rejected: {reason}"),
        }
    }

    pub fn applied_files(&self) -> &[String] {
        match self {
            PatchOutcome::Applied { files, .. } => files,
            _ => &[],
        }
    }
}

/// Applies unified diffs to the tree rooted at `root`.
#[derive(Debug, Clone)]
pub struct PatchGate {
    root: PathBuf,
    thresholds: RiskThresholds,
}

impl PatchGate {
    pub fn new(root: impl Into<PathBuf>, thresholds: RiskThresholds) -> Self {
        Self {
            root: root.into(),
            thresholds,
        }
    }

    pub fn classify(&self, diff: &str, safety_level: SafetyLevel) -> RiskClassification {
        classify_text(diff, safety_level, &self.thresholds)
    }

    pub fn token_for(diff: &str) -> String {
        token::token_for(diff)
    }

    #[instrument(skip_all, fields(safety = ?request.safety_level, bytes = request.diff.len()))]
    pub fn apply(&self, request: &PatchRequest) -> PatchOutcome {
        let parsed = match parse_patch(&request.diff) {
            Ok(parsed) => parsed,
            Err(err) => return rejected(ErrorKind::PatchParseError, err.to_string(), None),
        };
        let summary = parsed.summary();

        if let Err(reason) = check_paths(&self.root, &parsed) {
            return rejected(ErrorKind::PatchPathViolation, reason, Some(summary));
        }
        if request.safety_level == SafetyLevel::ReadOnly {
            return rejected(
                ErrorKind::SafetyForbidden,
                "safety level read_only forbids applying patches".to_string(),
                Some(summary),
            );
        }

        let risk = classify_summary(&summary, request.safety_level, &self.thresholds);
        if risk.is_risky() {
            let required = token::token_for(&request.diff);
            match request.confirm_token.as_deref() {
                None => {
                    info!(reasons = ?risk.reasons, "risky patch needs confirmation");
                    return PatchOutcome::TokenRequired {
                        token: required,
                        summary,
                        risk,
                    };
                }
                Some(supplied) if supplied != required => {
                    warn!("confirmation token mismatch");
                    return PatchOutcome::TokenMismatch { summary, risk };
                }
                Some(_) => {}
            }
        }

        let _guard = APPLY_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let staged = match stage(&self.root, &parsed) {
            Ok(staged) => staged,
            Err(StageError::Conflict(reason)) => {
                return rejected(ErrorKind::PatchConflict, reason, Some(summary));
            }
            Err(StageError::Io(err)) => {
                return rejected(ErrorKind::Internal, format!("{err:#}"), Some(summary));
            }
        };
        if let Err(err) = commit(&staged) {
            return rejected(
                ErrorKind::Internal,
                format!("write failed, changes rolled back: {err:#}"),
                Some(summary),
            );
        }
        info!(files = summary.file_count, "patch applied");
        PatchOutcome::Applied {
            files: summary.files.clone(),
            summary,
            risk,
        }
    }
}

fn rejected(error_kind: ErrorKind, reason: String, summary: Option<PatchSummary>) -> PatchOutcome {
    warn!(%error_kind, reason = %reason, "patch rejected");
    PatchOutcome::Rejected {
        error_kind,
        reason,
        summary,
    }
}
