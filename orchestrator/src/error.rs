//! Typed error taxonomy surfaced in tool results as `error_kind`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::types::EngineKind;

/// Stable, machine-readable failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    EngineUnavailable,
    EngineTimeout,
    MalformedOutput,
    EngineFailed,
    SchemaViolation,
    ConfirmationRequired,
    TokenMismatch,
    PatchParseError,
    PatchPathViolation,
    PatchConflict,
    SafetyForbidden,
    UnknownMode,
    InvalidRequest,
    RunPersistence,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::EngineUnavailable => "engine_unavailable",
            ErrorKind::EngineTimeout => "engine_timeout",
            ErrorKind::MalformedOutput => "malformed_output",
            ErrorKind::EngineFailed => "engine_failed",
            ErrorKind::SchemaViolation => "schema_violation",
            ErrorKind::ConfirmationRequired => "confirmation_required",
            ErrorKind::TokenMismatch => "token_mismatch",
            ErrorKind::PatchParseError => "patch_parse_error",
            ErrorKind::PatchPathViolation => "patch_path_violation",
            ErrorKind::PatchConflict => "patch_conflict",
            ErrorKind::SafetyForbidden => "safety_forbidden",
            ErrorKind::UnknownMode => "unknown_mode",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::RunPersistence => "run_persistence",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single engine invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("{engine} unavailable: {reason}")]
    Unavailable { engine: EngineKind, reason: String },
    #[error("{engine} timed out after {secs}s")]
    Timeout { engine: EngineKind, secs: u64 },
    #[error("{engine} returned malformed output: {reason}")]
    Malformed { engine: EngineKind, reason: String },
    #[error("{engine} reported failure: {reason}")]
    Failed { engine: EngineKind, reason: String },
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Unavailable { .. } => ErrorKind::EngineUnavailable,
            EngineError::Timeout { .. } => ErrorKind::EngineTimeout,
            EngineError::Malformed { .. } => ErrorKind::MalformedOutput,
            EngineError::Failed { .. } => ErrorKind::EngineFailed,
        }
    }

    pub fn engine(&self) -> EngineKind {
        match self {
            EngineError::Unavailable { engine, .. }
            | EngineError::Timeout { engine, .. }
            | EngineError::Malformed { engine, .. }
            | EngineError::Failed { engine, .. } => *engine,
        }
    }
}

/// Request-level failure of an orchestrator operation.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("unknown mode '{0}'")]
    UnknownMode(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("run persistence failed: {0:#}")]
    RunPersistence(anyhow::Error),
    #[error("{0:#}")]
    Internal(#[from] anyhow::Error),
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::UnknownMode(_) => ErrorKind::UnknownMode,
            OrchestratorError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            OrchestratorError::Engine(err) => err.kind(),
            OrchestratorError::RunPersistence(_) => ErrorKind::RunPersistence,
            OrchestratorError::Internal(_) => ErrorKind::Internal,
        }
    }
}
