//! Shared deterministic types for orchestrator core logic.
//!
//! These types define stable contracts between core components and the JSON
//! artifacts written under the runs directory. They must not depend on
//! external state or I/O.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Effort tier requested from an engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningLevel {
    Fast,
    #[default]
    Standard,
    Deep,
}

impl ReasoningLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            ReasoningLevel::Fast => "fast",
            ReasoningLevel::Standard => "standard",
            ReasoningLevel::Deep => "deep",
        }
    }
}

/// Backing engine kinds. One warm process is kept per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EngineKind {
    #[serde(rename = "codex_cli")]
    Codex,
    #[serde(rename = "gemini_cli")]
    Gemini,
}

impl EngineKind {
    pub const ALL: [EngineKind; 2] = [EngineKind::Codex, EngineKind::Gemini];

    pub fn as_str(self) -> &'static str {
        match self {
            EngineKind::Codex => "codex_cli",
            EngineKind::Gemini => "gemini_cli",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared safety level for a subtask or patch request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyLevel {
    #[default]
    Low,
    Medium,
    /// Every patch needs a confirmation token.
    High,
    /// Patches are never applied.
    ReadOnly,
}

/// Mode identifier. Validated against the registry at plan time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModeId(String);

impl ModeId {
    pub const GENERAL_CODER: &'static str = "general_coder";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn fallback() -> Self {
        Self::new(Self::GENERAL_CODER)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModeId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A caller request. Lives only for the duration of its run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub description: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub constraints: String,
    #[serde(default)]
    pub plan_only: bool,
    /// Optional routing hint (e.g. "debug", "research").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }
}

/// One unit of work inside a [`Plan`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub title: String,
    pub description: String,
    pub mode_id: ModeId,
    pub engine: EngineKind,
    pub reasoning_level: ReasoningLevel,
    #[serde(default)]
    pub safety_level: SafetyLevel,
    /// Earlier subtasks whose outputs are passed along as context.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Ordered decomposition of a task. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub task: String,
    pub summary: String,
    pub subtasks: Vec<Subtask>,
    #[serde(default)]
    pub notes: Vec<String>,
}

impl Plan {
    pub fn subtask(&self, id: &str) -> Option<&Subtask> {
        self.subtasks.iter().find(|s| s.id == id)
    }
}

/// Outcome classification of a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Risk {
    Benign,
    Risky,
}

/// Risk plus the triggers that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskClassification {
    pub risk: Risk,
    pub reasons: Vec<String>,
}

impl RiskClassification {
    pub fn is_risky(&self) -> bool {
        self.risk == Risk::Risky
    }
}
