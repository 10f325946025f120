//! Orchestrator configuration stored under `.orchestrator/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::risk::RiskThresholds;
use crate::core::types::{EngineKind, ReasoningLevel};

/// Orchestrator configuration (TOML).
///
/// Edited by humans; missing fields default to values that work with stock
/// `codex` and `gemini` installs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Run record directory, relative to the project root.
    pub runs_dir: PathBuf,

    /// Per-invocation engine timeout in seconds.
    pub default_timeout_secs: u64,

    /// Budget for spawning an engine and completing its handshake.
    pub startup_timeout_secs: u64,

    /// Truncate each dependency output fed into later prompts beyond this many bytes.
    pub prior_output_limit_bytes: usize,

    /// Mode registry YAML. The built-in registry is used when unset.
    pub modes_path: Option<PathBuf>,

    pub patch: RiskThresholds,
    pub codex: CodexConfig,
    pub gemini: GeminiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CodexConfig {
    pub command: String,
    pub args: Vec<String>,
    pub sandbox: String,
    pub approval_policy: String,
    /// Reasoning level (`fast`/`standard`/`deep`) to `model_reasoning_effort`.
    pub reasoning_map: BTreeMap<String, String>,
    /// Reasoning level to `model_verbosity`.
    pub verbosity_map: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeminiConfig {
    pub command: String,
    pub args: Vec<String>,
    pub model: Option<String>,
}

fn level_map(fast: &str, standard: &str, deep: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("fast".to_string(), fast.to_string()),
        ("standard".to_string(), standard.to_string()),
        ("deep".to_string(), deep.to_string()),
    ])
}

impl Default for CodexConfig {
    fn default() -> Self {
        Self {
            command: "codex".to_string(),
            args: vec!["mcp-server".to_string()],
            sandbox: "read-only".to_string(),
            approval_policy: "never".to_string(),
            reasoning_map: level_map("low", "medium", "high"),
            verbosity_map: level_map("low", "medium", "medium"),
        }
    }
}

impl CodexConfig {
    pub fn reasoning_effort(&self, level: ReasoningLevel) -> Option<&str> {
        self.reasoning_map.get(level.as_str()).map(String::as_str)
    }

    pub fn verbosity(&self, level: ReasoningLevel) -> Option<&str> {
        self.verbosity_map.get(level.as_str()).map(String::as_str)
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            command: "gemini".to_string(),
            args: vec!["--experimental-acp".to_string()],
            model: None,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            runs_dir: PathBuf::from(".orchestrator/runs"),
            default_timeout_secs: 10 * 60,
            startup_timeout_secs: 30,
            prior_output_limit_bytes: 20_000,
            modes_path: None,
            patch: RiskThresholds::default(),
            codex: CodexConfig::default(),
            gemini: GeminiConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.default_timeout_secs == 0 {
            return Err(anyhow!("default_timeout_secs must be > 0"));
        }
        if self.startup_timeout_secs == 0 {
            return Err(anyhow!("startup_timeout_secs must be > 0"));
        }
        if self.prior_output_limit_bytes == 0 {
            return Err(anyhow!("prior_output_limit_bytes must be > 0"));
        }
        if self.runs_dir.as_os_str().is_empty() {
            return Err(anyhow!("runs_dir must not be empty"));
        }
        if self.patch.bulk_file_threshold == 0 || self.patch.large_diff_lines == 0 {
            return Err(anyhow!("patch thresholds must be > 0"));
        }
        if self.codex.command.trim().is_empty() {
            return Err(anyhow!("codex.command must be non-empty"));
        }
        if self.gemini.command.trim().is_empty() {
            return Err(anyhow!("gemini.command must be non-empty"));
        }
        for level in ["fast", "standard", "deep"] {
            if !self.codex.reasoning_map.contains_key(level) {
                return Err(anyhow!("codex.reasoning_map missing '{level}'"));
            }
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    /// Engine binary and arguments.
    pub fn engine_command(&self, engine: EngineKind) -> (&str, &[String]) {
        match engine {
            EngineKind::Codex => (&self.codex.command, &self.codex.args),
            EngineKind::Gemini => (&self.gemini.command, &self.gemini.args),
        }
    }

    /// Replace engine binaries with explicit overrides (`CODEX_BIN`, `GEMINI_BIN`).
    pub fn apply_binary_overrides(&mut self, codex: Option<String>, gemini: Option<String>) {
        if let Some(bin) = codex.filter(|b| !b.trim().is_empty()) {
            self.codex.command = bin;
        }
        if let Some(bin) = gemini.filter(|b| !b.trim().is_empty()) {
            self.gemini.command = bin;
        }
    }

    /// Apply `CODEX_BIN` / `GEMINI_BIN` from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_binary_overrides(
            std::env::var("CODEX_BIN").ok(),
            std::env::var("GEMINI_BIN").ok(),
        );
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `OrchestratorConfig::default()`.
pub fn load_config(path: &Path) -> Result<OrchestratorConfig> {
    if !path.exists() {
        let cfg = OrchestratorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: OrchestratorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &OrchestratorConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    super::fs_atomic::write_atomic(path, buf.as_bytes())
}
