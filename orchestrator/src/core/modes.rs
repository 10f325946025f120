//! Typed mode descriptors and the immutable registry that holds them.
//!
//! Loading from disk lives in `io::modes`; everything here is validated,
//! in-memory data.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use minijinja::Environment;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::output::compile_schema;
use crate::core::types::{EngineKind, ModeId, ReasoningLevel};

/// Persona descriptor governing prompt, engine and output shape for a subtask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Mode {
    pub id: ModeId,
    pub name: String,
    #[serde(default)]
    pub purpose: String,
    pub preferred_engine: EngineKind,
    /// Engine-specific model override; engine default when absent.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub reasoning_level: ReasoningLevel,
    /// minijinja template. Receives `task`, `overall_task`, `context` and `prior_outputs`.
    pub prompt_template: String,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    /// Requires a confirmation token before the engine is called.
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default)]
    pub safety_notes: String,
    /// JSON Schema for structured output. `required` lists mandatory fields.
    #[serde(default = "default_output_schema")]
    pub output_schema: Value,
}

fn default_output_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

/// Immutable mapping from mode id to [`Mode`], in load order.
#[derive(Clone)]
pub struct ModeRegistry {
    version: u32,
    modes: Vec<Mode>,
    /// Output schemas compiled once at load, keyed by mode id.
    validators: HashMap<String, Arc<jsonschema::Validator>>,
}

impl fmt::Debug for ModeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModeRegistry")
            .field("version", &self.version)
            .field("modes", &self.modes)
            .finish_non_exhaustive()
    }
}

impl ModeRegistry {
    /// Validate and freeze a set of modes.
    ///
    /// Fails with every problem found: empty or duplicate ids, templates that do
    /// not compile, output schemas that are not valid JSON Schema objects, or a
    /// missing `general_coder` fallback mode.
    pub fn new(version: u32, modes: Vec<Mode>) -> Result<Self, Vec<String>> {
        let (errors, validators) = validate_modes(&modes);
        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(Self {
            version,
            modes,
            validators,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn get(&self, id: &str) -> Option<&Mode> {
        self.modes.iter().find(|m| m.id.as_str() == id)
    }

    /// Compiled output schema for mode `id`.
    pub fn output_validator(&self, id: &str) -> Option<&jsonschema::Validator> {
        self.validators.get(id).map(Arc::as_ref)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn fallback(&self) -> &Mode {
        // Presence is checked in `new`.
        self.get(ModeId::GENERAL_CODER)
            .unwrap_or_else(|| &self.modes[0])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mode> {
        self.modes.iter()
    }

    pub fn len(&self) -> usize {
        self.modes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }
}

type Validators = HashMap<String, Arc<jsonschema::Validator>>;

fn validate_modes(modes: &[Mode]) -> (Vec<String>, Validators) {
    let mut errors = Vec::new();
    let mut validators = HashMap::new();
    let mut seen = HashSet::new();
    let env = Environment::new();

    for mode in modes {
        let id = mode.id.as_str();
        if id.trim().is_empty() {
            errors.push("mode entry missing id".to_string());
            continue;
        }
        if !seen.insert(id.to_string()) {
            errors.push(format!("duplicate mode id '{id}'"));
        }
        if mode.prompt_template.trim().is_empty() {
            errors.push(format!("{id}: prompt_template is empty"));
        } else if let Err(err) = env.template_from_str(&mode.prompt_template) {
            errors.push(format!("{id}: prompt_template does not compile: {err}"));
        }
        if !mode.output_schema.is_object() {
            errors.push(format!("{id}: output_schema must be an object"));
        } else {
            match compile_schema(&mode.output_schema) {
                Ok(validator) => {
                    validators.insert(id.to_string(), Arc::new(validator));
                }
                Err(err) => errors.push(format!("{id}: output_schema is invalid: {err}")),
            }
        }
    }

    if !seen.contains(ModeId::GENERAL_CODER) {
        errors.push(format!(
            "registry must define the fallback mode '{}'",
            ModeId::GENERAL_CODER
        ));
    }
    (errors, validators)
}
