//! Mode registry loading (YAML).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::core::modes::{Mode, ModeRegistry};

/// Registry bundled into the binary; used when no `modes_path` is configured.
pub const DEFAULT_MODES_YAML: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/modes/modes.yaml"));

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModesFile {
    #[serde(default = "default_version")]
    version: u32,
    modes: Vec<Mode>,
}

fn default_version() -> u32 {
    1
}

/// Parse and validate a registry document. `origin` names it in errors.
pub fn parse_modes(yaml: &str, origin: &str) -> Result<ModeRegistry> {
    let file: ModesFile =
        serde_yaml::from_str(yaml).with_context(|| format!("parse mode registry {origin}"))?;
    ModeRegistry::new(file.version, file.modes).map_err(|errors| {
        anyhow!(
            "invalid mode registry {origin}:\n- {}",
            errors.join("\n- ")
        )
    })
}

/// Load the registry from `path`, or the built-in registry when `None`.
#[instrument(skip_all, fields(path = ?path))]
pub fn load_modes(path: Option<&Path>) -> Result<ModeRegistry> {
    let registry = match path {
        Some(path) => {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("read mode registry {}", path.display()))?;
            parse_modes(&contents, &path.display().to_string())?
        }
        None => default_registry()?,
    };
    debug!(
        version = registry.version(),
        modes = registry.len(),
        "mode registry loaded"
    );
    Ok(registry)
}

pub fn default_registry() -> Result<ModeRegistry> {
    parse_modes(DEFAULT_MODES_YAML, "<built-in>")
}
