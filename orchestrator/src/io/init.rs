//! Initialization helpers for `.orchestrator/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{OrchestratorConfig, write_config};
use super::fs_atomic::write_atomic;
use super::modes::DEFAULT_MODES_YAML;

/// Directory under the working tree that holds config, modes and runs.
pub const STATE_DIR: &str = ".orchestrator";

const ORCHESTRATOR_GITIGNORE: &str = "runs/\n";

/// Canonical paths within `.orchestrator/` for a working tree.
#[derive(Debug, Clone)]
pub struct OrchestratorPaths {
    pub root: PathBuf,
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub modes_path: PathBuf,
    pub gitignore_path: PathBuf,
}

impl OrchestratorPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let state_dir = root.join(STATE_DIR);
        Self {
            root,
            config_path: state_dir.join("config.toml"),
            modes_path: state_dir.join("modes.yaml"),
            gitignore_path: state_dir.join(".gitignore"),
            state_dir,
        }
    }

    /// Resolve a configured path against the working tree.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

/// Options for `init_workspace`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing orchestrator-owned files.
    pub force: bool,
}

/// Create `.orchestrator/` with a default config and an editable copy of the
/// built-in mode registry.
///
/// Fails if `.orchestrator/config.toml` already exists unless `options.force` is set.
pub fn init_workspace(root: &Path, options: &InitOptions) -> Result<OrchestratorPaths> {
    let paths = OrchestratorPaths::new(root);
    if paths.state_dir.exists() && !paths.state_dir.is_dir() {
        return Err(anyhow!(
            "orchestrator init: .orchestrator exists but is not a directory"
        ));
    }
    if paths.config_path.exists() && !options.force {
        return Err(anyhow!(
            "orchestrator init: {} already exists (use --force to overwrite)",
            paths.config_path.display()
        ));
    }

    fs::create_dir_all(&paths.state_dir)
        .with_context(|| format!("create directory {}", paths.state_dir.display()))?;

    let cfg = OrchestratorConfig {
        modes_path: Some(PathBuf::from(".orchestrator/modes.yaml")),
        ..OrchestratorConfig::default()
    };
    write_config(&paths.config_path, &cfg)?;
    write_atomic(&paths.modes_path, DEFAULT_MODES_YAML.as_bytes())?;
    write_atomic(&paths.gitignore_path, ORCHESTRATOR_GITIGNORE.as_bytes())?;

    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::load_config;
    use crate::io::modes::load_modes;

    #[test]
    fn init_creates_expected_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_workspace(temp.path(), &InitOptions { force: false }).expect("init");

        assert!(paths.state_dir.is_dir());
        assert_eq!(
            fs::read_to_string(&paths.gitignore_path).expect("read"),
            ORCHESTRATOR_GITIGNORE
        );

        let cfg = load_config(&paths.config_path).expect("load config");
        let modes_path = paths.resolve(cfg.modes_path.as_deref().expect("modes path"));
        assert_eq!(modes_path, paths.modes_path);
        let registry = load_modes(Some(&modes_path)).expect("load modes");
        assert!(registry.contains("general_coder"));
    }

    #[test]
    fn init_without_force_refuses_existing_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_workspace(temp.path(), &InitOptions { force: false }).expect("init");
        let err = init_workspace(temp.path(), &InitOptions { force: false }).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn init_with_force_restores_modes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_workspace(temp.path(), &InitOptions { force: false }).expect("init");
        fs::write(&paths.modes_path, "custom").expect("write custom");

        init_workspace(temp.path(), &InitOptions { force: true }).expect("re-init");
        assert_eq!(
            fs::read_to_string(&paths.modes_path).expect("read"),
            DEFAULT_MODES_YAML
        );
    }

    #[test]
    fn relative_paths_resolve_against_root() {
        let paths = OrchestratorPaths::new("/work");
        assert_eq!(
            paths.resolve(Path::new(".orchestrator/runs")),
            PathBuf::from("/work/.orchestrator/runs")
        );
        assert_eq!(paths.resolve(Path::new("/abs")), PathBuf::from("/abs"));
    }
}
