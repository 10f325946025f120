//! Run record persistence under the runs directory.
//!
//! Layout per run: `task.json`, `plan.json`, `invocations/<seq>_<subtask>.json`
//! and `result.json`. Every file is pretty JSON written atomically.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::slug::safe_slug;
use crate::core::types::{Plan, Task};
use crate::io::fs_atomic::write_json_atomic;
use crate::record::{EngineInvocation, RunRecord};

/// Creates run directories under `runs_dir`.
#[derive(Debug, Clone)]
pub struct RunStore {
    runs_dir: PathBuf,
}

/// An open run directory.
#[derive(Debug, Clone)]
pub struct RunHandle {
    pub run_id: String,
    pub dir: PathBuf,
}

impl RunStore {
    pub fn new(runs_dir: impl Into<PathBuf>) -> Self {
        Self {
            runs_dir: runs_dir.into(),
        }
    }

    pub fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    /// Create a fresh directory for `run_id`, suffixing `-2`, `-3`, ... on collision.
    pub fn create_run(&self, run_id: &str) -> Result<RunHandle> {
        fs::create_dir_all(&self.runs_dir)
            .with_context(|| format!("create runs dir {}", self.runs_dir.display()))?;
        let mut candidate = run_id.to_string();
        let mut n = 1;
        loop {
            let dir = self.runs_dir.join(&candidate);
            match fs::create_dir(&dir) {
                Ok(()) => {
                    debug!(run_dir = %dir.display(), "created run directory");
                    return Ok(RunHandle {
                        run_id: candidate,
                        dir,
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    n += 1;
                    candidate = format!("{run_id}-{n}");
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("create run dir {}", dir.display()));
                }
            }
        }
    }
}

impl RunHandle {
    pub fn task_path(&self) -> PathBuf {
        self.dir.join("task.json")
    }

    pub fn plan_path(&self) -> PathBuf {
        self.dir.join("plan.json")
    }

    pub fn result_path(&self) -> PathBuf {
        self.dir.join("result.json")
    }

    pub fn invocation_path(&self, invocation: &EngineInvocation) -> PathBuf {
        self.dir.join("invocations").join(format!(
            "{:03}_{}.json",
            invocation.seq,
            safe_slug(&invocation.subtask_id)
        ))
    }

    pub fn write_task(&self, task: &Task) -> Result<()> {
        write_json_atomic(&self.task_path(), task)
    }

    pub fn write_plan(&self, plan: &Plan) -> Result<()> {
        write_json_atomic(&self.plan_path(), plan)
    }

    pub fn write_invocation(&self, invocation: &EngineInvocation) -> Result<()> {
        write_json_atomic(&self.invocation_path(invocation), invocation)
    }

    pub fn write_record(&self, record: &RunRecord) -> Result<()> {
        write_json_atomic(&self.result_path(), record)
    }
}
