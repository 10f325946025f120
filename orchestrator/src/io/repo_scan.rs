//! Shallow repository scan: the top of the tree plus a guess at its stack.
//!
//! Used to give callers something to put in a task's `context`. Build output,
//! virtualenvs, VCS metadata and the orchestrator's own state are skipped.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use walkdir::{DirEntry, WalkDir};

use crate::io::init::STATE_DIR;

const EXCLUDED_DIRS: [&str; 10] = [
    ".git",
    ".venv",
    "venv",
    "__pycache__",
    "node_modules",
    "dist",
    "build",
    "target",
    ".mypy_cache",
    ".pytest_cache",
];

const EXCLUDED_SUFFIXES: [&str; 1] = [".sqlite3"];

const KEY_FILES: [&str; 6] = [
    "README.md",
    "Cargo.toml",
    "pyproject.toml",
    "requirements.txt",
    "package.json",
    "go.mod",
];

/// Cap on each list in the report.
const LIST_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy)]
pub struct ScanLimits {
    pub max_depth: usize,
    pub max_files: usize,
}

impl Default for ScanLimits {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_files: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoScan {
    pub root: String,
    pub dirs: Vec<String>,
    pub files: Vec<String>,
    pub key_files: Vec<String>,
    pub stack: Vec<String>,
    /// Set when the file cap or the list limit dropped entries.
    pub truncated: bool,
}

impl RepoScan {
    pub fn describe(&self) -> String {
        let stack = if self.stack.is_empty() {
            "unknown stack".to_string()
        } else {
            self.stack.join(", ")
        };
        format!(
            "{} files, {} dirs ({stack}){}",
            self.files.len(),
            self.dirs.len(),
            if self.truncated { ", truncated" } else { "" }
        )
    }
}

/// Walk `root` up to `limits` and summarize what is there.
pub fn scan_repo(root: &Path, limits: ScanLimits) -> Result<RepoScan> {
    let root = root
        .canonicalize()
        .with_context(|| format!("resolve {}", root.display()))?;
    let mut dirs = Vec::new();
    let mut files = Vec::new();
    let mut saw_tex = false;
    let mut truncated = false;

    let walker = WalkDir::new(&root)
        .min_depth(1)
        .max_depth(limits.max_depth)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_excluded(entry));
    for entry in walker.filter_map(Result::ok) {
        let Ok(rel) = entry.path().strip_prefix(&root) else {
            continue;
        };
        let rel = rel.to_string_lossy().replace('\\', "/");
        if entry.file_type().is_dir() {
            dirs.push(rel);
        } else if entry.file_type().is_file() {
            if files.len() >= limits.max_files {
                truncated = true;
                break;
            }
            saw_tex |= rel.ends_with(".tex");
            files.push(rel);
        }
    }

    let key_files: Vec<String> = files
        .iter()
        .filter(|f| {
            let name = f.rsplit('/').next().unwrap_or_default();
            KEY_FILES.contains(&name) || f.starts_with(".vscode/") || f.contains("/.vscode/")
        })
        .cloned()
        .collect();

    let mut stack = Vec::new();
    if root.join("go.mod").exists() {
        stack.push("go".to_string());
    }
    if saw_tex {
        stack.push("latex".to_string());
    }
    if root.join("package.json").exists() {
        stack.push("node".to_string());
    }
    if root.join("pyproject.toml").exists() || root.join("requirements.txt").exists() {
        stack.push("python".to_string());
    }
    if root.join("Cargo.toml").exists() {
        stack.push("rust".to_string());
    }

    Ok(RepoScan {
        root: root.display().to_string(),
        dirs: capped(dirs, &mut truncated),
        files: capped(files, &mut truncated),
        key_files: capped(key_files, &mut truncated),
        stack,
        truncated,
    })
}

fn is_excluded(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    if entry.file_type().is_dir() {
        EXCLUDED_DIRS.contains(&&*name) || name == STATE_DIR
    } else {
        EXCLUDED_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
    }
}

fn capped(mut items: Vec<String>, truncated: &mut bool) -> Vec<String> {
    items.sort();
    if items.len() > LIST_LIMIT {
        items.truncate(LIST_LIMIT);
        *truncated = true;
    }
    items
}
