//! Filesystem side of the patch gate: path checks, staging and atomic commit.
//!
//! Every file's new contents are computed in memory before anything is
//! written. Commits go through temp-file + rename, and already committed
//! files are restored if a later write fails.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::core::diff::{FileChange, ParsedPatch};
use crate::core::hunks::apply_file_patch;
use crate::io::fs_atomic::write_atomic;
use crate::io::init::STATE_DIR;

/// Reject paths that could write outside `root`, into `.git/` or into the
/// orchestrator's own state directory.
pub fn check_paths(root: &Path, patch: &ParsedPatch) -> Result<(), String> {
    let canonical_root = root
        .canonicalize()
        .map_err(|err| format!("cannot resolve repository root {}: {err}", root.display()))?;
    for file in &patch.files {
        for path in file.touched_paths() {
            check_path(&canonical_root, path)?;
        }
    }
    Ok(())
}

fn check_path(canonical_root: &Path, path: &str) -> Result<(), String> {
    if path.trim().is_empty() {
        return Err("empty path".to_string());
    }
    let relative = Path::new(path);
    if relative.is_absolute() || path.starts_with('/') || path.starts_with('\\') {
        return Err(format!("{path}: absolute paths are not allowed"));
    }
    for component in relative.components() {
        match component {
            Component::ParentDir => return Err(format!("{path}: '..' is not allowed")),
            Component::Prefix(_) | Component::RootDir => {
                return Err(format!("{path}: absolute paths are not allowed"));
            }
            Component::Normal(name) if name == ".git" => {
                return Err(format!("{path}: writes into .git/ are not allowed"));
            }
            Component::Normal(name) if name == STATE_DIR => {
                return Err(format!("{path}: writes into {STATE_DIR}/ are not allowed"));
            }
            _ => {}
        }
    }

    // Resolve the deepest existing ancestor so symlinked directories cannot escape.
    let target = canonical_root.join(relative);
    let mut probe = target.as_path();
    loop {
        match fs::symlink_metadata(probe) {
            Ok(_) => break,
            Err(_) => match probe.parent() {
                Some(parent) => probe = parent,
                None => break,
            },
        }
    }
    let resolved = probe
        .canonicalize()
        .map_err(|err| format!("{path}: cannot resolve ({err})"))?;
    if !resolved.starts_with(canonical_root) {
        return Err(format!("{path}: resolves outside the repository"));
    }
    Ok(())
}

/// One pending filesystem change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagedChange {
    Write { path: PathBuf, contents: String },
    Remove { path: PathBuf },
}

impl StagedChange {
    fn path(&self) -> &Path {
        match self {
            StagedChange::Write { path, .. } | StagedChange::Remove { path } => path,
        }
    }
}

/// Why staging failed.
#[derive(Debug)]
pub enum StageError {
    /// The patch does not fit the current tree.
    Conflict(String),
    Io(anyhow::Error),
}

/// Compute the post-patch state of every touched file without writing.
pub fn stage(root: &Path, patch: &ParsedPatch) -> Result<Vec<StagedChange>, StageError> {
    let mut staged = Vec::new();
    let mut seen = HashSet::new();
    for file in &patch.files {
        let paths: BTreeSet<&str> = file.touched_paths().collect();
        for path in paths {
            if !seen.insert(path) {
                return Err(StageError::Conflict(format!(
                    "{path}: touched more than once in one patch"
                )));
            }
        }
        let apply = |original: &str| {
            apply_file_patch(file, original).map_err(|err| StageError::Conflict(err.to_string()))
        };
        match file.change() {
            FileChange::Create => {
                let path = root.join(file.display_path());
                if path.exists() {
                    return Err(StageError::Conflict(format!(
                        "{}: already exists",
                        file.display_path()
                    )));
                }
                let contents = apply("")?;
                staged.push(StagedChange::Write { path, contents });
            }
            FileChange::Modify => {
                let path = root.join(file.display_path());
                let original = read_existing(&path, file.display_path())?;
                let contents = apply(&original)?;
                staged.push(StagedChange::Write { path, contents });
            }
            FileChange::Delete => {
                let path = root.join(file.display_path());
                let original = read_existing(&path, file.display_path())?;
                if !file.hunks.is_empty() && !apply(&original)?.is_empty() {
                    return Err(StageError::Conflict(format!(
                        "{}: deletion does not remove the whole file",
                        file.display_path()
                    )));
                }
                staged.push(StagedChange::Remove { path });
            }
            FileChange::Rename => {
                let old = file.old_path.as_deref().unwrap_or_default();
                let new = file.display_path();
                let old_path = root.join(old);
                let new_path = root.join(new);
                let original = read_existing(&old_path, old)?;
                if new_path.exists() {
                    return Err(StageError::Conflict(format!("{new}: already exists")));
                }
                let contents = apply(&original)?;
                staged.push(StagedChange::Write {
                    path: new_path,
                    contents,
                });
                staged.push(StagedChange::Remove { path: old_path });
            }
        }
    }
    Ok(staged)
}

fn read_existing(path: &Path, display: &str) -> Result<String, StageError> {
    match fs::read(path) {
        Ok(bytes) => String::from_utf8(bytes)
            .map_err(|_| StageError::Conflict(format!("{display}: not valid UTF-8"))),
        Err(err) if err.kind() == IoErrorKind::NotFound => {
            Err(StageError::Conflict(format!("{display}: does not exist")))
        }
        Err(err) => Err(StageError::Io(
            anyhow::Error::new(err).context(format!("read {}", path.display())),
        )),
    }
}

/// Write staged changes. On failure, restore everything already committed.
pub fn commit(staged: &[StagedChange]) -> Result<()> {
    let mut backups: Vec<(PathBuf, Option<Vec<u8>>)> = Vec::new();
    for change in staged {
        let path = change.path();
        let before = match fs::read(path) {
            Ok(bytes) => Some(bytes),
            Err(err) if err.kind() == IoErrorKind::NotFound => None,
            Err(err) => {
                rollback(&backups);
                return Err(err).with_context(|| format!("read {}", path.display()));
            }
        };
        let result = match change {
            StagedChange::Write { path, contents } => write_atomic(path, contents.as_bytes()),
            StagedChange::Remove { path } => {
                fs::remove_file(path).with_context(|| format!("remove {}", path.display()))
            }
        };
        backups.push((path.to_path_buf(), before));
        if let Err(err) = result {
            rollback(&backups);
            return Err(err);
        }
        debug!(path = %path.display(), "committed patch change");
    }
    Ok(())
}

fn rollback(backups: &[(PathBuf, Option<Vec<u8>>)]) {
    for (path, before) in backups.iter().rev() {
        let restored = match before {
            Some(bytes) => write_atomic(path, bytes),
            None => match fs::remove_file(path) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == IoErrorKind::NotFound => Ok(()),
                Err(err) => Err(anyhow::Error::new(err)),
            },
        };
        if let Err(err) = restored {
            warn!(path = %path.display(), err = %format!("{err:#}"), "rollback failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::diff::parse_patch;

    fn tree(files: &[(&str, &str)]) -> tempfile::TempDir {
        let temp = tempfile::tempdir().expect("tempdir");
        for (path, contents) in files {
            let full = temp.path().join(path);
            fs::create_dir_all(full.parent().expect("parent")).expect("mkdir");
            fs::write(full, contents).expect("write");
        }
        temp
    }

    #[test]
    fn rejects_escaping_paths() {
        let temp = tree(&[]);
        let bad_paths = [
            "/etc/passwd",
            "../outside.txt",
            "a/../../x",
            ".git/config",
            "sub/.git/HEAD",
            ".orchestrator/config.toml",
            ".orchestrator/runs/x/result.json",
        ];
        for bad in bad_paths {
            let patch = parse_patch(&format!("--- a/{bad}\n+++ b/{bad}\n@@ -1 +1 @@\n-a\n+b\n"))
                .or_else(|_| parse_patch(&format!("--- {bad}\n+++ {bad}\n@@ -1 +1 @@\n-a\n+b\n")))
                .expect("parse");
            assert!(check_paths(temp.path(), &patch).is_err(), "{bad} accepted");
        }
        let ok = parse_patch("--- a/src/x.rs\n+++ b/src/x.rs\n@@ -1 +1 @@\n-a\n+b\n").expect("parse");
        assert!(check_paths(temp.path(), &ok).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_escape() {
        let outside = tempfile::tempdir().expect("outside");
        let temp = tree(&[]);
        std::os::unix::fs::symlink(outside.path(), temp.path().join("link")).expect("symlink");
        let patch =
            parse_patch("--- /dev/null\n+++ b/link/evil.txt\n@@ -0,0 +1 @@\n+x\n").expect("parse");
        let err = check_paths(temp.path(), &patch).unwrap_err();
        assert!(err.contains("outside the repository"));
    }

    #[test]
    fn stages_create_modify_delete_and_rename() {
        let temp = tree(&[("keep.txt", "a\nb\n"), ("gone.txt", "x\n"), ("old.txt", "r\n")]);
        let patch = parse_patch(concat!(
            "--- a/keep.txt\n+++ b/keep.txt\n@@ -1,2 +1,2 @@\n a\n-b\n+c\n",
            "--- /dev/null\n+++ b/new.txt\n@@ -0,0 +1 @@\n+n\n",
            "diff --git a/gone.txt b/gone.txt\ndeleted file mode 100644\n--- a/gone.txt\n+++ /dev/null\n@@ -1 +0,0 @@\n-x\n",
            "diff --git a/old.txt b/moved.txt\nrename from old.txt\nrename to moved.txt\n",
        ))
        .expect("parse");
        let staged = stage(temp.path(), &patch).expect("stage");
        commit(&staged).expect("commit");

        let read = |p: &str| fs::read_to_string(temp.path().join(p)).expect("read");
        assert_eq!(read("keep.txt"), "a\nc\n");
        assert_eq!(read("new.txt"), "n\n");
        assert_eq!(read("moved.txt"), "r\n");
        assert!(!temp.path().join("gone.txt").exists());
        assert!(!temp.path().join("old.txt").exists());
    }

    #[test]
    fn in_place_modification_stages_once() {
        let temp = tree(&[("f.txt", "a\n")]);
        let patch = parse_patch("--- a/f.txt\n+++ b/f.txt\n@@ -1 +1 @@\n-a\n+b\n").expect("parse");
        let staged = stage(temp.path(), &patch).expect("stage");
        assert_eq!(
            staged,
            vec![StagedChange::Write {
                path: temp.path().join("f.txt"),
                contents: "b\n".to_string(),
            }]
        );
    }

    #[test]
    fn same_file_in_two_sections_conflicts() {
        let temp = tree(&[("f.txt", "a\n")]);
        let patch = parse_patch(concat!(
            "--- a/f.txt\n+++ b/f.txt\n@@ -1 +1 @@\n-a\n+b\n",
            "--- a/f.txt\n+++ b/f.txt\n@@ -1 +1 @@\n-b\n+c\n",
        ))
        .expect("parse");
        assert!(matches!(
            stage(temp.path(), &patch),
            Err(StageError::Conflict(m)) if m.contains("touched more than once")
        ));
    }

    #[test]
    fn conflicts_are_detected_before_writing() {
        let temp = tree(&[("a.txt", "one\n"), ("b.txt", "two\n")]);
        let patch = parse_patch(concat!(
            "--- a/a.txt\n+++ b/a.txt\n@@ -1 +1 @@\n-one\n+uno\n",
            "--- a/b.txt\n+++ b/b.txt\n@@ -1 +1 @@\n-zwei\n+dos\n",
        ))
        .expect("parse");
        assert!(matches!(
            stage(temp.path(), &patch),
            Err(StageError::Conflict(_))
        ));
        assert_eq!(fs::read_to_string(temp.path().join("a.txt")).expect("read"), "one\n");
    }

    #[test]
    fn missing_and_existing_targets_conflict() {
        let temp = tree(&[("exists.txt", "e\n")]);
        let create = parse_patch("--- /dev/null\n+++ b/exists.txt\n@@ -0,0 +1 @@\n+n\n").expect("parse");
        assert!(matches!(stage(temp.path(), &create), Err(StageError::Conflict(m)) if m.contains("already exists")));
        let modify = parse_patch("--- a/missing.txt\n+++ b/missing.txt\n@@ -1 +1 @@\n-a\n+b\n").expect("parse");
        assert!(matches!(stage(temp.path(), &modify), Err(StageError::Conflict(m)) if m.contains("does not exist")));
    }

    #[test]
    fn rollback_restores_committed_files() {
        let temp = tree(&[("a.txt", "one\n")]);
        let blocker = temp.path().join("blocker");
        fs::write(&blocker, "file, not a dir").expect("write");
        let staged = vec![
            StagedChange::Write {
                path: temp.path().join("a.txt"),
                contents: "uno\n".to_string(),
            },
            StagedChange::Write {
                path: blocker.join("nested.txt"),
                contents: "x".to_string(),
            },
        ];
        assert!(commit(&staged).is_err());
        assert_eq!(fs::read_to_string(temp.path().join("a.txt")).expect("read"), "one\n");
    }
}
