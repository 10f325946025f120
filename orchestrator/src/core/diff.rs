//! Strict unified diff parser.
//!
//! Accepts plain unified diffs (`---`/`+++`/`@@`) and git extended headers
//! (`diff --git`, `new file mode`, `deleted file mode`, `rename from/to`).
//! Anything structurally wrong is a [`DiffParseError`]; nothing here touches
//! the filesystem.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static HUNK_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("hunk header pattern")
});

const DEV_NULL: &str = "/dev/null";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct DiffParseError {
    pub line: usize,
    pub message: String,
}

fn parse_error(line: usize, message: impl Into<String>) -> DiffParseError {
    DiffParseError {
        line,
        message: message.into(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Context,
    Remove,
    Add,
}

/// One body line of a hunk, without its leading marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HunkLine {
    pub kind: LineKind,
    pub text: String,
    /// False when followed by `\ No newline at end of file`.
    pub newline: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: usize,
    pub old_len: usize,
    pub new_start: usize,
    pub new_len: usize,
    pub lines: Vec<HunkLine>,
}

impl Hunk {
    /// Lines the target file must contain at the hunk position.
    pub fn old_lines(&self) -> impl Iterator<Item = &HunkLine> {
        self.lines.iter().filter(|l| l.kind != LineKind::Add)
    }

    /// Lines the hunk produces.
    pub fn new_lines(&self) -> impl Iterator<Item = &HunkLine> {
        self.lines.iter().filter(|l| l.kind != LineKind::Remove)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileChange {
    Modify,
    Create,
    Delete,
    Rename,
}

/// All changes to a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePatch {
    /// `None` when the file is created.
    pub old_path: Option<String>,
    /// `None` when the file is deleted.
    pub new_path: Option<String>,
    pub hunks: Vec<Hunk>,
}

impl FilePatch {
    pub fn change(&self) -> FileChange {
        match (&self.old_path, &self.new_path) {
            (None, _) => FileChange::Create,
            (_, None) => FileChange::Delete,
            (Some(old), Some(new)) if old != new => FileChange::Rename,
            _ => FileChange::Modify,
        }
    }

    /// Path the change is reported under (target path, or source for deletions).
    pub fn display_path(&self) -> &str {
        self.new_path
            .as_deref()
            .or(self.old_path.as_deref())
            .unwrap_or_default()
    }

    /// Every path the patch reads or writes.
    pub fn touched_paths(&self) -> impl Iterator<Item = &str> {
        self.old_path.iter().chain(self.new_path.iter()).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPatch {
    pub files: Vec<FilePatch>,
    /// Number of lines in the raw patch text.
    pub total_lines: usize,
}

/// Human-facing description of what a patch touches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PatchSummary {
    pub files: Vec<String>,
    pub new_files: Vec<String>,
    pub deleted_files: Vec<String>,
    pub renamed_files: Vec<String>,
    pub file_count: usize,
    pub total_lines: usize,
}

impl ParsedPatch {
    pub fn summary(&self) -> PatchSummary {
        let mut files = BTreeSet::new();
        let mut new_files = BTreeSet::new();
        let mut deleted_files = BTreeSet::new();
        let mut renamed_files = BTreeSet::new();
        for file in &self.files {
            let path = file.display_path().to_string();
            match file.change() {
                FileChange::Create => {
                    new_files.insert(path.clone());
                }
                FileChange::Delete => {
                    deleted_files.insert(path.clone());
                }
                FileChange::Rename => {
                    if let Some(old) = &file.old_path {
                        renamed_files.insert(old.clone());
                    }
                }
                FileChange::Modify => {}
            }
            files.insert(path);
        }
        PatchSummary {
            file_count: files.len(),
            files: files.into_iter().collect(),
            new_files: new_files.into_iter().collect(),
            deleted_files: deleted_files.into_iter().collect(),
            renamed_files: renamed_files.into_iter().collect(),
            total_lines: self.total_lines,
        }
    }
}

#[derive(Debug, Default)]
struct PendingFile {
    header_line: usize,
    git_old: Option<String>,
    git_new: Option<String>,
    old_path: Option<Option<String>>,
    new_path: Option<Option<String>>,
    rename_from: Option<String>,
    rename_to: Option<String>,
    created: bool,
    deleted: bool,
    hunks: Vec<Hunk>,
}

impl PendingFile {
    fn finish(self) -> Result<FilePatch, DiffParseError> {
        let line = self.header_line;
        if self.old_path.is_some() != self.new_path.is_some() {
            return Err(parse_error(line, "file header needs both '---' and '+++' lines"));
        }

        let (old_path, new_path) = match (self.old_path, self.new_path) {
            (Some(old), Some(new)) => (old, new),
            _ => {
                // git header without ---/+++: pure rename, mode change or empty file.
                let old = self.rename_from.clone().or(self.git_old.clone());
                let new = self.rename_to.clone().or(self.git_new.clone());
                match (old, new) {
                    (Some(old), Some(new)) => (
                        (!self.created).then_some(old),
                        (!self.deleted).then_some(new),
                    ),
                    _ => return Err(parse_error(line, "file section has no paths")),
                }
            }
        };
        let old_path = match (self.rename_from, old_path) {
            (Some(from), Some(_)) => Some(from),
            (_, old) => old,
        };
        let new_path = match (self.rename_to, new_path) {
            (Some(to), Some(_)) => Some(to),
            (_, new) => new,
        };

        if old_path.is_none() && new_path.is_none() {
            return Err(parse_error(line, "both sides of the file header are /dev/null"));
        }
        let patch = FilePatch {
            old_path,
            new_path,
            hunks: self.hunks,
        };
        if patch.hunks.is_empty() && patch.change() == FileChange::Modify {
            return Err(parse_error(line, "file section has no hunks"));
        }
        Ok(patch)
    }
}

/// Parse `text` as a unified diff.
pub fn parse_patch(text: &str) -> Result<ParsedPatch, DiffParseError> {
    if text.trim().is_empty() {
        return Err(parse_error(0, "patch is empty"));
    }
    let lines = split_lines(text);
    let mut files = Vec::new();
    let mut pending: Option<PendingFile> = None;
    let mut idx = 0;

    while idx < lines.len() {
        let line = lines[idx];
        let line_no = idx + 1;

        if let Some(rest) = line.strip_prefix("diff --git ") {
            if let Some(done) = pending.take() {
                files.push(done.finish()?);
            }
            let (git_old, git_new) = parse_git_paths(rest)
                .ok_or_else(|| parse_error(line_no, "malformed 'diff --git' header"))?;
            pending = Some(PendingFile {
                header_line: line_no,
                git_old: Some(git_old),
                git_new: Some(git_new),
                ..PendingFile::default()
            });
            idx += 1;
            continue;
        }

        if let Some(rest) = line.strip_prefix("--- ") {
            let starts_new_file = match &pending {
                Some(file) => file.old_path.is_some() || !file.hunks.is_empty(),
                None => true,
            };
            if starts_new_file {
                if let Some(done) = pending.take() {
                    files.push(done.finish()?);
                }
                pending = Some(PendingFile {
                    header_line: line_no,
                    ..PendingFile::default()
                });
            }
            let next = lines.get(idx + 1).copied().unwrap_or_default();
            let Some(new_rest) = next.strip_prefix("+++ ") else {
                return Err(parse_error(line_no + 1, "expected '+++' after '---'"));
            };
            if let Some(file) = pending.as_mut() {
                file.old_path = Some(header_path(rest));
                file.new_path = Some(header_path(new_rest));
            }
            idx += 2;
            continue;
        }

        if line.starts_with("@@") {
            let Some(file) = pending.as_mut() else {
                return Err(parse_error(line_no, "hunk before any file header"));
            };
            if file.old_path.is_none() {
                return Err(parse_error(line_no, "hunk without '---'/'+++' header"));
            }
            let (hunk, consumed) = parse_hunk(&lines, idx)?;
            file.hunks.push(hunk);
            idx += consumed;
            continue;
        }

        if let Some(file) = pending.as_mut() {
            if line.starts_with("new file mode") {
                file.created = true;
            } else if line.starts_with("deleted file mode") {
                file.deleted = true;
            } else if let Some(from) = line.strip_prefix("rename from ") {
                file.rename_from = Some(from.trim().to_string());
            } else if let Some(to) = line.strip_prefix("rename to ") {
                file.rename_to = Some(to.trim().to_string());
            } else if line.starts_with("Binary files ") || line.starts_with("GIT binary patch") {
                return Err(parse_error(line_no, "binary patches are not supported"));
            }
        }
        // Other lines (index, mode, similarity, preamble text) carry no content.
        idx += 1;
    }

    if let Some(done) = pending.take() {
        files.push(done.finish()?);
    }
    if files.is_empty() {
        return Err(parse_error(0, "no file headers found"));
    }
    Ok(ParsedPatch {
        files,
        total_lines: text.lines().count(),
    })
}

fn parse_hunk(lines: &[&str], start: usize) -> Result<(Hunk, usize), DiffParseError> {
    let header_no = start + 1;
    let caps = HUNK_HEADER_RE
        .captures(lines[start])
        .ok_or_else(|| parse_error(header_no, format!("malformed hunk header '{}'", lines[start])))?;
    let number = |i: usize, default: usize| -> Result<usize, DiffParseError> {
        match caps.get(i) {
            Some(m) => m
                .as_str()
                .parse()
                .map_err(|_| parse_error(header_no, "hunk range out of bounds")),
            None => Ok(default),
        }
    };
    let mut hunk = Hunk {
        old_start: number(1, 0)?,
        old_len: number(2, 1)?,
        new_start: number(3, 0)?,
        new_len: number(4, 1)?,
        lines: Vec::new(),
    };

    let (mut old_seen, mut new_seen) = (0usize, 0usize);
    let mut idx = start + 1;
    while old_seen < hunk.old_len || new_seen < hunk.new_len {
        let Some(line) = lines.get(idx) else {
            return Err(parse_error(header_no, "hunk is truncated"));
        };
        let (kind, text) = match line.chars().next() {
            Some(' ') => (LineKind::Context, &line[1..]),
            // Some tools strip the trailing space from empty context lines.
            None => (LineKind::Context, ""),
            Some('-') => (LineKind::Remove, &line[1..]),
            Some('+') => (LineKind::Add, &line[1..]),
            Some('\\') => {
                mark_no_newline(&mut hunk, idx + 1)?;
                idx += 1;
                continue;
            }
            Some(_) => {
                return Err(parse_error(
                    idx + 1,
                    format!("hunk is truncated (expected {} old / {} new lines)", hunk.old_len, hunk.new_len),
                ));
            }
        };
        match kind {
            LineKind::Context => {
                old_seen += 1;
                new_seen += 1;
            }
            LineKind::Remove => old_seen += 1,
            LineKind::Add => new_seen += 1,
        }
        if old_seen > hunk.old_len || new_seen > hunk.new_len {
            return Err(parse_error(idx + 1, "hunk body longer than its header declares"));
        }
        hunk.lines.push(HunkLine {
            kind,
            text: text.to_string(),
            newline: true,
        });
        idx += 1;
    }
    if let Some(line) = lines.get(idx) {
        if line.starts_with('\\') {
            mark_no_newline(&mut hunk, idx + 1)?;
            idx += 1;
        }
    }
    Ok((hunk, idx - start))
}

fn mark_no_newline(hunk: &mut Hunk, line_no: usize) -> Result<(), DiffParseError> {
    let last = hunk
        .lines
        .last_mut()
        .ok_or_else(|| parse_error(line_no, "'\\ No newline' marker without a preceding line"))?;
    last.newline = false;
    Ok(())
}

/// Split on `\n` without producing a phantom last line for a trailing newline.
fn split_lines(text: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = text.split('\n').collect();
    if text.ends_with('\n') {
        lines.pop();
    }
    lines
}

fn parse_git_paths(rest: &str) -> Option<(String, String)> {
    let rest = rest.trim();
    // `a/<path> b/<path>`; split at the last " b/" so paths with spaces survive.
    let split = rest.rfind(" b/")?;
    let old = rest[..split].strip_prefix("a/")?;
    let new = &rest[split + 3..];
    if old.is_empty() || new.is_empty() {
        return None;
    }
    Some((old.to_string(), new.to_string()))
}

/// Path from a `---`/`+++` line. `None` for `/dev/null`.
fn header_path(rest: &str) -> Option<String> {
    // Drop an optional tab-separated timestamp.
    let raw = rest.split('\t').next().unwrap_or_default().trim();
    if raw == DEV_NULL {
        return None;
    }
    let stripped = raw
        .strip_prefix("a/")
        .or_else(|| raw.strip_prefix("b/"))
        .unwrap_or(raw);
    Some(stripped.to_string())
}
