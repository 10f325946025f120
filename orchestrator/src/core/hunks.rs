//! Apply parsed hunks to file contents in memory.
//!
//! Context must match exactly (no fuzz). A hunk may sit at an offset from its
//! declared position, as with `patch`, but never before the end of the
//! previous hunk.

use crate::core::diff::{FilePatch, Hunk, HunkLine, LineKind};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{path}: hunk {hunk} does not apply ({reason})")]
pub struct HunkConflict {
    pub path: String,
    pub hunk: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Line {
    text: String,
    newline: bool,
}

/// Apply every hunk of `patch` to `original` and return the new contents.
pub fn apply_file_patch(patch: &FilePatch, original: &str) -> Result<String, HunkConflict> {
    let mut lines = split_content(original);
    let mut floor = 0usize;
    // Net lines added by earlier hunks, used to predict later hunk positions.
    let mut shift: isize = 0;

    for (index, hunk) in patch.hunks.iter().enumerate() {
        let conflict = |reason: &str| HunkConflict {
            path: patch.display_path().to_string(),
            hunk: index + 1,
            reason: reason.to_string(),
        };
        let expected: Vec<&HunkLine> = hunk.old_lines().collect();
        // A zero-length old range names the line after which to insert.
        let anchor = if hunk.old_len == 0 {
            hunk.old_start
        } else {
            hunk.old_start.saturating_sub(1)
        };
        let declared = anchor as isize + shift;
        let preferred = declared.max(floor as isize) as usize;
        let at = find_match(&lines, &expected, preferred, floor)
            .ok_or_else(|| conflict("context does not match"))?;

        let replacement = replacement_lines(hunk, &lines[at..at + expected.len()]);
        let added = replacement.len();
        lines.splice(at..at + expected.len(), replacement);
        shift += added as isize - expected.len() as isize;
        floor = at + added;
    }

    Ok(join_content(&lines))
}

/// Search outward from `preferred` for the first position where `expected` matches.
fn find_match(lines: &[Line], expected: &[&HunkLine], preferred: usize, floor: usize) -> Option<usize> {
    let max_start = lines.len().checked_sub(expected.len())?;
    if max_start < floor {
        return None;
    }
    let preferred = preferred.clamp(floor, max_start);
    let matches_at = |start: usize| {
        expected
            .iter()
            .zip(&lines[start..])
            .all(|(want, have)| want.text == have.text)
    };
    for distance in 0..=(max_start - floor) {
        let after = preferred + distance;
        if after <= max_start && matches_at(after) {
            return Some(after);
        }
        if let Some(before) = preferred.checked_sub(distance) {
            if distance > 0 && before >= floor && matches_at(before) {
                return Some(before);
            }
        }
        if after > max_start && preferred.saturating_sub(distance) <= floor {
            break;
        }
    }
    None
}

/// New lines for a matched hunk. Context lines keep the file's own line ending.
fn replacement_lines(hunk: &Hunk, matched: &[Line]) -> Vec<Line> {
    let mut old = matched.iter();
    let mut out = Vec::new();
    for line in &hunk.lines {
        match line.kind {
            LineKind::Context => {
                let original = old.next();
                out.push(Line {
                    text: line.text.clone(),
                    newline: original.map(|l| l.newline).unwrap_or(line.newline),
                });
            }
            LineKind::Remove => {
                old.next();
            }
            LineKind::Add => out.push(Line {
                text: line.text.clone(),
                newline: line.newline,
            }),
        }
    }
    out
}

fn split_content(content: &str) -> Vec<Line> {
    if content.is_empty() {
        return Vec::new();
    }
    let ends_with_newline = content.ends_with('\n');
    let mut lines: Vec<Line> = content
        .split('\n')
        .map(|text| Line {
            text: text.to_string(),
            newline: true,
        })
        .collect();
    if ends_with_newline {
        lines.pop();
    } else if let Some(last) = lines.last_mut() {
        last.newline = false;
    }
    lines
}

fn join_content(lines: &[Line]) -> String {
    let mut out = String::new();
    for line in lines {
        out.push_str(&line.text);
        if line.newline {
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::diff::parse_patch;

    fn apply(patch: &str, original: &str) -> Result<String, HunkConflict> {
        let parsed = parse_patch(patch).expect("parse");
        apply_file_patch(&parsed.files[0], original)
    }

    #[test]
    fn applies_single_replacement() {
        let patch = "--- a/f\n+++ b/f\n@@ -1,3 +1,3 @@\n a\n-b\n+B\n c\n";
        assert_eq!(apply(patch, "a\nb\nc\n").expect("apply"), "a\nB\nc\n");
    }

    #[test]
    fn applies_multiple_hunks_with_shift() {
        let patch = "--- a/f\n+++ b/f\n@@ -1,2 +1,3 @@\n 1\n+1.5\n 2\n@@ -5,2 +6,2 @@\n 5\n-6\n+six\n";
        let original = "1\n2\n3\n4\n5\n6\n";
        assert_eq!(
            apply(patch, original).expect("apply"),
            "1\n1.5\n2\n3\n4\n5\nsix\n"
        );
    }

    #[test]
    fn finds_hunk_at_offset() {
        let patch = "--- a/f\n+++ b/f\n@@ -1,2 +1,2 @@\n x\n-y\n+z\n";
        assert_eq!(
            apply(patch, "header\nmore\nx\ny\n").expect("apply"),
            "header\nmore\nx\nz\n"
        );
    }

    #[test]
    fn creates_file_from_empty() {
        let patch = "--- /dev/null\n+++ b/new\n@@ -0,0 +1,2 @@\n+one\n+two\n";
        assert_eq!(apply(patch, "").expect("apply"), "one\ntwo\n");
    }

    #[test]
    fn handles_missing_trailing_newline() {
        let patch = "--- a/f\n+++ b/f\n@@ -1 +1 @@\n-a\n\\ No newline at end of file\n+b\n\\ No newline at end of file\n";
        assert_eq!(apply(patch, "a").expect("apply"), "b");
    }

    #[test]
    fn mismatched_context_is_a_conflict() {
        let patch = "--- a/f\n+++ b/f\n@@ -1,2 +1,2 @@\n a\n-b\n+c\n";
        let err = apply(patch, "a\nq\n").unwrap_err();
        assert_eq!(err.hunk, 1);
        assert_eq!(err.path, "f");
    }
}
