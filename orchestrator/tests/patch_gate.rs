//! Patch gate behavior against real scratch trees.

use std::fs;
use std::path::Path;

use orchestrator::core::risk::RiskThresholds;
use orchestrator::core::types::{Risk, SafetyLevel};
use orchestrator::error::ErrorKind;
use orchestrator::patch_gate::{PatchGate, PatchOutcome, PatchRequest};
use orchestrator::test_support::scratch_tree;

const ADD_LINE: &str = "\
--- a/src/lib.rs
+++ b/src/lib.rs
@@ -1,2 +1,3 @@
 fn a() {}
+fn b() {}
 fn c() {}
";

const CREATE_AND_RENAME: &str = "\
diff --git a/docs/new.md b/docs/new.md
new file mode 100644
--- /dev/null
+++ b/docs/new.md
@@ -0,0 +1 @@
+hello
diff --git a/README b/README.md
similarity index 100%
rename from README
rename to README.md
";

fn gate(root: &Path) -> PatchGate {
    PatchGate::new(root, RiskThresholds::default())
}

fn request(diff: &str, safety_level: SafetyLevel, token: Option<&str>) -> PatchRequest {
    PatchRequest {
        diff: diff.to_string(),
        safety_level,
        confirm_token: token.map(str::to_string),
    }
}

/// Snapshot of every file under `root`, for byte-identical comparisons.
fn snapshot(root: &Path) -> Vec<(String, Vec<u8>)> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir).expect("read dir") {
            let path = entry.expect("entry").path();
            if path.is_dir() {
                stack.push(path);
            } else {
                let rel = path.strip_prefix(root).expect("prefix").display().to_string();
                out.push((rel, fs::read(&path).expect("read file")));
            }
        }
    }
    out.sort();
    out
}

#[test]
fn token_is_deterministic_and_content_sensitive() {
    let token = PatchGate::token_for(ADD_LINE);
    assert_eq!(token, PatchGate::token_for(ADD_LINE));
    assert!(token.starts_with("CONFIRM_"));
    assert_eq!(token.len(), "CONFIRM_".len() + 8);

    let tweaked = ADD_LINE.replacen("fn b", "fn d", 1);
    assert_ne!(token, PatchGate::token_for(&tweaked));
}

#[test]
fn benign_patch_applies_without_token() {
    let tree = scratch_tree(&[("src/lib.rs", "fn a() {}\nfn c() {}\n")]);
    let outcome = gate(tree.path()).apply(&request(ADD_LINE, SafetyLevel::Low, None));

    match &outcome {
        PatchOutcome::Applied { files, risk, .. } => {
            assert_eq!(files, &vec!["src/lib.rs".to_string()]);
            assert_eq!(risk.risk, Risk::Benign);
        }
        other => panic!("expected applied, got {other:?}"),
    }
    assert_eq!(
        fs::read_to_string(tree.path().join("src/lib.rs")).expect("read"),
        "fn a() {}\nfn b() {}\nfn c() {}\n"
    );
}

#[test]
fn risky_patch_requires_matching_token() {
    let tree = scratch_tree(&[("README", "docs\n")]);
    let gate = gate(tree.path());
    let before = snapshot(tree.path());

    let outcome = gate.apply(&request(CREATE_AND_RENAME, SafetyLevel::Low, None));
    let token = match &outcome {
        PatchOutcome::TokenRequired { token, risk, summary } => {
            assert!(risk.reasons.iter().any(|r| r.contains("renames")));
            assert_eq!(summary.new_files, vec!["docs/new.md".to_string()]);
            token.clone()
        }
        other => panic!("expected token_required, got {other:?}"),
    };
    assert_eq!(outcome.error_kind(), Some(ErrorKind::ConfirmationRequired));
    assert_eq!(snapshot(tree.path()), before);

    let mismatch = gate.apply(&request(CREATE_AND_RENAME, SafetyLevel::Low, Some("CONFIRM_deadbeef")));
    assert_eq!(mismatch.error_kind(), Some(ErrorKind::TokenMismatch));
    assert_eq!(snapshot(tree.path()), before);

    let applied = gate.apply(&request(CREATE_AND_RENAME, SafetyLevel::Low, Some(&token)));
    assert!(applied.is_applied(), "{applied:?}");
    assert!(!tree.path().join("README").exists());
    assert_eq!(
        fs::read_to_string(tree.path().join("README.md")).expect("read"),
        "docs\n"
    );
    assert_eq!(
        fs::read_to_string(tree.path().join("docs/new.md")).expect("read"),
        "hello\n"
    );
}

#[test]
fn high_safety_level_makes_any_patch_risky() {
    let tree = scratch_tree(&[("src/lib.rs", "fn a() {}\nfn c() {}\n")]);
    let outcome = gate(tree.path()).apply(&request(ADD_LINE, SafetyLevel::High, None));
    assert!(matches!(outcome, PatchOutcome::TokenRequired { .. }));
}

#[test]
fn malformed_hunk_header_leaves_tree_untouched() {
    let tree = scratch_tree(&[("src/lib.rs", "fn a() {}\nfn c() {}\n")]);
    let before = snapshot(tree.path());
    let broken = ADD_LINE.replace("@@ -1,2 +1,3 @@", "@@ -1,two +1,3 @@");

    let outcome = gate(tree.path()).apply(&request(&broken, SafetyLevel::Low, None));

    assert_eq!(outcome.error_kind(), Some(ErrorKind::PatchParseError));
    assert_eq!(snapshot(tree.path()), before);
}

#[test]
fn failing_hunk_rolls_back_the_whole_patch() {
    let tree = scratch_tree(&[
        ("a.txt", "one\n"),
        ("b.txt", "something else\n"),
    ]);
    let before = snapshot(tree.path());
    let patch = "\
--- a/a.txt
+++ b/a.txt
@@ -1 +1 @@
-one
+uno
--- a/b.txt
+++ b/b.txt
@@ -1 +1 @@
-two
+dos
";

    let outcome = gate(tree.path()).apply(&request(patch, SafetyLevel::Low, None));

    match &outcome {
        PatchOutcome::Rejected { error_kind, reason, .. } => {
            assert_eq!(*error_kind, ErrorKind::PatchConflict);
            assert!(reason.contains("b.txt: hunk 1"), "{reason}");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(snapshot(tree.path()), before);
}

#[test]
fn token_comparison_is_exact() {
    let tree = scratch_tree(&[("README", "docs\n")]);
    let padded = format!(" {}\n", PatchGate::token_for(CREATE_AND_RENAME));
    let outcome = gate(tree.path()).apply(&request(CREATE_AND_RENAME, SafetyLevel::Low, Some(&padded)));
    assert_eq!(outcome.error_kind(), Some(ErrorKind::TokenMismatch));
    assert!(tree.path().join("README").exists());
}

#[test]
fn concurrent_applies_to_different_files_both_land() {
    let tree = scratch_tree(&[("a.txt", "one\n"), ("b.txt", "two\n")]);
    let gate = gate(tree.path());
    let patches = [
        "--- a/a.txt\n+++ b/a.txt\n@@ -1 +1 @@\n-one\n+uno\n",
        "--- a/b.txt\n+++ b/b.txt\n@@ -1 +1 @@\n-two\n+dos\n",
    ];

    let outcomes: Vec<PatchOutcome> = std::thread::scope(|scope| {
        let handles: Vec<_> = patches
            .iter()
            .map(|patch| {
                let gate = &gate;
                scope.spawn(move || gate.apply(&request(patch, SafetyLevel::Low, None)))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("join"))
            .collect()
    });

    assert!(outcomes.iter().all(PatchOutcome::is_applied), "{outcomes:?}");
    assert_eq!(fs::read_to_string(tree.path().join("a.txt")).expect("read"), "uno\n");
    assert_eq!(fs::read_to_string(tree.path().join("b.txt")).expect("read"), "dos\n");
}

#[test]
fn concurrent_applies_of_one_edit_land_once() {
    let tree = scratch_tree(&[("a.txt", "one\n")]);
    let gate = gate(tree.path());
    let patch = "--- a/a.txt\n+++ b/a.txt\n@@ -1 +1 @@\n-one\n+uno\n";

    let outcomes: Vec<PatchOutcome> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let gate = &gate;
                scope.spawn(move || gate.apply(&request(patch, SafetyLevel::Low, None)))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("join"))
            .collect()
    });

    let applied = outcomes.iter().filter(|o| o.is_applied()).count();
    assert_eq!(applied, 1, "{outcomes:?}");
    assert!(
        outcomes
            .iter()
            .filter(|o| !o.is_applied())
            .all(|o| o.error_kind() == Some(ErrorKind::PatchConflict))
    );
    assert_eq!(fs::read_to_string(tree.path().join("a.txt")).expect("read"), "uno\n");
}

#[test]
fn paths_outside_the_tree_are_rejected() {
    let tree = scratch_tree(&[("a.txt", "one\n")]);
    let gate = gate(tree.path());
    for path in ["../escape.txt", "/etc/passwd", ".git/config", ".orchestrator/modes.yaml"] {
        let patch = format!("--- a/{path}\n+++ b/{path}\n@@ -1 +1 @@\n-one\n+uno\n");
        let outcome = gate.apply(&request(&patch, SafetyLevel::Low, None));
        assert_eq!(
            outcome.error_kind(),
            Some(ErrorKind::PatchPathViolation),
            "{path}: {outcome:?}"
        );
    }
}

#[cfg(unix)]
#[test]
fn symlink_escape_is_rejected() {
    let outside = tempfile::tempdir().expect("outside");
    fs::write(outside.path().join("secret.txt"), "one\n").expect("write");
    let tree = scratch_tree(&[]);
    std::os::unix::fs::symlink(outside.path(), tree.path().join("link")).expect("symlink");

    let patch = "--- a/link/secret.txt\n+++ b/link/secret.txt\n@@ -1 +1 @@\n-one\n+uno\n";
    let outcome = gate(tree.path()).apply(&request(patch, SafetyLevel::Low, None));

    assert_eq!(outcome.error_kind(), Some(ErrorKind::PatchPathViolation));
    assert_eq!(
        fs::read_to_string(outside.path().join("secret.txt")).expect("read"),
        "one\n"
    );
}

#[test]
fn read_only_forbids_even_benign_patches() {
    let tree = scratch_tree(&[("src/lib.rs", "fn a() {}\nfn c() {}\n")]);
    let outcome = gate(tree.path()).apply(&request(ADD_LINE, SafetyLevel::ReadOnly, None));
    assert_eq!(outcome.error_kind(), Some(ErrorKind::SafetyForbidden));
}
