//! Deterministic risk classification of patches.

use serde::{Deserialize, Serialize};

use crate::core::diff::{PatchSummary, parse_patch};
use crate::core::types::{Risk, RiskClassification, SafetyLevel};

/// Size limits above which a patch needs confirmation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RiskThresholds {
    /// Patches touching at least this many files are bulk changes.
    pub bulk_file_threshold: usize,
    /// Patches with at least this many lines are large.
    pub large_diff_lines: usize,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            bulk_file_threshold: 10,
            large_diff_lines: 2000,
        }
    }
}

/// Classify a parsed patch summary under a declared safety level.
pub fn classify_summary(
    summary: &PatchSummary,
    safety_level: SafetyLevel,
    thresholds: &RiskThresholds,
) -> RiskClassification {
    let mut reasons = Vec::new();
    if !summary.deleted_files.is_empty() {
        reasons.push("deletes files".to_string());
    }
    if !summary.renamed_files.is_empty() {
        reasons.push("renames files".to_string());
    }
    if summary.file_count >= thresholds.bulk_file_threshold {
        reasons.push(format!(
            "bulk change (>= {} files)",
            thresholds.bulk_file_threshold
        ));
    }
    if summary.total_lines >= thresholds.large_diff_lines {
        reasons.push(format!(
            "large patch (>= {} lines)",
            thresholds.large_diff_lines
        ));
    }
    if safety_level == SafetyLevel::High {
        reasons.push("high safety level".to_string());
    }
    classification(reasons)
}

/// Classify raw diff text. Text that does not parse is treated as risky.
pub fn classify_text(
    diff_text: &str,
    safety_level: SafetyLevel,
    thresholds: &RiskThresholds,
) -> RiskClassification {
    match parse_patch(diff_text) {
        Ok(parsed) => classify_summary(&parsed.summary(), safety_level, thresholds),
        Err(err) => classification(vec![format!("unparseable diff ({err})")]),
    }
}

fn classification(reasons: Vec<String>) -> RiskClassification {
    let risk = if reasons.is_empty() {
        Risk::Benign
    } else {
        Risk::Risky
    };
    RiskClassification { risk, reasons }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn many_file_patch(count: usize) -> String {
        (0..count)
            .map(|i| format!("--- a/f{i}.txt\n+++ b/f{i}.txt\n@@ -1 +1 @@\n-a\n+b\n"))
            .collect()
    }

    #[test]
    fn two_line_single_file_patch_is_benign() {
        let patch = "--- a/f.txt\n+++ b/f.txt\n@@ -1 +1 @@\n-a\n+b\n";
        let got = classify_text(patch, SafetyLevel::Low, &RiskThresholds::default());
        assert_eq!(got.risk, Risk::Benign);
        assert!(got.reasons.is_empty());
    }

    #[test]
    fn fifty_file_patch_is_risky() {
        let got = classify_text(
            &many_file_patch(50),
            SafetyLevel::Low,
            &RiskThresholds::default(),
        );
        assert!(got.is_risky());
        assert!(got.reasons.iter().any(|r| r.starts_with("bulk change")));
    }

    #[test]
    fn deletion_and_rename_are_risky() {
        let deletion = "diff --git a/x b/x\ndeleted file mode 100644\n--- a/x\n+++ /dev/null\n@@ -1 +0,0 @@\n-x\n";
        let got = classify_text(deletion, SafetyLevel::Low, &RiskThresholds::default());
        assert_eq!(got.reasons, vec!["deletes files".to_string()]);

        let rename = "diff --git a/x b/y\nrename from x\nrename to y\n";
        let got = classify_text(rename, SafetyLevel::Low, &RiskThresholds::default());
        assert_eq!(got.reasons, vec!["renames files".to_string()]);
    }

    #[test]
    fn large_patch_and_high_safety_are_risky() {
        let thresholds = RiskThresholds {
            bulk_file_threshold: 10,
            large_diff_lines: 4,
        };
        let patch = "--- a/f.txt\n+++ b/f.txt\n@@ -1 +1 @@\n-a\n+b\n";
        assert!(classify_text(patch, SafetyLevel::Low, &thresholds).is_risky());
        assert!(
            classify_text(patch, SafetyLevel::High, &RiskThresholds::default()).is_risky()
        );
    }

    #[test]
    fn unparseable_text_is_risky() {
        let got = classify_text("nonsense", SafetyLevel::Low, &RiskThresholds::default());
        assert!(got.is_risky());
    }
}
