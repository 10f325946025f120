//! Run directory naming.

use chrono::{DateTime, Utc};

const SLUG_MAX_CHARS: usize = 48;

/// Lowercase filesystem-safe slug: runs of non-alphanumerics become `-`.
///
/// Empty results fall back to `run`.
pub fn safe_slug(text: &str) -> String {
    let mut slug = String::new();
    let mut pending_dash = false;
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
        if slug.len() >= SLUG_MAX_CHARS {
            break;
        }
    }
    slug.truncate(SLUG_MAX_CHARS);
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "run".to_string()
    } else {
        slug
    }
}

/// `YYYYMMDD_HHMMSS` in UTC.
pub fn timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}

/// Run id `<timestamp>_<slug>` used as the run directory name.
pub fn run_id(now: DateTime<Utc>, task: &str) -> String {
    format!("{}_{}", timestamp(now), safe_slug(task))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn slugs_collapse_punctuation() {
        assert_eq!(safe_slug("Fix the  parser!! (v2)"), "fix-the-parser-v2");
        assert_eq!(safe_slug("  --leading"), "leading");
        assert_eq!(safe_slug("???"), "run");
        assert_eq!(safe_slug(""), "run");
    }

    #[test]
    fn slugs_are_bounded() {
        let slug = safe_slug(&"word ".repeat(40));
        assert!(slug.len() <= SLUG_MAX_CHARS);
        assert!(!slug.ends_with('-'));
    }

    #[test]
    fn run_id_uses_utc_timestamp() {
        let now = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(run_id(now, "Refactor X"), "20250304_050607_refactor-x");
    }
}
