//! Content-derived confirmation tokens.
//!
//! A token is `CONFIRM_` followed by the first 8 lowercase hex characters of the
//! SHA-256 digest of the exact input bytes. The format is user-facing and must
//! not change.

use sha2::{Digest, Sha256};

pub const TOKEN_PREFIX: &str = "CONFIRM_";
const TOKEN_HEX_LEN: usize = 8;

/// Token for a diff, byte-for-byte (whitespace included).
pub fn token_for(content: &str) -> String {
    let digest = hex::encode(Sha256::digest(content.as_bytes()));
    format!("{TOKEN_PREFIX}{}", &digest[..TOKEN_HEX_LEN])
}

/// Token authorizing a sensitive-mode subtask. Derived from the mode and the work
/// description so it is stable across re-planning of the same task.
pub fn token_for_subtask(mode_id: &str, description: &str) -> String {
    token_for(&format!("{mode_id}\n{description}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_matches_known_digest() {
        // sha256("") = e3b0c442...
        assert_eq!(token_for(""), "CONFIRM_e3b0c442");
        // sha256("abc") = ba7816bf...
        assert_eq!(token_for("abc"), "CONFIRM_ba7816bf");
    }

    #[test]
    fn token_is_deterministic_and_byte_sensitive() {
        let diff = "--- a/x\n+++ b/x\n@@ -1 +1 @@\n-a\n+b\n";
        assert_eq!(token_for(diff), token_for(diff));
        assert_ne!(token_for(diff), token_for(&diff.replace("+b", "+c")));
        assert_ne!(token_for(diff), token_for(&format!("{diff} ")));
    }

    #[test]
    fn token_format_is_prefix_plus_lowercase_hex() {
        let token = token_for("anything");
        let hex = token.strip_prefix(TOKEN_PREFIX).expect("prefix");
        assert_eq!(hex.len(), 8);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn subtask_token_depends_on_mode_and_description() {
        let a = token_for_subtask("therapist", "reflect on the week");
        assert_eq!(a, token_for_subtask("therapist", "reflect on the week"));
        assert_ne!(a, token_for_subtask("financial_planner", "reflect on the week"));
    }
}
