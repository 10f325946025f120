//! Temp-file + rename writes shared by config, run records and patch commits.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Sibling temp path used while `path` is being replaced.
pub fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(path.file_name().unwrap_or_default());
    name.push(".tmp");
    path.with_file_name(name)
}

/// Atomically write `contents` to `path`, creating parent directories.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = temp_path_for(path);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

/// Serialize `value` as pretty JSON with a trailing newline and write it atomically.
pub fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_json_with_trailing_newline_and_no_temp_left() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("out.json");
        write_json_atomic(&path, &serde_json::json!({"a": 1})).expect("write");
        assert_eq!(fs::read_to_string(&path).expect("read"), "{\n  \"a\": 1\n}\n");
        assert!(!temp_path_for(&path).exists());
    }

    #[test]
    fn temp_path_is_hidden_sibling() {
        let tmp = temp_path_for(Path::new("dir/file.rs"));
        assert_eq!(tmp, PathBuf::from("dir/.file.rs.tmp"));
    }
}
