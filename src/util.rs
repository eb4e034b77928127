// src/util.rs

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Read a UTF-8 file into a String with a clear error message.
///
/// Used for rules, submissions, exercise fixtures and config.
pub fn read_to_string(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read file {:?}", path))
}

/// Read and parse a JSON file.
pub fn read_json(path: &Path) -> Result<serde_json::Value> {
    let raw = read_to_string(path)?;
    from_json_str(&raw).with_context(|| format!("File is not valid JSON: {:?}", path))
}

/// Deepest JSON nesting accepted. Block workspaces nest two levels per
/// stacked block, so this allows stacks of about 250 blocks.
pub const MAX_JSON_DEPTH: usize = 512;

/// Parse JSON that may nest deeper than serde_json's default limit of 128,
/// up to [`MAX_JSON_DEPTH`].
pub fn from_json_str<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let depth = json_depth(raw);
    if depth > MAX_JSON_DEPTH {
        bail!("JSON nests {depth} levels deep (limit {MAX_JSON_DEPTH})");
    }

    let mut de = serde_json::Deserializer::from_str(raw);
    de.disable_recursion_limit();
    let value = T::deserialize(&mut de)?;
    de.end()?;
    Ok(value)
}

/// Maximum bracket nesting of a JSON text, ignoring brackets inside strings.
pub fn json_depth(raw: &str) -> usize {
    let (mut depth, mut max) = (0usize, 0usize);
    let (mut in_string, mut escaped) = (false, false);

    for b in raw.bytes() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'[' | b'{' => {
                depth += 1;
                max = max.max(depth);
            }
            b']' | b'}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }

    max
}

/// Ensure a directory exists (create it if missing).
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).with_context(|| format!("Failed to create directory {:?}", path))
}

/// Resolve `rel` against the directory containing `anchor` (a file).
///
/// Exercise fixtures reference rule/submission files relative to
/// themselves.
pub fn resolve_relative_to(anchor: &Path, rel: &str) -> PathBuf {
    let rel_path = Path::new(rel);
    if rel_path.is_absolute() {
        return rel_path.to_path_buf();
    }
    anchor
        .parent()
        .map(|dir| dir.join(rel_path))
        .unwrap_or_else(|| rel_path.to_path_buf())
}

/// Hex SHA-256 of some bytes.
///
/// The submission digest lets callers key attempt records without storing
/// the submission itself.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Char-safe truncation for logs and error details.
pub fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}… ({} bytes total)", &s[..idx], s.len()),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_known_value() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_json_depth_ignores_strings() {
        assert_eq!(json_depth(r#"{"a": [1, {"b": "[[[{"}]}"#), 3);
        assert_eq!(json_depth(r#""\"[""#), 0);
        assert_eq!(json_depth("7"), 0);
    }

    #[test]
    fn test_from_json_str_accepts_deep_nesting() {
        let deep = format!("{}1{}", "[".repeat(400), "]".repeat(400));
        assert!(serde_json::from_str::<serde_json::Value>(&deep).is_err());
        assert!(from_json_str::<serde_json::Value>(&deep).is_ok());

        let too_deep = "[".repeat(MAX_JSON_DEPTH + 1);
        let err = from_json_str::<serde_json::Value>(&too_deep).unwrap_err();
        assert!(err.to_string().contains("levels deep"), "{err}");

        assert!(from_json_str::<serde_json::Value>("[1] trailing").is_err());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("\u{e0}\u{e0}\u{e0}", 2), "\u{e0}\u{e0}… (6 bytes total)");
    }

    #[test]
    fn test_resolve_relative_to() {
        let resolved = resolve_relative_to(Path::new("lessons/loops.exercise.yaml"), "rules.json");
        assert_eq!(resolved, Path::new("lessons/rules.json"));
        assert_eq!(resolve_relative_to(Path::new("x.yaml"), "/abs/r.json"), Path::new("/abs/r.json"));
    }

    #[test]
    fn test_read_json_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{nope").unwrap();

        let err = read_json(&path).unwrap_err();
        assert!(err.to_string().contains("bad.json"));
    }
}
