//! Architectural Enforcement Integration Tests
//!
//! Source scanners shared by the tests in `tests/`:
//! - No blocking I/O inside async production code
//! - No sleep() in production code outside reconnect/retry backoff
//!
//! Scanning is line based. It is meant to catch violations early, not to
//! parse Rust.

use std::path::{Path, PathBuf};

/// Production source trees checked by every policy, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["courier/core/src", "courier/cli/src"];

/// Workspace root, two levels above this package
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

/// Every `.rs` file under `dir`, sorted for stable reports
pub fn rust_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// Production files of the whole workspace
///
/// Panics when a production tree is missing, so a moved crate cannot
/// silently pass every check.
pub fn production_files() -> Vec<PathBuf> {
    let root = workspace_root();
    let mut files = Vec::new();
    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        assert!(path.exists(), "production tree missing: {}", path.display());
        files.extend(rust_files(&path));
    }
    files
}

/// Code part of a line, without a trailing `//` comment
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Index of the `#[cfg(test)]` line opening an inline test module
///
/// Test modules sit at the bottom of each file, so everything from there on
/// is test code.
pub fn test_section_start(lines: &[&str]) -> usize {
    lines
        .windows(2)
        .position(|pair| {
            pair[0].trim_start().starts_with("#[cfg(test)]")
                && pair[1].trim_start().starts_with("mod ")
                && pair[1].trim_end().ends_with('{')
        })
        .unwrap_or(lines.len())
}

/// Whether the line sits in a function marked `#[test]` or `#[tokio::test]`
pub fn is_in_test_function(lines: &[&str], current_idx: usize) -> bool {
    let mut found_fn_idx = None;
    for i in (0..current_idx).rev() {
        let line = lines[i].trim();

        if line.starts_with("fn ") || line.contains(" fn ") {
            found_fn_idx = Some(i);
            break;
        }

        if line.starts_with("mod ") || (line.starts_with("impl ") && line.contains('{')) {
            return false;
        }
    }

    if let Some(fn_idx) = found_fn_idx {
        for i in (0..fn_idx).rev() {
            let line = lines[i].trim();

            if line.starts_with("#[test]") || line.starts_with("#[tokio::test") {
                return true;
            }

            if line.starts_with("fn ")
                || line.starts_with("mod ")
                || line.starts_with("impl ")
                || line.is_empty()
            {
                break;
            }
        }
    }

    false
}

/// Innermost enclosing function is `async`
pub fn is_in_async_function(lines: &[&str], current_idx: usize) -> bool {
    for i in (0..current_idx).rev() {
        let line = lines[i].trim();

        if line.contains("async fn ") || line.contains("async move {") {
            return true;
        }

        if is_sync_fn_signature(line) {
            return false;
        }

        if line.starts_with("mod ") || (line.starts_with("impl ") && line.contains('{')) {
            return false;
        }
    }
    false
}

fn is_sync_fn_signature(line: &str) -> bool {
    let starts = line.starts_with("fn ")
        || line.starts_with("pub fn ")
        || line.starts_with("pub(crate) fn ")
        || line.starts_with("pub(super) fn ");
    starts && !line.contains("async")
}

/// Format one violation the same way for every policy
pub fn report(path: &Path, line_number: usize, what: &str, line: &str) -> String {
    let root = workspace_root();
    let shown = path.strip_prefix(&root).unwrap_or(path);
    format!("{}:{} - {}: {}", shown.display(), line_number, what, line.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_root_contains_production_trees() {
        for dir in PRODUCTION_DIRS {
            assert!(workspace_root().join(dir).exists(), "{dir}");
        }
    }

    #[test]
    fn test_code_part_strips_comment() {
        assert_eq!(code_part("let x = 1; // std::fs::read"), "let x = 1; ");
        assert_eq!(code_part("plain"), "plain");
    }

    #[test]
    fn test_test_section_start() {
        let lines = vec![
            "#[cfg(test)]",
            "pub mod test_utils;",
            "fn a() {}",
            "#[cfg(test)]",
            "mod tests {",
            "}",
        ];
        assert_eq!(test_section_start(&lines), 3);
        assert_eq!(test_section_start(&lines[..3]), 3);
    }

    #[test]
    fn test_async_detection_stops_at_sync_fn() {
        let lines = vec![
            "async fn outer() {",
            "}",
            "pub fn load() -> Config {",
            "    std::fs::read_to_string(path)",
            "}",
        ];
        assert!(!is_in_async_function(&lines, 3));
        assert!(is_in_async_function(&lines, 1));
    }

    #[test]
    fn test_test_function_detection() {
        let lines = vec![
            "#[tokio::test(start_paused = true)]",
            "async fn test_something() {",
            "    tokio::time::sleep(d).await;",
            "}",
        ];
        assert!(is_in_test_function(&lines, 2));
    }
}
