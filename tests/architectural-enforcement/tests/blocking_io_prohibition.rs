//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async production code in courier MUST NOT use blocking I/O.
//! **Required**: `tokio::fs`, `tokio::net`, async `reqwest`
//!
//! Blocking calls are allowed in non-async functions (config loading before
//! the runtime does real work) and in test code.

use std::fs;
use std::path::Path;

use architectural_enforcement::{
    code_part, is_in_async_function, production_files, report, test_section_start,
};

#[test]
fn test_no_blocking_io_in_production_code() {
    let violations = find_blocking_io_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Blocking I/O calls found in async production code!\n");

        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }

        eprintln!("\n❌ FORBIDDEN in async code:");
        eprintln!("  - std::fs::read(), std::fs::write(), std::fs::File");
        eprintln!("  - std::net::TcpStream, std::net::TcpListener");
        eprintln!("  - std::process::Command::output()");
        eprintln!("  - reqwest::blocking::*");
        eprintln!("\n✅ REQUIRED async I/O:");
        eprintln!("  - tokio::fs::read().await, tokio::fs::write().await");
        eprintln!("  - tokio::net::TcpStream::connect().await");
        eprintln!("  - reqwest::Client::get().send().await");
        eprintln!("\n✅ ACCEPTABLE blocking I/O:");
        eprintln!("  - Non-async functions (config loading)");
        eprintln!("  - Test code");

        panic!(
            "\nFound {} blocking I/O violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

fn find_blocking_io_violations() -> Vec<String> {
    let mut violations = Vec::new();
    for path in production_files() {
        check_file(&path, &mut violations);
    }
    violations
}

fn check_file(path: &Path, violations: &mut Vec<String>) {
    let Ok(content) = fs::read_to_string(path) else {
        return;
    };
    let lines: Vec<&str> = content.lines().collect();
    let test_start = test_section_start(&lines);

    for (idx, line) in lines.iter().enumerate().take(test_start) {
        let code = code_part(line);
        let line_number = idx + 1;

        if code.contains("reqwest::blocking") {
            violations.push(report(path, line_number, "Blocking HTTP client", line));
            continue;
        }

        if !is_in_async_function(&lines, idx) {
            continue;
        }

        if code.contains("std::fs::") {
            violations.push(report(path, line_number, "Blocking file I/O", line));
        }
        if code.contains("std::net::") {
            violations.push(report(path, line_number, "Blocking network I/O", line));
        }
        if code.contains("std::process::Command") {
            violations.push(report(path, line_number, "Blocking process I/O", line));
        }
        if code.contains("std::thread::sleep") {
            violations.push(report(path, line_number, "Thread sleep in async", line));
        }
        if code.contains("std::io::stdin()") {
            violations.push(report(path, line_number, "Blocking stdin in async", line));
        }
    }
}

#[test]
fn test_detector_flags_fs_in_async_fn() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.rs");
    fs::write(
        &path,
        "async fn bad() {\n    let s = std::fs::read_to_string(\"x\");\n}\n",
    )
    .unwrap();

    let mut violations = Vec::new();
    check_file(&path, &mut violations);
    assert_eq!(violations.len(), 1, "{violations:?}");
    assert!(violations[0].contains("Blocking file I/O"));
}

#[test]
fn test_detector_allows_sync_fn_and_test_module() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ok.rs");
    fs::write(
        &path,
        concat!(
            "pub fn load() {\n",
            "    let s = std::fs::read_to_string(\"x\");\n",
            "}\n",
            "#[cfg(test)]\n",
            "mod tests {\n",
            "    async fn helper() { std::fs::write(\"y\", b\"\"); }\n",
            "}\n",
        ),
    )
    .unwrap();

    let mut violations = Vec::new();
    check_file(&path, &mut violations);
    assert!(violations.is_empty(), "{violations:?}");
}
