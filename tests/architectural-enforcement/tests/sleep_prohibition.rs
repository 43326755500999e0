//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code in courier MUST NOT sleep to wait for events.
//! **Exceptions**: reconnect and retry delays, periodic tasks driven by
//! `tokio::time::interval`, test code
//!
//! Waiting on a response, a file or a breaker reset goes through channels,
//! timeouts or the watcher, never a poll loop with sleep.

use std::fs;
use std::path::Path;

use architectural_enforcement::{
    code_part, is_in_test_function, production_files, report, test_section_start,
};

#[test]
fn test_no_sleep_in_production_code() {
    let violations = find_sleep_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Sleep calls found in production code!\n");

        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }

        eprintln!("\n✅ ACCEPTABLE sleep uses:");
        eprintln!("  - Reconnect delays (WebSocket reconnect schedule)");
        eprintln!("  - Retry delays (HTTP event stream reopen)");
        eprintln!("  - Periodic tasks using tokio::time::interval()");
        eprintln!("  - Test code");
        eprintln!("\n❌ FORBIDDEN:");
        eprintln!("  - Sleep in polling loops");
        eprintln!("  - Sleep as poor man's synchronization");
        eprintln!("  - std::thread::sleep anywhere in production code");

        panic!(
            "\nFound {} sleep violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

fn find_sleep_violations() -> Vec<String> {
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
        if !(code.contains("::sleep(") || code.contains(".sleep(")) {
            continue;
        }

        if code.contains("thread::sleep") {
            violations.push(report(path, idx + 1, "Thread sleep", line));
            continue;
        }

        if is_in_test_function(&lines, idx)
            || is_retry_context(&lines, idx)
            || is_interval_pattern(&lines, idx)
        {
            continue;
        }

        violations.push(report(path, idx + 1, "Sleep", line));
    }
}

/// Sleep paces a reconnect or retry
fn is_retry_context(lines: &[&str], current_idx: usize) -> bool {
    let context_range = current_idx.saturating_sub(15)..std::cmp::min(current_idx + 5, lines.len());

    lines[context_range].iter().any(|line| {
        let line = line.to_lowercase();
        line.contains("retry")
            || line.contains("reconnect")
            || line.contains("backoff")
            || line.contains("attempt")
    })
}

/// Periodic task: `let mut interval = tokio::time::interval(..); loop { interval.tick().await; }`
fn is_interval_pattern(lines: &[&str], current_idx: usize) -> bool {
    let back = current_idx.saturating_sub(20)..current_idx;
    if lines[back]
        .iter()
        .any(|line| line.contains("interval.tick()") || line.contains("tokio::time::interval"))
    {
        return true;
    }

    let forward = current_idx..std::cmp::min(current_idx + 5, lines.len());
    lines[forward].iter().any(|line| line.contains("interval.tick()"))
}

#[test]
fn test_polling_sleep_is_flagged() {
    let lines = vec![
        "async fn wait_for_file(path: &Path) {",
        "    while !path.exists() {",
        "        tokio::time::sleep(Duration::from_millis(10)).await;",
        "    }",
        "}",
    ];
    assert!(!is_in_test_function(&lines, 2));
    assert!(!is_retry_context(&lines, 2));
    assert!(!is_interval_pattern(&lines, 2));
}

#[test]
fn test_reconnect_delay_is_allowed() {
    let lines = vec![
        "async fn reconnect_loop(step: Step) {",
        "    tracing::info!(attempt = step.attempt, \"Attempting reconnection\");",
        "    tokio::select! {",
        "        () = tokio::time::sleep(step.delay) => {}",
        "    }",
        "}",
    ];
    assert!(is_retry_context(&lines, 3));
}

#[test]
fn test_sleep_in_test_module_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("module.rs");
    fs::write(
        &path,
        concat!(
            "pub async fn run() {}\n",
            "#[cfg(test)]\n",
            "mod tests {\n",
            "    async fn helper() { tokio::time::sleep(d).await; }\n",
            "}\n",
        ),
    )
    .unwrap();

    let mut violations = Vec::new();
    check_file(&path, &mut violations);
    assert!(violations.is_empty(), "{violations:?}");
}

#[test]
fn test_thread_sleep_always_flagged() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("module.rs");
    fs::write(
        &path,
        "fn retry_later() {\n    std::thread::sleep(Duration::from_millis(5));\n}\n",
    )
    .unwrap();

    let mut violations = Vec::new();
    check_file(&path, &mut violations);
    assert_eq!(violations.len(), 1, "{violations:?}");
    assert!(violations[0].contains("Thread sleep"));
}
