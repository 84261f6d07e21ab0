use std::fs;
use std::process::{Command, Stdio};

use koreo_analysis::test_support::sample_source;
use tempfile::tempdir;

#[test]
fn koreo_lsp_binary_starts_and_stops() {
    let exe = env!("CARGO_BIN_EXE_koreo-lsp");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to start koreo-lsp binary");

    // Immediately terminate the server; we only need to ensure it starts.
    child.kill().expect("failed to stop koreo-lsp binary");
    let _ = child.wait();
}

#[test]
fn check_reports_failing_function_test() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("sample.k.yaml"), sample_source()).unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_koreo-lsp"))
        .arg("check")
        .arg(dir.path())
        .output()
        .expect("failed to run koreo-lsp check");

    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout
        .lines()
        .find(|line| line.contains("wrong tag"))
        .expect("failing case reported");
    assert!(line.contains("sample.k.yaml:"));
    assert!(line.contains(": error[test-failure] "));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("checked 1 files"));
}

#[test]
fn check_passes_clean_directory() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("identity.k.yaml"),
        "apiVersion: koreo.dev/v1beta1\nkind: ValueFunction\nmetadata:\n  name: identity\nspec:\n  return:\n    value: =inputs.value\n",
    )
    .unwrap();
    fs::write(dir.path().join("README.md"), "not yaml").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_koreo-lsp"))
        .arg("check")
        .arg("--fail-on-warning")
        .arg(dir.path())
        .output()
        .expect("failed to run koreo-lsp check");

    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stdout)
    );
}

#[test]
fn check_rejects_unknown_option() {
    let output = Command::new(env!("CARGO_BIN_EXE_koreo-lsp"))
        .args(["check", "--frobnicate"])
        .output()
        .expect("failed to run koreo-lsp check");

    assert_eq!(output.status.code(), Some(2));
}
