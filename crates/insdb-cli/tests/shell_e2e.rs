use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const SCHEMA: &str = include_str!("../../../tests/fixtures/planck_schema.json");
const OLD_BANDPASS: &str = "3a29d860-2289-4691-82de-1fcb4adfff0e";

fn insdb_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_insdb"))
}

fn write_snapshot(dir: &Path) {
    fs::write(dir.join("schema.json"), SCHEMA).expect("write schema");
}

fn run(args: &[&str]) -> Output {
    Command::new(insdb_bin())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("run insdb")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

// ============================================================================
// Single-command mode
// ============================================================================

#[test]
fn ls_lists_top_level_entities() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_snapshot(dir.path());
    let db = dir.path().to_str().expect("utf-8 path");

    let output = run(&[db, "--no-colors", "-c", "ls -s"]);
    assert!(output.status.success(), "{output:?}");
    assert_eq!(stdout(&output), "HFI/\nLFI/\n");
}

#[test]
fn initial_entity_sets_the_working_directory() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_snapshot(dir.path());
    let db = dir.path().to_str().expect("utf-8 path");

    let output = run(&[db, "HFI/frequency_217_ghz", "-c", "pwd"]);
    assert!(output.status.success(), "{output:?}");
    assert_eq!(stdout(&output).trim(), "/HFI/frequency_217_ghz");
}

#[test]
fn schema_file_works_as_the_database_argument() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_snapshot(dir.path());
    let schema = dir.path().join("schema.json");

    let output = run(&[
        schema.to_str().expect("utf-8 path"),
        "-c",
        &format!("show {OLD_BANDPASS}"),
    ]);
    assert!(output.status.success(), "{output:?}");
    let text = stdout(&output);
    assert!(text.contains("bandpass217.csv"), "{text}");
    assert!(text.contains("/releases/planck2018/HFI/frequency_217_ghz/bandpass"), "{text}");
}

#[test]
fn failing_command_reports_and_exits_non_zero() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_snapshot(dir.path());
    let db = dir.path().to_str().expect("utf-8 path");

    let output = run(&[db, "HFI/frequency_217_ghz", "-c", "cd bandpass"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no entry 'bandpass' here"), "{stderr}");
}

// ============================================================================
// Startup failures
// ============================================================================

#[test]
fn unusable_database_location_exits_non_zero() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("no-such-snapshot");

    let output = run(&[missing.to_str().expect("utf-8 path"), "-c", "ls"]);
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}

#[test]
fn malformed_schema_exits_non_zero() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("schema.json"), "{ not json").expect("write schema");

    let output = run(&[dir.path().to_str().expect("utf-8 path"), "-c", "ls"]);
    assert!(!output.status.success());
}

#[test]
fn interactive_mode_exits_cleanly_on_end_of_input() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_snapshot(dir.path());

    let output = Command::new(insdb_bin())
        .arg(dir.path())
        .stdin(std::process::Stdio::null())
        .output()
        .expect("run insdb");
    assert!(output.status.success(), "{output:?}");
}
