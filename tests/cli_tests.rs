use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn vidframes() -> Command {
    let mut cmd = Command::cargo_bin("vidframes").unwrap();
    cmd.env_remove("RUST_LOG").env_remove("VIDFRAMES_LOG_LEVEL");
    cmd
}

#[test]
fn help_lists_commands() {
    vidframes()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("inspect"))
        .stdout(predicate::str::contains("crop"));
}

#[test]
fn crop_requires_an_input() {
    vidframes()
        .arg("crop")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--input"));
}

#[test]
fn missing_input_file_fails() {
    let dir = TempDir::new().unwrap();
    vidframes()
        .current_dir(dir.path())
        .args(["inspect", "--input", "missing.mov"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Input file does not exist"));
}

#[test]
fn invalid_config_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("vidframes.toml");
    std::fs::write(&config, "[encoder]\ncrf = 99\n").unwrap();

    vidframes()
        .current_dir(dir.path())
        .args(["inspect", "--input", "missing.mov"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("CRF"));
}
