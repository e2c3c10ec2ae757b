// CLI integration tests for the subagent binary

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const SESSION: &str = "cli-test";

/// The binary, isolated in `temp` with its own socket and state directories
fn subagent(temp: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("subagent").unwrap();
    cmd.current_dir(temp.path())
        .env("SUBAGENT__BROKER__SOCKET_DIR", temp.path())
        .env("SUBAGENT__SUPERVISOR__STATE_DIR", temp.path().join("state"))
        .env_remove("SUBAGENT_IS_AGENT")
        .env_remove("SUBAGENT_AGENT_ID")
        .env_remove("SUBAGENT_SESSION")
        .env_remove("RUST_LOG")
        .args(["--session", SESSION]);
    cmd
}

#[test]
fn test_help_command() {
    let mut cmd = Command::cargo_bin("subagent").unwrap();
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Coordinate AI agent processes"))
        .stdout(predicate::str::contains("spawn"))
        .stdout(predicate::str::contains("inbox"));
}

#[test]
fn test_no_subcommand_explains_how_to_start() {
    let temp = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("subagent").unwrap();
    cmd.current_dir(temp.path());
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("subagent spawn"));
}

#[test]
fn test_spawn_is_refused_inside_a_subagent() {
    let temp = TempDir::new().unwrap();
    subagent(&temp)
        .env("SUBAGENT_IS_AGENT", "1")
        .args(["spawn", "write more agents"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("refusing to spawn"));

    // Refused before any broker or registry was created
    assert!(!temp.path().join(format!("subagent-{SESSION}.sock")).exists());
    assert!(!temp
        .path()
        .join("state/sessions")
        .join(SESSION)
        .join("agents.json")
        .exists());
}

#[test]
fn test_kill_unknown_agent_reports_not_found() {
    let temp = TempDir::new().unwrap();
    subagent(&temp)
        .args(["kill", "agent-7"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("Agent agent-7 not found"));

    subagent(&temp)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No agents spawned"));
}

#[test]
fn test_locks_without_broker_is_reported_unreachable() {
    let temp = TempDir::new().unwrap();
    subagent(&temp)
        .arg("locks")
        .assert()
        .failure()
        .stdout(predicate::str::contains("Broker unreachable"));
}

#[test]
fn test_broker_stop_without_broker_is_a_no_op() {
    let temp = TempDir::new().unwrap();
    subagent(&temp)
        .args(["broker", "stop"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No broker running"));
}

#[test]
fn test_config_prints_effective_toml() {
    let temp = TempDir::new().unwrap();
    subagent(&temp)
        .arg("config")
        .env("SUBAGENT__SUPERVISOR__DEFAULT_MODEL", "test-model")
        .assert()
        .success()
        .stdout(predicate::str::contains("[broker]"))
        .stdout(predicate::str::contains("[supervisor]"))
        .stdout(predicate::str::contains("default_model = \"test-model\""));
}

#[test]
fn test_invalid_session_id_is_rejected() {
    let temp = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("subagent").unwrap();
    cmd.current_dir(temp.path())
        .args(["--session", "../escape", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid session id"));
}

#[test]
fn test_message_round_trip_through_background_broker() {
    let temp = TempDir::new().unwrap();

    subagent(&temp)
        .args(["broker", "start"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Broker started"));

    subagent(&temp)
        .args(["broker", "start"])
        .assert()
        .success()
        .stdout(predicate::str::contains("already running"));

    subagent(&temp)
        .env("SUBAGENT_AGENT_ID", "agent-1")
        .args(["notify", "question", "JWT", "or", "sessions?"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Sent #1 (question) to user"));

    subagent(&temp)
        .arg("inbox")
        .assert()
        .success()
        .stdout(predicate::str::contains("from agent-1 [question]"))
        .stdout(predicate::str::contains("JWT or sessions?"));

    subagent(&temp)
        .env("SUBAGENT_AGENT_ID", "agent-1")
        .args(["lock", "src/auth.rs"])
        .assert()
        .success();

    subagent(&temp)
        .env("SUBAGENT_AGENT_ID", "agent-2")
        .args(["lock", "src/auth.rs"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("agent-1"));

    subagent(&temp)
        .arg("locks")
        .assert()
        .success()
        .stdout(predicate::str::contains("src/auth.rs"));

    subagent(&temp)
        .args(["broker", "stop"])
        .assert()
        .success()
        .stdout(predicate::str::contains("stopped"));
}

#[test]
fn test_spawned_agent_can_be_messaged_before_its_worker_connects() {
    let temp = TempDir::new().unwrap();

    // A worker that never connects leaves registration to the spawn itself
    subagent(&temp)
        .env("SUBAGENT__SUPERVISOR__WORKER_PROGRAM", "/bin/true")
        .args(["spawn", "refactor the lexer"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Spawned agent-1"));

    subagent(&temp)
        .args(["send", "agent-1", "use", "the", "new", "tokens"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Sent #1 (guidance) to agent-1"));

    subagent(&temp)
        .args(["broker", "stop"])
        .assert()
        .success();
}

#[test]
fn test_relative_state_dir_is_shared_across_subdirectories() {
    let temp = TempDir::new().unwrap();
    git2::Repository::init(temp.path()).unwrap();
    let nested = temp.path().join("src");
    std::fs::create_dir_all(&nested).unwrap();

    let state_line = |dir: &std::path::Path| {
        let output = subagent(&temp)
            .current_dir(dir)
            .env("SUBAGENT__SUPERVISOR__STATE_DIR", ".subagent")
            .arg("config")
            .output()
            .unwrap();
        assert!(output.status.success());
        String::from_utf8(output.stdout)
            .unwrap()
            .lines()
            .find(|line| line.starts_with("# state:"))
            .map(str::to_string)
    };

    assert_eq!(state_line(temp.path()), state_line(&nested));
}
