use assert_cmd::Command;
use predicates::str::contains;
use std::fs;
use tempfile::TempDir;

fn swarm_in(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("swarm").unwrap_or_else(|e| unreachable!("binary missing: {e}"));
    cmd.current_dir(dir.path())
        .env_remove("DATABASE_URL")
        .env_remove("SWARM_DATABASE_URL")
        .env("RUST_LOG", "warn");
    cmd
}

fn workspace_with_config() -> TempDir {
    let dir = tempfile::tempdir().unwrap_or_else(|e| unreachable!("tempdir failed: {e}"));
    let db_path = dir.path().join("state").join("swarm.db");
    fs::write(
        dir.path().join("swarm.toml"),
        format!("database_url = \"sqlite://{}\"\nmax_workers = 2\n", db_path.display()),
    )
    .unwrap_or_else(|e| unreachable!("config write failed: {e}"));
    dir
}

#[test]
fn help_exits_zero_and_lists_commands() {
    let dir = workspace_with_config();
    swarm_in(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("Usage: swarm"))
        .stdout(contains("init-db"));
}

#[test]
fn version_prints_package_version() {
    let dir = workspace_with_config();
    swarm_in(&dir)
        .arg("--version")
        .assert()
        .success()
        .stdout(contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn unknown_command_is_a_usage_error() {
    let dir = workspace_with_config();
    swarm_in(&dir)
        .arg("deploy")
        .assert()
        .code(2)
        .stderr(contains("error [CLI_ERROR]"))
        .stderr(contains("Unknown command: deploy"));
}

#[test]
fn unknown_flag_is_a_usage_error() {
    let dir = workspace_with_config();
    swarm_in(&dir)
        .args(["run", "--fast"])
        .assert()
        .code(2);
}

#[test]
fn init_db_creates_the_database_file() {
    let dir = workspace_with_config();
    swarm_in(&dir)
        .args(["init-db", "--config", "swarm.toml"])
        .assert()
        .success()
        .stdout(contains("\"initialized\":true"));
    assert!(dir.path().join("state").join("swarm.db").exists());
}

#[test]
fn health_on_a_fresh_store_reports_unknown() {
    let dir = workspace_with_config();
    swarm_in(&dir)
        .args(["health", "--config", "swarm.toml", "--level", "task"])
        .assert()
        .success()
        .stdout(contains("\"Unknown\""));
}

#[test]
fn run_on_an_empty_store_succeeds_with_no_tasks() {
    let dir = workspace_with_config();
    swarm_in(&dir)
        .args(["run", "--config", "swarm.toml"])
        .assert()
        .success()
        .stdout(contains("NoTasks"));
}

#[test]
fn unreadable_config_reports_the_invalid_code_and_a_fix() {
    let dir = workspace_with_config();
    // A directory cannot be read as a config file.
    swarm_in(&dir)
        .args(["init-db", "--config", "."])
        .assert()
        .code(2)
        .stderr(contains("error [INVALID]"))
        .stderr(contains("hint: Invalid configuration or payload"));
}
