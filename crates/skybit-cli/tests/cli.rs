use assert_cmd::Command;
use predicates::str::{contains, starts_with};
use tempfile::TempDir;

fn skybit(dir: &TempDir) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("skybit"));
    cmd.env("SKYBIT_DIR", dir.path())
        .env_remove("SKYBIT_API_KEY")
        .env_remove("SKYBIT_DB_PATH")
        .env("RUST_LOG", "warn");
    cmd
}

#[test]
fn test_cli_help() {
    let dir = tempfile::tempdir().unwrap();
    skybit(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("Skybit"));
}

#[test]
fn test_cli_version() {
    let dir = tempfile::tempdir().unwrap();
    skybit(&dir).arg("--version").assert().success();
}

#[test]
fn test_cli_completions() {
    let dir = tempfile::tempdir().unwrap();
    skybit(&dir)
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(starts_with("_skybit"));
}

#[test]
fn test_task_create_list_show() {
    let dir = tempfile::tempdir().unwrap();

    skybit(&dir)
        .args([
            "task",
            "create",
            "--name",
            "daily report",
            "--prompt",
            "Summarize yesterday",
            "--interval",
            "1440",
        ])
        .assert()
        .success()
        .stdout(contains("Task created: daily report (daily_report)"));

    skybit(&dir)
        .args(["task", "list"])
        .assert()
        .success()
        .stdout(contains("daily_report"))
        .stdout(contains("every 1440m"));

    skybit(&dir)
        .args(["task", "show", "daily_report", "--format", "json"])
        .assert()
        .success()
        .stdout(contains(r#""id": "daily_report""#))
        .stdout(contains(r#""interval_minutes": 1440"#));
}

#[test]
fn test_duplicate_create_fails() {
    let dir = tempfile::tempdir().unwrap();
    let create = |dir: &TempDir| {
        skybit(dir)
            .args(["task", "create", "--name", "sync", "--prompt", "p"])
            .assert()
    };

    create(&dir).success();
    create(&dir)
        .failure()
        .stderr(contains("Task already exists: sync"));
}

#[test]
fn test_invalid_cron_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    skybit(&dir)
        .args([
            "task", "create", "--name", "bad", "--prompt", "p", "--cron", "0 9 * *",
        ])
        .assert()
        .failure()
        .stderr(contains("Validation error"));
}

#[test]
fn test_update_disable_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    skybit(&dir)
        .args(["task", "create", "--name", "weekly", "--prompt", "p"])
        .assert()
        .success();

    skybit(&dir)
        .args(["task", "update", "weekly", "--cron", "0 9 * * 1", "--format", "json"])
        .assert()
        .success()
        .stdout(contains(r#""cron_expression": "0 9 * * 1""#));

    skybit(&dir)
        .args(["task", "disable", "weekly", "--format", "json"])
        .assert()
        .success()
        .stdout(contains(r#""next_run_at": null"#));

    skybit(&dir)
        .args(["task", "delete", "weekly"])
        .assert()
        .success();

    skybit(&dir)
        .args(["task", "show", "weekly"])
        .assert()
        .failure()
        .stderr(contains("Task not found: weekly"))
        .stderr(contains("skybit task list"));
}

#[test]
fn test_run_without_api_key_records_error() {
    let dir = tempfile::tempdir().unwrap();
    skybit(&dir)
        .args(["task", "create", "--name", "report", "--prompt", "p"])
        .assert()
        .success();

    skybit(&dir)
        .args(["task", "run", "report"])
        .assert()
        .failure()
        .stderr(contains("not configured"))
        .stderr(contains("SKYBIT_API_KEY"));

    skybit(&dir)
        .args(["task", "show", "report"])
        .assert()
        .success()
        .stdout(contains("Failed:      1"));
}
