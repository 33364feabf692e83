use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn cmd(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("queue-throttle").unwrap();
    cmd.arg("--config").arg(config);
    cmd.env_remove("QUEUE_THROTTLE_LOG_LEVEL")
        .env_remove("QUEUE_THROTTLE_LOG_FORMAT")
        .env_remove("RUST_LOG");
    cmd
}

/// Config with one queue, `mailer`, processed by `script`
fn write_config(dir: &TempDir, script: &str) -> (PathBuf, PathBuf) {
    let spool = dir.path().join("spool").join("mailer.jsonl");
    let config = dir.path().join("config.toml");
    let toml = format!(
        r#"
[queues.mailer]
enabled = true
time = 2
items = 100
unit = "second"
command = ["sh", "-c", "{}"]
spool = "{}"
"#,
        script,
        spool.display()
    );
    fs::write(&config, toml).unwrap();
    (config, spool)
}

fn spool_lines(spool: &Path) -> usize {
    fs::read_to_string(spool)
        .map(|s| s.lines().filter(|l| !l.trim().is_empty()).count())
        .unwrap_or(0)
}

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("queue-throttle").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Drain work queues under a fixed-window rate limit",
        ));
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("queue-throttle").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("queue-throttle 0.1.0"));
}

#[test]
fn test_cli_units() {
    let dir = TempDir::new().unwrap();
    cmd(&dir.path().join("missing.toml"))
        .arg("units")
        .assert()
        .success()
        .stdout(predicate::str::contains("microsecond"))
        .stdout(predicate::str::contains("week"))
        .stdout(predicate::str::is_match(r"minute\s+60\n").unwrap());
}

#[test]
fn test_cli_run_missing_items() {
    let mut cmd = Command::cargo_bin("queue-throttle").unwrap();
    cmd.args(["run", "mailer", "--time-limit", "5"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "required arguments were not provided",
        ));
}

#[test]
fn test_cli_run_invalid_unit() {
    let dir = TempDir::new().unwrap();
    cmd(&dir.path().join("missing.toml"))
        .args(["run", "mailer", "--time-limit", "1", "--items", "5", "--unit", "fortnight"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid unit 'fortnight'"));
}

#[test]
fn test_cli_run_zero_items() {
    let dir = TempDir::new().unwrap();
    cmd(&dir.path().join("missing.toml"))
        .args(["run", "mailer", "--time-limit", "1", "--items", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid token amount"));
}

#[test]
fn test_cli_run_unknown_queue() {
    let dir = TempDir::new().unwrap();
    cmd(&dir.path().join("missing.toml"))
        .args(["run", "nowhere", "--time-limit", "1", "--items", "5"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("queue not found: nowhere"));
}

#[test]
fn test_cli_invalid_config_rejected() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.toml");
    fs::write(&config, "[logging]\nlevel = \"loud\"\n").unwrap();

    cmd(&config)
        .arg("units")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid log level"));
}

#[cfg(unix)]
#[test]
fn test_cli_enqueue_then_run_drains_spool() {
    let dir = TempDir::new().unwrap();
    let (config, spool) = write_config(&dir, "cat > /dev/null");

    for payload in [r#"{"to":"a@example.com"}"#, r#"{"to":"b@example.com"}"#] {
        cmd(&config)
            .args(["enqueue", "mailer", payload])
            .assert()
            .success();
    }
    assert_eq!(spool_lines(&spool), 2);

    cmd(&config)
        .args(["run", "mailer", "--time-limit", "5", "--items", "5", "--unit", "minute"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"processed\": 2"))
        .stdout(predicate::str::contains("\"exit\": \"empty\""));
    assert_eq!(spool_lines(&spool), 0);
}

#[cfg(unix)]
#[test]
fn test_cli_enqueue_rejects_bad_json() {
    let dir = TempDir::new().unwrap();
    let (config, spool) = write_config(&dir, "cat > /dev/null");

    cmd(&config)
        .args(["enqueue", "mailer", "{not json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Payload is not valid JSON"));
    assert_eq!(spool_lines(&spool), 0);
}

#[cfg(unix)]
#[test]
fn test_cli_suspension_fails_run_and_keeps_items() {
    let dir = TempDir::new().unwrap();
    let (config, spool) = write_config(&dir, "echo smtp down >&2; exit 69");

    cmd(&config)
        .args(["enqueue", "mailer", r#"{"to":"a@example.com"}"#])
        .assert()
        .success();

    cmd(&config)
        .args(["queue-throttle-run", "mailer", "--time-limit", "5", "--items", "5"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "queue mailer suspended after 0 processed items: smtp down",
        ))
        .stderr(predicate::str::contains("Remaining items kept in the spool"));
    assert_eq!(spool_lines(&spool), 1);
}

#[cfg(unix)]
#[test]
fn test_cli_cron_drains_enabled_queues() {
    let dir = TempDir::new().unwrap();
    let (config, spool) = write_config(&dir, "cat > /dev/null");

    cmd(&config)
        .args(["enqueue", "mailer", "1"])
        .assert()
        .success();

    cmd(&config)
        .args(["cron", "--print-metrics"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"ran\": true"))
        .stdout(predicate::str::contains("\"queue\": \"mailer\""))
        .stdout(predicate::str::contains("queue_cron_runs_total"));
    assert_eq!(spool_lines(&spool), 0);
}
