mod support;

use std::path::Path;

use anyhow::{Context as _, Result};
use assert_cmd::Command;
use predicates::str::contains;
use serde_json::Value;

use support::fixtures::SEED_HEX;

fn wallet_cli(data_dir: &Path) -> Result<Command> {
    let mut cmd = Command::cargo_bin("wallet_cli").context("find wallet_cli binary")?;
    cmd.arg("--data-dir")
        .arg(data_dir)
        .arg("--seed")
        .arg(SEED_HEX)
        // Local commands never reach the node.
        .arg("--gateway-url")
        .arg("http://127.0.0.1:9");
    Ok(cmd)
}

fn stdout_json(cmd: &mut Command) -> Result<Value> {
    let out = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&out).context("parse cli output")
}

#[test]
fn get_payment_rejects_malformed_index() -> Result<()> {
    let dir = tempfile::tempdir().context("create tempdir")?;
    wallet_cli(dir.path())?
        .args(["get-payment", "--index", "fake_payment_id"])
        .assert()
        .failure()
        .stderr(contains("invalid payment_index"));
    Ok(())
}

#[test]
fn fresh_wallet_reports_empty_local_state() -> Result<()> {
    let dir = tempfile::tempdir().context("create tempdir")?;

    let page = stdout_json(wallet_cli(dir.path())?.arg("list"))?;
    assert_eq!(page["total_count"], 0);
    assert_eq!(page["payments"], Value::Array(Vec::new()));

    let latest = stdout_json(wallet_cli(dir.path())?.arg("latest-sync-index"))?;
    assert_eq!(latest["latest_sync_index"], Value::Null);

    let index = format!("1234567890-ln_{}", "0".repeat(64));
    let got = stdout_json(wallet_cli(dir.path())?.args(["get-payment", "--index", &index]))?;
    assert_eq!(got["payment"], Value::Null);

    let deleted = stdout_json(wallet_cli(dir.path())?.arg("delete-local"))?;
    assert_eq!(deleted["deleted"], true);
    Ok(())
}

#[test]
fn update_note_on_unsynced_payment_fails() -> Result<()> {
    let dir = tempfile::tempdir().context("create tempdir")?;
    let index = format!("1234567890-ln_{}", "0".repeat(64));
    wallet_cli(dir.path())?
        .args(["update-note", "--index", &index, "--note", "hi"])
        .assert()
        .failure()
        .stderr(contains("not synced locally"));
    Ok(())
}

#[test]
fn wait_validates_before_polling() -> Result<()> {
    let dir = tempfile::tempdir().context("create tempdir")?;
    wallet_cli(dir.path())?
        .args(["wait", "--index", "fake_payment_id"])
        .assert()
        .failure()
        .stderr(contains("invalid payment_index"));

    let index = format!("1234567890-ln_{}", "0".repeat(64));
    wallet_cli(dir.path())?
        .args(["wait", "--index", &index, "--timeout-secs", "10801"])
        .assert()
        .failure()
        .stderr(contains("exceeds the maximum"));
    Ok(())
}

#[test]
fn bad_seed_is_rejected() -> Result<()> {
    let dir = tempfile::tempdir().context("create tempdir")?;
    Command::cargo_bin("wallet_cli")
        .context("find wallet_cli binary")?
        .arg("--data-dir")
        .arg(dir.path())
        .args(["--seed", "beef", "list"])
        .assert()
        .failure();
    Ok(())
}
