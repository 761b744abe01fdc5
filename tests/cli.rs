use assert_cmd::prelude::*;
use bech32::{ToBase32, Variant};
use std::{fs, process::Command};
use tempfile::TempDir;

fn write_env(dir: &TempDir) -> String {
    let env_path = dir.path().join("env");
    let content = format!(
        "STORE_ROOT={}\nBIND_HTTP=127.0.0.1:0\nBASE_URL=http://127.0.0.1:7878\n",
        dir.path().display()
    );
    fs::write(&env_path, content).unwrap();
    env_path.to_str().unwrap().to_string()
}

#[test]
fn init_cli_creates_layout() {
    let dir = TempDir::new().unwrap();
    let env_path = write_env(&dir);

    Command::cargo_bin("blosr")
        .unwrap()
        .args(["--env", &env_path, "init"])
        .assert()
        .success();

    assert!(dir.path().join("blobs").exists());
    assert!(dir.path().join("tmp").exists());
    assert!(dir.path().join("blosr.db").exists());
}

#[test]
fn init_cli_writes_default_env() {
    let dir = TempDir::new().unwrap();
    let env_path = dir.path().join("env");

    Command::cargo_bin("blosr")
        .unwrap()
        .args(["--env", env_path.to_str().unwrap(), "init"])
        .assert()
        .success();

    let data = fs::read_to_string(&env_path).unwrap();
    assert!(data.contains("BIND_HTTP=127.0.0.1:7878"));
    assert!(data.contains("AUTH_MODE=allowlist"));
    assert!(dir.path().join("blosr-data").join("blobs").exists());
}

#[test]
fn allow_cli_manages_list() {
    let dir = TempDir::new().unwrap();
    let env_path = write_env(&dir);
    let key_hex = "3bf0c63fcb93463407af97a5e5ee64fa883d107ef9e558472c4eb9aaaefa459d";
    let key_npub = bech32::encode(
        "npub",
        hex::decode(key_hex).unwrap().to_base32(),
        Variant::Bech32,
    )
    .unwrap();

    Command::cargo_bin("blosr")
        .unwrap()
        .args(["--env", &env_path, "allow", "add", key_hex])
        .assert()
        .success();

    // The npub form normalizes to the same key, so this is a duplicate.
    Command::cargo_bin("blosr")
        .unwrap()
        .args(["--env", &env_path, "allow", "add", &key_npub])
        .assert()
        .failure();

    let out = Command::cargo_bin("blosr")
        .unwrap()
        .args(["--env", &env_path, "allow", "list"])
        .output()
        .unwrap();
    assert!(String::from_utf8_lossy(&out.stdout).contains(key_hex));

    Command::cargo_bin("blosr")
        .unwrap()
        .args(["--env", &env_path, "allow", "remove", &key_npub])
        .assert()
        .success();

    let out = Command::cargo_bin("blosr")
        .unwrap()
        .args(["--env", &env_path, "allow", "list"])
        .output()
        .unwrap();
    assert!(!String::from_utf8_lossy(&out.stdout).contains(key_hex));

    // Removing again fails.
    Command::cargo_bin("blosr")
        .unwrap()
        .args(["--env", &env_path, "allow", "remove", key_hex])
        .assert()
        .failure();
}

#[test]
fn allow_cli_rejects_garbage_key() {
    let dir = TempDir::new().unwrap();
    let env_path = write_env(&dir);
    Command::cargo_bin("blosr")
        .unwrap()
        .args(["--env", &env_path, "allow", "add", "not-a-key"])
        .assert()
        .failure();
}

#[test]
fn verify_cli_runs_on_empty_store() {
    let dir = TempDir::new().unwrap();
    let env_path = write_env(&dir);
    Command::cargo_bin("blosr")
        .unwrap()
        .args(["--env", &env_path, "init"])
        .assert()
        .success();
    Command::cargo_bin("blosr")
        .unwrap()
        .args(["--env", &env_path, "verify", "--sample", "10"])
        .assert()
        .success();
}
