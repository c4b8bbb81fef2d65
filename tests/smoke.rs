//! Smoke tests -- verify the binary runs and its subcommands are wired.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_cli_help() {
    Command::cargo_bin("halowbench")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("HaLow link characterization"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("halowbench")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("halowbench"));
}

#[test]
fn test_subcommands_exist() {
    for sub in ["run", "device", "sample", "config", "parse-ping"] {
        Command::cargo_bin("halowbench")
            .unwrap()
            .args([sub, "--help"])
            .assert()
            .success();
    }
}

#[test]
fn test_config_prints_defaults() {
    Command::cargo_bin("halowbench")
        .unwrap()
        .env_remove("HALOWBENCH_CONFIG")
        .arg("config")
        .assert()
        .success()
        .stdout(predicates::str::contains("rpc_url = \"http://169.254.1.1/ubus\""))
        .stdout(predicates::str::contains("sample_target = 110"))
        .stdout(predicates::str::contains("password = \"<redacted>\""))
        .stdout(predicates::str::contains("heltec.org").not());
}

#[test]
fn test_config_rejects_invalid_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[ping]\nbatch_size = 10\nsample_target = 15\n").unwrap();

    Command::cargo_bin("halowbench")
        .unwrap()
        .arg("--config")
        .arg(&path)
        .arg("config")
        .assert()
        .failure()
        .stderr(predicates::str::contains("multiple of ping.batch_size"));
}

#[test]
fn test_parse_ping_accepts_full_batch() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ping.txt");
    std::fs::write(
        &path,
        "PING 169.254.63.82 (169.254.63.82) 56(84) bytes of data.\n\
         [1763335364.615064] 64 bytes from 169.254.63.82: icmp_seq=1 ttl=63 time=4.25 ms\n\
         \n\
         --- 169.254.63.82 ping statistics ---\n",
    )
    .unwrap();

    Command::cargo_bin("halowbench")
        .unwrap()
        .args(["parse-ping", "--batch-size", "1"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicates::str::contains("timestamp,bytes,sequence,ttl,time_ms"))
        .stdout(predicates::str::contains("1763335364.615064,64,1,63,4.25"));

    Command::cargo_bin("halowbench")
        .unwrap()
        .args(["parse-ping", "--batch-size", "10"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicates::str::contains("expected 10 replies, got 1"));
}
