#![cfg(not(target_arch = "wasm32"))]

use std::io::Write as _;

use assert_cmd::Command;
use predicates::prelude::*;

fn sdproxy() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_sdproxy"));
    for (key, _) in std::env::vars() {
        if key.starts_with("SDPROXY_") {
            cmd.env_remove(key);
        }
    }
    cmd
}

#[test]
fn help_lists_the_flags() {
    sdproxy()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("<IMAGE>"))
        .stdout(predicate::str::contains("--uio"))
        .stdout(predicate::str::contains("--rt-core"))
        .stdout(predicate::str::contains("--software-crc"))
        .stdout(predicate::str::contains("--no-reset"));
}

#[test]
fn image_is_required() {
    sdproxy()
        .assert()
        .failure()
        .stderr(predicate::str::contains("<IMAGE>"));
}

#[test]
fn missing_image_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    sdproxy()
        .arg(dir.path().join("absent.img"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to open image"));
}

#[test]
fn missing_uio_device_is_fatal() {
    let mut image = tempfile::NamedTempFile::new().unwrap();
    image.write_all(&[0u8; 4096]).unwrap();
    image.flush().unwrap();
    let dir = tempfile::tempdir().unwrap();

    sdproxy()
        .arg(image.path())
        .arg("--uio")
        .arg(dir.path().join("uio9"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to open UIO device"));
}

#[test]
fn software_crc_on_a_wide_bus_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    sdproxy()
        .arg(dir.path().join("absent.img"))
        .args(["--software-crc", "--four-bit"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid configuration"));
}

#[test]
fn malformed_environment_value_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    sdproxy()
        .env("SDPROXY_RING_CAPACITY", "lots")
        .arg(dir.path().join("absent.img"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("--ring-capacity"));
}

#[test]
fn unusable_environment_value_fails_validation() {
    let dir = tempfile::tempdir().unwrap();
    sdproxy()
        .env("SDPROXY_DATA_POLL_US", "0")
        .arg(dir.path().join("absent.img"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid configuration"));
}

#[test]
fn flags_override_the_environment() {
    let dir = tempfile::tempdir().unwrap();
    // The flag replaces the unusable value, so start-up gets as far as the image.
    sdproxy()
        .env("SDPROXY_DATA_POLL_US", "0")
        .arg(dir.path().join("absent.img"))
        .args(["--poll-interval-us", "100"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to open image"))
        .stderr(predicate::str::contains("invalid configuration").not());
}

#[test]
fn boolean_settings_come_from_the_environment() {
    let dir = tempfile::tempdir().unwrap();
    sdproxy()
        .env("SDPROXY_SOFTWARE_CRC", "true")
        .env("SDPROXY_FOUR_BIT", "true")
        .arg(dir.path().join("absent.img"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid configuration"));
}
