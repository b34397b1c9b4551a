//! Integration tests for the layered configuration loader (spec.md §6):
//! built-in defaults → optional TOML file → `RISKFLOW_`-prefixed
//! environment overrides. Serialized with `serial_test` since environment
//! variables are process-global state shared across the test binary.

use riskflow_worker::Settings;
use serial_test::serial;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_toml(contents: &str) -> NamedTempFile {
    // `config-rs` infers the file format from the extension, so the temp
    // file needs an explicit `.toml` suffix rather than tempfile's default
    // extensionless name.
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("create temp config file");
    file.write_all(contents.as_bytes()).expect("write temp config");
    file
}

#[test]
#[serial]
fn file_values_override_defaults() {
    let file = write_toml(
        r#"
        [batch]
        size = 32
        timeout_ms = 50

        [broker]
        host = "broker.internal"
        "#,
    );

    let settings = Settings::load(Some(&file.path().to_path_buf())).unwrap();
    assert_eq!(settings.batch.size, 32);
    assert_eq!(settings.batch.timeout_ms, 50);
    assert_eq!(settings.broker.host, "broker.internal");
    // Untouched sections keep their defaults.
    assert_eq!(settings.server.port, 8000);
}

#[test]
#[serial]
fn environment_overrides_win_over_file_values() {
    let file = write_toml(
        r#"
        [batch]
        size = 32
        "#,
    );

    std::env::set_var("RISKFLOW_BATCH__SIZE", "64");
    let settings = Settings::load(Some(&file.path().to_path_buf()));
    std::env::remove_var("RISKFLOW_BATCH__SIZE");

    assert_eq!(settings.unwrap().batch.size, 64);
}

#[test]
#[serial]
fn missing_config_file_falls_back_to_defaults_entirely() {
    let settings = Settings::load(Some(&std::path::PathBuf::from("/does/not/exist.toml"))).unwrap();
    assert_eq!(settings.batch.size, 16);
    assert_eq!(settings.broker.prefetch, 50);
    assert!(!settings.degraded_mode);
}
