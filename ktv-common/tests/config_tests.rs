//! Configuration loading and graceful degradation tests
//!
//! Tests that manipulate KTV_CONFIG are marked with #[serial] so they do not
//! race each other on the process environment.

use ktv_common::config::{resolve_config_path, KtvConfig, CONFIG_ENV_VAR};
use serial_test::serial;
use std::env;
use std::io::Write;
use std::path::PathBuf;
use tempfile::{NamedTempFile, TempDir};

#[test]
#[serial]
fn test_cli_argument_wins_over_env() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/ktv-from-env.toml");

    let cli = PathBuf::from("/tmp/ktv-from-cli.toml");
    let resolved = resolve_config_path(Some(&cli), CONFIG_ENV_VAR);
    assert_eq!(resolved, Some(cli));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_env_var_used_without_cli_argument() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/ktv-from-env.toml");

    let resolved = resolve_config_path(None, CONFIG_ENV_VAR);
    assert_eq!(resolved, Some(PathBuf::from("/tmp/ktv-from-env.toml")));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
fn test_missing_file_degrades_to_defaults() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("does-not-exist.toml");

    let config = KtvConfig::load_or_default(Some(&missing)).unwrap();
    assert_eq!(config, KtvConfig::default());

    let config = KtvConfig::load_or_default(None).unwrap();
    assert_eq!(config, KtvConfig::default());
}

#[test]
fn test_existing_file_is_loaded() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[playback]
score_display_delay_ms = 3000
default_scoring_enabled = false

[logging]
level = "debug"
"#
    )
    .unwrap();

    let config = KtvConfig::load_or_default(Some(file.path())).unwrap();
    assert_eq!(config.playback.score_display_delay_ms, 3000);
    assert!(!config.playback.default_scoring_enabled);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.telemetry.retransmit_frames, 5);
}

#[test]
fn test_unparseable_file_is_an_error() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[events]\ncapacity = \"lots\"").unwrap();

    assert!(KtvConfig::load_or_default(Some(file.path())).is_err());
}
