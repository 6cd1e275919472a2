//! Tests for bootstrap configuration loading and resolution
//!
//! Tests that manipulate NDA_CONFIG or NDA_ROOT_FOLDER are marked #[serial]
//! so they never race each other.

use nda_common::config::{resolve_config_path, ConfirmPolicyKind, TomlConfig, CONFIG_ENV_VAR, ROOT_FOLDER_ENV_VAR};
use serial_test::serial;
use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

#[test]
fn test_defaults_when_sections_missing() {
    let config = TomlConfig::from_toml_str("").unwrap();

    assert_eq!(config.sync.confirm_threshold, 0);
    assert_eq!(config.sync.confirm_policy, ConfirmPolicyKind::Prompt);
    assert_eq!(config.sync.max_lock_wait_ms, 5000);
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_parse_full_config() {
    let config = TomlConfig::from_toml_str(
        r#"
        root_folder = "/data/nda"
        upstream_folder = "/data/upstream"

        [sync]
        confirm_threshold = 25
        confirm_policy = "reject-if-over-threshold"
        max_lock_wait_ms = 250

        [logging]
        level = "debug"
        "#,
    )
    .unwrap();

    assert_eq!(config.root_folder(), PathBuf::from("/data/nda"));
    assert_eq!(config.database_path(), PathBuf::from("/data/nda/nda.db"));
    assert_eq!(config.upstream_folder(), PathBuf::from("/data/upstream"));
    assert_eq!(config.sync.confirm_threshold, 25);
    assert_eq!(config.sync.confirm_policy, ConfirmPolicyKind::RejectIfOverThreshold);
    assert_eq!(config.sync.max_lock_wait_ms, 250);
    assert_eq!(config.logging.level, "debug");
}

#[test]
fn test_invalid_policy_is_rejected() {
    let result = TomlConfig::from_toml_str("[sync]\nconfirm_policy = \"maybe\"\n");
    assert!(result.is_err());
}

#[test]
#[serial]
fn test_cli_path_takes_priority_over_env() {
    env::set_var(CONFIG_ENV_VAR, "/from/env.toml");

    let resolved = resolve_config_path(Some(Path::new("/from/cli.toml")), "nda-function");
    assert_eq!(resolved, Some(PathBuf::from("/from/cli.toml")));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_env_path_used_without_cli() {
    env::set_var(CONFIG_ENV_VAR, "/from/env.toml");

    let resolved = resolve_config_path(None, "nda-function");
    assert_eq!(resolved, Some(PathBuf::from("/from/env.toml")));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_root_folder_from_env() {
    env::set_var(ROOT_FOLDER_ENV_VAR, "/env/root");

    let config = TomlConfig::default();
    assert_eq!(config.root_folder(), PathBuf::from("/env/root"));
    assert_eq!(config.upstream_folder(), PathBuf::from("/env/root/upstream"));

    env::remove_var(ROOT_FOLDER_ENV_VAR);
}

#[test]
#[serial]
fn test_load_or_default_reads_file() {
    env::remove_var(CONFIG_ENV_VAR);
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[sync]\nconfirm_threshold = 3").unwrap();

    let config = TomlConfig::load_or_default(Some(file.path()), "nda-function").unwrap();
    assert_eq!(config.sync.confirm_threshold, 3);
}
