//! Configuration loading and root folder resolution tests
//!
//! Tests that touch MOTIF_ROOT are marked #[serial] so they never race on the
//! process environment.

use motif_common::config::{resolve_root_folder, MotifConfig, DEFAULT_BATCH_PAIRS, ROOT_ENV_VAR};
use motif_common::{Error, Tolerance};
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[test]
fn test_missing_file_yields_defaults() {
    let dir = TempDir::new().unwrap();
    let config = MotifConfig::load(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config, MotifConfig::default());
    assert_eq!(config.reconcile.tolerance, Tolerance::DEFAULT);
    assert_eq!(config.miner.batch_pairs, DEFAULT_BATCH_PAIRS);
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_parse_all_sections() {
    let config = MotifConfig::from_toml_str(
        r#"
        root_folder = "/srv/motif"

        [database]
        path = "db/patterns.db"

        [cache]
        root = "/var/cache/motif"

        [reconcile]
        tolerance = 0.01
        batch_size = 250

        [miner]
        batch_pairs = 10

        [logging]
        level = "debug"
        "#,
    )
    .unwrap();

    assert_eq!(config.root_folder, Some(PathBuf::from("/srv/motif")));
    assert_eq!(config.reconcile.tolerance.epsilon(), 0.01);
    assert_eq!(config.reconcile.batch_size, 250);
    assert_eq!(config.miner.batch_pairs, 10);
    assert_eq!(config.logging.level, "debug");

    let root = Path::new("/srv/motif");
    assert_eq!(config.database_path(root), root.join("db/patterns.db"));
    assert_eq!(config.cache_root(root), PathBuf::from("/var/cache/motif"));
}

#[test]
fn test_partial_file_keeps_other_defaults() {
    let config = MotifConfig::from_toml_str("[miner]\nbatch_pairs = 5\n").unwrap();
    assert_eq!(config.miner.batch_pairs, 5);
    assert_eq!(config.reconcile.tolerance, Tolerance::DEFAULT);

    let root = Path::new("/data");
    assert_eq!(config.database_path(root), root.join("motif.db"));
    assert_eq!(config.cache_root(root), root.join("cache"));
}

#[test]
fn test_invalid_values_rejected() {
    assert!(matches!(
        MotifConfig::from_toml_str("[reconcile]\ntolerance = -1.0\n"),
        Err(Error::Config(_))
    ));
    assert!(matches!(
        MotifConfig::from_toml_str("[miner]\nbatch_pairs = 0\n"),
        Err(Error::Config(_))
    ));
}

#[test]
fn test_write_then_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("conf").join("config.toml");

    let mut config = MotifConfig::default();
    config.reconcile.batch_size = 42;
    config.write(&path).unwrap();

    assert_eq!(MotifConfig::load(&path).unwrap(), config);
}

#[test]
#[serial]
fn test_cli_argument_wins() {
    env::set_var(ROOT_ENV_VAR, "/from/env");
    let config = MotifConfig {
        root_folder: Some(PathBuf::from("/from/toml")),
        ..Default::default()
    };

    let root = resolve_root_folder(Some(Path::new("/from/cli")), ROOT_ENV_VAR, &config);
    assert_eq!(root, PathBuf::from("/from/cli"));

    env::remove_var(ROOT_ENV_VAR);
}

#[test]
#[serial]
fn test_env_var_beats_toml() {
    env::set_var(ROOT_ENV_VAR, "/from/env");
    let config = MotifConfig {
        root_folder: Some(PathBuf::from("/from/toml")),
        ..Default::default()
    };

    assert_eq!(
        resolve_root_folder(None, ROOT_ENV_VAR, &config),
        PathBuf::from("/from/env")
    );

    env::remove_var(ROOT_ENV_VAR);
}

#[test]
#[serial]
fn test_toml_beats_default() {
    env::remove_var(ROOT_ENV_VAR);
    let config = MotifConfig {
        root_folder: Some(PathBuf::from("/from/toml")),
        ..Default::default()
    };

    assert_eq!(
        resolve_root_folder(None, ROOT_ENV_VAR, &config),
        PathBuf::from("/from/toml")
    );
}

#[test]
#[serial]
fn test_falls_back_to_platform_default() {
    env::remove_var(ROOT_ENV_VAR);
    let root = resolve_root_folder(None, ROOT_ENV_VAR, &MotifConfig::default());
    assert!(!root.as_os_str().is_empty());
    assert!(root.to_string_lossy().contains("motif"));
}
