//! Service config loading and startup wiring

use serial_test::serial;
use std::env;
use svbatch_common::config::CONFIG_ENV_VAR;
use svbatch_core::PluginRegistry;
use svbatch_server::config::ScratchBackend;
use svbatch_server::{command_registry, AppState, ServerConfig};
use tempfile::TempDir;

#[test]
fn test_example_config_parses() {
    let config: ServerConfig = toml::from_str(include_str!("../svbatch.example.toml")).unwrap();

    assert_eq!(config.server.bind, "127.0.0.1:5780");
    assert_eq!(config.engine.unit_timeout_secs, 300.0);
    assert_eq!(config.formats["ust"].input_options["encoding"], "shift_jis");
    assert_eq!(config.middlewares["pitch_smooth"].args, vec!["--mode", "smooth"]);

    let registry = command_registry(&config);
    let formats: Vec<String> = registry.formats().into_iter().map(|f| f.identifier).collect();
    assert_eq!(formats, vec!["svp", "ust"]);
    assert!(registry.resolve_middleware("pitch_smooth").is_some());
}

#[test]
#[serial]
fn test_load_from_environment_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("svbatch.toml");
    std::fs::write(&path, "[engine]\nmax_workers = 3\n\n[scratch]\nbackend = \"disk\"\n").unwrap();
    env::set_var(CONFIG_ENV_VAR, &path);

    let config = ServerConfig::load(None).unwrap();

    env::remove_var(CONFIG_ENV_VAR);
    assert_eq!(config.engine.max_workers, 3);
    assert_eq!(config.scratch.backend, ScratchBackend::Disk);
}

#[test]
#[serial]
fn test_missing_cli_path_falls_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    let config = ServerConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
    assert_eq!(config, ServerConfig::default());
}

#[test]
fn test_malformed_config_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("svbatch.toml");
    std::fs::write(&path, "[engine\nmax_workers = ").unwrap();
    assert!(ServerConfig::load(Some(&path)).is_err());
}

#[tokio::test]
async fn test_state_from_disk_scratch_config() {
    let dir = TempDir::new().unwrap();
    let mut config = ServerConfig::default();
    config.scratch.backend = ScratchBackend::Disk;
    config.scratch.root = Some(dir.path().join("scratch"));
    config.engine.max_workers = 1;

    let state = AppState::from_config(&config).unwrap();

    assert!(dir.path().join("scratch").is_dir());
    assert_eq!(state.engine.worker_count(), 1);
    assert!(state.engine.batch_ids().await.is_empty());
}
