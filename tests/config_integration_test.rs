//! Configuration Integration Tests
//!
//! Loading `conduit-config.yaml` from disk with environment overrides and wiring
//! the result into a `SystemContext`.

use conduit_core::config::{ConfigManager, ConfigurationError};
use conduit_core::database::InMemoryDatastore;
use conduit_core::resilience::RetryStrategyKind;
use conduit_core::{ConduitError, SystemContext};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

fn repository_config_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config")
}

fn write_config(content: &str) -> TempDir {
    let dir = TempDir::new().expect("temp dir");
    fs::write(dir.path().join("conduit-config.yaml"), content).expect("write config");
    dir
}

#[test]
fn bundled_config_loads_for_every_environment() {
    for environment in ["development", "test", "production"] {
        let manager =
            ConfigManager::load_from_directory_with_env(Some(repository_config_dir()), environment)
                .unwrap_or_else(|err| panic!("{environment} config should load: {err}"));
        assert_eq!(manager.environment(), environment);
        assert_eq!(manager.config().rate_limiter.request_limit, 50);
        assert_eq!(manager.config().retry.strategy, RetryStrategyKind::Exponential);
    }
}

#[test]
fn environment_blocks_override_base_values() {
    let test = ConfigManager::load_from_directory_with_env(Some(repository_config_dir()), "test")
        .expect("test config");
    assert_eq!(test.config().rate_limiter.window_seconds, 1);
    assert_eq!(test.config().retry.base_delay_ms, 10);
    assert_eq!(test.config().database.max_connections, 5);
    assert_eq!(test.config().database.database_name("test"), "conduit_test");
    assert_eq!(test.config().queue_processor.max_concurrent, 3);

    let production =
        ConfigManager::load_from_directory_with_env(Some(repository_config_dir()), "production")
            .expect("production config");
    assert_eq!(production.config().queue_processor.max_concurrent, 5);
    assert_eq!(production.config().database.max_connections, 25);
    assert_eq!(production.config().rate_limiter.window_seconds, 60);
}

#[test]
fn invalid_section_is_reported_by_name() {
    let dir = write_config(
        r#"
queue_processor:
  max_concurrent: 0
"#,
    );

    let err = ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
        .unwrap_err();
    match err {
        ConfigurationError::ValidationError { section, .. } => {
            assert_eq!(section, "queue_processor")
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn missing_file_lists_searched_paths() {
    let dir = TempDir::new().expect("temp dir");
    let err = ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
        .unwrap_err();
    assert!(matches!(err, ConfigurationError::ConfigFileNotFound { .. }));
}

#[test]
fn debug_config_masks_credentials() {
    let dir = write_config(
        r#"
database:
  password: "hunter2-secret"
"#,
    );
    let manager =
        ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "development")
            .expect("config");

    let rendered = manager.debug_config().to_string();
    assert!(!rendered.contains("hunter2-secret"));
    assert!(rendered.contains("MASKED"));
}

#[tokio::test]
async fn loaded_config_drives_system_context() {
    let dir = write_config(
        r#"
rate_limiter:
  request_limit: 4
  threshold: 0.5
batch:
  cleanup_on_completion: true
test:
  rate_limiter:
    window_seconds: 30
"#,
    );
    let manager = ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
        .expect("config");

    let context: SystemContext<String> =
        SystemContext::from_config(manager.config().clone()).expect("context");
    assert_eq!(context.config().rate_limiter.window_seconds, 30);

    context.rate_limiter().add_request(None);
    assert!(context.rate_limiter().can_make_request());
    context.rate_limiter().add_request(None);
    assert!(!context.rate_limiter().can_make_request());

    let store = InMemoryDatastore::new();
    let batch = context.batch_processor(Arc::new(store.clone()));
    let items = vec!["a".to_string(), "b".to_string()];
    let result = batch
        .resume_batch_processing(
            "config-job",
            &items,
            |_item: &String| async { Ok::<_, anyhow::Error>(()) },
            None,
        )
        .await
        .expect("batch completes");
    assert_eq!(result.completed, items);
    assert_eq!(store.checkpoint_count(), 0);

    context.reset();
    assert!(context.rate_limiter().can_make_request());
}

#[test]
fn invalid_config_is_rejected_by_system_context() {
    let mut config = ConfigManager::from_yaml_str("", "test").expect("defaults");
    config.rate_limiter.request_limit = 0;

    let err = SystemContext::<String>::from_config(config).unwrap_err();
    assert!(matches!(err, ConduitError::Configuration(_)));
}
