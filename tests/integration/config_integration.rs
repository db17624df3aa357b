//! Integration tests for configuration loading
//!
//! Verifies that file-based configuration actually drives the runtime:
//! queue capacity, worker count, and the logging section.

use baton::app::Baton;
use baton::config::BatonConfig;
use baton::error::QueueError;
use baton::registry::Outcome;
use baton::signature::Signature;
use serde_json::Value;
use std::fs;
use tempfile::TempDir;

#[tokio::test]
async fn test_loaded_config_drives_queue_capacity() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("config.toml"),
        "workers = 1\nqueue_capacity = 2\npoll_interval_ms = 10\nretry_delay_ms = 10\n",
    )
    .unwrap();

    let config = BatonConfig::load(dir.path()).unwrap();
    assert_eq!(config.workers, 1);
    assert_eq!(config.queue_capacity, 2);

    let app = Baton::new(config).unwrap();
    app.register("noop", |_args| Outcome::value(Value::Null))
        .unwrap();
    // Workers stay stopped so the queue fills.

    app.send(Signature::new("noop")).await.unwrap();
    app.send(Signature::new("noop")).await.unwrap();
    let err = app.send(Signature::new("noop")).await.unwrap_err();
    assert!(matches!(err, QueueError::QueueFull { capacity: 2 }));
}

#[test]
fn test_invalid_file_values_are_rejected() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("config.toml"), "workers = 0\n").unwrap();

    let err = BatonConfig::load(dir.path()).unwrap_err();
    assert!(matches!(err, QueueError::ConfigError(_)));
}

#[test]
fn test_logging_section_is_parsed() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("config.toml"),
        "[logging]\nlevel = \"debug\"\nformat = \"json\"\n",
    )
    .unwrap();

    let config = BatonConfig::load(dir.path()).unwrap();
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.format, "json");
    // Fields outside the logging section keep their defaults.
    assert_eq!(config.workers, 2);
}
