//! Integration test for file-destination logging.
//!
//! The subscriber is process-global, so exactly one test in this binary may
//! call `init_logging`.

use baton::logging::{init_logging, LoggingConfig};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_file_logging_writes_events() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("logs").join("baton.log");

    let config = LoggingConfig {
        level: "info".to_string(),
        output: "file".to_string(),
        file: log_path.clone(),
        ..LoggingConfig::default()
    };
    init_logging(Some(&config)).unwrap();

    tracing::info!(check = "file-destination", "logging integration check");

    let content = fs::read_to_string(&log_path).unwrap();
    assert!(
        content.contains("logging integration check"),
        "log file should contain the emitted event; got: {}",
        content.lines().next().unwrap_or("")
    );
}
