#![allow(clippy::expect_used)]

//! Configuration loading from disk.

use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;
use topicbus::config::Config;
use topicbus::error::BusError;
use topicbus::Bus;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(content.as_bytes()).expect("write config");
    file
}

#[tokio::test]
async fn test_load_from_file() {
    let file = write_config(
        r#"
[general]
poll_interval_ms = 20
stats_log_interval_secs = 0

[reliability]
resend_interval_ms = 250
received_message_max_age_ms = 10000

[filter]
block_types = ["Telemetry.Raw"]
"#,
    );

    let config = Config::load(file.path()).await.expect("valid config");
    assert_eq!(config.general.poll_interval(), Duration::from_millis(20));
    assert_eq!(config.general.stats_log_interval_secs, 0);
    assert_eq!(config.reliability.resend_interval(), Duration::from_millis(250));
    assert_eq!(config.reliability.received_message_max_age(), Duration::from_secs(10));
    assert_eq!(config.filter.block_types, vec!["Telemetry.Raw".to_string()]);
}

#[tokio::test]
async fn test_missing_file_reports_path() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("absent.toml");

    match Config::load(&path).await {
        Err(BusError::Filesystem { path: reported, .. }) => {
            assert!(reported.ends_with("absent.toml"));
        }
        other => panic!("expected filesystem error, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_invalid_file_rejected() {
    let file = write_config("[reliability]\nendpoint_timeout_ms = 100\nkeep_alive_interval_ms = 500\n");
    assert!(matches!(Config::load(file.path()).await, Err(BusError::Config(_))));
}

#[tokio::test]
async fn test_bus_from_file() {
    let file = write_config("[general]\npoll_interval_ms = 10\n");
    let bus = Bus::from_file(file.path()).await.expect("bus");
    assert_eq!(bus.config().general.poll_interval_ms, 10);
    bus.stop().await;
}
