use crate::error::{BusError, Result};
use crate::filter::TypeFilterConfig;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::fs;

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub reliability: ReliabilityConfig,
    #[serde(default)]
    pub filter: TypeFilterConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneralConfig {
    /// When false every message is dispatched immediately, whatever its send time.
    #[serde(default = "default_delayed_messaging")]
    pub delayed_messaging: bool,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_stats_sample_interval_secs")]
    pub stats_sample_interval_secs: u64,
    #[serde(default = "default_stats_retention_secs")]
    pub stats_retention_secs: u64,
    #[serde(default = "default_stats_log_interval_secs")]
    pub stats_log_interval_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            delayed_messaging: default_delayed_messaging(),
            poll_interval_ms: default_poll_interval_ms(),
            stats_sample_interval_secs: default_stats_sample_interval_secs(),
            stats_retention_secs: default_stats_retention_secs(),
            stats_log_interval_secs: default_stats_log_interval_secs(),
        }
    }
}

impl GeneralConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_delayed_messaging() -> bool { true }
fn default_poll_interval_ms() -> u64 { 100 }
fn default_stats_sample_interval_secs() -> u64 { 1 }
fn default_stats_retention_secs() -> u64 { 3600 }
fn default_stats_log_interval_secs() -> u64 { 60 }

#[derive(Debug, Deserialize, Clone)]
pub struct ReliabilityConfig {
    #[serde(default = "default_endpoint_timeout_ms")]
    pub endpoint_timeout_ms: u64,
    #[serde(default = "default_keep_alive_interval_ms")]
    pub keep_alive_interval_ms: u64,
    #[serde(default = "default_resend_interval_ms")]
    pub resend_interval_ms: u64,
    #[serde(default = "default_received_message_max_age_ms")]
    pub received_message_max_age_ms: u64,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            endpoint_timeout_ms: default_endpoint_timeout_ms(),
            keep_alive_interval_ms: default_keep_alive_interval_ms(),
            resend_interval_ms: default_resend_interval_ms(),
            received_message_max_age_ms: default_received_message_max_age_ms(),
        }
    }
}

impl ReliabilityConfig {
    pub fn endpoint_timeout(&self) -> Duration {
        Duration::from_millis(self.endpoint_timeout_ms)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_ms)
    }

    pub fn resend_interval(&self) -> Duration {
        Duration::from_millis(self.resend_interval_ms)
    }

    pub fn received_message_max_age(&self) -> Duration {
        Duration::from_millis(self.received_message_max_age_ms)
    }
}

fn default_endpoint_timeout_ms() -> u64 { 15_000 }
fn default_keep_alive_interval_ms() -> u64 { 1_000 }
fn default_resend_interval_ms() -> u64 { 1_000 }
fn default_received_message_max_age_ms() -> u64 { 30_000 }

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| BusError::filesystem(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.general.poll_interval_ms == 0 {
            return Err(BusError::config("poll_interval_ms must be greater than zero"));
        }

        let reliability = &self.reliability;
        if reliability.endpoint_timeout_ms <= reliability.keep_alive_interval_ms {
            return Err(BusError::config(format!(
                "endpoint_timeout_ms ({}) must exceed keep_alive_interval_ms ({})",
                reliability.endpoint_timeout_ms, reliability.keep_alive_interval_ms
            )));
        }

        if reliability.resend_interval_ms == 0 {
            return Err(BusError::config("resend_interval_ms must be greater than zero"));
        }

        for (i, name) in self.filter.block_types.iter().enumerate() {
            if name.is_empty() || name == crate::context::ALL_MESSAGE_TYPES {
                return Err(BusError::config(format!(
                    "Invalid message type '{}' in filter.block_types[{}]",
                    name, i
                )));
            }
        }

        if self.general.stats_sample_interval_secs > 0 && self.general.stats_retention_secs == 0 {
            tracing::warn!("stats_retention_secs is 0, statistics history is disabled");
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::parse("").expect("empty config is valid");
        assert!(config.general.delayed_messaging);
        assert_eq!(config.general.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.reliability.endpoint_timeout(), Duration::from_secs(15));
        assert!(config.filter.block_types.is_empty());
    }

    #[test]
    fn test_parse_sections() {
        let toml = r#"
[general]
delayed_messaging = false
poll_interval_ms = 25

[reliability]
endpoint_timeout_ms = 5000
keep_alive_interval_ms = 500

[filter]
block_types = ["Debug.Spam"]
"#;
        let config = Config::parse(toml).expect("valid config");
        assert!(!config.general.delayed_messaging);
        assert_eq!(config.general.poll_interval_ms, 25);
        assert_eq!(config.reliability.keep_alive_interval_ms, 500);
        assert_eq!(config.filter.block_types, vec!["Debug.Spam".to_string()]);
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let result = Config::parse("[general]\npoll_interval_ms = 0");
        assert!(matches!(result, Err(BusError::Config(_))));
    }

    #[test]
    fn test_timeout_must_exceed_keep_alive() {
        let result = Config::parse(
            "[reliability]\nendpoint_timeout_ms = 1000\nkeep_alive_interval_ms = 1000",
        );
        assert!(result.is_err(), "Should reject timeout <= keep-alive");
    }

    #[test]
    fn test_sentinel_in_block_list_rejected() {
        let result = Config::parse("[filter]\nblock_types = [\"*\"]");
        assert!(result.is_err());
    }

    #[test]
    fn test_malformed_toml() {
        let result = Config::parse("[general\n");
        assert!(matches!(result, Err(BusError::Parse(_))));
    }
}
