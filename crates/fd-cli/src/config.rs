use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use fd_detector::DetectorConfig;
use serde::Deserialize;
use tracing::error;

#[derive(Debug, Clone, Deserialize)]
pub struct FdConfig {
    pub detector: DetectorSection,
    #[serde(default)]
    pub responders: Vec<ResponderSection>,
    #[serde(default)]
    pub monitors: Vec<MonitorSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorSection {
    pub epoch: i64,
    #[serde(default = "default_initial_timeout")]
    pub initial_timeout_ms: u64,
    #[serde(default = "default_min_timeout")]
    pub min_timeout_ms: u64,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponderSection {
    pub listen: SocketAddr,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSection {
    /// Printable name; defaults to the remote address
    pub name: Option<String>,
    pub local: SocketAddr,
    pub remote: SocketAddr,
    #[serde(default = "default_threshold")]
    pub threshold: u32,
}

impl MonitorSection {
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("monitor of {}", self.remote))
    }
}

// Default value functions
fn default_initial_timeout() -> u64 { fd_protocol::DEFAULT_INITIAL_TIMEOUT_MS }
fn default_min_timeout() -> u64 { fd_protocol::DEFAULT_MIN_TIMEOUT_MS }
fn default_heartbeat_interval() -> u64 { fd_protocol::DEFAULT_HEARTBEAT_INTERVAL_MS }
fn default_threshold() -> u32 { fd_protocol::DEFAULT_LOSS_THRESHOLD }

impl DetectorSection {
    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            initial_timeout: Duration::from_millis(self.initial_timeout_ms),
            min_timeout: Duration::from_millis(self.min_timeout_ms),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
        }
    }
}

pub async fn load(path: &Path) -> anyhow::Result<FdConfig> {
    let config_str = tokio::fs::read_to_string(path).await.map_err(|e| {
        error!("Failed to read config file {:?}: {}", path, e);
        e
    })?;

    let config: FdConfig = toml::from_str(&config_str).map_err(|e| {
        error!("Failed to parse config: {}", e);
        e
    })?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fd_detector::{Detector, FailureDetectorError};

    #[test]
    fn test_full_config() {
        let config: FdConfig = toml::from_str(
            r#"
            [detector]
            epoch = 2020
            initial_timeout_ms = 500
            min_timeout_ms = 5
            heartbeat_interval_ms = 100

            [[responders]]
            listen = "127.0.0.1:6666"

            [[monitors]]
            name = "self"
            local = "127.0.0.1:4567"
            remote = "127.0.0.1:6666"
            threshold = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.detector.epoch, 2020);
        let detector = config.detector.detector_config();
        assert_eq!(detector.initial_timeout, Duration::from_millis(500));
        assert_eq!(detector.min_timeout, Duration::from_millis(5));
        assert_eq!(detector.heartbeat_interval, Duration::from_millis(100));

        assert_eq!(config.responders.len(), 1);
        assert_eq!(config.responders[0].listen.port(), 6666);
        assert_eq!(config.monitors[0].threshold, 4);
        assert_eq!(config.monitors[0].display_name(), "self");
    }

    #[test]
    fn test_defaults() {
        let config: FdConfig = toml::from_str(
            r#"
            [detector]
            epoch = 1

            [[monitors]]
            local = "127.0.0.1:0"
            remote = "10.0.0.2:6666"
            "#,
        )
        .unwrap();

        assert_eq!(config.detector.detector_config(), DetectorConfig::default());
        assert!(config.responders.is_empty());
        assert_eq!(config.monitors[0].threshold, fd_protocol::DEFAULT_LOSS_THRESHOLD);
        assert_eq!(config.monitors[0].display_name(), "monitor of 10.0.0.2:6666");
    }

    #[test]
    fn test_zero_initial_timeout_rejected() {
        let config: FdConfig = toml::from_str(
            r#"
            [detector]
            epoch = 5
            initial_timeout_ms = 0
            "#,
        )
        .unwrap();

        let err = Detector::with_config(config.detector.detector_config()).unwrap_err();
        assert!(matches!(err, FailureDetectorError::InvalidTimeout));
    }

    #[test]
    fn test_epoch_required() {
        assert!(toml::from_str::<FdConfig>("[detector]\n").is_err());
    }
}
