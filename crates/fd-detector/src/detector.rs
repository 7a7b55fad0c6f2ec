/// Detector context: the state every monitor and responder of one process
/// epoch shares.
///
/// - the epoch nonce, written exactly once by [`Detector::initialize`]
/// - the stop-all flag consulted by monitor loops
/// - the port registry used by responders
/// - the failure notification channel
///
/// `Detector` is a cheap cloneable handle. Most programs create one (or use
/// [`crate::global`]) and hand it to every `Monitor` and `Responder`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use fd_protocol::RESERVED_EPOCH;
use tracing::info;

use crate::channel::FailureChannel;
use crate::error::{FailureDetectorError, Result};
use crate::registry::PortRegistry;

/// Tuning knobs shared by every monitor of a detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorConfig {
    /// Ack wait used before any round trip has been measured.
    pub initial_timeout: Duration,
    /// Lower bound on the adaptive ack wait.
    pub min_timeout: Duration,
    /// Minimum spacing between heartbeats after a successful round.
    pub heartbeat_interval: Duration,
}

impl DetectorConfig {
    /// A zero bootstrap wait would expire every first round before any
    /// ack could arrive.
    pub fn validate(&self) -> Result<()> {
        if self.initial_timeout.is_zero() {
            return Err(FailureDetectorError::InvalidTimeout);
        }
        Ok(())
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            initial_timeout: Duration::from_millis(fd_protocol::DEFAULT_INITIAL_TIMEOUT_MS),
            min_timeout: Duration::from_millis(fd_protocol::DEFAULT_MIN_TIMEOUT_MS),
            heartbeat_interval: Duration::from_millis(fd_protocol::DEFAULT_HEARTBEAT_INTERVAL_MS),
        }
    }
}

struct DetectorInner {
    config: DetectorConfig,
    epoch: OnceLock<i64>,
    monitoring_disabled: AtomicBool,
    registry: PortRegistry,
    failures: FailureChannel,
}

#[derive(Clone)]
pub struct Detector {
    inner: Arc<DetectorInner>,
}

impl Detector {
    pub fn new() -> Self {
        Self::from_config(DetectorConfig::default())
    }

    /// Fails with `InvalidTimeout` if `config.initial_timeout` is zero.
    pub fn with_config(config: DetectorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_config(config))
    }

    fn from_config(config: DetectorConfig) -> Self {
        Self {
            inner: Arc::new(DetectorInner {
                config,
                epoch: OnceLock::new(),
                monitoring_disabled: AtomicBool::new(false),
                registry: PortRegistry::new(),
                failures: FailureChannel::new(),
            }),
        }
    }

    /// Set the epoch nonce and hand out the failure channel.
    ///
    /// Fails with `InvalidEpoch` for the reserved value `-1` and with
    /// `AlreadyInitialized` on any call after the first successful one.
    pub fn initialize(&self, epoch: i64) -> Result<FailureChannel> {
        if epoch == RESERVED_EPOCH {
            return Err(FailureDetectorError::InvalidEpoch);
        }
        self.inner
            .epoch
            .set(epoch)
            .map_err(|_| FailureDetectorError::AlreadyInitialized)?;

        info!(epoch = epoch, "Failure detector initialized");
        Ok(self.inner.failures.clone())
    }

    pub fn epoch(&self) -> Option<i64> {
        self.inner.epoch.get().copied()
    }

    pub fn is_initialized(&self) -> bool {
        self.epoch().is_some()
    }

    /// Ask every monitor of this detector to stop at its next round boundary.
    pub fn stop_monitoring_all(&self) {
        if !self.inner.monitoring_disabled.swap(true, Ordering::SeqCst) {
            info!("Stopping all monitors");
        }
    }

    pub fn is_monitoring_disabled(&self) -> bool {
        self.inner.monitoring_disabled.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &PortRegistry {
        &self.inner.registry
    }

    pub fn failures(&self) -> &FailureChannel {
        &self.inner.failures
    }
}

impl Default for Detector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Detector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detector")
            .field("epoch", &self.epoch())
            .field("monitoring_disabled", &self.is_monitoring_disabled())
            .field("config", &self.inner.config)
            .finish()
    }
}
