//! Single-link UDP failure detector.
//!
//! A [`Monitor`] probes one remote peer with 16-byte heartbeats and declares
//! it failed after a configurable number of consecutive missed acks. A
//! [`Responder`] echoes heartbeats back. Both hang off a [`Detector`]
//! context that holds the epoch nonce, the responder port registry and the
//! failure notification channel.
//!
//! ```no_run
//! # async fn demo() -> Result<(), fd_detector::FailureDetectorError> {
//! use fd_detector::{Detector, Monitor, Responder};
//!
//! let detector = Detector::new();
//! let failures = detector.initialize(2020)?;
//!
//! let responder = Responder::bind(&detector, "127.0.0.1:6666".parse().unwrap())?;
//! responder.start_responding()?;
//!
//! let monitor = Monitor::new(
//!     &detector,
//!     "127.0.0.1:4567".parse().unwrap(),
//!     "127.0.0.1:6666".parse().unwrap(),
//!     "localhost:6666",
//! )?;
//! monitor.start_monitoring(6)?;
//!
//! if let Some(failed) = failures.recv().await {
//!     println!("{} lost its peer", failed.name());
//! }
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod detector;
pub mod error;
pub mod monitor;
pub mod registry;
pub mod responder;
pub mod rtt;
mod socket;

use std::sync::OnceLock;

pub use channel::FailureChannel;
pub use detector::{Detector, DetectorConfig};
pub use error::{ErrorKind, FailureDetectorError, Result};
pub use monitor::{Monitor, MonitorState};
pub use registry::PortRegistry;
pub use responder::Responder;
pub use rtt::RttEstimator;

static GLOBAL: OnceLock<Detector> = OnceLock::new();

/// Process-wide detector used by [`initialize_monitor`] and
/// [`stop_monitoring_all`].
pub fn global() -> &'static Detector {
    GLOBAL.get_or_init(Detector::new)
}

/// Set the process epoch on the global detector. See [`Detector::initialize`].
pub fn initialize_monitor(epoch: i64) -> Result<FailureChannel> {
    global().initialize(epoch)
}

/// Stop every monitor created on the global detector.
pub fn stop_monitoring_all() {
    global().stop_monitoring_all();
}
