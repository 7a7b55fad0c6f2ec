use std::net::SocketAddr;

use thiserror::Error;

/// Broad class of a [`FailureDetectorError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Misuse of the detector API (bad epoch, double init, start before init).
    Configuration,
    /// A local address/port could not be used.
    Resource,
}

#[derive(Debug, Error)]
pub enum FailureDetectorError {
    #[error("Monitor: Invalid Epoch")]
    InvalidEpoch,

    #[error("Monitor: Already Initialized")]
    AlreadyInitialized,

    #[error("detector must be initialized with an epoch before monitoring")]
    NotInitialized,

    #[error("loss threshold must be at least 1")]
    InvalidThreshold,

    #[error("initial timeout must be greater than zero")]
    InvalidTimeout,

    #[error("monitoring has been stopped for every monitor of this detector")]
    MonitoringDisabled,

    #[error("Already running")]
    AlreadyRunning,

    #[error("{addr} is already bound by another responder")]
    AlreadyBound { addr: SocketAddr },

    #[error("cannot bind {addr}: {source}")]
    PortUnavailable {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

impl FailureDetectorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidEpoch
            | Self::AlreadyInitialized
            | Self::NotInitialized
            | Self::InvalidThreshold
            | Self::InvalidTimeout
            | Self::MonitoringDisabled
            | Self::AlreadyRunning => ErrorKind::Configuration,
            Self::AlreadyBound { .. } | Self::PortUnavailable { .. } => ErrorKind::Resource,
        }
    }
}

pub type Result<T> = std::result::Result<T, FailureDetectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(FailureDetectorError::InvalidEpoch.kind(), ErrorKind::Configuration);
        assert_eq!(FailureDetectorError::AlreadyRunning.kind(), ErrorKind::Configuration);
        assert_eq!(FailureDetectorError::InvalidTimeout.kind(), ErrorKind::Configuration);

        let addr: SocketAddr = "127.0.0.1:6666".parse().unwrap();
        assert_eq!(FailureDetectorError::AlreadyBound { addr }.kind(), ErrorKind::Resource);

        let err = FailureDetectorError::PortUnavailable {
            addr,
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        assert_eq!(err.kind(), ErrorKind::Resource);
        assert!(err.to_string().starts_with("cannot bind 127.0.0.1:6666"));
    }

    #[test]
    fn test_messages() {
        assert_eq!(FailureDetectorError::InvalidEpoch.to_string(), "Monitor: Invalid Epoch");
        assert_eq!(
            FailureDetectorError::AlreadyInitialized.to_string(),
            "Monitor: Already Initialized"
        );
    }
}
