/// Round-trip time estimator used to size each ack wait.
///
/// Symmetric smoothing: every sample is averaged with the previous
/// estimate, `estimate = max(1, ceil((sample + estimate) / 2))`, in whole
/// milliseconds. Until an ack has been seen (or on the first heartbeat of a
/// run) the fixed initial timeout is used instead.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RttEstimator {
    initial: Duration,
    floor: Duration,
    estimate_ms: Option<u64>,
}

impl RttEstimator {
    pub fn new(initial: Duration, floor: Duration) -> Self {
        Self {
            initial,
            floor,
            estimate_ms: None,
        }
    }

    /// Receive timeout for the wait following heartbeat number `heartbeats`
    /// (1-based count of heartbeats sent since the last reset).
    pub fn timeout(&self, heartbeats: u64) -> Duration {
        match self.estimate_ms {
            Some(ms) if heartbeats > 1 => Duration::from_millis(ms).max(self.floor),
            _ => self.initial,
        }
    }

    pub fn record(&mut self, sample: Duration) {
        let sample_ms = u64::try_from(sample.as_millis()).unwrap_or(u64::MAX);
        let next = match self.estimate_ms {
            None => sample_ms,
            Some(prev) => {
                let sum = u128::from(sample_ms) + u128::from(prev);
                u64::try_from(sum.div_ceil(2)).unwrap_or(u64::MAX)
            }
        };
        self.estimate_ms = Some(next.max(1));
    }

    pub fn estimate(&self) -> Option<Duration> {
        self.estimate_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> RttEstimator {
        RttEstimator::new(Duration::from_millis(3000), Duration::from_millis(1))
    }

    #[test]
    fn test_bootstrap_timeout() {
        let rtt = estimator();
        assert_eq!(rtt.timeout(0), Duration::from_millis(3000));
        assert_eq!(rtt.timeout(1), Duration::from_millis(3000));
        // No sample yet: still bootstrapping
        assert_eq!(rtt.timeout(5), Duration::from_millis(3000));
        assert!(rtt.estimate().is_none());
    }

    #[test]
    fn test_first_heartbeat_after_reset_uses_initial() {
        let mut rtt = estimator();
        rtt.record(Duration::from_millis(40));
        assert_eq!(rtt.timeout(1), Duration::from_millis(3000));
        assert_eq!(rtt.timeout(2), Duration::from_millis(40));
    }

    #[test]
    fn test_symmetric_smoothing() {
        let mut rtt = estimator();
        rtt.record(Duration::from_millis(100));
        assert_eq!(rtt.estimate(), Some(Duration::from_millis(100)));

        rtt.record(Duration::from_millis(51));
        // ceil((51 + 100) / 2) = 76
        assert_eq!(rtt.estimate(), Some(Duration::from_millis(76)));

        rtt.record(Duration::from_millis(0));
        assert_eq!(rtt.estimate(), Some(Duration::from_millis(38)));
    }

    #[test]
    fn test_estimate_never_below_one() {
        let mut rtt = estimator();
        rtt.record(Duration::from_micros(80));
        assert_eq!(rtt.estimate(), Some(Duration::from_millis(1)));

        for _ in 0..10 {
            rtt.record(Duration::ZERO);
        }
        assert_eq!(rtt.estimate(), Some(Duration::from_millis(1)));
        assert_eq!(rtt.timeout(2), Duration::from_millis(1));
    }

    #[test]
    fn test_floor_applies_to_timeout() {
        let mut rtt = RttEstimator::new(Duration::from_millis(3000), Duration::from_millis(25));
        rtt.record(Duration::from_millis(2));
        assert_eq!(rtt.estimate(), Some(Duration::from_millis(2)));
        assert_eq!(rtt.timeout(2), Duration::from_millis(25));
    }
}
