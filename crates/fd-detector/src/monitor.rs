/// Heartbeat monitor for one remote peer.
///
/// A monitor owns a private UDP socket. Once started it runs a background
/// task that repeatedly:
///
/// 1. sends `(epoch, sequence)` to the peer and records the send time,
/// 2. waits for a matching ack, bounded by the RTT estimator's timeout,
/// 3. on an ack resets the lost count and feeds the RTT sample back,
///    on a timeout increments the lost count.
///
/// When the lost count reaches the threshold the monitor pushes itself onto
/// the detector's failure channel, resets its counters and keeps probing.
/// Acks from another epoch, or for a sequence number this monitor has no
/// record of, are ignored without affecting either counter.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use fd_protocol::packets::Heartbeat;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::detector::Detector;
use crate::error::{FailureDetectorError, Result};
use crate::rtt::RttEstimator;
use crate::socket::bind_udp;

/// Large enough to tell an oversized datagram from a 16-byte one.
const RECV_BUF_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Monitoring,
}

/// Per-run probing state. Only the background task touches it.
struct ProbeState {
    next_sequence: i64,
    /// Heartbeats sent since the last failure declaration.
    heartbeats: u64,
    lost_count: u32,
    /// In-flight sequence numbers and when they were sent.
    pending: HashMap<i64, Instant>,
    rtt: RttEstimator,
}

impl ProbeState {
    fn new(rtt: RttEstimator) -> Self {
        Self {
            next_sequence: 0,
            heartbeats: 0,
            lost_count: 0,
            pending: HashMap::new(),
            rtt,
        }
    }

    fn record_send(&mut self, sent_at: Instant) -> i64 {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        self.heartbeats += 1;
        self.pending.insert(sequence, sent_at);
        sequence
    }

    fn record_ack(&mut self, sequence: i64, received_at: Instant) {
        if let Some(sent_at) = self.pending.get(&sequence).copied() {
            self.rtt.record(received_at.saturating_duration_since(sent_at));
        }
        self.pending.retain(|&seq, _| seq > sequence);
        self.lost_count = 0;
    }

    /// Declare-and-reset transition: the run starts over as if fresh, but
    /// keeps its sequence counter and RTT estimate.
    fn reset_after_failure(&mut self) {
        self.lost_count = 0;
        self.heartbeats = 0;
        self.pending.clear();
    }
}

enum AckWait {
    Acked { sequence: i64, received_at: Instant },
    Lost,
    Stopped,
}

/// Counters mirrored out of the background task for observers.
#[derive(Default)]
struct MonitorStats {
    lost_count: AtomicU32,
    heartbeats_sent: AtomicU64,
    acks_received: AtomicU64,
    failures_declared: AtomicU64,
    /// 0 until the first round trip has been measured.
    rtt_estimate_ms: AtomicU64,
}

struct MonitorInner {
    name: String,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    socket: UdpSocket,
    detector: Detector,
    monitoring: AtomicBool,
    /// True while a background task exists for this monitor.
    loop_active: AtomicBool,
    threshold: AtomicU32,
    stats: MonitorStats,
    probe: Mutex<ProbeState>,
}

/// Shared by every user-visible handle. The background task only keeps a
/// `Weak` to it, so dropping the last `Monitor` stops the loop.
struct MonitorOwner {
    inner: Arc<MonitorInner>,
}

impl Drop for MonitorOwner {
    fn drop(&mut self) {
        if self.inner.monitoring.swap(false, Ordering::SeqCst) {
            debug!(monitor = %self.inner.name, "Last handle dropped, monitoring stopped");
        }
    }
}

/// Handle to a monitor. Clones refer to the same monitor; the handle
/// delivered on the failure channel is one of these clones.
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<MonitorInner>,
    owner: Arc<MonitorOwner>,
}

impl Monitor {
    /// Bind `local` for sending heartbeats to `remote`.
    ///
    /// Fails with `PortUnavailable` if `local` cannot be bound. Monitoring
    /// does not begin until [`Monitor::start_monitoring`]. Must be called
    /// from within a Tokio runtime.
    pub fn new(
        detector: &Detector,
        local: SocketAddr,
        remote: SocketAddr,
        name: impl Into<String>,
    ) -> Result<Self> {
        let socket = bind_udp(local)?;
        let local_addr = socket
            .local_addr()
            .map_err(|source| FailureDetectorError::PortUnavailable { addr: local, source })?;
        let name = name.into();

        let config = detector.config();
        let rtt = RttEstimator::new(config.initial_timeout, config.min_timeout);

        debug!(monitor = %name, local = %local_addr, remote = %remote, "Monitor created");

        let inner = Arc::new(MonitorInner {
            name,
            local_addr,
            remote_addr: remote,
            socket,
            detector: detector.clone(),
            monitoring: AtomicBool::new(false),
            loop_active: AtomicBool::new(false),
            threshold: AtomicU32::new(0),
            stats: MonitorStats::default(),
            probe: Mutex::new(ProbeState::new(rtt)),
        });

        Ok(Self {
            owner: Arc::new(MonitorOwner {
                inner: Arc::clone(&inner),
            }),
            inner,
        })
    }

    /// Start (or re-arm) monitoring with `threshold` consecutive losses.
    ///
    /// If a background task is already running only its threshold changes.
    /// Does not block.
    pub fn start_monitoring(&self, threshold: u32) -> Result<()> {
        let inner = &self.inner;
        if !inner.detector.is_initialized() {
            return Err(FailureDetectorError::NotInitialized);
        }
        if threshold == 0 {
            return Err(FailureDetectorError::InvalidThreshold);
        }
        if inner.detector.is_monitoring_disabled() {
            return Err(FailureDetectorError::MonitoringDisabled);
        }

        inner.threshold.store(threshold, Ordering::SeqCst);
        inner.monitoring.store(true, Ordering::SeqCst);

        if inner.loop_active.swap(true, Ordering::SeqCst) {
            debug!(monitor = %inner.name, threshold = threshold, "Monitor threshold updated");
            return Ok(());
        }

        info!(
            monitor = %inner.name,
            remote = %inner.remote_addr,
            threshold = threshold,
            "Monitoring started"
        );
        let inner = Arc::clone(inner);
        let owner = Arc::downgrade(&self.owner);
        tokio::spawn(async move {
            MonitorInner::run(inner, owner).await;
        });
        Ok(())
    }

    /// Stop monitoring. The background task exits at its next round
    /// boundary; acks arriving afterwards are ignored.
    pub fn stop_monitoring(&self) {
        if self.inner.monitoring.swap(false, Ordering::SeqCst) {
            info!(monitor = %self.inner.name, "Monitoring stopped");
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.remote_addr
    }

    pub fn state(&self) -> MonitorState {
        if self.is_monitoring() {
            MonitorState::Monitoring
        } else {
            MonitorState::Idle
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.inner.monitoring.load(Ordering::SeqCst)
    }

    pub fn threshold(&self) -> u32 {
        self.inner.threshold.load(Ordering::SeqCst)
    }

    /// Consecutive losses since the last ack or failure declaration.
    pub fn lost_count(&self) -> u32 {
        self.inner.stats.lost_count.load(Ordering::SeqCst)
    }

    pub fn heartbeats_sent(&self) -> u64 {
        self.inner.stats.heartbeats_sent.load(Ordering::SeqCst)
    }

    pub fn acks_received(&self) -> u64 {
        self.inner.stats.acks_received.load(Ordering::SeqCst)
    }

    pub fn failures_declared(&self) -> u64 {
        self.inner.stats.failures_declared.load(Ordering::SeqCst)
    }

    pub fn rtt_estimate(&self) -> Option<Duration> {
        match self.inner.stats.rtt_estimate_ms.load(Ordering::SeqCst) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

impl PartialEq for Monitor {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Monitor {}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("name", &self.inner.name)
            .field("local_addr", &self.inner.local_addr)
            .field("remote_addr", &self.inner.remote_addr)
            .field("state", &self.state())
            .field("lost_count", &self.lost_count())
            .finish()
    }
}

impl MonitorInner {
    async fn run(self: Arc<Self>, owner: Weak<MonitorOwner>) {
        loop {
            {
                let mut probe = self.probe.lock().await;
                self.probe_rounds(&mut probe, &owner).await;
            }

            self.loop_active.store(false, Ordering::SeqCst);
            // A start that landed while we were winding down saw the loop as
            // still active and did not spawn; pick the work up again here.
            if !self.monitoring.load(Ordering::SeqCst)
                || self.loop_active.swap(true, Ordering::SeqCst)
            {
                break;
            }
        }
        debug!(monitor = %self.name, "Monitor loop exited");
    }

    /// Round-boundary check of the instance flag and the detector-wide
    /// stop flag.
    fn should_continue(&self) -> bool {
        if self.detector.is_monitoring_disabled() {
            if self.monitoring.swap(false, Ordering::SeqCst) {
                info!(monitor = %self.name, "Monitoring stopped by stop-all");
            }
            return false;
        }
        self.monitoring.load(Ordering::SeqCst)
    }

    async fn probe_rounds(
        self: &Arc<Self>,
        probe: &mut ProbeState,
        owner: &Weak<MonitorOwner>,
    ) {
        let Some(epoch) = self.detector.epoch() else {
            return;
        };
        let interval = self.detector.config().heartbeat_interval;

        while self.should_continue() {
            if probe.lost_count >= self.threshold.load(Ordering::SeqCst) {
                if !self.declare_failure(probe, owner) {
                    break;
                }
                continue;
            }

            let sent_at = Instant::now();
            let sequence = probe.record_send(sent_at);
            self.stats.heartbeats_sent.fetch_add(1, Ordering::SeqCst);
            let deadline = sent_at + probe.rtt.timeout(probe.heartbeats);

            let outcome = match self
                .socket
                .send_to(&Heartbeat::new(epoch, sequence).encode(), self.remote_addr)
                .await
            {
                Ok(_) => self.await_ack(epoch, probe, deadline).await,
                Err(e) => {
                    warn!(monitor = %self.name, remote = %self.remote_addr, error = %e, "Failed to send heartbeat");
                    tokio::time::sleep_until(deadline).await;
                    self.round_expired()
                }
            };

            match outcome {
                AckWait::Acked { sequence, received_at } => {
                    probe.record_ack(sequence, received_at);
                    self.stats.acks_received.fetch_add(1, Ordering::SeqCst);
                    self.stats.lost_count.store(0, Ordering::SeqCst);
                    if let Some(estimate) = probe.rtt.estimate() {
                        let ms = u64::try_from(estimate.as_millis()).unwrap_or(u64::MAX);
                        self.stats.rtt_estimate_ms.store(ms, Ordering::SeqCst);
                    }
                    trace!(monitor = %self.name, sequence = sequence, "Ack received");

                    if !interval.is_zero() {
                        tokio::time::sleep_until(sent_at + interval).await;
                    }
                }
                AckWait::Lost => {
                    probe.lost_count += 1;
                    self.stats
                        .lost_count
                        .store(probe.lost_count, Ordering::SeqCst);
                    debug!(
                        monitor = %self.name,
                        lost = probe.lost_count,
                        threshold = self.threshold.load(Ordering::SeqCst),
                        "Heartbeat lost"
                    );
                }
                AckWait::Stopped => break,
            }
        }
    }

    /// Wait until `deadline` for an ack of any heartbeat still pending.
    async fn await_ack(&self, epoch: i64, probe: &ProbeState, deadline: Instant) -> AckWait {
        let mut buf = [0u8; RECV_BUF_SIZE];

        loop {
            let received =
                match tokio::time::timeout_at(deadline, self.socket.recv_from(&mut buf)).await {
                    Ok(received) => received,
                    Err(_) => return self.round_expired(),
                };
            if !self.monitoring.load(Ordering::SeqCst) {
                return AckWait::Stopped;
            }

            let (len, from) = match received {
                Ok(received) => received,
                Err(e) => {
                    warn!(monitor = %self.name, error = %e, "Failed to receive ack");
                    tokio::time::sleep_until(deadline).await;
                    return self.round_expired();
                }
            };

            let Some(ack) = Heartbeat::deserialize(&buf[..len]) else {
                trace!(monitor = %self.name, len = len, from = %from, "Ignoring datagram of wrong size");
                continue;
            };
            if ack.epoch != epoch {
                trace!(monitor = %self.name, epoch = ack.epoch, from = %from, "Ignoring ack from another epoch");
                continue;
            }
            if !probe.pending.contains_key(&ack.sequence) {
                trace!(monitor = %self.name, sequence = ack.sequence, from = %from, "Ignoring ack for unknown sequence");
                continue;
            }

            return AckWait::Acked {
                sequence: ack.sequence,
                received_at: Instant::now(),
            };
        }
    }

    /// Outcome of a round whose deadline passed without a valid ack. A
    /// round that ends after `stop_monitoring` is not a loss.
    fn round_expired(&self) -> AckWait {
        if self.monitoring.load(Ordering::SeqCst) {
            AckWait::Lost
        } else {
            AckWait::Stopped
        }
    }

    /// Returns false if every user handle is gone and the loop should end.
    fn declare_failure(
        self: &Arc<Self>,
        probe: &mut ProbeState,
        owner: &Weak<MonitorOwner>,
    ) -> bool {
        let Some(owner) = owner.upgrade() else {
            self.monitoring.store(false, Ordering::SeqCst);
            return false;
        };

        warn!(
            monitor = %self.name,
            remote = %self.remote_addr,
            lost = probe.lost_count,
            "Peer declared failed"
        );

        self.stats.failures_declared.fetch_add(1, Ordering::SeqCst);
        self.detector.failures().notify(Monitor {
            inner: Arc::clone(self),
            owner,
        });

        probe.reset_after_failure();
        self.stats.lost_count.store(0, Ordering::SeqCst);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn rtt() -> RttEstimator {
        RttEstimator::new(Duration::from_millis(3000), Duration::from_millis(1))
    }

    #[test]
    fn test_probe_sequence_and_pending() {
        let mut probe = ProbeState::new(rtt());
        let now = Instant::now();

        assert_eq!(probe.record_send(now), 0);
        assert_eq!(probe.record_send(now), 1);
        assert_eq!(probe.record_send(now), 2);
        assert_eq!(probe.heartbeats, 3);
        assert_eq!(probe.pending.len(), 3);

        probe.lost_count = 2;
        probe.record_ack(1, now + Duration::from_millis(10));
        assert_eq!(probe.lost_count, 0);
        // 0 and 1 retired, 2 still in flight
        assert_eq!(probe.pending.keys().copied().collect::<Vec<_>>(), vec![2]);
        assert_eq!(probe.rtt.estimate(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn test_reset_after_failure_keeps_sequence() {
        let mut probe = ProbeState::new(rtt());
        let now = Instant::now();
        probe.record_send(now);
        probe.record_send(now);
        probe.lost_count = 2;

        probe.reset_after_failure();
        assert_eq!(probe.lost_count, 0);
        assert_eq!(probe.heartbeats, 0);
        assert!(probe.pending.is_empty());
        assert_eq!(probe.record_send(now), 2);
    }

    #[test]
    fn test_sequence_wraps() {
        let mut probe = ProbeState::new(rtt());
        probe.next_sequence = i64::MAX;
        let now = Instant::now();
        assert_eq!(probe.record_send(now), i64::MAX);
        assert_eq!(probe.record_send(now), i64::MIN);
    }

    #[tokio::test]
    async fn test_start_requires_initialization() {
        let detector = Detector::new();
        let monitor = Monitor::new(
            &detector,
            "127.0.0.1:0".parse().unwrap(),
            "127.0.0.1:9".parse().unwrap(),
            "uninitialized",
        )
        .unwrap();

        let err = monitor.start_monitoring(3).unwrap_err();
        assert!(matches!(err, FailureDetectorError::NotInitialized));
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(monitor.state(), MonitorState::Idle);
    }

    #[tokio::test]
    async fn test_zero_threshold_rejected() {
        let detector = Detector::new();
        detector.initialize(1).unwrap();
        let monitor = Monitor::new(
            &detector,
            "127.0.0.1:0".parse().unwrap(),
            "127.0.0.1:9".parse().unwrap(),
            "zero",
        )
        .unwrap();

        assert!(matches!(
            monitor.start_monitoring(0),
            Err(FailureDetectorError::InvalidThreshold)
        ));
        assert!(!monitor.is_monitoring());
    }

    #[tokio::test]
    async fn test_local_port_in_use() {
        let detector = Detector::new();
        let held = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let local = held.local_addr().unwrap();

        let err = Monitor::new(&detector, local, "127.0.0.1:9".parse().unwrap(), "busy")
            .unwrap_err();
        assert!(matches!(err, FailureDetectorError::PortUnavailable { .. }));
        assert_eq!(err.kind(), ErrorKind::Resource);
    }

    #[tokio::test]
    async fn test_accessors() {
        let detector = Detector::new();
        let monitor = Monitor::new(
            &detector,
            "127.0.0.1:0".parse().unwrap(),
            "127.0.0.1:6666".parse().unwrap(),
            "TestMonitor of localhost:6666",
        )
        .unwrap();

        assert_eq!(monitor.name(), "TestMonitor of localhost:6666");
        assert_eq!(monitor.remote_addr().port(), 6666);
        assert_ne!(monitor.local_addr().port(), 0);
        assert_eq!(monitor.lost_count(), 0);
        assert_eq!(monitor.heartbeats_sent(), 0);
        assert!(monitor.rtt_estimate().is_none());
        assert_eq!(monitor.clone(), monitor);

        // Stopping an idle monitor is not an error
        monitor.stop_monitoring();
        assert_eq!(monitor.state(), MonitorState::Idle);
    }
}
