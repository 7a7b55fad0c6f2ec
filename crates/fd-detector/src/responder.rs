/// Heartbeat responder.
///
/// Binds one local UDP endpoint and, while responding, echoes every
/// well-formed heartbeat back to its sender unchanged. The responding flag
/// lives in the detector's port registry.
///
/// Idle -> Responding -> Idle; restarting after a stop is allowed.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use fd_protocol::packets::Heartbeat;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::detector::Detector;
use crate::error::{FailureDetectorError, Result};
use crate::socket::bind_udp;

/// Large enough to tell an oversized datagram from a 16-byte one.
const RECV_BUF_SIZE: usize = 64;

struct ResponderShared {
    socket: UdpSocket,
    /// Token of the running receive loop. Held while an ack is sent so a
    /// stop cannot interleave between the flag check and the send.
    run: Mutex<Option<CancellationToken>>,
}

impl ResponderShared {
    fn run_guard(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.run.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Echo `heartbeat` to `to` unless `token` has been cancelled.
    fn try_ack(
        &self,
        token: &CancellationToken,
        heartbeat: Heartbeat,
        to: SocketAddr,
    ) -> AckSend {
        let _guard = self.run_guard();
        if token.is_cancelled() {
            return AckSend::Cancelled;
        }

        match self.socket.try_send_to(&heartbeat.encode(), to) {
            Ok(_) => {
                trace!(
                    epoch = heartbeat.epoch,
                    sequence = heartbeat.sequence,
                    to = %to,
                    "Ack sent"
                );
                AckSend::Done
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => AckSend::WouldBlock,
            Err(e) => {
                warn!(to = %to, error = %e, "Failed to send ack");
                AckSend::Done
            }
        }
    }

    /// Send one ack, waiting for send-buffer space once if the socket is
    /// full. The stop guard is released while waiting and re-checked before
    /// the retry. Returns false once the loop should exit.
    async fn send_ack(
        &self,
        token: &CancellationToken,
        heartbeat: Heartbeat,
        to: SocketAddr,
    ) -> bool {
        match self.try_ack(token, heartbeat, to) {
            AckSend::Done => return true,
            AckSend::Cancelled => return false,
            AckSend::WouldBlock => {}
        }

        tokio::select! {
            biased;
            _ = token.cancelled() => return false,
            ready = self.socket.writable() => {
                if let Err(e) = ready {
                    warn!(to = %to, error = %e, "Failed to send ack");
                    return true;
                }
            }
        }

        match self.try_ack(token, heartbeat, to) {
            AckSend::Cancelled => false,
            AckSend::Done => true,
            AckSend::WouldBlock => {
                warn!(to = %to, sequence = heartbeat.sequence, "Send buffer full, ack dropped");
                true
            }
        }
    }
}

enum AckSend {
    Done,
    WouldBlock,
    Cancelled,
}

pub struct Responder {
    local_addr: SocketAddr,
    detector: Detector,
    shared: Arc<ResponderShared>,
}

impl Responder {
    /// Bind `addr` and reserve it in the detector's registry.
    ///
    /// Port 0 binds an ephemeral port; [`Responder::local_addr`] reports the
    /// one actually chosen. Must be called from within a Tokio runtime.
    pub fn bind(detector: &Detector, addr: SocketAddr) -> Result<Self> {
        if detector.registry().is_reserved(addr) {
            return Err(FailureDetectorError::AlreadyBound { addr });
        }

        let socket = bind_udp(addr)?;
        let local_addr = socket
            .local_addr()
            .map_err(|source| FailureDetectorError::PortUnavailable { addr, source })?;
        detector.registry().reserve(local_addr)?;

        info!(addr = %local_addr, "Responder bound");

        Ok(Self {
            local_addr,
            detector: detector.clone(),
            shared: Arc::new(ResponderShared {
                socket,
                run: Mutex::new(None),
            }),
        })
    }

    /// Start echoing heartbeats. Fails with `AlreadyRunning` if this
    /// endpoint is already responding. Does not block.
    pub fn start_responding(&self) -> Result<()> {
        self.detector.registry().try_start_responding(self.local_addr)?;

        let token = CancellationToken::new();
        if let Some(previous) = self.shared.run_guard().replace(token.clone()) {
            previous.cancel();
        }

        let shared = Arc::clone(&self.shared);
        let addr = self.local_addr;
        tokio::spawn(async move {
            respond_loop(shared, token, addr).await;
        });

        info!(addr = %self.local_addr, "Responder started");
        Ok(())
    }

    /// Stop echoing heartbeats. Once this returns no further acks are sent,
    /// including for heartbeats already queued on the socket.
    pub fn stop_responding(&self) {
        if let Some(token) = self.shared.run_guard().take() {
            token.cancel();
            info!(addr = %self.local_addr, "Responder stopped");
        }
        self.detector
            .registry()
            .mark_responding(self.local_addr, false);
    }

    pub fn is_responding(&self) -> bool {
        self.detector
            .registry()
            .is_actively_responding(self.local_addr)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if let Some(token) = self.shared.run_guard().take() {
            token.cancel();
        }
        self.detector.registry().release(self.local_addr);
    }
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("local_addr", &self.local_addr)
            .field("responding", &self.is_responding())
            .finish()
    }
}

async fn respond_loop(shared: Arc<ResponderShared>, token: CancellationToken, addr: SocketAddr) {
    let mut buf = [0u8; RECV_BUF_SIZE];

    loop {
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            result = shared.socket.recv_from(&mut buf) => result,
        };

        match result {
            Ok((len, from)) => {
                let Some(heartbeat) = Heartbeat::deserialize(&buf[..len]) else {
                    trace!(len = len, from = %from, "Ignoring datagram of wrong size");
                    continue;
                };
                if !shared.send_ack(&token, heartbeat, from).await {
                    break;
                }
            }
            Err(e) => {
                // ICMP port-unreachable from an earlier ack surfaces here on
                // some platforms; it says nothing about this endpoint.
                debug!(addr = %addr, error = %e, "Responder receive error");
            }
        }
    }

    debug!(addr = %addr, "Responder loop exited");
}
