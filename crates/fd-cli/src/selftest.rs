/// Loopback self-test.
///
/// Monitors a responder in the same process: with the responder up no
/// failure may be reported; once it stops, re-arming the monitor with a
/// threshold of 2 must produce exactly one failure.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use fd_detector::{Monitor, Responder};
use tracing::info;

const EPOCH: i64 = 2020;
const ROUNDS: u64 = 10;

pub async fn run() -> anyhow::Result<()> {
    let localhost = IpAddr::V4(Ipv4Addr::LOCALHOST);
    let responder_addr = SocketAddr::new(localhost, fd_protocol::DEFAULT_RESPONDER_PORT);
    let monitor_addr = SocketAddr::new(localhost, fd_protocol::DEFAULT_MONITOR_PORT);

    let detector = fd_detector::global();
    let failures = fd_detector::initialize_monitor(EPOCH)?;

    let responder = Responder::bind(detector, responder_addr)
        .with_context(|| format!("binding responder on {responder_addr}"))?;
    responder.start_responding()?;

    let monitor = Monitor::new(
        detector,
        monitor_addr,
        responder_addr,
        format!("TestMonitor of localhost:{}", responder_addr.port()),
    )
    .with_context(|| format!("binding monitor on {monitor_addr}"))?;
    monitor.start_monitoring(fd_protocol::DEFAULT_LOSS_THRESHOLD)?;

    println!("fdetect self-test");
    println!("══════════════════════════════");
    println!("  Monitor:   {}", monitor.name());
    println!("  Epoch:     {}", EPOCH);

    // Phase 1: live responder
    let started = Instant::now();
    while monitor.acks_received() < ROUNDS {
        if let Some(failed) = failures.try_recv() {
            bail!("{} reported a failure while the responder was up", failed.name());
        }
        if started.elapsed() > Duration::from_secs(10) {
            bail!("only {} of {} rounds acknowledged", monitor.acks_received(), ROUNDS);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    println!(
        "  [ok] {} rounds, no failure (rtt ≈ {:?})",
        monitor.acks_received(),
        monitor.rtt_estimate().unwrap_or_default()
    );

    // Phase 2: responder gone
    responder.stop_responding();
    monitor.start_monitoring(2)?;
    info!("Responder stopped, waiting for the failure notification");

    let Some(failed) = failures.recv_timeout(Duration::from_secs(10)).await else {
        bail!("no failure reported after the responder stopped");
    };
    if failed != monitor {
        bail!("unexpected monitor {} reported", failed.name());
    }
    println!("  [ok] failure reported for {}", failed.name());

    if let Some(extra) = failures.recv_timeout(Duration::from_millis(500)).await {
        bail!("second failure reported too early for {}", extra.name());
    }
    println!("  [ok] exactly one failure, monitor still armed: {}", monitor.is_monitoring());

    fd_detector::stop_monitoring_all();
    Ok(())
}
