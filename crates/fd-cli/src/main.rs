mod config;
mod selftest;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args as ClapArgs, Parser, Subcommand};
use fd_detector::{Detector, DetectorConfig, FailureChannel, Monitor, Responder};
use serde_json::json;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "fdetect", about = "UDP heartbeat failure detector")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Print failure notifications as JSON lines
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Answer heartbeats on a local address until interrupted
    Respond {
        /// Local address to listen on
        #[arg(short, long, default_value = "127.0.0.1:6666")]
        listen: SocketAddr,
    },
    /// Monitor one remote responder and report failures
    Monitor {
        /// Local address to send heartbeats from
        #[arg(long, default_value = "0.0.0.0:0")]
        local: SocketAddr,
        /// Responder to monitor
        #[arg(long)]
        remote: SocketAddr,
        /// Epoch nonce for this run (-1 is reserved)
        #[arg(long, env = "FDETECT_EPOCH", allow_hyphen_values = true)]
        epoch: i64,
        /// Consecutive lost heartbeats before the peer is declared failed
        #[arg(short, long, default_value_t = fd_protocol::DEFAULT_LOSS_THRESHOLD)]
        threshold: u32,
        /// Printable name for this monitor
        #[arg(short, long)]
        name: Option<String>,
        #[command(flatten)]
        tuning: Tuning,
    },
    /// Start every responder and monitor listed in a config file
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "config/fdetect.toml")]
        config: PathBuf,
    },
    /// Run the loopback self-test (responder on :6666, monitor on :4567)
    Selftest,
}

#[derive(ClapArgs, Debug)]
struct Tuning {
    /// Ack wait before the first round trip is measured
    #[arg(long, default_value_t = fd_protocol::DEFAULT_INITIAL_TIMEOUT_MS)]
    initial_timeout_ms: u64,
    /// Lower bound on the adaptive ack wait
    #[arg(long, default_value_t = fd_protocol::DEFAULT_MIN_TIMEOUT_MS)]
    min_timeout_ms: u64,
    /// Minimum spacing between heartbeats while the peer answers
    #[arg(long, default_value_t = fd_protocol::DEFAULT_HEARTBEAT_INTERVAL_MS)]
    interval_ms: u64,
}

impl Tuning {
    fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            initial_timeout: Duration::from_millis(self.initial_timeout_ms),
            min_timeout: Duration::from_millis(self.min_timeout_ms),
            heartbeat_interval: Duration::from_millis(self.interval_ms),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Respond { listen } => {
            let detector = Detector::new();
            let responder = Responder::bind(&detector, listen)?;
            responder.start_responding()?;
            info!(addr = %responder.local_addr(), "Responding to heartbeats, Ctrl-C to stop");

            tokio::signal::ctrl_c().await?;
            responder.stop_responding();
        }
        Commands::Monitor { local, remote, epoch, threshold, name, tuning } => {
            let detector = Detector::with_config(tuning.detector_config())?;
            let failures = detector.initialize(epoch)?;

            let name = name.unwrap_or_else(|| format!("monitor of {}", remote));
            let monitor = Monitor::new(&detector, local, remote, name)?;
            monitor.start_monitoring(threshold)?;

            report_failures(&failures, args.json).await?;
            detector.stop_monitoring_all();
        }
        Commands::Run { config } => {
            let config = config::load(&config).await?;
            let detector = Detector::with_config(config.detector.detector_config())?;
            let failures = detector.initialize(config.detector.epoch)?;

            info!(
                epoch = config.detector.epoch,
                responders = config.responders.len(),
                monitors = config.monitors.len(),
                "fdetect starting"
            );

            let mut responders = Vec::with_capacity(config.responders.len());
            for section in &config.responders {
                let responder = Responder::bind(&detector, section.listen)?;
                responder.start_responding()?;
                responders.push(responder);
            }

            let mut monitors = Vec::with_capacity(config.monitors.len());
            for section in &config.monitors {
                let monitor =
                    Monitor::new(&detector, section.local, section.remote, section.display_name())?;
                monitor.start_monitoring(section.threshold)?;
                monitors.push(monitor);
            }

            report_failures(&failures, args.json).await?;

            info!("Shutting down...");
            detector.stop_monitoring_all();
            for responder in &responders {
                responder.stop_responding();
            }
        }
        Commands::Selftest => {
            if let Err(e) = selftest::run().await {
                error!("Self-test failed: {:#}", e);
                println!("  [FAIL] {:#}", e);
                return Err(e);
            }
            println!("  [PASS]");
        }
    }

    Ok(())
}

/// Print every failure notification until Ctrl-C.
async fn report_failures(failures: &FailureChannel, as_json: bool) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            failed = failures.recv() => {
                let Some(monitor) = failed else { return Ok(()) };
                print_failure(&monitor, as_json);
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                return Ok(());
            }
        }
    }
}

fn print_failure(monitor: &Monitor, as_json: bool) {
    if as_json {
        let event = json!({
            "event": "peer_failed",
            "monitor": monitor.name(),
            "local": monitor.local_addr().to_string(),
            "remote": monitor.remote_addr().to_string(),
            "threshold": monitor.threshold(),
            "failures_declared": monitor.failures_declared(),
            "rtt_ms": monitor.rtt_estimate().map(|d| d.as_millis() as u64),
        });
        println!("{}", event);
    } else {
        println!(
            "peer failed: {} ({}), {} failure(s) so far",
            monitor.name(),
            monitor.remote_addr(),
            monitor.failures_declared()
        );
    }
}
