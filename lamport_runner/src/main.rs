// lamport_runner/src/main.rs
//! Run a single node.
//!
//! ```text
//! lamport_runner --id 1 --port 5001 --peers localhost:5002,localhost:5003 \
//!     --log logs/machine_1.log --duration 60
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use lamport_runner::config::{load_scheduler_tuning, parse_peer_list, ClockRatePolicy, NodeConfig};
use lamport_runner::node::Node;
use lamport_runner::telemetry;
use tokio::runtime::Builder;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "lamport_runner", about = "Run a single Lamport-clock node")]
struct Args {
    /// Positive machine id
    #[arg(long)]
    id: u32,

    /// TCP port to listen on
    #[arg(long)]
    port: u16,

    /// Comma-separated host:port list of peers
    #[arg(long, default_value = "")]
    peers: String,

    /// Event log path (truncated on start)
    #[arg(long, default_value = "machine.log")]
    log: PathBuf,

    /// Seconds to run before shutting down
    #[arg(long, default_value_t = 60)]
    duration: u64,

    /// Pin the tick rate instead of drawing it at random
    #[arg(long)]
    clock_rate: Option<u32>,

    /// Seed for the clock-rate draw and action choices
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<(), String> {
    let args = Args::parse();
    let runtime = Builder::new_multi_thread()
        .enable_all()
        .thread_name("lamport-node")
        .build()
        .map_err(|e| format!("failed to build tokio runtime: {}", e))?;
    runtime.block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<(), String> {
    telemetry::init_tracing("info");

    if telemetry::metrics_enabled() {
        if let Err(e) = telemetry::init_metrics(args.id) {
            warn!("failed to initialize metrics exporter: {}", e);
        }
    }

    let peers = parse_peer_list(&args.peers)?;
    let mut config = NodeConfig::new(
        args.id,
        args.port,
        peers,
        args.log,
        Duration::from_secs(args.duration),
    );
    config = load_scheduler_tuning().apply(config);
    if let Some(rate) = args.clock_rate {
        config = config.with_clock_rate(ClockRatePolicy::Fixed(rate));
    }
    if let Some(seed) = args.seed {
        config = config.with_rng_seed(seed);
    }

    let node = Node::bind(config)
        .await
        .map_err(|e| format!("machine {} failed to start: {}", args.id, e))?;
    let report = node
        .run()
        .await
        .map_err(|e| format!("machine {} aborted: {}", args.id, e))?;

    info!(
        machine_id = report.machine_id,
        clock_rate = report.clock_rate,
        final_clock = report.final_clock,
        "machine exited cleanly"
    );
    Ok(())
}
