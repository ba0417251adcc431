// lamport_runner/src/bin/run_cluster.rs
//! Launch a full-mesh cluster of local nodes in one process, then summarize
//! their logs.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use lamport_runner::analysis;
use lamport_runner::cluster::{create_run_dir, full_mesh, log_file_name, run_cluster};
use lamport_runner::config::{load_scheduler_tuning, ClockRatePolicy};
use lamport_runner::telemetry;
use tokio::runtime::Builder;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "run_cluster", about = "Run several Lamport-clock nodes locally")]
struct Args {
    /// Number of nodes
    #[arg(long, default_value_t = 3)]
    nodes: u32,

    /// Port of node 1; node i listens on base_port + i - 1
    #[arg(long, default_value_t = 5001)]
    base_port: u16,

    /// Host the nodes use to reach each other
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Root directory; each run gets its own run_<timestamp> folder
    #[arg(long, default_value = "logs")]
    logs_dir: PathBuf,

    /// Seconds each node runs
    #[arg(long, default_value_t = 60)]
    duration: u64,

    /// Comma-separated fixed tick rates, one per node (e.g. 6,2,3)
    #[arg(long, value_delimiter = ',')]
    clock_rates: Vec<u32>,
}

fn main() -> Result<(), String> {
    let args = Args::parse();
    let runtime = Builder::new_multi_thread()
        .enable_all()
        .thread_name("lamport-cluster")
        .build()
        .map_err(|e| format!("failed to build tokio runtime: {}", e))?;
    runtime.block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<(), String> {
    telemetry::init_tracing("info");

    if args.nodes == 0 {
        return Err("--nodes must be at least 1".to_string());
    }
    if !args.clock_rates.is_empty() && args.clock_rates.len() != args.nodes as usize {
        return Err(format!(
            "--clock-rates lists {} rates for {} nodes",
            args.clock_rates.len(),
            args.nodes
        ));
    }

    let run_dir = create_run_dir(&args.logs_dir)
        .map_err(|e| format!("failed to create run directory: {}", e))?;
    info!(run_dir = %run_dir.display(), nodes = args.nodes, "launching cluster");

    let tuning = load_scheduler_tuning();
    let configs: Vec<_> = full_mesh(
        args.nodes,
        &args.host,
        args.base_port,
        &run_dir,
        Duration::from_secs(args.duration),
    )
    .map_err(|e| e.to_string())?
    .into_iter()
    .enumerate()
    .map(|(i, config)| {
        let config = tuning.apply(config);
        match args.clock_rates.get(i) {
            Some(rate) => config.with_clock_rate(ClockRatePolicy::Fixed(*rate)),
            None => config,
        }
    })
    .collect();

    let reports = run_cluster(configs).await.map_err(|e| e.to_string())?;
    for report in &reports {
        info!(
            machine_id = report.machine_id,
            clock_rate = report.clock_rate,
            final_clock = report.final_clock,
            sends = report.stats.sends,
            receives = report.stats.receives,
            "node report"
        );
    }

    let logs: Vec<PathBuf> = (1..=args.nodes)
        .map(|id| run_dir.join(log_file_name(id)))
        .collect();
    match analysis::load_logs(&logs) {
        Ok(records) => {
            let summary = analysis::summarize(&records);
            println!("{}", summary.to_markdown());
            for violation in analysis::verify(&records) {
                warn!(
                    machine_id = violation.machine_id,
                    "invariant violated: {}", violation.message
                );
            }
        }
        Err(e) => warn!("could not analyze logs: {}", e),
    }
    Ok(())
}
