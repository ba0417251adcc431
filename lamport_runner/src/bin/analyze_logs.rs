// lamport_runner/src/bin/analyze_logs.rs
//! Summarize node event logs and write `analysis_summary.md` next to them.

use std::path::PathBuf;

use clap::Parser;
use lamport_runner::analysis;
use lamport_runner::telemetry;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "analyze_logs", about = "Summarize Lamport node event logs")]
struct Args {
    /// Event log files, e.g. logs/run_*/machine_*.log
    #[arg(required = true)]
    logs: Vec<PathBuf>,

    /// Where to write the Markdown report (default: beside the first log)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Exit non-zero if any invariant is violated
    #[arg(long)]
    strict: bool,
}

fn main() -> Result<(), String> {
    telemetry::init_tracing("warn");
    let args = Args::parse();

    let records = analysis::load_logs(&args.logs).map_err(|e| e.to_string())?;
    let summary = analysis::summarize(&records);
    let violations = analysis::verify(&records);

    let mut report = summary.to_markdown();
    if !violations.is_empty() {
        report.push_str("\n## Invariant Violations\n\n");
        for v in &violations {
            report.push_str(&format!("- machine {}: {}\n", v.machine_id, v.message));
        }
    }

    let output = args.output.unwrap_or_else(|| {
        args.logs[0]
            .parent()
            .map(|dir| dir.join("analysis_summary.md"))
            .unwrap_or_else(|| PathBuf::from("analysis_summary.md"))
    });
    std::fs::write(&output, &report)
        .map_err(|e| format!("failed to write {}: {}", output.display(), e))?;

    print!("{}", report);
    info!(output = %output.display(), records = records.len(), "analysis written");

    if !violations.is_empty() {
        warn!(count = violations.len(), "invariant violations found");
        if args.strict {
            return Err(format!("{} invariant violations", violations.len()));
        }
    }
    Ok(())
}
