// lamport_runner/src/telemetry.rs
//! Diagnostic logging and the optional Prometheus exporter.
//!
//! Diagnostics go through `tracing`; the event log proper is written by
//! [`crate::eventlog`] and is unaffected by the filter set here.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;
use metrics_util::MetricKindMask;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` overrides `default_filter`.
/// A second call is harmless.
pub fn init_tracing(default_filter: &str) {
    let result = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(
            fmt::layer()
                .with_writer(std::io::stdout)
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(true),
        )
        .try_init();

    match result {
        Ok(_) => info!("logging initialized"),
        Err(_) => warn!("logging already initialized, skipping"),
    }
}

pub fn metrics_enabled() -> bool {
    std::env::var("LAMPORT_METRICS_ENABLE")
        .map(|v| matches!(v.trim(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn resolve_listener(machine_id: u32) -> Result<SocketAddr, String> {
    if let Ok(addr) = std::env::var("LAMPORT_METRICS_LISTEN_ADDR") {
        return addr
            .parse()
            .map_err(|e| format!("invalid LAMPORT_METRICS_LISTEN_ADDR '{}': {}", addr, e));
    }

    let default_port = u16::try_from(machine_id)
        .map(|id| 9890u16.saturating_add(id))
        .unwrap_or(9890);
    let port = std::env::var("LAMPORT_METRICS_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(default_port);

    format!("0.0.0.0:{}", port)
        .parse()
        .map_err(|e| format!("unable to parse metrics listen addr: {}", e))
}

/// Start the Prometheus exporter. Must run inside a tokio runtime.
pub fn init_metrics(machine_id: u32) -> Result<(), String> {
    let listen_addr = resolve_listener(machine_id)?;

    PrometheusBuilder::new()
        .idle_timeout(MetricKindMask::ALL, None)
        .with_http_listener(listen_addr)
        .install()
        .map_err(|e| format!("failed to start Prometheus exporter on {}: {}", listen_addr, e))?;
    info!(%listen_addr, "Prometheus metrics exporter started");

    metrics::describe_gauge!("lamport.clock", "Current Lamport clock value");
    metrics::describe_gauge!(
        "lamport.queue_len",
        "Received timestamps waiting for the scheduler"
    );
    metrics::describe_counter!("lamport.events", "Logged events by kind");
    metrics::describe_counter!("lamport.failed_sends", "Outbound sends that did not complete");
    metrics::describe_counter!(
        "lamport.malformed_lines",
        "Inbound lines discarded as non-numeric"
    );
    Ok(())
}
