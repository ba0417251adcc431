// lamport_runner/src/cluster.rs
//! Launch several nodes in one process for local experiments.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::future::join_all;
use tracing::{info, warn};

use crate::config::{NodeConfig, PeerAddr};
use crate::error::NodeError;
use crate::node::{Node, NodeReport};

pub fn log_file_name(machine_id: u32) -> String {
    format!("machine_{}.log", machine_id)
}

/// Configs for `count` nodes on consecutive ports, ids from 1, each peered
/// with every other node. Fails if the ports would run past 65535.
pub fn full_mesh(
    count: u32,
    host: &str,
    base_port: u16,
    log_dir: &Path,
    run_duration: Duration,
) -> Result<Vec<NodeConfig>, NodeError> {
    let last_port = u64::from(base_port) + u64::from(count.saturating_sub(1));
    if last_port > u64::from(u16::MAX) {
        return Err(NodeError::InvalidConfig(format!(
            "{} nodes from base port {} need ports up to {}",
            count, base_port, last_port
        )));
    }
    let ports: Vec<u16> = (0..count)
        .filter_map(|i| u16::try_from(u32::from(base_port) + i).ok())
        .collect();
    let configs = (1..=count)
        .zip(ports.iter().copied())
        .map(|(id, port)| {
            let peers = ports
                .iter()
                .filter(|p| **p != port)
                .map(|p| PeerAddr::new(host, *p))
                .collect();
            NodeConfig::new(id, port, peers, log_dir.join(log_file_name(id)), run_duration)
                .with_listen_host(IpAddr::V4(Ipv4Addr::LOCALHOST))
        })
        .collect();
    Ok(configs)
}

/// Create `<logs_root>/run_<stamp>` for one cluster run.
pub fn create_run_dir(logs_root: &Path) -> std::io::Result<PathBuf> {
    let dir = logs_root.join(format!("run_{}", crate::utils::run_stamp()));
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Bind every node first so no early send hits a closed port, then run them
/// all concurrently. Any bind failure aborts the whole cluster before a node
/// starts ticking.
pub async fn run_cluster(configs: Vec<NodeConfig>) -> Result<Vec<NodeReport>, NodeError> {
    let mut nodes = Vec::with_capacity(configs.len());
    for config in configs {
        nodes.push(Node::bind(config).await?);
    }
    info!(nodes = nodes.len(), "cluster bound, starting nodes");

    let handles: Vec<_> = nodes
        .into_iter()
        .map(|node| tokio::spawn(node.run()))
        .collect();

    let mut reports = Vec::with_capacity(handles.len());
    let mut first_error = None;
    for joined in join_all(handles).await {
        match joined {
            Ok(Ok(report)) => reports.push(report),
            Ok(Err(e)) => {
                warn!(error = %e, "node failed");
                first_error.get_or_insert(e);
            }
            Err(e) => {
                first_error.get_or_insert(NodeError::Task(e.to_string()));
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(reports),
    }
}
