// lamport_runner/src/node.rs
//! One node's lifecycle: bind, run, shut down.

use std::fs::File;
use std::net::SocketAddr;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info};

use crate::config::{NodeConfig, PeerAddr};
use crate::error::NodeError;
use crate::eventlog::EventLogSink;
use crate::network::{bind_listener, run_listener, InboundContext, NetworkSender};
use crate::queue::IncomingQueue;
use crate::scheduler::{Scheduler, SchedulerParts};
use crate::stats::{NodeStats, StatsSnapshot};

/// What a node reports once it has stopped.
#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub machine_id: u32,
    pub clock_rate: u32,
    pub final_clock: u64,
    pub stats: StatsSnapshot,
}

/// A node whose fatal startup steps (log open, port bind) have succeeded.
pub struct Node {
    config: NodeConfig,
    clock_rate: u32,
    listener: TcpListener,
    local_addr: SocketAddr,
    sink: EventLogSink<File>,
    rng: StdRng,
}

impl Node {
    /// Validate the config, open the event log and bind the listen port.
    /// Nothing is written and no connection is accepted until [`Node::run`].
    pub async fn bind(config: NodeConfig) -> Result<Self, NodeError> {
        config.validate()?;

        let mut rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let clock_rate = config.clock_rate.resolve(&mut rng);

        let sink = EventLogSink::create(&config.log_path)?;

        let addr = SocketAddr::new(config.listen_host, config.listen_port);
        let listener = bind_listener(addr).map_err(|source| NodeError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| NodeError::Bind { addr, source })?;

        info!(
            machine_id = config.machine_id,
            %local_addr,
            clock_rate,
            log = %config.log_path.display(),
            "node bound"
        );
        Ok(Self {
            config,
            clock_rate,
            listener,
            local_addr,
            sink,
            rng,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    pub fn machine_id(&self) -> u32 {
        self.config.machine_id
    }

    /// Run for the configured duration and shut down cleanly.
    ///
    /// STARTUP is written before the listener starts; END is written after
    /// the listening socket is closed and every handler has exited.
    pub async fn run(self) -> Result<NodeReport, NodeError> {
        let Node {
            config,
            clock_rate,
            listener,
            local_addr: _,
            sink,
            rng,
        } = self;
        let machine_id = config.machine_id;
        let queue = Arc::new(IncomingQueue::new());
        let stats = Arc::new(NodeStats::new(machine_id));
        let peers: Arc<[PeerAddr]> = config.peers.clone().into();

        let mut scheduler = Scheduler::start(SchedulerParts {
            machine_id,
            clock_rate,
            peers,
            weights: config.action_weights,
            queue: Arc::clone(&queue),
            sender: NetworkSender::new(config.io_timeout),
            sink,
            stats: Arc::clone(&stats),
            rng,
        })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let listener_task = tokio::spawn(run_listener(
            listener,
            InboundContext {
                machine_id,
                queue: Arc::clone(&queue),
                stats: Arc::clone(&stats),
                shutdown: shutdown_rx,
                poll_interval: config.io_poll_interval,
            },
        ));

        let deadline = Instant::now() + config.run_duration;
        let outcome = scheduler.run_until(deadline).await;

        let _ = shutdown_tx.send(true);
        if let Err(e) = listener_task.await {
            error!(machine_id, error = %e, "listener task failed");
        }

        if let Err(e) = outcome {
            error!(machine_id, error = %e, "scheduler aborted");
            return Err(e);
        }
        let final_clock = scheduler.finish()?;

        let report = NodeReport {
            machine_id,
            clock_rate,
            final_clock,
            stats: stats.snapshot(),
        };
        info!(
            machine_id,
            final_clock,
            unprocessed = queue.len(),
            sends = report.stats.sends,
            failed_sends = report.stats.failed_sends,
            receives = report.stats.receives,
            internals = report.stats.internals,
            malformed = report.stats.malformed_lines,
            "node finished"
        );
        Ok(report)
    }
}
