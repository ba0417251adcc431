use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::event::EventKind;

/// Per-node counters, shared between the scheduler, the listener and every
/// connection handler. Each update also feeds the metrics recorder, which is
/// a no-op unless the Prometheus exporter was installed.
#[derive(Debug)]
pub struct NodeStats {
    node_label: String,
    sends: AtomicU64,
    failed_sends: AtomicU64,
    receives: AtomicU64,
    internals: AtomicU64,
    connections_accepted: AtomicU64,
    messages_enqueued: AtomicU64,
    malformed_lines: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub sends: u64,
    pub failed_sends: u64,
    pub receives: u64,
    pub internals: u64,
    pub connections_accepted: u64,
    pub messages_enqueued: u64,
    pub malformed_lines: u64,
}

impl NodeStats {
    pub fn new(machine_id: u32) -> Self {
        Self {
            node_label: machine_id.to_string(),
            sends: AtomicU64::new(0),
            failed_sends: AtomicU64::new(0),
            receives: AtomicU64::new(0),
            internals: AtomicU64::new(0),
            connections_accepted: AtomicU64::new(0),
            messages_enqueued: AtomicU64::new(0),
            malformed_lines: AtomicU64::new(0),
        }
    }

    pub fn record_event(&self, kind: EventKind, clock: u64) {
        let counter = match kind {
            EventKind::Send => Some(&self.sends),
            EventKind::Receive => Some(&self.receives),
            EventKind::Internal => Some(&self.internals),
            EventKind::Startup | EventKind::End => None,
        };
        if let Some(counter) = counter {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        metrics::counter!(
            "lamport.events",
            "node" => self.node_label.clone(),
            "kind" => kind.as_str()
        )
        .increment(1);
        metrics::gauge!("lamport.clock", "node" => self.node_label.clone()).set(clock as f64);
    }

    pub fn record_failed_send(&self) {
        self.failed_sends.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("lamport.failed_sends", "node" => self.node_label.clone()).increment(1);
    }

    pub fn record_connection(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_enqueued(&self, queue_len: usize) {
        self.messages_enqueued.fetch_add(1, Ordering::Relaxed);
        self.record_queue_len(queue_len);
    }

    pub fn record_queue_len(&self, queue_len: usize) {
        metrics::gauge!("lamport.queue_len", "node" => self.node_label.clone())
            .set(queue_len as f64);
    }

    pub fn record_malformed(&self) {
        self.malformed_lines.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("lamport.malformed_lines", "node" => self.node_label.clone())
            .increment(1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sends: self.sends.load(Ordering::Relaxed),
            failed_sends: self.failed_sends.load(Ordering::Relaxed),
            receives: self.receives.load(Ordering::Relaxed),
            internals: self.internals.load(Ordering::Relaxed),
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            messages_enqueued: self.messages_enqueued.load(Ordering::Relaxed),
            malformed_lines: self.malformed_lines.load(Ordering::Relaxed),
        }
    }
}
