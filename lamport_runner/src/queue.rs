// lamport_runner/src/queue.rs
//! Incoming timestamp queue shared by connection handlers and the scheduler.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::queue::SegQueue;

/// Unbounded multi-producer FIFO of raw received timestamps.
///
/// Producers never block. The length counter is bumped after the push and
/// dropped after the pop, so with a single consumer it never exceeds the
/// number of entries actually present.
#[derive(Debug, Default)]
pub struct IncomingQueue {
    entries: SegQueue<u64>,
    len: AtomicUsize,
}

impl IncomingQueue {
    pub fn new() -> Self {
        Self {
            entries: SegQueue::new(),
            len: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, timestamp: u64) {
        self.entries.push(timestamp);
        self.len.fetch_add(1, Ordering::AcqRel);
    }

    /// Oldest entry plus the queue length observed right after removing it.
    pub fn pop(&self) -> Option<(u64, usize)> {
        let timestamp = self.entries.pop()?;
        let remaining = self.len.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
        Some((timestamp, remaining))
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
