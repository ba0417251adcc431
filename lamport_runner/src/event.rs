//! Event records written to the per-node event log.
//!
//! The JSON field names and the `event` tag values are read by the log
//! analysis; keep them stable.

use serde::{Deserialize, Serialize};

use crate::clock::ClockTransition;
use crate::config::PeerAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Startup,
    Send,
    Receive,
    Internal,
    End,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Startup => "STARTUP",
            EventKind::Send => "SEND",
            EventKind::Receive => "RECEIVE",
            EventKind::Internal => "INTERNAL",
            EventKind::End => "END",
        }
    }
}

/// One node state transition. Created once, written once, never mutated.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventRecord {
    Startup {
        system_time: f64,
        machine_id: u32,
        clock_rate: u32,
    },
    Send {
        system_time: f64,
        machine_id: u32,
        old_clock: u64,
        new_clock: u64,
        recipients: Vec<PeerAddr>,
    },
    Receive {
        system_time: f64,
        machine_id: u32,
        old_clock: u64,
        new_clock: u64,
        queue_len: usize,
    },
    Internal {
        system_time: f64,
        machine_id: u32,
        old_clock: u64,
        new_clock: u64,
    },
    End {
        system_time: f64,
        machine_id: u32,
        final_clock: u64,
    },
}

impl EventRecord {
    pub fn send(
        system_time: f64,
        machine_id: u32,
        t: ClockTransition,
        recipients: Vec<PeerAddr>,
    ) -> Self {
        EventRecord::Send {
            system_time,
            machine_id,
            old_clock: t.old,
            new_clock: t.new,
            recipients,
        }
    }

    pub fn receive(system_time: f64, machine_id: u32, t: ClockTransition, queue_len: usize) -> Self {
        EventRecord::Receive {
            system_time,
            machine_id,
            old_clock: t.old,
            new_clock: t.new,
            queue_len,
        }
    }

    pub fn internal(system_time: f64, machine_id: u32, t: ClockTransition) -> Self {
        EventRecord::Internal {
            system_time,
            machine_id,
            old_clock: t.old,
            new_clock: t.new,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            EventRecord::Startup { .. } => EventKind::Startup,
            EventRecord::Send { .. } => EventKind::Send,
            EventRecord::Receive { .. } => EventKind::Receive,
            EventRecord::Internal { .. } => EventKind::Internal,
            EventRecord::End { .. } => EventKind::End,
        }
    }

    pub fn system_time(&self) -> f64 {
        match self {
            EventRecord::Startup { system_time, .. }
            | EventRecord::Send { system_time, .. }
            | EventRecord::Receive { system_time, .. }
            | EventRecord::Internal { system_time, .. }
            | EventRecord::End { system_time, .. } => *system_time,
        }
    }

    pub fn machine_id(&self) -> u32 {
        match self {
            EventRecord::Startup { machine_id, .. }
            | EventRecord::Send { machine_id, .. }
            | EventRecord::Receive { machine_id, .. }
            | EventRecord::Internal { machine_id, .. }
            | EventRecord::End { machine_id, .. } => *machine_id,
        }
    }

    /// `(old_clock, new_clock)` for SEND, RECEIVE and INTERNAL.
    pub fn clocks(&self) -> Option<(u64, u64)> {
        match self {
            EventRecord::Send {
                old_clock,
                new_clock,
                ..
            }
            | EventRecord::Receive {
                old_clock,
                new_clock,
                ..
            }
            | EventRecord::Internal {
                old_clock,
                new_clock,
                ..
            } => Some((*old_clock, *new_clock)),
            _ => None,
        }
    }
}
