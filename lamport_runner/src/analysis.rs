// lamport_runner/src/analysis.rs
//! Offline analysis of event logs from one or more nodes.
//!
//! Reads the JSON-lines logs, merges them by `system_time`, and derives
//! per-machine summaries, global drift, and invariant violations.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::Serialize;

use crate::error::AnalysisError;
use crate::event::{EventKind, EventRecord};
use crate::utils::format_system_time_readable;

/// Parse one log file. Blank lines are ignored.
pub fn load_log(path: &Path) -> Result<Vec<EventRecord>, AnalysisError> {
    let file = File::open(path).map_err(|source| AnalysisError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut records = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|source| AnalysisError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record = serde_json::from_str(line).map_err(|source| AnalysisError::Parse {
            path: path.to_path_buf(),
            line: index + 1,
            source,
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Load several logs and merge them into one stream ordered by
/// `system_time`. Ties keep file order.
pub fn load_logs<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<EventRecord>, AnalysisError> {
    let mut all = Vec::new();
    for path in paths {
        all.extend(load_log(path.as_ref())?);
    }
    all.sort_by(|a, b| a.system_time().total_cmp(&b.system_time()));
    Ok(all)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MachineSummary {
    pub machine_id: u32,
    pub clock_rate: Option<u32>,
    pub final_clock: Option<u64>,
    /// Mean of `new_clock - old_clock` over SEND, RECEIVE and INTERNAL.
    pub avg_jump: Option<f64>,
    pub max_jump: u64,
    pub max_queue_len: usize,
    pub sends: usize,
    pub receives: usize,
    pub internals: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analysis {
    pub machines: Vec<MachineSummary>,
    /// Max minus min final clock; 0 with fewer than two finished machines.
    pub drift: u64,
    pub first_time: Option<f64>,
    pub last_time: Option<f64>,
}

pub fn summarize(records: &[EventRecord]) -> Analysis {
    let mut by_machine: BTreeMap<u32, MachineSummary> = BTreeMap::new();
    let mut jump_totals: BTreeMap<u32, (u64, usize)> = BTreeMap::new();

    for record in records {
        let id = record.machine_id();
        let summary = by_machine.entry(id).or_insert_with(|| MachineSummary {
            machine_id: id,
            clock_rate: None,
            final_clock: None,
            avg_jump: None,
            max_jump: 0,
            max_queue_len: 0,
            sends: 0,
            receives: 0,
            internals: 0,
        });
        match record {
            EventRecord::Startup { clock_rate, .. } => summary.clock_rate = Some(*clock_rate),
            EventRecord::End { final_clock, .. } => summary.final_clock = Some(*final_clock),
            EventRecord::Send { .. } => summary.sends += 1,
            EventRecord::Receive { queue_len, .. } => {
                summary.receives += 1;
                summary.max_queue_len = summary.max_queue_len.max(*queue_len);
            }
            EventRecord::Internal { .. } => summary.internals += 1,
        }
        if let Some((old, new)) = record.clocks() {
            let jump = new.saturating_sub(old);
            summary.max_jump = summary.max_jump.max(jump);
            let totals = jump_totals.entry(id).or_default();
            totals.0 += jump;
            totals.1 += 1;
        }
    }

    for (id, (sum, count)) in jump_totals {
        if let Some(summary) = by_machine.get_mut(&id) {
            summary.avg_jump = Some(sum as f64 / count as f64);
        }
    }

    let finals: Vec<u64> = by_machine.values().filter_map(|m| m.final_clock).collect();
    let drift = match (finals.iter().max(), finals.iter().min()) {
        (Some(max), Some(min)) if finals.len() > 1 => max - min,
        _ => 0,
    };

    Analysis {
        machines: by_machine.into_values().collect(),
        drift,
        first_time: records.first().map(EventRecord::system_time),
        last_time: records.last().map(EventRecord::system_time),
    }
}

impl Analysis {
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        let _ = writeln!(md, "# Analysis Summary\n");
        if let (Some(first), Some(last)) = (self.first_time, self.last_time) {
            let _ = writeln!(
                md,
                "Run window: {} to {} ({:.1} s)\n",
                format_system_time_readable(first),
                format_system_time_readable(last),
                last - first
            );
        }

        let _ = writeln!(md, "## Summary Table\n");
        let _ = writeln!(
            md,
            "| machine_id | clock_rate | final_clock | avg_jump_size | max_jump | max_queue_len | sends | receives | internals |"
        );
        let _ = writeln!(md, "|---|---|---|---|---|---|---|---|---|");
        for m in &self.machines {
            let _ = writeln!(
                md,
                "| {} | {} | {} | {} | {} | {} | {} | {} | {} |",
                m.machine_id,
                opt(m.clock_rate),
                opt(m.final_clock),
                m.avg_jump
                    .map(|j| format!("{:.3}", j))
                    .unwrap_or_else(|| "n/a".into()),
                m.max_jump,
                m.max_queue_len,
                m.sends,
                m.receives,
                m.internals
            );
        }
        let _ = writeln!(
            md,
            "\n**Final Drift (max - min final_clock)**: {}",
            self.drift
        );
        md
    }
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "n/a".into())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub machine_id: u32,
    pub message: String,
}

/// Check one machine's invariants over a merged record stream:
/// one STARTUP first, one END last, clocks strictly increasing and
/// contiguous, +1 for SEND/INTERNAL, END matching the last clock.
pub fn verify(records: &[EventRecord]) -> Vec<Violation> {
    let mut per_machine: BTreeMap<u32, Vec<&EventRecord>> = BTreeMap::new();
    for record in records {
        per_machine.entry(record.machine_id()).or_default().push(record);
    }

    let mut violations = Vec::new();
    for (machine_id, events) in per_machine {
        let mut flag = |message: String| violations.push(Violation { machine_id, message });

        let startups = events.iter().filter(|r| r.kind() == EventKind::Startup).count();
        let ends = events.iter().filter(|r| r.kind() == EventKind::End).count();
        if startups != 1 {
            flag(format!("expected one STARTUP, found {}", startups));
        }
        if ends != 1 {
            flag(format!("expected one END, found {}", ends));
        }
        if events.first().map(|r| r.kind()) != Some(EventKind::Startup) {
            flag("first record is not STARTUP".into());
        }
        if events.last().map(|r| r.kind()) != Some(EventKind::End) {
            flag("last record is not END".into());
        }

        let mut current = 0u64;
        for record in &events {
            if let Some((old, new)) = record.clocks() {
                if old != current {
                    flag(format!(
                        "{} at {:.6} starts from {} but clock was {}",
                        record.kind().as_str(),
                        record.system_time(),
                        old,
                        current
                    ));
                }
                if new <= old {
                    flag(format!(
                        "{} at {:.6} did not advance ({} -> {})",
                        record.kind().as_str(),
                        record.system_time(),
                        old,
                        new
                    ));
                }
                let unit_step = matches!(record.kind(), EventKind::Send | EventKind::Internal);
                if unit_step && new != old + 1 {
                    flag(format!(
                        "{} at {:.6} jumped by {}",
                        record.kind().as_str(),
                        record.system_time(),
                        new.saturating_sub(old)
                    ));
                }
                current = new;
            }
            if let EventRecord::End { final_clock, .. } = record {
                if *final_clock != current {
                    flag(format!(
                        "END reports {} but last clock was {}",
                        final_clock, current
                    ));
                }
            }
        }
    }
    violations
}
