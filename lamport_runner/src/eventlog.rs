// lamport_runner/src/eventlog.rs
//! Append-only, line-per-record event log.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use tracing::debug;

use crate::error::NodeError;
use crate::event::EventRecord;

/// Writes each record as one JSON line and flushes before returning, so a
/// concurrent reader sees it at once and a crash loses nothing already
/// appended.
#[derive(Debug)]
pub struct EventLogSink<W: Write> {
    writer: W,
    records_written: u64,
}

impl EventLogSink<File> {
    /// Truncates any previous log at `path`.
    pub fn create(path: &Path) -> Result<Self, NodeError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|source| NodeError::LogOpen {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(path = %path.display(), "event log opened");
        Ok(Self::new(file))
    }
}

impl<W: Write> EventLogSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            records_written: 0,
        }
    }

    pub fn append(&mut self, record: &EventRecord) -> Result<(), NodeError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.writer.write_all(&line)?;
        self.writer.flush()?;
        self.records_written += 1;
        Ok(())
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }
}
