// lamport_runner/src/wire.rs
//! Newline-delimited decimal timestamps.
//!
//! No framing beyond `\n`: a read may carry any number of whole lines plus a
//! trailing fragment, which is held until its delimiter arrives.

use crate::error::WireError;

/// A timestamp line longer than this is garbage; the fragment is dropped.
pub const MAX_LINE_LEN: usize = 64;

/// Largest timestamp accepted from a peer. Keeps `max(local, received) + 1`
/// and every later increment far from `u64::MAX`.
pub const MAX_TIMESTAMP: u64 = u64::MAX / 2;

pub fn encode(clock: u64) -> Vec<u8> {
    format!("{}\n", clock).into_bytes()
}

#[derive(Debug, Default)]
pub struct LineDecoder {
    pending: Vec<u8>,
    discarding: bool,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one read's worth of bytes and return every line it completed.
    /// Blank lines are skipped.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<u64, WireError>> {
        let mut out = Vec::new();
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            rest = &tail[1..];
            if self.discarding {
                self.discarding = false;
                self.pending.clear();
                continue;
            }
            if self.pending.len() + head.len() > MAX_LINE_LEN {
                self.pending.clear();
                out.push(Err(WireError::LineTooLong(MAX_LINE_LEN)));
                continue;
            }
            self.pending.extend_from_slice(head);
            if let Some(parsed) = self.take_line() {
                out.push(parsed);
            }
        }

        if !self.discarding {
            self.pending.extend_from_slice(rest);
            if self.pending.len() > MAX_LINE_LEN {
                self.pending.clear();
                self.discarding = true;
                out.push(Err(WireError::LineTooLong(MAX_LINE_LEN)));
            }
        }
        out
    }

    /// Connection closed: a fragment without its delimiter still counts.
    pub fn finish(&mut self) -> Option<Result<u64, WireError>> {
        if self.discarding {
            self.discarding = false;
            self.pending.clear();
            return None;
        }
        self.take_line()
    }

    pub fn has_partial(&self) -> bool {
        !self.pending.is_empty()
    }

    fn take_line(&mut self) -> Option<Result<u64, WireError>> {
        let line = std::mem::take(&mut self.pending);
        let text = String::from_utf8_lossy(&line);
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        Some(parse_timestamp(text))
    }
}

pub fn parse_timestamp(text: &str) -> Result<u64, WireError> {
    if !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(WireError::Malformed(text.to_string()));
    }
    match text.parse::<u64>() {
        Ok(value) if value > MAX_TIMESTAMP => Err(WireError::OutOfRange(value)),
        Ok(value) => Ok(value),
        Err(_) => Err(WireError::Malformed(text.to_string())),
    }
}
