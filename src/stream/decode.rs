// src/stream/decode.rs
//! Client side: incremental frame reassembly over arbitrary byte chunks.
//!
//! Frames end at a blank line; lines end in `\n`, `\r\n` or a bare `\r`. Bytes after the last
//! boundary stay in a carry-over buffer until the next chunk completes them, so chunk splits
//! (even inside a multi-byte character) are harmless. A bad frame is reported and skipped; it
//! never poisons the stream.

use super::SearchEvent;
use crate::error::DecodeError;

/// Carry-over ceiling. A peer that never sends a boundary cannot grow memory without bound.
pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Default)]
pub struct StreamDecoder {
    carry: Vec<u8>,
    /// Offset into `carry` already known to hold no boundary.
    scan_from: usize,
    skipped: usize,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; return every complete frame's decode result, in order.
    pub fn push_raw(&mut self, chunk: &[u8]) -> Vec<Result<SearchEvent, DecodeError>> {
        self.carry.extend_from_slice(chunk);

        let mut out = Vec::new();
        let mut start = 0;
        let mut from = self.scan_from;
        let resume = loop {
            match find_boundary(&self.carry, from) {
                Scan::Frame { end, next } => {
                    if let Some(res) = decode_frame(&self.carry[start..end]) {
                        out.push(res);
                    }
                    start = next;
                    from = next;
                }
                Scan::Pending(resume) => break resume,
            }
        };
        self.carry.drain(..start);
        self.scan_from = resume - start;

        if self.carry.len() > MAX_FRAME_BYTES {
            tracing::warn!(
                target: "stream",
                bytes = self.carry.len(),
                "frame exceeds size limit; discarding"
            );
            self.carry.clear();
            self.scan_from = 0;
            out.push(Err(DecodeError::Json("frame too large".into())));
        }
        out
    }

    /// Feed a chunk; malformed frames are logged and dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SearchEvent> {
        let results = self.push_raw(chunk);
        self.keep_valid(results)
    }

    /// End of input: decode whatever trailing frame is still buffered, best effort.
    pub fn finish(&mut self) -> Option<SearchEvent> {
        let rest = std::mem::take(&mut self.carry);
        self.scan_from = 0;
        let res = decode_frame(&rest)?;
        self.keep_valid(vec![res]).pop()
    }

    /// Frames dropped so far as malformed.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Bytes waiting for a frame boundary.
    pub fn pending_bytes(&self) -> usize {
        self.carry.len()
    }

    fn keep_valid(&mut self, results: Vec<Result<SearchEvent, DecodeError>>) -> Vec<SearchEvent> {
        results
            .into_iter()
            .filter_map(|r| match r {
                Ok(ev) => Some(ev),
                Err(e) => {
                    self.skipped += 1;
                    tracing::warn!(target: "stream", error = %e, "dropping malformed event frame");
                    None
                }
            })
            .collect()
    }
}

enum Scan {
    /// Frame is `buf[..end]`; the next one starts at `next`.
    Frame { end: usize, next: usize },
    /// No boundary yet; rescan from this offset once more bytes arrive.
    Pending(usize),
}

/// Length of the line terminator at `i`: `Some(0)` for an ordinary byte, `None` when the
/// buffer ends before it can be told apart (a trailing `\r` may be the start of `\r\n`).
fn terminator_len(buf: &[u8], i: usize) -> Option<usize> {
    match *buf.get(i)? {
        b'\n' => Some(1),
        b'\r' => match buf.get(i + 1)? {
            b'\n' => Some(2),
            _ => Some(1),
        },
        _ => Some(0),
    }
}

/// Find the first blank line at or after `from`, i.e. two consecutive line terminators.
fn find_boundary(buf: &[u8], from: usize) -> Scan {
    let mut i = from;
    while i < buf.len() {
        if buf[i] != b'\n' && buf[i] != b'\r' {
            i += 1;
            continue;
        }
        let Some(first) = terminator_len(buf, i) else {
            return Scan::Pending(i);
        };
        match terminator_len(buf, i + first) {
            Some(0) => i += first,
            // A trailing `\r` after a line end is a second terminator either way; a `\n` that
            // may follow it just opens the next frame with an empty line.
            None if i + first < buf.len() => {
                return Scan::Frame {
                    end: i,
                    next: i + first + 1,
                }
            }
            None => return Scan::Pending(i),
            Some(second) => {
                return Scan::Frame {
                    end: i,
                    next: i + first + second,
                }
            }
        }
    }
    Scan::Pending(buf.len())
}

/// Decode one frame. `None` for frames with nothing to say (blank, comments, keep-alives).
fn decode_frame(frame: &[u8]) -> Option<Result<SearchEvent, DecodeError>> {
    let text = match std::str::from_utf8(frame) {
        Ok(t) => t,
        Err(_) => return Some(Err(DecodeError::InvalidUtf8)),
    };

    let mut data: Vec<&str> = Vec::new();
    let mut has_fields = false;
    for line in text.split(['\r', '\n']) {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        has_fields = true;
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        if field == "data" {
            data.push(value);
        }
    }

    if data.is_empty() {
        return has_fields.then_some(Err(DecodeError::MissingData));
    }
    let payload = data.join("\n");
    Some(serde_json::from_str(&payload).map_err(|e| DecodeError::Json(e.to_string())))
}
