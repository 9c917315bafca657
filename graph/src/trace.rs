// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Per-node circular trace buffers.
//!
//! A node with `trace_count > 0` emits one fixed-size record per buffer it
//! processes; the last N records survive and are rendered through the
//! node's registered format hook, including in the fatal-abort dump.

use std::collections::VecDeque;

/// Fixed payload size of one trace record.
pub const TRACE_RECORD_BYTES: usize = 64;

/// One captured record.
#[derive(Debug, Clone)]
pub struct TraceRecord {
    /// Capture sequence number, monotonically increasing per node.
    pub sequence: u64,
    /// Timestamp at capture.
    pub time: f64,
    /// Record payload; layout is private to the emitting node.
    pub data: [u8; TRACE_RECORD_BYTES],
    /// Meaningful octets in `data`.
    pub len: u8,
}

/// Circular store of the most recent records for one node.
#[derive(Debug)]
pub struct TraceBuffer {
    records: VecDeque<TraceRecord>,
    capacity: usize,
    sequence: u64,
}

impl TraceBuffer {
    /// A buffer holding at most `capacity` records.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(64)),
            capacity: capacity.max(1),
            sequence: 0,
        }
    }

    /// Append a record, evicting the oldest at capacity. Oversize payloads
    /// are truncated to [`TRACE_RECORD_BYTES`].
    pub fn push(&mut self, time: f64, payload: &[u8]) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        let mut data = [0u8; TRACE_RECORD_BYTES];
        let len = payload.len().min(TRACE_RECORD_BYTES);
        data[..len].copy_from_slice(&payload[..len]);
        self.records.push_back(TraceRecord {
            sequence: self.sequence,
            time,
            data,
            len: len as u8,
        });
        self.sequence += 1;
    }

    /// Records currently held, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &TraceRecord> {
        self.records.iter()
    }

    /// Number of records held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True iff nothing has been captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop all records.
    pub fn clear(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn wraps_at_capacity() {
        let mut t = TraceBuffer::new(3);
        for i in 0u8..5 {
            t.push(f64::from(i), &[i]);
        }
        assert_eq!(t.len(), 3);
        let seqs: Vec<u64> = t.iter().map(|r| r.sequence).collect();
        assert_eq!(seqs, vec![2, 3, 4]);
        let firsts: Vec<u8> = t.iter().map(|r| r.data[0]).collect();
        assert_eq!(firsts, vec![2, 3, 4]);
    }

    #[test]
    fn truncates_oversize_payloads() {
        let mut t = TraceBuffer::new(2);
        t.push(0.0, &[0xab; 200]);
        let r = t.iter().next().map(|r| (r.len, r.data[63]));
        assert_eq!(r, Some((64, 0xab)));
    }
}
