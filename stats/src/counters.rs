// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Simple and combined counter vectors.

use serde::{Deserialize, Serialize};

/// Identifies the worker whose shard a data-path writer bumps.
///
/// The reference deployment is a single cooperative worker, worker 0.
pub type WorkerIndex = usize;

/// A vector of u64 event counters, one shard per worker.
#[derive(Debug, Clone)]
pub struct SimpleCounterVec {
    name: &'static str,
    shards: Vec<Vec<u64>>,
}

impl SimpleCounterVec {
    /// Create a counter vector with `n_workers` shards.
    #[must_use]
    pub fn new(name: &'static str, n_workers: usize) -> Self {
        Self {
            name,
            shards: vec![Vec::new(); n_workers.max(1)],
        }
    }

    /// The name this vector was registered under.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of counters in the vector.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.first().map_or(0, Vec::len)
    }

    /// True iff no counter has been validated yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grow every shard so `index` is addressable.
    pub fn validate(&mut self, index: usize) {
        for shard in &mut self.shards {
            if shard.len() <= index {
                shard.resize(index + 1, 0);
            }
        }
    }

    /// Add `count` events to counter `index` on `worker`'s shard.
    ///
    /// The counter must have been validated.
    pub fn increment(&mut self, worker: WorkerIndex, index: usize, count: u64) {
        self.shards[worker][index] += count;
    }

    /// Sum counter `index` across all worker shards.
    #[must_use]
    pub fn get(&self, index: usize) -> u64 {
        self.shards.iter().map(|shard| shard[index]).sum()
    }

    /// Zero counter `index` on every shard.
    pub fn clear(&mut self, index: usize) {
        for shard in &mut self.shards {
            shard[index] = 0;
        }
    }

    /// Zero the whole vector.
    pub fn clear_all(&mut self) {
        for shard in &mut self.shards {
            shard.fill(0);
        }
    }
}

/// A packets + bytes pair, the unit of combined counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinedCounter {
    /// Packet events.
    pub packets: u64,
    /// Octets carried by those packets.
    pub bytes: u64,
}

impl CombinedCounter {
    /// Accumulate another sample into this one.
    pub fn add(&mut self, packets: u64, bytes: u64) {
        self.packets += packets;
        self.bytes += bytes;
    }
}

/// A vector of combined (packets, bytes) counters, one shard per worker.
#[derive(Debug, Clone)]
pub struct CombinedCounterVec {
    name: &'static str,
    shards: Vec<Vec<CombinedCounter>>,
}

impl CombinedCounterVec {
    /// Create a combined counter vector with `n_workers` shards.
    #[must_use]
    pub fn new(name: &'static str, n_workers: usize) -> Self {
        Self {
            name,
            shards: vec![Vec::new(); n_workers.max(1)],
        }
    }

    /// The name this vector was registered under.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of counters in the vector.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.first().map_or(0, Vec::len)
    }

    /// True iff no counter has been validated yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grow every shard so `index` is addressable.
    pub fn validate(&mut self, index: usize) {
        for shard in &mut self.shards {
            if shard.len() <= index {
                shard.resize(index + 1, CombinedCounter::default());
            }
        }
    }

    /// Add one packet of `bytes` octets to counter `index` on `worker`'s shard.
    pub fn increment(&mut self, worker: WorkerIndex, index: usize, bytes: u64) {
        self.shards[worker][index].add(1, bytes);
    }

    /// Add a batch of packets to counter `index` on `worker`'s shard.
    pub fn increment_by(&mut self, worker: WorkerIndex, index: usize, packets: u64, bytes: u64) {
        self.shards[worker][index].add(packets, bytes);
    }

    /// Sum counter `index` across all worker shards.
    #[must_use]
    pub fn get(&self, index: usize) -> CombinedCounter {
        let mut total = CombinedCounter::default();
        for shard in &self.shards {
            let c = shard[index];
            total.add(c.packets, c.bytes);
        }
        total
    }

    /// Zero counter `index` on every shard.
    pub fn clear(&mut self, index: usize) {
        for shard in &mut self.shards {
            shard[index] = CombinedCounter::default();
        }
    }

    /// Zero the whole vector.
    pub fn clear_all(&mut self) {
        for shard in &mut self.shards {
            shard.fill(CombinedCounter::default());
        }
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn simple_counters_sum_across_shards() {
        let mut c = SimpleCounterVec::new("drops", 3);
        c.validate(4);
        assert_eq!(c.len(), 5);
        c.increment(0, 4, 2);
        c.increment(1, 4, 3);
        c.increment(2, 4, 5);
        assert_eq!(c.get(4), 10);
        assert_eq!(c.get(0), 0);
        c.clear(4);
        assert_eq!(c.get(4), 0);
    }

    #[test]
    fn combined_counters_track_packets_and_bytes() {
        let mut c = CombinedCounterVec::new("rx", 2);
        c.validate(1);
        c.increment(0, 1, 64);
        c.increment(1, 1, 1500);
        c.increment_by(0, 1, 10, 640);
        let total = c.get(1);
        assert_eq!(total.packets, 12);
        assert_eq!(total.bytes, 64 + 1500 + 640);
    }

    #[test]
    fn validate_is_idempotent() {
        let mut c = SimpleCounterVec::new("x", 1);
        c.validate(2);
        c.increment(0, 2, 7);
        c.validate(2);
        c.validate(1);
        assert_eq!(c.get(2), 7);
    }

    #[test]
    fn zero_workers_clamps_to_one() {
        let mut c = SimpleCounterVec::new("x", 0);
        c.validate(0);
        c.increment(0, 0, 1);
        assert_eq!(c.get(0), 1);
    }
}
