// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Per-sw-interface counters: two simple (drops, punts), two combined
//! (rx, tx).

use crate::interface::SwIfIndex;
use stats::{CombinedCounter, CombinedCounterVec, SimpleCounterVec, WorkerIndex};

/// The four counter vectors every sw-interface carries.
pub struct InterfaceCounters {
    drops: SimpleCounterVec,
    punts: SimpleCounterVec,
    rx: CombinedCounterVec,
    tx: CombinedCounterVec,
}

impl InterfaceCounters {
    /// Counter vectors sharded for `n_workers`.
    #[must_use]
    pub fn new(n_workers: usize) -> Self {
        Self {
            drops: SimpleCounterVec::new("drops", n_workers),
            punts: SimpleCounterVec::new("punts", n_workers),
            rx: CombinedCounterVec::new("rx", n_workers),
            tx: CombinedCounterVec::new("tx", n_workers),
        }
    }

    /// Make `sw` addressable in every vector.
    pub fn validate(&mut self, sw: SwIfIndex) {
        let i = sw.as_usize();
        self.drops.validate(i);
        self.punts.validate(i);
        self.rx.validate(i);
        self.tx.validate(i);
    }

    /// Count a dropped packet.
    pub fn count_drop(&mut self, worker: WorkerIndex, sw: SwIfIndex, n: u64) {
        self.drops.increment(worker, sw.as_usize(), n);
    }

    /// Count a punted packet.
    pub fn count_punt(&mut self, worker: WorkerIndex, sw: SwIfIndex, n: u64) {
        self.punts.increment(worker, sw.as_usize(), n);
    }

    /// Count a received packet of `bytes` octets.
    pub fn count_rx(&mut self, worker: WorkerIndex, sw: SwIfIndex, bytes: u64) {
        self.rx.increment(worker, sw.as_usize(), bytes);
    }

    /// Count a transmitted packet of `bytes` octets.
    pub fn count_tx(&mut self, worker: WorkerIndex, sw: SwIfIndex, bytes: u64) {
        self.tx.increment(worker, sw.as_usize(), bytes);
    }

    /// Dropped packets so far.
    #[must_use]
    pub fn drops(&self, sw: SwIfIndex) -> u64 {
        self.drops.get(sw.as_usize())
    }

    /// Punted packets so far.
    #[must_use]
    pub fn punts(&self, sw: SwIfIndex) -> u64 {
        self.punts.get(sw.as_usize())
    }

    /// Receive totals so far.
    #[must_use]
    pub fn rx(&self, sw: SwIfIndex) -> CombinedCounter {
        self.rx.get(sw.as_usize())
    }

    /// Transmit totals so far.
    #[must_use]
    pub fn tx(&self, sw: SwIfIndex) -> CombinedCounter {
        self.tx.get(sw.as_usize())
    }

    /// Zero all four vectors for `sw`.
    pub fn clear(&mut self, sw: SwIfIndex) {
        let i = sw.as_usize();
        self.drops.clear(i);
        self.punts.clear(i);
        self.rx.clear(i);
        self.tx.clear(i);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn counters_accumulate_and_clear() {
        let mut c = InterfaceCounters::new(1);
        let sw = SwIfIndex::new(3);
        c.validate(sw);
        c.count_rx(0, sw, 64);
        c.count_rx(0, sw, 128);
        c.count_tx(0, sw, 60);
        c.count_drop(0, sw, 1);
        c.count_punt(0, sw, 2);
        assert_eq!(c.rx(sw).packets, 2);
        assert_eq!(c.rx(sw).bytes, 192);
        assert_eq!(c.tx(sw).packets, 1);
        assert_eq!(c.drops(sw), 1);
        assert_eq!(c.punts(sw), 2);
        c.clear(sw);
        assert_eq!(c.rx(sw), CombinedCounter::default());
        assert_eq!(c.drops(sw), 0);
    }
}
