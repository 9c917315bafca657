// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The adjacency heap and its shared counter block.

use crate::rewrite::RewriteHeader;
use id::Idx;
use stats::CombinedCounterVec;
use tracing::debug;

/// Pool index of an adjacency.
pub type AdjIndex = Idx<Adjacency>;

/// The immortal miss adjacency, heap index 0.
pub const MISS_ADJ_INDEX: AdjIndex = AdjIndex::new(0);

/// Forwarding-base control-path failures.
#[derive(Debug, thiserror::Error)]
pub enum FibError {
    /// The index does not name a live object.
    #[error("not found")]
    NotFound,
    /// The operation conflicts with live state.
    #[error("in use: {0}")]
    InUse(&'static str),
    /// The request itself is malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The adjacency heap cannot satisfy the allocation.
    #[error("adjacency heap exhausted")]
    HeapFull,
}

/// What a resolved next hop does with a packet.
#[derive(Debug, Clone, PartialEq)]
pub enum AdjacencyKind {
    /// Sentinel: the destination matched nothing.
    Miss,
    /// Count and release.
    Drop,
    /// Deliver to the host stack.
    Punt,
    /// One of our own addresses.
    Local {
        /// Slot in the local node's per-ip-protocol dispatch table.
        ip_protocol_slot: u8,
    },
    /// Interface route; the neighbor's L2 address is not yet known.
    Arp {
        /// Interface the neighbor lives on.
        sw_if_index: u32,
    },
    /// Rewrite and forward.
    Rewrite(RewriteHeader),
    /// Head of a contiguous block of rewrite adjacencies selected by flow
    /// hash.
    Multipath {
        /// First rewrite entry of the block.
        first_adj_index: AdjIndex,
        /// Block holds `1 << log2_n_adj` entries.
        log2_n_adj: u8,
    },
    /// Heap bookkeeping for an unallocated slot.
    Free,
}

/// One adjacency heap entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Adjacency {
    /// Entries in this block: 1, or the block size for multipath slots.
    pub n_adj: u16,
    /// Discriminated payload.
    pub kind: AdjacencyKind,
}

/// The adjacency heap: a variable-size block allocator so multipath groups
/// stay contiguous, plus shared packet/byte counters and the lazy remap
/// table that patches stale FIB entries after blocks move.
pub struct AdjacencyTable {
    entries: Vec<Adjacency>,
    free_blocks: Vec<(u32, u32)>,
    /// `0` = no remap; otherwise `1 + new_index`.
    remap: Vec<u32>,
    n_remaps: u32,
    /// Packet/byte counters indexed by adjacency index.
    pub counters: CombinedCounterVec,
}

impl AdjacencyTable {
    /// A heap seeded with the miss, drop, and punt singletons.
    #[must_use]
    pub fn new(n_workers: usize) -> Self {
        let mut table = Self {
            entries: Vec::new(),
            free_blocks: Vec::new(),
            remap: Vec::new(),
            n_remaps: 0,
            counters: CombinedCounterVec::new("adjacency", n_workers),
        };
        // index 0 is the miss sentinel and is never freed
        let miss = table.push_block(&[Adjacency {
            n_adj: 1,
            kind: AdjacencyKind::Miss,
        }]);
        debug_assert_eq!(miss, MISS_ADJ_INDEX);
        table
    }

    fn push_block(&mut self, block: &[Adjacency]) -> AdjIndex {
        let n = block.len() as u32;
        // exact-fit scan over freed blocks first
        if let Some(i) = self.free_blocks.iter().position(|(_, len)| *len == n) {
            let (start, _) = self.free_blocks.swap_remove(i);
            for (k, adj) in block.iter().enumerate() {
                self.entries[start as usize + k] = adj.clone();
            }
            self.validate_aux(start + n);
            return AdjIndex::new(start);
        }
        let start = self.entries.len() as u32;
        self.entries.extend_from_slice(block);
        self.validate_aux(start + n);
        AdjIndex::new(start)
    }

    fn validate_aux(&mut self, end: u32) {
        if self.remap.len() < end as usize {
            self.remap.resize(end as usize, 0);
        }
        self.counters.validate(end as usize - 1);
    }

    /// Allocate a block of `block.len()` contiguous adjacencies.
    pub fn add_block(&mut self, block: &[Adjacency]) -> AdjIndex {
        let index = self.push_block(block);
        debug!(%index, n = block.len(), "add adjacency block");
        index
    }

    /// Allocate a single adjacency.
    pub fn add(&mut self, kind: AdjacencyKind) -> AdjIndex {
        self.add_block(&[Adjacency { n_adj: 1, kind }])
    }

    /// Free the block starting at `index` holding `n` entries. The miss
    /// sentinel is never freed.
    pub fn del_block(&mut self, index: AdjIndex, n: u32) {
        if index == MISS_ADJ_INDEX {
            return;
        }
        for k in 0..n {
            self.entries[index.as_usize() + k as usize] = Adjacency {
                n_adj: 0,
                kind: AdjacencyKind::Free,
            };
        }
        self.free_blocks.push((index.into_raw(), n));
        debug!(%index, n, "free adjacency block");
    }

    /// Borrow an adjacency.
    ///
    /// # Errors
    ///
    /// Returns [`FibError::NotFound`] for stale or freed indices.
    pub fn get(&self, index: AdjIndex) -> Result<&Adjacency, FibError> {
        match self.entries.get(index.as_usize()) {
            Some(adj) if !matches!(adj.kind, AdjacencyKind::Free) => Ok(adj),
            _ => Err(FibError::NotFound),
        }
    }

    /// Borrow an adjacency mutably.
    ///
    /// # Errors
    ///
    /// Returns [`FibError::NotFound`] for stale or freed indices.
    pub fn get_mut(&mut self, index: AdjIndex) -> Result<&mut Adjacency, FibError> {
        match self.entries.get_mut(index.as_usize()) {
            Some(adj) if !matches!(adj.kind, AdjacencyKind::Free) => Ok(adj),
            _ => Err(FibError::NotFound),
        }
    }

    /// Number of heap slots (live and free).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True only before initialization, which cannot be observed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record that `old` has been superseded by `new`; stale FIB entries
    /// patch themselves on their next lookup or during a sweep.
    pub fn register_remap(&mut self, old: AdjIndex, new: AdjIndex) {
        if self.remap.len() <= old.as_usize() {
            self.remap.resize(old.as_usize() + 1, 0);
        }
        self.remap[old.as_usize()] = 1 + new.into_raw();
        self.n_remaps += 1;
    }

    /// The current target of `index`, following at most one remap hop.
    #[must_use]
    pub fn remapped(&self, index: AdjIndex) -> AdjIndex {
        match self.remap.get(index.as_usize()) {
            Some(&m) if m != 0 => AdjIndex::new(m - 1),
            _ => index,
        }
    }

    /// Outstanding remap entries.
    #[must_use]
    pub fn n_remaps(&self) -> u32 {
        self.n_remaps
    }

    /// Apply `f` to every (old, new) remap pair, then clear the table.
    /// FIB sweeps call this to rewrite their stored indices eagerly.
    pub fn take_remaps(&mut self, mut f: impl FnMut(AdjIndex, AdjIndex)) {
        if self.n_remaps == 0 {
            return;
        }
        for (old, m) in self.remap.iter().enumerate() {
            if *m != 0 {
                f(AdjIndex::new(old as u32), AdjIndex::new(m - 1));
            }
        }
        self.remap.fill(0);
        self.n_remaps = 0;
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn miss_is_index_zero_and_immortal() {
        let mut t = AdjacencyTable::new(1);
        assert!(matches!(
            t.get(MISS_ADJ_INDEX).unwrap().kind,
            AdjacencyKind::Miss
        ));
        t.del_block(MISS_ADJ_INDEX, 1);
        assert!(t.get(MISS_ADJ_INDEX).is_ok());
    }

    #[test]
    fn blocks_are_contiguous_and_reusable() {
        let mut t = AdjacencyTable::new(1);
        let block: Vec<Adjacency> = (0..4)
            .map(|_| Adjacency {
                n_adj: 4,
                kind: AdjacencyKind::Drop,
            })
            .collect();
        let first = t.add_block(&block);
        for k in 0..4 {
            assert!(t.get(first.add(k)).is_ok());
        }
        t.del_block(first, 4);
        assert!(t.get(first).is_err());
        // an exact-fit allocation reuses the freed block
        let again = t.add_block(&block);
        assert_eq!(again, first);
        // a differently-sized one does not split it
        t.del_block(again, 4);
        let single = t.add(AdjacencyKind::Punt);
        assert_ne!(single, first);
    }

    #[test]
    fn remap_is_lazy_and_sweepable() {
        let mut t = AdjacencyTable::new(1);
        let a = t.add(AdjacencyKind::Drop);
        let b = t.add(AdjacencyKind::Punt);
        assert_eq!(t.remapped(a), a);
        t.register_remap(a, b);
        assert_eq!(t.remapped(a), b);
        assert_eq!(t.remapped(b), b);
        let mut seen = Vec::new();
        t.take_remaps(|old, new| seen.push((old, new)));
        assert_eq!(seen, vec![(a, b)]);
        assert_eq!(t.n_remaps(), 0);
        assert_eq!(t.remapped(a), a);
    }

    #[test]
    fn counters_cover_every_slot() {
        let mut t = AdjacencyTable::new(1);
        let a = t.add(AdjacencyKind::Drop);
        t.counters.increment(0, a.as_usize(), 100);
        assert_eq!(t.counters.get(a.as_usize()).bytes, 100);
    }
}
