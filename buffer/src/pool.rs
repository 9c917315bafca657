// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The buffer pool and its size-typed free-lists.

use crate::buffer::Buffer;
use crate::BufferIndex;
use id::Idx;
use memmap2::MmapMut;
use tracing::{debug, warn};

/// Pool index of a free-list.
pub type FreeListIndex = Idx<FreeList>;

/// Debug pattern written over `current_length` when a buffer is freed.
const POISON: u32 = 0xdead_beef;

/// Segments added to a free-list per growth step.
const CHUNK_SEGMENTS: u32 = 256;

/// How a free-list's segment memory is backed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    /// Ordinary heap memory.
    Heap,
    /// Anonymous mapping, standing in for a DMA-capable physical region.
    Dma,
}

enum Chunk {
    Heap(Vec<u8>),
    Dma(MmapMut),
}

impl Chunk {
    fn bytes(&self) -> &[u8] {
        match self {
            Chunk::Heap(v) => v,
            Chunk::Dma(m) => m,
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        match self {
            Chunk::Heap(v) => v,
            Chunk::Dma(m) => m,
        }
    }
}

/// A typed pool of reusable segments of one size.
pub struct FreeList {
    index: FreeListIndex,
    segment_size: u32,
    backing: Backing,
    chunks: Vec<Chunk>,
    free: Vec<BufferIndex>,
    n_slots: u32,
}

impl FreeList {
    /// Segment capacity of buffers on this list.
    #[must_use]
    pub fn segment_size(&self) -> u32 {
        self.segment_size
    }

    /// How this list's memory is backed.
    #[must_use]
    pub fn backing(&self) -> Backing {
        self.backing
    }

    /// Buffers currently sitting on the list.
    #[must_use]
    pub fn n_free(&self) -> usize {
        self.free.len()
    }
}

/// Pool configuration; exported parameters only, no environment access.
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Default (and minimum) segment size in octets.
    pub buffer_segment_size: u32,
    /// Buffers pre-populated on each new free-list.
    pub min_free_list_buffers: u32,
    /// Left headroom in front of every segment.
    pub pre_data_size: u32,
    /// Hard cap on total buffers across all free-lists.
    pub max_buffers: u32,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            buffer_segment_size: 512,
            min_free_list_buffers: 1024,
            pre_data_size: 64,
            max_buffers: 1 << 20,
        }
    }
}

/// Buffer-pool control-path failures.
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    /// The free-list index does not name a live list.
    #[error("no such free-list: {0}")]
    UnknownFreeList(FreeListIndex),
    /// Requested segment size cannot be represented.
    #[error("invalid segment size: {0}")]
    InvalidSize(u32),
}

/// The buffer pool: headers plus per-free-list segment storage.
pub struct BufferPool {
    config: BufferConfig,
    buffers: Vec<Buffer>,
    free_lists: Vec<FreeList>,
}

impl BufferPool {
    /// Create an empty pool.
    #[must_use]
    pub fn new(config: BufferConfig) -> Self {
        Self {
            config,
            buffers: Vec::new(),
            free_lists: Vec::new(),
        }
    }

    /// The configuration this pool was built with.
    #[must_use]
    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Total buffers ever created.
    #[must_use]
    pub fn n_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Intern a free-list whose segments hold at least `size` octets.
    ///
    /// The size is rounded up to a power of two, floored at the configured
    /// default segment size. Two requests that round to the same size and
    /// backing share one list.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::InvalidSize`] for a zero or unrepresentable
    /// size request.
    pub fn free_list_for_size(
        &mut self,
        size: u32,
        backing: Backing,
    ) -> Result<FreeListIndex, BufferError> {
        if size == 0 || size > (1 << 30) {
            return Err(BufferError::InvalidSize(size));
        }
        let rounded = size
            .next_power_of_two()
            .max(self.config.buffer_segment_size);
        if let Some(fl) = self
            .free_lists
            .iter()
            .find(|fl| fl.segment_size == rounded && fl.backing == backing)
        {
            return Ok(fl.index);
        }
        let index = FreeListIndex::new(u32::try_from(self.free_lists.len()).unwrap_or(u32::MAX));
        debug!(%index, segment_size = rounded, ?backing, "new free-list");
        self.free_lists.push(FreeList {
            index,
            segment_size: rounded,
            backing,
            chunks: Vec::new(),
            free: Vec::new(),
            n_slots: 0,
        });
        let want = self.config.min_free_list_buffers;
        self.grow_free_list(index, want);
        Ok(index)
    }

    /// The default heap-backed free-list.
    ///
    /// # Errors
    ///
    /// Propagates [`BufferError::InvalidSize`] (cannot occur for the default
    /// configuration).
    pub fn default_free_list(&mut self) -> Result<FreeListIndex, BufferError> {
        self.free_list_for_size(self.config.buffer_segment_size, Backing::Heap)
    }

    /// Look up a free-list.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::UnknownFreeList`] when `index` is stale.
    pub fn free_list(&self, index: FreeListIndex) -> Result<&FreeList, BufferError> {
        self.free_lists
            .get(index.as_usize())
            .ok_or(BufferError::UnknownFreeList(index))
    }

    fn grow_free_list(&mut self, index: FreeListIndex, n: u32) {
        let total = u32::try_from(self.buffers.len()).unwrap_or(u32::MAX);
        let grant = self.config.max_buffers.saturating_sub(total).min(n);
        if grant == 0 {
            return;
        }
        let fl = &mut self.free_lists[index.as_usize()];
        let stride = (self.config.pre_data_size + fl.segment_size) as usize;
        let mut remaining = grant;
        while remaining > 0 {
            let batch = remaining.min(CHUNK_SEGMENTS);
            let chunk_bytes = stride * batch as usize;
            let chunk = match fl.backing {
                Backing::Heap => Chunk::Heap(vec![0u8; chunk_bytes]),
                Backing::Dma => match MmapMut::map_anon(chunk_bytes) {
                    Ok(m) => Chunk::Dma(m),
                    Err(error) => {
                        warn!(%index, %error, "dma backing allocation failed");
                        return;
                    }
                },
            };
            fl.chunks.push(chunk);
            for _ in 0..batch {
                let slot = fl.n_slots;
                fl.n_slots += 1;
                let bi = BufferIndex::new(u32::try_from(self.buffers.len()).unwrap_or(u32::MAX));
                self.buffers.push(Buffer {
                    current_data: 0,
                    current_length: POISON,
                    flags: crate::BufferFlags::empty(),
                    next_buffer: BufferIndex::INVALID,
                    sw_if_index: [u32::MAX, u32::MAX],
                    error: 0,
                    trace_index: 0,
                    free_list: index,
                    slot,
                    live: false,
                    opaque: crate::Opaque::default(),
                });
                fl.free.push(bi);
            }
            remaining -= batch;
        }
    }

    /// Allocate up to `n` buffers from `free_list`.
    ///
    /// Short reads are legal: the returned vector may hold fewer than `n`
    /// indices when the pool cap is reached, and the caller is expected to
    /// check and retry or back off. Returned buffers have zeroed offsets,
    /// lengths, flags, and opaque areas.
    #[must_use]
    pub fn alloc(&mut self, free_list: FreeListIndex, n: u32) -> Vec<BufferIndex> {
        let Some(fl) = self.free_lists.get(free_list.as_usize()) else {
            return Vec::new();
        };
        if (fl.free.len() as u32) < n {
            let shortfall = n - fl.free.len() as u32;
            self.grow_free_list(free_list, shortfall.max(self.config.min_free_list_buffers));
        }
        let fl = &mut self.free_lists[free_list.as_usize()];
        let take = (fl.free.len() as u32).min(n) as usize;
        let at = fl.free.len() - take;
        let out: Vec<BufferIndex> = fl.free.drain(at..).collect();
        for bi in &out {
            let b = &mut self.buffers[bi.as_usize()];
            debug_assert!(!b.live, "buffer {bi} allocated twice");
            b.live = true;
            b.reset();
        }
        out
    }

    /// Allocate exactly one buffer, or `None` at the pool cap.
    pub fn alloc_one(&mut self, free_list: FreeListIndex) -> Option<BufferIndex> {
        self.alloc(free_list, 1).pop()
    }

    /// Return buffers to their free-lists.
    ///
    /// With `follow_chain` set, each index is treated as a chain head and
    /// every segment reachable through `next_buffer` is freed as well.
    pub fn free(&mut self, indices: &[BufferIndex], follow_chain: bool) {
        for &head in indices {
            let mut bi = head;
            loop {
                let b = &mut self.buffers[bi.as_usize()];
                debug_assert!(
                    b.live && b.current_length != POISON,
                    "buffer {bi} freed twice"
                );
                let next = b.has_next().then_some(b.next_buffer);
                b.live = false;
                b.current_length = POISON;
                let fl = b.free_list;
                self.free_lists[fl.as_usize()].free.push(bi);
                match (follow_chain, next) {
                    (true, Some(n)) => bi = n,
                    _ => break,
                }
            }
        }
    }

    /// Borrow a buffer header.
    #[must_use]
    pub fn get(&self, bi: BufferIndex) -> &Buffer {
        &self.buffers[bi.as_usize()]
    }

    /// Borrow a buffer header mutably.
    pub fn get_mut(&mut self, bi: BufferIndex) -> &mut Buffer {
        &mut self.buffers[bi.as_usize()]
    }

    fn slot_range(&self, bi: BufferIndex) -> (usize, usize, usize) {
        let b = &self.buffers[bi.as_usize()];
        let fl = &self.free_lists[b.free_list.as_usize()];
        let stride = (self.config.pre_data_size + fl.segment_size) as usize;
        let chunk = (b.slot / CHUNK_SEGMENTS) as usize;
        let within = (b.slot % CHUNK_SEGMENTS) as usize * stride;
        (b.free_list.as_usize(), chunk, within)
    }

    /// Live payload bytes of one segment.
    #[must_use]
    pub fn data(&self, bi: BufferIndex) -> &[u8] {
        let b = &self.buffers[bi.as_usize()];
        let (fli, chunk, base) = self.slot_range(bi);
        let start = base
            + usize::try_from(i64::from(self.config.pre_data_size) + i64::from(b.current_data))
                .unwrap_or(0);
        &self.free_lists[fli].chunks[chunk].bytes()[start..start + b.current_length as usize]
    }

    /// Live payload bytes of one segment, mutably.
    pub fn data_mut(&mut self, bi: BufferIndex) -> &mut [u8] {
        let b = &self.buffers[bi.as_usize()];
        let len = b.current_length as usize;
        let cur = b.current_data;
        let (fli, chunk, base) = self.slot_range(bi);
        let start = base
            + usize::try_from(i64::from(self.config.pre_data_size) + i64::from(cur)).unwrap_or(0);
        &mut self.free_lists[fli].chunks[chunk].bytes_mut()[start..start + len]
    }

    /// Segment capacity of `bi` (excludes headroom).
    #[must_use]
    pub fn segment_size(&self, bi: BufferIndex) -> u32 {
        let b = &self.buffers[bi.as_usize()];
        self.free_lists[b.free_list.as_usize()].segment_size
    }

    /// Headroom currently available in front of the live bytes.
    #[must_use]
    pub fn headroom(&self, bi: BufferIndex) -> u32 {
        let b = &self.buffers[bi.as_usize()];
        u32::try_from(i64::from(self.config.pre_data_size) + i64::from(b.current_data)).unwrap_or(0)
    }

    /// Move the live-data window of the head segment.
    ///
    /// Positive `amount` consumes bytes from the front (parsing a header);
    /// negative `amount` exposes headroom bytes (prepending one). The caller
    /// must stay within `[-pre_data_size, segment_size]`; the pool asserts
    /// this in debug builds.
    pub fn advance(&mut self, bi: BufferIndex, amount: i32) {
        let pre = self.config.pre_data_size;
        let seg = self.segment_size(bi);
        let b = &mut self.buffers[bi.as_usize()];
        let new_data = b.current_data + amount;
        debug_assert!(new_data >= -i64::from(pre) as i32, "advance under headroom");
        let new_len = i64::from(b.current_length) - i64::from(amount);
        debug_assert!(new_len >= 0, "advance past end of live data");
        debug_assert!(
            i64::from(new_data) + new_len <= i64::from(seg),
            "advance past segment"
        );
        b.current_data = new_data;
        b.current_length = u32::try_from(new_len).unwrap_or(0);
    }

    /// Copy `bytes` into `bi` starting at the current data offset and set
    /// the live length accordingly. Single-segment convenience for packet
    /// sources and tests.
    pub fn fill(&mut self, bi: BufferIndex, bytes: &[u8]) {
        {
            let b = &mut self.buffers[bi.as_usize()];
            b.current_length = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
        }
        self.data_mut(bi).copy_from_slice(bytes);
    }

    /// Total live octets along the chain rooted at `head`.
    #[must_use]
    pub fn length_in_chain(&self, head: BufferIndex) -> u32 {
        let mut total = 0u32;
        let mut bi = head;
        loop {
            let b = &self.buffers[bi.as_usize()];
            total += b.current_length;
            if b.has_next() {
                bi = b.next_buffer;
            } else {
                break;
            }
        }
        total
    }

    /// Append the logical payload of the chain rooted at `head` to `out`,
    /// returning the octet count copied.
    pub fn contents(&self, head: BufferIndex, out: &mut Vec<u8>) -> u32 {
        let mut total = 0u32;
        let mut bi = head;
        loop {
            let b = &self.buffers[bi.as_usize()];
            out.extend_from_slice(self.data(bi));
            total += b.current_length;
            if b.has_next() {
                bi = b.next_buffer;
            } else {
                break;
            }
        }
        total
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod test {
    use super::*;
    use crate::BufferFlags;

    fn small_pool() -> (BufferPool, FreeListIndex) {
        let mut pool = BufferPool::new(BufferConfig {
            min_free_list_buffers: 8,
            ..BufferConfig::default()
        });
        let fl = pool.default_free_list().unwrap();
        (pool, fl)
    }

    #[test]
    fn free_lists_intern_by_rounded_size() {
        let mut pool = BufferPool::new(BufferConfig::default());
        let a = pool.free_list_for_size(300, Backing::Heap).unwrap();
        let b = pool.free_list_for_size(512, Backing::Heap).unwrap();
        let c = pool.free_list_for_size(513, Backing::Heap).unwrap();
        let d = pool.free_list_for_size(513, Backing::Dma).unwrap();
        assert_eq!(a, b);
        assert_ne!(b, c);
        assert_ne!(c, d);
        assert_eq!(pool.free_list(c).unwrap().segment_size(), 1024);
        // below the configured minimum still yields the minimum
        let e = pool.free_list_for_size(1, Backing::Heap).unwrap();
        assert_eq!(pool.free_list(e).unwrap().segment_size(), 512);
    }

    #[test]
    fn alloc_returns_zeroed_headers() {
        let (mut pool, fl) = small_pool();
        let got = pool.alloc(fl, 4);
        assert_eq!(got.len(), 4);
        for bi in &got {
            let b = pool.get(*bi);
            assert_eq!(b.current_data, 0);
            assert_eq!(b.current_length, 0);
            assert_eq!(b.flags, BufferFlags::empty());
            assert_eq!(b.opaque.u32(0), 0);
        }
    }

    #[test]
    fn alloc_free_alloc_never_duplicates_live_handles() {
        let (mut pool, fl) = small_pool();
        let first = pool.alloc(fl, 8);
        let mut seen: Vec<_> = first.clone();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), first.len());
        pool.free(&first, false);
        let second = pool.alloc(fl, 8);
        // indices may be reused, but each exactly once
        let mut again: Vec<_> = second.clone();
        again.sort();
        again.dedup();
        assert_eq!(again.len(), second.len());
    }

    #[test]
    fn short_read_at_pool_cap() {
        let mut pool = BufferPool::new(BufferConfig {
            min_free_list_buffers: 4,
            max_buffers: 4,
            ..BufferConfig::default()
        });
        let fl = pool.default_free_list().unwrap();
        let got = pool.alloc(fl, 16);
        assert_eq!(got.len(), 4);
        assert!(pool.alloc(fl, 1).is_empty());
        pool.free(&got, false);
        assert_eq!(pool.alloc(fl, 16).len(), 4);
    }

    #[test]
    fn chain_length_and_contents() {
        let (mut pool, fl) = small_pool();
        let bufs = pool.alloc(fl, 3);
        pool.fill(bufs[0], b"hello ");
        pool.fill(bufs[1], b"buffer ");
        pool.fill(bufs[2], b"chains");
        pool.get_mut(bufs[0]).set_next(bufs[1]);
        pool.get_mut(bufs[1]).set_next(bufs[2]);
        assert_eq!(pool.length_in_chain(bufs[0]), 19);
        let mut out = Vec::new();
        assert_eq!(pool.contents(bufs[0], &mut out), 19);
        assert_eq!(out, b"hello buffer chains");
        // freeing the head with follow_chain returns all three
        let free_before = pool.free_list(fl).unwrap().n_free();
        pool.free(&[bufs[0]], true);
        assert_eq!(pool.free_list(fl).unwrap().n_free(), free_before + 3);
    }

    #[test]
    fn advance_moves_the_window_and_back() {
        let (mut pool, fl) = small_pool();
        let bi = pool.alloc_one(fl).unwrap();
        pool.fill(bi, &[0xaa; 32]);
        pool.advance(bi, 14);
        assert_eq!(pool.data(bi).len(), 18);
        assert_eq!(pool.get(bi).current_data, 14);
        pool.advance(bi, -14);
        assert_eq!(pool.data(bi).len(), 32);
        // prepend into headroom
        pool.advance(bi, -8);
        assert_eq!(pool.get(bi).current_data, -8);
        assert_eq!(pool.data(bi).len(), 40);
        assert_eq!(pool.headroom(bi), pool.config().pre_data_size - 8);
    }

    #[test]
    #[should_panic(expected = "freed twice")]
    #[cfg(debug_assertions)]
    fn double_free_is_detected() {
        let (mut pool, fl) = small_pool();
        let bi = pool.alloc_one(fl).unwrap();
        pool.free(&[bi], false);
        pool.free(&[bi], false);
    }

    #[test]
    fn dma_backing_allocates() {
        let mut pool = BufferPool::new(BufferConfig {
            min_free_list_buffers: 4,
            ..BufferConfig::default()
        });
        let fl = pool.free_list_for_size(2048, Backing::Dma).unwrap();
        let bi = pool.alloc_one(fl).unwrap();
        pool.fill(bi, &[0x42; 2048]);
        assert_eq!(pool.data(bi)[2047], 0x42);
    }
}
