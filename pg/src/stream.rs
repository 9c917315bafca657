// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Streams and edit groups.

use crate::edit::{write_bits, Edit, EditKind, PgError};
use ahash::RandomState;
use buffer::{BufferIndex, BufferPool, FreeListIndex, RX, TX};
use graph::NodeIndex;
use id::Idx;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Pool index of a stream.
pub type StreamIndex = Idx<Stream>;

/// Post-fixup hook run per packet over the assembled bytes; receives the
/// group's start byte offset (e.g. to compute an IP header checksum).
pub type EditFunction = Box<dyn FnMut(usize, &mut [u8])>;

/// One header layer of a stream: its own edits plus an optional fixup.
pub struct EditGroup {
    /// Edits whose bit offsets are relative to this group's start.
    pub edits: Vec<Edit>,
    /// Octets this group contributes to the packet.
    pub n_packet_bytes: usize,
    /// Per-packet fixup, run after all edits are applied.
    pub edit_function: Option<EditFunction>,
}

impl EditGroup {
    /// A group of `n_packet_bytes` octets with the given edits.
    #[must_use]
    pub fn new(n_packet_bytes: usize, edits: Vec<Edit>) -> Self {
        Self {
            edits,
            n_packet_bytes,
            edit_function: None,
        }
    }

    /// Attach a fixup.
    #[must_use]
    pub fn with_fixup(mut self, fixup: EditFunction) -> Self {
        self.edit_function = Some(fixup);
        self
    }
}

/// How packet sizes vary; the same categories as field edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeKind {
    /// Always `min_packet_bytes`.
    Fixed,
    /// Cycles `min..=max`, wrapping past the top.
    Increment,
    /// Uniform in `[min, max]`.
    Random,
}

/// Everything needed to create a stream.
pub struct StreamConfig {
    /// Unique stream name.
    pub name: String,
    /// Node generated packets are handed to (e.g. `ethernet-input`).
    pub node_index: NodeIndex,
    /// Smallest packet size.
    pub min_packet_bytes: u32,
    /// Largest packet size.
    pub max_packet_bytes: u32,
    /// Size variation.
    pub size_kind: SizeKind,
    /// Header layers, outermost first.
    pub edit_groups: Vec<EditGroup>,
    /// Packets per second; zero means as fast as the loop runs.
    pub rate_packets_per_second: f64,
    /// Stop (auto-disable) after this many packets; zero means no limit.
    pub n_packets_limit: u64,
    /// (rx, tx) interface indices stamped on generated buffers; the rx
    /// index may name a non-pg interface to synthesize received traffic.
    pub sw_if_index: [u32; 2],
    /// Segment size for generated buffers; zero picks one large enough for
    /// `max_packet_bytes`. Smaller values exercise buffer chains.
    pub buffer_bytes: u32,
    /// When non-empty the stream replays these packets round-robin,
    /// ignoring edits and sizes.
    pub replay_packet_templates: Vec<Vec<u8>>,
}

impl StreamConfig {
    /// A minimal config with sensible defaults.
    #[must_use]
    pub fn named(name: &str, node_index: NodeIndex) -> Self {
        Self {
            name: name.to_owned(),
            node_index,
            min_packet_bytes: 64,
            max_packet_bytes: 64,
            size_kind: SizeKind::Fixed,
            edit_groups: Vec::new(),
            rate_packets_per_second: 0.0,
            n_packets_limit: 0,
            sw_if_index: [u32::MAX, u32::MAX],
            buffer_bytes: 0,
            replay_packet_templates: Vec::new(),
        }
    }
}

struct BufferSlot {
    fifo: VecDeque<BufferIndex>,
    free_list: Option<FreeListIndex>,
}

/// A compiled stream.
pub struct Stream {
    /// Stream name.
    pub name: String,
    /// Target node.
    pub node_index: NodeIndex,
    /// Enabled state; observed by the input node each iteration.
    pub enabled: bool,
    /// Smallest packet size.
    pub min_packet_bytes: u32,
    /// Largest packet size.
    pub max_packet_bytes: u32,
    /// Size variation.
    pub size_kind: SizeKind,
    /// Template with all fixed edits applied.
    pub fixed_packet_data: Vec<u8>,
    /// Bits of the template covered by fixed edits.
    pub fixed_packet_data_mask: Vec<u8>,
    /// Remaining edits, bit offsets absolute within the packet.
    pub non_fixed_edits: Vec<Edit>,
    groups: Vec<(usize, Option<EditFunction>)>,
    /// Packets per second; zero is unlimited.
    pub rate_packets_per_second: f64,
    /// Auto-disable threshold; zero is unlimited.
    pub n_packets_limit: u64,
    /// Packets produced so far.
    pub n_packets_generated: u64,
    /// Fractional packet allowance carried between polls.
    pub packet_accumulator: f64,
    /// Timestamp of the previous generation; negative before the first.
    pub time_last_generate: f64,
    last_increment_packet_size: u32,
    /// (rx, tx) stamped on generated buffers.
    pub sw_if_index: [u32; 2],
    buffer_bytes: u32,
    slots: Vec<BufferSlot>,
    /// Replay templates; non-empty switches the stream to replay mode.
    pub replay_packet_templates: Vec<Vec<u8>>,
    current_replay_packet_index: usize,
    scratch: Vec<u8>,
}

impl Stream {
    fn compile(config: StreamConfig) -> Result<Self, PgError> {
        let mut template = Vec::new();
        let mut mask = Vec::new();
        let mut groups = Vec::new();
        let mut non_fixed = Vec::new();
        for mut group in config.edit_groups {
            let start = template.len();
            template.resize(start + group.n_packet_bytes, 0);
            mask.resize(start + group.n_packet_bytes, 0);
            for edit in &mut group.edits {
                if edit.n_bits == 0 || edit.n_bits > 64 {
                    return Err(PgError::InvalidArgument("edit width out of range"));
                }
                match edit.kind {
                    EditKind::Fixed => {
                        let at = start as u32 * 8 + edit.bit_offset;
                        write_bits(&mut template, at, edit.n_bits, edit.lo);
                        write_bits(&mut mask, at, edit.n_bits, u64::MAX >> (64 - edit.n_bits));
                    }
                    EditKind::Increment | EditKind::Random => {
                        if edit.hi < edit.lo {
                            return Err(PgError::InvalidArgument("edit bounds inverted"));
                        }
                        let mut absolute = edit.clone();
                        absolute.bit_offset += start as u32 * 8;
                        non_fixed.push(absolute);
                    }
                    EditKind::Unspecified => {
                        return Err(PgError::UnspecifiedEdit(edit.bit_offset));
                    }
                }
            }
            groups.push((start, group.edit_function));
        }

        let min = config.min_packet_bytes;
        let max = config.max_packet_bytes.max(min);
        if config.replay_packet_templates.is_empty() {
            if template.is_empty() {
                return Err(PgError::InvalidArgument("stream has no edit groups"));
            }
            if max as usize > template.len() {
                return Err(PgError::InvalidArgument("packet size exceeds template"));
            }
        }

        let seg = if config.buffer_bytes == 0 {
            max.max(1)
        } else {
            config.buffer_bytes
        };
        let longest = config
            .replay_packet_templates
            .iter()
            .map(Vec::len)
            .max()
            .unwrap_or(max as usize);
        let n_slots = longest.max(1).div_ceil(seg as usize);

        Ok(Stream {
            name: config.name,
            node_index: config.node_index,
            enabled: false,
            min_packet_bytes: min,
            max_packet_bytes: max,
            size_kind: config.size_kind,
            fixed_packet_data: template,
            fixed_packet_data_mask: mask,
            non_fixed_edits: non_fixed,
            groups,
            rate_packets_per_second: config.rate_packets_per_second,
            n_packets_limit: config.n_packets_limit,
            n_packets_generated: 0,
            packet_accumulator: 0.0,
            time_last_generate: -1.0,
            last_increment_packet_size: min,
            sw_if_index: config.sw_if_index,
            buffer_bytes: seg,
            slots: (0..n_slots)
                .map(|_| BufferSlot {
                    fifo: VecDeque::new(),
                    free_list: None,
                })
                .collect(),
            replay_packet_templates: config.replay_packet_templates,
            current_replay_packet_index: 0,
            scratch: Vec::new(),
        })
    }

    /// True while the stream is in replay mode.
    #[must_use]
    pub fn is_replay(&self) -> bool {
        !self.replay_packet_templates.is_empty()
    }

    /// Segment size generated buffers use.
    #[must_use]
    pub fn buffer_bytes(&self) -> u32 {
        self.buffer_bytes
    }

    /// Packets remaining until the limit; `u64::MAX` when unlimited.
    #[must_use]
    pub fn limit_remaining(&self) -> u64 {
        if self.n_packets_limit == 0 {
            u64::MAX
        } else {
            self.n_packets_limit
                .saturating_sub(self.n_packets_generated)
        }
    }

    fn next_size(&mut self, rng: &mut StdRng) -> usize {
        match self.size_kind {
            SizeKind::Fixed => self.min_packet_bytes as usize,
            SizeKind::Increment => {
                let v = self.last_increment_packet_size;
                self.last_increment_packet_size = if v >= self.max_packet_bytes {
                    self.min_packet_bytes
                } else {
                    v + 1
                };
                v as usize
            }
            SizeKind::Random => {
                rng.random_range(self.min_packet_bytes..=self.max_packet_bytes) as usize
            }
        }
    }

    fn next_packet_bytes(&mut self, rng: &mut StdRng) -> usize {
        if self.is_replay() {
            let template = &self.replay_packet_templates[self.current_replay_packet_index];
            self.current_replay_packet_index =
                (self.current_replay_packet_index + 1) % self.replay_packet_templates.len();
            self.scratch.clear();
            self.scratch.extend_from_slice(template);
            return self.scratch.len();
        }
        let size = self.next_size(rng);
        self.scratch.clear();
        self.scratch.extend_from_slice(&self.fixed_packet_data[..size]);
        for edit in &mut self.non_fixed_edits {
            if ((edit.bit_offset + edit.n_bits) as usize) <= size * 8 {
                let value = edit.next_value(rng);
                write_bits(&mut self.scratch, edit.bit_offset, edit.n_bits, value);
            }
        }
        for (start, fixup) in &mut self.groups {
            if let Some(f) = fixup {
                if *start < self.scratch.len() {
                    f(*start, &mut self.scratch);
                }
            }
        }
        self.scratch.len()
    }

    fn take_buffer(&mut self, slot: usize, pool: &mut BufferPool) -> Option<BufferIndex> {
        let seg = self.buffer_bytes;
        let slot = &mut self.slots[slot];
        if slot.free_list.is_none() {
            slot.free_list = pool.free_list_for_size(seg, buffer::Backing::Heap).ok();
        }
        if let Some(bi) = slot.fifo.pop_front() {
            return Some(bi);
        }
        let fl = slot.free_list?;
        let mut batch = pool.alloc(fl, 64);
        let head = batch.pop();
        slot.fifo.extend(batch);
        head
    }

    /// Generate one packet into a (possibly chained) buffer; `None` when
    /// the pool is exhausted.
    pub fn generate_packet(
        &mut self,
        pool: &mut BufferPool,
        rng: &mut StdRng,
    ) -> Option<BufferIndex> {
        let total = self.next_packet_bytes(rng);
        let seg = self.buffer_bytes as usize;
        let mut produced: Vec<BufferIndex> = Vec::new();
        let mut at = 0usize;
        let mut slot = 0usize;
        while at < total {
            let take = (total - at).min(seg);
            let Some(bi) = self.take_buffer(slot, pool) else {
                pool.free(&produced, false);
                return None;
            };
            pool.fill(bi, &self.scratch[at..at + take]);
            if let Some(prev) = produced.last() {
                pool.get_mut(*prev).set_next(bi);
            }
            produced.push(bi);
            at += take;
            slot += 1;
        }
        let head = *produced.first()?;
        {
            let b = pool.get_mut(head);
            b.sw_if_index = [self.sw_if_index[RX], self.sw_if_index[TX]];
        }
        self.n_packets_generated += 1;
        Some(head)
    }
}

/// The packet generator: the pool of streams and their shared rng.
pub struct PgMain {
    pub(crate) streams: Vec<Option<Stream>>,
    index_by_name: HashMap<String, StreamIndex, RandomState>,
    pub(crate) rng: StdRng,
}

impl Default for PgMain {
    fn default() -> Self {
        Self::new()
    }
}

impl PgMain {
    /// An empty generator with a deterministic rng seed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            streams: Vec::new(),
            index_by_name: HashMap::with_hasher(RandomState::with_seed(0)),
            rng: StdRng::seed_from_u64(0x5043_4753),
        }
    }

    /// Compile and add a stream (disabled).
    ///
    /// # Errors
    ///
    /// Returns [`PgError`] for duplicate names, unspecified edits, or
    /// inconsistent sizes.
    pub fn add_stream(&mut self, config: StreamConfig) -> Result<StreamIndex, PgError> {
        if self.index_by_name.contains_key(&config.name) {
            return Err(PgError::DuplicateName(config.name));
        }
        let stream = Stream::compile(config)?;
        let index = match self.streams.iter().position(Option::is_none) {
            Some(i) => StreamIndex::new(i as u32),
            None => {
                self.streams.push(None);
                StreamIndex::new((self.streams.len() - 1) as u32)
            }
        };
        debug!(%index, name = %stream.name, "add stream");
        self.index_by_name.insert(stream.name.clone(), index);
        self.streams[index.as_usize()] = Some(stream);
        Ok(index)
    }

    /// Delete a stream.
    ///
    /// # Errors
    ///
    /// Returns [`PgError::NotFound`] for a stale index.
    pub fn del_stream(&mut self, index: StreamIndex) -> Result<(), PgError> {
        let stream = self
            .streams
            .get_mut(index.as_usize())
            .and_then(Option::take)
            .ok_or(PgError::NotFound)?;
        self.index_by_name.remove(&stream.name);
        debug!(%index, name = %stream.name, "del stream");
        Ok(())
    }

    /// Look a stream up by name.
    #[must_use]
    pub fn stream_by_name(&self, name: &str) -> Option<StreamIndex> {
        self.index_by_name.get(name).copied()
    }

    /// Borrow a stream.
    ///
    /// # Errors
    ///
    /// Returns [`PgError::NotFound`] for a stale index.
    pub fn stream(&self, index: StreamIndex) -> Result<&Stream, PgError> {
        self.streams
            .get(index.as_usize())
            .and_then(Option::as_ref)
            .ok_or(PgError::NotFound)
    }

    /// Borrow a stream mutably.
    ///
    /// # Errors
    ///
    /// Returns [`PgError::NotFound`] for a stale index.
    pub fn stream_mut(&mut self, index: StreamIndex) -> Result<&mut Stream, PgError> {
        self.streams
            .get_mut(index.as_usize())
            .and_then(Option::as_mut)
            .ok_or(PgError::NotFound)
    }

    /// All live streams.
    pub fn streams(&self) -> impl Iterator<Item = &Stream> {
        self.streams.iter().filter_map(Option::as_ref)
    }

    /// Re-create a stream from a deserialized descriptor, targeting
    /// `node_index` (node indices are not stable across processes, so the
    /// byte stream does not carry them).
    ///
    /// # Errors
    ///
    /// Returns [`PgError::DuplicateName`] when the name is taken.
    pub fn add_restored(
        &mut self,
        d: crate::serialize::StreamDescriptor,
        node_index: NodeIndex,
    ) -> Result<StreamIndex, PgError> {
        if self.index_by_name.contains_key(&d.name) {
            return Err(PgError::DuplicateName(d.name));
        }
        let seg = if d.buffer_bytes == 0 {
            d.max_packet_bytes.max(1)
        } else {
            d.buffer_bytes
        };
        let longest = d
            .replay_packet_templates
            .iter()
            .map(Vec::len)
            .max()
            .unwrap_or(d.max_packet_bytes as usize);
        let n_slots = longest.max(1).div_ceil(seg as usize);
        let enabled = d.enabled;
        let stream = Stream {
            name: d.name,
            node_index,
            enabled,
            min_packet_bytes: d.min_packet_bytes,
            max_packet_bytes: d.max_packet_bytes,
            size_kind: d.size_kind,
            fixed_packet_data: d.fixed_packet_data,
            fixed_packet_data_mask: d.fixed_packet_data_mask,
            non_fixed_edits: d.non_fixed_edits,
            groups: Vec::new(),
            rate_packets_per_second: d.rate_packets_per_second,
            n_packets_limit: d.n_packets_limit,
            n_packets_generated: 0,
            packet_accumulator: 0.0,
            time_last_generate: -1.0,
            last_increment_packet_size: d.min_packet_bytes,
            sw_if_index: d.sw_if_index,
            buffer_bytes: seg,
            slots: (0..n_slots)
                .map(|_| BufferSlot {
                    fifo: VecDeque::new(),
                    free_list: None,
                })
                .collect(),
            replay_packet_templates: d.replay_packet_templates,
            current_replay_packet_index: 0,
            scratch: Vec::new(),
        };
        let index = match self.streams.iter().position(Option::is_none) {
            Some(i) => StreamIndex::new(i as u32),
            None => {
                self.streams.push(None);
                StreamIndex::new((self.streams.len() - 1) as u32)
            }
        };
        self.index_by_name.insert(stream.name.clone(), index);
        self.streams[index.as_usize()] = Some(stream);
        Ok(index)
    }

    /// Enable or disable a stream; observed by the input node at its next
    /// poll. Enabling resets the rate accumulator, not the packet count.
    ///
    /// # Errors
    ///
    /// Returns [`PgError::NotFound`] for a stale index.
    pub fn enable_disable(&mut self, index: StreamIndex, enable: bool) -> Result<(), PgError> {
        let stream = self.stream_mut(index)?;
        stream.enabled = enable;
        if enable {
            stream.time_last_generate = -1.0;
            stream.packet_accumulator = 0.0;
        }
        debug!(%index, enable, "stream enable change");
        Ok(())
    }
}
