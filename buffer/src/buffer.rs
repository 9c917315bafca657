// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The per-buffer header.

use crate::BufferIndex;
use bitflags::bitflags;
use static_assertions::const_assert;

/// Slot of the receive interface in [`Buffer::sw_if_index`].
pub const RX: usize = 0;
/// Slot of the transmit interface in [`Buffer::sw_if_index`].
pub const TX: usize = 1;

bitflags! {
    /// Per-buffer flag word.
    ///
    /// Bits 8..16 are reserved for upper layers; the core never interprets
    /// them (an L4 stage might record "checksum computed" / "checksum valid"
    /// there).
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct BufferFlags: u32 {
        /// `next_buffer` holds the index of the following chain segment.
        const NEXT_PRESENT = 1 << 0;
        /// A trace record is being collected for this buffer.
        const IS_TRACED = 1 << 1;
        /// Packet originated locally rather than from an interface.
        const LOCALLY_GENERATED = 1 << 2;
        /// First user flag.
        const USER0 = 1 << 8;
        /// Second user flag.
        const USER1 = 1 << 9;
        /// Third user flag.
        const USER2 = 1 << 10;
        /// Fourth user flag.
        const USER3 = 1 << 11;
        /// Fifth user flag.
        const USER4 = 1 << 12;
        /// Sixth user flag.
        const USER5 = 1 << 13;
        /// Seventh user flag.
        const USER6 = 1 << 14;
        /// Eighth user flag.
        const USER7 = 1 << 15;
    }
}

/// Fixed-size scratch area reinterpreted by the owning protocol node.
///
/// IP lookup keeps `(dst_adj_index, src_adj_index, flow_hash)` here; the
/// feature dispatcher keeps the current config index and byte cursor. The
/// layout in force is implied by the node currently running; lane accessors
/// keep readers and writers byte-order agnostic.
#[repr(C, align(8))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opaque([u8; Opaque::SIZE]);

// The spec floor for the scratch area; protocol layouts assume it.
const_assert!(Opaque::SIZE >= 32);

impl Default for Opaque {
    fn default() -> Self {
        Self([0; Opaque::SIZE])
    }
}

impl Opaque {
    /// Scratch area size in octets.
    pub const SIZE: usize = 48;

    /// Number of u32 lanes.
    pub const N_LANES: usize = Self::SIZE / 4;

    /// Read lane `lane` as a host-order u32.
    #[must_use]
    pub fn u32(&self, lane: usize) -> u32 {
        let at = lane * 4;
        u32::from_ne_bytes([self.0[at], self.0[at + 1], self.0[at + 2], self.0[at + 3]])
    }

    /// Write lane `lane` as a host-order u32.
    pub fn set_u32(&mut self, lane: usize, value: u32) {
        self.0[lane * 4..lane * 4 + 4].copy_from_slice(&value.to_ne_bytes());
    }

    /// The raw scratch bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; Self::SIZE] {
        &self.0
    }

    /// The raw scratch bytes, mutably.
    pub fn as_bytes_mut(&mut self) -> &mut [u8; Self::SIZE] {
        &mut self.0
    }

    /// Zero the whole area.
    pub fn clear(&mut self) {
        self.0 = [0; Self::SIZE];
    }
}

/// Per-buffer header.
///
/// The payload segment itself lives in the owning free-list's backing
/// region; the header records where the live bytes start and end within it.
#[derive(Debug, Clone)]
pub struct Buffer {
    /// Signed offset from the segment origin where live data begins.
    /// Negative values reach into the left headroom, which is how headers
    /// are prepended.
    pub current_data: i32,
    /// Octets of live data in this segment.
    pub current_length: u32,
    /// Flag word.
    pub flags: BufferFlags,
    /// Following segment, valid iff [`BufferFlags::NEXT_PRESENT`].
    pub next_buffer: BufferIndex,
    /// Receive / transmit sw-interface indices (`u32::MAX` when unset).
    pub sw_if_index: [u32; 2],
    /// Error code set by the producing node; zero means no error.
    /// The upper half identifies the node, the lower half its local code.
    pub error: u32,
    /// Slot in the owner node's trace buffer while `IS_TRACED` is set.
    pub trace_index: u32,
    /// Free-list this buffer belongs to.
    pub(crate) free_list: crate::FreeListIndex,
    /// Slot within the free-list's backing region.
    pub(crate) slot: u32,
    /// Allocation state, used to catch double-free in debug builds.
    pub(crate) live: bool,
    /// Protocol scratch; meaningful only on the chain head.
    pub opaque: Opaque,
}

impl Buffer {
    /// Reset the fields a fresh allocation guarantees zeroed.
    pub(crate) fn reset(&mut self) {
        self.current_data = 0;
        self.current_length = 0;
        self.flags = BufferFlags::empty();
        self.next_buffer = BufferIndex::INVALID;
        self.sw_if_index = [u32::MAX, u32::MAX];
        self.error = 0;
        self.trace_index = 0;
        self.opaque.clear();
    }

    /// True iff a following chain segment exists.
    #[must_use]
    pub fn has_next(&self) -> bool {
        self.flags.contains(BufferFlags::NEXT_PRESENT)
    }

    /// Link `next` after this buffer.
    pub fn set_next(&mut self, next: BufferIndex) {
        self.flags.insert(BufferFlags::NEXT_PRESENT);
        self.next_buffer = next;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn opaque_lane_round_trip() {
        let mut o = Opaque::default();
        o.set_u32(0, 0xdead_beef);
        o.set_u32(Opaque::N_LANES - 1, 7);
        assert_eq!(o.u32(0), 0xdead_beef);
        assert_eq!(o.u32(Opaque::N_LANES - 1), 7);
        o.clear();
        assert_eq!(o.u32(0), 0);
    }

    #[test]
    fn user_flags_do_not_overlap_core_flags() {
        let core = BufferFlags::NEXT_PRESENT | BufferFlags::IS_TRACED | BufferFlags::LOCALLY_GENERATED;
        let user = BufferFlags::USER0
            | BufferFlags::USER1
            | BufferFlags::USER2
            | BufferFlags::USER3
            | BufferFlags::USER4
            | BufferFlags::USER5
            | BufferFlags::USER6
            | BufferFlags::USER7;
        assert_eq!(core & user, BufferFlags::empty());
        assert_eq!(user.bits().count_ones(), 8);
    }
}
