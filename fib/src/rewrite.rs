// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Per-adjacency L2 header templates and the paint routine.

use arrayvec::ArrayVec;
use graph::NodeIndex;

/// Inline capacity for rewrite bytes: 64 octets minus the header words.
/// Enough for Ethernet plus two VLAN tags, or four MPLS labels.
pub const REWRITE_INLINE_BYTES: usize = 48;

/// A pre-computed L2 header held inline in the adjacency, so the paint
/// runs right-to-left into the packet's headroom without chasing a
/// pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteHeader {
    /// Interface the packet leaves through.
    pub sw_if_index: u32,
    /// Node the painted packet is handed to (the interface output node).
    pub node_index: NodeIndex,
    /// Edge from the rewrite node to `node_index`.
    pub next_edge: u16,
    /// Largest L3 payload this path can carry.
    pub max_l3_packet_bytes: u16,
    data: ArrayVec<u8, REWRITE_INLINE_BYTES>,
}

/// Rewrite bytes exceed the inline capacity.
#[derive(Debug, thiserror::Error)]
#[error("rewrite of {0} octets exceeds inline capacity")]
pub struct RewriteTooLong(pub usize);

impl RewriteHeader {
    /// An empty rewrite bound to an interface and output node.
    #[must_use]
    pub fn new(sw_if_index: u32, node_index: NodeIndex, next_edge: u16, max_l3: u16) -> Self {
        Self {
            sw_if_index,
            node_index,
            next_edge,
            max_l3_packet_bytes: max_l3,
            data: ArrayVec::new(),
        }
    }

    /// Install the header bytes.
    ///
    /// # Errors
    ///
    /// Returns [`RewriteTooLong`] past the inline capacity; the previous
    /// bytes are left in place.
    pub fn set_data(&mut self, bytes: &[u8]) -> Result<(), RewriteTooLong> {
        let mut data = ArrayVec::new();
        data.try_extend_from_slice(bytes)
            .map_err(|_| RewriteTooLong(bytes.len()))?;
        self.data = data;
        Ok(())
    }

    /// Octets the paint will prepend.
    #[must_use]
    pub fn data_bytes(&self) -> usize {
        self.data.len()
    }

    /// The header bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Copy `rw`'s bytes over the front of `dst`, which the caller has already
/// grown into the packet's headroom by [`RewriteHeader::data_bytes`].
///
/// The copy runs right-to-left in machine words, unrolled for headers of up
/// to `most_likely_bytes` (the caller's hint for the common case, e.g. 14
/// for untagged Ethernet), with a residue loop for the rest.
pub fn rewrite_one_header(rw: &RewriteHeader, dst: &mut [u8], most_likely_bytes: usize) {
    let n = rw.data_bytes();
    debug_assert!(dst.len() >= n);
    let src = rw.data();
    if n <= most_likely_bytes.min(32) {
        // unrolled word path: up to 4 words, right to left
        let mut remaining = n;
        while remaining >= 8 {
            let at = remaining - 8;
            dst[at..at + 8].copy_from_slice(&src[at..at + 8]);
            remaining -= 8;
        }
        if remaining > 0 {
            dst[..remaining].copy_from_slice(&src[..remaining]);
        }
    } else {
        dst[..n].copy_from_slice(src);
    }
}

/// Dual-issue variant for the two-at-a-time inner loops of the lookup
/// nodes.
pub fn rewrite_two_headers(
    rw0: &RewriteHeader,
    rw1: &RewriteHeader,
    dst0: &mut [u8],
    dst1: &mut [u8],
    most_likely_bytes: usize,
) {
    rewrite_one_header(rw0, dst0, most_likely_bytes);
    rewrite_one_header(rw1, dst1, most_likely_bytes);
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn data_round_trips() {
        let mut rw = RewriteHeader::new(0, NodeIndex::new(1), 0, 1500);
        assert_eq!(rw.data_bytes(), 0);
        rw.set_data(&[1, 2, 3]).unwrap();
        assert_eq!(rw.data(), &[1, 2, 3]);
        assert_eq!(rw.data_bytes(), 3);
    }

    #[test]
    fn capacity_is_enforced() {
        let mut rw = RewriteHeader::new(0, NodeIndex::new(1), 0, 1500);
        assert!(rw.set_data(&[0x7; REWRITE_INLINE_BYTES]).is_ok());
        assert!(rw.set_data(&[0; REWRITE_INLINE_BYTES + 1]).is_err());
        // a refused install leaves the previous bytes in place
        assert_eq!(rw.data(), &[0x7; REWRITE_INLINE_BYTES][..]);
    }

    #[test]
    fn paint_copies_exactly_the_header() {
        let mut rw = RewriteHeader::new(0, NodeIndex::new(1), 0, 1500);
        let header: Vec<u8> = (0..14).collect();
        rw.set_data(&header).unwrap();
        for hint in [14usize, 4, 64] {
            let mut dst = vec![0xff; 20];
            rewrite_one_header(&rw, &mut dst, hint);
            assert_eq!(&dst[..14], header.as_slice(), "hint {hint}");
            assert_eq!(&dst[14..], &[0xff; 6], "hint {hint} must not spill");
        }
    }

    #[test]
    fn paint_both_of_two() {
        let mut a = RewriteHeader::new(0, NodeIndex::new(1), 0, 1500);
        let mut b = RewriteHeader::new(0, NodeIndex::new(1), 0, 1500);
        a.set_data(&[0xaa; 18]).unwrap();
        b.set_data(&[0xbb; 14]).unwrap();
        let mut da = [0u8; 18];
        let mut db = [0u8; 14];
        rewrite_two_headers(&a, &b, &mut da, &mut db, 14);
        assert_eq!(da, [0xaa; 18]);
        assert_eq!(db, [0xbb; 14]);
    }
}
