// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Packet edits: bit-addressed fields of a stream's template.

use rand::Rng;

/// Packet-generator control failures.
#[derive(Debug, thiserror::Error)]
pub enum PgError {
    /// A stream name is already taken.
    #[error("duplicate stream name: {0}")]
    DuplicateName(String),
    /// The stream index does not name a live stream.
    #[error("no such stream")]
    NotFound,
    /// An edit was left unspecified at enable time.
    #[error("unspecified edit at bit offset {0}")]
    UnspecifiedEdit(u32),
    /// An edit or size bound is malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The serialized stream set is malformed or of an unknown version.
    #[error("bad stream serialization: {0}")]
    BadSerialization(&'static str),
}

/// How an edit produces its per-packet value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditKind {
    /// Pre-merged into the template.
    Fixed,
    /// Starts at the low bound, steps by one per packet, wraps past the
    /// high bound.
    Increment,
    /// Sampled uniformly in `[lo, hi]`.
    Random,
    /// Deferred; the owning protocol layer must resolve it before enable.
    Unspecified,
}

/// One edit: a value written into a bit-addressed field of the packet.
///
/// Values are held in network byte order, at most 64 bits wide.
#[derive(Debug, Clone, PartialEq)]
pub struct Edit {
    /// Value production.
    pub kind: EditKind,
    /// Bit offset of the field within the packet.
    pub bit_offset: u32,
    /// Field width in bits.
    pub n_bits: u32,
    /// Low bound (or the fixed value).
    pub lo: u64,
    /// High bound; unused for fixed edits.
    pub hi: u64,
    /// Increment state.
    pub last_value: u64,
}

impl Edit {
    /// A fixed-value edit.
    #[must_use]
    pub fn fixed(bit_offset: u32, n_bits: u32, value: u64) -> Self {
        Self {
            kind: EditKind::Fixed,
            bit_offset,
            n_bits,
            lo: value,
            hi: value,
            last_value: value,
        }
    }

    /// An incrementing edit over `[lo, hi]`.
    #[must_use]
    pub fn increment(bit_offset: u32, n_bits: u32, lo: u64, hi: u64) -> Self {
        Self {
            kind: EditKind::Increment,
            bit_offset,
            n_bits,
            lo,
            hi,
            last_value: lo,
        }
    }

    /// A uniformly random edit over `[lo, hi]`.
    #[must_use]
    pub fn random(bit_offset: u32, n_bits: u32, lo: u64, hi: u64) -> Self {
        Self {
            kind: EditKind::Random,
            bit_offset,
            n_bits,
            lo,
            hi,
            last_value: lo,
        }
    }

    /// The next value this edit writes, advancing increment state.
    pub fn next_value<R: Rng>(&mut self, rng: &mut R) -> u64 {
        match self.kind {
            EditKind::Fixed | EditKind::Unspecified => self.lo,
            EditKind::Increment => {
                let v = self.last_value;
                self.last_value = if v >= self.hi { self.lo } else { v + 1 };
                v
            }
            EditKind::Random => rng.random_range(self.lo..=self.hi),
        }
    }
}

/// Write `value`'s low `n_bits` into `data` at `bit_offset`, big-endian
/// bit order (bit 0 is the most significant bit of byte 0).
pub fn write_bits(data: &mut [u8], bit_offset: u32, n_bits: u32, value: u64) {
    for i in 0..n_bits {
        let bit = (value >> (n_bits - 1 - i)) & 1;
        let at = bit_offset + i;
        let byte = (at / 8) as usize;
        if byte >= data.len() {
            break;
        }
        let mask = 0x80u8 >> (at % 8);
        if bit == 1 {
            data[byte] |= mask;
        } else {
            data[byte] &= !mask;
        }
    }
}

/// Read `n_bits` at `bit_offset` back out of `data`.
#[must_use]
pub fn read_bits(data: &[u8], bit_offset: u32, n_bits: u32) -> u64 {
    let mut out = 0u64;
    for i in 0..n_bits {
        let at = bit_offset + i;
        let byte = (at / 8) as usize;
        if byte >= data.len() {
            break;
        }
        let bit = u64::from(data[byte] >> (7 - at % 8) & 1);
        out = (out << 1) | bit;
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn byte_aligned_round_trip() {
        let mut data = [0u8; 8];
        write_bits(&mut data, 16, 16, 0xbeef);
        assert_eq!(&data[2..4], &[0xbe, 0xef]);
        assert_eq!(read_bits(&data, 16, 16), 0xbeef);
    }

    #[test]
    fn sub_byte_fields() {
        // a 3-bit priority at bit 0 and a 12-bit id at bit 4, like a vlan tag
        let mut data = [0u8; 2];
        write_bits(&mut data, 0, 3, 0b101);
        write_bits(&mut data, 4, 12, 0xabc);
        assert_eq!(data, [0b1010_1010, 0xbc]);
        assert_eq!(read_bits(&data, 0, 3), 0b101);
        assert_eq!(read_bits(&data, 4, 12), 0xabc);
    }

    #[test]
    fn increment_wraps_at_high_bound() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let mut e = Edit::increment(0, 8, 3, 5);
        let got: Vec<u64> = (0..7).map(|_| e.next_value(&mut rng)).collect();
        assert_eq!(got, vec![3, 4, 5, 3, 4, 5, 3]);
    }

    #[test]
    fn random_stays_in_bounds() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(2);
        let mut e = Edit::random(0, 16, 100, 200);
        for _ in 0..1000 {
            let v = e.next_value(&mut rng);
            assert!((100..=200).contains(&v));
        }
    }

    #[test]
    fn mac_width_fields() {
        let mut data = [0u8; 6];
        write_bits(&mut data, 0, 48, 0x0011_2233_4455);
        assert_eq!(data, [0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
    }
}
