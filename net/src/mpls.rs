// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! MPLS label stack entries.

/// One 32-bit label stack entry:
/// `{20-bit label, 3-bit traffic class, 1-bit end-of-stack, 8-bit ttl}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelEntry {
    /// 20-bit label value.
    pub label: u32,
    /// Traffic class (the former EXP bits).
    pub traffic_class: u8,
    /// Set on the last entry of the stack.
    pub end_of_stack: bool,
    /// Time to live.
    pub ttl: u8,
}

/// Reserved label values 0..=15 keep their RFC-assigned meanings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservedLabel {
    /// 0: IPv4 explicit null.
    Ip4ExplicitNull,
    /// 1: router alert.
    RouterAlert,
    /// 2: IPv6 explicit null.
    Ip6ExplicitNull,
    /// 3: implicit null (never appears on the wire).
    ImplicitNull,
    /// 7: entropy label indicator.
    EntropyIndicator,
    /// 13: generic associated channel label.
    GenericAssociatedChannel,
    /// 14: OAM alert.
    OamAlert,
    /// 15: extension label.
    Extension,
    /// 4..=6 and 8..=12: reserved, unassigned.
    Unassigned(u8),
}

impl LabelEntry {
    /// Wire size of one entry.
    pub const BYTES: usize = 4;

    /// Decode from the 32-bit network-order word.
    #[must_use]
    pub fn from_word(word: u32) -> Self {
        LabelEntry {
            label: word >> 12,
            traffic_class: ((word >> 9) & 0x7) as u8,
            end_of_stack: word & 0x100 != 0,
            ttl: (word & 0xff) as u8,
        }
    }

    /// Encode to the 32-bit network-order word.
    #[must_use]
    pub fn to_word(self) -> u32 {
        ((self.label & 0x000f_ffff) << 12)
            | (u32::from(self.traffic_class & 0x7) << 9)
            | (u32::from(self.end_of_stack) << 8)
            | u32::from(self.ttl)
    }

    /// Decode from four wire octets.
    #[must_use]
    pub fn parse(bytes: [u8; 4]) -> Self {
        Self::from_word(u32::from_be_bytes(bytes))
    }

    /// Encode to four wire octets.
    #[must_use]
    pub fn to_bytes(self) -> [u8; 4] {
        self.to_word().to_be_bytes()
    }

    /// The RFC meaning of a reserved label value, if this is one.
    #[must_use]
    pub fn reserved(&self) -> Option<ReservedLabel> {
        match self.label {
            0 => Some(ReservedLabel::Ip4ExplicitNull),
            1 => Some(ReservedLabel::RouterAlert),
            2 => Some(ReservedLabel::Ip6ExplicitNull),
            3 => Some(ReservedLabel::ImplicitNull),
            7 => Some(ReservedLabel::EntropyIndicator),
            13 => Some(ReservedLabel::GenericAssociatedChannel),
            14 => Some(ReservedLabel::OamAlert),
            15 => Some(ReservedLabel::Extension),
            l @ (4..=6 | 8..=12) => Some(ReservedLabel::Unassigned(l as u8)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bit_layout() {
        let e = LabelEntry {
            label: 0xabcde,
            traffic_class: 5,
            end_of_stack: true,
            ttl: 64,
        };
        assert_eq!(e.to_word(), 0xabcde_b40);
        assert_eq!(LabelEntry::from_word(e.to_word()), e);
        assert_eq!(e.to_bytes(), [0xab, 0xcd, 0xeb, 0x40]);
    }

    #[test]
    fn reserved_labels() {
        let mk = |label| LabelEntry {
            label,
            traffic_class: 0,
            end_of_stack: false,
            ttl: 1,
        };
        assert_eq!(mk(0).reserved(), Some(ReservedLabel::Ip4ExplicitNull));
        assert_eq!(mk(3).reserved(), Some(ReservedLabel::ImplicitNull));
        assert_eq!(mk(9).reserved(), Some(ReservedLabel::Unassigned(9)));
        assert_eq!(mk(15).reserved(), Some(ReservedLabel::Extension));
        assert_eq!(mk(16).reserved(), None);
        assert_eq!(mk(0xfffff).reserved(), None);
    }
}
