// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! ICMPv6 neighbor discovery: the solicitation/advertisement pair and the
//! link-layer-address option, which is all the core answers itself.

use crate::checksum;
use crate::eth::Mac;
use arrayvec::ArrayVec;
use bitflags::bitflags;
use std::net::Ipv6Addr;

/// ICMPv6 type: router solicitation.
pub const ROUTER_SOLICITATION: u8 = 133;
/// ICMPv6 type: router advertisement.
pub const ROUTER_ADVERTISEMENT: u8 = 134;
/// ICMPv6 type: neighbor solicitation.
pub const NEIGHBOR_SOLICITATION: u8 = 135;
/// ICMPv6 type: neighbor advertisement.
pub const NEIGHBOR_ADVERTISEMENT: u8 = 136;

/// ND messages are only valid with this hop limit.
pub const ND_HOP_LIMIT: u8 = 255;

/// ND option type: source link-layer address.
pub const OPTION_SOURCE_LINK_LAYER: u8 = 1;
/// ND option type: target link-layer address.
pub const OPTION_TARGET_LINK_LAYER: u8 = 2;

bitflags! {
    /// Neighbor-advertisement flag word (upper bits of the reserved word).
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct NaFlags: u32 {
        /// Sender is a router.
        const ROUTER = 1 << 31;
        /// Advertisement answers a solicitation.
        const SOLICITED = 1 << 30;
        /// Cached link-layer addresses should be overridden.
        const OVERRIDE = 1 << 29;
    }
}

/// Failure to parse an ND message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NdParseError {
    /// Message shorter than its fixed part.
    #[error("nd message truncated")]
    Truncated,
    /// Not the expected ICMPv6 type.
    #[error("unexpected icmp6 type {0}")]
    WrongType(u8),
    /// An option length field is zero or runs past the message.
    #[error("malformed nd option")]
    BadOption,
}

/// A parsed neighbor solicitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeighborSolicitation {
    /// Address whose link-layer address is being solicited.
    pub target: Ipv6Addr,
    /// Source link-layer address option, when present and well-formed.
    pub source_link_layer: Option<Mac>,
}

/// Walk the 8-octet-unit TLV options and pull out a link-layer address of
/// the wanted option type.
fn find_link_layer(mut options: &[u8], wanted: u8) -> Result<Option<Mac>, NdParseError> {
    let mut found = None;
    while !options.is_empty() {
        if options.len() < 2 {
            return Err(NdParseError::BadOption);
        }
        let kind = options[0];
        let len = options[1] as usize * 8;
        if len == 0 || len > options.len() {
            return Err(NdParseError::BadOption);
        }
        if kind == wanted && options[1] == 1 {
            let mut mac = [0u8; 6];
            mac.copy_from_slice(&options[2..8]);
            found = Some(Mac(mac));
        }
        options = &options[len..];
    }
    Ok(found)
}

impl NeighborSolicitation {
    /// Parse an ICMPv6 message known (by next-header demux) to be ND.
    ///
    /// # Errors
    ///
    /// Returns [`NdParseError`] for a short message, a non-solicitation
    /// type, or malformed options.
    pub fn parse(icmp: &[u8]) -> Result<Self, NdParseError> {
        if icmp.len() < 24 {
            return Err(NdParseError::Truncated);
        }
        if icmp[0] != NEIGHBOR_SOLICITATION {
            return Err(NdParseError::WrongType(icmp[0]));
        }
        let mut target = [0u8; 16];
        target.copy_from_slice(&icmp[8..24]);
        Ok(NeighborSolicitation {
            target: Ipv6Addr::from(target),
            source_link_layer: find_link_layer(&icmp[24..], OPTION_SOURCE_LINK_LAYER)?,
        })
    }
}

/// A neighbor advertisement to be serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeighborAdvertisement {
    /// Flag word.
    pub flags: NaFlags,
    /// Address being advertised.
    pub target: Ipv6Addr,
    /// Our link-layer address, sent as the target-link-layer option.
    pub target_link_layer: Mac,
}

/// Serialized neighbor-advertisement length: fixed part plus one option.
pub const NA_BYTES: usize = 32;

impl NeighborAdvertisement {
    /// Serialized message length: fixed part plus one option.
    pub const BYTES: usize = NA_BYTES;

    /// Serialize the full ICMPv6 message, computing the checksum over the
    /// pseudo header for `src`/`dst`.
    #[must_use]
    pub fn to_bytes(&self, src: &Ipv6Addr, dst: &Ipv6Addr) -> ArrayVec<u8, NA_BYTES> {
        let mut out = ArrayVec::new();
        out.push(NEIGHBOR_ADVERTISEMENT);
        out.push(0); // code
        out.push(0); // checksum, patched below
        out.push(0);
        for b in self.flags.bits().to_be_bytes() {
            out.push(b);
        }
        for b in self.target.octets() {
            out.push(b);
        }
        out.push(OPTION_TARGET_LINK_LAYER);
        out.push(1);
        for b in self.target_link_layer.0 {
            out.push(b);
        }
        let c = message_checksum(src, dst, &out);
        out[2..4].copy_from_slice(&c.to_be_bytes());
        out
    }

    /// Parse back a serialized advertisement (the format/unformat pair used
    /// in tests).
    ///
    /// # Errors
    ///
    /// Returns [`NdParseError`] for a short message, a non-advertisement
    /// type, or malformed options.
    pub fn parse(icmp: &[u8]) -> Result<Self, NdParseError> {
        if icmp.len() < 24 {
            return Err(NdParseError::Truncated);
        }
        if icmp[0] != NEIGHBOR_ADVERTISEMENT {
            return Err(NdParseError::WrongType(icmp[0]));
        }
        let flags = NaFlags::from_bits_truncate(u32::from_be_bytes([
            icmp[4], icmp[5], icmp[6], icmp[7],
        ]));
        let mut target = [0u8; 16];
        target.copy_from_slice(&icmp[8..24]);
        let mac = find_link_layer(&icmp[24..], OPTION_TARGET_LINK_LAYER)?
            .ok_or(NdParseError::BadOption)?;
        Ok(NeighborAdvertisement {
            flags,
            target: Ipv6Addr::from(target),
            target_link_layer: mac,
        })
    }
}

/// ICMPv6 checksum over the IPv6 pseudo header and the message itself.
#[must_use]
pub fn message_checksum(src: &Ipv6Addr, dst: &Ipv6Addr, icmp: &[u8]) -> u16 {
    let mut sum = checksum::sum_bytes(0, &src.octets());
    sum = checksum::sum_bytes(sum, &dst.octets());
    sum += icmp.len() as u32; // upper-layer length
    sum += 58; // next header
    sum = checksum::sum_bytes(sum, icmp);
    checksum::fold(sum)
}

/// True iff the message's embedded checksum verifies for `src`/`dst`.
#[must_use]
pub fn verify_checksum(src: &Ipv6Addr, dst: &Ipv6Addr, icmp: &[u8]) -> bool {
    let mut sum = checksum::sum_bytes(0, &src.octets());
    sum = checksum::sum_bytes(sum, &dst.octets());
    sum += icmp.len() as u32;
    sum += 58;
    sum = checksum::sum_bytes(sum, icmp);
    checksum::fold(sum) == 0
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod test {
    use super::*;

    fn addrs() -> (Ipv6Addr, Ipv6Addr) {
        ("fe80::1".parse().unwrap(), "fe80::2".parse().unwrap())
    }

    fn solicitation(target: Ipv6Addr, sll: Option<Mac>) -> Vec<u8> {
        let (src, dst) = addrs();
        let mut msg = vec![NEIGHBOR_SOLICITATION, 0, 0, 0, 0, 0, 0, 0];
        msg.extend_from_slice(&target.octets());
        if let Some(mac) = sll {
            msg.push(OPTION_SOURCE_LINK_LAYER);
            msg.push(1);
            msg.extend_from_slice(&mac.0);
        }
        let c = message_checksum(&src, &dst, &msg);
        msg[2..4].copy_from_slice(&c.to_be_bytes());
        msg
    }

    #[test]
    fn parse_solicitation_with_option() {
        let target: Ipv6Addr = "2001:db8::42".parse().unwrap();
        let mac = Mac([0xde, 0xad, 0xbe, 0xef, 0x00, 0x01]);
        let msg = solicitation(target, Some(mac));
        let (src, dst) = addrs();
        assert!(verify_checksum(&src, &dst, &msg));
        let ns = NeighborSolicitation::parse(&msg).unwrap();
        assert_eq!(ns.target, target);
        assert_eq!(ns.source_link_layer, Some(mac));
    }

    #[test]
    fn parse_solicitation_without_option() {
        let msg = solicitation("::1".parse().unwrap(), None);
        let ns = NeighborSolicitation::parse(&msg).unwrap();
        assert_eq!(ns.source_link_layer, None);
    }

    #[test]
    fn rejects_zero_length_option() {
        let mut msg = solicitation("::1".parse().unwrap(), None);
        msg.extend_from_slice(&[OPTION_SOURCE_LINK_LAYER, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(
            NeighborSolicitation::parse(&msg),
            Err(NdParseError::BadOption)
        );
    }

    #[test]
    fn advertisement_round_trip() {
        let (src, dst) = addrs();
        let na = NeighborAdvertisement {
            flags: NaFlags::SOLICITED | NaFlags::OVERRIDE,
            target: "2001:db8::42".parse().unwrap(),
            target_link_layer: Mac([2, 0, 0, 0, 0, 9]),
        };
        let bytes = na.to_bytes(&src, &dst);
        assert_eq!(bytes.len(), NeighborAdvertisement::BYTES);
        assert!(verify_checksum(&src, &dst, &bytes));
        assert_eq!(NeighborAdvertisement::parse(&bytes).unwrap(), na);
    }
}
