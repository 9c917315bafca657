// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Ethernet header: 6-octet destination, 6-octet source, network-order
//! ethertype, with up to two 802.1Q tags inserted before the type.

pub mod ethtype;
pub mod mac;

pub use ethtype::EthType;
pub use mac::Mac;

use crate::vlan::VlanTag;

/// Untagged Ethernet header length.
pub const HEADER_BYTES: usize = 14;

/// The fixed part of an Ethernet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetHeader {
    /// Destination address.
    pub dst: Mac,
    /// Source address.
    pub src: Mac,
    /// Ethertype (or 802.3 length) as read from the wire.
    pub ether_type: EthType,
}

/// Failure to parse an Ethernet header.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EthParseError {
    /// Fewer octets than an untagged header.
    #[error("frame too short for ethernet header: {0} octets")]
    Truncated(usize),
    /// A VLAN tag was indicated but the frame ends inside it.
    #[error("frame ends inside vlan tag")]
    TruncatedTag,
}

impl EthernetHeader {
    /// Parse the fixed 14 octets.
    ///
    /// # Errors
    ///
    /// Returns [`EthParseError::Truncated`] when fewer than 14 octets are
    /// available.
    pub fn parse(data: &[u8]) -> Result<Self, EthParseError> {
        if data.len() < HEADER_BYTES {
            return Err(EthParseError::Truncated(data.len()));
        }
        let mut dst = [0u8; 6];
        let mut src = [0u8; 6];
        dst.copy_from_slice(&data[0..6]);
        src.copy_from_slice(&data[6..12]);
        Ok(EthernetHeader {
            dst: Mac(dst),
            src: Mac(src),
            ether_type: EthType::from_be_bytes([data[12], data[13]]),
        })
    }

    /// Serialize into `out`, which must hold at least 14 octets.
    pub fn write(&self, out: &mut [u8]) {
        out[0..6].copy_from_slice(self.dst.as_ref());
        out[6..12].copy_from_slice(self.src.as_ref());
        out[12..14].copy_from_slice(&self.ether_type.to_be_bytes());
    }
}

/// An Ethernet header together with any 802.1Q tags found behind it.
///
/// `inner_type` is the ethertype the payload should be demuxed on: the
/// outermost type for untagged frames, the innermost tag's type otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEthernet {
    /// Fixed header as read from the wire.
    pub header: EthernetHeader,
    /// Zero, one, or two tags, outermost first.
    pub tags: arrayvec::ArrayVec<VlanTag, 2>,
    /// Ethertype governing the payload.
    pub inner_type: EthType,
    /// Octets consumed, including tags.
    pub header_bytes: usize,
}

/// Parse an Ethernet header and up to two VLAN tags.
///
/// # Errors
///
/// Returns [`EthParseError`] when the frame ends inside the header or an
/// indicated tag.
pub fn parse_ethernet(data: &[u8]) -> Result<ParsedEthernet, EthParseError> {
    let header = EthernetHeader::parse(data)?;
    let mut tags = arrayvec::ArrayVec::new();
    let mut inner_type = header.ether_type;
    let mut at = HEADER_BYTES;
    while inner_type == EthType::VLAN && tags.len() < 2 {
        if data.len() < at + VlanTag::BYTES {
            return Err(EthParseError::TruncatedTag);
        }
        let tag = VlanTag::parse([data[at], data[at + 1], data[at + 2], data[at + 3]]);
        inner_type = tag.inner_type;
        at += VlanTag::BYTES;
        tags.push(tag);
    }
    Ok(ParsedEthernet {
        header,
        tags,
        inner_type,
        header_bytes: at,
    })
}
