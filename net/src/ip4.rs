// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! IPv4 fixed header and the input-path validation rules.

use crate::checksum;
use std::net::Ipv4Addr;

/// Fixed header length; the core punts anything with options.
pub const HEADER_BYTES: usize = 20;

/// Byte offset of the ttl field.
pub const TTL_OFFSET: usize = 8;
/// Byte offset of the header checksum.
pub const CHECKSUM_OFFSET: usize = 10;

/// Decoded 20-octet IPv4 header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    /// Type of service.
    pub tos: u8,
    /// Total length as stated by the header.
    pub length: u16,
    /// Identification.
    pub id: u16,
    /// Flags (3 bits) and fragment offset (13 bits), as one wire word.
    pub flags_and_fragment_offset: u16,
    /// Time to live.
    pub ttl: u8,
    /// Payload protocol.
    pub protocol: u8,
    /// Header checksum as read from the wire.
    pub checksum: u16,
    /// Source address.
    pub src: Ipv4Addr,
    /// Destination address.
    pub dst: Ipv4Addr,
}

/// Why an IPv4 packet fails input validation.
///
/// Each variant corresponds to one input-node error counter; `Options` is
/// the single punt disposition, everything else drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Ip4Error {
    /// Version field is not 4.
    #[error("ip4 version not 4")]
    BadVersion,
    /// Header carries options (ihl != 5); punted to the host stack.
    #[error("ip4 options present")]
    Options,
    /// Header checksum does not verify.
    #[error("ip4 bad header checksum")]
    BadChecksum,
    /// Stated length shorter than the fixed header or longer than the
    /// octets actually received.
    #[error("ip4 bad length")]
    BadLength,
    /// Fragment offset of exactly one, an overwrite-attack signature.
    #[error("ip4 fragment offset 1")]
    FragmentOffsetOne,
    /// TTL already 0 or 1; the packet's time is up.
    #[error("ip4 time exceeded")]
    TimeExceeded,
    /// Fewer octets than a fixed header.
    #[error("ip4 truncated")]
    Truncated,
}

impl Ipv4Header {
    /// Decode 20 octets without validation.
    ///
    /// # Errors
    ///
    /// Returns [`Ip4Error::Truncated`] when fewer than 20 octets are given.
    pub fn parse(data: &[u8]) -> Result<Self, Ip4Error> {
        if data.len() < HEADER_BYTES {
            return Err(Ip4Error::Truncated);
        }
        Ok(Ipv4Header {
            tos: data[1],
            length: u16::from_be_bytes([data[2], data[3]]),
            id: u16::from_be_bytes([data[4], data[5]]),
            flags_and_fragment_offset: u16::from_be_bytes([data[6], data[7]]),
            ttl: data[TTL_OFFSET],
            protocol: data[9],
            checksum: u16::from_be_bytes([data[CHECKSUM_OFFSET], data[CHECKSUM_OFFSET + 1]]),
            src: Ipv4Addr::new(data[12], data[13], data[14], data[15]),
            dst: Ipv4Addr::new(data[16], data[17], data[18], data[19]),
        })
    }

    /// Fragment offset in 8-octet units.
    #[must_use]
    pub fn fragment_offset(&self) -> u16 {
        self.flags_and_fragment_offset & 0x1fff
    }

    /// Serialize with `version=4, ihl=5` and a freshly computed checksum.
    pub fn write(&self, out: &mut [u8]) {
        out[0] = 0x45;
        out[1] = self.tos;
        out[2..4].copy_from_slice(&self.length.to_be_bytes());
        out[4..6].copy_from_slice(&self.id.to_be_bytes());
        out[6..8].copy_from_slice(&self.flags_and_fragment_offset.to_be_bytes());
        out[TTL_OFFSET] = self.ttl;
        out[9] = self.protocol;
        out[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&[0, 0]);
        out[12..16].copy_from_slice(&self.src.octets());
        out[16..20].copy_from_slice(&self.dst.octets());
        let c = checksum::checksum(&out[..HEADER_BYTES]);
        out[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&c.to_be_bytes());
    }
}

/// Run the full input-node validation over the raw header octets.
///
/// `l2_payload_len` is how many octets the link layer actually delivered
/// for the IP packet.
///
/// # Errors
///
/// Returns the [`Ip4Error`] naming the first failed check, in the input
/// node's canonical order.
pub fn validate(data: &[u8], l2_payload_len: usize) -> Result<Ipv4Header, Ip4Error> {
    if data.len() < HEADER_BYTES {
        return Err(Ip4Error::Truncated);
    }
    let version = data[0] >> 4;
    if version != 4 {
        return Err(Ip4Error::BadVersion);
    }
    let ihl = data[0] & 0x0f;
    if ihl != 5 {
        return Err(Ip4Error::Options);
    }
    if !checksum::verify(&data[..HEADER_BYTES]) {
        return Err(Ip4Error::BadChecksum);
    }
    let header = Ipv4Header::parse(data)?;
    if !(HEADER_BYTES..=l2_payload_len).contains(&(header.length as usize)) {
        return Err(Ip4Error::BadLength);
    }
    if header.fragment_offset() == 1 {
        return Err(Ip4Error::FragmentOffsetOne);
    }
    if header.ttl <= 1 {
        return Err(Ip4Error::TimeExceeded);
    }
    Ok(header)
}

/// Decrement the ttl in place and patch the header checksum incrementally.
///
/// Returns the new ttl. The caller has already validated `ttl > 1`.
pub fn decrement_ttl(header: &mut [u8]) -> u8 {
    let old_word = u16::from_be_bytes([header[TTL_OFFSET], header[TTL_OFFSET + 1]]);
    header[TTL_OFFSET] -= 1;
    let new_word = u16::from_be_bytes([header[TTL_OFFSET], header[TTL_OFFSET + 1]]);
    let old_sum = u16::from_be_bytes([header[CHECKSUM_OFFSET], header[CHECKSUM_OFFSET + 1]]);
    let new_sum = checksum::incremental_update(old_sum, old_word, new_word);
    header[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&new_sum.to_be_bytes());
    header[TTL_OFFSET]
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod test {
    use super::*;

    fn good_header(ttl: u8) -> [u8; 20] {
        let h = Ipv4Header {
            tos: 0,
            length: 36,
            id: 0x1c46,
            flags_and_fragment_offset: 0x4000,
            ttl,
            protocol: 1,
            checksum: 0,
            src: Ipv4Addr::new(10, 0, 0, 2),
            dst: Ipv4Addr::new(10, 0, 0, 3),
        };
        let mut out = [0u8; 20];
        h.write(&mut out);
        out
    }

    #[test]
    fn accepts_well_formed() {
        let raw = good_header(64);
        let h = validate(&raw, 36).unwrap();
        assert_eq!(h.ttl, 64);
        assert_eq!(h.dst, Ipv4Addr::new(10, 0, 0, 3));
    }

    #[test]
    fn options_are_a_distinct_disposition() {
        let mut raw = good_header(64);
        raw[0] = 0x46; // ihl = 6
        assert_eq!(validate(&raw, 64), Err(Ip4Error::Options));
    }

    #[test]
    fn rejects_bad_version_before_checksum() {
        let mut raw = good_header(64);
        raw[0] = 0x55;
        assert_eq!(validate(&raw, 64), Err(Ip4Error::BadVersion));
    }

    #[test]
    fn rejects_bad_checksum() {
        let mut raw = good_header(64);
        raw[11] ^= 0xff;
        assert_eq!(validate(&raw, 64), Err(Ip4Error::BadChecksum));
    }

    #[test]
    fn rejects_fragment_offset_one() {
        let mut raw = good_header(64);
        raw[6] = 0x20; // more-fragments + offset 1
        raw[7] = 0x01;
        // rewrite checksum so the frag check is what fires
        raw[10] = 0;
        raw[11] = 0;
        let c = crate::checksum::checksum(&raw);
        raw[10..12].copy_from_slice(&c.to_be_bytes());
        assert_eq!(validate(&raw, 64), Err(Ip4Error::FragmentOffsetOne));
    }

    #[test]
    fn ttl_one_is_time_exceeded() {
        let raw = good_header(1);
        assert_eq!(validate(&raw, 64), Err(Ip4Error::TimeExceeded));
    }

    #[test]
    fn length_checks() {
        let raw = good_header(64);
        assert_eq!(validate(&raw, 20), Err(Ip4Error::BadLength));
        let mut short = good_header(64);
        short[2] = 0;
        short[3] = 10;
        short[10] = 0;
        short[11] = 0;
        let c = crate::checksum::checksum(&short);
        short[10..12].copy_from_slice(&c.to_be_bytes());
        assert_eq!(validate(&short, 64), Err(Ip4Error::BadLength));
    }

    #[test]
    fn ttl_decrement_keeps_checksum_valid() {
        let mut raw = good_header(64);
        let new_ttl = decrement_ttl(&mut raw);
        assert_eq!(new_ttl, 63);
        assert!(crate::checksum::verify(&raw));
        // and again, across the byte boundary cases
        let mut raw = good_header(2);
        decrement_ttl(&mut raw);
        assert!(crate::checksum::verify(&raw));
    }
}
