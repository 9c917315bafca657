// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The Ethernet hardware interface class: 14-octet headers, plus one
//! 802.1Q tag for sub-interfaces.

use crate::classes::HwInterfaceClass;
use crate::interface::{SwIfIndex, SwInterfaceKind};
use crate::main::{InterfaceError, InterfaceMain};
use net::eth::{EthType, EthernetHeader, Mac, parse_ethernet};
use net::vlan::VlanTag;

/// Name the Ethernet class registers under.
pub const ETHERNET_HW_CLASS_NAME: &str = "ethernet";

/// The Ethernet hardware class.
#[derive(Debug, Default)]
pub struct EthernetHwClass;

fn mac_from(bytes: &[u8]) -> Result<Mac, InterfaceError> {
    let octets: [u8; 6] = bytes
        .try_into()
        .map_err(|_| InterfaceError::InvalidArgument("ethernet address must be 6 octets"))?;
    Ok(Mac(octets))
}

impl HwInterfaceClass for EthernetHwClass {
    fn name(&self) -> &'static str {
        ETHERNET_HW_CLASS_NAME
    }

    fn format_address(&self, address: &[u8]) -> String {
        match mac_from(address) {
            Ok(mac) => mac.to_string(),
            Err(_) => format!("{address:02x?}"),
        }
    }

    fn format_header(&self, header: &[u8]) -> String {
        let Ok(parsed) = parse_ethernet(header) else {
            return format!("{header:02x?}");
        };
        let mut s = format!(
            "{} {} 0x{:04x}",
            parsed.header.dst, parsed.header.src, parsed.inner_type.0
        );
        for tag in &parsed.tags {
            s.push_str(&format!(" vlan {}", tag.vlan_id));
        }
        s
    }

    fn unformat_hw_address(&self, input: &str) -> Result<Vec<u8>, InterfaceError> {
        let mac = Mac::try_from(input)
            .map_err(|_| InterfaceError::InvalidArgument("bad ethernet address"))?;
        Ok(mac.0.to_vec())
    }

    fn unformat_header(&self, input: &str) -> Result<Vec<u8>, InterfaceError> {
        fn bad() -> InterfaceError {
            InterfaceError::InvalidArgument("bad ethernet header")
        }
        let mut tokens = input.split_whitespace();
        let dst = Mac::try_from(tokens.next().ok_or_else(bad)?).map_err(|_| bad())?;
        let src = Mac::try_from(tokens.next().ok_or_else(bad)?).map_err(|_| bad())?;
        let type_str = tokens.next().ok_or_else(bad)?;
        let ether_type = EthType(
            u16::from_str_radix(type_str.trim_start_matches("0x"), 16).map_err(|_| bad())?,
        );
        let mut vlans = Vec::new();
        loop {
            let Some(word) = tokens.next() else { break };
            if word != "vlan" {
                return Err(bad());
            }
            let id: u16 = tokens
                .next()
                .and_then(|t| t.parse().ok())
                .ok_or_else(bad)?;
            vlans.push(id);
        }
        Ok(build_header(dst, src, ether_type, &vlans))
    }

    fn rewrite_for_sw_interface(
        &self,
        im: &InterfaceMain,
        sw_if_index: SwIfIndex,
        l3_type: EthType,
        dst_address: &[u8],
        max_bytes: usize,
    ) -> Result<Vec<u8>, InterfaceError> {
        let hw = im.hw(im.sup_hw(sw_if_index)?)?;
        let src = mac_from(&hw.hw_address)?;
        let dst = mac_from(dst_address)?;
        let sw = im.sw(sw_if_index)?;
        let vlans: Vec<u16> = match sw.kind {
            SwInterfaceKind::Hardware { .. } => Vec::new(),
            SwInterfaceKind::Sub { id } => {
                let id = u16::try_from(id)
                    .map_err(|_| InterfaceError::InvalidArgument("sub id exceeds vlan range"))?;
                if id > 0x0fff {
                    return Err(InterfaceError::InvalidArgument("sub id exceeds vlan range"));
                }
                vec![id]
            }
        };
        let header = build_header(dst, src, l3_type, &vlans);
        if header.len() > max_bytes {
            return Err(InterfaceError::InvalidArgument("rewrite exceeds capacity"));
        }
        Ok(header)
    }

    fn rewrite_for_hw_interface(
        &self,
        im: &InterfaceMain,
        hw_if_index: crate::interface::HwIfIndex,
        l3_type: EthType,
        dst_address: &[u8],
        max_bytes: usize,
    ) -> Result<Vec<u8>, InterfaceError> {
        let sw = im.hw(hw_if_index)?.sw_if_index;
        self.rewrite_for_sw_interface(im, sw, l3_type, dst_address, max_bytes)
    }

    fn is_valid_class_for_interface(
        &self,
        im: &InterfaceMain,
        hw_if_index: crate::interface::HwIfIndex,
    ) -> bool {
        im.hw(hw_if_index).is_ok_and(|hw| hw.hw_address.len() == 6)
    }
}

fn build_header(dst: Mac, src: Mac, inner_type: EthType, vlans: &[u16]) -> Vec<u8> {
    let outer_type = if vlans.is_empty() {
        inner_type
    } else {
        EthType::VLAN
    };
    let mut out = vec![0u8; 14];
    EthernetHeader {
        dst,
        src,
        ether_type: outer_type,
    }
    .write(&mut out);
    for (i, id) in vlans.iter().enumerate() {
        let tag_inner = if i + 1 == vlans.len() {
            inner_type
        } else {
            EthType::VLAN
        };
        out.extend_from_slice(&VlanTag::with_id(*id, tag_inner).to_bytes());
    }
    out
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn header_build_untagged_and_tagged() {
        let dst = Mac([0, 1, 2, 3, 4, 5]);
        let src = Mac([6, 7, 8, 9, 10, 11]);
        let plain = build_header(dst, src, EthType::IP4, &[]);
        assert_eq!(plain.len(), 14);
        assert_eq!(&plain[12..], &[0x08, 0x00]);
        let tagged = build_header(dst, src, EthType::IP4, &[100]);
        assert_eq!(tagged.len(), 18);
        assert_eq!(&tagged[12..14], &[0x81, 0x00]);
        assert_eq!(&tagged[16..], &[0x08, 0x00]);
        let double = build_header(dst, src, EthType::IP6, &[100, 200]);
        assert_eq!(double.len(), 22);
        assert_eq!(&double[16..18], &[0x81, 0x00]);
        assert_eq!(&double[20..], &[0x86, 0xdd]);
    }

    #[test]
    fn format_unformat_round_trip() {
        let class = EthernetHwClass;
        for vlans in [&[][..], &[200][..]] {
            let bytes = build_header(
                Mac([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]),
                Mac([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]),
                EthType::IP4,
                vlans,
            );
            let rendered = class.format_header(&bytes);
            let parsed = class.unformat_header(&rendered).unwrap();
            assert_eq!(parsed, bytes, "round trip failed for {rendered:?}");
        }
    }

    #[test]
    fn address_unformat() {
        let class = EthernetHwClass;
        assert_eq!(
            class.unformat_hw_address("aa:bb:cc:dd:ee:ff").unwrap(),
            vec![0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]
        );
        assert!(class.unformat_hw_address("nonsense").is_err());
    }
}
