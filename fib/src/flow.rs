// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Flow hashing for multipath slot selection.
//!
//! The hash must be stable for a flow's lifetime and spread well across
//! `2^k` block slots; it carries no security requirement.

use std::net::{Ipv4Addr, Ipv6Addr};

fn mix(mut a: u32, mut b: u32, mut c: u32) -> u32 {
    // Bob Jenkins style 3-word mix, two rounds
    for _ in 0..2 {
        a = a.wrapping_sub(c).rotate_left(4) ^ c;
        b = b.wrapping_sub(a).rotate_left(6) ^ a;
        c = c.wrapping_sub(b).rotate_left(8) ^ b;
    }
    a ^ b ^ c
}

/// Hash of the IPv4 five-tuple-ish key: addresses, protocol, and the first
/// four payload octets (the L4 ports when present).
#[must_use]
pub fn ip4_flow_hash(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, l4: &[u8]) -> u32 {
    let ports = match l4 {
        [a, b, c, d, ..] => u32::from_be_bytes([*a, *b, *c, *d]),
        _ => 0,
    };
    mix(
        u32::from(src),
        u32::from(dst),
        ports ^ u32::from(protocol),
    )
}

/// Hash of the IPv6 equivalent: addresses folded to words, next header,
/// and the first four payload octets.
#[must_use]
pub fn ip6_flow_hash(src: &Ipv6Addr, dst: &Ipv6Addr, next_header: u8, l4: &[u8]) -> u32 {
    let fold = |addr: &Ipv6Addr| -> u32 {
        let o = addr.octets();
        let mut acc = 0u32;
        for chunk in o.chunks_exact(4) {
            acc ^= u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        acc
    };
    let ports = match l4 {
        [a, b, c, d, ..] => u32::from_be_bytes([*a, *b, *c, *d]),
        _ => 0,
    };
    mix(fold(src), fold(dst), ports ^ u32::from(next_header))
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stable_and_sensitive() {
        let a = ip4_flow_hash("10.0.0.1".parse().unwrap(), Ipv4Addr::new(10, 0, 0, 2), 6, &[0, 80, 0x12, 0x34]);
        let b = ip4_flow_hash(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), 6, &[0, 80, 0x12, 0x34]);
        assert_eq!(a, b);
        let c = ip4_flow_hash(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), 6, &[0, 81, 0x12, 0x34]);
        assert_ne!(a, c);
    }

    #[test]
    fn spreads_over_small_blocks() {
        // 1000 synthetic flows over 4 slots: no slot may be empty and none
        // may take more than 40%
        let mut slots = [0u32; 4];
        for i in 0..1000u32 {
            let src = Ipv4Addr::from(0x0a00_0000 | i);
            let h = ip4_flow_hash(src, Ipv4Addr::new(10, 1, 0, 1), 17, &[(i >> 8) as u8, i as u8, 0, 53]);
            slots[(h & 3) as usize] += 1;
        }
        for s in slots {
            assert!(s > 0 && s < 400, "slot counts {slots:?}");
        }
    }

    #[test]
    fn ip6_hash_differs_by_flow_label_inputs() {
        let s: Ipv6Addr = "2001:db8::1".parse().unwrap();
        let d: Ipv6Addr = Ipv6Addr::from([0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2]);
        assert_ne!(
            ip6_flow_hash(&s, &d, 6, &[0, 80, 0, 1]),
            ip6_flow_hash(&s, &d, 6, &[0, 80, 0, 2])
        );
    }
}
