// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! `ethernet-input`: ethertype and VLAN demux.

use buffer::RX;
use graph::{DispatchCtx, Frame, NodeFunction};
use interface::{InterfaceMain, SwIfIndex};
use net::eth::{parse_ethernet, EthType};
use std::cell::RefCell;
use std::rc::Rc;

/// `ethernet-input` error codes and strings.
pub mod ethernet_input_error {
    /// No error.
    pub const NONE: u16 = 0;
    /// Frame too short for its headers.
    pub const TRUNCATED: u16 = 1;
    /// Tagged frame whose VLAN id has no sub-interface.
    pub const UNKNOWN_VLAN: u16 = 2;
    /// Ethertype with no registered input node.
    pub const UNKNOWN_ETHERTYPE: u16 = 3;
    /// The error strings, indexed by code.
    pub const STRINGS: &[&str] = &[
        "no error",
        "truncated header",
        "unknown vlan",
        "unknown ethertype",
    ];
}

/// Outbound edges of `ethernet-input`, wired at graph construction.
#[derive(Debug, Clone, Copy)]
pub struct EthernetInputEdges {
    /// To `ip4-input`.
    pub ip4: u16,
    /// To `ip6-input`.
    pub ip6: u16,
    /// To `mpls-input`.
    pub mpls: u16,
    /// To `error-punt` (LLC frames, ARP, other host-path ethertypes).
    pub punt: u16,
    /// To `error-drop`.
    pub drop: u16,
}

/// The `ethernet-input` node function.
pub struct EthernetInput {
    im: Rc<RefCell<InterfaceMain>>,
    edges: EthernetInputEdges,
}

impl EthernetInput {
    /// Node over the interface layer with wired edges.
    #[must_use]
    pub fn new(im: Rc<RefCell<InterfaceMain>>, edges: EthernetInputEdges) -> Self {
        Self { im, edges }
    }
}

impl NodeFunction for EthernetInput {
    fn run(&mut self, ctx: &mut DispatchCtx<'_>, frame: &Frame) -> u32 {
        let im = self.im.borrow();
        for &bi in &frame.buffers {
            let parsed = match parse_ethernet(ctx.pool().data(bi)) {
                Ok(p) => p,
                Err(_) => {
                    ctx.set_error(bi, ethernet_input_error::TRUNCATED);
                    ctx.count_error(ethernet_input_error::TRUNCATED, 1);
                    ctx.enqueue(self.edges.drop, bi);
                    continue;
                }
            };

            let l2_bytes = u64::from(ctx.pool().length_in_chain(bi));
            let rx_raw = ctx.pool().get(bi).sw_if_index[RX];

            {
                let mut record = [0u8; 16];
                let data = ctx.pool().data(bi);
                let n = data.len().min(record.len());
                record[..n].copy_from_slice(&data[..n]);
                ctx.trace_buffer(bi, &record[..n]);
            }

            // a tagged frame is received on the sub-interface its innermost
            // tag names
            if let Some(tag) = parsed.tags.last() {
                let sub = im
                    .sup_hw(SwIfIndex::new(rx_raw))
                    .ok()
                    .and_then(|hw| im.hw(hw).ok())
                    .and_then(|hw| hw.sub_interface_by_id.get(&u32::from(tag.vlan_id)))
                    .copied();
                match sub {
                    Some(sub) => ctx.pool().get_mut(bi).sw_if_index[RX] = sub.into_raw(),
                    None => {
                        ctx.set_error(bi, ethernet_input_error::UNKNOWN_VLAN);
                        ctx.count_error(ethernet_input_error::UNKNOWN_VLAN, 1);
                        ctx.enqueue(self.edges.drop, bi);
                        continue;
                    }
                }
            }

            let rx = SwIfIndex::new(ctx.pool().get(bi).sw_if_index[RX]);
            if im.sw(rx).is_ok() {
                im.counters.borrow_mut().count_rx(0, rx, l2_bytes);
            }

            ctx.pool().advance(bi, parsed.header_bytes as i32);

            let edge = if parsed.inner_type.is_llc_length() {
                self.edges.punt
            } else {
                match parsed.inner_type {
                    EthType::IP4 => self.edges.ip4,
                    EthType::IP6 => self.edges.ip6,
                    EthType::MPLS_UNICAST | EthType::MPLS_MULTICAST => self.edges.mpls,
                    EthType::ARP => self.edges.punt,
                    _ => {
                        ctx.set_error(bi, ethernet_input_error::UNKNOWN_ETHERTYPE);
                        ctx.count_error(ethernet_input_error::UNKNOWN_ETHERTYPE, 1);
                        self.edges.drop
                    }
                }
            };
            ctx.enqueue(edge, bi);
        }
        frame.n_vectors() as u32
    }
}
