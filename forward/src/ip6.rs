// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The IPv6 path: input validation, lookup, local delivery, rewrite.

use buffer::{RX, TX};
use fib::{ip6_flow_hash, opaque_lane, rewrite_one_header, AdjacencyKind, Ip6Main};
use graph::{DispatchCtx, Frame, NodeFunction};
use net::ip6::{self, Ip6Error};
use std::cell::RefCell;
use std::rc::Rc;

/// `ip6-input` error codes and strings.
pub mod ip6_input_error {
    /// No error.
    pub const NONE: u16 = 0;
    /// Version field is not 6.
    pub const BAD_VERSION: u16 = 1;
    /// Hop limit expired.
    pub const TIME_EXCEEDED: u16 = 2;
    /// Link layer delivered fewer octets than the header states.
    pub const BAD_LENGTH: u16 = 3;
    /// Shorter than a fixed header.
    pub const TRUNCATED: u16 = 4;
    /// The error strings, indexed by code.
    pub const STRINGS: &[&str] = &[
        "no error",
        "bad version",
        "time exceeded",
        "bad length",
        "truncated",
    ];
}

/// Outbound edges of `ip6-input`.
#[derive(Debug, Clone, Copy)]
pub struct Ip6InputEdges {
    /// To `ip6-lookup`.
    pub lookup: u16,
    /// To `error-drop`.
    pub drop: u16,
}

/// The `ip6-input` node function.
pub struct Ip6Input {
    edges: Ip6InputEdges,
}

impl Ip6Input {
    /// Input node with wired edges.
    #[must_use]
    pub fn new(edges: Ip6InputEdges) -> Self {
        Self { edges }
    }
}

impl NodeFunction for Ip6Input {
    fn run(&mut self, ctx: &mut DispatchCtx<'_>, frame: &Frame) -> u32 {
        for &bi in &frame.buffers {
            let l2_len = ctx.pool().length_in_chain(bi) as usize;
            match ip6::validate(ctx.pool().data(bi), l2_len) {
                Ok(_) => ctx.enqueue(self.edges.lookup, bi),
                Err(e) => {
                    let code = match e {
                        Ip6Error::BadVersion => ip6_input_error::BAD_VERSION,
                        Ip6Error::TimeExceeded => ip6_input_error::TIME_EXCEEDED,
                        Ip6Error::BadLength => ip6_input_error::BAD_LENGTH,
                        Ip6Error::Truncated => ip6_input_error::TRUNCATED,
                    };
                    ctx.set_error(bi, code);
                    ctx.count_error(code, 1);
                    ctx.enqueue(self.edges.drop, bi);
                }
            }
        }
        frame.n_vectors() as u32
    }
}

/// `ip6-lookup` error codes and strings.
pub mod ip6_lookup_error {
    /// No error.
    pub const NONE: u16 = 0;
    /// Destination matched no route.
    pub const MISS: u16 = 1;
    /// Drop adjacency.
    pub const ADJ_DROP: u16 = 2;
    /// Interface route with unresolved neighbor.
    pub const DISCOVER_MISS: u16 = 3;
    /// The error strings, indexed by code.
    pub const STRINGS: &[&str] = &["no error", "no route", "drop adjacency", "neighbor miss"];
}

/// Outbound edges of `ip6-lookup`.
#[derive(Debug, Clone, Copy)]
pub struct Ip6LookupEdges {
    /// To `ip6-rewrite`.
    pub rewrite: u16,
    /// To `ip6-local` (our own addresses).
    pub local: u16,
    /// To `error-drop`.
    pub drop: u16,
    /// To `error-punt`.
    pub punt: u16,
}

/// The `ip6-lookup` node function.
pub struct Ip6Lookup {
    ip6: Rc<RefCell<Ip6Main>>,
    edges: Ip6LookupEdges,
}

impl Ip6Lookup {
    /// Lookup node over the IPv6 forwarding base.
    #[must_use]
    pub fn new(ip6: Rc<RefCell<Ip6Main>>, edges: Ip6LookupEdges) -> Self {
        Self { ip6, edges }
    }
}

impl NodeFunction for Ip6Lookup {
    fn run(&mut self, ctx: &mut DispatchCtx<'_>, frame: &Frame) -> u32 {
        let mut ip6 = self.ip6.borrow_mut();
        for &bi in &frame.buffers {
            let (dst, src, next_header, l4) = {
                let data = ctx.pool().data(bi);
                let Ok(h) = ip6::Ipv6Header::parse(data) else {
                    ctx.set_error(bi, ip6_lookup_error::MISS);
                    ctx.count_error(ip6_lookup_error::MISS, 1);
                    ctx.enqueue(self.edges.drop, bi);
                    continue;
                };
                let mut l4 = [0u8; 4];
                if data.len() >= ip6::HEADER_BYTES + 4 {
                    l4.copy_from_slice(&data[ip6::HEADER_BYTES..ip6::HEADER_BYTES + 4]);
                }
                (h.dst, h.src, h.next_header, l4)
            };
            let rx = ctx.pool().get(bi).sw_if_index[RX];
            let fib_index = ip6.fib_index_for_sw_interface(rx);
            let mut adj_index = ip6.lookup(fib_index, dst);
            let flow_hash = ip6_flow_hash(&src, &dst, next_header, &l4);

            if let Ok(fib::Adjacency {
                kind:
                    AdjacencyKind::Multipath {
                        first_adj_index,
                        log2_n_adj,
                    },
                ..
            }) = ip6.adjacencies.get(adj_index)
            {
                let slot = flow_hash & ((1u32 << log2_n_adj) - 1);
                adj_index = first_adj_index.add(slot);
            }

            let bytes = u64::from(ctx.pool().length_in_chain(bi));
            ip6.adjacencies
                .counters
                .increment(0, adj_index.as_usize(), bytes);

            {
                let opaque = &mut ctx.pool().get_mut(bi).opaque;
                opaque.set_u32(opaque_lane::DST_ADJ, adj_index.into_raw());
                opaque.set_u32(opaque_lane::SRC_ADJ, u32::MAX);
                opaque.set_u32(opaque_lane::FLOW_HASH, flow_hash);
            }

            let kind = ip6.adjacencies.get(adj_index).map(|a| a.kind.clone());
            match kind {
                Ok(AdjacencyKind::Rewrite(_)) => ctx.enqueue(self.edges.rewrite, bi),
                Ok(AdjacencyKind::Local { .. }) => ctx.enqueue(self.edges.local, bi),
                Ok(AdjacencyKind::Punt) => ctx.enqueue(self.edges.punt, bi),
                Ok(AdjacencyKind::Arp { .. }) => {
                    ctx.set_error(bi, ip6_lookup_error::DISCOVER_MISS);
                    ctx.count_error(ip6_lookup_error::DISCOVER_MISS, 1);
                    ctx.enqueue(self.edges.punt, bi);
                }
                Ok(AdjacencyKind::Drop) => {
                    ctx.set_error(bi, ip6_lookup_error::ADJ_DROP);
                    ctx.count_error(ip6_lookup_error::ADJ_DROP, 1);
                    ctx.enqueue(self.edges.drop, bi);
                }
                _ => {
                    ctx.set_error(bi, ip6_lookup_error::MISS);
                    ctx.count_error(ip6_lookup_error::MISS, 1);
                    ctx.enqueue(self.edges.drop, bi);
                }
            }
        }
        frame.n_vectors() as u32
    }
}

/// Outbound edges of `ip6-local`.
#[derive(Debug, Clone, Copy)]
pub struct Ip6LocalEdges {
    /// To `icmp6-neighbor` for ICMPv6.
    pub icmp6: u16,
    /// To `error-punt` for everything else addressed to us.
    pub punt: u16,
}

/// The `ip6-local` node: per-ip-protocol demux of packets addressed to one
/// of our own addresses. Only ICMPv6 stays in the core; the rest is the
/// host stack's business.
pub struct Ip6Local {
    edges: Ip6LocalEdges,
}

impl Ip6Local {
    /// Local-delivery node with wired edges.
    #[must_use]
    pub fn new(edges: Ip6LocalEdges) -> Self {
        Self { edges }
    }
}

impl NodeFunction for Ip6Local {
    fn run(&mut self, ctx: &mut DispatchCtx<'_>, frame: &Frame) -> u32 {
        for &bi in &frame.buffers {
            let next_header = ip6::Ipv6Header::parse(ctx.pool().data(bi))
                .map(|h| h.next_header)
                .unwrap_or(0);
            let edge = if next_header == 58 {
                self.edges.icmp6
            } else {
                self.edges.punt
            };
            ctx.enqueue(edge, bi);
        }
        frame.n_vectors() as u32
    }
}

/// `ip6-rewrite` error codes and strings.
pub mod ip6_rewrite_error {
    /// No error.
    pub const NONE: u16 = 0;
    /// Packet exceeds the adjacency's MTU.
    pub const MTU_EXCEEDED: u16 = 1;
    /// The buffer's adjacency is not a rewrite.
    pub const BAD_ADJACENCY: u16 = 2;
    /// Not enough headroom for the L2 header.
    pub const NO_HEADROOM: u16 = 3;
    /// The error strings, indexed by code.
    pub const STRINGS: &[&str] = &[
        "no error",
        "mtu exceeded",
        "bad adjacency",
        "no headroom",
    ];
}

/// Outbound edges of `ip6-rewrite`.
#[derive(Debug, Clone, Copy)]
pub struct Ip6RewriteEdges {
    /// To `error-drop`.
    pub drop: u16,
}

/// The `ip6-rewrite` node function.
pub struct Ip6Rewrite {
    ip6: Rc<RefCell<Ip6Main>>,
    edges: Ip6RewriteEdges,
}

impl Ip6Rewrite {
    /// Rewrite node over the IPv6 forwarding base.
    #[must_use]
    pub fn new(ip6: Rc<RefCell<Ip6Main>>, edges: Ip6RewriteEdges) -> Self {
        Self { ip6, edges }
    }
}

impl NodeFunction for Ip6Rewrite {
    fn run(&mut self, ctx: &mut DispatchCtx<'_>, frame: &Frame) -> u32 {
        let ip6 = self.ip6.borrow();
        for &bi in &frame.buffers {
            let adj_index = {
                let opaque = &ctx.pool().get(bi).opaque;
                fib::AdjIndex::new(opaque.u32(opaque_lane::DST_ADJ))
            };
            let rw = match ip6.adjacencies.get(ip6.adjacencies.remapped(adj_index)) {
                Ok(adj) => match &adj.kind {
                    AdjacencyKind::Rewrite(rw) => rw.clone(),
                    _ => {
                        ctx.set_error(bi, ip6_rewrite_error::BAD_ADJACENCY);
                        ctx.count_error(ip6_rewrite_error::BAD_ADJACENCY, 1);
                        ctx.enqueue(self.edges.drop, bi);
                        continue;
                    }
                },
                Err(_) => {
                    ctx.set_error(bi, ip6_rewrite_error::BAD_ADJACENCY);
                    ctx.count_error(ip6_rewrite_error::BAD_ADJACENCY, 1);
                    ctx.enqueue(self.edges.drop, bi);
                    continue;
                }
            };

            if ctx.pool().length_in_chain(bi) > u32::from(rw.max_l3_packet_bytes) {
                ctx.set_error(bi, ip6_rewrite_error::MTU_EXCEEDED);
                ctx.count_error(ip6_rewrite_error::MTU_EXCEEDED, 1);
                ctx.enqueue(self.edges.drop, bi);
                continue;
            }

            ip6::decrement_hop_limit(ctx.pool().data_mut(bi));

            let n = rw.data_bytes();
            if ctx.pool().headroom(bi) < n as u32 {
                ctx.set_error(bi, ip6_rewrite_error::NO_HEADROOM);
                ctx.count_error(ip6_rewrite_error::NO_HEADROOM, 1);
                ctx.enqueue(self.edges.drop, bi);
                continue;
            }
            ctx.pool().advance(bi, -(n as i32));
            rewrite_one_header(&rw, ctx.pool().data_mut(bi), net::eth::HEADER_BYTES);
            ctx.pool().get_mut(bi).sw_if_index[TX] = rw.sw_if_index;
            ctx.enqueue(rw.next_edge, bi);
        }
        frame.n_vectors() as u32
    }
}
