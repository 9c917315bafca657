// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The IPv4 path: input validation, feature entry, lookup, rewrite, and
//! the unicast source check feature.

use crate::features::RxFeatures;
use buffer::{RX, TX};
use feature::{ConfigMain, NULL_CONFIG};
use fib::{ip4_flow_hash, opaque_lane, rewrite_one_header, AdjacencyKind, Ip4Main};
use graph::{DispatchCtx, Frame, NodeFunction};
use net::ip4::{self, Ip4Error};
use std::cell::RefCell;
use std::net::Ipv4Addr;
use std::rc::Rc;

/// `ip4-input` error codes and strings.
pub mod ip4_input_error {
    /// No error.
    pub const NONE: u16 = 0;
    /// Version field is not 4.
    pub const BAD_VERSION: u16 = 1;
    /// Options present; punted.
    pub const OPTIONS: u16 = 2;
    /// Header checksum mismatch.
    pub const BAD_CHECKSUM: u16 = 3;
    /// Stated length inconsistent with what arrived.
    pub const BAD_LENGTH: u16 = 4;
    /// Fragment offset of exactly one.
    pub const FRAGMENT_OFFSET_ONE: u16 = 5;
    /// TTL expired.
    pub const TIME_EXCEEDED: u16 = 6;
    /// Shorter than a fixed header.
    pub const TRUNCATED: u16 = 7;
    /// The error strings, indexed by code.
    pub const STRINGS: &[&str] = &[
        "no error",
        "bad version",
        "options present",
        "bad header checksum",
        "bad length",
        "fragment offset 1",
        "time exceeded",
        "truncated",
    ];
}

/// Outbound edges of `ip4-input`.
#[derive(Debug, Clone, Copy)]
pub struct Ip4InputEdges {
    /// To `ip4-lookup`, when no feature chain is configured.
    pub lookup: u16,
    /// To `error-drop`.
    pub drop: u16,
    /// To `error-punt`.
    pub punt: u16,
}

/// The `ip4-input` node function.
pub struct Ip4Input {
    features: Rc<RefCell<RxFeatures>>,
    edges: Ip4InputEdges,
}

impl Ip4Input {
    /// Input node entering the rx feature chain.
    #[must_use]
    pub fn new(features: Rc<RefCell<RxFeatures>>, edges: Ip4InputEdges) -> Self {
        Self { features, edges }
    }
}

impl NodeFunction for Ip4Input {
    fn run(&mut self, ctx: &mut DispatchCtx<'_>, frame: &Frame) -> u32 {
        let features = self.features.borrow();
        for &bi in &frame.buffers {
            let l2_len = ctx.pool().length_in_chain(bi) as usize;
            let verdict = ip4::validate(ctx.pool().data(bi), l2_len);
            match verdict {
                Ok(_) => {
                    let rx = ctx.pool().get(bi).sw_if_index[RX];
                    let config = features.current(rx);
                    let entry = if config == NULL_CONFIG {
                        None
                    } else {
                        features.config_main.begin(config).ok().flatten()
                    };
                    match entry {
                        Some((edge, cursor)) => {
                            let opaque = &mut ctx.pool().get_mut(bi).opaque;
                            ConfigMain::set_buffer_config(opaque, config, cursor);
                            ctx.enqueue(edge, bi);
                        }
                        None => ctx.enqueue(self.edges.lookup, bi),
                    }
                }
                Err(e) => {
                    let (code, edge) = match e {
                        Ip4Error::BadVersion => (ip4_input_error::BAD_VERSION, self.edges.drop),
                        Ip4Error::Options => (ip4_input_error::OPTIONS, self.edges.punt),
                        Ip4Error::BadChecksum => (ip4_input_error::BAD_CHECKSUM, self.edges.drop),
                        Ip4Error::BadLength => (ip4_input_error::BAD_LENGTH, self.edges.drop),
                        Ip4Error::FragmentOffsetOne => {
                            (ip4_input_error::FRAGMENT_OFFSET_ONE, self.edges.drop)
                        }
                        Ip4Error::TimeExceeded => {
                            (ip4_input_error::TIME_EXCEEDED, self.edges.drop)
                        }
                        Ip4Error::Truncated => (ip4_input_error::TRUNCATED, self.edges.drop),
                    };
                    ctx.set_error(bi, code);
                    ctx.count_error(code, 1);
                    ctx.enqueue(edge, bi);
                }
            }
        }
        frame.n_vectors() as u32
    }
}

/// `ip4-lookup` error codes and strings.
pub mod ip4_lookup_error {
    /// No error.
    pub const NONE: u16 = 0;
    /// Destination matched no route.
    pub const MISS: u16 = 1;
    /// Drop adjacency.
    pub const ADJ_DROP: u16 = 2;
    /// Interface route with unresolved neighbor.
    pub const ARP_MISS: u16 = 3;
    /// The error strings, indexed by code.
    pub const STRINGS: &[&str] = &["no error", "no route", "drop adjacency", "arp miss"];
}

/// Outbound edges of `ip4-lookup`.
#[derive(Debug, Clone, Copy)]
pub struct Ip4LookupEdges {
    /// To `ip4-rewrite`.
    pub rewrite: u16,
    /// To `error-drop`.
    pub drop: u16,
    /// To `error-punt` (punt adjacencies, local delivery, arp miss).
    pub punt: u16,
}

/// The `ip4-lookup` node function.
pub struct Ip4Lookup {
    ip4: Rc<RefCell<Ip4Main>>,
    edges: Ip4LookupEdges,
}

impl Ip4Lookup {
    /// Lookup node over the IPv4 forwarding base.
    #[must_use]
    pub fn new(ip4: Rc<RefCell<Ip4Main>>, edges: Ip4LookupEdges) -> Self {
        Self { ip4, edges }
    }
}

impl NodeFunction for Ip4Lookup {
    fn run(&mut self, ctx: &mut DispatchCtx<'_>, frame: &Frame) -> u32 {
        let mut ip4 = self.ip4.borrow_mut();
        for &bi in &frame.buffers {
            let (dst, src, protocol, l4) = {
                let data = ctx.pool().data(bi);
                let Ok(h) = ip4::Ipv4Header::parse(data) else {
                    ctx.set_error(bi, ip4_lookup_error::MISS);
                    ctx.count_error(ip4_lookup_error::MISS, 1);
                    ctx.enqueue(self.edges.drop, bi);
                    continue;
                };
                let mut l4 = [0u8; 4];
                if data.len() >= ip4::HEADER_BYTES + 4 {
                    l4.copy_from_slice(&data[ip4::HEADER_BYTES..ip4::HEADER_BYTES + 4]);
                }
                (h.dst, h.src, h.protocol, l4)
            };
            let rx = ctx.pool().get(bi).sw_if_index[RX];
            let fib_index = ip4.fib_index_for_sw_interface(rx);
            let mut adj_index = ip4.lookup(fib_index, dst);
            let flow_hash = ip4_flow_hash(src, dst, protocol, &l4);

            if let Ok(fib::Adjacency {
                kind:
                    AdjacencyKind::Multipath {
                        first_adj_index,
                        log2_n_adj,
                    },
                ..
            }) = ip4.adjacencies.get(adj_index)
            {
                let slot = flow_hash & ((1u32 << log2_n_adj) - 1);
                adj_index = first_adj_index.add(slot);
            }

            let bytes = u64::from(ctx.pool().length_in_chain(bi));
            ip4.adjacencies
                .counters
                .increment(0, adj_index.as_usize(), bytes);

            {
                let opaque = &mut ctx.pool().get_mut(bi).opaque;
                opaque.set_u32(opaque_lane::DST_ADJ, adj_index.into_raw());
                opaque.set_u32(opaque_lane::SRC_ADJ, u32::MAX);
                opaque.set_u32(opaque_lane::FLOW_HASH, flow_hash);
            }

            let kind = ip4.adjacencies.get(adj_index).map(|a| a.kind.clone());
            match kind {
                Ok(AdjacencyKind::Rewrite(_)) => ctx.enqueue(self.edges.rewrite, bi),
                Ok(AdjacencyKind::Local { .. }) => ctx.enqueue(self.edges.punt, bi),
                Ok(AdjacencyKind::Punt) => ctx.enqueue(self.edges.punt, bi),
                Ok(AdjacencyKind::Arp { .. }) => {
                    ctx.set_error(bi, ip4_lookup_error::ARP_MISS);
                    ctx.count_error(ip4_lookup_error::ARP_MISS, 1);
                    ctx.enqueue(self.edges.punt, bi);
                }
                Ok(AdjacencyKind::Drop) => {
                    ctx.set_error(bi, ip4_lookup_error::ADJ_DROP);
                    ctx.count_error(ip4_lookup_error::ADJ_DROP, 1);
                    ctx.enqueue(self.edges.drop, bi);
                }
                _ => {
                    ctx.set_error(bi, ip4_lookup_error::MISS);
                    ctx.count_error(ip4_lookup_error::MISS, 1);
                    ctx.enqueue(self.edges.drop, bi);
                }
            }
        }
        frame.n_vectors() as u32
    }
}

/// `ip4-rewrite` error codes and strings.
pub mod ip4_rewrite_error {
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

/// Outbound edges of `ip4-rewrite`. Edges to interface output nodes are
/// carried per-adjacency in the rewrite header.
#[derive(Debug, Clone, Copy)]
pub struct Ip4RewriteEdges {
    /// To `error-drop`.
    pub drop: u16,
}

/// The `ip4-rewrite` node function.
pub struct Ip4Rewrite {
    ip4: Rc<RefCell<Ip4Main>>,
    edges: Ip4RewriteEdges,
}

impl Ip4Rewrite {
    /// Rewrite node over the IPv4 forwarding base.
    #[must_use]
    pub fn new(ip4: Rc<RefCell<Ip4Main>>, edges: Ip4RewriteEdges) -> Self {
        Self { ip4, edges }
    }
}

impl NodeFunction for Ip4Rewrite {
    fn run(&mut self, ctx: &mut DispatchCtx<'_>, frame: &Frame) -> u32 {
        let ip4 = self.ip4.borrow();
        for &bi in &frame.buffers {
            let adj_index = {
                let opaque = &ctx.pool().get(bi).opaque;
                fib::AdjIndex::new(opaque.u32(opaque_lane::DST_ADJ))
            };
            let rw = match ip4.adjacencies.get(ip4.adjacencies.remapped(adj_index)) {
                Ok(adj) => match &adj.kind {
                    AdjacencyKind::Rewrite(rw) => rw.clone(),
                    _ => {
                        ctx.set_error(bi, ip4_rewrite_error::BAD_ADJACENCY);
                        ctx.count_error(ip4_rewrite_error::BAD_ADJACENCY, 1);
                        ctx.enqueue(self.edges.drop, bi);
                        continue;
                    }
                },
                Err(_) => {
                    ctx.set_error(bi, ip4_rewrite_error::BAD_ADJACENCY);
                    ctx.count_error(ip4_rewrite_error::BAD_ADJACENCY, 1);
                    ctx.enqueue(self.edges.drop, bi);
                    continue;
                }
            };

            if ctx.pool().length_in_chain(bi) > u32::from(rw.max_l3_packet_bytes) {
                ctx.set_error(bi, ip4_rewrite_error::MTU_EXCEEDED);
                ctx.count_error(ip4_rewrite_error::MTU_EXCEEDED, 1);
                ctx.enqueue(self.edges.drop, bi);
                continue;
            }

            ip4::decrement_ttl(ctx.pool().data_mut(bi));

            let n = rw.data_bytes();
            if ctx.pool().headroom(bi) < n as u32 {
                ctx.set_error(bi, ip4_rewrite_error::NO_HEADROOM);
                ctx.count_error(ip4_rewrite_error::NO_HEADROOM, 1);
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

/// `ip4-source-check` error codes and strings.
pub mod ip4_source_check_error {
    /// No error.
    pub const NONE: u16 = 0;
    /// Source address matched no route.
    pub const SOURCE_MISS: u16 = 1;
    /// Feature chain ended unexpectedly.
    pub const BROKEN_CHAIN: u16 = 2;
    /// The error strings, indexed by code.
    pub const STRINGS: &[&str] = &["no error", "source miss", "broken feature chain"];
}

/// The `ip4-source-check` feature node: unicast reverse-path validation
/// compiled into the rx feature chain.
pub struct Ip4SourceCheck {
    ip4: Rc<RefCell<Ip4Main>>,
    features: Rc<RefCell<RxFeatures>>,
    /// To `error-drop`.
    pub drop_edge: u16,
}

impl Ip4SourceCheck {
    /// Source-check node.
    #[must_use]
    pub fn new(
        ip4: Rc<RefCell<Ip4Main>>,
        features: Rc<RefCell<RxFeatures>>,
        drop_edge: u16,
    ) -> Self {
        Self {
            ip4,
            features,
            drop_edge,
        }
    }

    fn source_is_reachable(ip4: &Ip4Main, rx: u32, src: Ipv4Addr) -> bool {
        let fib_index = ip4.fib_index_for_sw_interface(rx);
        let adj_index = ip4.lookup(fib_index, src);
        matches!(
            ip4.adjacencies.get(adj_index).map(|a| &a.kind),
            Ok(AdjacencyKind::Rewrite(_)
                | AdjacencyKind::Multipath { .. }
                | AdjacencyKind::Arp { .. }
                | AdjacencyKind::Local { .. })
        )
    }
}

impl NodeFunction for Ip4SourceCheck {
    fn run(&mut self, ctx: &mut DispatchCtx<'_>, frame: &Frame) -> u32 {
        let ip4 = self.ip4.borrow();
        let features = self.features.borrow();
        for &bi in &frame.buffers {
            let src = match ip4::Ipv4Header::parse(ctx.pool().data(bi)) {
                Ok(h) => h.src,
                Err(_) => {
                    ctx.set_error(bi, ip4_source_check_error::SOURCE_MISS);
                    ctx.count_error(ip4_source_check_error::SOURCE_MISS, 1);
                    ctx.enqueue(self.drop_edge, bi);
                    continue;
                }
            };
            let rx = ctx.pool().get(bi).sw_if_index[RX];
            if !Self::source_is_reachable(&ip4, rx, src) {
                ctx.set_error(bi, ip4_source_check_error::SOURCE_MISS);
                ctx.count_error(ip4_source_check_error::SOURCE_MISS, 1);
                ctx.enqueue(self.drop_edge, bi);
                continue;
            }
            // this feature carries no config bytes; step to the next one
            let (config, cursor) = ConfigMain::buffer_config(&ctx.pool().get(bi).opaque);
            let next = features
                .config_main
                .advance(config, cursor, 0)
                .ok()
                .and_then(|(_, next)| next);
            match next {
                Some((edge, new_cursor)) => {
                    let opaque = &mut ctx.pool().get_mut(bi).opaque;
                    ConfigMain::set_buffer_config(opaque, config, new_cursor);
                    ctx.enqueue(edge, bi);
                }
                None => {
                    ctx.set_error(bi, ip4_source_check_error::BROKEN_CHAIN);
                    ctx.count_error(ip4_source_check_error::BROKEN_CHAIN, 1);
                    ctx.enqueue(self.drop_edge, bi);
                }
            }
        }
        frame.n_vectors() as u32
    }
}
