// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! ICMPv6 neighbor discovery: answer solicitations for our own addresses
//! and learn neighbors from their link-layer options.

use ahash::RandomState;
use buffer::RX;
use fib::{AdjIndex, AdjacencyKind, Ip6Main, RewriteHeader, RouteFlags};
use graph::{DispatchCtx, Frame, NodeFunction, NodeIndex};
use interface::{InterfaceMain, SwIfIndex};
use net::eth::{EthType, EthernetHeader, Mac};
use net::icmp6::{
    NaFlags, NeighborAdvertisement, NeighborSolicitation, ND_HOP_LIMIT, NEIGHBOR_SOLICITATION,
};
use net::ip6::Ipv6Header;
use std::cell::RefCell;
use std::collections::HashMap;
use std::net::Ipv6Addr;
use std::rc::Rc;
use tracing::debug;

/// `icmp6-neighbor` error codes and strings.
pub mod icmp6_error {
    /// No error.
    pub const NONE: u16 = 0;
    /// ND message with a hop limit other than 255.
    pub const INVALID_HOP_LIMIT_FOR_TYPE: u16 = 1;
    /// Message checksum mismatch.
    pub const BAD_CHECKSUM: u16 = 2;
    /// Solicited target is not one of our addresses.
    pub const NOT_FOR_US: u16 = 3;
    /// Message too short or options malformed.
    pub const MALFORMED: u16 = 4;
    /// The error strings, indexed by code.
    pub const STRINGS: &[&str] = &[
        "no error",
        "invalid-hop-limit-for-type",
        "bad checksum",
        "not for us",
        "malformed",
    ];
}

/// Outbound edges of `icmp6-neighbor`.
#[derive(Debug, Clone, Copy)]
pub struct Icmp6NeighborEdges {
    /// To `error-drop`.
    pub drop: u16,
    /// To `error-punt` for non-ND ICMPv6.
    pub punt: u16,
}

/// Learned neighbors, keyed by `(sw_if_index, address)`.
pub struct NeighborCache {
    entries: HashMap<(u32, Ipv6Addr), NeighborEntry, RandomState>,
}

struct NeighborEntry {
    mac: Mac,
    adj: AdjIndex,
    learned_at: f64,
}

impl Default for NeighborCache {
    fn default() -> Self {
        Self::new()
    }
}

impl NeighborCache {
    /// Fresh empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::with_hasher(RandomState::with_seed(0)),
        }
    }

    /// The learned link-layer address of a neighbor, if any.
    #[must_use]
    pub fn get(&self, sw_if_index: u32, address: &Ipv6Addr) -> Option<Mac> {
        self.entries.get(&(sw_if_index, *address)).map(|e| e.mac)
    }

    /// Number of learned neighbors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True iff nothing was learned yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove entries last refreshed before `now - max_age`, returning
    /// what was evicted so the caller can retire routes and adjacencies.
    pub fn expire(&mut self, now: f64, max_age: f64) -> Vec<(u32, Ipv6Addr, AdjIndex)> {
        let stale: Vec<(u32, Ipv6Addr)> = self
            .entries
            .iter()
            .filter(|(_, e)| now - e.learned_at > max_age)
            .map(|(k, _)| *k)
            .collect();
        stale
            .into_iter()
            .filter_map(|k| self.entries.remove(&k).map(|e| (k.0, k.1, e.adj)))
            .collect()
    }
}

/// Periodic reaper for the neighbor cache: a process node that wakes on a
/// timer, evicts entries past their age limit, and retires the routes and
/// adjacencies they installed.
pub struct NeighborAger {
    ip6: Rc<RefCell<Ip6Main>>,
    neighbors: Rc<RefCell<NeighborCache>>,
    /// Entries older than this are evicted.
    pub max_age: f64,
    /// Seconds between sweeps.
    pub sweep_interval: f64,
}

impl NeighborAger {
    /// An ager with the given limits.
    #[must_use]
    pub fn new(
        ip6: Rc<RefCell<Ip6Main>>,
        neighbors: Rc<RefCell<NeighborCache>>,
        max_age: f64,
        sweep_interval: f64,
    ) -> Self {
        Self {
            ip6,
            neighbors,
            max_age,
            sweep_interval,
        }
    }
}

impl graph::Process for NeighborAger {
    fn resume(&mut self, ctx: &mut DispatchCtx<'_>, reason: graph::Resume) -> graph::Yield {
        if matches!(reason, graph::Resume::Start) {
            return graph::Yield::SuspendFor(self.sweep_interval);
        }
        let now = ctx.now();
        let expired = self.neighbors.borrow_mut().expire(now, self.max_age);
        if !expired.is_empty() {
            let mut ip6 = self.ip6.borrow_mut();
            for (sw_if_index, address, adj) in expired {
                debug!(%address, "neighbor aged out");
                let fib_index = ip6.fib_index_for_sw_interface(sw_if_index);
                let _ = ip6.add_del_route(
                    fib_index,
                    address,
                    128,
                    adj,
                    RouteFlags::FIB_INDEX
                        | RouteFlags::DEL
                        | RouteFlags::NEIGHBOR
                        | RouteFlags::NO_REDISTRIBUTE,
                );
                ip6.adjacencies.del_block(adj, 1);
            }
        }
        graph::Yield::SuspendFor(self.sweep_interval)
    }
}

/// The `icmp6-neighbor` node function: the part of ICMPv6 the core answers
/// itself.
pub struct Icmp6Neighbor {
    im: Rc<RefCell<InterfaceMain>>,
    ip6: Rc<RefCell<Ip6Main>>,
    neighbors: Rc<RefCell<NeighborCache>>,
    /// The `ip6-rewrite` node; learned adjacencies cache an edge from it.
    rewrite_node: NodeIndex,
    edges: Icmp6NeighborEdges,
}

impl Icmp6Neighbor {
    /// Neighbor responder over the interface layer and IPv6 base.
    #[must_use]
    pub fn new(
        im: Rc<RefCell<InterfaceMain>>,
        ip6: Rc<RefCell<Ip6Main>>,
        neighbors: Rc<RefCell<NeighborCache>>,
        rewrite_node: NodeIndex,
        edges: Icmp6NeighborEdges,
    ) -> Self {
        Self {
            im,
            ip6,
            neighbors,
            rewrite_node,
            edges,
        }
    }

    fn drop_with(&self, ctx: &mut DispatchCtx<'_>, bi: buffer::BufferIndex, code: u16) {
        ctx.set_error(bi, code);
        ctx.count_error(code, 1);
        ctx.enqueue(self.edges.drop, bi);
    }
}

impl NodeFunction for Icmp6Neighbor {
    fn run(&mut self, ctx: &mut DispatchCtx<'_>, frame: &Frame) -> u32 {
        for &bi in &frame.buffers {
            let (header, icmp): (Ipv6Header, Vec<u8>) = {
                let data = ctx.pool().data(bi);
                let Ok(h) = Ipv6Header::parse(data) else {
                    self.drop_with(ctx, bi, icmp6_error::MALFORMED);
                    continue;
                };
                let end = net::ip6::HEADER_BYTES + h.payload_length as usize;
                if data.len() < end {
                    self.drop_with(ctx, bi, icmp6_error::MALFORMED);
                    continue;
                }
                (h, data[net::ip6::HEADER_BYTES..end].to_vec())
            };

            if icmp.first() != Some(&NEIGHBOR_SOLICITATION) {
                ctx.enqueue(self.edges.punt, bi);
                continue;
            }
            if header.src.is_unspecified() {
                // duplicate address detection is the host stack's business
                ctx.enqueue(self.edges.punt, bi);
                continue;
            }
            if header.hop_limit != ND_HOP_LIMIT {
                self.drop_with(ctx, bi, icmp6_error::INVALID_HOP_LIMIT_FOR_TYPE);
                continue;
            }
            if !net::icmp6::verify_checksum(&header.src, &header.dst, &icmp) {
                self.drop_with(ctx, bi, icmp6_error::BAD_CHECKSUM);
                continue;
            }
            let Ok(ns) = NeighborSolicitation::parse(&icmp) else {
                self.drop_with(ctx, bi, icmp6_error::MALFORMED);
                continue;
            };

            let rx = ctx.pool().get(bi).sw_if_index[RX];
            let ip6_local = self.ip6.borrow().local_interface_for(&ns.target);
            if ip6_local.is_none() {
                self.drop_with(ctx, bi, icmp6_error::NOT_FOR_US);
                continue;
            }

            let im = self.im.borrow();
            let Some((our_mac, output_node, max_l3)) = im
                .sup_hw(SwIfIndex::new(rx))
                .ok()
                .and_then(|hwi| im.hw(hwi).ok())
                .and_then(|hw| {
                    let mac: [u8; 6] = hw.hw_address.as_slice().try_into().ok()?;
                    Some((
                        Mac(mac),
                        hw.output_node,
                        hw.max_l3_packet_bytes[buffer::TX] as u16,
                    ))
                })
            else {
                self.drop_with(ctx, bi, icmp6_error::NOT_FOR_US);
                continue;
            };

            // learn the soliciting neighbor and install its host route;
            // unspecified sources were punted above
            if let Some(sll) = ns.source_link_layer {
                let l2 = im
                    .rewrite_for_sw_interface(SwIfIndex::new(rx), EthType::IP6, &sll.0, 32)
                    .ok();
                let edge = ctx.ensure_edge_from(self.rewrite_node, output_node);
                if let (Some(l2), Some(edge)) = (l2, edge) {
                    let mut ip6 = self.ip6.borrow_mut();
                    let mut rw = RewriteHeader::new(rx, output_node, edge, max_l3);
                    if rw.set_data(&l2).is_ok() {
                        let adj = ip6.adjacencies.add(AdjacencyKind::Rewrite(rw));
                        let fib_index = ip6.fib_index_for_sw_interface(rx);
                        let _ = ip6.add_del_route(
                            fib_index,
                            header.src,
                            128,
                            adj,
                            RouteFlags::FIB_INDEX
                                | RouteFlags::NEIGHBOR
                                | RouteFlags::NO_REDISTRIBUTE,
                        );
                        let mut cache = self.neighbors.borrow_mut();
                        debug!(neighbor = %header.src, mac = %sll, "learned neighbor");
                        let entry = NeighborEntry {
                            mac: sll,
                            adj,
                            learned_at: ctx.now(),
                        };
                        if let Some(old) = cache.entries.insert((rx, header.src), entry) {
                            ip6.adjacencies.del_block(old.adj, 1);
                            ip6.adjacencies.register_remap(old.adj, adj);
                        }
                    }
                }
            }

            // answer in place: advertisement with solicited+override,
            // addresses swapped, hop limit 255
            let reply_dst_mac = match ns.source_link_layer {
                Some(m) => m,
                None => Mac::BROADCAST,
            };
            let na = NeighborAdvertisement {
                flags: NaFlags::SOLICITED | NaFlags::OVERRIDE,
                target: ns.target,
                target_link_layer: our_mac,
            };
            let reply_ip = Ipv6Header {
                traffic_class: 0,
                flow_label: 0,
                payload_length: NeighborAdvertisement::BYTES as u16,
                next_header: 58,
                hop_limit: ND_HOP_LIMIT,
                src: ns.target,
                dst: header.src,
            };
            let icmp_bytes = na.to_bytes(&reply_ip.src, &reply_ip.dst);
            let mut packet = vec![0u8; net::ip6::HEADER_BYTES + icmp_bytes.len()];
            reply_ip.write(&mut packet);
            packet[net::ip6::HEADER_BYTES..].copy_from_slice(&icmp_bytes);

            {
                let pool = ctx.pool();
                pool.fill(bi, &packet);
                pool.advance(bi, -(net::eth::HEADER_BYTES as i32));
                EthernetHeader {
                    dst: reply_dst_mac,
                    src: our_mac,
                    ether_type: EthType::IP6,
                }
                .write(pool.data_mut(bi));
                let b = pool.get_mut(bi);
                b.flags.insert(buffer::BufferFlags::LOCALLY_GENERATED);
                b.sw_if_index[buffer::TX] = rx;
            }
            drop(im);
            match ctx.ensure_edge(output_node) {
                Some(edge) => ctx.enqueue(edge, bi),
                None => self.drop_with(ctx, bi, icmp6_error::NOT_FOR_US),
            }
        }
        frame.n_vectors() as u32
    }
}
