// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(unsafe_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![deny(clippy::all)]

//! The assembled stack: one [`Vnet`] context owns the graph runtime, the
//! interface layer, the forwarding bases, the feature compilers, and the
//! packet generator, wired into the canonical node graph:
//!
//! ```text
//! pg-input -> ethernet-input -> {ip4,ip6,mpls}-input -> ip*-lookup
//!          -> ip*-rewrite -> <interface>-output -> <interface>-tx
//! ```
//!
//! Everything is per-instance: two [`Vnet`] values are two independent
//! stacks, which is how the scenario tests run whole topologies in-process.

use buffer::{BufferConfig, BufferIndex, BufferPool, RX};
use feature::ConfigIndex;
use fib::{
    AdjIndex, AdjacencyKind, FibError, Ip4Main, Ip6Main, RewriteHeader, RouteFlags,
    REWRITE_INLINE_BYTES,
};
use forward::{
    ethernet_input_error, icmp6_error, ip4_input_error, ip4_lookup_error, ip4_rewrite_error,
    ip4_source_check_error, ip6_input_error, ip6_lookup_error, ip6_rewrite_error,
    mpls_input_error, ErrorSink, EthernetInput, EthernetInputEdges, Icmp6Neighbor,
    Icmp6NeighborEdges, Ip4Input, Ip4InputEdges, Ip4Lookup, Ip4LookupEdges, Ip4Rewrite,
    Ip4RewriteEdges, Ip4SourceCheck, Ip6Input, Ip6InputEdges, Ip6Local, Ip6LocalEdges, Ip6Lookup,
    Ip6LookupEdges, Ip6Rewrite, Ip6RewriteEdges, MplsInput, MplsInputEdges, NeighborAger,
    NeighborCache, RxFeatures, SinkKind, Unwired,
};
use graph::{GraphError, NodeDesc, NodeIndex, Runtime};
use interface::{
    DeviceClassIndex, EthernetHwClass, HwClassIndex, HwIfIndex, InterfaceError, InterfaceMain,
    SwIfIndex,
};
use net::eth::{EthType, Mac};
use pg::{PgDeviceClass, PgError, PgInput, PgMain, TxLog};
use std::cell::RefCell;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::rc::Rc;
use tracing::debug;

/// Default IPv4 TTL for locally generated packets.
pub const DEFAULT_TTL_IP4: u8 = 64;
/// Default IPv6 hop limit for locally generated packets.
pub const DEFAULT_TTL_IP6: u8 = 64;
/// Learned neighbors older than this are evicted.
pub const NEIGHBOR_MAX_AGE: f64 = 300.0;
/// Seconds between neighbor-cache sweeps.
pub const NEIGHBOR_SWEEP_INTERVAL: f64 = 60.0;

/// Top-level failures, wrapping each subsystem's typed result.
#[derive(Debug, thiserror::Error)]
pub enum VnetError {
    /// Graph construction failure.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// Interface layer failure.
    #[error(transparent)]
    Interface(#[from] InterfaceError),
    /// Forwarding base failure.
    #[error(transparent)]
    Fib(#[from] FibError),
    /// Feature compiler failure.
    #[error(transparent)]
    Feature(#[from] feature::FeatureError),
    /// Packet generator failure.
    #[error(transparent)]
    Pg(#[from] PgError),
    /// Buffer pool failure.
    #[error(transparent)]
    Buffer(#[from] buffer::BufferError),
    /// A rewrite did not fit its inline storage.
    #[error("rewrite too long")]
    RewriteTooLong,
}

/// Exported parameters; the stack reads nothing from the environment.
pub struct VnetConfig {
    /// Buffer pool parameters.
    pub buffer: BufferConfig,
    /// Records kept per node trace buffer.
    pub per_node_trace_capacity: usize,
    /// Multipath normalization quality bound.
    pub multipath_weight_error_tolerance: f64,
    /// Drive time manually (tests) instead of from the wall clock.
    pub manual_clock: bool,
}

impl Default for VnetConfig {
    fn default() -> Self {
        Self {
            buffer: BufferConfig::default(),
            per_node_trace_capacity: 1024,
            multipath_weight_error_tolerance: 0.01,
            manual_clock: false,
        }
    }
}

/// Indices of the core graph nodes.
#[derive(Debug, Clone, Copy)]
pub struct CoreNodes {
    /// `error-drop`.
    pub error_drop: NodeIndex,
    /// `error-punt`.
    pub error_punt: NodeIndex,
    /// `ethernet-input`.
    pub ethernet_input: NodeIndex,
    /// `ip4-input`.
    pub ip4_input: NodeIndex,
    /// `ip4-lookup`.
    pub ip4_lookup: NodeIndex,
    /// `ip4-rewrite`.
    pub ip4_rewrite: NodeIndex,
    /// `ip4-source-check`.
    pub ip4_source_check: NodeIndex,
    /// `ip6-input`.
    pub ip6_input: NodeIndex,
    /// `ip6-lookup`.
    pub ip6_lookup: NodeIndex,
    /// `ip6-local`.
    pub ip6_local: NodeIndex,
    /// `ip6-rewrite`.
    pub ip6_rewrite: NodeIndex,
    /// `icmp6-neighbor`.
    pub icmp6_neighbor: NodeIndex,
    /// `mpls-input`.
    pub mpls_input: NodeIndex,
    /// `pg-input`.
    pub pg_input: NodeIndex,
    /// `neighbor-ager` (process).
    pub neighbor_ager: NodeIndex,
}

fn format_ethernet_trace(data: &[u8]) -> String {
    if data.len() < 14 {
        return format!("short frame {data:02x?}");
    }
    let dst = Mac([data[0], data[1], data[2], data[3], data[4], data[5]]);
    let src = Mac([data[6], data[7], data[8], data[9], data[10], data[11]]);
    let ty = u16::from_be_bytes([data[12], data[13]]);
    format!("{src} -> {dst} 0x{ty:04x}")
}

/// One packet-processing stack.
pub struct Vnet {
    /// The graph runtime (owns the buffer pool).
    pub rt: Runtime,
    /// Interface layer.
    pub im: Rc<RefCell<InterfaceMain>>,
    /// IPv4 forwarding base.
    pub ip4: Rc<RefCell<Ip4Main>>,
    /// IPv6 forwarding base.
    pub ip6: Rc<RefCell<Ip6Main>>,
    /// IPv4 receive feature chains.
    pub ip4_rx_features: Rc<RefCell<RxFeatures>>,
    /// Learned IPv6 neighbors.
    pub neighbors: Rc<RefCell<NeighborCache>>,
    /// Packet generator.
    pub pg: Rc<RefCell<PgMain>>,
    /// Core node indices.
    pub nodes: CoreNodes,
    /// The Ethernet hardware class registration.
    pub ethernet_hw_class: HwClassIndex,
    /// The pg device class registration.
    pub pg_device_class: DeviceClassIndex,
    pg_tx_log: TxLog,
    n_pg_interfaces: u32,
}

impl Vnet {
    /// Build a stack and wire the canonical graph.
    ///
    /// # Errors
    ///
    /// Propagates graph and registry failures; none occur for a default
    /// configuration.
    pub fn new(config: VnetConfig) -> Result<Self, VnetError> {
        let pool = BufferPool::new(config.buffer.clone());
        let mut rt = if config.manual_clock {
            Runtime::new_with_manual_clock(pool)
        } else {
            Runtime::new(pool)
        };
        rt.set_trace_capacity(config.per_node_trace_capacity);

        let im = Rc::new(RefCell::new(InterfaceMain::new(1)));
        let ip4 = Rc::new(RefCell::new(Ip4Main::new(1)));
        let ip6 = Rc::new(RefCell::new(Ip6Main::new(1)));
        ip4.borrow_mut().multipath.tolerance = config.multipath_weight_error_tolerance;
        ip6.borrow_mut().multipath.tolerance = config.multipath_weight_error_tolerance;
        let neighbors = Rc::new(RefCell::new(NeighborCache::new()));
        let pg_main = Rc::new(RefCell::new(PgMain::new()));

        let pg_dc = PgDeviceClass::new();
        let pg_tx_log = pg_dc.tx_log();
        let (ethernet_hw_class, pg_device_class) = {
            let mut im = im.borrow_mut();
            (
                im.register_hw_class(Rc::new(EthernetHwClass)),
                im.register_device_class(Rc::new(pg_dc)),
            )
        };

        // nodes first (unwired), then edges, then the real functions that
        // carry the edge ids
        let error_drop = rt.register_node(
            NodeDesc::internal("error-drop"),
            Box::new(ErrorSink::new(SinkKind::Drop, im.clone())),
        )?;
        let error_punt = rt.register_node(
            NodeDesc::internal("error-punt"),
            Box::new(ErrorSink::new(SinkKind::Punt, im.clone())),
        )?;
        let ethernet_input = rt.register_node(
            NodeDesc::internal("ethernet-input").with_errors(ethernet_input_error::STRINGS),
            Box::new(Unwired),
        )?;
        let ip4_input = rt.register_node(
            NodeDesc::internal("ip4-input").with_errors(ip4_input_error::STRINGS),
            Box::new(Unwired),
        )?;
        let ip4_lookup = rt.register_node(
            NodeDesc::internal("ip4-lookup").with_errors(ip4_lookup_error::STRINGS),
            Box::new(Unwired),
        )?;
        let ip4_rewrite = rt.register_node(
            NodeDesc::internal("ip4-rewrite").with_errors(ip4_rewrite_error::STRINGS),
            Box::new(Unwired),
        )?;
        let ip4_source_check = rt.register_node(
            NodeDesc::internal("ip4-source-check").with_errors(ip4_source_check_error::STRINGS),
            Box::new(Unwired),
        )?;
        let ip6_input = rt.register_node(
            NodeDesc::internal("ip6-input").with_errors(ip6_input_error::STRINGS),
            Box::new(Unwired),
        )?;
        let ip6_lookup = rt.register_node(
            NodeDesc::internal("ip6-lookup").with_errors(ip6_lookup_error::STRINGS),
            Box::new(Unwired),
        )?;
        let ip6_local = rt.register_node(NodeDesc::internal("ip6-local"), Box::new(Unwired))?;
        let ip6_rewrite = rt.register_node(
            NodeDesc::internal("ip6-rewrite").with_errors(ip6_rewrite_error::STRINGS),
            Box::new(Unwired),
        )?;
        let icmp6_neighbor = rt.register_node(
            NodeDesc::internal("icmp6-neighbor").with_errors(icmp6_error::STRINGS),
            Box::new(Unwired),
        )?;
        let mpls_input = rt.register_node(
            NodeDesc::internal("mpls-input").with_errors(mpls_input_error::STRINGS),
            Box::new(Unwired),
        )?;
        let pg_input = rt.register_node(
            NodeDesc::input("pg-input"),
            Box::new(PgInput::new(pg_main.clone())),
        )?;
        let neighbor_ager = rt.register_process(
            NodeDesc::process("neighbor-ager"),
            Box::new(NeighborAger::new(
                ip6.clone(),
                neighbors.clone(),
                NEIGHBOR_MAX_AGE,
                NEIGHBOR_SWEEP_INTERVAL,
            )),
        )?;

        let eth_edges = EthernetInputEdges {
            ip4: rt.add_next(ethernet_input, ip4_input)?,
            ip6: rt.add_next(ethernet_input, ip6_input)?,
            mpls: rt.add_next(ethernet_input, mpls_input)?,
            punt: rt.add_next(ethernet_input, error_punt)?,
            drop: rt.add_next(ethernet_input, error_drop)?,
        };
        let ip4_input_edges = Ip4InputEdges {
            lookup: rt.add_next(ip4_input, ip4_lookup)?,
            drop: rt.add_next(ip4_input, error_drop)?,
            punt: rt.add_next(ip4_input, error_punt)?,
        };
        let ip4_lookup_edges = Ip4LookupEdges {
            rewrite: rt.add_next(ip4_lookup, ip4_rewrite)?,
            drop: rt.add_next(ip4_lookup, error_drop)?,
            punt: rt.add_next(ip4_lookup, error_punt)?,
        };
        let ip4_rewrite_edges = Ip4RewriteEdges {
            drop: rt.add_next(ip4_rewrite, error_drop)?,
        };
        let source_check_drop = rt.add_next(ip4_source_check, error_drop)?;
        let ip6_input_edges = Ip6InputEdges {
            lookup: rt.add_next(ip6_input, ip6_lookup)?,
            drop: rt.add_next(ip6_input, error_drop)?,
        };
        let ip6_lookup_edges = Ip6LookupEdges {
            rewrite: rt.add_next(ip6_lookup, ip6_rewrite)?,
            local: rt.add_next(ip6_lookup, ip6_local)?,
            drop: rt.add_next(ip6_lookup, error_drop)?,
            punt: rt.add_next(ip6_lookup, error_punt)?,
        };
        let ip6_local_edges = Ip6LocalEdges {
            icmp6: rt.add_next(ip6_local, icmp6_neighbor)?,
            punt: rt.add_next(ip6_local, error_punt)?,
        };
        let ip6_rewrite_edges = Ip6RewriteEdges {
            drop: rt.add_next(ip6_rewrite, error_drop)?,
        };
        let icmp6_edges = Icmp6NeighborEdges {
            drop: rt.add_next(icmp6_neighbor, error_drop)?,
            punt: rt.add_next(icmp6_neighbor, error_punt)?,
        };
        let mpls_edges = MplsInputEdges {
            ip4: rt.add_next(mpls_input, ip4_input)?,
            ip6: rt.add_next(mpls_input, ip6_input)?,
            punt: rt.add_next(mpls_input, error_punt)?,
            drop: rt.add_next(mpls_input, error_drop)?,
        };

        let ip4_rx_features = Rc::new(RefCell::new(RxFeatures::new(ip4_input)));

        rt.set_node_function(
            ethernet_input,
            Box::new(EthernetInput::new(im.clone(), eth_edges)),
        )?;
        rt.node_mut(ethernet_input).format_trace = Some(format_ethernet_trace);
        rt.set_node_function(
            ip4_input,
            Box::new(Ip4Input::new(ip4_rx_features.clone(), ip4_input_edges)),
        )?;
        rt.set_node_function(
            ip4_lookup,
            Box::new(Ip4Lookup::new(ip4.clone(), ip4_lookup_edges)),
        )?;
        rt.set_node_function(
            ip4_rewrite,
            Box::new(Ip4Rewrite::new(ip4.clone(), ip4_rewrite_edges)),
        )?;
        rt.set_node_function(
            ip4_source_check,
            Box::new(Ip4SourceCheck::new(
                ip4.clone(),
                ip4_rx_features.clone(),
                source_check_drop,
            )),
        )?;
        rt.set_node_function(ip6_input, Box::new(Ip6Input::new(ip6_input_edges)))?;
        rt.set_node_function(
            ip6_lookup,
            Box::new(Ip6Lookup::new(ip6.clone(), ip6_lookup_edges)),
        )?;
        rt.set_node_function(ip6_local, Box::new(Ip6Local::new(ip6_local_edges)))?;
        rt.set_node_function(
            ip6_rewrite,
            Box::new(Ip6Rewrite::new(ip6.clone(), ip6_rewrite_edges)),
        )?;
        rt.set_node_function(
            icmp6_neighbor,
            Box::new(Icmp6Neighbor::new(
                im.clone(),
                ip6.clone(),
                neighbors.clone(),
                ip6_rewrite,
                icmp6_edges,
            )),
        )?;
        rt.set_node_function(mpls_input, Box::new(MplsInput::new(mpls_edges)))?;

        debug!("vecnet graph wired");
        Ok(Self {
            rt,
            im,
            ip4,
            ip6,
            ip4_rx_features,
            neighbors,
            pg: pg_main,
            nodes: CoreNodes {
                error_drop,
                error_punt,
                ethernet_input,
                ip4_input,
                ip4_lookup,
                ip4_rewrite,
                ip4_source_check,
                ip6_input,
                ip6_lookup,
                ip6_local,
                ip6_rewrite,
                icmp6_neighbor,
                mpls_input,
                pg_input,
                neighbor_ager,
            },
            ethernet_hw_class,
            pg_device_class,
            pg_tx_log,
            n_pg_interfaces: 0,
        })
    }

    /// Bytes transmitted through pg interfaces, oldest first.
    #[must_use]
    pub fn pg_tx_log(&self) -> TxLog {
        self.pg_tx_log.clone()
    }

    /// Create a pg interface pair (hw + default sw) with a locally
    /// administered MAC derived from the instance number.
    ///
    /// # Errors
    ///
    /// Propagates interface layer failures.
    pub fn create_pg_interface(&mut self) -> Result<(HwIfIndex, SwIfIndex), VnetError> {
        let instance = self.n_pg_interfaces;
        self.n_pg_interfaces += 1;
        let mac = vec![0x02, 0xfe, 0x00, 0x00, 0x00, instance as u8];
        let hw = self.im.borrow_mut().register_interface(
            &mut self.rt,
            self.pg_device_class,
            instance,
            self.ethernet_hw_class,
            0,
            mac,
        )?;
        let sw = self.im.borrow().hw(hw)?.sw_if_index;
        Ok((hw, sw))
    }

    /// Build a rewrite adjacency for IPv4 traffic leaving `sw` toward
    /// `dst_mac`.
    ///
    /// # Errors
    ///
    /// Propagates rewrite generation failures.
    pub fn add_ip4_rewrite_adjacency(
        &mut self,
        sw: SwIfIndex,
        dst_mac: Mac,
    ) -> Result<AdjIndex, VnetError> {
        self.add_rewrite_adjacency(sw, EthType::IP4, dst_mac, true)
    }

    /// Build a rewrite adjacency for IPv6 traffic leaving `sw` toward
    /// `dst_mac`.
    ///
    /// # Errors
    ///
    /// Propagates rewrite generation failures.
    pub fn add_ip6_rewrite_adjacency(
        &mut self,
        sw: SwIfIndex,
        dst_mac: Mac,
    ) -> Result<AdjIndex, VnetError> {
        self.add_rewrite_adjacency(sw, EthType::IP6, dst_mac, false)
    }

    fn add_rewrite_adjacency(
        &mut self,
        sw: SwIfIndex,
        l3_type: EthType,
        dst_mac: Mac,
        is_ip4: bool,
    ) -> Result<AdjIndex, VnetError> {
        let (l2, output_node, max_l3) = {
            let im = self.im.borrow();
            let l2 = im.rewrite_for_sw_interface(sw, l3_type, &dst_mac.0, REWRITE_INLINE_BYTES)?;
            let hw = im.hw(im.sup_hw(sw)?)?;
            (
                l2,
                hw.output_node,
                hw.max_l3_packet_bytes[buffer::TX] as u16,
            )
        };
        let rewrite_node = if is_ip4 {
            self.nodes.ip4_rewrite
        } else {
            self.nodes.ip6_rewrite
        };
        let edge = self.rt.add_next(rewrite_node, output_node)?;
        let mut rw = RewriteHeader::new(sw.into_raw(), output_node, edge, max_l3);
        rw.set_data(&l2).map_err(|_| VnetError::RewriteTooLong)?;
        let adj = if is_ip4 {
            self.ip4
                .borrow_mut()
                .adjacencies
                .add(AdjacencyKind::Rewrite(rw))
        } else {
            self.ip6
                .borrow_mut()
                .adjacencies
                .add(AdjacencyKind::Rewrite(rw))
        };
        Ok(adj)
    }

    /// Add or delete an IPv4 route.
    ///
    /// # Errors
    ///
    /// Propagates forwarding base failures.
    pub fn add_del_ip4_route(
        &mut self,
        table: u32,
        dst: Ipv4Addr,
        len: u8,
        adj: AdjIndex,
        flags: RouteFlags,
    ) -> Result<(), VnetError> {
        self.ip4
            .borrow_mut()
            .add_del_route(table, dst, len, adj, flags)?;
        Ok(())
    }

    /// Add or delete an IPv6 route.
    ///
    /// # Errors
    ///
    /// Propagates forwarding base failures.
    pub fn add_del_ip6_route(
        &mut self,
        table: u32,
        dst: Ipv6Addr,
        len: u8,
        adj: AdjIndex,
        flags: RouteFlags,
    ) -> Result<(), VnetError> {
        self.ip6
            .borrow_mut()
            .add_del_route(table, dst, len, adj, flags)?;
        Ok(())
    }

    /// Grow a multipath group (see the forwarding base's
    /// `add_del_next_hop`), returning the group adjacency.
    ///
    /// # Errors
    ///
    /// Propagates forwarding base failures.
    pub fn ip4_multipath_add_del_next_hop(
        &mut self,
        old_mp_adj: AdjIndex,
        next_hop: AdjIndex,
        weight: u32,
        is_del: bool,
    ) -> Result<AdjIndex, VnetError> {
        let ip4 = &mut *self.ip4.borrow_mut();
        let adj = ip4
            .multipath
            .add_del_next_hop(&mut ip4.adjacencies, old_mp_adj, next_hop, weight, is_del)?;
        Ok(adj)
    }

    /// Enable the unicast source check on an interface's IPv4 receive path.
    /// The terminal lookup feature is installed first if the chain was
    /// empty.
    ///
    /// # Errors
    ///
    /// Propagates feature compiler failures.
    pub fn enable_ip4_source_check(&mut self, sw: SwIfIndex) -> Result<ConfigIndex, VnetError> {
        let mut features = self.ip4_rx_features.borrow_mut();
        if features.current(sw.into_raw()) == feature::NULL_CONFIG {
            features.enable(&mut self.rt, sw.into_raw(), 0, self.nodes.ip4_lookup, &[])?;
        }
        let config = features.enable(
            &mut self.rt,
            sw.into_raw(),
            100,
            self.nodes.ip4_source_check,
            &[],
        )?;
        Ok(config)
    }

    /// Disable the unicast source check; an emptied chain returns to the
    /// null config.
    ///
    /// # Errors
    ///
    /// Propagates feature compiler failures.
    pub fn disable_ip4_source_check(&mut self, sw: SwIfIndex) -> Result<ConfigIndex, VnetError> {
        let mut features = self.ip4_rx_features.borrow_mut();
        let config = features.disable(
            &mut self.rt,
            sw.into_raw(),
            100,
            self.nodes.ip4_source_check,
            &[],
        )?;
        // drop the builtin lookup feature too once it is alone
        let remaining = features.config_main.get(config).map(|c| c.features.len()).ok();
        if remaining == Some(1) {
            let config =
                features.disable(&mut self.rt, sw.into_raw(), 0, self.nodes.ip4_lookup, &[])?;
            return Ok(config);
        }
        Ok(config)
    }

    /// Allocate a buffer, fill it with `bytes`, stamp the rx interface,
    /// and inject it at `ethernet-input`.
    ///
    /// # Errors
    ///
    /// Propagates buffer pool failures.
    pub fn inject_ethernet(&mut self, rx: SwIfIndex, bytes: &[u8]) -> Result<BufferIndex, VnetError> {
        let fl = self
            .rt
            .pool_mut()
            .free_list_for_size(bytes.len().max(64) as u32, buffer::Backing::Heap)?;
        let bi = self
            .rt
            .pool_mut()
            .alloc_one(fl)
            .ok_or(buffer::BufferError::UnknownFreeList(fl))?;
        self.rt.pool_mut().fill(bi, bytes);
        self.rt.pool_mut().get_mut(bi).sw_if_index[RX] = rx.into_raw();
        self.rt.send_frame(self.nodes.ethernet_input, vec![bi]);
        Ok(bi)
    }

    /// Run main-loop iterations until the graph is idle.
    pub fn run_to_idle(&mut self) -> bool {
        self.rt.run_until_idle(1000)
    }
}
