// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(unsafe_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![deny(clippy::all)]
#![allow(clippy::cast_possible_truncation)]

//! The protocol nodes of the forwarding path.
//!
//! `ethernet-input` demuxes frames by ethertype and VLAN tag; the per-AF
//! input nodes validate headers and enter the feature chain; the lookup
//! nodes resolve adjacencies and fan out by adjacency kind; the rewrite
//! nodes paint L2 headers and hand packets to interface output. Parse and
//! validation failures never raise: they stamp the buffer's error word and
//! divert to the error sinks, which attribute counters and release.

mod error_sink;
mod ethernet;
mod features;
mod icmp6;
mod ip4;
mod ip6;
mod mpls;

pub use error_sink::{ErrorSink, SinkKind};
pub use ethernet::{ethernet_input_error, EthernetInput, EthernetInputEdges};
pub use features::RxFeatures;
pub use icmp6::{icmp6_error, Icmp6Neighbor, Icmp6NeighborEdges, NeighborAger, NeighborCache};
pub use ip4::{
    ip4_input_error, ip4_lookup_error, ip4_rewrite_error, ip4_source_check_error, Ip4Input,
    Ip4InputEdges, Ip4Lookup, Ip4LookupEdges, Ip4Rewrite, Ip4RewriteEdges, Ip4SourceCheck,
};
pub use ip6::{
    ip6_input_error, ip6_lookup_error, ip6_rewrite_error, Ip6Input, Ip6InputEdges, Ip6Local,
    Ip6LocalEdges, Ip6Lookup, Ip6LookupEdges, Ip6Rewrite, Ip6RewriteEdges,
};
pub use mpls::{mpls_input_error, MplsInput, MplsInputEdges};

use graph::{DispatchCtx, Frame, NodeFunction};

/// Placeholder function for nodes registered before wiring; frames reaching
/// it release their buffers.
pub struct Unwired;

impl NodeFunction for Unwired {
    fn run(&mut self, ctx: &mut DispatchCtx<'_>, frame: &Frame) -> u32 {
        ctx.pool().free(&frame.buffers, true);
        frame.n_vectors() as u32
    }
}
