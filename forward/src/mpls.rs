// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! `mpls-input`: label-entry demux. The core parses the stack entry and
//! honors reserved-label meanings; label switching itself lives outside.

use graph::{DispatchCtx, Frame, NodeFunction};
use net::mpls::{LabelEntry, ReservedLabel};

/// `mpls-input` error codes and strings.
pub mod mpls_input_error {
    /// No error.
    pub const NONE: u16 = 0;
    /// Frame shorter than one label entry.
    pub const TRUNCATED: u16 = 1;
    /// Label TTL expired.
    pub const TTL_EXPIRED: u16 = 2;
    /// Label with no forwarding state.
    pub const UNKNOWN_LABEL: u16 = 3;
    /// The error strings, indexed by code.
    pub const STRINGS: &[&str] = &[
        "no error",
        "truncated label entry",
        "label ttl expired",
        "unknown label",
    ];
}

/// Outbound edges of `mpls-input`.
#[derive(Debug, Clone, Copy)]
pub struct MplsInputEdges {
    /// To `ip4-input` (IPv4 explicit null, end of stack).
    pub ip4: u16,
    /// To `ip6-input` (IPv6 explicit null, end of stack).
    pub ip6: u16,
    /// To `error-punt` (router alert and other reserved labels).
    pub punt: u16,
    /// To `error-drop`.
    pub drop: u16,
}

/// The `mpls-input` node function.
pub struct MplsInput {
    edges: MplsInputEdges,
}

impl MplsInput {
    /// Demux node with wired edges.
    #[must_use]
    pub fn new(edges: MplsInputEdges) -> Self {
        Self { edges }
    }
}

impl NodeFunction for MplsInput {
    fn run(&mut self, ctx: &mut DispatchCtx<'_>, frame: &Frame) -> u32 {
        for &bi in &frame.buffers {
            let entry = {
                let data = ctx.pool().data(bi);
                match data {
                    [a, b, c, d, ..] => Some(LabelEntry::parse([*a, *b, *c, *d])),
                    _ => None,
                }
            };
            let Some(entry) = entry else {
                ctx.set_error(bi, mpls_input_error::TRUNCATED);
                ctx.count_error(mpls_input_error::TRUNCATED, 1);
                ctx.enqueue(self.edges.drop, bi);
                continue;
            };
            if entry.ttl <= 1 {
                ctx.set_error(bi, mpls_input_error::TTL_EXPIRED);
                ctx.count_error(mpls_input_error::TTL_EXPIRED, 1);
                ctx.enqueue(self.edges.drop, bi);
                continue;
            }
            match entry.reserved() {
                Some(ReservedLabel::Ip4ExplicitNull) if entry.end_of_stack => {
                    ctx.pool().advance(bi, LabelEntry::BYTES as i32);
                    ctx.enqueue(self.edges.ip4, bi);
                }
                Some(ReservedLabel::Ip6ExplicitNull) if entry.end_of_stack => {
                    ctx.pool().advance(bi, LabelEntry::BYTES as i32);
                    ctx.enqueue(self.edges.ip6, bi);
                }
                Some(_) => ctx.enqueue(self.edges.punt, bi),
                None => {
                    // no label FIB in the core; count and drop
                    ctx.set_error(bi, mpls_input_error::UNKNOWN_LABEL);
                    ctx.count_error(mpls_input_error::UNKNOWN_LABEL, 1);
                    ctx.enqueue(self.edges.drop, bi);
                }
            }
        }
        frame.n_vectors() as u32
    }
}
