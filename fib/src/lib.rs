// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(unsafe_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![deny(clippy::all)]
#![allow(clippy::cast_possible_truncation)]

//! The L3 forwarding base: adjacency heap, multipath groups, longest-prefix
//! match tables, and the rewrite engine.
//!
//! Adjacencies live in a heap so that multipath blocks of power-of-two size
//! stay contiguous; the FIB stores adjacency indices and lookup selects a
//! block slot by flow hash. All control-path mutation is single-writer; the
//! data path only ever reads adjacency indices, which stay valid until a
//! remap sweep retires them.

mod adjacency;
mod flow;
mod ip4;
mod ip6;
mod mtrie;
mod multipath;
mod rewrite;

pub use adjacency::{
    AdjIndex, Adjacency, AdjacencyKind, AdjacencyTable, FibError, MISS_ADJ_INDEX,
};
pub use flow::{ip4_flow_hash, ip6_flow_hash};
pub use ip4::{AddressEvent, Ip4Fib, Ip4Main, RouteEvent};
pub use ip6::{Address6Event, Ip6Fib, Ip6Main, Route6Event};
pub use mtrie::Mtrie;
pub use multipath::{MultipathInfo, MultipathMain};
pub use rewrite::{rewrite_one_header, rewrite_two_headers, RewriteHeader, REWRITE_INLINE_BYTES};

use bitflags::bitflags;

bitflags! {
    /// Flags accepted by `add_del_route`.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct RouteFlags: u32 {
        /// Delete instead of add.
        const DEL = 1 << 0;
        /// The table argument is a raw fib index, not a table id.
        const FIB_INDEX = 1 << 1;
        /// Re-adding an existing prefix keeps its current adjacency.
        const KEEP_OLD_ADJACENCY = 1 << 2;
        /// Do not announce this change to registered route hooks.
        const NO_REDISTRIBUTE = 1 << 3;
        /// More calls in this group follow; defer the remap sweep.
        const NOT_LAST_IN_GROUP = 1 << 4;
        /// Route was installed by neighbor discovery.
        const NEIGHBOR = 1 << 5;
    }
}

/// Lanes of the buffer opaque area used by the lookup nodes.
pub mod opaque_lane {
    /// Destination-lookup adjacency index.
    pub const DST_ADJ: usize = 0;
    /// Source-lookup adjacency index (`u32::MAX` until computed).
    pub const SRC_ADJ: usize = 1;
    /// Flow hash.
    pub const FLOW_HASH: usize = 2;
}
