// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(
    unsafe_code,
    missing_docs,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]
#![deny(clippy::all)]

//! Sharded event counters for the vecnet data path.
//!
//! Counter vectors are indexed by a dense object index (interface, node
//! error, adjacency). Writers bump their own worker's shard without
//! synchronization; readers sum the shards on demand. A single-worker
//! deployment degenerates to a plain vector.

mod counters;

pub use counters::{CombinedCounter, CombinedCounterVec, SimpleCounterVec, WorkerIndex};
