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
#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]

//! Packet buffers, buffer chains, and size-typed free-lists.
//!
//! A logical packet is a chain of fixed-capacity segments. Nodes refer to
//! buffers exclusively by pool index ([`BufferIndex`]); ownership of an index
//! moves with the frame that carries it. Only the chain head carries the
//! cross-node [`Opaque`] scratch area.

mod buffer;
mod pool;

pub use buffer::{Buffer, BufferFlags, Opaque, RX, TX};
pub use pool::{Backing, BufferConfig, BufferError, BufferPool, FreeList, FreeListIndex};

use id::Idx;

/// Pool index of a buffer.
pub type BufferIndex = Idx<Buffer>;
