// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(unsafe_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![deny(clippy::all)]
#![allow(clippy::cast_possible_truncation)]

//! The node/frame graph runtime.
//!
//! Packet processing is a directed graph of nodes. Frames — vectors of
//! buffer indices — flow along explicit next-edges. Each iteration of the
//! cooperative main loop polls the input nodes (rate-shaped), drains the
//! pending internal frames in arrival order, and resumes any process nodes
//! whose timer or event fired.
//!
//! Nodes never block and never suspend mid-frame; only process nodes
//! suspend, and only at their two yield points.

mod frame;
mod node;
mod process;
mod runtime;
mod trace;

pub use frame::{Frame, FRAME_SIZE};
pub use node::{
    decode_error, encode_error, ErrorCode, Node, NodeDesc, NodeIndex, NodeKind, NodeState,
};
pub use process::{EventId, Process, Resume, Yield};
pub use runtime::{DispatchCtx, GraphError, NodeFunction, Runtime};
pub use trace::{TraceBuffer, TraceRecord, TRACE_RECORD_BYTES};
