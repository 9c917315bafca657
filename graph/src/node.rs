// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Node descriptors and per-node runtime state.

use crate::trace::TraceBuffer;
use ahash::RandomState;
use bitflags::bitflags;
use id::Idx;
use std::collections::HashMap;

/// Pool index of a graph node.
pub type NodeIndex = Idx<Node>;

/// A node-local error identifier; index into the node's error-string and
/// error-counter vectors.
pub type ErrorCode = u16;

/// Pack a producing node and its local error code into the form carried in
/// a buffer header.
#[must_use]
pub fn encode_error(node: NodeIndex, code: ErrorCode) -> u32 {
    (node.into_raw() << 16) | u32::from(code)
}

/// Unpack a buffer error word into (producing node, local code).
#[must_use]
pub fn decode_error(error: u32) -> (NodeIndex, ErrorCode) {
    (NodeIndex::new(error >> 16), (error & 0xffff) as ErrorCode)
}

/// What drives a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Called once per main-loop iteration to produce work, subject to the
    /// node's polling rate.
    Input,
    /// Like input, but polled before all input nodes.
    PreInput,
    /// Called with each frame addressed to it.
    Internal,
    /// Cooperative task; may suspend on timers and events.
    Process,
}

bitflags! {
    /// Node state word.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct NodeState: u32 {
        /// Node participates in dispatch.
        const ENABLED = 1 << 0;
        /// Input node is actively polling.
        const POLLING = 1 << 1;
        /// Level-triggered interrupt; consumed at the next iteration.
        const INTERRUPT_PENDING = 1 << 2;
        /// Node was deleted; frames addressed here release their buffers.
        const IS_DELETED = 1 << 3;
    }
}

/// Registration-time description of a node.
#[derive(Debug, Clone)]
pub struct NodeDesc {
    /// Unique node name, e.g. `"ip4-lookup"`.
    pub name: String,
    /// Dispatch kind.
    pub kind: NodeKind,
    /// Error strings; the node-local error code indexes this vector.
    pub error_strings: Vec<&'static str>,
}

impl NodeDesc {
    /// Describe an internal node.
    #[must_use]
    pub fn internal(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            kind: NodeKind::Internal,
            error_strings: Vec::new(),
        }
    }

    /// Describe an input node.
    #[must_use]
    pub fn input(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            kind: NodeKind::Input,
            error_strings: Vec::new(),
        }
    }

    /// Describe a process node.
    #[must_use]
    pub fn process(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            kind: NodeKind::Process,
            error_strings: Vec::new(),
        }
    }

    /// Attach error strings, one per node-local error code.
    #[must_use]
    pub fn with_errors(mut self, errors: &[&'static str]) -> Self {
        self.error_strings = errors.to_vec();
        self
    }
}

/// A registered node.
pub struct Node {
    /// This node's index.
    pub index: NodeIndex,
    /// Unique name.
    pub name: String,
    /// Dispatch kind.
    pub kind: NodeKind,
    /// State word.
    pub state: NodeState,
    /// Edge-id -> target node. The edge id is the node-local integer
    /// written into feature-config strings and cached next indices.
    pub next_nodes: Vec<NodeIndex>,
    /// Reverse map of `next_nodes`, for edge interning.
    pub(crate) edge_by_target: HashMap<NodeIndex, u16, RandomState>,
    /// Error strings, indexed by local error code.
    pub error_strings: Vec<&'static str>,
    /// Error counters, indexed by local error code.
    pub errors: Vec<u64>,
    /// Input polling rate in dispatches per second; zero means every
    /// iteration.
    pub polling_rate: f64,
    /// Timestamp of the last dispatch.
    pub last_dispatch: f64,
    /// Total dispatches.
    pub calls: u64,
    /// Total buffers moved through this node.
    pub vectors: u64,
    /// Process suspend count.
    pub suspends: u64,
    /// Buffers still to trace; decremented per traced buffer.
    pub trace_count: u32,
    /// Circular trace store.
    pub trace: TraceBuffer,
    /// Render hook for trace records.
    pub format_trace: Option<fn(&[u8]) -> String>,
}

impl Node {
    pub(crate) fn new(index: NodeIndex, desc: NodeDesc, trace_capacity: usize) -> Self {
        let n_errors = desc.error_strings.len().max(1);
        Node {
            index,
            name: desc.name,
            kind: desc.kind,
            state: NodeState::ENABLED
                | if matches!(desc.kind, NodeKind::Input | NodeKind::PreInput) {
                    NodeState::POLLING
                } else {
                    NodeState::empty()
                },
            next_nodes: Vec::new(),
            edge_by_target: HashMap::with_hasher(RandomState::with_seed(0)),
            error_strings: desc.error_strings,
            errors: vec![0; n_errors],
            polling_rate: 0.0,
            last_dispatch: f64::NEG_INFINITY,
            calls: 0,
            vectors: 0,
            suspends: 0,
            trace_count: 0,
            trace: TraceBuffer::new(trace_capacity),
            format_trace: None,
        }
    }

    /// True iff the node is enabled and not deleted.
    #[must_use]
    pub fn is_runnable(&self) -> bool {
        self.state.contains(NodeState::ENABLED) && !self.state.contains(NodeState::IS_DELETED)
    }

    /// The edge to `target`, if one exists.
    #[must_use]
    pub fn edge_to(&self, target: NodeIndex) -> Option<u16> {
        self.edge_by_target.get(&target).copied()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn error_word_round_trip() {
        let node = NodeIndex::new(42);
        let word = encode_error(node, 7);
        assert_eq!(decode_error(word), (node, 7));
        assert_eq!(decode_error(encode_error(NodeIndex::new(0), 0)), (NodeIndex::new(0), 0));
    }

    #[test]
    fn input_nodes_start_polling() {
        let n = Node::new(NodeIndex::new(0), NodeDesc::input("rx"), 16);
        assert!(n.state.contains(NodeState::POLLING));
        let n = Node::new(NodeIndex::new(1), NodeDesc::internal("demux"), 16);
        assert!(!n.state.contains(NodeState::POLLING));
        assert!(n.is_runnable());
    }
}
