// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The generic per-interface output node: stamp the tx interface, count,
//! hand to the device tx node.

use crate::counters::InterfaceCounters;
use crate::interface::SwIfIndex;
use buffer::TX;
use graph::{DispatchCtx, Frame, NodeFunction};
use std::cell::RefCell;
use std::rc::Rc;

/// Output-node function created per hardware interface. Edge 0 is wired to
/// the device class's tx node at registration.
pub struct InterfaceOutput {
    counters: Rc<RefCell<InterfaceCounters>>,
    sw_if_index: SwIfIndex,
}

impl InterfaceOutput {
    /// Output node for `sw_if_index`.
    #[must_use]
    pub fn new(counters: Rc<RefCell<InterfaceCounters>>, sw_if_index: SwIfIndex) -> Self {
        Self {
            counters,
            sw_if_index,
        }
    }
}

impl NodeFunction for InterfaceOutput {
    fn run(&mut self, ctx: &mut DispatchCtx<'_>, frame: &Frame) -> u32 {
        let mut counters = self.counters.borrow_mut();
        for &bi in &frame.buffers {
            let bytes = u64::from(ctx.pool().length_in_chain(bi));
            ctx.pool().get_mut(bi).sw_if_index[TX] = self.sw_if_index.into_raw();
            counters.count_tx(0, self.sw_if_index, bytes);
            ctx.enqueue(0, bi);
        }
        frame.n_vectors() as u32
    }
}
