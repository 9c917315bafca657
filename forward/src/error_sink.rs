// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The error-drop and error-punt sinks.
//!
//! A buffer arrives here with its error word naming the producing node and
//! that node's local error code. The sink attributes the count to the
//! producer, bumps the receive interface's drop or punt counter, and
//! releases the chain.

use buffer::RX;
use graph::{DispatchCtx, Frame, NodeFunction};
use interface::{InterfaceMain, SwIfIndex};
use std::cell::RefCell;
use std::rc::Rc;

/// Which disposition a sink applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    /// Count and release.
    Drop,
    /// Deliver to the host stack (modeled as count-and-release here; the
    /// host bridge is outside the core).
    Punt,
}

/// The sink node function.
pub struct ErrorSink {
    kind: SinkKind,
    im: Rc<RefCell<InterfaceMain>>,
}

impl ErrorSink {
    /// A sink of the given disposition.
    #[must_use]
    pub fn new(kind: SinkKind, im: Rc<RefCell<InterfaceMain>>) -> Self {
        Self { kind, im }
    }
}

impl NodeFunction for ErrorSink {
    fn run(&mut self, ctx: &mut DispatchCtx<'_>, frame: &Frame) -> u32 {
        let im = self.im.borrow();
        let mut counters = im.counters.borrow_mut();
        for &bi in &frame.buffers {
            let (error, rx) = {
                let b = ctx.pool().get(bi);
                (b.error, b.sw_if_index[RX])
            };
            if error != 0 {
                ctx.attribute_error(error, 1);
            }
            let sw = SwIfIndex::new(rx);
            if rx != u32::MAX && im.sw(sw).is_ok() {
                match self.kind {
                    SinkKind::Drop => counters.count_drop(0, sw, 1),
                    SinkKind::Punt => counters.count_punt(0, sw, 1),
                }
            }
        }
        ctx.pool().free(&frame.buffers, true);
        frame.n_vectors() as u32
    }
}
