// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The pg device class: generated packets enter through a real interface
//! pair, and whatever is transmitted out of one is simply absorbed.

use graph::{DispatchCtx, Frame, NodeFunction};
use interface::{DeviceClass, HwIfIndex};
use std::cell::RefCell;
use std::rc::Rc;

/// Buffers transmitted through a pg interface, retained for inspection by
/// tests and the replay recorder.
pub type TxLog = Rc<RefCell<Vec<Vec<u8>>>>;

struct PgTx {
    log: TxLog,
}

impl NodeFunction for PgTx {
    fn run(&mut self, ctx: &mut DispatchCtx<'_>, frame: &Frame) -> u32 {
        let mut log = self.log.borrow_mut();
        for &bi in &frame.buffers {
            let mut contents = Vec::new();
            ctx.pool().contents(bi, &mut contents);
            log.push(contents);
        }
        ctx.pool().free(&frame.buffers, true);
        frame.n_vectors() as u32
    }
}

/// The pg device class.
#[derive(Default)]
pub struct PgDeviceClass {
    log: TxLog,
}

impl PgDeviceClass {
    /// A device class whose tx nodes record into a shared log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared transmit log.
    #[must_use]
    pub fn tx_log(&self) -> TxLog {
        self.log.clone()
    }
}

impl DeviceClass for PgDeviceClass {
    fn name(&self) -> &'static str {
        "pg"
    }

    fn make_tx_function(&self, _hw_if_index: HwIfIndex) -> Box<dyn NodeFunction> {
        Box::new(PgTx {
            log: self.log.clone(),
        })
    }

    fn clear_counters(&self, _hw_if_index: HwIfIndex) {
        self.log.borrow_mut().clear();
    }
}
