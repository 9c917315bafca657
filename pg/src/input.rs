// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The `pg-input` node: rate-shaped generation into the graph.

use crate::stream::PgMain;
use graph::{DispatchCtx, Frame, NodeFunction, FRAME_SIZE};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::debug;

/// The `pg-input` node function, polled once per main-loop iteration.
pub struct PgInput {
    pg: Rc<RefCell<PgMain>>,
}

impl PgInput {
    /// Input node over the generator state.
    #[must_use]
    pub fn new(pg: Rc<RefCell<PgMain>>) -> Self {
        Self { pg }
    }
}

impl NodeFunction for PgInput {
    fn run(&mut self, ctx: &mut DispatchCtx<'_>, _frame: &Frame) -> u32 {
        let mut pg = self.pg.borrow_mut();
        let now = ctx.now();
        let mut total = 0u32;
        let pg = &mut *pg;
        let rng = &mut pg.rng;
        let mut disabled = Vec::new();
        for stream in pg.streams.iter_mut().filter_map(Option::as_mut) {
            if !stream.enabled {
                continue;
            }
            // allowance: packets the configured rate affords since the last
            // poll; whatever this poll does not generate (fractional or
            // frame-capped) carries so the long-run average converges on
            // the target
            let rate_limited = stream.rate_packets_per_second > 0.0;
            let allowance = if rate_limited {
                let elapsed = if stream.time_last_generate < 0.0 {
                    0.0
                } else {
                    now - stream.time_last_generate
                };
                stream.rate_packets_per_second * elapsed + stream.packet_accumulator
            } else {
                FRAME_SIZE as f64
            };
            stream.time_last_generate = now;
            let n = (allowance.floor().max(0.0) as u64)
                .min(stream.limit_remaining())
                .min(FRAME_SIZE as u64) as u32;
            if rate_limited {
                stream.packet_accumulator = allowance - f64::from(n);
            }
            if n == 0 {
                if stream.limit_remaining() == 0 {
                    stream.enabled = false;
                    disabled.push(stream.name.clone());
                }
                continue;
            }
            let target = stream.node_index;
            let Some(edge) = ctx.ensure_edge(target) else {
                continue;
            };
            for _ in 0..n {
                let Some(bi) = stream.generate_packet(ctx.pool(), rng) else {
                    break;
                };
                ctx.enqueue(edge, bi);
                total += 1;
            }
            ctx.put_next_frame(edge);
            if stream.limit_remaining() == 0 {
                stream.enabled = false;
                disabled.push(stream.name.clone());
            }
        }
        for name in disabled {
            debug!(stream = %name, "packet limit reached, stream disabled");
        }
        total
    }
}
