// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The graph runtime: registration, the enqueue contract, and the
//! cooperative main loop.

use crate::frame::{Frame, FRAME_SIZE};
use crate::node::{
    decode_error, encode_error, ErrorCode, Node, NodeDesc, NodeIndex, NodeKind, NodeState,
};
use crate::process::{EventId, Process, Resume, WakeTime, Yield};
use ahash::RandomState;
use buffer::{BufferFlags, BufferIndex, BufferPool};
use priority_queue::PriorityQueue;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, error, trace};

/// A node's per-frame entry point.
///
/// The function reads buffer indices from `frame`, transforms the packets
/// through [`DispatchCtx`], and returns how many vectors it consumed. A
/// return exceeding the frame size is a fatal runtime error.
pub trait NodeFunction {
    /// Process one frame.
    fn run(&mut self, ctx: &mut DispatchCtx<'_>, frame: &Frame) -> u32;
}

/// Graph control-path failures.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// No node with that index.
    #[error("no such node: {0}")]
    UnknownNode(NodeIndex),
    /// A node with that name already exists.
    #[error("duplicate node name: {0}")]
    DuplicateName(String),
    /// The operation requires a process node.
    #[error("node {0} is not a process node")]
    NotAProcess(NodeIndex),
}

enum Clock {
    Wall(std::time::Instant),
    Manual(f64),
}

/// The graph runtime. One instance owns one worker's nodes, frames, and
/// buffer pool; all calls take the instance explicitly.
pub struct Runtime {
    pool: BufferPool,
    nodes: Vec<Node>,
    functions: Vec<Option<Box<dyn NodeFunction>>>,
    processes: Vec<Option<Box<dyn Process>>>,
    node_by_name: HashMap<String, NodeIndex, RandomState>,
    pending: VecDeque<Frame>,
    frame_pool: Vec<Vec<BufferIndex>>,
    wake_heap: PriorityQueue<NodeIndex, WakeTime, RandomState>,
    event_waiters: HashMap<EventId, Vec<NodeIndex>, RandomState>,
    runnable_processes: Vec<(NodeIndex, Resume)>,
    clock: Clock,
    trace_capacity: usize,
    halted: Option<String>,
    dispatches_this_iteration: u64,
}

impl Runtime {
    /// A runtime over `pool`, stamped by wall-clock time.
    #[must_use]
    pub fn new(pool: BufferPool) -> Self {
        Self::build(pool, Clock::Wall(std::time::Instant::now()))
    }

    /// A runtime whose clock only moves through [`Runtime::advance_time`];
    /// used by tests and deterministic replay.
    #[must_use]
    pub fn new_with_manual_clock(pool: BufferPool) -> Self {
        Self::build(pool, Clock::Manual(0.0))
    }

    fn build(pool: BufferPool, clock: Clock) -> Self {
        Self {
            pool,
            nodes: Vec::new(),
            functions: Vec::new(),
            processes: Vec::new(),
            node_by_name: HashMap::with_hasher(RandomState::with_seed(0)),
            pending: VecDeque::new(),
            frame_pool: Vec::new(),
            wake_heap: PriorityQueue::with_hasher(RandomState::with_seed(0)),
            event_waiters: HashMap::with_hasher(RandomState::with_seed(0)),
            runnable_processes: Vec::new(),
            clock,
            trace_capacity: 1024,
            halted: None,
            dispatches_this_iteration: 0,
        }
    }

    /// Records per node kept in trace buffers created after this call.
    pub fn set_trace_capacity(&mut self, capacity: usize) {
        self.trace_capacity = capacity;
    }

    /// Seconds since the runtime started.
    #[must_use]
    pub fn now(&self) -> f64 {
        match &self.clock {
            Clock::Wall(start) => start.elapsed().as_secs_f64(),
            Clock::Manual(now) => *now,
        }
    }

    /// Advance a manual clock. No effect on a wall clock.
    pub fn advance_time(&mut self, dt: f64) {
        if let Clock::Manual(now) = &mut self.clock {
            *now += dt;
        }
    }

    /// The buffer pool.
    #[must_use]
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// The buffer pool, mutably.
    pub fn pool_mut(&mut self) -> &mut BufferPool {
        &mut self.pool
    }

    /// Fatal-abort reason, if the worker has halted.
    #[must_use]
    pub fn halted(&self) -> Option<&str> {
        self.halted.as_deref()
    }

    /// Register a node and its function.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateName`] if the name is taken.
    pub fn register_node(
        &mut self,
        desc: NodeDesc,
        function: Box<dyn NodeFunction>,
    ) -> Result<NodeIndex, GraphError> {
        let index = self.register_common(desc)?;
        self.functions[index.as_usize()] = Some(function);
        Ok(index)
    }

    /// Register a process node. It is started (resumed with
    /// [`Resume::Start`]) on the next iteration.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateName`] if the name is taken.
    pub fn register_process(
        &mut self,
        desc: NodeDesc,
        process: Box<dyn Process>,
    ) -> Result<NodeIndex, GraphError> {
        let mut desc = desc;
        desc.kind = NodeKind::Process;
        let index = self.register_common(desc)?;
        self.processes[index.as_usize()] = Some(process);
        self.runnable_processes.push((index, Resume::Start));
        Ok(index)
    }

    fn register_common(&mut self, desc: NodeDesc) -> Result<NodeIndex, GraphError> {
        if self.node_by_name.contains_key(&desc.name) {
            return Err(GraphError::DuplicateName(desc.name));
        }
        let index = NodeIndex::new(self.nodes.len() as u32);
        debug!(%index, name = %desc.name, "register node");
        self.node_by_name.insert(desc.name.clone(), index);
        self.nodes.push(Node::new(index, desc, self.trace_capacity));
        self.functions.push(None);
        self.processes.push(None);
        Ok(index)
    }

    /// Replace a node's function.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownNode`] for a stale index.
    pub fn set_node_function(
        &mut self,
        node: NodeIndex,
        function: Box<dyn NodeFunction>,
    ) -> Result<(), GraphError> {
        if node.as_usize() >= self.nodes.len() {
            return Err(GraphError::UnknownNode(node));
        }
        self.functions[node.as_usize()] = Some(function);
        Ok(())
    }

    /// Intern the edge `from -> to`, returning its node-local edge id.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownNode`] when either index is stale.
    pub fn add_next(&mut self, from: NodeIndex, to: NodeIndex) -> Result<u16, GraphError> {
        if to.as_usize() >= self.nodes.len() {
            return Err(GraphError::UnknownNode(to));
        }
        let node = self
            .nodes
            .get_mut(from.as_usize())
            .ok_or(GraphError::UnknownNode(from))?;
        if let Some(edge) = node.edge_by_target.get(&to) {
            return Ok(*edge);
        }
        let edge = node.next_nodes.len() as u16;
        node.next_nodes.push(to);
        node.edge_by_target.insert(to, edge);
        Ok(edge)
    }

    /// Borrow a node.
    #[must_use]
    pub fn node(&self, index: NodeIndex) -> &Node {
        &self.nodes[index.as_usize()]
    }

    /// Borrow a node mutably.
    pub fn node_mut(&mut self, index: NodeIndex) -> &mut Node {
        &mut self.nodes[index.as_usize()]
    }

    /// All registered nodes, in registration order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Look a node up by name.
    #[must_use]
    pub fn node_by_name(&self, name: &str) -> Option<NodeIndex> {
        self.node_by_name.get(name).copied()
    }

    /// Remove a node's name from the registry so the name can be reused,
    /// and mark the node deleted. Frames addressed to a deleted node
    /// release their buffers instead of dispatching.
    pub fn retire_node(&mut self, index: NodeIndex) {
        let node = &mut self.nodes[index.as_usize()];
        node.state.insert(NodeState::IS_DELETED);
        let name = node.name.clone();
        self.node_by_name.remove(&name);
        debug!(%index, %name, "retire node");
    }

    /// Inject a frame from outside the graph (a driver, a test harness).
    pub fn send_frame(&mut self, to: NodeIndex, buffers: Vec<BufferIndex>) {
        self.pending.push_back(Frame {
            to,
            from: NodeIndex::INVALID,
            buffers,
            aux: Vec::new(),
        });
    }

    /// Signal a one-time event; waiting processes resume next iteration.
    pub fn signal_event(&mut self, event: EventId) {
        if let Some(waiters) = self.event_waiters.remove(&event) {
            for ni in waiters {
                self.runnable_processes.push((ni, Resume::Event(event)));
            }
        }
    }

    /// Set an input node's polling-rate target in dispatches per second;
    /// zero polls every iteration.
    pub fn set_polling_rate(&mut self, node: NodeIndex, rate: f64) {
        self.nodes[node.as_usize()].polling_rate = rate;
    }

    /// Mark a level-triggered interrupt for an input node; it is polled
    /// (regardless of rate) on the next iteration.
    pub fn set_interrupt_pending(&mut self, node: NodeIndex) {
        self.nodes[node.as_usize()]
            .state
            .insert(NodeState::INTERRUPT_PENDING);
    }

    /// Enable or disable a node, observed at the next iteration.
    pub fn set_enabled(&mut self, node: NodeIndex, enabled: bool) {
        let state = &mut self.nodes[node.as_usize()].state;
        if enabled {
            state.insert(NodeState::ENABLED);
        } else {
            state.remove(NodeState::ENABLED);
        }
    }

    fn take_frame_vec(&mut self) -> Vec<BufferIndex> {
        self.frame_pool
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(FRAME_SIZE))
    }

    fn recycle_frame_vec(&mut self, mut v: Vec<BufferIndex>) {
        v.clear();
        self.frame_pool.push(v);
    }

    fn free_frame_buffers(&mut self, frame: Frame) {
        self.pool.free(&frame.buffers, true);
        self.recycle_frame_vec(frame.buffers);
    }

    fn dispatch_frame(&mut self, frame: Frame) {
        if self.halted.is_some() {
            self.free_frame_buffers(frame);
            return;
        }
        let ni = frame.to;
        if ni.as_usize() >= self.nodes.len() || !self.nodes[ni.as_usize()].is_runnable() {
            trace!(node = %ni, n = frame.n_vectors(), "frame to dead node, dropping");
            self.free_frame_buffers(frame);
            return;
        }
        let Some(mut function) = self.functions[ni.as_usize()].take() else {
            self.free_frame_buffers(frame);
            return;
        };
        let n_vectors = frame.n_vectors();
        let processed = {
            let mut ctx = DispatchCtx::new(self, ni);
            let processed = function.run(&mut ctx, &frame);
            ctx.flush_all();
            processed
        };
        self.functions[ni.as_usize()] = Some(function);
        // an input poll that produced nothing is not work; it must not keep
        // the loop from going idle
        if n_vectors > 0 || processed > 0 {
            self.dispatches_this_iteration += 1;
        }
        {
            let node = &mut self.nodes[ni.as_usize()];
            node.calls += 1;
            node.vectors += n_vectors as u64;
        }
        self.recycle_frame_vec(frame.buffers);
        if processed as usize > n_vectors && n_vectors > 0 {
            self.fatal(format!(
                "node {} processed {} vectors from a frame of {}",
                self.nodes[ni.as_usize()].name,
                processed,
                n_vectors
            ));
        }
    }

    fn resume_process(&mut self, ni: NodeIndex, reason: Resume) {
        if self.halted.is_some() || !self.nodes[ni.as_usize()].is_runnable() {
            return;
        }
        let Some(mut process) = self.processes[ni.as_usize()].take() else {
            return;
        };
        let yielded = {
            let mut ctx = DispatchCtx::new(self, ni);
            let yielded = process.resume(&mut ctx, reason);
            ctx.flush_all();
            yielded
        };
        self.processes[ni.as_usize()] = Some(process);
        self.dispatches_this_iteration += 1;
        let now = self.now();
        let node = &mut self.nodes[ni.as_usize()];
        node.calls += 1;
        match yielded {
            Yield::SuspendFor(seconds) => {
                node.suspends += 1;
                self.wake_heap.push(ni, WakeTime(now + seconds));
            }
            Yield::WaitForEvent(event) => {
                node.suspends += 1;
                self.event_waiters.entry(event).or_default().push(ni);
            }
            Yield::Complete => {
                node.state.remove(NodeState::ENABLED);
            }
        }
    }

    fn poll_inputs(&mut self, kind: NodeKind) {
        let now = self.now();
        for i in 0..self.nodes.len() {
            let node = &mut self.nodes[i];
            if node.kind != kind || !node.is_runnable() {
                continue;
            }
            let interrupted = node.state.contains(NodeState::INTERRUPT_PENDING);
            if !interrupted && !node.state.contains(NodeState::POLLING) {
                continue;
            }
            if !interrupted && node.polling_rate > 0.0 && now - node.last_dispatch < 1.0 / node.polling_rate
            {
                continue;
            }
            node.state.remove(NodeState::INTERRUPT_PENDING);
            node.last_dispatch = now;
            let buffers = self.take_frame_vec();
            self.dispatch_frame(Frame {
                to: NodeIndex::new(i as u32),
                from: NodeIndex::INVALID,
                buffers,
                aux: Vec::new(),
            });
        }
    }

    fn drain_pending(&mut self) {
        while let Some(frame) = self.pending.pop_front() {
            self.dispatch_frame(frame);
            if self.halted.is_some() {
                break;
            }
        }
    }

    /// Run one main-loop iteration: poll inputs, drain internal frames,
    /// resume due processes, drain again.
    ///
    /// Returns the number of node dispatches performed; zero means the
    /// graph was idle.
    pub fn run_iteration(&mut self) -> u64 {
        if self.halted.is_some() {
            return 0;
        }
        self.dispatches_this_iteration = 0;
        self.poll_inputs(NodeKind::PreInput);
        self.poll_inputs(NodeKind::Input);
        self.drain_pending();
        let now = self.now();
        while let Some((_, wt)) = self.wake_heap.peek() {
            if wt.0 > now {
                break;
            }
            if let Some((ni, _)) = self.wake_heap.pop() {
                self.runnable_processes.push((ni, Resume::TimerFired));
            }
        }
        let runnable = std::mem::take(&mut self.runnable_processes);
        for (ni, reason) in runnable {
            self.resume_process(ni, reason);
        }
        self.drain_pending();
        self.dispatches_this_iteration
    }

    /// Iterate until an iteration performs no dispatches, or `max_iters`
    /// is hit. Returns true if the graph went idle.
    pub fn run_until_idle(&mut self, max_iters: u64) -> bool {
        for _ in 0..max_iters {
            if self.run_iteration() == 0 {
                return true;
            }
        }
        false
    }

    fn fatal(&mut self, reason: String) {
        error!(%reason, "fatal graph error, halting worker");
        for node in &self.nodes {
            for record in node.trace.iter() {
                let rendered = node.format_trace.map_or_else(
                    || format!("{:02x?}", &record.data[..record.len as usize]),
                    |f| f(&record.data[..record.len as usize]),
                );
                error!(node = %node.name, seq = record.sequence, t = record.time, "{rendered}");
            }
        }
        self.halted = Some(reason);
    }
}

/// Everything a node function may touch while it runs: the buffer pool,
/// its outbound frames, its error counters, and its trace buffer.
pub struct DispatchCtx<'a> {
    rt: &'a mut Runtime,
    node: NodeIndex,
    open: Vec<(u16, Vec<BufferIndex>)>,
    cached_next: Option<u16>,
}

impl<'a> DispatchCtx<'a> {
    fn new(rt: &'a mut Runtime, node: NodeIndex) -> Self {
        Self {
            rt,
            node,
            open: Vec::new(),
            cached_next: None,
        }
    }

    /// The running node's index.
    #[must_use]
    pub fn node(&self) -> NodeIndex {
        self.node
    }

    /// Current time.
    #[must_use]
    pub fn now(&self) -> f64 {
        self.rt.now()
    }

    /// The buffer pool.
    pub fn pool(&mut self) -> &mut BufferPool {
        &mut self.rt.pool
    }

    /// The edge from the running node to `target`, if wired.
    #[must_use]
    pub fn edge_to(&self, target: NodeIndex) -> Option<u16> {
        self.rt.nodes[self.node.as_usize()].edge_to(target)
    }

    /// Intern the edge from the running node to `target`, wiring it if
    /// absent.
    pub fn ensure_edge(&mut self, target: NodeIndex) -> Option<u16> {
        self.ensure_edge_from(self.node, target)
    }

    /// Intern an edge between two arbitrary nodes. Control-plane nodes use
    /// this when they mint adjacencies whose cached next edge belongs to
    /// another node (e.g. a neighbor responder wiring rewrite -> output).
    pub fn ensure_edge_from(&mut self, from: NodeIndex, to: NodeIndex) -> Option<u16> {
        self.rt.add_next(from, to).ok()
    }

    /// Append `bi` to the open frame for `edge`, handing the frame off
    /// when it fills.
    pub fn enqueue(&mut self, edge: u16, bi: BufferIndex) {
        let slot = match self.open.iter_mut().position(|(e, _)| *e == edge) {
            Some(i) => i,
            None => {
                let v = self.rt.take_frame_vec();
                self.open.push((edge, v));
                self.open.len() - 1
            }
        };
        self.open[slot].1.push(bi);
        if self.open[slot].1.len() == FRAME_SIZE {
            self.put_next_frame(edge);
        }
    }

    /// Resolve `target` to an edge and enqueue; buffers to unwired targets
    /// are released.
    pub fn enqueue_to_node(&mut self, target: NodeIndex, bi: BufferIndex) {
        match self.edge_to(target) {
            Some(edge) => self.enqueue(edge, bi),
            None => {
                debug_assert!(false, "no edge from {} to {target}", self.node);
                self.rt.pool.free(&[bi], true);
            }
        }
    }

    /// Enqueue through the cached next edge, flushing on divergence.
    ///
    /// The common case — `edge` equals the cached edge — appends to the
    /// already-open frame; a divergent edge hands the open frame off first
    /// and re-caches.
    pub fn validate_enqueue_x1(&mut self, edge: u16, bi: BufferIndex) {
        if let Some(diverged) = self.cached_next.filter(|cached| *cached != edge) {
            self.put_next_frame(diverged);
        }
        self.cached_next = Some(edge);
        self.enqueue(edge, bi);
    }

    /// Two-at-a-time variant of [`DispatchCtx::validate_enqueue_x1`].
    pub fn validate_enqueue_x2(
        &mut self,
        edge0: u16,
        bi0: BufferIndex,
        edge1: u16,
        bi1: BufferIndex,
    ) {
        self.validate_enqueue_x1(edge0, bi0);
        self.validate_enqueue_x1(edge1, bi1);
    }

    /// Hand off the open frame for `edge`, if any.
    pub fn put_next_frame(&mut self, edge: u16) {
        if let Some(i) = self.open.iter().position(|(e, v)| *e == edge && !v.is_empty()) {
            let (_, buffers) = self.open.swap_remove(i);
            let to = self.rt.nodes[self.node.as_usize()].next_nodes[edge as usize];
            self.rt.pending.push_back(Frame {
                to,
                from: self.node,
                buffers,
                aux: Vec::new(),
            });
        }
    }

    fn flush_all(&mut self) {
        while let Some((edge, buffers)) = self.open.pop() {
            if buffers.is_empty() {
                self.rt.recycle_frame_vec(buffers);
                continue;
            }
            let to = self.rt.nodes[self.node.as_usize()].next_nodes[edge as usize];
            self.rt.pending.push_back(Frame {
                to,
                from: self.node,
                buffers,
                aux: Vec::new(),
            });
        }
    }

    /// Stamp `bi` with a node-local error code.
    pub fn set_error(&mut self, bi: BufferIndex, code: ErrorCode) {
        self.rt.pool.get_mut(bi).error = encode_error(self.node, code);
    }

    /// Bump the running node's counter for `code` by `n`.
    pub fn count_error(&mut self, code: ErrorCode, n: u64) {
        let errors = &mut self.rt.nodes[self.node.as_usize()].errors;
        if (code as usize) < errors.len() {
            errors[code as usize] += n;
        }
    }

    /// Attribute a buffer's error word to the node that produced it.
    /// Returns the producing node.
    pub fn attribute_error(&mut self, error_word: u32, n: u64) -> NodeIndex {
        let (node, code) = decode_error(error_word);
        if let Some(origin) = self.rt.nodes.get_mut(node.as_usize()) {
            if (code as usize) < origin.errors.len() {
                origin.errors[code as usize] += n;
            }
        }
        node
    }

    /// Capture a trace record for `bi` if the node is armed.
    pub fn trace_buffer(&mut self, bi: BufferIndex, payload: &[u8]) {
        let now = self.rt.now();
        let node = &mut self.rt.nodes[self.node.as_usize()];
        if node.trace_count == 0 {
            return;
        }
        node.trace_count -= 1;
        node.trace.push(now, payload);
        self.rt.pool.get_mut(bi).flags.insert(BufferFlags::IS_TRACED);
    }

    /// Signal a one-time event from inside a dispatch.
    pub fn signal_event(&mut self, event: EventId) {
        self.rt.signal_event(event);
    }

    /// Mark an input node's interrupt flag from inside a dispatch.
    pub fn set_interrupt_pending(&mut self, node: NodeIndex) {
        self.rt.set_interrupt_pending(node);
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod test {
    use super::*;
    use buffer::BufferConfig;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn runtime() -> Runtime {
        let pool = BufferPool::new(BufferConfig {
            min_free_list_buffers: 32,
            ..BufferConfig::default()
        });
        Runtime::new_with_manual_clock(pool)
    }

    /// Passes every buffer through to one edge, optionally recording what
    /// it saw.
    struct PassThrough {
        edge: u16,
        seen: Rc<RefCell<Vec<BufferIndex>>>,
    }

    impl NodeFunction for PassThrough {
        fn run(&mut self, ctx: &mut DispatchCtx<'_>, frame: &Frame) -> u32 {
            for &bi in &frame.buffers {
                self.seen.borrow_mut().push(bi);
                ctx.enqueue(self.edge, bi);
            }
            frame.n_vectors() as u32
        }
    }

    /// Terminal node that frees what it receives.
    struct Sink {
        seen: Rc<RefCell<Vec<BufferIndex>>>,
    }

    impl NodeFunction for Sink {
        fn run(&mut self, ctx: &mut DispatchCtx<'_>, frame: &Frame) -> u32 {
            for &bi in &frame.buffers {
                self.seen.borrow_mut().push(bi);
            }
            ctx.pool().free(&frame.buffers, true);
            frame.n_vectors() as u32
        }
    }

    fn seen() -> Rc<RefCell<Vec<BufferIndex>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    #[test]
    fn frames_flow_in_order_between_nodes() {
        let mut rt = runtime();
        let mid_seen = seen();
        let sink_seen = seen();
        let sink = rt
            .register_node(NodeDesc::internal("sink"), Box::new(Sink { seen: sink_seen.clone() }))
            .unwrap();
        let mid = rt
            .register_node(
                NodeDesc::internal("mid"),
                Box::new(PassThrough { edge: 0, seen: mid_seen.clone() }),
            )
            .unwrap();
        let edge = rt.add_next(mid, sink).unwrap();
        assert_eq!(edge, 0);
        // edges intern
        assert_eq!(rt.add_next(mid, sink).unwrap(), 0);

        let fl = rt.pool_mut().default_free_list().unwrap();
        let bufs = rt.pool_mut().alloc(fl, 5);
        rt.send_frame(mid, bufs.clone());
        assert!(rt.run_until_idle(10));
        assert_eq!(*mid_seen.borrow(), bufs);
        assert_eq!(*sink_seen.borrow(), bufs);
    }

    #[test]
    fn full_frames_hand_off_and_continue() {
        let mut rt = runtime();
        let sink_seen = seen();
        let sink = rt
            .register_node(NodeDesc::internal("sink"), Box::new(Sink { seen: sink_seen.clone() }))
            .unwrap();
        let mid = rt
            .register_node(
                NodeDesc::internal("mid"),
                Box::new(PassThrough { edge: 0, seen: seen() }),
            )
            .unwrap();
        rt.add_next(mid, sink).unwrap();
        let fl = rt.pool_mut().default_free_list().unwrap();
        let n = FRAME_SIZE + 10;
        let bufs = rt.pool_mut().alloc(fl, n as u32);
        assert_eq!(bufs.len(), n);
        rt.send_frame(mid, bufs);
        assert!(rt.run_until_idle(10));
        assert_eq!(sink_seen.borrow().len(), n);
        assert_eq!(rt.node(sink).calls, 2);
    }

    #[test]
    fn input_rate_shaping_skips_early_polls() {
        struct CountingInput {
            polls: Rc<RefCell<u32>>,
        }
        impl NodeFunction for CountingInput {
            fn run(&mut self, _ctx: &mut DispatchCtx<'_>, _frame: &Frame) -> u32 {
                *self.polls.borrow_mut() += 1;
                0
            }
        }
        let mut rt = runtime();
        let polls = Rc::new(RefCell::new(0));
        let input = rt
            .register_node(
                NodeDesc::input("gen"),
                Box::new(CountingInput { polls: polls.clone() }),
            )
            .unwrap();
        rt.set_polling_rate(input, 10.0); // at most every 100ms
        rt.run_iteration();
        assert_eq!(*polls.borrow(), 1);
        rt.advance_time(0.01);
        rt.run_iteration();
        assert_eq!(*polls.borrow(), 1, "poll within 1/rate must be skipped");
        rt.advance_time(0.1);
        rt.run_iteration();
        assert_eq!(*polls.borrow(), 2);
        // an interrupt overrides the rate limit
        rt.set_interrupt_pending(input);
        rt.run_iteration();
        assert_eq!(*polls.borrow(), 3);
    }

    #[test]
    fn deleted_node_releases_frames() {
        let mut rt = runtime();
        let sink = rt
            .register_node(NodeDesc::internal("sink"), Box::new(Sink { seen: seen() }))
            .unwrap();
        rt.retire_node(sink);
        let fl = rt.pool_mut().default_free_list().unwrap();
        let bufs = rt.pool_mut().alloc(fl, 3);
        let free_before = rt.pool().free_list(fl).unwrap().n_free();
        rt.send_frame(sink, bufs);
        rt.run_until_idle(10);
        assert_eq!(rt.pool().free_list(fl).unwrap().n_free(), free_before + 3);
        assert!(rt.node_by_name("sink").is_none());
    }

    #[test]
    fn process_suspend_for_resumes_after_deadline() {
        struct Ticker {
            ticks: Rc<RefCell<u32>>,
        }
        impl Process for Ticker {
            fn resume(&mut self, _ctx: &mut DispatchCtx<'_>, _reason: Resume) -> Yield {
                *self.ticks.borrow_mut() += 1;
                if *self.ticks.borrow() >= 3 {
                    Yield::Complete
                } else {
                    Yield::SuspendFor(1.0)
                }
            }
        }
        let mut rt = runtime();
        let ticks = Rc::new(RefCell::new(0));
        let p = rt
            .register_process(NodeDesc::process("ticker"), Box::new(Ticker { ticks: ticks.clone() }))
            .unwrap();
        rt.run_iteration();
        assert_eq!(*ticks.borrow(), 1);
        rt.run_iteration();
        assert_eq!(*ticks.borrow(), 1, "suspended process must not run early");
        rt.advance_time(1.5);
        rt.run_iteration();
        assert_eq!(*ticks.borrow(), 2);
        rt.advance_time(1.5);
        rt.run_iteration();
        assert_eq!(*ticks.borrow(), 3);
        assert_eq!(rt.node(p).suspends, 2);
        // completed: never resumed again
        rt.advance_time(10.0);
        rt.run_iteration();
        assert_eq!(*ticks.borrow(), 3);
    }

    #[test]
    fn process_wait_for_event() {
        struct Waiter {
            woke: Rc<RefCell<bool>>,
        }
        impl Process for Waiter {
            fn resume(&mut self, _ctx: &mut DispatchCtx<'_>, reason: Resume) -> Yield {
                match reason {
                    Resume::Start => Yield::WaitForEvent(EventId(7)),
                    _ => {
                        *self.woke.borrow_mut() = true;
                        Yield::Complete
                    }
                }
            }
        }
        let mut rt = runtime();
        let woke = Rc::new(RefCell::new(false));
        rt.register_process(NodeDesc::process("waiter"), Box::new(Waiter { woke: woke.clone() }))
            .unwrap();
        rt.run_iteration();
        rt.run_iteration();
        assert!(!*woke.borrow());
        rt.signal_event(EventId(7));
        rt.run_iteration();
        assert!(*woke.borrow());
    }

    #[test]
    fn overrun_return_is_fatal() {
        struct Liar;
        impl NodeFunction for Liar {
            fn run(&mut self, ctx: &mut DispatchCtx<'_>, frame: &Frame) -> u32 {
                ctx.pool().free(&frame.buffers, true);
                frame.n_vectors() as u32 + 100
            }
        }
        let mut rt = runtime();
        let liar = rt
            .register_node(NodeDesc::internal("liar"), Box::new(Liar))
            .unwrap();
        let fl = rt.pool_mut().default_free_list().unwrap();
        let bufs = rt.pool_mut().alloc(fl, 2);
        rt.send_frame(liar, bufs);
        rt.run_iteration();
        assert!(rt.halted().is_some());
        assert_eq!(rt.run_iteration(), 0);
    }

    #[test]
    fn error_attribution_reaches_the_producing_node() {
        let mut rt = runtime();
        let producer = rt
            .register_node(
                NodeDesc::internal("producer").with_errors(&["none", "bad-thing"]),
                Box::new(Sink { seen: seen() }),
            )
            .unwrap();
        // encode as the producer would, attribute from another node
        struct Collector;
        impl NodeFunction for Collector {
            fn run(&mut self, ctx: &mut DispatchCtx<'_>, frame: &Frame) -> u32 {
                for &bi in &frame.buffers {
                    let e = ctx.pool().get(bi).error;
                    ctx.attribute_error(e, 1);
                }
                ctx.pool().free(&frame.buffers, true);
                frame.n_vectors() as u32
            }
        }
        let collector = rt
            .register_node(NodeDesc::internal("collector"), Box::new(Collector))
            .unwrap();
        let fl = rt.pool_mut().default_free_list().unwrap();
        let bi = rt.pool_mut().alloc_one(fl).unwrap();
        rt.pool_mut().get_mut(bi).error = encode_error(producer, 1);
        rt.send_frame(collector, vec![bi]);
        rt.run_until_idle(10);
        assert_eq!(rt.node(producer).errors[1], 1);
    }

    #[test]
    fn validate_enqueue_flushes_on_divergence() {
        struct Splitter {
            edges: (u16, u16),
        }
        impl NodeFunction for Splitter {
            fn run(&mut self, ctx: &mut DispatchCtx<'_>, frame: &Frame) -> u32 {
                for (i, &bi) in frame.buffers.iter().enumerate() {
                    let edge = if i % 2 == 0 { self.edges.0 } else { self.edges.1 };
                    ctx.validate_enqueue_x1(edge, bi);
                }
                frame.n_vectors() as u32
            }
        }
        let mut rt = runtime();
        let a_seen = seen();
        let b_seen = seen();
        let a = rt
            .register_node(NodeDesc::internal("a"), Box::new(Sink { seen: a_seen.clone() }))
            .unwrap();
        let b = rt
            .register_node(NodeDesc::internal("b"), Box::new(Sink { seen: b_seen.clone() }))
            .unwrap();
        let split = rt
            .register_node(
                NodeDesc::internal("split"),
                Box::new(Splitter { edges: (0, 1) }),
            )
            .unwrap();
        let ea = rt.add_next(split, a).unwrap();
        let eb = rt.add_next(split, b).unwrap();
        assert_eq!((ea, eb), (0, 1));
        let fl = rt.pool_mut().default_free_list().unwrap();
        let bufs = rt.pool_mut().alloc(fl, 6);
        rt.send_frame(split, bufs);
        rt.run_until_idle(20);
        assert_eq!(a_seen.borrow().len(), 3);
        assert_eq!(b_seen.borrow().len(), 3);
    }

    #[test]
    fn trace_arming_captures_records() {
        let mut rt = runtime();
        struct Tracer;
        impl NodeFunction for Tracer {
            fn run(&mut self, ctx: &mut DispatchCtx<'_>, frame: &Frame) -> u32 {
                for &bi in &frame.buffers {
                    ctx.trace_buffer(bi, &[0x11, 0x22]);
                }
                ctx.pool().free(&frame.buffers, true);
                frame.n_vectors() as u32
            }
        }
        let t = rt
            .register_node(NodeDesc::internal("tracer"), Box::new(Tracer))
            .unwrap();
        rt.node_mut(t).trace_count = 2;
        let fl = rt.pool_mut().default_free_list().unwrap();
        let bufs = rt.pool_mut().alloc(fl, 5);
        rt.send_frame(t, bufs);
        rt.run_until_idle(10);
        assert_eq!(rt.node(t).trace.len(), 2, "only armed count is captured");
        assert_eq!(rt.node(t).trace_count, 0);
    }
}
