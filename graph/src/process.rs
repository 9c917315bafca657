// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Process nodes: cooperative tasks with exactly two suspension points.

use crate::runtime::DispatchCtx;

/// Identifies a one-time event a process can wait on and any caller can
/// signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(pub u32);

/// Why a process is being resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    /// First entry after registration or re-enable.
    Start,
    /// A `SuspendFor` deadline passed.
    TimerFired,
    /// The awaited event was signaled.
    Event(EventId),
}

/// What a process does next.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Yield {
    /// Park until at least `seconds` from now.
    SuspendFor(f64),
    /// Park until the event is signaled.
    WaitForEvent(EventId),
    /// The task is finished; it will not be resumed again.
    Complete,
}

/// A cooperative task node.
///
/// The runtime calls [`Process::resume`] with the reason the task woke; the
/// task runs until it returns its next [`Yield`]. State that must survive a
/// suspension lives in the implementing type.
pub trait Process {
    /// Run until the next suspension point.
    fn resume(&mut self, ctx: &mut DispatchCtx<'_>, reason: Resume) -> Yield;
}

/// Wake-heap key ordering earliest deadline first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct WakeTime(pub f64);

impl Eq for WakeTime {}

impl Ord for WakeTime {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // min-heap through a max-priority queue
        other.0.total_cmp(&self.0)
    }
}

impl PartialOrd for WakeTime {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod test {
    use super::WakeTime;

    #[test]
    fn wake_time_orders_earliest_first() {
        // max-priority-queue semantics: the "greatest" key pops first,
        // so the earlier deadline must compare greater.
        assert!(WakeTime(1.0) > WakeTime(2.0));
        assert!(WakeTime(0.0) > WakeTime(f64::INFINITY));
        assert_eq!(WakeTime(3.0), WakeTime(3.0));
    }
}
