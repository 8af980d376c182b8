//! Control-plane events
//!
//! Events carry configuration mutations from the control plane into the
//! data plane. Manager-targeted events run synchronously inside the
//! pipeline manager; filter-targeted events are queued on the target's
//! inbox and drained at the top of that filter's next invocation, so a
//! drained event is always visible to the `do_process_frame` of the same
//! cycle and never to an earlier one.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use parking_lot::Mutex;
use serde_json::Value;

/// Most events an inbox will hold; pushes beyond this are dropped.
pub const INBOX_CAPACITY: usize = 64;
/// Most events drained in a single filter invocation, to keep work units
/// short.
pub const MAX_EVENTS_PER_CYCLE: usize = 8;

/// A control-plane message addressed to one filter.
#[derive(Debug, Clone)]
pub struct Event {
    pub action: String,
    pub params: Value,
    /// Engine-clock time (µs) at which the event becomes deliverable.
    pub activation_us: u64,
}

impl Event {
    pub fn new(action: impl Into<String>, params: Value) -> Self {
        Self { action: action.into(), params, activation_us: 0 }
    }

    pub fn at(mut self, activation_us: u64) -> Self {
        self.activation_us = activation_us;
        self
    }
}

#[derive(Debug)]
struct QueuedEvent {
    activation_us: u64,
    seq: u64,
    event: Event,
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.activation_us == other.activation_us && self.seq == other.seq
    }
}

impl Eq for QueuedEvent {}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.activation_us, self.seq).cmp(&(other.activation_us, other.seq))
    }
}

/// Bounded multi-producer inbox, drained by the owning filter only.
/// Delivery order is activation time, ties broken by arrival order.
#[derive(Debug, Default)]
pub struct EventInbox {
    queue: Mutex<InboxState>,
}

#[derive(Debug, Default)]
struct InboxState {
    heap: BinaryHeap<Reverse<QueuedEvent>>,
    next_seq: u64,
}

impl EventInbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue without blocking. Returns false (and drops the event) when
    /// the inbox is at capacity.
    pub fn push(&self, event: Event) -> bool {
        let mut state = self.queue.lock();
        if state.heap.len() >= INBOX_CAPACITY {
            log::warn!("event inbox full, dropping '{}'", event.action);
            return false;
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(Reverse(QueuedEvent { activation_us: event.activation_us, seq, event }));
        true
    }

    /// Pop up to `MAX_EVENTS_PER_CYCLE` events whose activation time has
    /// passed.
    pub fn drain_due(&self, now_us: u64) -> Vec<Event> {
        let mut state = self.queue.lock();
        let mut due = Vec::new();
        while due.len() < MAX_EVENTS_PER_CYCLE {
            match state.heap.peek() {
                Some(Reverse(queued)) if queued.activation_us <= now_us => {
                    let Reverse(queued) = state.heap.pop().expect("peeked entry vanished");
                    due.push(queued.event);
                }
                _ => break,
            }
        }
        due
    }

    pub fn len(&self) -> usize {
        self.queue.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
