//! Lazy frame queue
//!
//! The ring buffer on every graph edge. Key properties:
//! - No per-frame allocation: every slot owns a `Frame` sized for the worst
//!   case of the queue's media type, reused in place.
//! - One writer, N readers, each reader with an independent front cursor.
//! - Zero-copy lending: the rear slot is lent to the producer between
//!   `get_rear` and `commit`, a front slot to each consumer between
//!   `get_front` and `release`, enforced with RAII guards over a per-slot
//!   `RwLock`.
//! - Nothing ever blocks on a queue: acquisition uses `try_` locks under one
//!   short cursor critical section, and a contended slot reads as full/empty.
//!
//! Cursors are monotonic counters; the slot of frame `n` is `n % capacity`.
//! A slot is writable once every reader's front has advanced past it, and
//! readable by reader `r` while `r.front < rear`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::frame::{CodecTag, Frame, MediaKind, PixelFormat, SampleFormat};
use crate::time::EngineClock;

/// Default slot counts per media type. Always overridable per queue.
pub const DEFAULT_VIDEO_SLOTS: usize = 8;
pub const DEFAULT_AUDIO_SLOTS: usize = 16;

/// What the writer does when every slot is occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DropPolicy {
    /// `get_rear` returns `None` until a reader frees a slot.
    #[default]
    Skip,
    /// Steal the oldest committed slot, charging a lost block to every
    /// reader that had not consumed it. A slot currently lent to a reader
    /// is never stolen; the writer skips instead.
    OverwriteOldest,
}

/// Construction-time description of a queue: slot count, drop policy and a
/// prototype frame cloned into each slot.
#[derive(Debug, Clone)]
pub struct QueueSpec {
    pub capacity: usize,
    pub policy: DropPolicy,
    pub prototype: Frame,
}

impl QueueSpec {
    pub fn video(codec: CodecTag, width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        Self {
            capacity: DEFAULT_VIDEO_SLOTS,
            policy: DropPolicy::default(),
            prototype: Frame::video(codec, width, height, pixel_format),
        }
    }

    pub fn audio(codec: CodecTag, channels: u32, sample_rate: u32, sample_format: SampleFormat) -> Self {
        Self {
            capacity: DEFAULT_AUDIO_SLOTS,
            policy: DropPolicy::default(),
            prototype: Frame::audio(codec, channels, sample_rate, sample_format),
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn with_policy(mut self, policy: DropPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[derive(Debug)]
struct ReaderCursor {
    front: u64,
    lost_blocks: u64,
    delay_avg_us: u64,
    delay_samples: u64,
}

#[derive(Debug, Default)]
struct QueueState {
    rear: u64,
    readers: HashMap<u32, ReaderCursor>,
    next_reader: u32,
}

impl QueueState {
    fn min_front(&self) -> Option<u64> {
        self.readers.values().map(|c| c.front).min()
    }
}

/// Bounded single-writer multi-reader frame ring.
pub struct FrameQueue {
    kind: MediaKind,
    codec: CodecTag,
    capacity: usize,
    policy: DropPolicy,
    slots: Vec<RwLock<Frame>>,
    state: Mutex<QueueState>,
    clock: Arc<EngineClock>,
}

impl FrameQueue {
    pub fn new(spec: QueueSpec, clock: Arc<EngineClock>) -> Arc<Self> {
        let capacity = spec.capacity.max(1);
        Arc::new(Self {
            kind: spec.prototype.kind(),
            codec: spec.prototype.codec(),
            capacity,
            policy: spec.policy,
            slots: (0..capacity).map(|_| RwLock::new(spec.prototype.clone())).collect(),
            state: Mutex::new(QueueState::default()),
            clock,
        })
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn codec(&self) -> CodecTag {
        self.codec
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> DropPolicy {
        self.policy
    }

    // ============ Writer side ============

    /// Lend the next writable slot to the producer, or `None` if the queue
    /// is full under the current policy, has no readers, or the candidate
    /// slot is still lent out.
    pub fn get_rear(&self) -> Option<RearSlot<'_>> {
        let mut st = self.state.lock();
        let min_front = st.min_front()?;
        let idx = (st.rear % self.capacity as u64) as usize;

        if st.rear - min_front >= self.capacity as u64 {
            match self.policy {
                DropPolicy::Skip => return None,
                DropPolicy::OverwriteOldest => {
                    // The oldest committed frame lives in the same slot the
                    // rear is about to claim. Skip if a reader holds it.
                    let guard = self.slots[idx].try_write()?;
                    for cursor in st.readers.values_mut() {
                        if cursor.front == min_front {
                            cursor.front += 1;
                            cursor.lost_blocks += 1;
                        }
                    }
                    log::trace!("queue {:?}: overwrote frame {}", self.codec, min_front);
                    return Some(RearSlot { queue: self, guard: Some(guard) });
                }
            }
        }

        let guard = self.slots[idx].try_write()?;
        Some(RearSlot { queue: self, guard: Some(guard) })
    }

    fn stamp_sequence(&self, frame: &mut Frame) {
        let st = self.state.lock();
        frame.set_sequence(st.rear);
    }

    fn publish(&self) {
        let mut st = self.state.lock();
        st.rear += 1;
    }

    // ============ Reader side ============

    /// Register a new reader. Its front starts at the current rear, so it
    /// only observes frames committed after registration.
    pub fn add_reader(&self) -> u32 {
        let mut st = self.state.lock();
        let key = st.next_reader;
        st.next_reader += 1;
        let front = st.rear;
        st.readers.insert(
            key,
            ReaderCursor { front, lost_blocks: 0, delay_avg_us: 0, delay_samples: 0 },
        );
        key
    }

    /// Register a reader sharing `source`'s position, so both observe the
    /// same remaining frames and advance independently.
    pub fn share_reader(&self, source: u32) -> Option<u32> {
        let mut st = self.state.lock();
        let front = st.readers.get(&source)?.front;
        let key = st.next_reader;
        st.next_reader += 1;
        st.readers.insert(
            key,
            ReaderCursor { front, lost_blocks: 0, delay_avg_us: 0, delay_samples: 0 },
        );
        Some(key)
    }

    /// Drop a reader; its cursor no longer holds slots back.
    pub fn remove_reader(&self, reader: u32) {
        self.state.lock().readers.remove(&reader);
    }

    pub fn reader_count(&self) -> usize {
        self.state.lock().readers.len()
    }

    /// Lend the front slot of `reader` to the consumer, or `None` if no
    /// committed frame is pending for it.
    pub fn get_front(&self, reader: u32) -> Option<FrontSlot<'_>> {
        let st = self.state.lock();
        let cursor = st.readers.get(&reader)?;
        if cursor.front >= st.rear {
            return None;
        }
        let idx = (cursor.front % self.capacity as u64) as usize;
        let guard = self.slots[idx].try_read()?;
        Some(FrontSlot { queue: self, reader, guard: Some(guard) })
    }

    /// Frames committed but not yet consumed by `reader`.
    pub fn pending(&self, reader: u32) -> u64 {
        let st = self.state.lock();
        st.readers.get(&reader).map_or(0, |c| st.rear.saturating_sub(c.front))
    }

    pub fn lost_blocks(&self, reader: u32) -> u64 {
        self.state.lock().readers.get(&reader).map_or(0, |c| c.lost_blocks)
    }

    /// Cumulative average of (consume wallclock − presentation time) in µs.
    pub fn avg_delay_us(&self, reader: u32) -> u64 {
        self.state.lock().readers.get(&reader).map_or(0, |c| c.delay_avg_us)
    }

    fn consume(&self, reader: u32, delay_us: u64) {
        let mut st = self.state.lock();
        if let Some(cursor) = st.readers.get_mut(&reader) {
            cursor.front += 1;
            cursor.delay_samples += 1;
            let n = cursor.delay_samples as i64;
            let avg = cursor.delay_avg_us as i64;
            cursor.delay_avg_us = (avg + (delay_us as i64 - avg) / n).max(0) as u64;
        }
    }
}

// ============ Lending guards ============

/// Exclusive lease on the rear slot. Write the payload through `DerefMut`,
/// then `commit` to publish atomically to every reader; dropping without
/// committing abandons the cycle and frees the slot.
pub struct RearSlot<'a> {
    queue: &'a FrameQueue,
    guard: Option<RwLockWriteGuard<'a, Frame>>,
}

impl<'a> RearSlot<'a> {
    /// Publish the frame. The queue stamps the sequence number from its
    /// monotonic commit counter just before the frame becomes visible.
    pub fn commit(mut self) {
        if let Some(mut guard) = self.guard.take() {
            self.queue.stamp_sequence(&mut guard);
            drop(guard);
            self.queue.publish();
        }
    }

    /// Stamp the sequence and downgrade to a shared read lease without
    /// publishing. Used by master filters to lend the produced frame to
    /// their slaves before the commit.
    pub fn share(mut self) -> SharedRearSlot<'a> {
        let mut guard = self.guard.take().expect("rear slot already consumed");
        self.queue.stamp_sequence(&mut guard);
        SharedRearSlot {
            queue: self.queue,
            guard: Some(RwLockWriteGuard::downgrade(guard)),
        }
    }
}

impl std::ops::Deref for RearSlot<'_> {
    type Target = Frame;

    fn deref(&self) -> &Frame {
        self.guard.as_ref().expect("rear slot already consumed")
    }
}

impl std::ops::DerefMut for RearSlot<'_> {
    fn deref_mut(&mut self) -> &mut Frame {
        self.guard.as_mut().expect("rear slot already consumed")
    }
}

/// Read-only lease on a produced-but-unpublished rear slot. While it lives,
/// any number of borrows of the frame may be handed out; `commit` reclaims
/// the slot and publishes.
pub struct SharedRearSlot<'a> {
    queue: &'a FrameQueue,
    guard: Option<RwLockReadGuard<'a, Frame>>,
}

impl SharedRearSlot<'_> {
    pub fn frame(&self) -> &Frame {
        self.guard.as_ref().expect("shared rear slot already consumed")
    }

    /// Publish the frame to every reader of the queue.
    pub fn commit(mut self) {
        if let Some(guard) = self.guard.take() {
            drop(guard);
            self.queue.publish();
        }
    }
}

impl std::ops::Deref for SharedRearSlot<'_> {
    type Target = Frame;

    fn deref(&self) -> &Frame {
        self.frame()
    }
}

/// Shared lease on a reader's front slot. Dropping it peeks (the cursor
/// stays); `release` consumes the frame and folds the observed delay into
/// the reader's statistics.
pub struct FrontSlot<'a> {
    queue: &'a FrameQueue,
    reader: u32,
    guard: Option<RwLockReadGuard<'a, Frame>>,
}

impl FrontSlot<'_> {
    pub fn release(mut self) {
        if let Some(guard) = self.guard.take() {
            let delay = self.queue.clock.now_us().saturating_sub(guard.presentation_us());
            drop(guard);
            self.queue.consume(self.reader, delay);
        }
    }
}

impl std::ops::Deref for FrontSlot<'_> {
    type Target = Frame;

    fn deref(&self) -> &Frame {
        self.guard.as_ref().expect("front slot already consumed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_queue(capacity: usize, policy: DropPolicy) -> Arc<FrameQueue> {
        let spec = QueueSpec::audio(CodecTag::Pcm, 2, 8_000, SampleFormat::S16)
            .with_capacity(capacity)
            .with_policy(policy);
        FrameQueue::new(spec, Arc::new(EngineClock::new()))
    }

    #[test]
    fn test_empty_queue_has_no_front() {
        let q = test_queue(4, DropPolicy::Skip);
        let r = q.add_reader();
        assert!(q.get_front(r).is_none());
    }

    #[test]
    fn test_no_readers_no_rear() {
        let q = test_queue(4, DropPolicy::Skip);
        assert!(q.get_rear().is_none());
    }

    #[test]
    fn test_commit_then_read() {
        let q = test_queue(4, DropPolicy::Skip);
        let r = q.add_reader();

        let mut rear = q.get_rear().unwrap();
        rear.set_presentation_us(100);
        rear.set_len(32);
        rear.commit();

        let front = q.get_front(r).unwrap();
        assert_eq!(front.presentation_us(), 100);
        assert_eq!(front.sequence(), 0);
        front.release();
        assert!(q.get_front(r).is_none());
    }

    #[test]
    fn test_skip_policy_rejects_when_full() {
        let q = test_queue(2, DropPolicy::Skip);
        let _r = q.add_reader();
        for _ in 0..2 {
            q.get_rear().unwrap().commit();
        }
        assert!(q.get_rear().is_none());
    }

    #[test]
    fn test_overwrite_policy_charges_lost_blocks() {
        let q = test_queue(2, DropPolicy::OverwriteOldest);
        let r = q.add_reader();
        for i in 0..3 {
            let mut rear = q.get_rear().unwrap();
            rear.set_presentation_us(i * 10);
            rear.commit();
        }
        assert_eq!(q.lost_blocks(r), 1);
        // Oldest surviving frame is the second one committed.
        let front = q.get_front(r).unwrap();
        assert_eq!(front.presentation_us(), 10);
    }

    #[test]
    fn test_overwrite_never_steals_lent_slot() {
        let q = test_queue(2, DropPolicy::OverwriteOldest);
        let r = q.add_reader();
        for _ in 0..2 {
            q.get_rear().unwrap().commit();
        }
        let held = q.get_front(r).unwrap();
        // Slot 0 is lent to the reader; the writer must skip, not steal.
        assert!(q.get_rear().is_none());
        drop(held);
        assert!(q.get_rear().is_some());
    }

    #[test]
    fn test_sequence_strictly_increasing() {
        let q = test_queue(4, DropPolicy::Skip);
        let r = q.add_reader();
        let mut last = None;
        for _ in 0..12 {
            q.get_rear().unwrap().commit();
            let front = q.get_front(r).unwrap();
            let seq = front.sequence();
            if let Some(prev) = last {
                assert!(seq > prev);
            }
            last = Some(seq);
            front.release();
        }
    }

    #[test]
    fn test_shared_reader_starts_at_source_front() {
        let q = test_queue(8, DropPolicy::Skip);
        let a = q.add_reader();
        for _ in 0..3 {
            q.get_rear().unwrap().commit();
        }
        q.get_front(a).unwrap().release();

        let b = q.share_reader(a).unwrap();
        assert_eq!(q.pending(b), q.pending(a));

        // Independent cursors from here on.
        q.get_front(a).unwrap().release();
        assert_eq!(q.pending(a) + 1, q.pending(b));
    }

    #[test]
    fn test_slowest_reader_holds_slots() {
        let q = test_queue(2, DropPolicy::Skip);
        let fast = q.add_reader();
        let slow = q.add_reader();
        for _ in 0..2 {
            q.get_rear().unwrap().commit();
        }
        q.get_front(fast).unwrap().release();
        q.get_front(fast).unwrap().release();
        // Fast reader is drained but slow still pins the ring.
        assert!(q.get_rear().is_none());
        q.get_front(slow).unwrap().release();
        assert!(q.get_rear().is_some());
    }

    #[test]
    fn test_share_then_commit_publishes() {
        let q = test_queue(4, DropPolicy::Skip);
        let r = q.add_reader();
        let mut rear = q.get_rear().unwrap();
        rear.set_presentation_us(77);
        let shared = rear.share();
        // Not visible to readers until the commit.
        assert!(q.get_front(r).is_none());
        assert_eq!(shared.presentation_us(), 77);
        shared.commit();
        assert_eq!(q.get_front(r).unwrap().presentation_us(), 77);
    }

    #[test]
    fn test_avg_delay_non_negative_and_lost_monotonic() {
        let q = test_queue(2, DropPolicy::OverwriteOldest);
        let r = q.add_reader();
        let mut last_lost = 0;
        for i in 0..20 {
            if let Some(mut rear) = q.get_rear() {
                rear.set_presentation_us(i * 1_000);
                rear.commit();
            }
            if i % 3 == 0 {
                if let Some(front) = q.get_front(r) {
                    front.release();
                }
            }
            let lost = q.lost_blocks(r);
            assert!(lost >= last_lost);
            last_lost = lost;
        }
        assert!(q.avg_delay_us(r) < u64::MAX / 2);
    }
}
