//! Reader / Writer endpoints
//!
//! Endpoints bind a filter port to a queue. A `Writer` produces into the
//! queue it backs; a `Reader` owns one consumer cursor on its queue and
//! unregisters it on drop, so a disconnected reader never pins slots.

use std::sync::Arc;

use crate::error::{CoreError, CoreResult};
use crate::frame::MediaKind;
use crate::queue::{FrameQueue, FrontSlot, RearSlot};

/// One downstream endpoint recorded on a writer-side connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderEndpoint {
    pub filter_id: i32,
    pub reader_id: i32,
}

/// Writer-side connection record: which writer feeds which reader
/// endpoints. Consulted when a second path wants to share the edge.
#[derive(Debug, Clone)]
pub struct ConnectionData {
    pub writer_filter_id: i32,
    pub writer_id: i32,
    pub readers: Vec<ReaderEndpoint>,
}

/// Producing endpoint of a queue.
#[derive(Default)]
pub struct Writer {
    queue: Option<Arc<FrameQueue>>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, queue: Arc<FrameQueue>) {
        self.queue = Some(queue);
    }

    pub fn unbind(&mut self) {
        self.queue = None;
    }

    pub fn is_connected(&self) -> bool {
        self.queue.is_some()
    }

    pub fn queue(&self) -> Option<&Arc<FrameQueue>> {
        self.queue.as_ref()
    }

    /// Lease the rear slot of the backing queue; `None` while disconnected
    /// or while the queue is full under its drop policy.
    pub fn get_frame(&self) -> Option<RearSlot<'_>> {
        self.queue.as_ref()?.get_rear()
    }
}

/// Consuming endpoint of a queue.
#[derive(Default)]
pub struct Reader {
    queue: Option<Arc<FrameQueue>>,
    key: u32,
}

impl Reader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach to `queue` with a fresh cursor at the current rear.
    pub fn bind(&mut self, queue: Arc<FrameQueue>) {
        self.unbind();
        self.key = queue.add_reader();
        self.queue = Some(queue);
    }

    /// Attach to `queue` sharing `source`'s cursor position.
    pub fn bind_shared(&mut self, queue: Arc<FrameQueue>, source: &Reader) -> CoreResult<()> {
        let key = queue
            .share_reader(source.key)
            .ok_or(CoreError::UnknownReader(source.key))?;
        self.unbind();
        self.key = key;
        self.queue = Some(queue);
        Ok(())
    }

    pub fn unbind(&mut self) {
        if let Some(queue) = self.queue.take() {
            queue.remove_reader(self.key);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.queue.is_some()
    }

    pub fn queue(&self) -> Option<&Arc<FrameQueue>> {
        self.queue.as_ref()
    }

    pub fn kind(&self) -> Option<MediaKind> {
        self.queue.as_ref().map(|q| q.kind())
    }

    /// Register a second reader on this reader's queue, starting at this
    /// reader's current position. Both cursors advance independently.
    pub fn split_shared(&self) -> Option<Reader> {
        let queue = self.queue.clone()?;
        let key = queue.share_reader(self.key)?;
        Some(Reader { queue: Some(queue), key })
    }

    /// Lease this reader's front slot; `None` while empty or disconnected.
    pub fn get_frame(&self) -> Option<FrontSlot<'_>> {
        let queue = self.queue.as_ref()?;
        queue.get_front(self.key)
    }

    pub fn pending(&self) -> u64 {
        self.queue.as_ref().map_or(0, |q| q.pending(self.key))
    }

    pub fn lost_blocks(&self) -> u64 {
        self.queue.as_ref().map_or(0, |q| q.lost_blocks(self.key))
    }

    pub fn avg_delay_us(&self) -> u64 {
        self.queue.as_ref().map_or(0, |q| q.avg_delay_us(self.key))
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        self.unbind();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{CodecTag, SampleFormat};
    use crate::queue::QueueSpec;
    use crate::time::EngineClock;

    fn queue() -> Arc<FrameQueue> {
        FrameQueue::new(
            QueueSpec::audio(CodecTag::Pcm, 2, 8_000, SampleFormat::S16).with_capacity(4),
            Arc::new(EngineClock::new()),
        )
    }

    #[test]
    fn test_disconnected_endpoints_yield_nothing() {
        let w = Writer::new();
        let r = Reader::new();
        assert!(w.get_frame().is_none());
        assert!(r.get_frame().is_none());
        assert!(!w.is_connected());
        assert!(!r.is_connected());
    }

    #[test]
    fn test_writer_reader_round_trip() {
        let q = queue();
        let mut w = Writer::new();
        let mut r = Reader::new();
        r.bind(q.clone());
        w.bind(q);

        let mut slot = w.get_frame().unwrap();
        slot.set_presentation_us(42);
        slot.commit();

        let front = r.get_frame().unwrap();
        assert_eq!(front.presentation_us(), 42);
        front.release();
        assert_eq!(r.pending(), 0);
    }

    #[test]
    fn test_reader_drop_releases_cursor() {
        let q = queue();
        let mut w = Writer::new();
        w.bind(q.clone());
        {
            let mut r = Reader::new();
            r.bind(q.clone());
            assert_eq!(q.reader_count(), 1);
        }
        assert_eq!(q.reader_count(), 0);
        // No readers left: the writer has nobody to produce for.
        assert!(w.get_frame().is_none());
    }

    #[test]
    fn test_bind_shared_tracks_source_position() {
        let q = queue();
        let mut w = Writer::new();
        w.bind(q.clone());
        let mut a = Reader::new();
        a.bind(q.clone());

        for _ in 0..2 {
            w.get_frame().unwrap().commit();
        }
        a.get_frame().unwrap().release();

        let mut b = Reader::new();
        b.bind_shared(q.clone(), &a).unwrap();
        assert_eq!(b.pending(), a.pending());
    }
}
