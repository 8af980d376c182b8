//! Filter capability surface
//!
//! A filter is a vertex in the dataflow graph. Instead of an inheritance
//! tree, the engine splits the concept in three:
//! - the `Filter` trait (the `process` / event / state triple the scheduler
//!   and manager consume),
//! - `FilterIo`, the reader/writer tables and connection bookkeeping every
//!   shape shares,
//! - the shape wrappers in `shapes` that reduce `process()` to a payload
//!   hook.
//!
//! Event delivery goes through an `EventInbox` shared between the filter
//! and its `FilterHandle`, so the control plane can push events without
//! taking the filter lock a worker may be holding.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use fc_core::{
    ConnectionData, DEFAULT_FRAME_TIME_US, EngineClock, FrameQueue, QueueSpec, Reader,
    ReaderEndpoint, Writer,
};

use crate::error::{EngineError, EngineResult};
use crate::event::{Event, EventInbox};

/// Default port id used for the implicit edges between mid-path filters.
pub const DEFAULT_ID: i32 = 1;

/// Retry delay returned to the scheduler when inputs or output slots are
/// not ready: a twentieth of the nominal frame interval.
pub const RETRY_HINT_US: u64 = DEFAULT_FRAME_TIME_US / 20;

/// What a filter is, using the control-plane wire spellings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterKind {
    Receiver,
    Demuxer,
    VideoDecoder,
    VideoEncoder,
    VideoResampler,
    VideoMixer,
    VideoSplitter,
    AudioDecoder,
    AudioEncoder,
    AudioMixer,
    Segmenter,
    Transmitter,
}

/// Scheduling discipline of a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterRole {
    /// Drives its own cadence; woken on the schedule the filter returns.
    Master,
    /// Paced by external arrival.
    Network,
    /// Runs whenever inputs are ready.
    BestEffort,
    /// Driven by a paired master; never picked by the scheduler.
    Slave,
}

/// Result of one filter work unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Work done; run again after `next_hint_us` microseconds.
    Continue { next_hint_us: u64 },
    /// Inputs or output slots not ready; retry shortly.
    NotReady,
    /// Terminal failure; the scheduler detaches the filter.
    Failed,
}

/// Execution surface every filter exposes to the scheduler and manager.
pub trait Filter: Send {
    fn io(&self) -> &FilterIo;
    fn io_mut(&mut self) -> &mut FilterIo;

    /// One work unit: drain due events, run the payload, return a hint.
    fn process(&mut self) -> ProcessOutcome;

    /// Queue blueprint for one of this filter's outputs; `None` if the
    /// writer id cannot produce.
    fn output_spec(&self, writer_id: i32) -> Option<QueueSpec>;

    /// Filter-specific counters merged into the state report.
    fn append_state(&self, _state: &mut Map<String, Value>) {}

    /// Access to the shared-input surface if this filter can run as a
    /// slave.
    fn as_shared_slave(&mut self) -> Option<&mut dyn SharedInputSlave> {
        None
    }

    /// Accept a slave; only master-capable filters override this.
    fn register_slave(&mut self, slave: FilterHandle) -> EngineResult<()> {
        let _ = slave;
        Err(EngineError::NotAMaster(self.io().id()))
    }
}

/// A filter that can consume a frame lent by its master, bypassing its own
/// readers for that edge.
pub trait SharedInputSlave {
    fn process_shared(&mut self, frame: &fc_core::Frame) -> ProcessOutcome;
}

// ============ FilterIo ============

/// Reader/writer tables, connection records and identity shared by every
/// filter shape.
pub struct FilterIo {
    id: i32,
    kind: FilterKind,
    role: FilterRole,
    clock: Arc<EngineClock>,
    inbox: Arc<EventInbox>,
    writers: HashMap<i32, Writer>,
    readers: HashMap<i32, Reader>,
    connections: HashMap<i32, ConnectionData>,
    next_writer_id: i32,
    next_reader_id: i32,
    dropped_frames: u64,
}

impl FilterIo {
    pub fn new(kind: FilterKind, role: FilterRole) -> Self {
        Self {
            id: -1,
            kind,
            role,
            clock: Arc::new(EngineClock::new()),
            inbox: Arc::new(EventInbox::new()),
            writers: HashMap::new(),
            readers: HashMap::new(),
            connections: HashMap::new(),
            next_writer_id: DEFAULT_ID + 1,
            next_reader_id: DEFAULT_ID + 1,
            dropped_frames: 0,
        }
    }

    /// Adopt the engine identity: called once when the manager takes
    /// ownership of the filter.
    pub fn attach(&mut self, id: i32, clock: Arc<EngineClock>) {
        self.id = id;
        self.clock = clock;
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    pub fn role(&self) -> FilterRole {
        self.role
    }

    pub fn clock(&self) -> &Arc<EngineClock> {
        &self.clock
    }

    pub fn inbox(&self) -> &Arc<EventInbox> {
        &self.inbox
    }

    /// Events due now, bounded per cycle.
    pub fn drain_due_events(&self) -> Vec<Event> {
        self.inbox.drain_due(self.clock.now_us())
    }

    pub fn note_dropped_frame(&mut self) {
        self.dropped_frames += 1;
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    // ============ Port allocation ============

    pub fn generate_writer_id(&mut self) -> i32 {
        let id = self.next_writer_id;
        self.next_writer_id += 1;
        id
    }

    pub fn generate_reader_id(&mut self) -> i32 {
        let id = self.next_reader_id;
        self.next_reader_id += 1;
        id
    }

    pub fn writer_connected(&self, writer_id: i32) -> bool {
        self.writers.get(&writer_id).is_some_and(Writer::is_connected)
    }

    pub fn reader_connected(&self, reader_id: i32) -> bool {
        self.readers.get(&reader_id).is_some_and(Reader::is_connected)
    }

    pub fn connection_data(&self, writer_id: i32) -> Option<&ConnectionData> {
        self.connections.get(&writer_id)
    }

    // ============ Binding ============

    /// Bind `writer_id` to `queue` and record its first downstream
    /// endpoint.
    pub fn bind_writer(
        &mut self,
        writer_id: i32,
        queue: Arc<FrameQueue>,
        endpoint: ReaderEndpoint,
    ) -> EngineResult<()> {
        if self.writer_connected(writer_id) {
            return Err(EngineError::ConnectionFailed(format!(
                "writer {writer_id} of filter {} already connected",
                self.id
            )));
        }
        let mut writer = Writer::new();
        writer.bind(queue);
        self.writers.insert(writer_id, writer);
        self.connections.insert(
            writer_id,
            ConnectionData { writer_filter_id: self.id, writer_id, readers: vec![endpoint] },
        );
        self.next_writer_id = self.next_writer_id.max(writer_id + 1);
        Ok(())
    }

    /// Bind `reader_id` with a fresh cursor on `queue`.
    pub fn bind_reader(&mut self, reader_id: i32, queue: Arc<FrameQueue>) -> EngineResult<()> {
        if self.reader_connected(reader_id) {
            return Err(EngineError::ConnectionFailed(format!(
                "reader {reader_id} of filter {} already connected",
                self.id
            )));
        }
        let mut reader = Reader::new();
        reader.bind(queue);
        self.readers.insert(reader_id, reader);
        self.next_reader_id = self.next_reader_id.max(reader_id + 1);
        Ok(())
    }

    /// Install an already-positioned reader (the shared-reader path).
    pub fn install_reader(&mut self, reader_id: i32, reader: Reader) -> EngineResult<()> {
        if self.reader_connected(reader_id) {
            return Err(EngineError::ConnectionFailed(format!(
                "reader {reader_id} of filter {} already connected",
                self.id
            )));
        }
        self.readers.insert(reader_id, reader);
        self.next_reader_id = self.next_reader_id.max(reader_id + 1);
        Ok(())
    }

    /// Clone a cursor off an existing reader for a co-sink.
    pub fn split_reader(&self, reader_id: i32) -> Option<Reader> {
        self.readers.get(&reader_id)?.split_shared()
    }

    pub fn record_writer_endpoint(&mut self, writer_id: i32, endpoint: ReaderEndpoint) {
        if let Some(data) = self.connections.get_mut(&writer_id) {
            data.readers.push(endpoint);
        }
    }

    /// Forget a downstream endpoint; tears the writer down once nothing is
    /// left behind it.
    pub fn remove_writer_endpoint(&mut self, writer_id: i32, endpoint: ReaderEndpoint) {
        let empty = if let Some(data) = self.connections.get_mut(&writer_id) {
            data.readers.retain(|r| *r != endpoint);
            data.readers.is_empty()
        } else {
            false
        };
        if empty {
            self.disconnect_writer(writer_id);
        }
    }

    pub fn disconnect_writer(&mut self, writer_id: i32) -> bool {
        self.connections.remove(&writer_id);
        self.writers.remove(&writer_id).is_some()
    }

    pub fn disconnect_reader(&mut self, reader_id: i32) -> bool {
        self.readers.remove(&reader_id).is_some()
    }

    // ============ Data-plane access for shapes ============

    pub fn writer(&self, writer_id: i32) -> Option<&Writer> {
        self.writers.get(&writer_id)
    }

    pub fn reader(&self, reader_id: i32) -> Option<&Reader> {
        self.readers.get(&reader_id)
    }

    /// Lowest-id connected reader; the single input of one-input shapes.
    pub fn single_reader(&self) -> Option<&Reader> {
        self.readers
            .iter()
            .filter(|(_, r)| r.is_connected())
            .min_by_key(|(id, _)| **id)
            .map(|(_, r)| r)
    }

    /// Lowest-id connected writer; the single output of one-output shapes.
    pub fn single_writer(&self) -> Option<&Writer> {
        self.writers
            .iter()
            .filter(|(_, w)| w.is_connected())
            .min_by_key(|(id, _)| **id)
            .map(|(_, w)| w)
    }

    pub fn readers(&self) -> impl Iterator<Item = (i32, &Reader)> {
        self.readers.iter().map(|(id, r)| (*id, r))
    }

    pub fn writers(&self) -> impl Iterator<Item = (i32, &Writer)> {
        self.writers.iter().map(|(id, w)| (*id, w))
    }

    pub fn reader_avg_delay_us(&self, reader_id: i32) -> u64 {
        self.readers.get(&reader_id).map_or(0, Reader::avg_delay_us)
    }

    pub fn reader_lost_blocks(&self, reader_id: i32) -> u64 {
        self.readers.get(&reader_id).map_or(0, Reader::lost_blocks)
    }

    /// Lost blocks summed over every reader of this filter.
    pub fn total_lost_blocks(&self) -> u64 {
        self.readers.values().map(Reader::lost_blocks).sum()
    }
}

/// Build the common part of a filter's state report and let the filter
/// append its own counters.
pub fn filter_state(filter: &dyn Filter) -> Value {
    let io = filter.io();
    let mut readers: Vec<Value> = io
        .readers()
        .map(|(id, r)| {
            json!({
                "id": id,
                "avgDelay": r.avg_delay_us(),
                "lostBlocks": r.lost_blocks(),
                "pending": r.pending(),
            })
        })
        .collect();
    readers.sort_by_key(|v| v["id"].as_i64());

    let mut writers: Vec<i32> = io.writers().map(|(id, _)| id).collect();
    writers.sort_unstable();

    let mut state = Map::new();
    state.insert("kind".into(), json!(io.kind()));
    state.insert("role".into(), json!(io.role()));
    state.insert("readers".into(), Value::Array(readers));
    state.insert("writers".into(), json!(writers));
    state.insert("droppedFrames".into(), json!(io.dropped_frames()));
    filter.append_state(&mut state);
    Value::Object(state)
}

// ============ FilterHandle ============

pub type SharedFilter = Arc<Mutex<Box<dyn Filter>>>;

/// Manager-side handle: the filter behind its lock plus everything the
/// control plane may touch without taking that lock.
#[derive(Clone)]
pub struct FilterHandle {
    pub id: i32,
    pub kind: FilterKind,
    pub role: FilterRole,
    pub filter: SharedFilter,
    pub inbox: Arc<EventInbox>,
}

impl FilterHandle {
    pub fn new(id: i32, mut filter: Box<dyn Filter>, clock: Arc<EngineClock>) -> Self {
        filter.io_mut().attach(id, clock);
        let kind = filter.io().kind();
        let role = filter.io().role();
        let inbox = filter.io().inbox().clone();
        Self { id, kind, role, filter: Arc::new(Mutex::new(filter)), inbox }
    }

    /// Enqueue a control event without touching the filter lock.
    pub fn push_event(&self, event: Event) -> bool {
        self.inbox.push(event)
    }
}

/// Wire one writer to one reader with a freshly allocated queue. Locks are
/// taken one filter at a time so a running worker can never deadlock a
/// topology change.
pub fn connect_endpoints(
    src: &FilterHandle,
    writer_id: i32,
    dst: &FilterHandle,
    reader_id: i32,
    clock: &Arc<EngineClock>,
) -> EngineResult<()> {
    if src.id == dst.id {
        return Err(EngineError::ConnectionFailed("filter cannot feed itself".into()));
    }

    let spec = {
        let s = src.filter.lock();
        if s.io().writer_connected(writer_id) {
            return Err(EngineError::ConnectionFailed(format!(
                "writer {writer_id} of filter {} already connected",
                src.id
            )));
        }
        s.output_spec(writer_id).ok_or_else(|| {
            EngineError::InvalidEndpoint(format!("filter {} has no writer {writer_id}", src.id))
        })?
    };

    let queue = FrameQueue::new(spec, clock.clone());
    dst.filter.lock().io_mut().bind_reader(reader_id, queue.clone())?;

    let bound = src.filter.lock().io_mut().bind_writer(
        writer_id,
        queue,
        ReaderEndpoint { filter_id: dst.id, reader_id },
    );
    if let Err(err) = bound {
        dst.filter.lock().io_mut().disconnect_reader(reader_id);
        return Err(err);
    }

    log::debug!(
        "connected filter {} writer {} -> filter {} reader {}",
        src.id,
        writer_id,
        dst.id,
        reader_id
    );
    Ok(())
}

/// Default writer to default reader: the edge between two mid filters.
pub fn connect_one_to_one(
    src: &FilterHandle,
    dst: &FilterHandle,
    clock: &Arc<EngineClock>,
) -> EngineResult<()> {
    connect_endpoints(src, DEFAULT_ID, dst, DEFAULT_ID, clock)
}

/// Named writer into a default reader: a multi-output origin feeding a
/// chain.
pub fn connect_many_to_one(
    src: &FilterHandle,
    writer_id: i32,
    dst: &FilterHandle,
    clock: &Arc<EngineClock>,
) -> EngineResult<()> {
    connect_endpoints(src, writer_id, dst, DEFAULT_ID, clock)
}

/// Default writer into a named reader: a chain feeding a multi-input sink.
pub fn connect_one_to_many(
    src: &FilterHandle,
    dst: &FilterHandle,
    reader_id: i32,
    clock: &Arc<EngineClock>,
) -> EngineResult<()> {
    connect_endpoints(src, DEFAULT_ID, dst, reader_id, clock)
}

/// Named writer into a named reader: a direct origin-to-destination edge.
pub fn connect_many_to_many(
    src: &FilterHandle,
    writer_id: i32,
    dst: &FilterHandle,
    reader_id: i32,
    clock: &Arc<EngineClock>,
) -> EngineResult<()> {
    connect_endpoints(src, writer_id, dst, reader_id, clock)
}
