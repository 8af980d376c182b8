//! Filter shapes
//!
//! The five I/O cardinalities a filter can have. Each wrapper owns the
//! `FilterIo` tables and a payload implementing one narrow trait; the
//! wrapper's `process()` is the full invocation cycle (drain due events,
//! move frames, update counters, return a hint) and the payload only ever
//! sees frames.
//!
//! Payload traits are the plug-in surface for the external collaborators:
//! receivers and capture devices are `FrameSource`, decoders/resamplers/
//! encoders are `FrameTransform`, splitters are `FrameSplitter`, mixers are
//! `FrameCombiner`, transmitters and segmenters are `FrameSink`.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use fc_core::{DEFAULT_FRAME_TIME_US, Frame, QueueSpec};

use crate::event::Event;
use crate::filter::{Filter, FilterIo, FilterKind, FilterRole, ProcessOutcome};

/// What a source produced this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceOutcome {
    /// `out` holds a new frame.
    Produced,
    /// Nothing arrived yet.
    Idle,
    /// The stream ended; the filter detaches.
    Eos,
}

/// Frame producer with no graph inputs (receivers, capture devices).
pub trait FrameSource: Send {
    /// Blueprint for the queues this source's writers feed.
    fn output_spec(&self) -> QueueSpec;

    /// Fill `out` with the next external frame, including its presentation
    /// time and payload length.
    fn next_frame(&mut self, out: &mut Frame) -> SourceOutcome;

    /// Nominal spacing between produced frames.
    fn interval_us(&self) -> u64 {
        DEFAULT_FRAME_TIME_US
    }

    fn handle_event(&mut self, _action: &str, _params: &Value) -> bool {
        false
    }

    fn append_state(&self, _state: &mut Map<String, Value>) {}
}

/// One-in one-out payload (decoders, resamplers, encoders).
pub trait FrameTransform: Send {
    fn output_spec(&self) -> QueueSpec;

    /// Produce `output` from `input`. Returning false rejects the input
    /// frame: it is dropped and counted, nothing is committed.
    fn transform(&mut self, input: &Frame, output: &mut Frame) -> bool;

    fn handle_event(&mut self, _action: &str, _params: &Value) -> bool {
        false
    }

    fn append_state(&self, _state: &mut Map<String, Value>) {}
}

/// One-in many-out payload (splitters).
pub trait FrameSplitter: Send {
    fn output_spec(&self, writer_id: i32) -> QueueSpec;

    /// Produce the `writer_id` output for `input`.
    fn split(&mut self, input: &Frame, writer_id: i32, output: &mut Frame) -> bool;

    fn handle_event(&mut self, _action: &str, _params: &Value) -> bool {
        false
    }

    fn append_state(&self, _state: &mut Map<String, Value>) {}
}

/// Many-in one-out payload (mixers).
pub trait FrameCombiner: Send {
    fn output_spec(&self) -> QueueSpec;

    /// Combine every input that currently has data into `output`. Keys are
    /// reader ids.
    fn combine(&mut self, inputs: &BTreeMap<i32, &Frame>, output: &mut Frame) -> bool;

    fn handle_event(&mut self, _action: &str, _params: &Value) -> bool {
        false
    }

    fn append_state(&self, _state: &mut Map<String, Value>) {}
}

/// Pure consumer payload (transmitters, segmenters).
pub trait FrameSink: Send {
    /// Consume one frame from `reader_id`. Returning false drops it and
    /// bumps the filter's drop counter.
    fn consume(&mut self, reader_id: i32, frame: &Frame) -> bool;

    fn handle_event(&mut self, _action: &str, _params: &Value) -> bool {
        false
    }

    fn append_state(&self, _state: &mut Map<String, Value>) {}
}

fn dispatch<F: FnMut(&str, &Value) -> bool>(io: &FilterIo, mut handler: F) {
    for Event { action, params, .. } in io.drain_due_events() {
        if !handler(&action, &params) {
            log::warn!("filter {}: unhandled event '{}'", io.id(), action);
        }
    }
}

// ============ HeadFilter ============

/// Producer vertex: no inputs, fans one produced frame out to every
/// connected writer.
pub struct HeadFilter<S: FrameSource> {
    io: FilterIo,
    source: S,
    scratch: Option<Frame>,
}

impl<S: FrameSource> HeadFilter<S> {
    pub fn new(kind: FilterKind, role: FilterRole, source: S) -> Self {
        Self { io: FilterIo::new(kind, role), source, scratch: None }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }
}

impl<S: FrameSource> Filter for HeadFilter<S> {
    fn io(&self) -> &FilterIo {
        &self.io
    }

    fn io_mut(&mut self) -> &mut FilterIo {
        &mut self.io
    }

    fn output_spec(&self, _writer_id: i32) -> Option<QueueSpec> {
        Some(self.source.output_spec())
    }

    fn append_state(&self, state: &mut Map<String, Value>) {
        self.source.append_state(state);
    }

    fn process(&mut self) -> ProcessOutcome {
        dispatch(&self.io, |action, params| self.source.handle_event(action, params));

        let writer_ids: Vec<i32> = {
            let mut ids: Vec<i32> =
                self.io.writers().filter(|(_, w)| w.is_connected()).map(|(id, _)| id).collect();
            ids.sort_unstable();
            ids
        };
        if writer_ids.is_empty() {
            return ProcessOutcome::NotReady;
        }

        if writer_ids.len() == 1 {
            // Single output: produce straight into the rear slot.
            let writer = self.io.writer(writer_ids[0]).expect("writer listed but missing");
            let Some(mut rear) = writer.get_frame() else {
                return ProcessOutcome::NotReady;
            };
            return match self.source.next_frame(&mut rear) {
                SourceOutcome::Produced => {
                    rear.commit();
                    ProcessOutcome::Continue { next_hint_us: self.source.interval_us() }
                }
                SourceOutcome::Idle => ProcessOutcome::NotReady,
                SourceOutcome::Eos => ProcessOutcome::Failed,
            };
        }

        // Fan-out: produce once into a scratch frame, then copy into every
        // rear slot. All outputs must have room or the cycle is skipped.
        if self.scratch.is_none() {
            self.scratch = Some(self.source.output_spec().prototype);
        }
        let scratch = self.scratch.as_mut().expect("scratch just installed");
        match self.source.next_frame(scratch) {
            SourceOutcome::Produced => {}
            SourceOutcome::Idle => return ProcessOutcome::NotReady,
            SourceOutcome::Eos => return ProcessOutcome::Failed,
        }

        let mut rears = Vec::with_capacity(writer_ids.len());
        for id in &writer_ids {
            let writer = self.io.writer(*id).expect("writer listed but missing");
            match writer.get_frame() {
                Some(rear) => rears.push(rear),
                None => return ProcessOutcome::NotReady,
            }
        }
        for mut rear in rears {
            rear.copy_payload_from(scratch);
            rear.commit();
        }
        ProcessOutcome::Continue { next_hint_us: self.source.interval_us() }
    }
}

// ============ TailFilter ============

/// Consumer vertex: drains one frame from every reader that has data.
pub struct TailFilter<S: FrameSink> {
    io: FilterIo,
    sink: S,
}

impl<S: FrameSink> TailFilter<S> {
    pub fn new(kind: FilterKind, role: FilterRole, sink: S) -> Self {
        Self { io: FilterIo::new(kind, role), sink }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}

impl<S: FrameSink> Filter for TailFilter<S> {
    fn io(&self) -> &FilterIo {
        &self.io
    }

    fn io_mut(&mut self) -> &mut FilterIo {
        &mut self.io
    }

    fn output_spec(&self, _writer_id: i32) -> Option<QueueSpec> {
        None
    }

    fn append_state(&self, state: &mut Map<String, Value>) {
        self.sink.append_state(state);
    }

    fn process(&mut self) -> ProcessOutcome {
        dispatch(&self.io, |action, params| self.sink.handle_event(action, params));

        let mut reader_ids: Vec<i32> =
            self.io.readers().filter(|(_, r)| r.is_connected()).map(|(id, _)| id).collect();
        reader_ids.sort_unstable();

        let mut consumed = 0;
        let mut rejected = 0;
        for id in reader_ids {
            let reader = self.io.reader(id).expect("reader listed but missing");
            if let Some(front) = reader.get_frame() {
                if self.sink.consume(id, &front) {
                    consumed += 1;
                } else {
                    rejected += 1;
                }
                front.release();
            }
        }
        for _ in 0..rejected {
            self.io.note_dropped_frame();
        }

        if consumed + rejected == 0 {
            ProcessOutcome::NotReady
        } else {
            ProcessOutcome::Continue { next_hint_us: 0 }
        }
    }
}

// ============ OneToOneFilter ============

/// One-in one-out vertex.
pub struct OneToOneFilter<P: FrameTransform> {
    io: FilterIo,
    payload: P,
}

impl<P: FrameTransform> OneToOneFilter<P> {
    pub fn new(kind: FilterKind, role: FilterRole, payload: P) -> Self {
        Self { io: FilterIo::new(kind, role), payload }
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut P {
        &mut self.payload
    }
}

impl<P: FrameTransform> Filter for OneToOneFilter<P> {
    fn io(&self) -> &FilterIo {
        &self.io
    }

    fn io_mut(&mut self) -> &mut FilterIo {
        &mut self.io
    }

    fn output_spec(&self, _writer_id: i32) -> Option<QueueSpec> {
        Some(self.payload.output_spec())
    }

    fn append_state(&self, state: &mut Map<String, Value>) {
        self.payload.append_state(state);
    }

    fn process(&mut self) -> ProcessOutcome {
        dispatch(&self.io, |action, params| self.payload.handle_event(action, params));

        let mut rejected = false;
        let outcome = {
            let Some(reader) = self.io.single_reader() else {
                return ProcessOutcome::NotReady;
            };
            let Some(front) = reader.get_frame() else {
                return ProcessOutcome::NotReady;
            };
            let Some(writer) = self.io.single_writer() else {
                return ProcessOutcome::NotReady;
            };
            // Full downstream queue: leave the input in place and retry.
            let Some(mut rear) = writer.get_frame() else {
                return ProcessOutcome::NotReady;
            };

            rear.set_presentation_us(front.presentation_us());
            rear.set_decode_us(front.decode_us());
            if self.payload.transform(&front, &mut rear) {
                rear.commit();
            } else {
                rejected = true;
            }
            front.release();
            ProcessOutcome::Continue { next_hint_us: 0 }
        };
        if rejected {
            self.io.note_dropped_frame();
        }
        outcome
    }
}

// ============ OneToManyFilter ============

/// One-in many-out vertex: one produced frame per connected writer.
pub struct OneToManyFilter<P: FrameSplitter> {
    io: FilterIo,
    payload: P,
}

impl<P: FrameSplitter> OneToManyFilter<P> {
    pub fn new(kind: FilterKind, role: FilterRole, payload: P) -> Self {
        Self { io: FilterIo::new(kind, role), payload }
    }

    pub fn payload_mut(&mut self) -> &mut P {
        &mut self.payload
    }
}

impl<P: FrameSplitter> Filter for OneToManyFilter<P> {
    fn io(&self) -> &FilterIo {
        &self.io
    }

    fn io_mut(&mut self) -> &mut FilterIo {
        &mut self.io
    }

    fn output_spec(&self, writer_id: i32) -> Option<QueueSpec> {
        Some(self.payload.output_spec(writer_id))
    }

    fn append_state(&self, state: &mut Map<String, Value>) {
        self.payload.append_state(state);
    }

    fn process(&mut self) -> ProcessOutcome {
        dispatch(&self.io, |action, params| self.payload.handle_event(action, params));

        let mut rejected = 0;
        let outcome = {
            let Some(reader) = self.io.single_reader() else {
                return ProcessOutcome::NotReady;
            };
            let Some(front) = reader.get_frame() else {
                return ProcessOutcome::NotReady;
            };

            let mut writer_ids: Vec<i32> =
                self.io.writers().filter(|(_, w)| w.is_connected()).map(|(id, _)| id).collect();
            writer_ids.sort_unstable();
            if writer_ids.is_empty() {
                return ProcessOutcome::NotReady;
            }

            // Every output needs room, otherwise the whole cycle waits so
            // the branches stay in step.
            let mut rears = Vec::with_capacity(writer_ids.len());
            for id in &writer_ids {
                let writer = self.io.writer(*id).expect("writer listed but missing");
                match writer.get_frame() {
                    Some(rear) => rears.push((*id, rear)),
                    None => return ProcessOutcome::NotReady,
                }
            }

            for (id, mut rear) in rears {
                rear.set_presentation_us(front.presentation_us());
                rear.set_decode_us(front.decode_us());
                if self.payload.split(&front, id, &mut rear) {
                    rear.commit();
                } else {
                    rejected += 1;
                }
            }
            front.release();
            ProcessOutcome::Continue { next_hint_us: 0 }
        };
        for _ in 0..rejected {
            self.io.note_dropped_frame();
        }
        outcome
    }
}

// ============ ManyToOneFilter ============

/// Many-in one-out vertex: combines whatever inputs currently have data.
pub struct ManyToOneFilter<P: FrameCombiner> {
    io: FilterIo,
    payload: P,
}

impl<P: FrameCombiner> ManyToOneFilter<P> {
    pub fn new(kind: FilterKind, role: FilterRole, payload: P) -> Self {
        Self { io: FilterIo::new(kind, role), payload }
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut P {
        &mut self.payload
    }
}

impl<P: FrameCombiner> Filter for ManyToOneFilter<P> {
    fn io(&self) -> &FilterIo {
        &self.io
    }

    fn io_mut(&mut self) -> &mut FilterIo {
        &mut self.io
    }

    fn output_spec(&self, _writer_id: i32) -> Option<QueueSpec> {
        Some(self.payload.output_spec())
    }

    fn append_state(&self, state: &mut Map<String, Value>) {
        self.payload.append_state(state);
    }

    fn process(&mut self) -> ProcessOutcome {
        dispatch(&self.io, |action, params| self.payload.handle_event(action, params));

        let mut rejected = false;
        let outcome = {
            let mut reader_ids: Vec<i32> =
                self.io.readers().filter(|(_, r)| r.is_connected()).map(|(id, _)| id).collect();
            reader_ids.sort_unstable();

            let mut fronts = Vec::new();
            for id in reader_ids {
                let reader = self.io.reader(id).expect("reader listed but missing");
                if let Some(front) = reader.get_frame() {
                    fronts.push((id, front));
                }
            }
            if fronts.is_empty() {
                return ProcessOutcome::NotReady;
            }

            let Some(writer) = self.io.single_writer() else {
                return ProcessOutcome::NotReady;
            };
            let Some(mut rear) = writer.get_frame() else {
                return ProcessOutcome::NotReady;
            };

            let inputs: BTreeMap<i32, &Frame> =
                fronts.iter().map(|(id, front)| (*id, &**front)).collect();
            let earliest =
                inputs.values().map(|f| f.presentation_us()).min().unwrap_or_default();
            rear.set_presentation_us(earliest);
            if self.payload.combine(&inputs, &mut rear) {
                rear.commit();
            } else {
                rejected = true;
            }
            drop(inputs);
            for (_, front) in fronts {
                front.release();
            }
            ProcessOutcome::Continue { next_hint_us: 0 }
        };
        if rejected {
            self.io.note_dropped_frame();
        }
        outcome
    }
}
