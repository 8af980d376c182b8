//! Master/slave filter pairing
//!
//! The fan-out pattern behind adaptive ladders: one filter produces a frame
//! and several variants consume it with no copy. The master writes its
//! output slot under the exclusive rear lease, downgrades it to a shared
//! read lease, drives every slave to completion against that borrowed
//! frame, then reclaims the slot and commits. The slaves' lifetime on the
//! frame is therefore a strict sub-interval of the master's output cycle,
//! and every slave finishes before the commit publishes the frame
//! downstream.
//!
//! Slaves are ordinary filters for the rest of the engine (they connect
//! downstream, report state, receive events) but carry the `Slave` role so
//! the workers pool never picks them on its own.

use serde_json::{Map, Value};

use fc_core::QueueSpec;

use crate::error::{EngineError, EngineResult};
use crate::filter::{Filter, FilterHandle, FilterIo, FilterKind, FilterRole, ProcessOutcome, SharedInputSlave};
use crate::shapes::FrameTransform;

fn dispatch_transform<P: FrameTransform>(io: &FilterIo, payload: &mut P) {
    for event in io.drain_due_events() {
        if !payload.handle_event(&event.action, &event.params) {
            log::warn!("filter {}: unhandled event '{}'", io.id(), event.action);
        }
    }
}

/// One-in one-out master driving a set of slaves at its own cadence.
pub struct MasterFilter<P: FrameTransform> {
    io: FilterIo,
    payload: P,
    cadence_us: u64,
    slaves: Vec<FilterHandle>,
    cycles: u64,
}

impl<P: FrameTransform> MasterFilter<P> {
    pub fn new(kind: FilterKind, payload: P, cadence_us: u64) -> Self {
        Self {
            io: FilterIo::new(kind, FilterRole::Master),
            payload,
            cadence_us: cadence_us.max(1),
            slaves: Vec::new(),
            cycles: 0,
        }
    }

    pub fn payload_mut(&mut self) -> &mut P {
        &mut self.payload
    }

    pub fn slave_ids(&self) -> Vec<i32> {
        self.slaves.iter().map(|s| s.id).collect()
    }
}

impl<P: FrameTransform> Filter for MasterFilter<P> {
    fn io(&self) -> &FilterIo {
        &self.io
    }

    fn io_mut(&mut self) -> &mut FilterIo {
        &mut self.io
    }

    fn output_spec(&self, _writer_id: i32) -> Option<QueueSpec> {
        Some(self.payload.output_spec())
    }

    fn register_slave(&mut self, slave: FilterHandle) -> EngineResult<()> {
        if slave.role != FilterRole::Slave {
            return Err(EngineError::NotASlave(slave.id));
        }
        if self.slaves.iter().any(|s| s.id == slave.id) {
            return Ok(());
        }
        log::debug!("filter {}: registered slave {}", self.io.id(), slave.id);
        self.slaves.push(slave);
        Ok(())
    }

    fn append_state(&self, state: &mut Map<String, Value>) {
        state.insert("slaves".into(), serde_json::json!(self.slave_ids()));
        state.insert("cycles".into(), serde_json::json!(self.cycles));
        self.payload.append_state(state);
    }

    fn process(&mut self) -> ProcessOutcome {
        dispatch_transform(&self.io, &mut self.payload);

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
            let Some(mut rear) = writer.get_frame() else {
                return ProcessOutcome::NotReady;
            };

            rear.set_presentation_us(front.presentation_us());
            rear.set_decode_us(front.decode_us());
            if self.payload.transform(&front, &mut rear) {
                // Lend the produced frame to every slave before publishing
                // it downstream.
                let shared = rear.share();
                for slave in &self.slaves {
                    let mut guard = slave.filter.lock();
                    match guard.as_shared_slave() {
                        Some(s) => {
                            if s.process_shared(shared.frame()) == ProcessOutcome::Failed {
                                log::error!("slave {} failed on shared frame", slave.id);
                            }
                        }
                        None => log::error!("filter {} cannot take a shared frame", slave.id),
                    }
                }
                shared.commit();
                self.cycles += 1;
            } else {
                rejected = true;
            }
            front.release();
            ProcessOutcome::Continue { next_hint_us: self.cadence_us }
        };
        if rejected {
            self.io.note_dropped_frame();
        }
        outcome
    }
}

/// One-output slave fed by its master's shared frames. Its own `process`
/// never runs work; the scheduler skips `Slave`-role tasks entirely.
pub struct SlaveFilter<P: FrameTransform> {
    io: FilterIo,
    payload: P,
    produced: u64,
}

impl<P: FrameTransform> SlaveFilter<P> {
    pub fn new(kind: FilterKind, payload: P) -> Self {
        Self { io: FilterIo::new(kind, FilterRole::Slave), payload, produced: 0 }
    }

    pub fn payload_mut(&mut self) -> &mut P {
        &mut self.payload
    }

    pub fn produced(&self) -> u64 {
        self.produced
    }
}

impl<P: FrameTransform> Filter for SlaveFilter<P> {
    fn io(&self) -> &FilterIo {
        &self.io
    }

    fn io_mut(&mut self) -> &mut FilterIo {
        &mut self.io
    }

    fn output_spec(&self, _writer_id: i32) -> Option<QueueSpec> {
        Some(self.payload.output_spec())
    }

    fn as_shared_slave(&mut self) -> Option<&mut dyn SharedInputSlave> {
        Some(self)
    }

    fn append_state(&self, state: &mut Map<String, Value>) {
        state.insert("produced".into(), serde_json::json!(self.produced));
        self.payload.append_state(state);
    }

    fn process(&mut self) -> ProcessOutcome {
        // Slaves are driven through `process_shared`; a direct invocation
        // only drains pending events.
        dispatch_transform(&self.io, &mut self.payload);
        ProcessOutcome::NotReady
    }
}

impl<P: FrameTransform> SharedInputSlave for SlaveFilter<P> {
    fn process_shared(&mut self, frame: &fc_core::Frame) -> ProcessOutcome {
        dispatch_transform(&self.io, &mut self.payload);

        let mut rejected = false;
        let outcome = {
            let Some(writer) = self.io.single_writer() else {
                return ProcessOutcome::NotReady;
            };
            let Some(mut rear) = writer.get_frame() else {
                return ProcessOutcome::NotReady;
            };
            rear.set_presentation_us(frame.presentation_us());
            rear.set_decode_us(frame.decode_us());
            if self.payload.transform(frame, &mut rear) {
                rear.commit();
                self.produced += 1;
            } else {
                rejected = true;
            }
            ProcessOutcome::Continue { next_hint_us: 0 }
        };
        if rejected {
            self.io.note_dropped_frame();
        }
        outcome
    }
}
