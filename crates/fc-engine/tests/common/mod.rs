//! Shared helpers for the engine integration suites.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{Map, Value};

use fc_core::{Frame, QueueSpec};
use fc_engine::{FrameSink, FrameTransform, PipelineManager};

/// Poll `predicate` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    predicate()
}

/// One observed frame: which stage saw it, its presentation time, and when.
#[derive(Debug, Clone)]
pub struct Observation {
    pub tag: &'static str,
    pub pts: u64,
    pub first_sample: i16,
    pub at: Instant,
}

pub type ObservationLog = Arc<Mutex<Vec<Observation>>>;

pub fn observation_log() -> ObservationLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn observations_for(log: &ObservationLog, tag: &str) -> Vec<Observation> {
    log.lock().iter().filter(|o| o.tag == tag).cloned().collect()
}

fn first_sample(frame: &Frame) -> i16 {
    let data = frame.data();
    if data.len() >= 2 { i16::from_le_bytes([data[0], data[1]]) } else { 0 }
}

/// Sink recording every consumed frame into a shared log.
pub struct RecordingSink {
    tag: &'static str,
    log: ObservationLog,
}

impl RecordingSink {
    pub fn new(tag: &'static str, log: ObservationLog) -> Self {
        Self { tag, log }
    }
}

impl FrameSink for RecordingSink {
    fn consume(&mut self, _reader_id: i32, frame: &Frame) -> bool {
        self.log.lock().push(Observation {
            tag: self.tag,
            pts: frame.presentation_us(),
            first_sample: first_sample(frame),
            at: Instant::now(),
        });
        true
    }
}

/// Pass-through transform recording every frame it processes.
pub struct RecordingTransform {
    tag: &'static str,
    log: ObservationLog,
    spec: QueueSpec,
}

impl RecordingTransform {
    pub fn new(tag: &'static str, log: ObservationLog, spec: QueueSpec) -> Self {
        Self { tag, log, spec }
    }
}

impl FrameTransform for RecordingTransform {
    fn output_spec(&self) -> QueueSpec {
        self.spec.clone()
    }

    fn transform(&mut self, input: &Frame, output: &mut Frame) -> bool {
        self.log.lock().push(Observation {
            tag: self.tag,
            pts: input.presentation_us(),
            first_sample: first_sample(input),
            at: Instant::now(),
        });
        output.copy_payload_from(input);
        true
    }

    fn append_state(&self, _state: &mut Map<String, Value>) {}
}

/// Filter state object with the given id from a `get_state` report.
pub fn filter_state_of(manager: &PipelineManager, id: i32) -> Value {
    let state = manager.get_state();
    state["filters"]
        .as_array()
        .and_then(|filters| filters.iter().find(|f| f["id"] == id).cloned())
        .unwrap_or(Value::Null)
}
