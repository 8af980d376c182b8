//! Loopback collaborators
//!
//! Self-contained sources, transforms, mixers and sinks used wherever the
//! real codec bindings are not linked: the default filter factory, the
//! daemon's loopback mode and the test suites. They move real frames with
//! real timing but do no codec work; a "decoder" here is a pass-through
//! that retags the payload.

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value, json};

use fc_core::{CodecTag, Frame, PixelFormat, QueueSpec, SampleFormat};

use crate::shapes::{FrameCombiner, FrameSink, FrameSource, FrameSplitter, FrameTransform, SourceOutcome};

// ============ Sources ============

/// Synthetic source producing fixed-cadence frames with a counting payload
/// pattern. Presentation times advance by the frame interval from zero.
pub struct PatternSource {
    spec: QueueSpec,
    interval_us: u64,
    pts_step_us: u64,
    produced: u64,
    limit: Option<u64>,
    payload_len: usize,
}

impl PatternSource {
    pub fn video(codec: CodecTag, width: u32, height: u32, fps: u32) -> Self {
        let spec = QueueSpec::video(codec, width, height, PixelFormat::Yuv420p);
        let payload_len = spec.prototype.capacity().min(4096);
        let interval_us = 1_000_000 / fps.max(1) as u64;
        Self { spec, interval_us, pts_step_us: interval_us, produced: 0, limit: None, payload_len }
    }

    pub fn audio(codec: CodecTag, channels: u32, sample_rate: u32, samples_per_frame: u32) -> Self {
        let spec = QueueSpec::audio(codec, channels, sample_rate, SampleFormat::S16);
        let payload_len =
            samples_per_frame as usize * channels as usize * SampleFormat::S16.bytes_per_sample();
        let interval_us = samples_per_frame as u64 * 1_000_000 / sample_rate.max(1) as u64;
        Self { spec, interval_us, pts_step_us: interval_us, produced: 0, limit: None, payload_len }
    }

    /// Stop after `limit` frames; the filter then reports end of stream.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.spec = self.spec.clone().with_capacity(capacity);
        self
    }

    pub fn with_queue_policy(mut self, policy: fc_core::DropPolicy) -> Self {
        self.spec = self.spec.clone().with_policy(policy);
        self
    }

    /// Produce faster (or slower) than the nominal rate while presentation
    /// times keep stepping by the media cadence.
    pub fn with_interval_us(mut self, interval_us: u64) -> Self {
        self.interval_us = interval_us.max(1);
        self
    }

    pub fn produced(&self) -> u64 {
        self.produced
    }
}

impl FrameSource for PatternSource {
    fn output_spec(&self) -> QueueSpec {
        self.spec.clone()
    }

    fn interval_us(&self) -> u64 {
        self.interval_us
    }

    fn next_frame(&mut self, out: &mut Frame) -> SourceOutcome {
        if let Some(limit) = self.limit {
            if self.produced >= limit {
                return SourceOutcome::Eos;
            }
        }
        let value = (self.produced % 251) as u8;
        out.fill_with(value);
        out.set_len(self.payload_len);
        out.set_presentation_us(self.produced * self.pts_step_us);
        out.set_decode_us(None);
        if out.audio_geometry().is_some() {
            let bytes_per_sample = SampleFormat::S16.bytes_per_sample();
            let channels = out.audio_geometry().map_or(1, |g| g.channels.max(1)) as usize;
            out.set_samples((self.payload_len / bytes_per_sample / channels) as u32);
        } else {
            out.set_intra(self.produced % 25 == 0);
        }
        self.produced += 1;
        SourceOutcome::Produced
    }

    fn append_state(&self, state: &mut Map<String, Value>) {
        state.insert("produced".into(), json!(self.produced));
    }
}

/// Audio source emitting a constant sample value, for mixing checks.
pub struct ToneSource {
    inner: PatternSource,
    sample_value: i16,
}

impl ToneSource {
    pub fn new(channels: u32, sample_rate: u32, samples_per_frame: u32, sample_value: i16) -> Self {
        Self {
            inner: PatternSource::audio(CodecTag::Pcm, channels, sample_rate, samples_per_frame),
            sample_value,
        }
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.inner = self.inner.with_limit(limit);
        self
    }

    pub fn with_interval_us(mut self, interval_us: u64) -> Self {
        self.inner = self.inner.with_interval_us(interval_us);
        self
    }
}

impl FrameSource for ToneSource {
    fn output_spec(&self) -> QueueSpec {
        self.inner.output_spec()
    }

    fn interval_us(&self) -> u64 {
        self.inner.interval_us()
    }

    fn next_frame(&mut self, out: &mut Frame) -> SourceOutcome {
        let outcome = self.inner.next_frame(out);
        if outcome == SourceOutcome::Produced {
            let value = self.sample_value.to_le_bytes();
            let len = out.len();
            let data = out.data_mut();
            for chunk in data[..len].chunks_exact_mut(2) {
                chunk.copy_from_slice(&value);
            }
        }
        outcome
    }
}

// ============ Transforms ============

/// Pass-through transform: copies the payload and retags it for the
/// declared output. Stands in for decoders, encoders and resamplers.
pub struct PassThrough {
    spec: QueueSpec,
    processed: u64,
}

impl PassThrough {
    pub fn new(spec: QueueSpec) -> Self {
        Self { spec, processed: 0 }
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }
}

impl FrameTransform for PassThrough {
    fn output_spec(&self) -> QueueSpec {
        self.spec.clone()
    }

    fn transform(&mut self, input: &Frame, output: &mut Frame) -> bool {
        output.copy_payload_from(input);
        self.processed += 1;
        true
    }

    fn append_state(&self, state: &mut Map<String, Value>) {
        state.insert("processed".into(), json!(self.processed));
    }
}

// ============ Splitters ============

/// Copies the input frame to every output branch.
pub struct CopySplitter {
    spec: QueueSpec,
}

impl CopySplitter {
    pub fn new(spec: QueueSpec) -> Self {
        Self { spec }
    }
}

impl FrameSplitter for CopySplitter {
    fn output_spec(&self, _writer_id: i32) -> QueueSpec {
        self.spec.clone()
    }

    fn split(&mut self, input: &Frame, _writer_id: i32, output: &mut Frame) -> bool {
        output.copy_payload_from(input);
        true
    }
}

// ============ Combiners ============

/// Interleaved S16 mixer with a gain per reader. Gains are control-plane
/// mutable through the `setChannelGain` event.
pub struct PcmMixer {
    spec: QueueSpec,
    gains: HashMap<i32, f64>,
    mixed: u64,
}

impl PcmMixer {
    pub fn new(channels: u32, sample_rate: u32) -> Self {
        Self {
            spec: QueueSpec::audio(CodecTag::Pcm, channels, sample_rate, SampleFormat::S16),
            gains: HashMap::new(),
            mixed: 0,
        }
    }

    pub fn set_gain(&mut self, reader_id: i32, gain: f64) {
        self.gains.insert(reader_id, gain);
    }

    fn gain(&self, reader_id: i32) -> f64 {
        self.gains.get(&reader_id).copied().unwrap_or(1.0)
    }
}

impl FrameCombiner for PcmMixer {
    fn output_spec(&self) -> QueueSpec {
        self.spec.clone()
    }

    fn combine(&mut self, inputs: &BTreeMap<i32, &Frame>, output: &mut Frame) -> bool {
        let len =
            inputs.values().map(|f| f.len()).max().unwrap_or(0).min(output.capacity()) & !1;
        if len == 0 {
            return false;
        }
        let samples = len / 2;
        let mut acc = vec![0f64; samples];
        for (reader_id, frame) in inputs {
            let gain = self.gain(*reader_id);
            for (i, chunk) in frame.data().chunks_exact(2).take(samples).enumerate() {
                acc[i] += i16::from_le_bytes([chunk[0], chunk[1]]) as f64 * gain;
            }
        }

        output.set_len(len);
        let data = output.data_mut();
        for (i, value) in acc.iter().enumerate() {
            let clamped = value.clamp(i16::MIN as f64, i16::MAX as f64) as i16;
            data[i * 2..i * 2 + 2].copy_from_slice(&clamped.to_le_bytes());
        }
        if let Some(frame) = inputs.values().next() {
            if let Some(geometry) = frame.audio_geometry() {
                output.set_samples(geometry.samples);
            }
        }
        self.mixed += 1;
        true
    }

    fn handle_event(&mut self, action: &str, params: &Value) -> bool {
        match action {
            "setChannelGain" => {
                let reader = params.get("reader").and_then(Value::as_i64);
                let gain = params.get("gain").and_then(Value::as_f64);
                if let (Some(reader), Some(gain)) = (reader, gain) {
                    self.set_gain(reader as i32, gain);
                    return true;
                }
                false
            }
            _ => false,
        }
    }

    fn append_state(&self, state: &mut Map<String, Value>) {
        state.insert("mixed".into(), json!(self.mixed));
    }
}

/// Forwards the lowest-id input that has data; a placeholder for layout
/// mixing.
pub struct SelectCombiner {
    spec: QueueSpec,
}

impl SelectCombiner {
    pub fn new(spec: QueueSpec) -> Self {
        Self { spec }
    }
}

impl FrameCombiner for SelectCombiner {
    fn output_spec(&self) -> QueueSpec {
        self.spec.clone()
    }

    fn combine(&mut self, inputs: &BTreeMap<i32, &Frame>, output: &mut Frame) -> bool {
        match inputs.values().next() {
            Some(frame) => {
                output.copy_payload_from(frame);
                true
            }
            None => false,
        }
    }
}

// ============ Sinks ============

/// Terminal consumer tracking per-reader counts and the last presentation
/// time seen; stands in for transmitters and segmenters.
#[derive(Default)]
pub struct CountingSink {
    consumed: HashMap<i32, u64>,
    last_pts: Option<u64>,
    hold_us: u64,
}

impl CountingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Busy-hold per frame, to model a slow consumer.
    pub fn with_hold_us(mut self, hold_us: u64) -> Self {
        self.hold_us = hold_us;
        self
    }

    pub fn total_consumed(&self) -> u64 {
        self.consumed.values().sum()
    }

    pub fn consumed_on(&self, reader_id: i32) -> u64 {
        self.consumed.get(&reader_id).copied().unwrap_or(0)
    }

    pub fn last_pts(&self) -> Option<u64> {
        self.last_pts
    }
}

impl FrameSink for CountingSink {
    fn consume(&mut self, reader_id: i32, frame: &Frame) -> bool {
        if self.hold_us > 0 {
            std::thread::sleep(std::time::Duration::from_micros(self.hold_us));
        }
        *self.consumed.entry(reader_id).or_insert(0) += 1;
        self.last_pts = Some(frame.presentation_us());
        true
    }

    fn append_state(&self, state: &mut Map<String, Value>) {
        state.insert("consumed".into(), json!(self.total_consumed()));
        state.insert("lastPts".into(), json!(self.last_pts));
    }
}
