//! Media frame model
//!
//! A `Frame` is the unit moved along every graph edge: codec tag, geometry,
//! a fixed-capacity payload buffer (interleaved or planar) and timing
//! metadata. Frames are allocated once per queue slot and reused in place;
//! geometry describing the worst case is fixed at allocation, per-frame
//! fields (payload length, samples, intra flag, timestamps, sequence) are
//! rewritten by the producer on every cycle.

use serde::{Deserialize, Serialize};

/// Longest frame any queue slot must hold, in milliseconds of media.
pub const MAX_FRAME_TIME_MS: u64 = 100;
/// Nominal audio frame duration used for scheduling hints.
pub const DEFAULT_FRAME_TIME_US: u64 = 20_000;
pub const DEFAULT_CHANNELS: u32 = 2;
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// Media class of a frame or queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn name(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

/// Codec carried by a frame. `RawVideo`/`Pcm` mark uncompressed payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CodecTag {
    H264,
    H265,
    Vp8,
    RawVideo,
    Aac,
    Mp3,
    Opus,
    Pcm,
    PcmU,
    G711,
}

impl CodecTag {
    pub fn kind(self) -> MediaKind {
        match self {
            CodecTag::H264 | CodecTag::H265 | CodecTag::Vp8 | CodecTag::RawVideo => MediaKind::Video,
            _ => MediaKind::Audio,
        }
    }
}

/// Pixel layout of raw video payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PixelFormat {
    Yuv420p,
    Yuv422p,
    Yuv444p,
    Yuyv422,
    Rgb24,
    Bgr24,
    Nv12,
}

impl PixelFormat {
    /// Bits per pixel, used for worst-case buffer sizing.
    pub fn bits_per_pixel(self) -> usize {
        match self {
            PixelFormat::Yuv420p | PixelFormat::Nv12 => 12,
            PixelFormat::Yuv422p | PixelFormat::Yuyv422 => 16,
            PixelFormat::Yuv444p | PixelFormat::Rgb24 | PixelFormat::Bgr24 => 24,
        }
    }
}

/// Sample layout of raw audio payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SampleFormat {
    U8,
    U8P,
    S16,
    S16P,
    F32,
    F32P,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::U8 | SampleFormat::U8P => 1,
            SampleFormat::S16 | SampleFormat::S16P => 2,
            SampleFormat::F32 | SampleFormat::F32P => 4,
        }
    }

    pub fn is_planar(self) -> bool {
        matches!(self, SampleFormat::U8P | SampleFormat::S16P | SampleFormat::F32P)
    }
}

/// Video frame geometry. `intra` is rewritten per frame by encoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoGeometry {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub intra: bool,
}

/// Audio frame geometry. `samples` is the per-frame sample count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioGeometry {
    pub channels: u32,
    pub sample_rate: u32,
    pub sample_format: SampleFormat,
    pub samples: u32,
}

impl AudioGeometry {
    /// Worst-case samples a single frame may carry at `sample_rate`.
    pub fn max_samples(sample_rate: u32) -> u32 {
        sample_rate * MAX_FRAME_TIME_MS as u32 / 1000
    }

    /// Duration of `samples` at this geometry's rate, in microseconds.
    pub fn duration_us(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples as u64 * 1_000_000 / self.sample_rate as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Geometry {
    Video(VideoGeometry),
    Audio(AudioGeometry),
}

/// Payload storage. Planar buffers keep one plane per audio channel, all of
/// equal capacity; `len` on the owning frame counts bytes per plane.
#[derive(Debug, Clone)]
pub enum FrameBuffer {
    Interleaved(Vec<u8>),
    Planar(Vec<Vec<u8>>),
}

impl FrameBuffer {
    fn capacity(&self) -> usize {
        match self {
            FrameBuffer::Interleaved(b) => b.len(),
            FrameBuffer::Planar(p) => p.first().map_or(0, Vec::len),
        }
    }
}

/// One media unit. Metadata set at allocation, payload rewritten in place.
#[derive(Debug, Clone)]
pub struct Frame {
    codec: CodecTag,
    geometry: Geometry,
    buffer: FrameBuffer,
    len: usize,
    presentation_us: u64,
    decode_us: Option<u64>,
    sequence: u64,
}

impl Frame {
    /// Allocate a video frame sized for the worst case of `geometry`.
    pub fn video(codec: CodecTag, width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        let capacity = (width as usize * height as usize * pixel_format.bits_per_pixel()).div_ceil(8);
        Self {
            codec,
            geometry: Geometry::Video(VideoGeometry { width, height, pixel_format, intra: false }),
            buffer: FrameBuffer::Interleaved(vec![0; capacity]),
            len: 0,
            presentation_us: 0,
            decode_us: None,
            sequence: 0,
        }
    }

    /// Allocate an audio frame able to hold `MAX_FRAME_TIME_MS` of media.
    /// Planar sample formats get one plane per channel.
    pub fn audio(codec: CodecTag, channels: u32, sample_rate: u32, sample_format: SampleFormat) -> Self {
        let max_samples = AudioGeometry::max_samples(sample_rate) as usize;
        let plane = max_samples * sample_format.bytes_per_sample();
        let buffer = if sample_format.is_planar() {
            FrameBuffer::Planar((0..channels).map(|_| vec![0; plane]).collect())
        } else {
            FrameBuffer::Interleaved(vec![0; plane * channels as usize])
        };
        Self {
            codec,
            geometry: Geometry::Audio(AudioGeometry { channels, sample_rate, sample_format, samples: 0 }),
            buffer,
            len: 0,
            presentation_us: 0,
            decode_us: None,
            sequence: 0,
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.codec.kind()
    }

    pub fn codec(&self) -> CodecTag {
        self.codec
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn video_geometry(&self) -> Option<&VideoGeometry> {
        match &self.geometry {
            Geometry::Video(g) => Some(g),
            Geometry::Audio(_) => None,
        }
    }

    pub fn audio_geometry(&self) -> Option<&AudioGeometry> {
        match &self.geometry {
            Geometry::Audio(g) => Some(g),
            Geometry::Video(_) => None,
        }
    }

    pub fn is_planar(&self) -> bool {
        matches!(self.buffer, FrameBuffer::Planar(_))
    }

    /// Committed payload bytes (per plane for planar frames).
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Fixed buffer capacity (per plane for planar frames).
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Set the committed payload length. Clamped to capacity.
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.capacity());
    }

    pub fn presentation_us(&self) -> u64 {
        self.presentation_us
    }

    pub fn set_presentation_us(&mut self, t: u64) {
        self.presentation_us = t;
    }

    pub fn decode_us(&self) -> Option<u64> {
        self.decode_us
    }

    pub fn set_decode_us(&mut self, t: Option<u64>) {
        self.decode_us = t;
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn set_sequence(&mut self, n: u64) {
        self.sequence = n;
    }

    /// Whole interleaved buffer. Empty slice for planar frames.
    pub fn data(&self) -> &[u8] {
        match &self.buffer {
            FrameBuffer::Interleaved(b) => &b[..self.len],
            FrameBuffer::Planar(_) => &[],
        }
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        match &mut self.buffer {
            FrameBuffer::Interleaved(b) => b,
            FrameBuffer::Planar(_) => &mut [],
        }
    }

    /// Committed slice of each channel plane. Empty for interleaved frames.
    pub fn planes(&self) -> Vec<&[u8]> {
        match &self.buffer {
            FrameBuffer::Planar(p) => p.iter().map(|b| &b[..self.len]).collect(),
            FrameBuffer::Interleaved(_) => Vec::new(),
        }
    }

    pub fn planes_mut(&mut self) -> Vec<&mut [u8]> {
        match &mut self.buffer {
            FrameBuffer::Planar(p) => p.iter_mut().map(|b| b.as_mut_slice()).collect(),
            FrameBuffer::Interleaved(_) => Vec::new(),
        }
    }

    pub fn set_samples(&mut self, samples: u32) {
        if let Geometry::Audio(g) = &mut self.geometry {
            g.samples = samples;
        }
    }

    pub fn set_intra(&mut self, intra: bool) {
        if let Geometry::Video(g) = &mut self.geometry {
            g.intra = intra;
        }
    }

    /// Media duration of this frame, used for scheduling hints. Zero for
    /// video (cadence comes from the producing filter's frame rate).
    pub fn duration_us(&self) -> u64 {
        match &self.geometry {
            Geometry::Audio(g) => g.duration_us(),
            Geometry::Video(_) => 0,
        }
    }

    /// Overwrite every payload byte, marking the whole buffer committed.
    pub fn fill_with(&mut self, value: u8) {
        match &mut self.buffer {
            FrameBuffer::Interleaved(b) => b.fill(value),
            FrameBuffer::Planar(p) => p.iter_mut().for_each(|b| b.fill(value)),
        }
        self.len = self.capacity();
    }

    /// Copy payload and per-frame metadata from `src`. Source payload must
    /// fit; geometry fixed at allocation is not copied.
    pub fn copy_payload_from(&mut self, src: &Frame) {
        match (&mut self.buffer, &src.buffer) {
            (FrameBuffer::Interleaved(dst), FrameBuffer::Interleaved(s)) => {
                let n = src.len.min(dst.len());
                dst[..n].copy_from_slice(&s[..n]);
                self.len = n;
            }
            (FrameBuffer::Planar(dst), FrameBuffer::Planar(s)) => {
                let mut n = 0;
                for (d, sp) in dst.iter_mut().zip(s.iter()) {
                    n = src.len.min(d.len());
                    d[..n].copy_from_slice(&sp[..n]);
                }
                self.len = n;
            }
            _ => {
                self.len = 0;
            }
        }
        self.presentation_us = src.presentation_us;
        self.decode_us = src.decode_us;
        if let (Geometry::Audio(g), Some(sg)) = (&mut self.geometry, src.audio_geometry()) {
            g.samples = sg.samples;
        }
        if let (Geometry::Video(g), Some(sg)) = (&mut self.geometry, src.video_geometry()) {
            g.intra = sg.intra;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_frame_capacity() {
        let f = Frame::video(CodecTag::RawVideo, 1920, 1080, PixelFormat::Yuv420p);
        assert_eq!(f.capacity(), 1920 * 1080 * 12 / 8);
        assert_eq!(f.kind(), MediaKind::Video);
        assert!(!f.is_planar());
    }

    #[test]
    fn test_audio_frame_planar() {
        let f = Frame::audio(CodecTag::Pcm, 2, 48_000, SampleFormat::S16P);
        assert!(f.is_planar());
        assert_eq!(f.planes().len(), 2);
        // 100 ms at 48 kHz, 2 bytes per sample
        assert_eq!(f.capacity(), 4800 * 2);
    }

    #[test]
    fn test_audio_duration() {
        let mut f = Frame::audio(CodecTag::Pcm, 2, 48_000, SampleFormat::S16);
        f.set_samples(960);
        assert_eq!(f.duration_us(), 20_000);
    }

    #[test]
    fn test_set_len_clamps() {
        let mut f = Frame::video(CodecTag::H264, 16, 16, PixelFormat::Yuv420p);
        f.set_len(usize::MAX);
        assert_eq!(f.len(), f.capacity());
    }

    #[test]
    fn test_copy_payload() {
        let mut src = Frame::audio(CodecTag::Pcm, 2, 8_000, SampleFormat::S16);
        let mut dst = Frame::audio(CodecTag::Pcm, 2, 8_000, SampleFormat::S16);
        src.fill_with(0x7f);
        src.set_presentation_us(1234);
        src.set_samples(320);
        dst.copy_payload_from(&src);
        assert_eq!(dst.len(), src.len());
        assert_eq!(dst.presentation_us(), 1234);
        assert_eq!(dst.audio_geometry().unwrap().samples, 320);
        assert!(dst.data().iter().all(|&b| b == 0x7f));
    }
}
