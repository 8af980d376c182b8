//! Filter factory
//!
//! The manager creates filters by kind on behalf of the control plane; the
//! concrete collaborators behind each kind are supplied by a factory at
//! engine construction. `LoopbackFactory` wires every kind to the loopback
//! collaborators so a full pipeline can run without codec bindings.

use fc_core::{CodecTag, QueueSpec, SampleFormat, PixelFormat};

use crate::filter::{Filter, FilterKind, FilterRole};
use crate::loopback::{CopySplitter, CountingSink, PassThrough, PatternSource, PcmMixer, SelectCombiner};
use crate::shapes::{HeadFilter, ManyToOneFilter, OneToManyFilter, OneToOneFilter, TailFilter};

/// Maps a filter kind to a concrete instance.
pub trait FilterFactory: Send {
    fn create(&self, kind: FilterKind) -> Option<Box<dyn Filter>>;
}

/// Factory producing loopback collaborators for every kind.
pub struct LoopbackFactory {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub channels: u32,
    pub sample_rate: u32,
}

impl Default for LoopbackFactory {
    fn default() -> Self {
        Self { width: 640, height: 480, fps: 25, channels: 2, sample_rate: 48_000 }
    }
}

impl LoopbackFactory {
    fn raw_video_spec(&self) -> QueueSpec {
        QueueSpec::video(CodecTag::RawVideo, self.width, self.height, PixelFormat::Yuv420p)
    }

    fn coded_video_spec(&self) -> QueueSpec {
        QueueSpec::video(CodecTag::H264, self.width, self.height, PixelFormat::Yuv420p)
    }

    fn raw_audio_spec(&self) -> QueueSpec {
        QueueSpec::audio(CodecTag::Pcm, self.channels, self.sample_rate, SampleFormat::S16)
    }

    fn coded_audio_spec(&self) -> QueueSpec {
        QueueSpec::audio(CodecTag::Aac, self.channels, self.sample_rate, SampleFormat::S16)
    }
}

impl FilterFactory for LoopbackFactory {
    fn create(&self, kind: FilterKind) -> Option<Box<dyn Filter>> {
        let filter: Box<dyn Filter> = match kind {
            FilterKind::Receiver => Box::new(HeadFilter::new(
                kind,
                FilterRole::Network,
                PatternSource::video(CodecTag::H264, self.width, self.height, self.fps),
            )),
            FilterKind::Demuxer => Box::new(OneToOneFilter::new(
                kind,
                FilterRole::BestEffort,
                PassThrough::new(self.coded_video_spec()),
            )),
            FilterKind::VideoDecoder => Box::new(OneToOneFilter::new(
                kind,
                FilterRole::BestEffort,
                PassThrough::new(self.raw_video_spec()),
            )),
            FilterKind::VideoEncoder => Box::new(OneToOneFilter::new(
                kind,
                FilterRole::BestEffort,
                PassThrough::new(self.coded_video_spec()),
            )),
            FilterKind::VideoResampler => Box::new(OneToOneFilter::new(
                kind,
                FilterRole::BestEffort,
                PassThrough::new(self.raw_video_spec()),
            )),
            FilterKind::VideoMixer => Box::new(ManyToOneFilter::new(
                kind,
                FilterRole::BestEffort,
                SelectCombiner::new(self.raw_video_spec()),
            )),
            FilterKind::VideoSplitter => Box::new(OneToManyFilter::new(
                kind,
                FilterRole::BestEffort,
                CopySplitter::new(self.raw_video_spec()),
            )),
            FilterKind::AudioDecoder => Box::new(OneToOneFilter::new(
                kind,
                FilterRole::BestEffort,
                PassThrough::new(self.raw_audio_spec()),
            )),
            FilterKind::AudioEncoder => Box::new(OneToOneFilter::new(
                kind,
                FilterRole::BestEffort,
                PassThrough::new(self.coded_audio_spec()),
            )),
            FilterKind::AudioMixer => Box::new(ManyToOneFilter::new(
                kind,
                FilterRole::BestEffort,
                PcmMixer::new(self.channels, self.sample_rate),
            )),
            FilterKind::Segmenter => {
                Box::new(TailFilter::new(kind, FilterRole::BestEffort, CountingSink::new()))
            }
            FilterKind::Transmitter => {
                Box::new(TailFilter::new(kind, FilterRole::BestEffort, CountingSink::new()))
            }
        };
        Some(filter)
    }
}
