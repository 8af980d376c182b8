//! Audio mixing scenario
//!
//! Two synchronous PCM sources into one mixer with per-reader gains: a
//! constant-amplitude tone on reader 1 and silence on reader 2, both at
//! half gain. The mix must be the tone scaled by 0.5 and the mixer must
//! not lose a single block.

mod common;

use std::time::Duration;

use fc_engine::{
    FilterKind, FilterRole, HeadFilter, LoopbackFactory, ManyToOneFilter, PcmMixer,
    PipelineManager, TailFilter, ToneSource,
};

use common::{RecordingSink, observation_log, observations_for, wait_until};

const SAMPLE_RATE: u32 = 48_000;
const CHANNELS: u32 = 2;
const SAMPLES_PER_FRAME: u32 = 1024;

#[test]
fn mixer_applies_channel_gains() {
    let mut m = PipelineManager::new(4, Box::new(LoopbackFactory::default()));
    let log = observation_log();

    let tone = ToneSource::new(CHANNELS, SAMPLE_RATE, SAMPLES_PER_FRAME, 1000)
        .with_limit(48)
        .with_interval_us(1_000);
    let silence = ToneSource::new(CHANNELS, SAMPLE_RATE, SAMPLES_PER_FRAME, 0)
        .with_limit(48)
        .with_interval_us(1_000);
    m.add_filter(1, Box::new(HeadFilter::new(FilterKind::Receiver, FilterRole::Network, tone)))
        .unwrap();
    m.add_filter(2, Box::new(HeadFilter::new(FilterKind::Receiver, FilterRole::Network, silence)))
        .unwrap();

    let mut mixer_payload = PcmMixer::new(CHANNELS, SAMPLE_RATE);
    mixer_payload.set_gain(1, 0.5);
    mixer_payload.set_gain(2, 0.5);
    m.add_filter(
        3,
        Box::new(ManyToOneFilter::new(FilterKind::AudioMixer, FilterRole::BestEffort, mixer_payload)),
    )
    .unwrap();

    m.add_filter(
        4,
        Box::new(TailFilter::new(
            FilterKind::Transmitter,
            FilterRole::BestEffort,
            RecordingSink::new("mix", log.clone()),
        )),
    )
    .unwrap();

    // Mixer output first, then its two inputs on readers 1 and 2.
    m.create_path(3, 3, 4, -1, -1, vec![]).unwrap();
    m.connect_path(3).unwrap();
    m.create_path(1, 1, 3, -1, 1, vec![]).unwrap();
    m.connect_path(1).unwrap();
    m.create_path(2, 2, 3, -1, 2, vec![]).unwrap();
    m.connect_path(2).unwrap();

    assert!(wait_until(Duration::from_secs(5), || observations_for(&log, "mix").len() >= 40));

    // Every mixed frame is the tone at half amplitude; cycles where only
    // the silent input had data mix to zero. Nothing else may appear.
    let mixed = observations_for(&log, "mix");
    let halved = mixed.iter().filter(|o| o.first_sample == 500).count();
    for obs in &mixed {
        assert!(
            obs.first_sample == 500 || obs.first_sample == 0,
            "unexpected mix level {}",
            obs.first_sample
        );
    }
    assert!(halved >= mixed.len() / 2, "tone mostly present: {halved}/{}", mixed.len());

    // Lossless delivery into the mixer on both inputs.
    let state = m.get_state();
    for path_id in [1, 2] {
        let path = state["paths"]
            .as_array()
            .unwrap()
            .iter()
            .find(|p| p["id"] == path_id)
            .unwrap();
        assert_eq!(path["lostBlocks"], 0, "path {path_id} lost blocks");
    }

    m.stop().unwrap();
}
