//! End-to-end pipeline scenarios
//!
//! Straight transcode delivery, hot path removal, back-pressure visibility
//! and event atomicity, all through the public manager API with loopback
//! collaborators.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use fc_core::{CodecTag, DropPolicy, EngineClock, PixelFormat, QueueSpec};
use fc_engine::{
    CopySplitter, CountingSink, DEFAULT_ID, FilterHandle, FilterKind, FilterRole, HeadFilter,
    LoopbackFactory, ManyToOneFilter, OneToManyFilter, OneToOneFilter, PassThrough, PatternSource,
    PcmMixer, PipelineManager, TailFilter, ToneSource, connect_endpoints,
};

use common::{RecordingSink, observation_log, observations_for, wait_until};

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;

fn raw_video_spec() -> QueueSpec {
    QueueSpec::video(CodecTag::RawVideo, WIDTH, HEIGHT, PixelFormat::Yuv420p)
}

fn coded_video_spec() -> QueueSpec {
    QueueSpec::video(CodecTag::H264, WIDTH, HEIGHT, PixelFormat::Yuv420p)
}

fn manager() -> PipelineManager {
    PipelineManager::new(4, Box::new(LoopbackFactory::default()))
}

/// Receiver -> [decoder, encoder] -> transmitter, 100 frames at a 25 fps
/// presentation cadence, delivered in order.
#[test]
fn straight_decode_transcode() {
    let mut m = manager();
    let log = observation_log();

    let source = PatternSource::video(CodecTag::H264, WIDTH, HEIGHT, 25)
        .with_limit(100)
        .with_interval_us(500);
    m.add_filter(1, Box::new(HeadFilter::new(FilterKind::Receiver, FilterRole::Network, source)))
        .unwrap();
    m.add_filter(
        2,
        Box::new(OneToOneFilter::new(
            FilterKind::VideoDecoder,
            FilterRole::BestEffort,
            PassThrough::new(raw_video_spec()),
        )),
    )
    .unwrap();
    m.add_filter(
        3,
        Box::new(OneToOneFilter::new(
            FilterKind::VideoEncoder,
            FilterRole::BestEffort,
            PassThrough::new(coded_video_spec()),
        )),
    )
    .unwrap();
    m.add_filter(
        4,
        Box::new(TailFilter::new(
            FilterKind::Transmitter,
            FilterRole::BestEffort,
            RecordingSink::new("tx", log.clone()),
        )),
    )
    .unwrap();

    m.create_path(1, 1, 4, -1, -1, vec![2, 3]).unwrap();
    m.connect_path(1).unwrap();

    assert!(wait_until(Duration::from_secs(5), || log.lock().len() >= 100));

    let seen = observations_for(&log, "tx");
    assert_eq!(seen.len(), 100);
    for (i, obs) in seen.iter().enumerate() {
        assert_eq!(obs.pts, i as u64 * 40_000);
    }
    for pair in seen.windows(2) {
        assert!(pair[0].pts < pair[1].pts);
    }

    // Destination delay stays far below the 50 ms budget.
    let state = m.get_state();
    let avg_delay = state["paths"][0]["avgDelay"].as_u64().unwrap();
    assert!(avg_delay <= 50_000, "avgDelay {avg_delay} µs");

    m.stop().unwrap();
}

/// Removing a streaming path stops delivery and cascades filter deletion.
#[test]
fn hot_path_removal() {
    let mut m = manager();
    let log = observation_log();

    let source =
        PatternSource::video(CodecTag::H264, WIDTH, HEIGHT, 25).with_interval_us(1_000);
    m.add_filter(1, Box::new(HeadFilter::new(FilterKind::Receiver, FilterRole::Network, source)))
        .unwrap();
    m.add_filter(
        2,
        Box::new(OneToOneFilter::new(
            FilterKind::VideoDecoder,
            FilterRole::BestEffort,
            PassThrough::new(raw_video_spec()),
        )),
    )
    .unwrap();
    m.add_filter(
        3,
        Box::new(OneToOneFilter::new(
            FilterKind::VideoEncoder,
            FilterRole::BestEffort,
            PassThrough::new(coded_video_spec()),
        )),
    )
    .unwrap();
    m.add_filter(
        4,
        Box::new(TailFilter::new(
            FilterKind::Transmitter,
            FilterRole::BestEffort,
            RecordingSink::new("tx", log.clone()),
        )),
    )
    .unwrap();

    m.create_path(1, 1, 4, -1, -1, vec![2, 3]).unwrap();
    m.connect_path(1).unwrap();

    assert!(wait_until(Duration::from_secs(2), || log.lock().len() >= 20));
    m.remove_path(1).unwrap();

    // No worker touches any of the removed filters any more.
    let settled = log.lock().len();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(log.lock().len(), settled);

    assert_eq!(m.path_count(), 0);
    assert_eq!(m.filter_count(), 0);
    let state = m.get_state();
    assert!(state["filters"].as_array().unwrap().is_empty());
    assert!(state["paths"].as_array().unwrap().is_empty());

    m.stop().unwrap();
}

/// A slow consumer behind a 4-slot lossless queue: memory stays bounded,
/// delay is visible, nothing is lost.
#[test]
fn back_pressure_visible_producer_skip() {
    let mut m = manager();

    let source = PatternSource::video(CodecTag::H264, WIDTH, HEIGHT, 500)
        .with_queue_capacity(4)
        .with_queue_policy(DropPolicy::Skip);
    m.add_filter(1, Box::new(HeadFilter::new(FilterKind::Receiver, FilterRole::Network, source)))
        .unwrap();
    m.add_filter(
        2,
        Box::new(TailFilter::new(
            FilterKind::Transmitter,
            FilterRole::BestEffort,
            CountingSink::new().with_hold_us(6_000),
        )),
    )
    .unwrap();
    m.create_path(1, 1, 2, -1, -1, vec![]).unwrap();
    m.connect_path(1).unwrap();

    std::thread::sleep(Duration::from_millis(300));

    let state = m.get_state();
    let path = &state["paths"][0];
    let avg_delay = path["avgDelay"].as_u64().unwrap();
    let lost = path["lostBlocks"].as_u64().unwrap();
    assert!(avg_delay > 5_000, "expected visible delay, got {avg_delay} µs");
    assert_eq!(lost, 0, "producer-skip must not lose blocks");

    m.stop().unwrap();
}

/// The same slow consumer with an overwrite-oldest queue surfaces loss in
/// the lost-blocks counter instead.
#[test]
fn back_pressure_visible_overwrite() {
    let mut m = manager();

    let source = PatternSource::video(CodecTag::H264, WIDTH, HEIGHT, 500)
        .with_queue_capacity(4)
        .with_queue_policy(DropPolicy::OverwriteOldest);
    m.add_filter(1, Box::new(HeadFilter::new(FilterKind::Receiver, FilterRole::Network, source)))
        .unwrap();
    m.add_filter(
        2,
        Box::new(TailFilter::new(
            FilterKind::Transmitter,
            FilterRole::BestEffort,
            CountingSink::new().with_hold_us(6_000),
        )),
    )
    .unwrap();
    m.create_path(1, 1, 2, -1, -1, vec![]).unwrap();
    m.connect_path(1).unwrap();

    std::thread::sleep(Duration::from_millis(200));
    let first = m.get_state()["paths"][0]["lostBlocks"].as_u64().unwrap();
    std::thread::sleep(Duration::from_millis(200));
    let second = m.get_state()["paths"][0]["lostBlocks"].as_u64().unwrap();

    assert!(first > 0, "lossy queue should be dropping");
    assert!(second > first, "loss should keep accruing");

    m.stop().unwrap();
}

/// A splitter feeds every connected output one copy of each input frame.
#[test]
fn splitter_fans_out_per_writer() {
    let mut m = manager();
    let log = observation_log();

    let source = PatternSource::video(CodecTag::RawVideo, WIDTH, HEIGHT, 25)
        .with_limit(30)
        .with_interval_us(500);
    m.add_filter(1, Box::new(HeadFilter::new(FilterKind::Receiver, FilterRole::Network, source)))
        .unwrap();
    m.add_filter(
        2,
        Box::new(OneToManyFilter::new(
            FilterKind::VideoSplitter,
            FilterRole::BestEffort,
            CopySplitter::new(raw_video_spec()),
        )),
    )
    .unwrap();
    for (id, tag) in [(3, "branch-a"), (4, "branch-b")] {
        m.add_filter(
            id,
            Box::new(TailFilter::new(
                FilterKind::Transmitter,
                FilterRole::BestEffort,
                RecordingSink::new(tag, log.clone()),
            )),
        )
        .unwrap();
    }

    m.create_path(1, 2, 3, -1, -1, vec![]).unwrap();
    m.connect_path(1).unwrap();
    m.create_path(2, 2, 4, -1, -1, vec![]).unwrap();
    m.connect_path(2).unwrap();
    m.create_path(3, 1, 2, -1, -1, vec![]).unwrap();
    m.connect_path(3).unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        let log = log.lock();
        ["branch-a", "branch-b"].iter().all(|tag| log.iter().filter(|o| o.tag == *tag).count() >= 30)
    }));

    let a: Vec<u64> = observations_for(&log, "branch-a").iter().map(|o| o.pts).collect();
    let b: Vec<u64> = observations_for(&log, "branch-b").iter().map(|o| o.pts).collect();
    assert_eq!(a, b, "both branches must observe the same frames in order");

    m.stop().unwrap();
}

/// A second path from an already-connected writer attaches as a shared
/// reader of the same queue instead of a second writer.
#[test]
fn grouped_fanout_shares_one_writer() {
    let mut m = manager();
    let log = observation_log();

    let source = PatternSource::video(CodecTag::H264, WIDTH, HEIGHT, 25)
        .with_limit(30)
        .with_interval_us(500);
    m.add_filter(1, Box::new(HeadFilter::new(FilterKind::Receiver, FilterRole::Network, source)))
        .unwrap();
    // Hold the source back until the whole fan-out is wired.
    m.suspend_filter(1).unwrap();
    for (id, tag) in [(2, "primary"), (3, "grouped")] {
        m.add_filter(
            id,
            Box::new(TailFilter::new(
                FilterKind::Transmitter,
                FilterRole::BestEffort,
                RecordingSink::new(tag, log.clone()),
            )),
        )
        .unwrap();
    }

    // Both paths name the same origin writer explicitly.
    m.create_path(1, 1, 2, 5, -1, vec![]).unwrap();
    m.connect_path(1).unwrap();
    m.create_path(2, 1, 3, 5, -1, vec![]).unwrap();
    m.connect_path(2).unwrap();
    m.resume_filter(1).unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        let log = log.lock();
        ["primary", "grouped"].iter().all(|tag| log.iter().filter(|o| o.tag == *tag).count() >= 30)
    }));

    let primary: Vec<u64> = observations_for(&log, "primary").iter().map(|o| o.pts).collect();
    let grouped: Vec<u64> = observations_for(&log, "grouped").iter().map(|o| o.pts).collect();
    assert_eq!(primary.len(), 30);
    assert_eq!(primary, grouped, "shared readers must observe the same stream");

    // A third attach to the same edge from an existing endpoint is refused.
    m.create_path(3, 1, 2, 5, -1, vec![]).unwrap();
    assert!(m.connect_path(3).is_err());

    m.stop().unwrap();
}

/// Events drained at the top of an invocation are visible to the same
/// invocation's frame processing; delayed events are not.
#[test]
fn events_atomic_with_frame_processing() {
    let clock = Arc::new(EngineClock::new());
    let log = observation_log();

    let head = FilterHandle::new(
        1,
        Box::new(HeadFilter::new(
            FilterKind::Receiver,
            FilterRole::Network,
            ToneSource::new(2, 48_000, 64, 1000),
        )),
        clock.clone(),
    );
    let mixer = FilterHandle::new(
        2,
        Box::new(ManyToOneFilter::new(
            FilterKind::AudioMixer,
            FilterRole::BestEffort,
            PcmMixer::new(2, 48_000),
        )),
        clock.clone(),
    );
    let tail = FilterHandle::new(
        3,
        Box::new(TailFilter::new(
            FilterKind::Transmitter,
            FilterRole::BestEffort,
            RecordingSink::new("mix", log.clone()),
        )),
        clock.clone(),
    );

    connect_endpoints(&head, DEFAULT_ID, &mixer, 1, &clock).unwrap();
    connect_endpoints(&mixer, DEFAULT_ID, &tail, DEFAULT_ID, &clock).unwrap();

    let run = |handle: &FilterHandle| {
        handle.filter.lock().process();
    };

    // Unity gain on the first cycle.
    run(&head);
    run(&mixer);
    run(&tail);

    // Gain change enqueued before the next invocation is observed by it.
    mixer.push_event(fc_engine::Event::new("setChannelGain", json!({"reader": 1, "gain": 0.5})));
    run(&head);
    run(&mixer);
    run(&tail);

    // A far-future event must not be observed yet.
    mixer.push_event(
        fc_engine::Event::new("setChannelGain", json!({"reader": 1, "gain": 0.25}))
            .at(clock.now_us() + 60_000_000),
    );
    run(&head);
    run(&mixer);
    run(&tail);

    let seen = observations_for(&log, "mix");
    assert_eq!(seen.len(), 3);
    assert_eq!(seen[0].first_sample, 1000);
    assert_eq!(seen[1].first_sample, 500);
    assert_eq!(seen[2].first_sample, 500);
}
