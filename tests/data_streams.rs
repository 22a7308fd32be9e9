//! Data stream integration tests.
//!
//! Streams run either on the simulated runtime's worker threads or are pumped
//! by hand. The runtime call log is the ground truth for buffer lock pairing.

mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rstest::rstest;

use common::{base_config, collecting_handler, scratch_dir, ClientHarness};
use varjo_mr_client::runtime::{
    BufferId, ChannelFlags, Runtime, RuntimeCall, StreamFormat, StreamId, StreamType,
};
use varjo_mr_client::streaming::{self, snapshot_file_name, Frame, FrameHandler};
use varjo_mr_client::{
    ClientConfig, DataStreamer, SimulatedConfig, SimulatedRuntime, StreamRequest,
};

const COLOR: StreamId = StreamId(0);
const CUBEMAP: StreamId = StreamId(2);
const EYE: StreamId = StreamId(3);

fn threaded_runtime() -> Arc<SimulatedRuntime> {
    Arc::new(SimulatedRuntime::new(SimulatedConfig {
        stream_frame_interval: Some(Duration::from_millis(1)),
        ..Default::default()
    }))
}

fn counting_handler() -> (FrameHandler, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&count);
    let handler: FrameHandler = Arc::new(move |_frame: &Frame| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    (handler, count)
}

/// Lock and unlock counts per buffer from the runtime call log.
fn lock_balance(runtime: &SimulatedRuntime) -> HashMap<BufferId, (usize, usize)> {
    let mut balance: HashMap<BufferId, (usize, usize)> = HashMap::new();
    for call in runtime.calls() {
        match call {
            RuntimeCall::LockBuffer(buffer) => balance.entry(buffer).or_default().0 += 1,
            RuntimeCall::UnlockBuffer(buffer) => balance.entry(buffer).or_default().1 += 1,
            _ => {}
        }
    }
    balance
}

fn wait_for(condition: impl Fn() -> bool) {
    for _ in 0..2000 {
        if condition() {
            return;
        }
        thread::sleep(Duration::from_millis(1));
    }
    panic!("condition not reached in time");
}

// ============================================================================
// Delivery
// ============================================================================

/// Two channels of one color frame arrive as two frames.
#[test]
fn test_color_frame_delivered_per_channel() {
    let runtime = Arc::new(SimulatedRuntime::default());
    let locked_during_delivery = Arc::new(AtomicUsize::new(0));
    let frames = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let handler: FrameHandler = {
        let runtime = Arc::clone(&runtime);
        let locked = Arc::clone(&locked_during_delivery);
        let frames = Arc::clone(&frames);
        Arc::new(move |frame: &Frame| {
            locked.fetch_max(runtime.locked_buffer_count(), Ordering::SeqCst);
            frames.lock().push(frame.metadata);
        })
    };
    let streamer = DataStreamer::new(runtime.clone(), Some(handler), None);
    streamer
        .start_stream(
            StreamType::DistortedColor,
            StreamFormat::Nv12,
            ChannelFlags::FIRST | ChannelFlags::SECOND,
        )
        .unwrap();

    runtime.clear_calls();
    assert!(runtime.pump_stream_frame(COLOR));

    let frames = frames.lock();
    assert_eq!(frames.len(), 2);
    let mut channels: Vec<_> = frames.iter().map(|m| m.channel_index).collect();
    channels.sort_unstable();
    assert_eq!(channels, vec![0, 1]);
    assert_eq!(frames[0].frame_number(), frames[1].frame_number());
    assert!(frames.iter().all(|m| m.stream_type() == StreamType::DistortedColor));

    // Only the buffer being delivered is held, and nothing after the callback returns.
    assert_eq!(locked_during_delivery.load(Ordering::SeqCst), 1);
    assert_eq!(runtime.locked_buffer_count(), 0);

    let balance = lock_balance(&runtime);
    assert_eq!(balance.len(), 2);
    assert!(balance.values().all(|&counts| counts == (1, 1)));
}

#[rstest]
#[case::color(StreamType::DistortedColor, StreamFormat::Nv12, COLOR, ChannelFlags::FIRST, 1)]
#[case::color_stereo(StreamType::DistortedColor, StreamFormat::Nv12, COLOR, ChannelFlags::ALL, 2)]
#[case::eye(StreamType::EyeCamera, StreamFormat::Y8, EYE, ChannelFlags::ALL, 2)]
#[case::cubemap(StreamType::EnvironmentCubemap, StreamFormat::Rgba16Float, CUBEMAP, ChannelFlags::ALL, 1)]
fn test_frames_per_pump(
    #[case] stream_type: StreamType,
    #[case] format: StreamFormat,
    #[case] id: StreamId,
    #[case] channels: ChannelFlags,
    #[case] per_frame: usize,
) {
    let runtime = Arc::new(SimulatedRuntime::default());
    let (handler, frames) = collecting_handler();
    let streamer = DataStreamer::new(runtime.clone(), Some(handler), None);
    streamer.start_stream(stream_type, format, channels).unwrap();

    for _ in 0..3 {
        runtime.pump_stream_frame(id);
    }
    let frames = frames.lock();
    assert_eq!(frames.len(), 3 * per_frame);
    for frame in frames.iter() {
        let layout = frame.metadata.buffer.expect("cpu buffer");
        assert_eq!(layout.format, format);
        assert_eq!(frame.data.len(), layout.byte_size as usize);
    }
    assert_eq!(streamer.frames_received(stream_type, format), 3);
}

// ============================================================================
// Buffer locks
// ============================================================================

#[rstest]
#[case::immediate(false)]
#[case::delayed(true)]
fn test_every_lock_has_one_unlock(#[case] delayed: bool) {
    let runtime = threaded_runtime();
    let (handler, delivered) = counting_handler();
    let streamer = DataStreamer::new(runtime.clone(), Some(handler), None);
    streamer.set_delayed_buffer_handling(delayed);
    streamer
        .start_stream(StreamType::DistortedColor, StreamFormat::Nv12, ChannelFlags::ALL)
        .unwrap();
    streamer
        .start_stream(StreamType::EyeCamera, StreamFormat::Y8, ChannelFlags::ALL)
        .unwrap();

    for _ in 0..20 {
        thread::sleep(Duration::from_millis(2));
        streamer.handle_delayed_buffers(false);
    }
    streamer.stop_stream(StreamType::DistortedColor, StreamFormat::Nv12).unwrap();
    streamer.stop_stream(StreamType::EyeCamera, StreamFormat::Y8).unwrap();
    streamer.handle_delayed_buffers(false);

    assert!(delivered.load(Ordering::SeqCst) > 0);
    assert_eq!(runtime.locked_buffer_count(), 0);
    let balance = lock_balance(&runtime);
    assert!(!balance.is_empty());
    for (buffer, (locks, unlocks)) in balance {
        assert_eq!(locks, 1, "buffer {buffer:?} locked {locks} times");
        assert_eq!(unlocks, 1, "buffer {buffer:?} unlocked {unlocks} times");
    }
}

#[test]
fn test_ignored_delayed_buffers_are_unlocked() {
    let runtime = Arc::new(SimulatedRuntime::default());
    let (handler, delivered) = counting_handler();
    let streamer = DataStreamer::new(runtime.clone(), Some(handler), None);
    streamer.set_delayed_buffer_handling(true);
    streamer
        .start_stream(StreamType::EyeCamera, StreamFormat::Y8, ChannelFlags::ALL)
        .unwrap();

    for _ in 0..4 {
        runtime.pump_stream_frame(EYE);
    }
    assert_eq!(streamer.pending_delayed_buffers(), 8);
    assert_eq!(runtime.locked_buffer_count(), 8);

    streamer.handle_delayed_buffers(true);
    assert_eq!(delivered.load(Ordering::SeqCst), 0);
    assert_eq!(streamer.pending_delayed_buffers(), 0);
    assert_eq!(runtime.locked_buffer_count(), 0);
}

#[test]
fn test_switching_to_immediate_delivers_queue() {
    let runtime = Arc::new(SimulatedRuntime::default());
    let (handler, delivered) = counting_handler();
    let streamer = DataStreamer::new(runtime.clone(), Some(handler), None);
    streamer.set_delayed_buffer_handling(true);
    streamer
        .start_stream(StreamType::EyeCamera, StreamFormat::Y8, ChannelFlags::FIRST)
        .unwrap();
    runtime.pump_stream_frame(EYE);
    assert_eq!(runtime.locked_buffer_count(), 1);

    streamer.set_delayed_buffer_handling(false);
    assert_eq!(delivered.load(Ordering::SeqCst), 1);
    assert_eq!(runtime.locked_buffer_count(), 0);

    runtime.pump_stream_frame(EYE);
    assert_eq!(delivered.load(Ordering::SeqCst), 2);
    assert_eq!(runtime.locked_buffer_count(), 0);
}

// ============================================================================
// Stop
// ============================================================================

#[rstest]
#[case::color(StreamType::DistortedColor, StreamFormat::Nv12, COLOR)]
#[case::eye(StreamType::EyeCamera, StreamFormat::Y8, EYE)]
fn test_no_callback_after_stop(
    #[case] stream_type: StreamType,
    #[case] format: StreamFormat,
    #[case] id: StreamId,
) {
    let runtime = threaded_runtime();
    let (handler, delivered) = counting_handler();
    let streamer = DataStreamer::new(runtime.clone(), Some(handler), None);
    streamer.start_stream(stream_type, format, ChannelFlags::ALL).unwrap();
    wait_for(|| delivered.load(Ordering::SeqCst) >= 4);

    streamer.stop_stream(stream_type, format).unwrap();
    assert!(!streamer.is_streaming(stream_type, format));
    runtime.clear_calls();
    let after_stop = delivered.load(Ordering::SeqCst);

    thread::sleep(Duration::from_millis(20));
    assert_eq!(delivered.load(Ordering::SeqCst), after_stop);
    assert_eq!(
        runtime.count_calls(|c| matches!(c, RuntimeCall::StreamCallback { stream, .. } if *stream == id)),
        0
    );
    assert_eq!(runtime.running_stream_count(), 0);
}

#[test]
fn test_restart_after_stop() {
    let runtime = Arc::new(SimulatedRuntime::default());
    let (handler, delivered) = counting_handler();
    let streamer = DataStreamer::new(runtime.clone(), Some(handler), None);

    for round in 1..=3 {
        streamer
            .start_stream(StreamType::EyeCamera, StreamFormat::Y8, ChannelFlags::FIRST)
            .unwrap();
        runtime.pump_stream_frame(EYE);
        streamer.stop_stream(StreamType::EyeCamera, StreamFormat::Y8).unwrap();
        assert!(!runtime.pump_stream_frame(EYE));
        assert_eq!(delivered.load(Ordering::SeqCst), round);
    }
    assert_eq!(
        runtime.count_calls(|c| matches!(c, RuntimeCall::StartStream(..))),
        3
    );
}

#[test]
fn test_missing_stream_config_is_rejected() {
    let runtime = Arc::new(SimulatedRuntime::default());
    let streamer = DataStreamer::new(runtime.clone(), None, None);
    let err = streamer
        .start_stream(StreamType::EyeCamera, StreamFormat::Nv12, ChannelFlags::ALL)
        .unwrap_err();
    assert_eq!(err.kind(), varjo_mr_client::ErrorKind::Stream);
    assert!(!streamer.is_streaming_any());
    assert_eq!(runtime.running_stream_count(), 0);
}

// ============================================================================
// Client integration
// ============================================================================

#[test]
fn test_client_drains_delayed_buffers_each_step() {
    let mut harness = ClientHarness::new(ClientConfig {
        streams: vec![StreamRequest::new(
            StreamType::EyeCamera,
            StreamFormat::Y8,
            ChannelFlags::ALL,
        )],
        delayed_buffer_handling: true,
        snapshot_dir: scratch_dir("delayed"),
        ..base_config()
    });

    harness.runtime.pump_stream_frame(EYE);
    harness.runtime.pump_stream_frame(EYE);
    assert!(harness.frames.lock().is_empty());
    assert_eq!(harness.runtime.locked_buffer_count(), 4);

    harness.step();
    assert_eq!(harness.frames.lock().len(), 4);
    assert_eq!(harness.runtime.locked_buffer_count(), 0);

    harness.client.shutdown();
    assert_eq!(harness.runtime.running_stream_count(), 0);
}

#[test]
fn test_client_snapshot_round_trip() {
    let dir = scratch_dir("client-snapshot");
    let _ = std::fs::remove_dir_all(&dir);
    let harness = ClientHarness::new(ClientConfig {
        streams: vec![StreamRequest::new(
            StreamType::DistortedColor,
            StreamFormat::Nv12,
            ChannelFlags::ALL,
        )],
        snapshot_dir: dir.clone(),
        ..base_config()
    });

    harness.runtime.pump_stream_frame(COLOR);
    let frames = harness.frames.lock().clone();
    assert_eq!(frames.len(), 2);

    for frame in &frames {
        let base = if frame.metadata.channel_index == 0 {
            "rgbLeft"
        } else {
            "rgbRight"
        };
        let path = dir.join(snapshot_file_name(
            base,
            COLOR,
            frame.metadata.frame_number(),
            frame.metadata.buffer_id,
        ));
        let layout = frame.metadata.buffer.expect("cpu buffer");
        let expected = streaming::to_rgba8(&layout, &frame.data).unwrap();
        let saved = image::open(&path)
            .unwrap_or_else(|e| panic!("{} not readable: {e}", path.display()))
            .to_rgba8();
        assert_eq!(saved.width(), layout.width as u32);
        assert_eq!(saved.height(), layout.height as u32);
        for (a, b) in saved.as_raw().iter().zip(&expected) {
            assert!(a.abs_diff(*b) <= 1);
        }
    }

    // Later frames are only saved on request.
    harness.runtime.pump_stream_frame(COLOR);
    let saved = std::fs::read_dir(&dir).unwrap().count();
    assert_eq!(saved, 2);

    let _ = std::fs::remove_dir_all(&dir);
}
