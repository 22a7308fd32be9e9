//! Simulated data streams: stream configs, worker threads and buffers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};

use glam::{DMat4, DVec3};
use half::f16;
use parking_lot::ReentrantMutex;

use super::{invalid, Inner, RuntimeCall, SimulatedConfig, SimulatedRuntime};
use crate::runtime::*;

/// Frames kept per stream before unlocked buffers are recycled.
const BUFFER_HISTORY: i64 = 4;

pub(super) struct SimBuffer {
    pub(super) stream: StreamId,
    pub(super) frame_number: i64,
    pub(super) channel: usize,
    pub(super) metadata: BufferMetadata,
    pub(super) data: Arc<[u8]>,
    pub(super) locks: u32,
    /// Its stream stopped while the client still held it.
    pub(super) orphaned: bool,
}

pub(super) struct ActiveStream {
    channels: ChannelFlags,
    callback: StreamCallback,
    stop: Arc<AtomicBool>,
    /// Held while a frame is being delivered. Reentrant so a callback may stop its own stream.
    delivery: Arc<ReentrantMutex<()>>,
    worker: Option<JoinHandle<()>>,
}

pub(super) fn stream_configs(config: &SimulatedConfig) -> Vec<StreamConfig> {
    let (width, height) = config.color_stream_size;
    vec![
        StreamConfig {
            stream_id: StreamId(0),
            stream_type: StreamType::DistortedColor,
            buffer_type: BufferType::Cpu,
            format: StreamFormat::Nv12,
            channel_flags: ChannelFlags::ALL,
            frame_rate: 90,
            width,
            height,
            row_stride: width,
        },
        StreamConfig {
            stream_id: StreamId(1),
            stream_type: StreamType::DistortedColor,
            buffer_type: BufferType::Gpu,
            format: StreamFormat::Nv12,
            channel_flags: ChannelFlags::ALL,
            frame_rate: 90,
            width,
            height,
            row_stride: width,
        },
        StreamConfig {
            stream_id: StreamId(2),
            stream_type: StreamType::EnvironmentCubemap,
            buffer_type: BufferType::Cpu,
            format: StreamFormat::Rgba16Float,
            channel_flags: ChannelFlags::FIRST,
            frame_rate: 1,
            width: 16,
            height: 16 * 6,
            row_stride: 16 * 8,
        },
        StreamConfig {
            stream_id: StreamId(3),
            stream_type: StreamType::EyeCamera,
            buffer_type: BufferType::Cpu,
            format: StreamFormat::Y8,
            channel_flags: ChannelFlags::ALL,
            frame_rate: 200,
            width: 32,
            height: 24,
            row_stride: 32,
        },
    ]
}

pub(super) fn camera_intrinsics(channel: usize) -> CameraIntrinsics {
    CameraIntrinsics {
        model: CameraIntrinsicsModel::Omnidir,
        principal_point_x: if channel == 0 { 0.502 } else { 0.498 },
        principal_point_y: 0.5,
        focal_length_x: 0.62,
        focal_length_y: 0.62,
        distortion_coefficients: [-0.12, 0.03, 0.0, 1.1, 0.0005, -0.0003],
    }
}

pub(super) fn camera_extrinsics(channel: usize) -> DMat4 {
    let offset = if channel == 0 { -0.032 } else { 0.032 };
    DMat4::from_translation(DVec3::new(offset, 0.0, -0.08))
}

pub(super) fn start(
    inner: &Arc<Inner>,
    stream: StreamId,
    channels: ChannelFlags,
    callback: StreamCallback,
) -> RuntimeResult<()> {
    let config = stream_configs(&inner.config)
        .into_iter()
        .find(|c| c.stream_id == stream)
        .ok_or_else(|| invalid("unknown stream"))?;
    if !config.channel_flags.contains(channels) {
        return Err(invalid("channels not supported by stream"));
    }

    let mut streams = inner.streams.lock();
    if streams.contains_key(&stream) {
        return Err(RuntimeError::new(20, "stream already running"));
    }

    let stop = Arc::new(AtomicBool::new(false));
    let delivery = Arc::new(ReentrantMutex::new(()));
    let worker = match inner.config.stream_frame_interval {
        Some(interval) => {
            let weak = Arc::downgrade(inner);
            let stop = Arc::clone(&stop);
            let delivery = Arc::clone(&delivery);
            let callback = Arc::clone(&callback);
            let handle = thread::Builder::new()
                .name(format!("data-stream-{}", stream.0))
                .spawn(move || worker_loop(weak, stream, channels, callback, stop, delivery, interval))
                .map_err(|e| RuntimeError::new(21, format!("failed to spawn stream worker: {e}")))?;
            Some(handle)
        }
        None => None,
    };

    streams.insert(
        stream,
        ActiveStream {
            channels,
            callback,
            stop,
            delivery,
            worker,
        },
    );
    drop(streams);

    inner.record(RuntimeCall::StartStream(stream));
    inner
        .state
        .lock()
        .events
        .push_back(Event::DataStreamStart { stream_id: stream });
    Ok(())
}

pub(super) fn stop(inner: &Arc<Inner>, stream: StreamId) -> RuntimeResult<()> {
    let active = inner
        .streams
        .lock()
        .remove(&stream)
        .ok_or_else(|| invalid("stream not running"))?;
    finish(inner, stream, active);
    Ok(())
}

fn finish(inner: &Inner, stream: StreamId, mut active: ActiveStream) {
    active.stop.store(true, Ordering::Release);
    if let Some(worker) = active.worker.take() {
        join_worker(worker);
    }
    // Waits for a frame that is being delivered manually.
    drop(active.delivery.lock());

    {
        let mut state = inner.state.lock();
        state.buffers.retain(|_, b| b.stream != stream || b.locks > 0);
        for buffer in state.buffers.values_mut() {
            if buffer.stream == stream {
                buffer.orphaned = true;
            }
        }
        state.buffer_index.retain(|(s, _, _), _| *s != stream);
        state
            .events
            .push_back(Event::DataStreamStop { stream_id: stream });
    }
    inner.record(RuntimeCall::StopStream(stream));
}

fn join_worker(worker: JoinHandle<()>) {
    let current: ThreadId = thread::current().id();
    if worker.thread().id() == current {
        // Stopped from its own callback; the loop exits on the stop flag.
        return;
    }
    if worker.join().is_err() {
        log::error!("Data stream worker panicked");
    }
}

fn worker_loop(
    runtime: Weak<Inner>,
    stream: StreamId,
    channels: ChannelFlags,
    callback: StreamCallback,
    stop: Arc<AtomicBool>,
    delivery: Arc<ReentrantMutex<()>>,
    interval: std::time::Duration,
) {
    while !stop.load(Ordering::Acquire) {
        thread::sleep(interval);
        let _delivering = delivery.lock();
        if stop.load(Ordering::Acquire) {
            break;
        }
        let Some(inner) = runtime.upgrade() else {
            break;
        };
        deliver(&inner, stream, channels, &callback);
    }
}

/// Produce one frame of `stream` and run its callback on the calling thread.
fn deliver(inner: &Inner, stream: StreamId, channels: ChannelFlags, callback: &StreamCallback) {
    let Some(config) = stream_configs(&inner.config)
        .into_iter()
        .find(|c| c.stream_id == stream)
    else {
        return;
    };

    let frame = {
        let mut state = inner.state.lock();
        let counter = state.stream_frames.entry(stream).or_insert(0);
        *counter += 1;
        let frame_number = *counter;
        let timestamp = state.now_ns;

        for channel in 0..2 {
            if !channels.contains(ChannelFlags::from_index(channel)) {
                continue;
            }
            let id = BufferId(state.next_buffer);
            state.next_buffer += 1;
            let data: Arc<[u8]> = synthesize(&config, frame_number, channel).into();
            state.buffers.insert(
                id,
                SimBuffer {
                    stream,
                    frame_number,
                    channel,
                    metadata: BufferMetadata {
                        format: config.format,
                        buffer_type: config.buffer_type,
                        byte_size: data.len() as i32,
                        row_stride: config.row_stride,
                        width: config.width,
                        height: config.height,
                    },
                    data,
                    locks: 0,
                    orphaned: false,
                },
            );
            state.buffer_index.insert((stream, frame_number, channel), id);
        }

        // Recycle old buffers nobody holds.
        let oldest = frame_number - BUFFER_HISTORY;
        let recycled: Vec<BufferId> = state
            .buffers
            .iter()
            .filter(|(_, b)| b.stream == stream && b.frame_number <= oldest && b.locks == 0)
            .map(|(id, _)| *id)
            .collect();
        for id in recycled {
            if let Some(buffer) = state.buffers.remove(&id) {
                state
                    .buffer_index
                    .remove(&(buffer.stream, buffer.frame_number, buffer.channel));
            }
        }

        let metadata = match config.stream_type {
            StreamType::DistortedColor => {
                let exposure = match state.camera.get(&CameraPropertyType::ExposureTime) {
                    Some(p) => match p.value {
                        CameraPropertyValue::Double(v) => v,
                        CameraPropertyValue::Int(v) => v as f64,
                        CameraPropertyValue::Bool(_) => 0.0,
                    },
                    None => 0.0,
                };
                let temperature = match state.camera.get(&CameraPropertyType::WhiteBalance) {
                    Some(p) => match p.value {
                        CameraPropertyValue::Int(v) => v as f64,
                        CameraPropertyValue::Double(v) => v,
                        CameraPropertyValue::Bool(_) => 0.0,
                    },
                    None => 0.0,
                };
                StreamFrameMetadata::DistortedColor(DistortedColorMetadata {
                    timestamp,
                    ev: 8.0,
                    exposure_time: exposure,
                    white_balance_temperature: temperature,
                    camera_calibration_constant: 1.0,
                })
            }
            StreamType::EnvironmentCubemap => {
                StreamFrameMetadata::EnvironmentCubemap(EnvironmentCubemapMetadata {
                    timestamp,
                    mode: state.mr.cubemap.mode,
                    color_temperature: 6500.0,
                })
            }
            StreamType::EyeCamera => {
                StreamFrameMetadata::EyeCamera(EyeCameraMetadata { timestamp })
            }
        };

        let mut data_flags = DataFlags::empty();
        if !channels.is_empty() {
            data_flags |= DataFlags::BUFFER;
        }
        if config.stream_type == StreamType::DistortedColor {
            data_flags |= DataFlags::INTRINSICS | DataFlags::EXTRINSICS;
        }

        StreamFrame {
            stream_type: config.stream_type,
            id: stream,
            frame_number,
            channels,
            data_flags,
            hmd_pose: DMat4::IDENTITY,
            metadata,
        }
    };

    inner.record(RuntimeCall::StreamCallback {
        stream,
        frame_number: frame.frame_number,
    });
    callback(&frame);
}

/// Deterministic test pattern for one channel.
fn synthesize(config: &StreamConfig, frame_number: i64, channel: usize) -> Vec<u8> {
    let width = config.width as usize;
    let height = config.height as usize;
    let stride = config.row_stride as usize;
    let seed = frame_number as usize + channel * 7;

    match config.format {
        StreamFormat::Nv12 => {
            let mut data = vec![0u8; stride * height * 3 / 2];
            for y in 0..height {
                for x in 0..width {
                    data[y * stride + x] = (16 + (x + y + seed) % 220) as u8;
                }
            }
            let uv = &mut data[stride * height..];
            for y in 0..height / 2 {
                for x in (0..width).step_by(2) {
                    uv[y * stride + x] = (96 + (x / 2) % 64) as u8;
                    uv[y * stride + x + 1] = (160 - (y % 64)) as u8;
                }
            }
            data
        }
        StreamFormat::Y8 => {
            let mut data = vec![0u8; stride * height];
            for y in 0..height {
                for x in 0..width {
                    data[y * stride + x] = ((x * 255) / width.max(1)) as u8 ^ (seed as u8 & 0x0f);
                }
            }
            data
        }
        StreamFormat::Rgba16Float => {
            let mut pixels = vec![f16::ZERO; stride / 2 * height];
            for y in 0..height {
                let row = &mut pixels[y * stride / 2..];
                for x in 0..width {
                    row[x * 4] = f16::from_f32(x as f32 / width as f32);
                    row[x * 4 + 1] = f16::from_f32(y as f32 / height as f32);
                    row[x * 4 + 2] = f16::from_f32(0.5);
                    row[x * 4 + 3] = f16::ONE;
                }
            }
            bytemuck::cast_slice(&pixels).to_vec()
        }
    }
}

impl SimulatedRuntime {
    /// Deliver one frame of a running stream on the calling thread.
    ///
    /// Returns `false` if the stream is not running.
    pub fn pump_stream_frame(&self, stream: StreamId) -> bool {
        let (channels, callback, delivery) = {
            let streams = self.inner.streams.lock();
            match streams.get(&stream) {
                Some(active) => (
                    active.channels,
                    Arc::clone(&active.callback),
                    Arc::clone(&active.delivery),
                ),
                None => return false,
            }
        };
        let _delivering = delivery.lock();
        if !self.inner.streams.lock().contains_key(&stream) {
            return false;
        }
        deliver(&self.inner, stream, channels, &callback);
        true
    }

    /// Number of stream buffers currently locked by the client.
    pub fn locked_buffer_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .buffers
            .values()
            .filter(|b| b.locks > 0)
            .count()
    }

    pub fn running_stream_count(&self) -> usize {
        self.inner.streams.lock().len()
    }

    pub(super) fn stop_all_streams(&self) {
        let active: Vec<(StreamId, ActiveStream)> = self.inner.streams.lock().drain().collect();
        for (stream, active) in active {
            finish(&self.inner, stream, active);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for (_, active) in self.streams.get_mut().drain() {
            active.stop.store(true, Ordering::Release);
            if let Some(worker) = active.worker {
                join_worker(worker);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_callback(counter: &Arc<AtomicUsize>) -> StreamCallback {
        let counter = Arc::clone(counter);
        Arc::new(move |_frame: &StreamFrame| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_manual_pump_delivers_buffers() {
        let runtime = SimulatedRuntime::default();
        let frames = Arc::new(AtomicUsize::new(0));
        runtime
            .start_data_stream(StreamId(0), ChannelFlags::ALL, counting_callback(&frames))
            .unwrap();

        assert!(runtime.pump_stream_frame(StreamId(0)));
        assert_eq!(frames.load(Ordering::SeqCst), 1);

        let left = runtime.buffer_id(StreamId(0), 1, 0).unwrap();
        let right = runtime.buffer_id(StreamId(0), 1, 1).unwrap();
        assert_ne!(left, right);
        assert!(runtime.buffer_cpu_data(left).is_err());

        runtime.lock_data_stream_buffer(left).unwrap();
        let metadata = runtime.buffer_metadata(left).unwrap();
        let data = runtime.buffer_cpu_data(left).unwrap();
        assert_eq!(data.len() as i32, metadata.byte_size);
        assert_eq!(metadata.format, StreamFormat::Nv12);
        runtime.unlock_data_stream_buffer(left);

        runtime.stop_data_stream(StreamId(0)).unwrap();
        assert!(!runtime.pump_stream_frame(StreamId(0)));
        assert!(runtime.buffer_id(StreamId(0), 1, 0).is_none());
    }

    #[test]
    fn test_buffer_held_across_stop() {
        let runtime = SimulatedRuntime::default();
        let frames = Arc::new(AtomicUsize::new(0));
        runtime
            .start_data_stream(StreamId(3), ChannelFlags::FIRST, counting_callback(&frames))
            .unwrap();
        assert!(runtime.pump_stream_frame(StreamId(3)));
        let buffer = runtime.buffer_id(StreamId(3), 1, 0).unwrap();
        runtime.lock_data_stream_buffer(buffer).unwrap();

        runtime.stop_data_stream(StreamId(3)).unwrap();
        assert_eq!(runtime.locked_buffer_count(), 1);
        assert!(runtime.buffer_cpu_data(buffer).is_ok());

        runtime.unlock_data_stream_buffer(buffer);
        assert_eq!(runtime.locked_buffer_count(), 0);
        assert!(runtime.buffer_metadata(buffer).is_err());
    }

    #[test]
    fn test_unsupported_channels_rejected() {
        let runtime = SimulatedRuntime::default();
        let frames = Arc::new(AtomicUsize::new(0));
        let result = runtime.start_data_stream(
            StreamId(2),
            ChannelFlags::ALL,
            counting_callback(&frames),
        );
        assert!(result.is_err());
        assert_eq!(runtime.running_stream_count(), 0);
    }

    #[test]
    fn test_worker_stops_before_stop_returns() {
        let runtime = SimulatedRuntime::new(SimulatedConfig {
            stream_frame_interval: Some(std::time::Duration::from_millis(1)),
            ..Default::default()
        });
        let frames = Arc::new(AtomicUsize::new(0));
        runtime
            .start_data_stream(StreamId(3), ChannelFlags::FIRST, counting_callback(&frames))
            .unwrap();

        while frames.load(Ordering::SeqCst) < 3 {
            thread::yield_now();
        }
        runtime.stop_data_stream(StreamId(3)).unwrap();
        let after_stop = frames.load(Ordering::SeqCst);
        thread::sleep(std::time::Duration::from_millis(10));
        assert_eq!(frames.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_cubemap_pattern_size() {
        let configs = stream_configs(&SimulatedConfig::default());
        let cubemap = configs
            .iter()
            .find(|c| c.stream_type == StreamType::EnvironmentCubemap)
            .unwrap();
        let data = synthesize(cubemap, 1, 0);
        assert_eq!(data.len(), (cubemap.row_stride * cubemap.height) as usize);
    }
}
