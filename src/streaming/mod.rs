//! Data-stream subscriptions.
//!
//! [`DataStreamer`] starts and stops runtime data streams and hands their frames to
//! a single consumer. The runtime calls back on one worker thread per stream. In
//! immediate mode the frame is copied out and the buffer unlocked before the
//! callback returns. In delayed mode the locked buffer is queued and processed on
//! the main thread by [`DataStreamer::handle_delayed_buffers`].
//!
//! Every buffer the manager locks is unlocked exactly once, on every path.

pub mod bmp;
pub mod convert;
pub mod undistort;

pub use bmp::{save_buffer_bmp, save_rgba_bmp, snapshot_file_name, SnapshotError};
pub use convert::{
    distorted_yuv_to_rectified_rgba, to_rgba8, to_rgba8_into, yuv_to_rgb, ConvertError,
    Y8_TO_RGBA,
};
pub use undistort::Undistorter;

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use glam::DMat4;
use parking_lot::ReentrantMutex;

use crate::error::{ClientError, ClientResult};
use crate::runtime::{
    BufferId, BufferMetadata, BufferType, CameraIntrinsics, ChannelFlags, CubemapMode, DataFlags,
    Runtime, StreamCallback, StreamConfig, StreamFormat, StreamFrame, StreamFrameMetadata,
    StreamId, StreamType,
};

/// Locked buffers that may wait for the main thread at once.
pub const DELAYED_QUEUE_CAPACITY: usize = 64;

const STATS_INTERVAL: Duration = Duration::from_secs(1);

/// Everything known about one channel of a stream frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameMetadata {
    pub stream_frame: StreamFrame,
    pub channel_index: usize,
    pub timestamp: i64,
    pub extrinsics: DMat4,
    pub intrinsics: CameraIntrinsics,
    /// Layout of the pixel data. `None` for metadata-only frames.
    pub buffer: Option<BufferMetadata>,
    pub buffer_id: BufferId,
}

impl FrameMetadata {
    pub fn frame_number(&self) -> i64 {
        self.stream_frame.frame_number
    }

    pub fn stream_type(&self) -> StreamType {
        self.stream_frame.stream_type
    }
}

/// A frame handed to the consumer. `data` is a copy of the CPU buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub metadata: FrameMetadata,
    pub data: Vec<u8>,
}

pub type FrameHandler = Arc<dyn Fn(&Frame) + Send + Sync>;

struct StreamData {
    stream_type: StreamType,
    format: StreamFormat,
    channels: ChannelFlags,
    /// Distinguishes restarts of the same stream id.
    session: u64,
    snapshot_requested: bool,
    frames_since_report: u64,
    total_frames: u64,
}

struct Management {
    streams: HashMap<StreamId, StreamData>,
    next_session: u64,
    last_report: Instant,
}

struct DelayedBuffer {
    session: u64,
    metadata: FrameMetadata,
    snapshot: bool,
}

struct Shared {
    runtime: Arc<dyn Runtime>,
    on_frame: Option<FrameHandler>,
    snapshot_dir: Option<PathBuf>,
    running: AtomicBool,
    delayed: AtomicBool,
    management: ReentrantMutex<RefCell<Management>>,
    delayed_tx: Sender<DelayedBuffer>,
    delayed_rx: Receiver<DelayedBuffer>,
}

/// Data-stream manager. See the module docs.
pub struct DataStreamer {
    shared: Arc<Shared>,
}

impl DataStreamer {
    /// `snapshot_dir` enables BMP snapshots; `None` skips them.
    pub fn new(
        runtime: Arc<dyn Runtime>,
        on_frame: Option<FrameHandler>,
        snapshot_dir: Option<PathBuf>,
    ) -> Self {
        let (delayed_tx, delayed_rx) = crossbeam_channel::bounded(DELAYED_QUEUE_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                runtime,
                on_frame,
                snapshot_dir,
                running: AtomicBool::new(true),
                delayed: AtomicBool::new(false),
                management: ReentrantMutex::new(RefCell::new(Management {
                    streams: HashMap::new(),
                    next_session: 0,
                    last_report: Instant::now(),
                })),
                delayed_tx,
                delayed_rx,
            }),
        }
    }

    pub fn delayed_buffer_handling(&self) -> bool {
        self.shared.delayed.load(Ordering::Acquire)
    }

    /// Switch delivery mode. Turning delayed mode off processes what is queued.
    pub fn set_delayed_buffer_handling(&self, enabled: bool) {
        let was = self.shared.delayed.swap(enabled, Ordering::AcqRel);
        if was != enabled {
            log::info!(
                "Delayed buffer handling: {}",
                if enabled { "ON" } else { "OFF" }
            );
            if !enabled {
                self.handle_delayed_buffers(false);
            }
        }
    }

    /// Configuration that would be used for `stream_type`/`format`.
    pub fn config_for(&self, stream_type: StreamType, format: StreamFormat) -> Option<StreamConfig> {
        self.shared
            .runtime
            .data_stream_configs()
            .into_iter()
            .find(|c| c.stream_type == stream_type && c.format == format && c.buffer_type == BufferType::Cpu)
    }

    /// Format of the first CPU configuration of `stream_type`.
    pub fn format_for(&self, stream_type: StreamType) -> Option<StreamFormat> {
        self.shared
            .runtime
            .data_stream_configs()
            .into_iter()
            .find(|c| c.stream_type == stream_type && c.buffer_type == BufferType::Cpu)
            .map(|c| c.format)
    }

    pub fn log_stream_configs(&self) {
        let configs = self.shared.runtime.data_stream_configs();
        log::info!("{} data stream configs available", configs.len());
        for c in configs {
            log::info!(
                "  stream {}: {:?} {} {:?} channels={:?} {}x{} stride={} @ {} fps",
                c.stream_id.0,
                c.stream_type,
                c.format.name(),
                c.buffer_type,
                c.channel_flags,
                c.width,
                c.height,
                c.row_stride,
                c.frame_rate
            );
        }
    }

    /// Start delivering `stream_type`/`format` frames for `channels`.
    ///
    /// Environment cubemaps only have the first channel. Starting a stream that
    /// already runs is a no-op.
    pub fn start_stream(
        &self,
        stream_type: StreamType,
        format: StreamFormat,
        channels: ChannelFlags,
    ) -> ClientResult<()> {
        let channels = if stream_type == StreamType::EnvironmentCubemap {
            channels & ChannelFlags::FIRST
        } else {
            channels
        };
        let stream_error = |reason: String| ClientError::Stream {
            stream_type,
            format,
            reason,
        };

        if self.is_streaming(stream_type, format) {
            log::warn!("Already streaming {stream_type:?} {}", format.name());
            return Ok(());
        }

        let config = self
            .shared
            .runtime
            .data_stream_configs()
            .into_iter()
            .find(|c| {
                c.stream_type == stream_type
                    && c.buffer_type == BufferType::Cpu
                    && c.channel_flags.contains(channels)
                    && c.format == format
            })
            .ok_or_else(|| stream_error("no matching stream configuration".into()))?;
        let stream_id = config.stream_id;

        {
            let guard = self.shared.management.lock();
            let mut management = guard.borrow_mut();
            if management.streams.is_empty() {
                management.last_report = Instant::now();
            }
            let session = management.next_session;
            management.next_session += 1;
            management.streams.insert(
                stream_id,
                StreamData {
                    stream_type,
                    format,
                    channels,
                    session,
                    snapshot_requested: true,
                    frames_since_report: 0,
                    total_frames: 0,
                },
            );
        }
        self.shared.running.store(true, Ordering::Release);

        let weak = Arc::downgrade(&self.shared);
        let callback: StreamCallback = Arc::new(move |frame: &StreamFrame| {
            if let Some(shared) = Weak::upgrade(&weak) {
                shared.on_stream_frame(frame);
            }
        });

        if let Err(e) = self
            .shared
            .runtime
            .start_data_stream(stream_id, channels, callback)
        {
            let guard = self.shared.management.lock();
            guard.borrow_mut().streams.remove(&stream_id);
            return Err(stream_error(e.to_string()));
        }

        log::info!(
            "Started {stream_type:?} {} stream {} channels={channels:?}",
            format.name(),
            stream_id.0
        );
        Ok(())
    }

    /// Stop `stream_type`/`format`. No frame of it is delivered after this returns.
    pub fn stop_stream(&self, stream_type: StreamType, format: StreamFormat) -> ClientResult<()> {
        let Some(stream_id) = self.stream_id(stream_type, format) else {
            log::warn!("Not streaming {stream_type:?} {}", format.name());
            return Ok(());
        };

        // The lock is not held here: the runtime waits for a running callback.
        let result = self.shared.runtime.stop_data_stream(stream_id);
        {
            let guard = self.shared.management.lock();
            guard.borrow_mut().streams.remove(&stream_id);
        }

        match result {
            Ok(()) => {
                log::info!("Stopped {stream_type:?} {} stream {}", format.name(), stream_id.0);
                Ok(())
            }
            Err(e) => Err(ClientError::Stream {
                stream_type,
                format,
                reason: e.to_string(),
            }),
        }
    }

    fn stream_id(&self, stream_type: StreamType, format: StreamFormat) -> Option<StreamId> {
        let guard = self.shared.management.lock();
        let management = guard.borrow();
        management
            .streams
            .iter()
            .find(|(_, s)| s.stream_type == stream_type && s.format == format)
            .map(|(id, _)| *id)
    }

    pub fn is_streaming(&self, stream_type: StreamType, format: StreamFormat) -> bool {
        self.stream_id(stream_type, format).is_some()
    }

    pub fn is_streaming_type(&self, stream_type: StreamType) -> bool {
        let guard = self.shared.management.lock();
        let management = guard.borrow();
        management
            .streams
            .values()
            .any(|s| s.stream_type == stream_type)
    }

    pub fn is_streaming_any(&self) -> bool {
        let guard = self.shared.management.lock();
        let streaming = !guard.borrow().streams.is_empty();
        streaming
    }

    /// Channels requested for a running stream.
    pub fn streaming_channels(&self, stream_type: StreamType, format: StreamFormat) -> Option<ChannelFlags> {
        let guard = self.shared.management.lock();
        let management = guard.borrow();
        management
            .streams
            .values()
            .find(|s| s.stream_type == stream_type && s.format == format)
            .map(|s| s.channels)
    }

    /// Frames received for a running stream since it started.
    pub fn frames_received(&self, stream_type: StreamType, format: StreamFormat) -> u64 {
        let guard = self.shared.management.lock();
        let management = guard.borrow();
        management
            .streams
            .values()
            .find(|s| s.stream_type == stream_type && s.format == format)
            .map_or(0, |s| s.total_frames)
    }

    /// Save the next frame of every running stream of `stream_type`.
    pub fn request_snapshot(&self, stream_type: StreamType) {
        let guard = self.shared.management.lock();
        let mut management = guard.borrow_mut();
        for stream in management
            .streams
            .values_mut()
            .filter(|s| s.stream_type == stream_type)
        {
            stream.snapshot_requested = true;
        }
    }

    /// Number of locked buffers waiting for [`Self::handle_delayed_buffers`].
    pub fn pending_delayed_buffers(&self) -> usize {
        self.shared.delayed_rx.len()
    }

    /// Process, or with `ignore` just release, every queued buffer.
    ///
    /// Buffers of streams stopped since they were queued are released without
    /// delivery.
    pub fn handle_delayed_buffers(&self, ignore: bool) {
        for entry in self.shared.delayed_rx.try_iter() {
            let deliver = !ignore && self.shared.is_current(entry.metadata.stream_frame.id, entry.session);
            if deliver {
                self.shared.process_locked(&entry.metadata, entry.snapshot);
            }
            self.shared
                .runtime
                .unlock_data_stream_buffer(entry.metadata.buffer_id);
        }
    }

    /// One-line summary of the running streams for status output.
    pub fn status_line(&self) -> String {
        let guard = self.shared.management.lock();
        let management = guard.borrow();
        if management.streams.is_empty() {
            return "Streams: none".to_string();
        }
        let mut streams: Vec<_> = management.streams.iter().collect();
        streams.sort_by_key(|(id, _)| **id);
        let mut line = String::from("Streams:");
        for (id, s) in streams {
            let _ = write!(
                line,
                " [{} {:?} {} {:?} frames={}]",
                id.0,
                s.stream_type,
                s.format.name(),
                s.channels,
                s.total_frames
            );
        }
        line
    }

    /// Stop every stream and release queued buffers. Safe to call twice.
    pub fn shutdown(&self) {
        let ids: Vec<StreamId> = {
            let guard = self.shared.management.lock();
            self.shared.running.store(false, Ordering::Release);
            let ids = guard.borrow().streams.keys().copied().collect();
            ids
        };
        for id in ids {
            if let Err(e) = self.shared.runtime.stop_data_stream(id) {
                log::warn!("Failed to stop data stream {}: {e}", id.0);
            }
            let guard = self.shared.management.lock();
            guard.borrow_mut().streams.remove(&id);
        }
        self.handle_delayed_buffers(true);
    }
}

impl Drop for DataStreamer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for DataStreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStreamer")
            .field("delayed", &self.delayed_buffer_handling())
            .field("pending", &self.pending_delayed_buffers())
            .finish_non_exhaustive()
    }
}

/// Snapshot file base name for a channel of `frame`.
fn snapshot_base(frame: &StreamFrame, channel: usize) -> &'static str {
    match frame.metadata {
        StreamFrameMetadata::DistortedColor(_) => {
            if channel == 0 {
                "rgbLeft"
            } else {
                "rgbRight"
            }
        }
        StreamFrameMetadata::EnvironmentCubemap(m) => match m.mode {
            CubemapMode::AutoAdapt => "cube_adapted",
            CubemapMode::Fixed6500K => "cube",
        },
        StreamFrameMetadata::EyeCamera(_) => {
            if channel == 0 {
                "eyeLeft"
            } else {
                "eyeRight"
            }
        }
    }
}

impl Shared {
    fn is_current(&self, stream: StreamId, session: u64) -> bool {
        let guard = self.management.lock();
        let current = guard
            .borrow()
            .streams
            .get(&stream)
            .is_some_and(|s| s.session == session);
        current
    }

    /// Runs on the runtime's stream thread.
    fn on_stream_frame(&self, frame: &StreamFrame) {
        let (channels, session, snapshot) = {
            let guard = self.management.lock();
            if !self.running.load(Ordering::Acquire) {
                return;
            }
            let mut management = guard.borrow_mut();
            let now = Instant::now();
            if now - management.last_report >= STATS_INTERVAL {
                management.last_report = now;
                for (id, s) in management.streams.iter_mut() {
                    log::debug!(
                        "Stream {} {:?} {}: {} frames/s, {} total",
                        id.0,
                        s.stream_type,
                        s.format.name(),
                        s.frames_since_report,
                        s.total_frames
                    );
                    s.frames_since_report = 0;
                }
            }
            let Some(stream) = management.streams.get_mut(&frame.id) else {
                log::warn!("Frame {} for unknown stream {}", frame.frame_number, frame.id.0);
                return;
            };
            stream.frames_since_report += 1;
            stream.total_frames += 1;
            let snapshot = std::mem::take(&mut stream.snapshot_requested);
            (stream.channels, stream.session, snapshot)
        };

        if frame.stream_type == StreamType::EnvironmentCubemap
            && !frame.channels.contains(ChannelFlags::FIRST)
        {
            log::warn!("Cubemap frame {} without the first channel", frame.frame_number);
            return;
        }

        let timestamp = frame.metadata.timestamp();
        if channels.is_empty() {
            self.handle_buffer(
                FrameMetadata {
                    stream_frame: *frame,
                    channel_index: 0,
                    timestamp,
                    extrinsics: DMat4::IDENTITY,
                    intrinsics: CameraIntrinsics::default(),
                    buffer: None,
                    buffer_id: BufferId::INVALID,
                },
                session,
                false,
            );
            return;
        }

        for channel in 0..2 {
            let flag = ChannelFlags::from_index(channel);
            if !frame.channels.contains(flag) || !channels.contains(flag) {
                continue;
            }

            let extrinsics = if frame.data_flags.contains(DataFlags::EXTRINSICS) {
                self.runtime
                    .camera_extrinsics(frame.id, frame.frame_number, channel)
                    .unwrap_or_else(|e| {
                        log::warn!("No extrinsics for stream {} channel {channel}: {e}", frame.id.0);
                        DMat4::IDENTITY
                    })
            } else {
                DMat4::IDENTITY
            };
            let intrinsics = if frame.data_flags.contains(DataFlags::INTRINSICS) {
                self.runtime
                    .camera_intrinsics(frame.id, frame.frame_number, channel)
                    .unwrap_or_else(|e| {
                        log::warn!("No intrinsics for stream {} channel {channel}: {e}", frame.id.0);
                        CameraIntrinsics::default()
                    })
            } else {
                CameraIntrinsics::default()
            };

            let buffer_id = if frame.data_flags.contains(DataFlags::BUFFER) {
                self.runtime
                    .buffer_id(frame.id, frame.frame_number, channel)
            } else {
                None
            };
            let Some(buffer_id) = buffer_id else {
                log::warn!(
                    "No buffer for stream {} frame {} channel {channel}",
                    frame.id.0,
                    frame.frame_number
                );
                continue;
            };

            self.handle_buffer(
                FrameMetadata {
                    stream_frame: *frame,
                    channel_index: channel,
                    timestamp,
                    extrinsics,
                    intrinsics,
                    buffer: None,
                    buffer_id,
                },
                session,
                snapshot,
            );
        }
    }

    fn handle_buffer(&self, mut metadata: FrameMetadata, session: u64, snapshot: bool) {
        if !metadata.buffer_id.is_valid() {
            self.deliver(Frame {
                metadata,
                data: Vec::new(),
            });
            return;
        }

        let buffer = metadata.buffer_id;
        if let Err(e) = self.runtime.lock_data_stream_buffer(buffer) {
            log::warn!("Failed to lock buffer {}: {e}", buffer.0);
            return;
        }
        match self.runtime.buffer_metadata(buffer) {
            Ok(layout) => metadata.buffer = Some(layout),
            Err(e) => {
                log::warn!("No metadata for buffer {}: {e}", buffer.0);
                self.runtime.unlock_data_stream_buffer(buffer);
                return;
            }
        }

        if self.delayed.load(Ordering::Acquire) {
            let entry = DelayedBuffer {
                session,
                metadata,
                snapshot,
            };
            match self.delayed_tx.try_send(entry) {
                Ok(()) => {}
                Err(TrySendError::Full(entry) | TrySendError::Disconnected(entry)) => {
                    log::warn!(
                        "Delayed buffer queue full, dropping frame {}",
                        entry.metadata.frame_number()
                    );
                    self.runtime.unlock_data_stream_buffer(buffer);
                }
            }
            return;
        }

        self.process_locked(&metadata, snapshot);
        self.runtime.unlock_data_stream_buffer(buffer);
    }

    /// Copy out a locked buffer and hand it to the consumer. Does not unlock.
    fn process_locked(&self, metadata: &FrameMetadata, snapshot: bool) {
        let Some(layout) = metadata.buffer else {
            return;
        };
        if layout.buffer_type == BufferType::Gpu {
            log::warn!("GPU stream buffers are not supported, skipping buffer {}", metadata.buffer_id.0);
            return;
        }
        let data = match self.runtime.buffer_cpu_data(metadata.buffer_id) {
            Ok(data) => data,
            Err(e) => {
                log::warn!("No CPU data for buffer {}: {e}", metadata.buffer_id.0);
                return;
            }
        };

        if snapshot {
            if let Some(dir) = &self.snapshot_dir {
                self.save_snapshot(dir, metadata, &layout, &data);
            }
        }

        self.deliver(Frame {
            metadata: *metadata,
            data: data.to_vec(),
        });
    }

    fn save_snapshot(&self, dir: &Path, metadata: &FrameMetadata, layout: &BufferMetadata, data: &[u8]) {
        let frame = &metadata.stream_frame;
        let name = snapshot_file_name(
            snapshot_base(frame, metadata.channel_index),
            frame.id,
            frame.frame_number,
            metadata.buffer_id,
        );
        if let Err(e) = std::fs::create_dir_all(dir) {
            log::warn!("Cannot create snapshot directory {}: {e}", dir.display());
            return;
        }
        if let Err(e) = save_buffer_bmp(&dir.join(name), layout, data) {
            log::warn!("Snapshot of buffer {} failed: {e}", metadata.buffer_id.0);
        }
    }

    fn deliver(&self, frame: Frame) {
        if let Some(on_frame) = &self.on_frame {
            on_frame(&frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{RuntimeCall, SimulatedRuntime};
    use parking_lot::Mutex;

    fn collecting() -> (FrameHandler, Arc<Mutex<Vec<Frame>>>) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&frames);
        let handler: FrameHandler = Arc::new(move |frame: &Frame| sink.lock().push(frame.clone()));
        (handler, frames)
    }

    fn streamer(runtime: &Arc<SimulatedRuntime>) -> (DataStreamer, Arc<Mutex<Vec<Frame>>>) {
        let (handler, frames) = collecting();
        let runtime: Arc<dyn Runtime> = runtime.clone();
        (DataStreamer::new(runtime, Some(handler), None), frames)
    }

    #[test]
    fn test_immediate_delivery_per_channel() {
        let runtime = Arc::new(SimulatedRuntime::default());
        let (streamer, frames) = streamer(&runtime);
        streamer
            .start_stream(StreamType::DistortedColor, StreamFormat::Nv12, ChannelFlags::ALL)
            .unwrap();
        assert!(streamer.is_streaming(StreamType::DistortedColor, StreamFormat::Nv12));

        assert!(runtime.pump_stream_frame(StreamId(0)));
        let frames = frames.lock();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].metadata.channel_index, 0);
        assert_eq!(frames[1].metadata.channel_index, 1);
        assert_eq!(frames[0].metadata.frame_number(), frames[1].metadata.frame_number());
        let layout = frames[0].metadata.buffer.unwrap();
        assert_eq!(frames[0].data.len() as i32, layout.byte_size);
        assert_ne!(frames[0].metadata.extrinsics, frames[1].metadata.extrinsics);
        assert_eq!(runtime.locked_buffer_count(), 0);
    }

    #[test]
    fn test_delayed_delivery() {
        let runtime = Arc::new(SimulatedRuntime::default());
        let (streamer, frames) = streamer(&runtime);
        streamer.set_delayed_buffer_handling(true);
        streamer
            .start_stream(StreamType::EyeCamera, StreamFormat::Y8, ChannelFlags::ALL)
            .unwrap();

        runtime.pump_stream_frame(StreamId(3));
        assert!(frames.lock().is_empty());
        assert_eq!(streamer.pending_delayed_buffers(), 2);
        assert_eq!(runtime.locked_buffer_count(), 2);

        streamer.handle_delayed_buffers(false);
        assert_eq!(frames.lock().len(), 2);
        assert_eq!(runtime.locked_buffer_count(), 0);

        runtime.pump_stream_frame(StreamId(3));
        streamer.handle_delayed_buffers(true);
        assert_eq!(frames.lock().len(), 2);
        assert_eq!(runtime.locked_buffer_count(), 0);
    }

    #[test]
    fn test_delayed_buffers_of_stopped_stream_are_released() {
        let runtime = Arc::new(SimulatedRuntime::default());
        let (streamer, frames) = streamer(&runtime);
        streamer.set_delayed_buffer_handling(true);
        streamer
            .start_stream(StreamType::EyeCamera, StreamFormat::Y8, ChannelFlags::FIRST)
            .unwrap();
        runtime.pump_stream_frame(StreamId(3));
        streamer
            .stop_stream(StreamType::EyeCamera, StreamFormat::Y8)
            .unwrap();
        assert_eq!(runtime.locked_buffer_count(), 1);

        streamer.handle_delayed_buffers(false);
        assert!(frames.lock().is_empty());
        assert_eq!(runtime.locked_buffer_count(), 0);
    }

    #[test]
    fn test_lock_unlock_pairing() {
        let runtime = Arc::new(SimulatedRuntime::default());
        let (streamer, _frames) = streamer(&runtime);
        streamer
            .start_stream(StreamType::DistortedColor, StreamFormat::Nv12, ChannelFlags::ALL)
            .unwrap();
        for _ in 0..3 {
            runtime.pump_stream_frame(StreamId(0));
        }
        streamer.set_delayed_buffer_handling(true);
        runtime.pump_stream_frame(StreamId(0));
        drop(streamer);

        let calls = runtime.calls();
        let locks = calls
            .iter()
            .filter(|c| matches!(c, RuntimeCall::LockBuffer(_)))
            .count();
        let unlocks = calls
            .iter()
            .filter(|c| matches!(c, RuntimeCall::UnlockBuffer(_)))
            .count();
        assert_eq!(locks, 8);
        assert_eq!(locks, unlocks);
        assert_eq!(runtime.running_stream_count(), 0);
    }

    #[test]
    fn test_failed_start_leaves_no_state() {
        let runtime = Arc::new(SimulatedRuntime::default());
        let (streamer, _frames) = streamer(&runtime);
        let err = streamer
            .start_stream(StreamType::EyeCamera, StreamFormat::Nv12, ChannelFlags::ALL)
            .unwrap_err();
        assert!(matches!(err, ClientError::Stream { .. }));
        assert!(!streamer.is_streaming(StreamType::EyeCamera, StreamFormat::Nv12));
        assert!(!streamer.is_streaming_any());
        assert_eq!(runtime.running_stream_count(), 0);
    }

    #[test]
    fn test_repeated_start_is_noop() {
        let runtime = Arc::new(SimulatedRuntime::default());
        let (streamer, _frames) = streamer(&runtime);
        for _ in 0..2 {
            streamer
                .start_stream(StreamType::EyeCamera, StreamFormat::Y8, ChannelFlags::ALL)
                .unwrap();
        }
        assert_eq!(runtime.running_stream_count(), 1);
    }

    #[test]
    fn test_cubemap_masked_to_first_channel() {
        let runtime = Arc::new(SimulatedRuntime::default());
        let (streamer, frames) = streamer(&runtime);
        streamer
            .start_stream(
                StreamType::EnvironmentCubemap,
                StreamFormat::Rgba16Float,
                ChannelFlags::ALL,
            )
            .unwrap();
        assert_eq!(
            streamer.streaming_channels(StreamType::EnvironmentCubemap, StreamFormat::Rgba16Float),
            Some(ChannelFlags::FIRST)
        );
        runtime.pump_stream_frame(StreamId(2));
        assert_eq!(frames.lock().len(), 1);
    }

    #[test]
    fn test_metadata_only_stream() {
        let runtime = Arc::new(SimulatedRuntime::default());
        let (streamer, frames) = streamer(&runtime);
        streamer
            .start_stream(StreamType::DistortedColor, StreamFormat::Nv12, ChannelFlags::empty())
            .unwrap();
        runtime.pump_stream_frame(StreamId(0));
        let frames = frames.lock();
        assert_eq!(frames.len(), 1);
        assert!(!frames[0].metadata.buffer_id.is_valid());
        assert!(frames[0].data.is_empty());
        assert_eq!(runtime.locked_buffer_count(), 0);
    }

    #[test]
    fn test_no_frames_after_stop() {
        let runtime = Arc::new(SimulatedRuntime::default());
        let (streamer, frames) = streamer(&runtime);
        streamer
            .start_stream(StreamType::EyeCamera, StreamFormat::Y8, ChannelFlags::FIRST)
            .unwrap();
        runtime.pump_stream_frame(StreamId(3));
        streamer
            .stop_stream(StreamType::EyeCamera, StreamFormat::Y8)
            .unwrap();
        assert!(!runtime.pump_stream_frame(StreamId(3)));
        assert_eq!(frames.lock().len(), 1);
        assert!(!streamer.is_streaming_type(StreamType::EyeCamera));
    }

    #[test]
    fn test_snapshot_written_once() {
        let dir = std::env::temp_dir().join(format!("varjo-mr-client-streams-{}", std::process::id()));
        let runtime = Arc::new(SimulatedRuntime::default());
        let shared: Arc<dyn Runtime> = runtime.clone();
        let streamer = DataStreamer::new(shared, None, Some(dir.clone()));
        streamer
            .start_stream(StreamType::EyeCamera, StreamFormat::Y8, ChannelFlags::FIRST)
            .unwrap();
        runtime.pump_stream_frame(StreamId(3));
        runtime.pump_stream_frame(StreamId(3));

        let names: Vec<String> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("eyeLeft_sid3_frm1_bid"));

        streamer.request_snapshot(StreamType::EyeCamera);
        runtime.pump_stream_frame(StreamId(3));
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 2);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_status_line() {
        let runtime = Arc::new(SimulatedRuntime::default());
        let (streamer, _frames) = streamer(&runtime);
        assert_eq!(streamer.status_line(), "Streams: none");
        streamer
            .start_stream(StreamType::EyeCamera, StreamFormat::Y8, ChannelFlags::ALL)
            .unwrap();
        runtime.pump_stream_frame(StreamId(3));
        assert!(streamer.status_line().contains("EyeCamera Y8"));
        assert!(streamer.status_line().contains("frames=1"));
        assert_eq!(streamer.format_for(StreamType::EnvironmentCubemap), Some(StreamFormat::Rgba16Float));
    }
}
