//! In-process runtime
//!
//! `SimulatedRuntime` implements the whole [`Runtime`] surface without a
//! compositor: frame pacing on a virtual clock, swap-chain rings, an event
//! queue, configuration locks with a simulated second client, the camera and
//! chroma-key models, a marker world and one worker thread per data stream.
//!
//! Every call that matters for frame ordering and lock discipline is appended
//! to a call log so tests can assert against it.

mod mr;
mod streams;
mod world;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use glam::{DMat4, DVec3, Vec2};
use parking_lot::Mutex;

use super::projection::projection_from_tangents;
use super::*;

use self::mr::SimCameraProperty;
use self::streams::{ActiveStream, SimBuffer};
use self::world::SimWorld;

/// Calls recorded by [`SimulatedRuntime`].
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeCall {
    WaitSync { frame_number: i64 },
    BeginFrame,
    EndFrame(SubmitInfoLayers),
    CreateSwapChain(SwapChainId, SwapChainConfig),
    FreeSwapChain(SwapChainId),
    AcquireImage(SwapChainId, u32),
    ReleaseImage(SwapChainId),
    SetMirrorConfig(usize),
    CreateOcclusionMesh { view: usize },
    RequestGazeCalibration,
    SetPriority(i32),
    StartStream(StreamId),
    StopStream(StreamId),
    StreamCallback { stream: StreamId, frame_number: i64 },
    LockBuffer(BufferId),
    UnlockBuffer(BufferId),
    Lock(LockType, bool),
    Unlock(LockType),
    SetCameraPropertyMode(CameraPropertyType, CameraPropertyMode),
    SetCameraPropertyValue(CameraPropertyType, CameraPropertyValue),
    ResetCameraProperties,
    SetChromaKeyConfig(usize),
    SetVideoRender(bool),
    SetVideoDepthEstimation(bool),
    SetVrViewOffset(f64),
    SetChromaKey(bool),
    SetEnvironmentCubemapConfig(CubemapMode),
    FillVariableRateShading { view: u32 },
    WorldInit,
    WorldSync,
    SetMarkerTimeouts { count: usize, timeout_ns: i64 },
    SetMarkerFlags { count: usize, flags: ObjectMarkerFlags },
}

/// Behaviour of a [`SimulatedRuntime`].
#[derive(Debug, Clone)]
pub struct SimulatedConfig {
    /// Views reported by the headset: 4 for context and focus per eye.
    pub view_count: usize,
    /// Virtual time between frames.
    pub frame_interval: Duration,
    /// Sleep in `wait_sync` so frames follow `frame_interval` in real time.
    pub paced: bool,
    pub mr_available: bool,
    /// Worker interval for data streams. `None` delivers frames only through
    /// [`SimulatedRuntime::pump_stream_frame`].
    pub stream_frame_interval: Option<Duration>,
    pub chroma_key_slots: usize,
    /// Width and height of the distorted color stream.
    pub color_stream_size: (i32, i32),
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            view_count: 4,
            frame_interval: Duration::from_nanos(11_111_111),
            paced: false,
            mr_available: true,
            stream_frame_interval: None,
            chroma_key_slots: 4,
            color_stream_size: (64, 48),
        }
    }
}

/// Snapshot of the mixed-reality switches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimMrState {
    pub video_render: bool,
    pub video_depth_estimation: bool,
    pub chroma_key: bool,
    pub vr_view_offset: f64,
    pub priority: i32,
    pub cubemap: EnvironmentCubemapConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockHolder {
    Client,
    OtherClient,
}

struct SimSwapChain {
    config: SwapChainConfig,
    images: Vec<NativeTexture>,
    next_index: u32,
    acquired: Option<u32>,
}

struct SimState {
    shut_down: bool,
    mr_connected: bool,
    frame_number: i64,
    now_ns: i64,
    next_deadline: Option<Instant>,
    in_frame: bool,
    gaze: Option<Gaze>,
    events: VecDeque<Event>,

    swap_chains: HashMap<SwapChainId, SimSwapChain>,
    next_swap_chain: u64,
    next_native_texture: u64,
    fail_next_acquire: bool,
    /// Swap chains that may still be created before creation starts failing.
    swap_chain_budget: Option<usize>,
    mirror_views: Vec<MirrorView>,
    last_submit: Option<SubmitInfoLayers>,
    mesh_revision: Vec<u32>,

    locks: HashMap<LockType, LockHolder>,
    mr: SimMrState,
    camera: BTreeMap<CameraPropertyType, SimCameraProperty>,
    chroma_slots: Vec<ChromaKeyConfig>,

    worlds: HashMap<WorldId, SimWorld>,
    next_world: u64,

    buffers: HashMap<BufferId, SimBuffer>,
    buffer_index: HashMap<(StreamId, i64, usize), BufferId>,
    next_buffer: i64,
    stream_frames: HashMap<StreamId, i64>,
}

pub(super) struct Inner {
    config: SimulatedConfig,
    state: Mutex<SimState>,
    calls: Mutex<Vec<RuntimeCall>>,
    streams: Mutex<HashMap<StreamId, ActiveStream>>,
}

impl Inner {
    fn record(&self, call: RuntimeCall) {
        self.calls.lock().push(call);
    }
}

/// Runtime implementation that runs entirely in-process.
#[derive(Clone)]
pub struct SimulatedRuntime {
    inner: Arc<Inner>,
}

const IPD: f64 = 0.064;
const HEAD_HEIGHT: f64 = 1.6;
const START_TIME_NS: i64 = 1_000_000_000;

fn not_ready(what: &str) -> RuntimeError {
    RuntimeError::new(2, format!("{what} not ready"))
}

fn invalid(what: impl Into<String>) -> RuntimeError {
    RuntimeError::new(1, what)
}

impl SimulatedRuntime {
    pub fn new(config: SimulatedConfig) -> Self {
        let views = config.view_count;
        let slots = config.chroma_key_slots.max(1);
        let mut chroma_slots = vec![ChromaKeyConfig::Disabled; slots];
        chroma_slots[0] = mr::default_chroma_key_config();

        let state = SimState {
            shut_down: false,
            mr_connected: config.mr_available,
            frame_number: 0,
            now_ns: START_TIME_NS,
            next_deadline: None,
            in_frame: false,
            gaze: None,
            events: VecDeque::new(),
            swap_chains: HashMap::new(),
            next_swap_chain: 1,
            next_native_texture: 1,
            fail_next_acquire: false,
            swap_chain_budget: None,
            mirror_views: Vec::new(),
            last_submit: None,
            mesh_revision: vec![0; views],
            locks: HashMap::new(),
            mr: SimMrState {
                video_render: false,
                video_depth_estimation: false,
                chroma_key: false,
                vr_view_offset: 0.0,
                priority: 0,
                cubemap: EnvironmentCubemapConfig::default(),
            },
            camera: mr::default_camera_properties(),
            chroma_slots,
            worlds: HashMap::new(),
            next_world: 1,
            buffers: HashMap::new(),
            buffer_index: HashMap::new(),
            next_buffer: 1,
            stream_frames: HashMap::new(),
        };

        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(state),
                calls: Mutex::new(Vec::new()),
                streams: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &SimulatedConfig {
        &self.inner.config
    }

    /// All recorded calls, oldest first.
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.inner.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.inner.calls.lock().clear();
    }

    /// Number of recorded calls matching `predicate`.
    pub fn count_calls(&self, predicate: impl Fn(&RuntimeCall) -> bool) -> usize {
        self.inner.calls.lock().iter().filter(|c| predicate(c)).count()
    }

    /// Queue an event for `poll_event`.
    pub fn push_event(&self, event: Event) {
        self.inner.state.lock().events.push_back(event);
    }

    pub fn pending_event_count(&self) -> usize {
        self.inner.state.lock().events.len()
    }

    pub fn set_gaze(&self, gaze: Option<Gaze>) {
        self.inner.state.lock().gaze = gaze;
    }

    /// Make the next swap-chain acquire fail as if no image were ready.
    pub fn fail_next_acquire(&self) {
        self.inner.state.lock().fail_next_acquire = true;
    }

    /// Let `count` more swap chains be created, then fail every further creation.
    pub fn limit_swap_chain_creations(&self, count: usize) {
        self.inner.state.lock().swap_chain_budget = Some(count);
    }

    /// Change the occlusion mesh of `view` and queue a `VisibilityMeshChange`.
    pub fn change_visibility_mesh(&self, view: usize) {
        let mut state = self.inner.state.lock();
        if let Some(revision) = state.mesh_revision.get_mut(view) {
            *revision += 1;
        }
        state.events.push_back(Event::VisibilityMeshChange {
            view_index: view as u32,
        });
    }

    /// Report the MR device as connected or disconnected.
    pub fn set_mr_connected(&self, connected: bool) {
        self.inner.state.lock().mr_connected = connected;
        let status = if connected {
            MrDeviceStatus::Connected
        } else {
            MrDeviceStatus::Disconnected
        };
        self.push_event(Event::MrDeviceStatus(status));
    }

    /// Advance the virtual clock without producing a frame.
    pub fn advance_clock(&self, duration: Duration) {
        self.inner.state.lock().now_ns += duration.as_nanos() as i64;
    }

    pub fn last_submit(&self) -> Option<SubmitInfoLayers> {
        self.inner.state.lock().last_submit.clone()
    }

    pub fn mirror_views(&self) -> Vec<MirrorView> {
        self.inner.state.lock().mirror_views.clone()
    }

    pub fn live_swap_chain_count(&self) -> usize {
        self.inner.state.lock().swap_chains.len()
    }

    pub fn acquired_image_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .swap_chains
            .values()
            .filter(|c| c.acquired.is_some())
            .count()
    }

    pub fn mr_state(&self) -> SimMrState {
        self.inner.state.lock().mr
    }

    fn view_tangents(&self, view: usize) -> FovTangents {
        let focus = view >= 2;
        let right_eye = view % 2 == 1;
        let (inner, outer, vertical) = if focus {
            (0.35, 0.40, 0.38)
        } else {
            (1.0, 1.3, 1.1)
        };
        let (left, right) = if right_eye {
            (-inner, outer)
        } else {
            (-outer, inner)
        };
        FovTangents {
            top: vertical,
            bottom: -vertical,
            left,
            right,
        }
    }

    fn eye_view_matrix(view: usize) -> DMat4 {
        let offset = if view % 2 == 0 { -IPD * 0.5 } else { IPD * 0.5 };
        let eye = DMat4::from_translation(DVec3::new(offset, HEAD_HEIGHT, 0.0));
        eye.inverse()
    }

    fn ensure_session(state: &SimState) -> RuntimeResult<()> {
        if state.shut_down {
            Err(RuntimeError::new(100, "session is shut down"))
        } else {
            Ok(())
        }
    }
}

impl Default for SimulatedRuntime {
    fn default() -> Self {
        Self::new(SimulatedConfig::default())
    }
}

impl std::fmt::Debug for SimulatedRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("SimulatedRuntime")
            .field("frame_number", &state.frame_number)
            .field("swap_chains", &state.swap_chains.len())
            .field("streams", &self.inner.streams.lock().len())
            .finish()
    }
}

impl Runtime for SimulatedRuntime {
    fn is_available(&self) -> bool {
        !self.inner.state.lock().shut_down
    }

    fn sync_properties(&self) -> RuntimeResult<()> {
        Self::ensure_session(&self.inner.state.lock())
    }

    fn property_bool(&self, key: PropertyKey) -> Option<bool> {
        let state = self.inner.state.lock();
        match key {
            PropertyKey::MrAvailable => Some(state.mr_connected && !state.shut_down),
            PropertyKey::GazeAllowed => Some(true),
            PropertyKey::HmdConnected => Some(!state.shut_down),
            PropertyKey::UserPresence => Some(true),
        }
    }

    fn set_priority(&self, priority: i32) -> RuntimeResult<()> {
        self.inner.state.lock().mr.priority = priority;
        self.inner.record(RuntimeCall::SetPriority(priority));
        Ok(())
    }

    fn shutdown(&self) {
        self.stop_all_streams();
        let mut state = self.inner.state.lock();
        state.shut_down = true;
        state.swap_chains.clear();
        state.worlds.clear();
    }

    fn wait_sync(&self) -> RuntimeResult<FrameInfo> {
        let interval = self.inner.config.frame_interval;
        let sleep_for = {
            let mut state = self.inner.state.lock();
            Self::ensure_session(&state)?;
            if self.inner.config.paced {
                let now = Instant::now();
                let deadline = state.next_deadline.unwrap_or(now);
                state.next_deadline = Some(deadline.max(now) + interval);
                deadline.checked_duration_since(now)
            } else {
                None
            }
        };
        if let Some(duration) = sleep_for {
            thread::sleep(duration);
        }

        let frame_number = {
            let mut state = self.inner.state.lock();
            state.frame_number += 1;
            state.now_ns += interval.as_nanos() as i64;
            state.frame_number
        };
        self.inner.record(RuntimeCall::WaitSync { frame_number });

        let display_time = self.current_time();
        let views = (0..self.inner.config.view_count)
            .map(|view| ViewInfo {
                enabled: true,
                view_matrix: Self::eye_view_matrix(view),
                projection_matrix: projection_from_tangents(&self.view_tangents(view)),
            })
            .collect();

        Ok(FrameInfo {
            frame_number,
            display_time,
            views,
        })
    }

    fn view_count(&self) -> usize {
        self.inner.config.view_count
    }

    fn view_description(&self, view: usize) -> ViewDescription {
        let (width, height) = self.texture_size(TextureSizeType::Quad, view);
        ViewDescription {
            width,
            height,
            display: if view >= 2 {
                DisplayKind::Focus
            } else {
                DisplayKind::Context
            },
            eye: if view % 2 == 0 { Eye::Left } else { Eye::Right },
        }
    }

    fn texture_size(&self, size_type: TextureSizeType, view: usize) -> (i32, i32) {
        let focus = view >= 2;
        match (size_type, focus) {
            (TextureSizeType::Stereo, _) => (1152, 1152),
            (TextureSizeType::Quad, false) => (1152, 1152),
            (TextureSizeType::Quad, true) => (1536, 1536),
            (TextureSizeType::DynamicFoveation, false) => (768, 768),
            (TextureSizeType::DynamicFoveation, true) => (1024, 1024),
        }
    }

    fn fov_tangents(&self, view: usize) -> FovTangents {
        self.view_tangents(view)
    }

    fn foveated_fov_tangents(&self, view: usize, gaze: &Gaze) -> FovTangents {
        if view < 2 || gaze.forward.z >= 0.0 {
            return self.view_tangents(view);
        }
        let gx = (gaze.forward.x / -gaze.forward.z).clamp(-0.8, 0.8);
        let gy = (gaze.forward.y / -gaze.forward.z).clamp(-0.8, 0.8);
        let half = 0.3;
        FovTangents {
            top: gy + half,
            bottom: gy - half,
            left: gx - half,
            right: gx + half,
        }
    }

    fn rendering_gaze(&self) -> Option<Gaze> {
        let state = self.inner.state.lock();
        state
            .gaze
            .filter(|g| g.status == GazeStatus::Valid)
            .map(|mut g| {
                g.frame_number = state.frame_number;
                g
            })
    }

    fn request_gaze_calibration(&self) -> RuntimeResult<()> {
        self.inner.record(RuntimeCall::RequestGazeCalibration);
        Ok(())
    }

    fn current_time(&self) -> i64 {
        self.inner.state.lock().now_ns
    }

    fn frame_pose(&self, pose: PoseType) -> DMat4 {
        let offset = match pose {
            PoseType::LeftEye => -IPD * 0.5,
            PoseType::RightEye => IPD * 0.5,
            PoseType::Center => 0.0,
        };
        DMat4::from_translation(DVec3::new(offset, HEAD_HEIGHT, 0.0))
    }

    fn tracking_to_local_transform(&self) -> DMat4 {
        DMat4::IDENTITY
    }

    fn begin_frame_with_layers(&self) -> RuntimeResult<()> {
        {
            let mut state = self.inner.state.lock();
            Self::ensure_session(&state)?;
            if state.in_frame {
                return Err(invalid("frame already begun"));
            }
            state.in_frame = true;
        }
        self.inner.record(RuntimeCall::BeginFrame);
        Ok(())
    }

    fn end_frame_with_layers(&self, submit: &SubmitInfoLayers) -> RuntimeResult<()> {
        {
            let mut state = self.inner.state.lock();
            if !state.in_frame {
                return Err(invalid("end frame without begin"));
            }
            state.in_frame = false;
            state.last_submit = Some(submit.clone());
        }
        self.inner.record(RuntimeCall::EndFrame(submit.clone()));
        Ok(())
    }

    fn set_mirror_config(&self, views: &[MirrorView]) -> RuntimeResult<()> {
        self.inner.state.lock().mirror_views = views.to_vec();
        self.inner.record(RuntimeCall::SetMirrorConfig(views.len()));
        Ok(())
    }

    fn create_swap_chain(
        &self,
        _api: GraphicsApi,
        config: &SwapChainConfig,
    ) -> RuntimeResult<SwapChainId> {
        if config.number_of_textures < 2 {
            return Err(invalid("swap chain needs at least two textures"));
        }
        if config.texture_width <= 0 || config.texture_height <= 0 {
            return Err(invalid("invalid swap chain size"));
        }
        let id = {
            let mut state = self.inner.state.lock();
            Self::ensure_session(&state)?;
            match state.swap_chain_budget.as_mut() {
                Some(0) => return Err(RuntimeError::new(5, "out of swap chains")),
                Some(budget) => *budget -= 1,
                None => {}
            }
            let id = SwapChainId(state.next_swap_chain);
            state.next_swap_chain += 1;
            let first = state.next_native_texture;
            state.next_native_texture += config.number_of_textures as u64;
            let images = (0..config.number_of_textures as u64)
                .map(|i| NativeTexture(first + i))
                .collect();
            state.swap_chains.insert(
                id,
                SimSwapChain {
                    config: *config,
                    images,
                    next_index: 0,
                    acquired: None,
                },
            );
            id
        };
        self.inner.record(RuntimeCall::CreateSwapChain(id, *config));
        Ok(id)
    }

    fn acquire_swap_chain_image(&self, chain: SwapChainId) -> RuntimeResult<u32> {
        let index = {
            let mut state = self.inner.state.lock();
            if state.fail_next_acquire {
                state.fail_next_acquire = false;
                return Err(not_ready("swap chain image"));
            }
            let swap_chain = state
                .swap_chains
                .get_mut(&chain)
                .ok_or_else(|| invalid("unknown swap chain"))?;
            if swap_chain.acquired.is_some() {
                return Err(invalid("swap chain image already acquired"));
            }
            let index = swap_chain.next_index;
            swap_chain.next_index = (index + 1) % swap_chain.images.len() as u32;
            swap_chain.acquired = Some(index);
            index
        };
        self.inner.record(RuntimeCall::AcquireImage(chain, index));
        Ok(index)
    }

    fn swap_chain_image(&self, chain: SwapChainId, index: u32) -> RuntimeResult<NativeTexture> {
        let state = self.inner.state.lock();
        let swap_chain = state
            .swap_chains
            .get(&chain)
            .ok_or_else(|| invalid("unknown swap chain"))?;
        swap_chain
            .images
            .get(index as usize)
            .copied()
            .ok_or_else(|| invalid("swap chain image index out of range"))
    }

    fn release_swap_chain_image(&self, chain: SwapChainId) -> RuntimeResult<()> {
        {
            let mut state = self.inner.state.lock();
            let swap_chain = state
                .swap_chains
                .get_mut(&chain)
                .ok_or_else(|| invalid("unknown swap chain"))?;
            if swap_chain.acquired.take().is_none() {
                return Err(invalid("no swap chain image acquired"));
            }
        }
        self.inner.record(RuntimeCall::ReleaseImage(chain));
        Ok(())
    }

    fn free_swap_chain(&self, chain: SwapChainId) {
        if self.inner.state.lock().swap_chains.remove(&chain).is_some() {
            self.inner.record(RuntimeCall::FreeSwapChain(chain));
        }
    }

    fn create_occlusion_mesh(
        &self,
        view: usize,
        winding: WindingOrder,
    ) -> RuntimeResult<OcclusionMesh> {
        let revision = {
            let state = self.inner.state.lock();
            Self::ensure_session(&state)?;
            state.mesh_revision.get(view).copied()
        };
        let revision = revision.ok_or_else(|| invalid("view index out of range"))?;
        self.inner.record(RuntimeCall::CreateOcclusionMesh { view });

        // Focus views cover the visible area completely.
        if view >= 2 {
            return Ok(OcclusionMesh::default());
        }

        let inset = 0.4 + 0.05 * revision as f32;
        let mut vertices = Vec::with_capacity(12);
        for (sx, sy) in [(-1.0f32, -1.0f32), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let corner = Vec2::new(sx, sy);
            let along_x = Vec2::new(sx * (1.0 - inset), sy);
            let along_y = Vec2::new(sx, sy * (1.0 - inset));
            // Corners alternate orientation; emit a consistent winding.
            let ccw = (sx * sy) > 0.0;
            let flip = matches!(winding, WindingOrder::Clockwise) == ccw;
            if flip {
                vertices.extend_from_slice(&[corner, along_y, along_x]);
            } else {
                vertices.extend_from_slice(&[corner, along_x, along_y]);
            }
        }
        Ok(OcclusionMesh { vertices })
    }

    fn data_stream_configs(&self) -> Vec<StreamConfig> {
        streams::stream_configs(&self.inner.config)
    }

    fn start_data_stream(
        &self,
        stream: StreamId,
        channels: ChannelFlags,
        callback: StreamCallback,
    ) -> RuntimeResult<()> {
        streams::start(&self.inner, stream, channels, callback)
    }

    fn stop_data_stream(&self, stream: StreamId) -> RuntimeResult<()> {
        streams::stop(&self.inner, stream)
    }

    fn lock_data_stream_buffer(&self, buffer: BufferId) -> RuntimeResult<()> {
        {
            let mut state = self.inner.state.lock();
            let entry = state
                .buffers
                .get_mut(&buffer)
                .ok_or_else(|| invalid("unknown buffer"))?;
            entry.locks += 1;
        }
        self.inner.record(RuntimeCall::LockBuffer(buffer));
        Ok(())
    }

    fn unlock_data_stream_buffer(&self, buffer: BufferId) {
        {
            let mut state = self.inner.state.lock();
            match state.buffers.get_mut(&buffer) {
                Some(entry) if entry.locks > 0 => {
                    entry.locks -= 1;
                    if entry.locks == 0 && entry.orphaned {
                        state.buffers.remove(&buffer);
                    }
                }
                _ => {
                    log::warn!("Unlock of buffer {} that is not locked", buffer.0);
                    return;
                }
            }
        }
        self.inner.record(RuntimeCall::UnlockBuffer(buffer));
    }

    fn buffer_metadata(&self, buffer: BufferId) -> RuntimeResult<BufferMetadata> {
        let state = self.inner.state.lock();
        state
            .buffers
            .get(&buffer)
            .map(|b| b.metadata)
            .ok_or_else(|| invalid("unknown buffer"))
    }

    fn buffer_cpu_data(&self, buffer: BufferId) -> RuntimeResult<Arc<[u8]>> {
        let state = self.inner.state.lock();
        let entry = state
            .buffers
            .get(&buffer)
            .ok_or_else(|| invalid("unknown buffer"))?;
        if entry.locks == 0 {
            return Err(invalid("buffer is not locked"));
        }
        Ok(Arc::clone(&entry.data))
    }

    fn buffer_id(&self, stream: StreamId, frame_number: i64, channel: usize) -> Option<BufferId> {
        self.inner
            .state
            .lock()
            .buffer_index
            .get(&(stream, frame_number, channel))
            .copied()
    }

    fn camera_intrinsics(
        &self,
        _stream: StreamId,
        _frame_number: i64,
        channel: usize,
    ) -> RuntimeResult<CameraIntrinsics> {
        Ok(streams::camera_intrinsics(channel))
    }

    fn camera_extrinsics(
        &self,
        _stream: StreamId,
        _frame_number: i64,
        channel: usize,
    ) -> RuntimeResult<DMat4> {
        Ok(streams::camera_extrinsics(channel))
    }

    fn set_video_render(&self, enabled: bool) -> RuntimeResult<()> {
        let mut state = self.inner.state.lock();
        if enabled && !state.mr_connected {
            return Err(RuntimeError::new(10, "mixed reality not available"));
        }
        state.mr.video_render = enabled;
        drop(state);
        self.inner.record(RuntimeCall::SetVideoRender(enabled));
        Ok(())
    }

    fn set_video_depth_estimation(&self, enabled: bool) -> RuntimeResult<()> {
        self.inner.state.lock().mr.video_depth_estimation = enabled;
        self.inner.record(RuntimeCall::SetVideoDepthEstimation(enabled));
        Ok(())
    }

    fn set_vr_view_offset(&self, offset: f64) -> RuntimeResult<()> {
        if !(0.0..=1.0).contains(&offset) {
            return Err(invalid("view offset out of range"));
        }
        self.inner.state.lock().mr.vr_view_offset = offset;
        self.inner.record(RuntimeCall::SetVrViewOffset(offset));
        Ok(())
    }

    fn set_chroma_key(&self, enabled: bool) -> RuntimeResult<()> {
        self.inner.state.lock().mr.chroma_key = enabled;
        self.inner.record(RuntimeCall::SetChromaKey(enabled));
        Ok(())
    }

    fn set_environment_cubemap_config(
        &self,
        config: &EnvironmentCubemapConfig,
    ) -> RuntimeResult<()> {
        {
            let mut state = self.inner.state.lock();
            mr::require_lock(&state, LockType::EnvironmentCubemap)?;
            state.mr.cubemap = *config;
        }
        self.inner
            .record(RuntimeCall::SetEnvironmentCubemapConfig(config.mode));
        Ok(())
    }

    fn camera_property_config_type(
        &self,
        property: CameraPropertyType,
    ) -> RuntimeResult<CameraPropertyConfigType> {
        mr::with_property(&self.inner, property, |p| p.config_type)
    }

    fn camera_property_modes(
        &self,
        property: CameraPropertyType,
    ) -> RuntimeResult<Vec<CameraPropertyMode>> {
        mr::with_property(&self.inner, property, |p| p.modes.clone())
    }

    fn camera_property_values(
        &self,
        property: CameraPropertyType,
    ) -> RuntimeResult<Vec<CameraPropertyValue>> {
        mr::with_property(&self.inner, property, |p| p.values.clone())
    }

    fn camera_property_mode(
        &self,
        property: CameraPropertyType,
    ) -> RuntimeResult<CameraPropertyMode> {
        mr::with_property(&self.inner, property, |p| p.mode)
    }

    fn camera_property_value(
        &self,
        property: CameraPropertyType,
    ) -> RuntimeResult<CameraPropertyValue> {
        mr::with_property(&self.inner, property, |p| p.value)
    }

    fn set_camera_property_mode(
        &self,
        property: CameraPropertyType,
        mode: CameraPropertyMode,
    ) -> RuntimeResult<()> {
        mr::set_property_mode(&self.inner, property, mode)
    }

    fn set_camera_property_value(
        &self,
        property: CameraPropertyType,
        value: CameraPropertyValue,
    ) -> RuntimeResult<()> {
        mr::set_property_value(&self.inner, property, value)
    }

    fn reset_camera_properties(&self) -> RuntimeResult<()> {
        mr::reset_properties(&self.inner)
    }

    fn chroma_key_config_count(&self) -> usize {
        self.inner.state.lock().chroma_slots.len()
    }

    fn chroma_key_config(&self, index: usize) -> RuntimeResult<ChromaKeyConfig> {
        self.inner
            .state
            .lock()
            .chroma_slots
            .get(index)
            .copied()
            .ok_or_else(|| invalid("chroma key index out of range"))
    }

    fn set_chroma_key_config(&self, index: usize, config: &ChromaKeyConfig) -> RuntimeResult<()> {
        mr::set_chroma_key_config(&self.inner, index, config)
    }

    fn lock(&self, lock: LockType) -> RuntimeResult<bool> {
        let acquired = {
            let mut state = self.inner.state.lock();
            Self::ensure_session(&state)?;
            match state.locks.get(&lock) {
                Some(LockHolder::OtherClient) => false,
                Some(LockHolder::Client) => true,
                None => {
                    state.locks.insert(lock, LockHolder::Client);
                    true
                }
            }
        };
        self.inner.record(RuntimeCall::Lock(lock, acquired));
        Ok(acquired)
    }

    fn unlock(&self, lock: LockType) -> RuntimeResult<()> {
        {
            let mut state = self.inner.state.lock();
            if state.locks.get(&lock) != Some(&LockHolder::Client) {
                return Err(invalid(format!("{lock:?} lock not held")));
            }
            state.locks.remove(&lock);
        }
        self.inner.record(RuntimeCall::Unlock(lock));
        Ok(())
    }

    fn fill_variable_rate_shading(
        &self,
        config: &VariableRateShadingConfig,
        table: &ShadingRateTable,
        image: &mut VrsImage,
    ) -> RuntimeResult<()> {
        let viewport = config.viewport;
        if viewport.x < 0
            || viewport.y < 0
            || viewport.right() as u32 > image.width
            || viewport.bottom() as u32 > image.height
        {
            return Err(invalid("shading rate viewport outside the image"));
        }

        let (mut cx, mut cy) = (0.5, 0.5);
        if let Some(gaze) = config.gaze.filter(|_| config.flags.contains(VrsFlags::GAZE)) {
            if gaze.forward.z < 0.0 {
                cx += (gaze.forward.x / -gaze.forward.z) * 0.25;
                cy -= (gaze.forward.y / -gaze.forward.z) * 0.25;
            }
        }

        let scale = viewport.width.min(viewport.height).max(1) as f64;
        for ty in 0..viewport.height {
            for tx in 0..viewport.width {
                let u = (tx as f64 + 0.5) / scale - cx * viewport.width as f64 / scale;
                let v = (ty as f64 + 0.5) / scale - cy * viewport.height as f64 / scale;
                let distance = (u * u + v * v).sqrt();

                let index = if config.flags.contains(VrsFlags::OCCLUSION_MAP) && distance > 0.75 {
                    11
                } else if distance < config.inner_radius as f64 {
                    4
                } else if distance < config.outer_radius as f64 {
                    7
                } else {
                    10
                };
                image.set(
                    (viewport.x + tx) as u32,
                    (viewport.y + ty) as u32,
                    table[index] as u8,
                );
            }
        }

        self.inner.record(RuntimeCall::FillVariableRateShading {
            view: config.view_index,
        });
        Ok(())
    }

    fn world_init(&self, flags: WorldFlags) -> RuntimeResult<WorldId> {
        world::init(&self.inner, flags)
    }

    fn world_sync(&self, world: WorldId) -> RuntimeResult<()> {
        world::sync(&self.inner, world)
    }

    fn world_object_count(&self, world: WorldId, mask: ComponentTypeMask) -> usize {
        world::objects(&self.inner, world, mask).len()
    }

    fn world_objects(&self, world: WorldId, mask: ComponentTypeMask) -> Vec<WorldObject> {
        world::objects(&self.inner, world, mask)
    }

    fn world_pose_component(
        &self,
        world: WorldId,
        object: WorldObjectId,
        display_time: i64,
    ) -> RuntimeResult<PoseComponent> {
        world::pose_component(&self.inner, world, object, display_time)
    }

    fn world_object_marker_component(
        &self,
        world: WorldId,
        object: WorldObjectId,
    ) -> RuntimeResult<ObjectMarkerComponent> {
        world::marker_component(&self.inner, world, object)
    }

    fn world_set_object_marker_timeouts(
        &self,
        world: WorldId,
        markers: &[MarkerId],
        timeout_ns: i64,
    ) -> RuntimeResult<()> {
        world::set_timeouts(&self.inner, world, markers, timeout_ns)
    }

    fn world_set_object_marker_flags(
        &self,
        world: WorldId,
        markers: &[MarkerId],
        flags: ObjectMarkerFlags,
    ) -> RuntimeResult<()> {
        world::set_flags(&self.inner, world, markers, flags)
    }

    fn world_destroy(&self, world: WorldId) {
        self.inner.state.lock().worlds.remove(&world);
    }

    fn poll_event(&self) -> Option<Event> {
        self.inner.state.lock().events.pop_front()
    }
}
