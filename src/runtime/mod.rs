//! Compositing runtime interface
//!
//! The [`Runtime`] trait is the boundary between the client and the HMD
//! compositor. Every fallible call returns a [`RuntimeResult`]; the client maps
//! failures onto its own error kinds at the call site.
//!
//! [`SimulatedRuntime`] implements the full surface in-process.

mod mr;
pub mod projection;
pub mod simulated;
mod stream;
mod types;
mod world;

pub use mr::*;
pub use simulated::{RuntimeCall, SimulatedConfig, SimulatedRuntime};
pub use stream::*;
pub use types::*;
pub use world::*;

use std::sync::Arc;

use glam::DMat4;

/// Operations the client consumes from the compositing runtime.
///
/// Implementations are shared between the render thread and the stream
/// callback threads, so every method takes `&self`.
pub trait Runtime: Send + Sync {
    // Session

    /// Whether a compositor is running and reachable.
    fn is_available(&self) -> bool;

    /// Refresh the cached session properties.
    fn sync_properties(&self) -> RuntimeResult<()>;

    /// Read a boolean session property. `None` if the property is unknown.
    fn property_bool(&self, key: PropertyKey) -> Option<bool>;

    /// Session-wide layer ordering.
    fn set_priority(&self, priority: i32) -> RuntimeResult<()>;

    /// Tear down the session. Later calls fail.
    fn shutdown(&self);

    // Frame pacing

    /// Block until the next frame slot opens.
    fn wait_sync(&self) -> RuntimeResult<FrameInfo>;

    fn view_count(&self) -> usize;

    fn view_description(&self, view: usize) -> ViewDescription;

    /// Recommended render size of `view` for the given layout.
    fn texture_size(&self, size_type: TextureSizeType, view: usize) -> (i32, i32);

    fn fov_tangents(&self, view: usize) -> FovTangents;

    /// Tangents of `view` narrowed around `gaze`.
    fn foveated_fov_tangents(&self, view: usize, gaze: &Gaze) -> FovTangents;

    /// Gaze to use for foveated rendering, if gaze tracking is available and valid.
    fn rendering_gaze(&self) -> Option<Gaze>;

    fn request_gaze_calibration(&self) -> RuntimeResult<()>;

    /// Runtime clock in nanoseconds.
    fn current_time(&self) -> i64;

    fn frame_pose(&self, pose: PoseType) -> DMat4;

    fn tracking_to_local_transform(&self) -> DMat4;

    // Rendering

    fn begin_frame_with_layers(&self) -> RuntimeResult<()>;

    fn end_frame_with_layers(&self, submit: &SubmitInfoLayers) -> RuntimeResult<()>;

    fn set_mirror_config(&self, views: &[MirrorView]) -> RuntimeResult<()>;

    // Swap chains

    fn create_swap_chain(
        &self,
        api: GraphicsApi,
        config: &SwapChainConfig,
    ) -> RuntimeResult<SwapChainId>;

    /// Acquire the next image of `chain`. Fails if an image is already acquired.
    fn acquire_swap_chain_image(&self, chain: SwapChainId) -> RuntimeResult<u32>;

    fn swap_chain_image(&self, chain: SwapChainId, index: u32) -> RuntimeResult<NativeTexture>;

    fn release_swap_chain_image(&self, chain: SwapChainId) -> RuntimeResult<()>;

    fn free_swap_chain(&self, chain: SwapChainId);

    // Occlusion

    fn create_occlusion_mesh(
        &self,
        view: usize,
        winding: WindingOrder,
    ) -> RuntimeResult<OcclusionMesh>;

    // Data streams

    fn data_stream_configs(&self) -> Vec<StreamConfig>;

    /// Start delivering frames of `stream` to `callback` on a stream worker thread.
    fn start_data_stream(
        &self,
        stream: StreamId,
        channels: ChannelFlags,
        callback: StreamCallback,
    ) -> RuntimeResult<()>;

    /// Stop `stream`. No callback for the stream runs after this returns.
    /// Buffers the client still holds stay valid until they are unlocked.
    fn stop_data_stream(&self, stream: StreamId) -> RuntimeResult<()>;

    fn lock_data_stream_buffer(&self, buffer: BufferId) -> RuntimeResult<()>;

    fn unlock_data_stream_buffer(&self, buffer: BufferId);

    fn buffer_metadata(&self, buffer: BufferId) -> RuntimeResult<BufferMetadata>;

    /// CPU copy of a locked buffer.
    fn buffer_cpu_data(&self, buffer: BufferId) -> RuntimeResult<Arc<[u8]>>;

    /// Buffer holding `channel` of `frame_number`, if the runtime still has it.
    fn buffer_id(&self, stream: StreamId, frame_number: i64, channel: usize) -> Option<BufferId>;

    fn camera_intrinsics(
        &self,
        stream: StreamId,
        frame_number: i64,
        channel: usize,
    ) -> RuntimeResult<CameraIntrinsics>;

    fn camera_extrinsics(
        &self,
        stream: StreamId,
        frame_number: i64,
        channel: usize,
    ) -> RuntimeResult<DMat4>;

    // Mixed reality

    fn set_video_render(&self, enabled: bool) -> RuntimeResult<()>;

    fn set_video_depth_estimation(&self, enabled: bool) -> RuntimeResult<()>;

    /// Blend VR eye position between the user's eyes (0) and the video cameras (1).
    fn set_vr_view_offset(&self, offset: f64) -> RuntimeResult<()>;

    fn set_chroma_key(&self, enabled: bool) -> RuntimeResult<()>;

    /// Requires [`LockType::EnvironmentCubemap`].
    fn set_environment_cubemap_config(&self, config: &EnvironmentCubemapConfig)
        -> RuntimeResult<()>;

    fn camera_property_config_type(
        &self,
        property: CameraPropertyType,
    ) -> RuntimeResult<CameraPropertyConfigType>;

    fn camera_property_modes(
        &self,
        property: CameraPropertyType,
    ) -> RuntimeResult<Vec<CameraPropertyMode>>;

    fn camera_property_values(
        &self,
        property: CameraPropertyType,
    ) -> RuntimeResult<Vec<CameraPropertyValue>>;

    fn camera_property_mode(&self, property: CameraPropertyType)
        -> RuntimeResult<CameraPropertyMode>;

    fn camera_property_value(
        &self,
        property: CameraPropertyType,
    ) -> RuntimeResult<CameraPropertyValue>;

    /// Requires [`LockType::Camera`].
    fn set_camera_property_mode(
        &self,
        property: CameraPropertyType,
        mode: CameraPropertyMode,
    ) -> RuntimeResult<()>;

    /// Requires [`LockType::Camera`].
    fn set_camera_property_value(
        &self,
        property: CameraPropertyType,
        value: CameraPropertyValue,
    ) -> RuntimeResult<()>;

    /// Requires [`LockType::Camera`].
    fn reset_camera_properties(&self) -> RuntimeResult<()>;

    fn chroma_key_config_count(&self) -> usize;

    fn chroma_key_config(&self, index: usize) -> RuntimeResult<ChromaKeyConfig>;

    /// Requires [`LockType::ChromaKey`].
    fn set_chroma_key_config(&self, index: usize, config: &ChromaKeyConfig) -> RuntimeResult<()>;

    // Locks

    /// Try to take a configuration lock. Returns `false` without blocking when
    /// another client holds it.
    fn lock(&self, lock: LockType) -> RuntimeResult<bool>;

    fn unlock(&self, lock: LockType) -> RuntimeResult<()>;

    // Variable rate shading

    /// Fill `image` with shading rates from `table` for one view.
    fn fill_variable_rate_shading(
        &self,
        config: &VariableRateShadingConfig,
        table: &ShadingRateTable,
        image: &mut VrsImage,
    ) -> RuntimeResult<()>;

    // World

    fn world_init(&self, flags: WorldFlags) -> RuntimeResult<WorldId>;

    fn world_sync(&self, world: WorldId) -> RuntimeResult<()>;

    fn world_object_count(&self, world: WorldId, mask: ComponentTypeMask) -> usize;

    fn world_objects(&self, world: WorldId, mask: ComponentTypeMask) -> Vec<WorldObject>;

    fn world_pose_component(
        &self,
        world: WorldId,
        object: WorldObjectId,
        display_time: i64,
    ) -> RuntimeResult<PoseComponent>;

    fn world_object_marker_component(
        &self,
        world: WorldId,
        object: WorldObjectId,
    ) -> RuntimeResult<ObjectMarkerComponent>;

    fn world_set_object_marker_timeouts(
        &self,
        world: WorldId,
        markers: &[MarkerId],
        timeout_ns: i64,
    ) -> RuntimeResult<()>;

    fn world_set_object_marker_flags(
        &self,
        world: WorldId,
        markers: &[MarkerId],
        flags: ObjectMarkerFlags,
    ) -> RuntimeResult<()>;

    fn world_destroy(&self, world: WorldId);

    // Events

    fn poll_event(&self) -> Option<Event>;
}
