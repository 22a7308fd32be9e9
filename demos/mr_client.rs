//! Mixed-reality client demo against the simulated runtime.
//!
//! ```text
//! cargo run --example mr_client -- --headless --stereo --render-vst --frames 300
//! cargo run --example mr_client -- --mirror --stream color --stream eye
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};

#[cfg(feature = "mirror-window")]
use varjo_mr_client::runtime::CameraPropertyType;
use varjo_mr_client::runtime::{ChannelFlags, CubemapMode, GraphicsApi, StreamFormat, StreamType};
use varjo_mr_client::streaming::{Frame, FrameHandler};
use varjo_mr_client::{
    Backend, Client, ClientConfig, ClientError, Context, DepthFormat, SimulatedConfig,
    SimulatedRuntime, StreamRequest,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StreamArg {
    /// Distorted color cameras, NV12
    Color,
    /// Environment cubemap, RGBA16F
    Cubemap,
    /// Eye tracking cameras, Y8
    Eye,
}

impl StreamArg {
    fn request(self) -> StreamRequest {
        match self {
            Self::Color => StreamRequest::new(
                StreamType::DistortedColor,
                StreamFormat::Nv12,
                ChannelFlags::ALL,
            ),
            Self::Cubemap => StreamRequest::new(
                StreamType::EnvironmentCubemap,
                StreamFormat::Rgba16Float,
                ChannelFlags::FIRST,
            ),
            Self::Eye => StreamRequest::new(StreamType::EyeCamera, StreamFormat::Y8, ChannelFlags::ALL),
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "mr_client", about = "Mixed-reality rendering client")]
struct Args {
    /// Graphics API: d3d11, d3d12, gl or vk
    #[arg(long, default_value = "d3d11")]
    renderer: String,
    /// Record GPU work without a device
    #[arg(long)]
    headless: bool,
    /// Render two views instead of four
    #[arg(long)]
    stereo: bool,
    /// Submit depth layers
    #[arg(long)]
    depth: bool,
    /// d32, d24s8 or d32s8
    #[arg(long, default_value = "d32")]
    depth_format: String,
    #[arg(long)]
    reverse_depth: bool,
    #[arg(long)]
    occlusion_mesh: bool,
    #[arg(long)]
    velocity: bool,
    #[arg(long)]
    sli: bool,
    #[arg(long)]
    slave_gpu: bool,
    /// Use foveated viewports when gaze is valid
    #[arg(long)]
    dynamic_viewports: bool,
    #[arg(long)]
    vrs: bool,
    #[arg(long)]
    visualize_vrs: bool,
    #[arg(long)]
    gaze: bool,
    /// Blend the layer over video pass-through
    #[arg(long)]
    render_vst: bool,
    #[arg(long)]
    depth_test_vst: bool,
    #[arg(long)]
    chroma_key: bool,
    #[arg(long)]
    no_srgb: bool,
    /// Show the mirror view in a window
    #[arg(long)]
    mirror: bool,
    /// Keep rendering while not visible
    #[arg(long)]
    draw_always: bool,
    #[arg(long)]
    no_animation: bool,
    #[arg(long)]
    no_vr_scene: bool,
    #[arg(long, default_value_t = varjo_mr_client::config::DEFAULT_MAX_DONUTS)]
    max_donuts: usize,
    #[arg(long)]
    profile_start_frame: Option<u64>,
    #[arg(long)]
    profile_frame_count: Option<usize>,
    #[arg(long, default_value = "frame_times.csv")]
    profile_output: PathBuf,
    #[arg(long)]
    fps: bool,
    #[arg(long, default_value_t = 0)]
    priority: i32,
    #[arg(long)]
    video_depth_estimation: bool,
    #[arg(long, default_value_t = 1.0)]
    vr_view_offset: f64,
    /// Use the auto-adapting environment cubemap
    #[arg(long)]
    cubemap_auto_adapt: bool,
    #[arg(long)]
    markers: bool,
    /// Data streams to start, repeatable
    #[arg(long, value_enum)]
    stream: Vec<StreamArg>,
    /// Hand stream buffers to the frame loop
    #[arg(long)]
    delayed_buffers: bool,
    #[arg(long, default_value = ".")]
    snapshot_dir: PathBuf,
    /// Stop after this many frames
    #[arg(long)]
    frames: Option<u64>,
    /// Simulated stream frame interval in milliseconds
    #[arg(long, default_value_t = 33)]
    stream_interval_ms: u64,
}

impl Args {
    fn config(&self) -> Result<ClientConfig, ClientError> {
        let api: GraphicsApi = self
            .renderer
            .parse()
            .map_err(ClientError::InvalidConfig)?;
        let depth_format: DepthFormat = self.depth_format.parse()?;
        Ok(ClientConfig {
            api,
            headless: self.headless,
            stereo: self.stereo,
            use_depth_layers: self.depth,
            depth_format,
            use_reverse_depth: self.reverse_depth,
            use_occlusion_mesh: self.occlusion_mesh,
            use_velocity: self.velocity,
            use_sli: self.sli,
            use_slave_gpu: self.slave_gpu,
            use_dynamic_viewports: self.dynamic_viewports,
            use_vrs: self.vrs,
            visualize_vrs: self.visualize_vrs,
            use_gaze: self.gaze,
            render_vst: self.render_vst,
            depth_test_vst: self.depth_test_vst,
            chroma_key_enabled: self.chroma_key,
            no_srgb: self.no_srgb,
            show_mirror_window: self.mirror && !self.headless,
            draw_always: self.draw_always,
            disable_animation: self.no_animation,
            disable_vr_scene: self.no_vr_scene,
            max_donuts: self.max_donuts,
            profile_start_frame: self.profile_start_frame,
            profile_frame_count: self.profile_frame_count,
            profile_output: self.profile_output.clone(),
            print_fps: self.fps,
            client_priority: self.priority,
            video_depth_estimation: self.video_depth_estimation,
            vr_view_offset: self.vr_view_offset,
            react_to_connection_events: true,
            cubemap_mode: if self.cubemap_auto_adapt {
                CubemapMode::AutoAdapt
            } else {
                CubemapMode::Fixed6500K
            },
            use_markers: self.markers,
            streams: self.stream.iter().map(|s| s.request()).collect(),
            delayed_buffer_handling: self.delayed_buffers,
            snapshot_dir: self.snapshot_dir.clone(),
            frame_limit: self.frames,
        })
    }
}

fn frame_counter() -> (FrameHandler, Arc<AtomicU64>) {
    let received = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&received);
    let handler: FrameHandler = Arc::new(move |frame: &Frame| {
        let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
        if n % 100 == 1 {
            log::debug!(
                "Stream frame {:?} #{} channel {} ({} bytes)",
                frame.metadata.stream_type(),
                frame.metadata.frame_number(),
                frame.metadata.channel_index,
                frame.data.len()
            );
        }
    });
    (handler, received)
}

#[cfg(feature = "mirror-window")]
fn handle_key(client: &mut Client<Backend>, key: winit::keyboard::KeyCode) {
    use winit::keyboard::KeyCode;

    let result = match key {
        KeyCode::KeyV => {
            let enabled = !client.mr_session().video_rendering();
            client.mr_session_mut().set_video_rendering(enabled)
        }
        KeyCode::KeyE => client
            .camera()
            .apply_next_mode_or_value(CameraPropertyType::ExposureTime),
        KeyCode::KeyW => client
            .camera()
            .apply_next_mode_or_value(CameraPropertyType::WhiteBalance),
        KeyCode::KeyR => client.camera().reset_properties_to_defaults(),
        KeyCode::KeyK => {
            let enabled = !client.chroma_key().is_keying_enabled();
            client.chroma_key_mut().toggle_chroma_keying(enabled)
        }
        KeyCode::KeyL => {
            if let Some(markers) = client.markers_mut() {
                markers.toggle_lock();
            }
            Ok(())
        }
        KeyCode::Equal | KeyCode::Minus => {
            if let Some(markers) = client.markers_mut() {
                markers.update_volume(key == KeyCode::Equal);
            }
            Ok(())
        }
        KeyCode::KeyS => {
            if let Some(streamer) = client.streamer() {
                for stream_type in [
                    StreamType::DistortedColor,
                    StreamType::EnvironmentCubemap,
                    StreamType::EyeCamera,
                ] {
                    streamer.request_snapshot(stream_type);
                }
            }
            Ok(())
        }
        KeyCode::KeyP => {
            if let Some(streamer) = client.streamer() {
                log::info!("{}", streamer.status_line());
            }
            Ok(())
        }
        _ => Ok(()),
    };
    if let Err(e) = result {
        client.context().report(&e);
    }
}

#[cfg(feature = "mirror-window")]
fn run_with_mirror(mut client: Client<Backend>) -> Result<(), ClientError> {
    use varjo_mr_client::window::{self, MirrorWindow};
    use varjo_mr_client::StepResult;

    let aspect = client
        .engine()
        .and_then(|e| e.viewports().static_set().get(0).map(|vp| vp.aspect()))
        .unwrap_or(1.0);
    let (width, height) = MirrorWindow::default_size(aspect);
    let mut attached = false;

    window::run("Varjo MR client", width, height, move |window| {
        if !attached {
            attached = true;
            if let Backend::Wgpu(wgpu) = client.backend_mut() {
                if let Err(e) = wgpu.attach_mirror(window.window_arc()) {
                    log::error!("Mirror window unavailable: {e}");
                }
            }
        }
        if window.was_resized() {
            let (w, h) = window.dimensions();
            if let Backend::Wgpu(wgpu) = client.backend_mut() {
                wgpu.resize_mirror(w, h);
            }
            window.clear_resize_flag();
        }
        for key in window.take_pressed_keys() {
            handle_key(&mut client, key);
        }
        match client.step() {
            Ok(StepResult::Continue) => true,
            Ok(StepResult::Finished) => false,
            Err(e) => {
                client.context().report(&e);
                false
            }
        }
    })
}

#[cfg(feature = "mirror-window")]
fn run(mut client: Client<Backend>, mirror: bool) -> Result<(), ClientError> {
    if mirror {
        return run_with_mirror(client);
    }
    client.run().map(|_| ())
}

#[cfg(not(feature = "mirror-window"))]
fn run(mut client: Client<Backend>, _mirror: bool) -> Result<(), ClientError> {
    client.run().map(|_| ())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = match args.config() {
        Ok(config) => config,
        Err(e) => {
            log::error!("{e}");
            std::process::exit(2);
        }
    };

    let runtime = Arc::new(SimulatedRuntime::new(SimulatedConfig {
        view_count: if config.stereo { 2 } else { 4 },
        paced: true,
        stream_frame_interval: Some(Duration::from_millis(args.stream_interval_ms.max(1))),
        ..Default::default()
    }));

    let context = Context::new();
    let backend = match Backend::create(config.api, config.headless) {
        Ok(backend) => backend,
        Err(e) => {
            context.report(&e);
            std::process::exit(1);
        }
    };

    let (on_frame, received) = frame_counter();
    let mirror = config.show_mirror_window;
    let client = match Client::new(runtime.clone(), backend, config, context.clone(), Some(on_frame)) {
        Ok(client) => client,
        Err(e) => {
            context.report(&e);
            std::process::exit(1);
        }
    };

    let result = run(client, mirror);

    log::info!(
        "Received {} stream frames",
        received.load(Ordering::Relaxed)
    );
    if let Err(e) = result {
        if e.is_fatal() {
            std::process::exit(1);
        }
    }
}
