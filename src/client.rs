//! The client: startup, the frame loop and shutdown.
//!
//! [`Client`] owns the backend, the [`FrameEngine`] and the controllers that
//! feed it, and routes runtime events to whoever consumes them.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::backend::GraphicsBackend;
use crate::camera::CameraController;
use crate::chroma_key::ChromaKeyController;
use crate::config::ClientConfig;
use crate::context::Context;
use crate::error::{ClientError, ClientResult};
use crate::frame::{FpsCounter, FrameEngine, FrameOutcome, FrameProfiler, Scene, VstState};
use crate::markers::MarkerTracker;
use crate::mr_session::MrSession;
use crate::runtime::{Event, Runtime};
use crate::streaming::{DataStreamer, FrameHandler};

/// Sleep between loop iterations while the client is not visible.
pub const IDLE_SLEEP: Duration = Duration::from_millis(50);

/// Result of one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    Continue,
    /// A quit was requested or the frame limit was reached.
    Finished,
}

pub struct Client<B: GraphicsBackend> {
    runtime: Arc<dyn Runtime>,
    backend: B,
    config: ClientConfig,
    context: Context,
    engine: Option<FrameEngine>,
    mr: MrSession,
    camera: CameraController,
    chroma: ChromaKeyController,
    markers: Option<MarkerTracker>,
    streamer: Option<DataStreamer>,
    profiler: Option<FrameProfiler>,
    fps: Option<FpsCounter>,
}

impl<B: GraphicsBackend> Client<B> {
    /// Bring up the MR session, the controllers, the frame engine and the
    /// requested data streams. Frames of those streams go to `on_frame`.
    pub fn new(
        runtime: Arc<dyn Runtime>,
        mut backend: B,
        config: ClientConfig,
        context: Context,
        on_frame: Option<FrameHandler>,
    ) -> ClientResult<Self> {
        if !runtime.is_available() {
            return Err(ClientError::BackendUnavailable(
                "compositor is not running".into(),
            ));
        }

        let mut settings = config.validate(backend.capabilities())?;

        let mut mr = MrSession::new(Arc::clone(&runtime));
        let mr_available = match mr.init(config.mr_options()) {
            Ok(available) => available,
            Err(e) => {
                context.report(&e);
                mr.mr_available()
            }
        };
        settings.restrict_to_mr(mr_available);

        let mut camera = CameraController::new(Arc::clone(&runtime));
        if let Err(e) = camera.enumerate(mr_available) {
            context.report(&e);
        }
        if mr_available {
            camera.log_current_config();
        }

        let mut chroma = ChromaKeyController::new(Arc::clone(&runtime));
        chroma.refresh();

        let markers = if config.use_markers {
            match MarkerTracker::new(Arc::clone(&runtime)) {
                Ok(tracker) => Some(tracker),
                Err(e) => {
                    context.report(&e);
                    None
                }
            }
        } else {
            None
        };

        let profiler = settings.profile.map(FrameProfiler::new);
        let fps = config.print_fps.then(FpsCounter::new);

        let engine = FrameEngine::new(Arc::clone(&runtime), &mut backend, settings, context.clone())?;

        let streamer = if config.streams.is_empty() {
            None
        } else {
            let streamer = DataStreamer::new(
                Arc::clone(&runtime),
                on_frame,
                Some(config.snapshot_dir.clone()),
            );
            streamer.set_delayed_buffer_handling(config.delayed_buffer_handling);
            streamer.log_stream_configs();
            for request in &config.streams {
                if let Err(e) =
                    streamer.start_stream(request.stream_type, request.format, request.channels)
                {
                    context.report(&e);
                }
            }
            Some(streamer)
        };

        let mut client = Self {
            runtime,
            backend,
            config,
            context,
            engine: Some(engine),
            mr,
            camera,
            chroma,
            markers,
            streamer,
            profiler,
            fps,
        };
        client.sync_vst();
        Ok(client)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn runtime(&self) -> &Arc<dyn Runtime> {
        &self.runtime
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn engine(&self) -> Option<&FrameEngine> {
        self.engine.as_ref()
    }

    pub fn engine_mut(&mut self) -> Option<&mut FrameEngine> {
        self.engine.as_mut()
    }

    pub fn mr_session(&self) -> &MrSession {
        &self.mr
    }

    pub fn mr_session_mut(&mut self) -> &mut MrSession {
        &mut self.mr
    }

    pub fn camera(&self) -> &CameraController {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut CameraController {
        &mut self.camera
    }

    pub fn chroma_key(&self) -> &ChromaKeyController {
        &self.chroma
    }

    pub fn chroma_key_mut(&mut self) -> &mut ChromaKeyController {
        &mut self.chroma
    }

    pub fn markers(&self) -> Option<&MarkerTracker> {
        self.markers.as_ref()
    }

    pub fn markers_mut(&mut self) -> Option<&mut MarkerTracker> {
        self.markers.as_mut()
    }

    pub fn streamer(&self) -> Option<&DataStreamer> {
        self.streamer.as_ref()
    }

    pub fn profiler(&self) -> Option<&FrameProfiler> {
        self.profiler.as_ref()
    }

    pub fn frames_rendered(&self) -> u64 {
        self.engine.as_ref().map_or(0, FrameEngine::frames_rendered)
    }

    /// Run until a quit is requested, the frame limit is hit or a fatal error occurs.
    pub fn run(&mut self) -> ClientResult<u64> {
        log::info!("Entering frame loop");
        loop {
            match self.step() {
                Ok(StepResult::Continue) => {}
                Ok(StepResult::Finished) => break,
                Err(e) => {
                    self.context.report(&e);
                    return Err(e);
                }
            }
        }
        let frames = self.frames_rendered();
        log::info!("Frame loop finished after {frames} frames");
        Ok(frames)
    }

    /// One iteration of the frame loop.
    pub fn step(&mut self) -> ClientResult<StepResult> {
        if self.context.quit_requested() {
            return Ok(StepResult::Finished);
        }

        self.poll_events()?;
        if let Some(streamer) = &self.streamer {
            streamer.handle_delayed_buffers(false);
        }
        self.sync_vst();

        let Some(engine) = self.engine.as_mut() else {
            return Ok(StepResult::Finished);
        };
        let markers = self.markers.as_mut();
        let context = &self.context;
        let outcome = engine.frame_with(&mut self.backend, |info, scene| {
            if let Some(markers) = markers {
                update_markers(markers, scene, info.display_time, context);
            }
        })?;
        match outcome {
            FrameOutcome::Idle => thread::sleep(IDLE_SLEEP),
            FrameOutcome::Rendered(report) => {
                let now = Instant::now();
                if let Some(profiler) = self.profiler.as_mut() {
                    let complete = profiler.is_complete();
                    profiler.add_sample(report.frame_number.max(0) as u64, now);
                    if !complete && profiler.is_complete() {
                        if let Err(e) = profiler.export_csv(&self.config.profile_output) {
                            log::error!(
                                "Writing {} failed: {e}",
                                self.config.profile_output.display()
                            );
                        }
                    }
                }
                if let Some(fps) = self.fps.as_mut() {
                    fps.tick(now);
                }
                if self
                    .config
                    .frame_limit
                    .is_some_and(|limit| engine.frames_rendered() >= limit)
                {
                    log::info!("Frame limit reached");
                    return Ok(StepResult::Finished);
                }
            }
            FrameOutcome::Invalidated | FrameOutcome::Abandoned => {}
        }
        Ok(StepResult::Continue)
    }

    fn poll_events(&mut self) -> ClientResult<()> {
        while let Some(event) = self.runtime.poll_event() {
            if let Some(engine) = self.engine.as_mut() {
                match engine.handle_event(&mut self.backend, &event) {
                    Ok(_) => {}
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => self.context.report(&e),
                }
            }

            match event {
                Event::MrCameraPropertyChange { property } => {
                    self.camera.on_camera_property_changed(property);
                }
                Event::MrChromaKeyConfigChange => self.chroma.on_config_changed(),
                Event::Foreground { is_foreground } => {
                    log::info!("Foreground: {is_foreground}");
                }
                Event::StandbyStatus { on_standby } => {
                    log::info!("Standby: {on_standby}");
                }
                _ => {}
            }

            match self.mr.handle_event(&event) {
                Ok(true) => {
                    if let Err(e) = self.camera.enumerate(self.mr.mr_available()) {
                        self.context.report(&e);
                    }
                }
                Ok(false) => {}
                Err(e) => self.context.report(&e),
            }
        }
        Ok(())
    }

    /// Follow the MR session's pass-through switches.
    fn sync_vst(&mut self) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        let render = self.mr.video_rendering();
        let depth_test = render && engine.settings().depth_test_vst;
        engine.set_vst(VstState {
            render,
            depth_test,
            chroma_key: self.mr.options().chroma_keying,
        });
    }

    /// Stop streams, drain the GPU and release every runtime resource.
    pub fn shutdown(&mut self) {
        if let Some(streamer) = self.streamer.take() {
            streamer.shutdown();
        }
        if let Some(engine) = self.engine.take() {
            let mut engine = engine;
            engine.wait_idle(&mut self.backend);
            engine.destroy(&mut self.backend);
        }
        self.markers = None;
        log::info!("Client shut down");
    }
}

impl<B: GraphicsBackend> Drop for Client<B> {
    fn drop(&mut self) {
        if self.engine.is_some() || self.streamer.is_some() {
            self.shutdown();
        }
    }
}

/// Refresh the marker list for the frame about to be drawn.
fn update_markers(
    markers: &mut MarkerTracker,
    scene: &mut Scene,
    display_time: i64,
    context: &Context,
) {
    match markers.update(display_time) {
        Ok(()) => scene.set_markers(markers.markers(), markers.volume_multiplier()),
        Err(e) => context.report(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::config::StreamRequest;
    use crate::runtime::{ChannelFlags, SimulatedRuntime, StreamFormat, StreamType};

    fn client(config: ClientConfig) -> (Arc<SimulatedRuntime>, Client<DummyBackend>) {
        let runtime = Arc::new(SimulatedRuntime::default());
        let client = Client::new(
            runtime.clone(),
            DummyBackend::new(),
            config,
            Context::new(),
            None,
        )
        .unwrap();
        (runtime, client)
    }

    #[test]
    fn test_frame_limit_stops_run() {
        let (_runtime, mut client) = client(ClientConfig {
            max_donuts: 10,
            frame_limit: Some(3),
            ..Default::default()
        });
        assert_eq!(client.run().unwrap(), 3);
    }

    #[test]
    fn test_quit_request_stops_before_rendering() {
        let (_runtime, mut client) = client(ClientConfig {
            max_donuts: 10,
            ..Default::default()
        });
        client.context().request_quit();
        assert_eq!(client.run().unwrap(), 0);
    }

    #[test]
    fn test_vst_follows_session() {
        let (_runtime, mut client) = client(ClientConfig {
            max_donuts: 10,
            render_vst: true,
            use_depth_layers: true,
            depth_test_vst: true,
            ..Default::default()
        });
        let vst = client.engine().unwrap().vst();
        assert!(vst.render);
        assert!(vst.depth_test);

        client.mr_session_mut().set_video_rendering(false).unwrap();
        client.step().unwrap();
        let vst = client.engine().unwrap().vst();
        assert!(!vst.render);
        assert!(!vst.depth_test);
    }

    #[test]
    fn test_shutdown_stops_streams_and_frees_chains() {
        let (runtime, mut client) = client(ClientConfig {
            max_donuts: 10,
            streams: vec![StreamRequest::new(
                StreamType::EyeCamera,
                StreamFormat::Y8,
                ChannelFlags::ALL,
            )],
            ..Default::default()
        });
        assert_eq!(runtime.running_stream_count(), 1);
        client.step().unwrap();
        client.shutdown();
        assert_eq!(runtime.running_stream_count(), 0);
        assert_eq!(runtime.live_swap_chain_count(), 0);
    }
}
