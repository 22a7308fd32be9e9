//! Shared harness for the integration tests.
//!
//! Wires a [`SimulatedRuntime`] to a [`DummyBackend`], either through a bare
//! [`FrameEngine`] or a full [`Client`].

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use varjo_mr_client::backend::{DummyBackend, DummyRecorder, GraphicsBackend};
use varjo_mr_client::runtime::{LayerFlags, RuntimeCall, SubmitInfoLayers};
use varjo_mr_client::streaming::{Frame, FrameHandler};
use varjo_mr_client::{
    Client, ClientConfig, Context, FrameEngine, FrameOutcome, FrameReport, Runtime,
    SimulatedConfig, SimulatedRuntime,
};

/// Route library logs through the test harness output.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Small scene so every test frame stays cheap.
pub fn base_config() -> ClientConfig {
    ClientConfig {
        max_donuts: 20,
        show_mirror_window: false,
        snapshot_dir: scratch_dir("snapshots"),
        ..Default::default()
    }
}

/// Per-process scratch directory under the system temp dir.
pub fn scratch_dir(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("varjo-mr-client-it-{name}-{}", std::process::id()))
}

/// Frame engine driven directly, without the client's event routing.
pub struct EngineHarness {
    pub runtime: Arc<SimulatedRuntime>,
    pub backend: DummyBackend,
    pub recorder: DummyRecorder,
    pub engine: Option<FrameEngine>,
}

impl EngineHarness {
    pub fn new(config: ClientConfig) -> Self {
        Self::with_runtime(SimulatedConfig::default(), config)
    }

    pub fn with_runtime(sim: SimulatedConfig, config: ClientConfig) -> Self {
        init_logging();
        let runtime = Arc::new(SimulatedRuntime::new(sim));
        let mut backend = DummyBackend::new();
        let recorder = backend.recorder();
        let settings = config
            .validate(backend.capabilities())
            .expect("config should validate");
        let engine = FrameEngine::new(runtime.clone(), &mut backend, settings, Context::new())
            .expect("engine should start");
        Self {
            runtime,
            backend,
            recorder,
            engine: Some(engine),
        }
    }

    pub fn engine(&mut self) -> &mut FrameEngine {
        self.engine.as_mut().expect("engine destroyed")
    }

    pub fn frame(&mut self) -> FrameOutcome {
        let engine = self.engine.as_mut().expect("engine destroyed");
        engine.frame(&mut self.backend).expect("frame should not fail")
    }

    pub fn rendered(&mut self) -> FrameReport {
        match self.frame() {
            FrameOutcome::Rendered(report) => report,
            other => panic!("expected a rendered frame, got {other:?}"),
        }
    }

    /// Route every pending runtime event into the engine.
    pub fn pump_events(&mut self) {
        let engine = self.engine.as_mut().expect("engine destroyed");
        while let Some(event) = self.runtime.poll_event() {
            engine
                .handle_event(&mut self.backend, &event)
                .expect("event should not fail");
        }
    }

    pub fn last_submit(&self) -> SubmitInfoLayers {
        self.runtime.last_submit().expect("a frame was submitted")
    }

    pub fn last_flags(&self) -> LayerFlags {
        self.last_submit()
            .layers
            .first()
            .map(|l| l.flags)
            .unwrap_or_default()
    }
}

impl Drop for EngineHarness {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.take() {
            engine.destroy(&mut self.backend);
        }
    }
}

/// Full client with a frame collector attached to its streams.
pub struct ClientHarness {
    pub runtime: Arc<SimulatedRuntime>,
    pub recorder: DummyRecorder,
    pub frames: Arc<Mutex<Vec<Frame>>>,
    pub client: Client<DummyBackend>,
}

impl ClientHarness {
    pub fn new(config: ClientConfig) -> Self {
        Self::with_runtime(SimulatedConfig::default(), config)
    }

    pub fn with_runtime(sim: SimulatedConfig, config: ClientConfig) -> Self {
        init_logging();
        let runtime = Arc::new(SimulatedRuntime::new(sim));
        let backend = DummyBackend::new();
        let recorder = backend.recorder();
        let (handler, frames) = collecting_handler();
        let client = Client::new(runtime.clone(), backend, config, Context::new(), Some(handler))
            .expect("client should start");
        Self {
            runtime,
            recorder,
            frames,
            client,
        }
    }

    pub fn step(&mut self) {
        self.client.step().expect("step should not fail");
    }
}

/// Handler that keeps a copy of every delivered frame.
pub fn collecting_handler() -> (FrameHandler, Arc<Mutex<Vec<Frame>>>) {
    let frames = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&frames);
    let handler: FrameHandler = Arc::new(move |frame: &Frame| sink.lock().push(frame.clone()));
    (handler, frames)
}

/// Position of the first call matching `predicate`.
pub fn position_of(calls: &[RuntimeCall], predicate: impl Fn(&RuntimeCall) -> bool) -> Option<usize> {
    calls.iter().position(predicate)
}
