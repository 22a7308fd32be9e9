//! Mixed-reality rendering client core
//!
//! Drives a Varjo-style compositing runtime: the client renders stereo or quad
//! views into runtime swap chains every frame, composites them over video
//! pass-through, manages the HMD cameras and chroma keying, consumes camera data
//! streams and tracks fiducial markers.
//!
//! # Modules
//! - [`runtime`]: the runtime surface the client consumes, plus an in-process
//!   [`runtime::SimulatedRuntime`]
//! - [`backend`]: GPU abstraction with a recording [`backend::DummyBackend`] and a wgpu backend
//! - [`view`] and [`frame`]: swap chains, the viewport atlas and the frame loop
//! - [`pipeline`] and [`resources`]: pipeline variants, occlusion meshes, VRS and GPU buffers
//! - [`streaming`]: data-stream subscriptions, pixel conversion and snapshots
//! - [`camera`], [`chroma_key`], [`markers`], [`mr_session`]: MR controllers
//! - [`client`]: startup, event routing and the loop itself

pub mod backend;
pub mod camera;
pub mod chroma_key;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod frame;
pub mod markers;
pub mod mr_session;
pub mod pipeline;
pub mod resources;
pub mod runtime;
pub mod streaming;
pub mod view;
#[cfg(feature = "mirror-window")]
pub mod window;

pub use backend::{Backend, DummyBackend, GraphicsBackend};
pub use client::{Client, StepResult};
pub use config::{ClientConfig, DepthFormat, RendererSettings, StreamRequest};
pub use context::Context;
pub use error::{ClientError, ClientResult, ErrorKind};
pub use frame::{FrameEngine, FrameOutcome, FrameReport};
pub use runtime::{Runtime, SimulatedConfig, SimulatedRuntime};
pub use streaming::{DataStreamer, Frame, FrameMetadata};
#[cfg(feature = "mirror-window")]
pub use window::MirrorWindow;
