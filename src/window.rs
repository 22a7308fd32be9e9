//! Mirror window using winit
//!
//! Shows the headset mirror image on the desktop. The frame loop runs from the
//! event loop's `AboutToWait` callback.

use std::sync::Arc;

use winit::{
    dpi::PhysicalSize,
    event::{ElementState, Event, KeyEvent, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window as WinitWindow, WindowBuilder},
};

use crate::backend::BackendError;
use crate::error::{ClientError, ClientResult};
use crate::view::MIRROR_EYE_WIDTH;

fn window_error(e: impl std::fmt::Display) -> ClientError {
    ClientError::Device(BackendError::InitializationFailed(format!("mirror window: {e}")))
}

/// Desktop window the mirror view is presented into.
pub struct MirrorWindow {
    window: Arc<WinitWindow>,
    width: u32,
    height: u32,
    resized: bool,
    close_requested: bool,
    pressed_keys: Vec<KeyCode>,
}

impl MirrorWindow {
    pub fn new(event_loop: &EventLoop<()>, title: &str, width: u32, height: u32) -> ClientResult<Self> {
        let window = WindowBuilder::new()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(width, height))
            .build(event_loop)
            .map_err(window_error)?;

        Ok(Self {
            window: Arc::new(window),
            width,
            height,
            resized: false,
            close_requested: false,
            pressed_keys: Vec::new(),
        })
    }

    /// Size fitting both mirrored eyes side by side for a view `aspect`.
    pub fn default_size(aspect: f64) -> (u32, u32) {
        let height = (f64::from(MIRROR_EYE_WIDTH) / aspect.max(f64::EPSILON)).round() as u32;
        (MIRROR_EYE_WIDTH as u32 * 2, height.max(1))
    }

    /// Handle for attaching a presentation surface.
    pub fn window_arc(&self) -> Arc<WinitWindow> {
        Arc::clone(&self.window)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Whether the window was resized since the flag was last cleared.
    pub fn was_resized(&self) -> bool {
        self.resized
    }

    pub fn clear_resize_flag(&mut self) {
        self.resized = false;
    }

    pub fn should_close(&self) -> bool {
        self.close_requested
    }

    /// Keys pressed since the last call.
    pub fn take_pressed_keys(&mut self) -> Vec<KeyCode> {
        std::mem::take(&mut self.pressed_keys)
    }

    pub fn handle_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::Resized(size) => {
                self.width = size.width;
                self.height = size.height;
                self.resized = true;
            }
            WindowEvent::CloseRequested => {
                self.close_requested = true;
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => {
                if *code == KeyCode::Escape {
                    self.close_requested = true;
                }
                self.pressed_keys.push(*code);
            }
            _ => {}
        }
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

/// Open a mirror window and call `frame` once per loop iteration until it
/// returns `false` or the window is closed.
pub fn run<F>(title: &str, width: u32, height: u32, mut frame: F) -> ClientResult<()>
where
    F: FnMut(&mut MirrorWindow) -> bool + 'static,
{
    let event_loop = EventLoop::new().map_err(window_error)?;
    let mut window = MirrorWindow::new(&event_loop, title, width, height)?;

    event_loop
        .run(move |event, elwt: &EventLoopWindowTarget<()>| {
            elwt.set_control_flow(ControlFlow::Poll);

            match event {
                Event::WindowEvent { event, .. } => {
                    window.handle_event(&event);
                    if window.should_close() {
                        elwt.exit();
                    }
                }
                Event::AboutToWait => {
                    if !frame(&mut window) {
                        elwt.exit();
                    }
                    window.request_redraw();
                }
                _ => {}
            }
        })
        .map_err(window_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_size() {
        assert_eq!(MirrorWindow::default_size(1.0), (1024, 512));
        assert_eq!(MirrorWindow::default_size(2.0), (1024, 256));
        assert_eq!(MirrorWindow::default_size(0.0).0, 1024);
    }
}
