//! Frame-time sampling and FPS logging.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use crate::config::ProfileWindow;

/// How often [`FpsCounter`] reports.
pub const FPS_REPORT_INTERVAL: Duration = Duration::from_secs(2);

/// Collects frame-to-frame times for a fixed window of frames.
///
/// The first sample only starts the clock, so `frame_count` samples need
/// `frame_count + 1` rendered frames.
#[derive(Debug)]
pub struct FrameProfiler {
    window: ProfileWindow,
    last: Option<Instant>,
    samples: Vec<f64>,
}

impl FrameProfiler {
    pub fn new(window: ProfileWindow) -> Self {
        Self {
            window,
            last: None,
            samples: Vec::with_capacity(window.frame_count),
        }
    }

    pub fn window(&self) -> ProfileWindow {
        self.window
    }

    /// Record the frame `frame_number` finishing at `now`.
    pub fn add_sample(&mut self, frame_number: u64, now: Instant) {
        if frame_number < self.window.start_frame || self.is_complete() {
            return;
        }
        if let Some(last) = self.last {
            self.samples.push((now - last).as_secs_f64() * 1000.0);
        }
        self.last = Some(now);
    }

    /// Frame times in milliseconds.
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn is_complete(&self) -> bool {
        self.samples.len() >= self.window.frame_count
    }

    pub fn average_ms(&self) -> Option<f64> {
        (!self.samples.is_empty())
            .then(|| self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    /// Write `index,milliseconds` rows with 1-based indices.
    pub fn write_csv<W: Write>(&self, mut out: W) -> std::io::Result<()> {
        for (index, ms) in self.samples.iter().enumerate() {
            writeln!(out, "{},{}", index + 1, ms)?;
        }
        out.flush()
    }

    pub fn export_csv(&self, path: &Path) -> std::io::Result<()> {
        self.write_csv(BufWriter::new(File::create(path)?))?;
        log::info!(
            "Wrote {} frame times to {} (average {:.3} ms)",
            self.samples.len(),
            path.display(),
            self.average_ms().unwrap_or(0.0)
        );
        Ok(())
    }
}

/// Counts frames and logs the rate every [`FPS_REPORT_INTERVAL`].
#[derive(Debug)]
pub struct FpsCounter {
    started: Option<Instant>,
    frames: u32,
    last_fps: Option<f64>,
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl FpsCounter {
    pub fn new() -> Self {
        Self {
            started: None,
            frames: 0,
            last_fps: None,
        }
    }

    /// Count a frame. Returns the rate when a report is due.
    pub fn tick(&mut self, now: Instant) -> Option<f64> {
        let started = *self.started.get_or_insert(now);
        self.frames += 1;
        let elapsed = now - started;
        if elapsed < FPS_REPORT_INTERVAL {
            return None;
        }
        let fps = f64::from(self.frames) / elapsed.as_secs_f64();
        log::info!("FPS: {fps:.2}");
        self.frames = 0;
        self.started = Some(now);
        self.last_fps = Some(fps);
        Some(fps)
    }

    pub fn last_fps(&self) -> Option<f64> {
        self.last_fps
    }
}
