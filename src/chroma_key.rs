//! Chroma-key configuration
//!
//! The runtime exposes a fixed number of indexed chroma-key slots. Writes
//! require the [`LockType::ChromaKey`] lock; the controller either takes it
//! around a single write or keeps it for an editing session opened with
//! [`ChromaKeyController::lock_config`].

use std::sync::Arc;

use glam::DVec3;

use crate::error::{ClientError, ClientResult};
use crate::runtime::{ChromaKeyConfig, ChromaKeyHsv, LockType, Runtime};

/// Parameter group edited by [`adjust_config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChromaKeyAdjustment {
    TargetColor,
    Tolerance,
    Falloff,
}

impl ChromaKeyAdjustment {
    pub fn next(self) -> Self {
        match self {
            Self::TargetColor => Self::Tolerance,
            Self::Tolerance => Self::Falloff,
            Self::Falloff => Self::TargetColor,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::TargetColor => "ChromaKey Color (Hue, Sat, Val)",
            Self::Tolerance => "ChromaKey Tolerance (Hue, Sat, Val)",
            Self::Falloff => "ChromaKey Falloff (Hue, Sat, Val)",
        }
    }
}

fn wrap_hue(hue: f64) -> f64 {
    let wrapped = hue.rem_euclid(1.0);
    // rem_euclid can round up to exactly 1.0 for tiny negative inputs.
    if wrapped >= 1.0 {
        0.0
    } else {
        wrapped
    }
}

fn clamp_unit(v: DVec3) -> DVec3 {
    v.clamp(DVec3::ZERO, DVec3::ONE)
}

/// HSV key. Hue wraps into `[0, 1)`, every other component is clamped to `[0, 1]`.
pub fn create_config_hsv(target: DVec3, tolerance: DVec3, falloff: DVec3) -> ChromaKeyConfig {
    let target = DVec3::new(
        wrap_hue(target.x),
        target.y.clamp(0.0, 1.0),
        target.z.clamp(0.0, 1.0),
    );
    ChromaKeyConfig::Hsv(ChromaKeyHsv {
        target_color: target,
        tolerance: clamp_unit(tolerance),
        falloff: clamp_unit(falloff),
    })
}

pub fn create_config_disabled() -> ChromaKeyConfig {
    ChromaKeyConfig::Disabled
}

/// Green-screen key used for slot 0 on reset.
pub fn default_green_screen() -> ChromaKeyConfig {
    create_config_hsv(
        DVec3::new(0.355, 1.0, 1.0),
        DVec3::new(0.15, 0.60, 0.92),
        DVec3::new(0.03, 0.03, 0.03),
    )
}

/// Step one component of an HSV config. Disabled configs are left untouched.
///
/// Returns whether the config changed.
pub fn adjust_config(
    config: &mut ChromaKeyConfig,
    adjustment: ChromaKeyAdjustment,
    component: usize,
    delta: f64,
) -> bool {
    let ChromaKeyConfig::Hsv(params) = config else {
        return false;
    };
    if component > 2 {
        return false;
    }
    let param = match adjustment {
        ChromaKeyAdjustment::TargetColor => &mut params.target_color,
        ChromaKeyAdjustment::Tolerance => &mut params.tolerance,
        ChromaKeyAdjustment::Falloff => &mut params.falloff,
    };
    let value = param[component] + delta;
    param[component] = if adjustment == ChromaKeyAdjustment::TargetColor && component == 0 {
        wrap_hue(value)
    } else {
        value.clamp(0.0, 1.0)
    };
    true
}

/// Flip a slot between disabled and the HSV key it had, or the green-screen key.
pub fn toggle_config_type(config: &ChromaKeyConfig, previous_hsv: Option<ChromaKeyHsv>) -> ChromaKeyConfig {
    match config {
        ChromaKeyConfig::Disabled => match previous_hsv {
            Some(params) => ChromaKeyConfig::Hsv(params),
            None => default_green_screen(),
        },
        ChromaKeyConfig::Hsv(_) => ChromaKeyConfig::Disabled,
    }
}

/// One-line description for logging.
pub fn describe(config: &ChromaKeyConfig) -> String {
    match config {
        ChromaKeyConfig::Disabled => "type=Disabled".to_string(),
        ChromaKeyConfig::Hsv(p) => format!(
            "type=HSV target=({:.3}, {:.3}, {:.3}) tolerance=({:.3}, {:.3}, {:.3}) falloff=({:.3}, {:.3}, {:.3})",
            p.target_color.x,
            p.target_color.y,
            p.target_color.z,
            p.tolerance.x,
            p.tolerance.y,
            p.tolerance.z,
            p.falloff.x,
            p.falloff.y,
            p.falloff.z,
        ),
    }
}

/// RGB in `[0, 1]` to HSV with hue in `[0, 1)`.
pub fn rgb_to_hsv(rgb: DVec3) -> DVec3 {
    let max = rgb.max_element();
    let min = rgb.min_element();
    let delta = max - min;

    let hue = if delta <= 0.0 {
        0.0
    } else if max == rgb.x {
        ((rgb.y - rgb.z) / delta).rem_euclid(6.0) / 6.0
    } else if max == rgb.y {
        ((rgb.z - rgb.x) / delta + 2.0) / 6.0
    } else {
        ((rgb.x - rgb.y) / delta + 4.0) / 6.0
    };
    let saturation = if max <= 0.0 { 0.0 } else { delta / max };
    DVec3::new(wrap_hue(hue), saturation, max)
}

fn channel_weight(distance: f64, tolerance: f64, falloff: f64) -> f64 {
    if distance <= tolerance {
        1.0
    } else if falloff > 0.0 && distance < tolerance + falloff {
        1.0 - (distance - tolerance) / falloff
    } else {
        0.0
    }
}

/// How strongly `hsv` matches the key: 1 inside the tolerance, fading to 0
/// across the falloff. Hue distance is measured around the color wheel.
pub fn key_weight(params: &ChromaKeyHsv, hsv: DVec3) -> f64 {
    let raw_hue = (hsv.x - params.target_color.x).abs();
    let hue_distance = raw_hue.min(1.0 - raw_hue);
    let h = channel_weight(hue_distance, params.tolerance.x, params.falloff.x);
    let s = channel_weight(
        (hsv.y - params.target_color.y).abs(),
        params.tolerance.y,
        params.falloff.y,
    );
    let v = channel_weight(
        (hsv.z - params.target_color.z).abs(),
        params.tolerance.z,
        params.falloff.z,
    );
    h.min(s).min(v)
}

/// Manages the runtime's chroma-key slots.
pub struct ChromaKeyController {
    runtime: Arc<dyn Runtime>,
    configs: Vec<ChromaKeyConfig>,
    config_locked: bool,
    keying_enabled: bool,
}

impl ChromaKeyController {
    pub fn new(runtime: Arc<dyn Runtime>) -> Self {
        let mut controller = Self {
            runtime,
            configs: Vec::new(),
            config_locked: false,
            keying_enabled: false,
        };
        controller.refresh();
        controller
    }

    /// Number of slots reported by the runtime.
    pub fn count(&self) -> usize {
        self.configs.len()
    }

    /// Cached content of slot `index`.
    pub fn cached(&self, index: usize) -> Option<&ChromaKeyConfig> {
        self.configs.get(index)
    }

    /// Read slot `index` from the runtime. Reads need no lock.
    pub fn config(&self, index: usize) -> ClientResult<ChromaKeyConfig> {
        self.runtime
            .chroma_key_config(index)
            .map_err(|e| ClientError::runtime("MRGetChromaKeyConfig", e))
    }

    /// Re-read every slot into the cache.
    pub fn refresh(&mut self) {
        let count = self.runtime.chroma_key_config_count();
        self.configs = (0..count)
            .map(|i| match self.runtime.chroma_key_config(i) {
                Ok(config) => config,
                Err(e) => {
                    log::error!("Reading chroma key config {i} failed: {e}");
                    ChromaKeyConfig::Disabled
                }
            })
            .collect();
    }

    /// Keep the chroma-key lock until [`ChromaKeyController::unlock_config`].
    pub fn lock_config(&mut self) -> ClientResult<bool> {
        if self.config_locked {
            return Ok(true);
        }
        let locked = self
            .runtime
            .lock(LockType::ChromaKey)
            .map_err(|e| ClientError::runtime("Lock", e))?;
        self.config_locked = locked;
        if !locked {
            log::warn!("Getting chroma key config lock failed.");
        }
        Ok(locked)
    }

    pub fn unlock_config(&mut self) -> ClientResult<()> {
        if !self.config_locked {
            return Ok(());
        }
        self.config_locked = false;
        self.runtime
            .unlock(LockType::ChromaKey)
            .map_err(|e| ClientError::runtime("Unlock", e))
    }

    pub fn is_config_locked(&self) -> bool {
        self.config_locked
    }

    /// Write slot `index`.
    ///
    /// Inside an editing session the held lock is used; otherwise the lock is
    /// taken for this write only. Fails with [`ClientError::LockRejected`]
    /// when another client holds it.
    pub fn set_config(&mut self, index: usize, config: ChromaKeyConfig) -> ClientResult<()> {
        if index >= self.configs.len() {
            return Err(ClientError::InvalidConfig(format!(
                "chroma key index {index} out of range (count {})",
                self.configs.len()
            )));
        }

        let temporary = !self.config_locked;
        if temporary {
            let locked = self
                .runtime
                .lock(LockType::ChromaKey)
                .map_err(|e| ClientError::runtime("Lock", e))?;
            if !locked {
                log::warn!("Could not change chroma key config {index}.");
                return Err(ClientError::LockRejected(LockType::ChromaKey));
            }
        }

        let result = self
            .runtime
            .set_chroma_key_config(index, &config)
            .map_err(|e| ClientError::runtime("MRSetChromaKeyConfig", e));

        if temporary {
            if let Err(e) = self.runtime.unlock(LockType::ChromaKey) {
                log::error!("Unlocking chroma key config failed: {e}");
            }
        }

        result?;
        self.configs[index] = config;
        log::debug!("ChromaKey config ({index}): {}", describe(&config));
        Ok(())
    }

    pub fn reset_config(&mut self, index: usize) -> ClientResult<()> {
        self.set_config(index, create_config_disabled())
    }

    /// Green screen in slot 0, every other slot disabled.
    pub fn reset_all(&mut self) -> ClientResult<()> {
        for index in 0..self.configs.len() {
            let config = if index == 0 {
                default_green_screen()
            } else {
                create_config_disabled()
            };
            self.set_config(index, config)?;
        }
        Ok(())
    }

    /// Turn compositor chroma keying on or off.
    pub fn toggle_chroma_keying(&mut self, enabled: bool) -> ClientResult<()> {
        self.runtime
            .set_chroma_key(enabled)
            .map_err(|e| ClientError::runtime("MRSetChromaKey", e))?;
        self.keying_enabled = enabled;
        log::info!("Chroma keying: {}", if enabled { "ON" } else { "OFF" });
        Ok(())
    }

    pub fn is_keying_enabled(&self) -> bool {
        self.keying_enabled
    }

    /// Handle an `MrChromaKeyConfigChange` event.
    pub fn on_config_changed(&mut self) {
        self.refresh();
        log::debug!("Chroma key configs changed ({} slots)", self.configs.len());
    }
}

impl Drop for ChromaKeyController {
    fn drop(&mut self) {
        if let Err(e) = self.unlock_config() {
            log::error!("{e}");
        }
    }
}
