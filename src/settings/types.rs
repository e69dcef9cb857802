use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::camera::session::{frame_interval, SessionConfig};
use crate::camera::types::{PixelFormat, SessionPreset};
use crate::preview::geometry::{Rotation, Size};
use crate::preview::processor::ContentMode;

/// Which presentation surface frames are drawn into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Renderer {
    Software,
    /// wgpu render target; falls back to software when no adapter exists.
    #[default]
    Gpu,
}

/// Preview configuration, stored as camelCase JSON. Missing fields take
/// their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PreviewSettings {
    /// Camera to open; the backend's default device when unset.
    pub device_id: Option<String>,
    pub preset: SessionPreset,
    /// Delivery rate override.
    pub fps: Option<f32>,
    pub rotation: Rotation,
    /// View size in points.
    pub view_bounds: Size,
    /// Pixels per point.
    pub display_scale: f64,
    pub content_mode: ContentMode,
    pub renderer: Renderer,
    pub pool_size: usize,
    pub discard_late_frames: bool,
    /// Where to write the last presented frame on exit.
    pub snapshot_path: Option<PathBuf>,
    /// Stop after this many seconds instead of waiting for Ctrl-C.
    pub run_seconds: Option<u64>,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            device_id: None,
            preset: SessionPreset::default(),
            fps: None,
            rotation: Rotation::default(),
            view_bounds: Size::new(400.0, 300.0),
            display_scale: 2.0,
            content_mode: ContentMode::default(),
            renderer: Renderer::default(),
            pool_size: 3,
            discard_late_frames: true,
            snapshot_path: None,
            run_seconds: None,
        }
    }
}

impl PreviewSettings {
    /// Describe the first setting that cannot be used, if any.
    pub fn problem(&self) -> Option<String> {
        if !(self.display_scale.is_finite() && self.display_scale > 0.0) {
            return Some(format!("displayScale must be positive, got {}", self.display_scale));
        }
        let target = self.view_bounds.scaled(self.display_scale);
        if !(target.width.is_finite() && target.height.is_finite()) || target.is_empty() {
            return Some(format!(
                "viewBounds {}x{} is empty",
                self.view_bounds.width, self.view_bounds.height
            ));
        }
        if self.pool_size == 0 {
            return Some("poolSize must be at least 1".to_string());
        }
        if let Some(fps) = self.fps {
            if let Err(e) = frame_interval(fps) {
                return Some(e.to_string());
            }
        }
        None
    }

    /// Drawable size in pixels: view bounds times display scale.
    pub fn drawable_size(&self) -> (u32, u32) {
        self.view_bounds.scaled(self.display_scale).to_pixels()
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            preset: self.preset,
            pixel_format: PixelFormat::Nv12,
            fps: self.fps,
            discard_late_frames: self.discard_late_frames,
            pool_size: self.pool_size,
        }
    }
}
