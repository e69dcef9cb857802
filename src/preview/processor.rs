//! Per-frame rotate-and-present routine.
//!
//! Each delivered sample is wrapped as an [`Image`], rotated about its centre,
//! drawn into the surface's target rectangle and presented. Everything
//! created for a frame is dropped before `process` returns; the only state
//! kept between frames is the rotation, the cached transform and the
//! diagnostics counters.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use super::context::{ensure_current, release_if_current, ContextBinding};
use super::error::{PreviewError, Result};
use super::geometry::{Affine, Rect, Rotation, Size};
use super::image::Image;
use super::surface::PresentationSurface;
use crate::camera::frame::SampleBuffer;
use crate::diagnostics::stats::{DiagnosticStats, DropReason};

/// Number of initial frames logged at debug level.
const LOGGED_FRAMES: u64 = 3;

/// How the rotated image is placed inside the target rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentMode {
    /// Stretch to the whole target rectangle.
    #[default]
    Fill,
    /// Keep the aspect ratio and centre inside the target rectangle.
    AspectFit,
}

/// Receiver of frames delivered by a capture feed.
///
/// Called serially on the feed's delivery thread. Dropping the sample is the
/// release step.
pub trait FrameSink: Send {
    fn on_frame(&mut self, sample: SampleBuffer);
}

impl<F> FrameSink for F
where
    F: FnMut(SampleBuffer) + Send,
{
    fn on_frame(&mut self, sample: SampleBuffer) {
        self(sample)
    }
}

pub struct FrameProcessor<S: PresentationSurface> {
    surface: S,
    binding: Arc<dyn ContextBinding>,
    view_bounds: Size,
    display_scale: f64,
    rotation: Rotation,
    content_mode: ContentMode,
    /// Transform for the last seen extent.
    cached: Option<(Rect, Affine)>,
    stats: Arc<Mutex<DiagnosticStats>>,
}

impl<S: PresentationSurface> FrameProcessor<S> {
    /// Processor drawing into `surface`, sized to `view_bounds` (points)
    /// times `display_scale`.
    pub fn new(
        surface: S,
        binding: Arc<dyn ContextBinding>,
        view_bounds: Size,
        display_scale: f64,
    ) -> Self {
        Self {
            surface,
            binding,
            view_bounds,
            display_scale,
            rotation: Rotation::default(),
            content_mode: ContentMode::default(),
            cached: None,
            stats: Arc::new(Mutex::new(DiagnosticStats::new())),
        }
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.set_rotation(rotation);
        self
    }

    pub fn with_content_mode(mut self, content_mode: ContentMode) -> Self {
        self.content_mode = content_mode;
        self
    }

    /// Share diagnostics with the capture session feeding this processor.
    pub fn with_stats(mut self, stats: Arc<Mutex<DiagnosticStats>>) -> Self {
        self.stats = stats;
        self
    }

    pub fn set_rotation(&mut self, rotation: Rotation) {
        if self.rotation != rotation {
            self.rotation = rotation;
            self.cached = None;
        }
    }

    /// Update the view geometry, e.g. after the view was resized.
    pub fn set_view_bounds(&mut self, view_bounds: Size, display_scale: f64) {
        self.view_bounds = view_bounds;
        self.display_scale = display_scale;
    }

    pub fn stats(&self) -> Arc<Mutex<DiagnosticStats>> {
        Arc::clone(&self.stats)
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    /// Rectangle, in drawable pixels, the rotated image is drawn into.
    ///
    /// The bounds are the view scaled by the display density and rounded the
    /// same way the drawable is, so a fractional scale never overhangs it.
    pub fn target_rect(&self, content: Size) -> Rect {
        let (width, height) = self.view_bounds.scaled(self.display_scale).to_pixels();
        let bounds = Rect::new(0.0, 0.0, f64::from(width), f64::from(height));
        match self.content_mode {
            ContentMode::Fill => bounds,
            ContentMode::AspectFit => bounds.aspect_fit(content),
        }
    }

    /// Rotate and present one sample. Failures are scoped to the frame:
    /// they are logged and counted, and the sample is released either way.
    pub fn process(&mut self, sample: SampleBuffer) {
        let image = match wrap(&sample) {
            Ok(image) => image,
            Err(e) => {
                debug!(
                    timestamp_us = sample.timestamp_us(),
                    error = %e,
                    "dropping frame"
                );
                self.stats.lock().record_drop(DropReason::InvalidBuffer);
                return;
            }
        };

        let transform = self.transform_for(image.extent());
        let rotated = image.transformed(transform);
        let target = self.target_rect(rotated.extent().size());

        let context = self.surface.context();
        if ensure_current(self.binding.as_ref(), context) {
            debug!(context = context.as_u64(), "made preview context current");
        }

        if let Err(e) = self.present(&rotated, target) {
            warn!(error = %e, "failed to present frame");
            self.stats.lock().record_drop(DropReason::SurfaceFailure);
            return;
        }

        let bytes = sample.image_buffer().map_or(0, |buffer| buffer.data().len());
        let presented = {
            let mut stats = self.stats.lock();
            stats.record_frame(bytes, sample.timestamp_us());
            stats.frame_count()
        };
        if presented <= LOGGED_FRAMES {
            let extent = rotated.extent();
            debug!(
                frame = presented,
                width = extent.width,
                height = extent.height,
                target_width = target.width,
                target_height = target.height,
                "presented frame"
            );
        }
    }

    fn transform_for(&mut self, extent: Rect) -> Affine {
        match self.cached {
            Some((cached_extent, transform)) if cached_extent == extent => transform,
            _ => {
                debug!(
                    width = extent.width,
                    height = extent.height,
                    rotation = ?self.rotation,
                    "computing frame transform"
                );
                let transform = Affine::rotation_about_center(extent, self.rotation);
                self.cached = Some((extent, transform));
                transform
            }
        }
    }

    fn present(&mut self, image: &Image<'_>, target: Rect) -> Result<()> {
        self.surface.bind_drawable()?;
        self.surface.draw_image(image, target, image.extent())?;
        self.surface.display()
    }
}

fn wrap(sample: &SampleBuffer) -> Result<Image<'_>> {
    let buffer = sample
        .image_buffer()
        .ok_or(PreviewError::MissingImageBuffer)?;
    Image::from_pixel_buffer(buffer)
}

impl<S: PresentationSurface> FrameSink for FrameProcessor<S> {
    fn on_frame(&mut self, sample: SampleBuffer) {
        self.process(sample);
    }
}

impl<S: PresentationSurface> Drop for FrameProcessor<S> {
    fn drop(&mut self) {
        release_if_current(self.binding.as_ref(), self.surface.context());
    }
}
