use fast_image_resize as fr;
use image::RgbaImage;
use std::sync::Arc;

use super::context::ContextId;
use super::error::{PreviewError, Result};
use super::frame_buffer::FrameBuffer;
use super::geometry::Rect;
use super::image::Image;
use super::surface::PresentationSurface;

/// CPU-backed drawable.
///
/// Draws rasterise the requested region of the image, scale it to the
/// destination rectangle with `fast_image_resize`, and copy it into the
/// drawable. `display` publishes a copy of the drawable to a [`FrameBuffer`].
pub struct SoftwareSurface {
    context: ContextId,
    width: u32,
    height: u32,
    drawable: RgbaImage,
    bound: bool,
    resizer: fr::Resizer,
    presented: Arc<FrameBuffer>,
}

impl SoftwareSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            context: ContextId::next(),
            width,
            height,
            drawable: RgbaImage::new(width, height),
            bound: false,
            resizer: fr::Resizer::new(),
            presented: Arc::new(FrameBuffer::new(3)),
        }
    }

    /// Frames presented by this surface.
    pub fn presented(&self) -> Arc<FrameBuffer> {
        Arc::clone(&self.presented)
    }

    fn scale_to(&mut self, rendered: RgbaImage, width: u32, height: u32) -> Result<RgbaImage> {
        if rendered.dimensions() == (width, height) {
            return Ok(rendered);
        }
        let (src_w, src_h) = rendered.dimensions();
        let src = fr::images::Image::from_vec_u8(
            src_w,
            src_h,
            rendered.into_raw(),
            fr::PixelType::U8x4,
        )
        .map_err(|e| PreviewError::Resize(e.to_string()))?;
        let mut dst = fr::images::Image::new(width, height, fr::PixelType::U8x4);
        self.resizer
            .resize(&src, &mut dst, None)
            .map_err(|e| PreviewError::Resize(e.to_string()))?;
        RgbaImage::from_raw(width, height, dst.into_vec())
            .ok_or_else(|| PreviewError::Resize("scaled buffer size mismatch".to_string()))
    }

    /// Copy `pixels` into the drawable with its bottom-left corner at
    /// `(x, y)` in y-up drawable coordinates, clipping to the drawable.
    fn blit(&mut self, pixels: &RgbaImage, x: i64, y: i64) {
        let (w, h) = pixels.dimensions();
        let top = i64::from(self.height) - (y + i64::from(h));
        for row in 0..h {
            let dst_row = top + i64::from(row);
            if dst_row < 0 || dst_row >= i64::from(self.height) {
                continue;
            }
            for col in 0..w {
                let dst_col = x + i64::from(col);
                if dst_col < 0 || dst_col >= i64::from(self.width) {
                    continue;
                }
                self.drawable.put_pixel(
                    dst_col as u32,
                    dst_row as u32,
                    *pixels.get_pixel(col, row),
                );
            }
        }
    }
}

impl PresentationSurface for SoftwareSurface {
    fn context(&self) -> ContextId {
        self.context
    }

    fn drawable_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn bind_drawable(&mut self) -> Result<()> {
        for px in self.drawable.pixels_mut() {
            *px = image::Rgba([0, 0, 0, 255]);
        }
        self.bound = true;
        Ok(())
    }

    fn draw_image(&mut self, image: &Image<'_>, dest: Rect, source: Rect) -> Result<()> {
        if !self.bound {
            return Err(PreviewError::DrawableNotBound);
        }
        let (width, height) = dest.pixel_size();
        if width == 0 || height == 0 {
            return Err(PreviewError::EmptyRegion { width, height });
        }
        let rendered = image.render_rgba(source)?;
        let scaled = self.scale_to(rendered, width, height)?;
        self.blit(&scaled, dest.x.round() as i64, dest.y.round() as i64);
        Ok(())
    }

    fn display(&mut self) -> Result<()> {
        if !self.bound {
            return Err(PreviewError::DrawableNotBound);
        }
        self.bound = false;
        self.presented.push(self.drawable.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::frame::PixelBuffer;
    use crate::camera::pool::PooledBuffer;
    use crate::camera::types::PixelFormat;

    fn red_buffer(width: u32, height: u32) -> PixelBuffer {
        let data = [255u8, 0, 0].repeat((width * height) as usize);
        PixelBuffer::packed(
            PixelFormat::Rgb24,
            width,
            height,
            PooledBuffer::detached(data),
        )
    }

    #[test]
    fn draw_requires_bound_drawable() {
        let buffer = red_buffer(2, 2);
        let image = Image::from_pixel_buffer(&buffer).unwrap();
        let mut surface = SoftwareSurface::new(4, 4);
        let result = surface.draw_image(&image, Rect::new(0.0, 0.0, 4.0, 4.0), image.extent());
        assert!(matches!(result, Err(PreviewError::DrawableNotBound)));
    }

    #[test]
    fn display_requires_bound_drawable() {
        let mut surface = SoftwareSurface::new(4, 4);
        assert!(matches!(
            surface.display(),
            Err(PreviewError::DrawableNotBound)
        ));
    }

    #[test]
    fn draw_scales_image_to_fill_destination() {
        let buffer = red_buffer(2, 2);
        let image = Image::from_pixel_buffer(&buffer).unwrap();
        let mut surface = SoftwareSurface::new(8, 6);

        surface.bind_drawable().unwrap();
        surface
            .draw_image(&image, Rect::new(0.0, 0.0, 8.0, 6.0), image.extent())
            .unwrap();
        surface.display().unwrap();

        let frame = surface.presented().latest().unwrap();
        assert_eq!(frame.pixels.dimensions(), (8, 6));
        // Resampling a flat colour may round by one step.
        assert!(frame
            .pixels
            .pixels()
            .all(|p| p.0[0] >= 254 && p.0[1] <= 1 && p.0[2] <= 1));
    }

    #[test]
    fn destination_rect_is_y_up() {
        let buffer = red_buffer(1, 1);
        let image = Image::from_pixel_buffer(&buffer).unwrap();
        let mut surface = SoftwareSurface::new(2, 2);

        surface.bind_drawable().unwrap();
        // Bottom-left pixel in y-up coordinates.
        surface
            .draw_image(&image, Rect::new(0.0, 0.0, 1.0, 1.0), image.extent())
            .unwrap();
        surface.display().unwrap();

        let frame = surface.presented().latest().unwrap();
        assert_eq!(frame.pixels.get_pixel(0, 1).0, [255, 0, 0, 255]);
        assert_eq!(frame.pixels.get_pixel(0, 0).0, [0, 0, 0, 255]);
    }

    #[test]
    fn bind_clears_previous_contents() {
        let buffer = red_buffer(1, 1);
        let image = Image::from_pixel_buffer(&buffer).unwrap();
        let mut surface = SoftwareSurface::new(1, 1);

        surface.bind_drawable().unwrap();
        surface
            .draw_image(&image, Rect::new(0.0, 0.0, 1.0, 1.0), image.extent())
            .unwrap();
        surface.display().unwrap();

        surface.bind_drawable().unwrap();
        surface.display().unwrap();

        let frame = surface.presented().latest().unwrap();
        assert_eq!(frame.pixels.get_pixel(0, 0).0, [0, 0, 0, 255]);
        assert_eq!(frame.sequence, 2);
    }

    #[test]
    fn each_surface_has_its_own_context() {
        assert_ne!(
            SoftwareSurface::new(1, 1).context(),
            SoftwareSurface::new(1, 1).context()
        );
    }
}
