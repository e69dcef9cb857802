use image::RgbaImage;

use super::convert::read_rgba;
use super::error::{PreviewError, Result};
use super::geometry::{Affine, Rect};
use crate::camera::frame::PixelBuffer;

/// A pixel buffer viewed through an affine transform.
///
/// Nothing is computed until [`Image::render_rgba`]; transforming only
/// composes matrices and recomputes the extent. Image space is y-up with the
/// origin at the bottom-left corner, so buffer row 0 sits at the top of the
/// extent.
#[derive(Clone, Copy)]
pub struct Image<'a> {
    source: &'a PixelBuffer,
    transform: Affine,
    extent: Rect,
}

impl<'a> Image<'a> {
    /// Wrap a pixel buffer at its native extent, rejecting buffers whose
    /// layout cannot be read.
    pub fn from_pixel_buffer(source: &'a PixelBuffer) -> Result<Self> {
        if let Some(reason) = source.layout_error() {
            return Err(PreviewError::InvalidBuffer(reason));
        }
        Ok(Self {
            source,
            transform: Affine::IDENTITY,
            extent: Rect::new(
                0.0,
                0.0,
                f64::from(source.width()),
                f64::from(source.height()),
            ),
        })
    }

    pub fn extent(&self) -> Rect {
        self.extent
    }

    pub fn transform(&self) -> Affine {
        self.transform
    }

    /// New image with `transform` applied after any existing one.
    pub fn transformed(&self, transform: Affine) -> Image<'a> {
        Image {
            source: self.source,
            transform: self.transform.then(transform),
            extent: transform.apply_to_rect(self.extent),
        }
    }

    /// Rasterise `region` of this image to RGBA at one pixel per unit.
    ///
    /// Each output pixel samples the source pixel under its centre; points
    /// that fall outside the source are transparent.
    pub fn render_rgba(&self, region: Rect) -> Result<RgbaImage> {
        let (out_w, out_h) = region.pixel_size();
        if out_w == 0 || out_h == 0 {
            return Err(PreviewError::EmptyRegion {
                width: out_w,
                height: out_h,
            });
        }
        let inverse = self
            .transform
            .invert()
            .ok_or(PreviewError::DegenerateTransform)?;

        let src_w = f64::from(self.source.width());
        let src_h = f64::from(self.source.height());
        let step_x = region.width / f64::from(out_w);
        let step_y = region.height / f64::from(out_h);

        let mut pixels = vec![0u8; out_w as usize * out_h as usize * 4];
        for (row, line) in pixels.chunks_exact_mut(out_w as usize * 4).enumerate() {
            let y = region.max_y() - (row as f64 + 0.5) * step_y;
            for (col, px) in line.chunks_exact_mut(4).enumerate() {
                let x = region.x + (col as f64 + 0.5) * step_x;
                let (sx, sy) = inverse.apply(x, y);
                if sx < 0.0 || sy < 0.0 || sx >= src_w || sy >= src_h {
                    continue;
                }
                let src_col = sx.floor() as u32;
                let src_row = self.source.height() - 1 - sy.floor() as u32;
                px.copy_from_slice(&read_rgba(self.source, src_col, src_row));
            }
        }

        RgbaImage::from_raw(out_w, out_h, pixels)
            .ok_or_else(|| PreviewError::InvalidBuffer("rendered size mismatch".to_string()))
    }
}
