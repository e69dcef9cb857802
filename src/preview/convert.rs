// Pixel reads for the capture formats the preview understands.
//
// YUV conversion uses BT.601 full-range coefficients in fixed point (<<8),
// which is what the capture path requests from the camera.

use crate::camera::frame::PixelBuffer;
use crate::camera::types::PixelFormat;

/// Convert one full-range YCbCr sample to RGB.
#[inline]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = i32::from(y) * 256;
    let u = i32::from(u) - 128;
    let v = i32::from(v) - 128;
    [
        ((y + 359 * v) >> 8).clamp(0, 255) as u8,
        ((y - 88 * u - 183 * v) >> 8).clamp(0, 255) as u8,
        ((y + 454 * u) >> 8).clamp(0, 255) as u8,
    ]
}

/// Read the pixel at `(col, row)` (row 0 is the top of the frame) as opaque
/// RGBA.
///
/// The buffer must have passed [`PixelBuffer::layout_error`]; coordinates
/// must lie inside the frame.
pub fn read_rgba(buffer: &PixelBuffer, col: u32, row: u32) -> [u8; 4] {
    let (col, row) = (col as usize, row as usize);
    let [r, g, b] = match buffer.format() {
        PixelFormat::Nv12 => {
            let y = buffer.row(0, row)[col];
            let uv = &buffer.row(1, row / 2)[(col / 2) * 2..];
            yuv_to_rgb(y, uv[0], uv[1])
        }
        PixelFormat::Yuy2 => {
            let macro_pixel = &buffer.row(0, row)[(col / 2) * 4..];
            let y = if col % 2 == 0 {
                macro_pixel[0]
            } else {
                macro_pixel[2]
            };
            yuv_to_rgb(y, macro_pixel[1], macro_pixel[3])
        }
        PixelFormat::Bgra32 => {
            let px = &buffer.row(0, row)[col * 4..];
            [px[2], px[1], px[0]]
        }
        PixelFormat::Rgb24 => {
            let px = &buffer.row(0, row)[col * 3..];
            [px[0], px[1], px[2]]
        }
    };
    [r, g, b, 255]
}

/// Write an RGB colour into an NV12 frame as full-range YCbCr.
///
/// Used by the synthetic camera to paint test patterns. Chroma is written for
/// the 2x2 block containing `(col, row)`.
pub fn write_nv12(buffer: &mut PixelBuffer, col: u32, row: u32, rgb: [u8; 3]) {
    let (y, u, v) = rgb_to_yuv(rgb);
    let (luma, chroma) = (buffer.planes()[0], buffer.planes()[1]);
    let (col, row) = (col as usize, row as usize);
    let data = buffer.data_mut();
    data[luma.offset + row * luma.bytes_per_row + col] = y;
    let uv = chroma.offset + (row / 2) * chroma.bytes_per_row + (col / 2) * 2;
    data[uv] = u;
    data[uv + 1] = v;
}

/// Full-range RGB to YCbCr in fixed point.
pub fn rgb_to_yuv([r, g, b]: [u8; 3]) -> (u8, u8, u8) {
    let (r, g, b) = (i32::from(r), i32::from(g), i32::from(b));
    let y = (77 * r + 150 * g + 29 * b) >> 8;
    let u = ((-43 * r - 85 * g + 128 * b) >> 8) + 128;
    let v = ((128 * r - 107 * g - 21 * b) >> 8) + 128;
    (
        y.clamp(0, 255) as u8,
        u.clamp(0, 255) as u8,
        v.clamp(0, 255) as u8,
    )
}
