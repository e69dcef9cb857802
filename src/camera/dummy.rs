use crate::camera::backend::{CameraBackend, FrameSource};
use crate::camera::error::{CameraError, Result};
use crate::camera::frame::PixelBuffer;
use crate::camera::types::{
    CameraDevice, DeviceId, FormatDescriptor, PixelFormat, SessionPreset,
};
use crate::preview::convert::{rgb_to_yuv, write_nv12};

const DUMMY_DEVICE_ID: &str = "dummy:test:camera-001";
const DUMMY_DEVICE_NAME: &str = "Dummy Test Camera";

/// SMPTE-style colour bars, left to right.
const BARS: [[u8; 3]; 8] = [
    [235, 235, 235],
    [235, 235, 16],
    [16, 235, 235],
    [16, 235, 16],
    [235, 16, 235],
    [235, 16, 16],
    [16, 16, 235],
    [16, 16, 16],
];

/// Colour of the square that moves across the bars.
const MARKER: [u8; 3] = [255, 128, 0];

/// A fake camera backend for running the preview without real hardware.
///
/// Exposes one device that streams NV12 colour bars at every session preset,
/// with a square that advances a few pixels per frame so motion and dropped
/// frames are visible.
pub struct DummyBackend {
    fps: f32,
}

impl DummyBackend {
    pub fn new() -> Self {
        Self { fps: 30.0 }
    }

    /// Advertise `fps` as the frame rate of every format.
    pub fn with_fps(fps: f32) -> Self {
        Self { fps }
    }

    /// The stable device ID for the dummy camera.
    pub fn device_id() -> DeviceId {
        DeviceId::new(DUMMY_DEVICE_ID)
    }

    fn check_device(id: &DeviceId) -> Result<()> {
        if id == &Self::device_id() {
            Ok(())
        } else {
            Err(CameraError::DeviceNotFound(id.to_string()))
        }
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraBackend for DummyBackend {
    fn enumerate_devices(&self) -> Result<Vec<CameraDevice>> {
        Ok(vec![CameraDevice {
            id: Self::device_id(),
            name: DUMMY_DEVICE_NAME.to_string(),
            is_connected: true,
        }])
    }

    fn get_formats(&self, id: &DeviceId) -> Result<Vec<FormatDescriptor>> {
        Self::check_device(id)?;
        Ok(SessionPreset::ALL
            .iter()
            .map(|preset| {
                let (width, height) = preset.dimensions();
                FormatDescriptor {
                    width,
                    height,
                    fps: self.fps,
                    pixel_format: PixelFormat::Nv12,
                }
            })
            .collect())
    }

    fn open_stream(
        &self,
        id: &DeviceId,
        format: &FormatDescriptor,
    ) -> Result<Box<dyn FrameSource>> {
        Self::check_device(id)?;
        if format.pixel_format != PixelFormat::Nv12 {
            return Err(CameraError::Configuration(format!(
                "dummy camera only produces NV12, not {}",
                format.pixel_format
            )));
        }
        Ok(Box::new(ColourBars::new(format.clone())))
    }
}

/// Frame source painting [`BARS`] plus a moving marker.
struct ColourBars {
    format: FormatDescriptor,
    /// Luma and interleaved chroma rows, computed once per stream.
    luma_row: Vec<u8>,
    chroma_row: Vec<u8>,
}

impl ColourBars {
    fn new(format: FormatDescriptor) -> Self {
        let width = format.width as usize;
        let bar_width = width.div_ceil(BARS.len()).max(1);
        let yuv_at = |col: usize| rgb_to_yuv(BARS[(col / bar_width).min(BARS.len() - 1)]);

        let luma_row = (0..width).map(|col| yuv_at(col).0).collect();
        let chroma_row = (0..width.div_ceil(2))
            .flat_map(|pair| {
                let (_, u, v) = yuv_at(pair * 2);
                [u, v]
            })
            .collect();

        Self {
            format,
            luma_row,
            chroma_row,
        }
    }

    fn marker_origin(&self, sequence: u64) -> (u32, u32) {
        let size = self.marker_size();
        let travel = u64::from(self.format.width.saturating_sub(size).max(1));
        let x = (sequence * 8 % travel) as u32;
        let y = self.format.height.saturating_sub(size) / 2;
        (x, y)
    }

    fn marker_size(&self) -> u32 {
        (self.format.height / 8).max(1).min(self.format.width)
    }
}

impl FrameSource for ColourBars {
    fn format(&self) -> &FormatDescriptor {
        &self.format
    }

    fn fill(&mut self, buffer: &mut PixelBuffer, sequence: u64) -> Result<()> {
        let (width, height) = (self.format.width, self.format.height);
        if buffer.format() != PixelFormat::Nv12
            || buffer.width() != width
            || buffer.height() != height
        {
            return Err(CameraError::Configuration(format!(
                "buffer is {} {}x{}, stream is NV12 {width}x{height}",
                buffer.format(),
                buffer.width(),
                buffer.height()
            )));
        }
        if let Some(problem) = buffer.layout_error() {
            return Err(CameraError::Configuration(problem));
        }

        let (luma, chroma) = (buffer.planes()[0], buffer.planes()[1]);
        let data = buffer.data_mut();
        for row in 0..height as usize {
            let start = luma.offset + row * luma.bytes_per_row;
            data[start..start + self.luma_row.len()].copy_from_slice(&self.luma_row);
        }
        for row in 0..(height as usize).div_ceil(2) {
            let start = chroma.offset + row * chroma.bytes_per_row;
            data[start..start + self.chroma_row.len()].copy_from_slice(&self.chroma_row);
        }

        let size = self.marker_size();
        let (x0, y0) = self.marker_origin(sequence);
        for row in y0..(y0 + size).min(height) {
            for col in x0..(x0 + size).min(width) {
                write_nv12(buffer, col, row, MARKER);
            }
        }
        Ok(())
    }
}
