use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable camera identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a new `DeviceId` from a raw string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the inner string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Discovered camera device.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraDevice {
    pub id: DeviceId,
    pub name: String,
    pub is_connected: bool,
}

/// Memory layout of a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// Bi-planar 4:2:0: full-resolution Y plane, then interleaved CbCr at
    /// half resolution in both dimensions. Full-range levels.
    Nv12,
    /// Packed 4:2:2 as `[Y0, U, Y1, V]` macro-pixels.
    Yuy2,
    /// Packed 32-bit BGRA.
    Bgra32,
    /// Packed 24-bit RGB.
    Rgb24,
}

impl PixelFormat {
    /// Number of planes the format stores.
    pub fn plane_count(self) -> usize {
        match self {
            Self::Nv12 => 2,
            Self::Yuy2 | Self::Bgra32 | Self::Rgb24 => 1,
        }
    }

    /// Minimum bytes per row and number of rows for `plane` of a
    /// `width`x`height` frame.
    pub fn plane_geometry(self, plane: usize, width: u32, height: u32) -> (usize, usize) {
        let (w, h) = (width as usize, height as usize);
        match (self, plane) {
            (Self::Nv12, 0) => (w, h),
            // One CbCr pair per 2x2 block, rounded up for odd sizes.
            (Self::Nv12, _) => (w.div_ceil(2) * 2, h.div_ceil(2)),
            (Self::Yuy2, _) => (w.div_ceil(2) * 4, h),
            (Self::Bgra32, _) => (w * 4, h),
            (Self::Rgb24, _) => (w * 3, h),
        }
    }

    /// Total bytes for a tightly packed frame.
    pub fn packed_len(self, width: u32, height: u32) -> usize {
        (0..self.plane_count())
            .map(|plane| {
                let (row, rows) = self.plane_geometry(plane, width, height);
                row * rows
            })
            .sum()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nv12 => "NV12",
            Self::Yuy2 => "YUY2",
            Self::Bgra32 => "BGRA",
            Self::Rgb24 => "RGB24",
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested capture resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPreset {
    #[default]
    Hd1920x1080,
    Hd1280x720,
    Vga640x480,
}

impl SessionPreset {
    pub const ALL: [SessionPreset; 3] = [
        SessionPreset::Hd1920x1080,
        SessionPreset::Hd1280x720,
        SessionPreset::Vga640x480,
    ];

    /// Frame dimensions delivered for this preset, in sensor orientation.
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Self::Hd1920x1080 => (1920, 1080),
            Self::Hd1280x720 => (1280, 720),
            Self::Vga640x480 => (640, 480),
        }
    }
}

impl fmt::Display for SessionPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (w, h) = self.dimensions();
        write!(f, "{w}x{h}")
    }
}

/// Camera video format descriptor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatDescriptor {
    pub width: u32,
    pub height: u32,
    pub fps: f32,
    pub pixel_format: PixelFormat,
}

impl FormatDescriptor {
    /// Whether this format delivers frames for `preset`.
    pub fn matches(&self, preset: SessionPreset) -> bool {
        (self.width, self.height) == preset.dimensions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_display() {
        let id = DeviceId::new("dummy:back-camera");
        assert_eq!(id.to_string(), "dummy:back-camera");
        assert_eq!(id.as_str(), "dummy:back-camera");
    }

    #[test]
    fn camera_device_serialises_to_json() {
        let device = CameraDevice {
            id: DeviceId::new("test"),
            name: "Test Cam".to_string(),
            is_connected: true,
        };
        let json = serde_json::to_value(&device).unwrap();
        assert_eq!(json["name"], "Test Cam");
        assert_eq!(json["isConnected"], true);
    }

    #[test]
    fn nv12_packed_len_is_one_and_a_half_bytes_per_pixel() {
        assert_eq!(PixelFormat::Nv12.packed_len(1920, 1080), 1920 * 1080 * 3 / 2);
        assert_eq!(PixelFormat::Nv12.packed_len(2, 2), 6);
    }

    #[test]
    fn nv12_chroma_plane_rounds_up_for_odd_sizes() {
        assert_eq!(PixelFormat::Nv12.plane_geometry(1, 3, 3), (4, 2));
    }

    #[test]
    fn packed_formats_have_single_plane() {
        assert_eq!(PixelFormat::Bgra32.plane_count(), 1);
        assert_eq!(PixelFormat::Bgra32.packed_len(4, 2), 32);
        assert_eq!(PixelFormat::Rgb24.packed_len(4, 2), 24);
        assert_eq!(PixelFormat::Yuy2.packed_len(4, 2), 16);
    }

    #[test]
    fn preset_dimensions_are_landscape() {
        assert_eq!(SessionPreset::Hd1920x1080.dimensions(), (1920, 1080));
        assert_eq!(SessionPreset::default(), SessionPreset::Hd1920x1080);
        assert_eq!(SessionPreset::Vga640x480.to_string(), "640x480");
    }

    #[test]
    fn preset_serialises_to_snake_case() {
        let json = serde_json::to_value(SessionPreset::Hd1280x720).unwrap();
        assert_eq!(json, "hd1280x720");
    }

    #[test]
    fn format_descriptor_matches_preset() {
        let format = FormatDescriptor {
            width: 1280,
            height: 720,
            fps: 30.0,
            pixel_format: PixelFormat::Nv12,
        };
        assert!(format.matches(SessionPreset::Hd1280x720));
        assert!(!format.matches(SessionPreset::Hd1920x1080));
    }
}
