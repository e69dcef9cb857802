use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, RgbaImage};
use std::path::Path;
use tracing::info;

use super::error::{PreviewError, Result};
use super::frame_buffer::FrameBuffer;

/// Encoded image format for snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    Png,
    /// JPEG at the given quality (1-100).
    Jpeg(u8),
}

impl SnapshotFormat {
    /// Pick a format from the file extension; anything but `.jpg`/`.jpeg`
    /// is written as PNG.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("jpg" | "jpeg") => SnapshotFormat::Jpeg(85),
            _ => SnapshotFormat::Png,
        }
    }
}

/// Encode presented RGBA pixels.
///
/// JPEG has no alpha channel, so the pixels are flattened to RGB first.
pub fn encode(pixels: &RgbaImage, format: SnapshotFormat) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    match format {
        SnapshotFormat::Png => {
            pixels.write_with_encoder(PngEncoder::new(&mut buf))?;
        }
        SnapshotFormat::Jpeg(quality) => {
            let rgb = DynamicImage::ImageRgba8(pixels.clone()).to_rgb8();
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))?;
        }
    }
    Ok(buf)
}

/// Write the most recently presented frame to `path`. Returns the
/// presentation sequence number of the frame written.
pub fn write_latest(frames: &FrameBuffer, path: &Path) -> Result<u64> {
    let frame = frames.latest().ok_or(PreviewError::NothingPresented)?;
    let bytes = encode(&frame.pixels, SnapshotFormat::from_path(path))?;
    std::fs::write(path, &bytes)?;
    info!(
        path = %path.display(),
        sequence = frame.sequence,
        bytes = bytes.len(),
        "wrote preview snapshot"
    );
    Ok(frame.sequence)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Synthetic gradient so the encoders have something to compress.
    fn make_test_rgba(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            image::Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
        })
    }

    #[test]
    fn png_snapshot_has_png_signature() {
        let png = encode(&make_test_rgba(64, 48), SnapshotFormat::Png).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn jpeg_snapshot_has_soi_marker() {
        let jpeg = encode(&make_test_rgba(64, 48), SnapshotFormat::Jpeg(85)).unwrap();
        assert_eq!(jpeg[0], 0xFF);
        assert_eq!(jpeg[1], 0xD8);
    }

    #[test]
    fn lower_jpeg_quality_produces_smaller_output() {
        let pixels = make_test_rgba(640, 480);
        let high = encode(&pixels, SnapshotFormat::Jpeg(85)).unwrap();
        let low = encode(&pixels, SnapshotFormat::Jpeg(30)).unwrap();
        assert!(
            low.len() < high.len(),
            "quality 30 ({}) should be smaller than quality 85 ({})",
            low.len(),
            high.len()
        );
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(
            SnapshotFormat::from_path(Path::new("shot.JPG")),
            SnapshotFormat::Jpeg(85)
        );
        assert_eq!(
            SnapshotFormat::from_path(Path::new("shot.png")),
            SnapshotFormat::Png
        );
        assert_eq!(
            SnapshotFormat::from_path(Path::new("shot")),
            SnapshotFormat::Png
        );
    }

    #[test]
    fn write_latest_without_frames_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = write_latest(&FrameBuffer::new(3), &dir.path().join("shot.png"));
        assert!(matches!(result, Err(PreviewError::NothingPresented)));
    }

    #[test]
    fn write_latest_round_trips_through_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.png");
        let frames = FrameBuffer::new(3);
        frames.push(make_test_rgba(16, 8));

        assert_eq!(write_latest(&frames, &path).unwrap(), 1);
        let decoded = image::open(&path).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (16, 8));
        assert_eq!(decoded.get_pixel(3, 5).0, [3, 5, 128, 255]);
    }
}
