use super::pool::PooledBuffer;
use super::types::PixelFormat;

/// Placement of one plane inside a pixel buffer's storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    pub offset: usize,
    pub bytes_per_row: usize,
}

/// Captured pixels plus the layout needed to interpret them.
///
/// Construction does not validate anything: buffers come straight from the
/// capture source and are checked when they are wrapped for rendering.
pub struct PixelBuffer {
    format: PixelFormat,
    width: u32,
    height: u32,
    planes: Vec<PlaneLayout>,
    data: PooledBuffer,
}

impl PixelBuffer {
    pub fn new(
        format: PixelFormat,
        width: u32,
        height: u32,
        planes: Vec<PlaneLayout>,
        data: PooledBuffer,
    ) -> Self {
        Self {
            format,
            width,
            height,
            planes,
            data,
        }
    }

    /// Pixel buffer with tightly packed rows and planes stored back to back.
    pub fn packed(format: PixelFormat, width: u32, height: u32, data: PooledBuffer) -> Self {
        let mut offset = 0;
        let planes = (0..format.plane_count())
            .map(|plane| {
                let (bytes_per_row, rows) = format.plane_geometry(plane, width, height);
                let layout = PlaneLayout {
                    offset,
                    bytes_per_row,
                };
                offset += bytes_per_row * rows;
                layout
            })
            .collect();
        Self::new(format, width, height, planes, data)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn planes(&self) -> &[PlaneLayout] {
        &self.planes
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Describe why this buffer cannot be read, or `None` if every plane the
    /// format needs is present and fits inside the storage.
    pub fn layout_error(&self) -> Option<String> {
        if self.width == 0 || self.height == 0 {
            return Some(format!("empty extent {}x{}", self.width, self.height));
        }
        let expected = self.format.plane_count();
        if self.planes.len() != expected {
            return Some(format!(
                "{} needs {expected} plane(s), got {}",
                self.format,
                self.planes.len()
            ));
        }
        for (index, plane) in self.planes.iter().enumerate() {
            let (min_row, rows) = self.format.plane_geometry(index, self.width, self.height);
            if plane.bytes_per_row < min_row {
                return Some(format!(
                    "plane {index}: {} bytes per row, need at least {min_row}",
                    plane.bytes_per_row
                ));
            }
            let end = plane_span(plane.bytes_per_row, rows, min_row)
                .and_then(|span| span.checked_add(plane.offset));
            match end {
                Some(end) if end <= self.data.len() => {}
                Some(end) => {
                    return Some(format!(
                        "plane {index}: needs {end} bytes, buffer holds {}",
                        self.data.len()
                    ));
                }
                None => {
                    return Some(format!(
                        "plane {index}: layout overflows ({} bytes per row at offset {})",
                        plane.bytes_per_row, plane.offset
                    ));
                }
            }
        }
        None
    }

    /// Bytes of `plane` starting at `row`.
    pub(crate) fn row(&self, plane: usize, row: usize) -> &[u8] {
        let layout = self.planes[plane];
        &self.data[layout.offset + row * layout.bytes_per_row..]
    }
}

/// Bytes a plane of `rows` rows spans when its last row only holds its
/// visible `min_row` bytes, or `None` if that does not fit in memory.
pub fn plane_span(bytes_per_row: usize, rows: usize, min_row: usize) -> Option<usize> {
    let span = bytes_per_row
        .checked_mul(rows.checked_sub(1)?)?
        .checked_add(min_row)?;
    (span <= isize::MAX as usize).then_some(span)
}

/// Callback fired once a delivered frame has been fully released.
pub type ReleaseHook = Box<dyn FnOnce() + Send>;

/// One frame as delivered by the capture feed.
///
/// The feed owns the sample for the duration of one delivery; dropping it is
/// the release step. The pixel storage goes back to the feed's pool first,
/// then the release hook (if any) fires exactly once.
pub struct SampleBuffer {
    image_buffer: Option<PixelBuffer>,
    timestamp_us: u64,
    release: Option<ReleaseHook>,
}

impl SampleBuffer {
    pub fn new(image_buffer: PixelBuffer, timestamp_us: u64) -> Self {
        Self {
            image_buffer: Some(image_buffer),
            timestamp_us,
            release: None,
        }
    }

    /// A sample that carries no image buffer at all.
    pub fn without_image(timestamp_us: u64) -> Self {
        Self {
            image_buffer: None,
            timestamp_us,
            release: None,
        }
    }

    pub fn with_release_hook(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(hook));
        self
    }

    pub fn image_buffer(&self) -> Option<&PixelBuffer> {
        self.image_buffer.as_ref()
    }

    pub fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }

    /// Frame width and height, if an image buffer is attached.
    pub fn extent(&self) -> Option<(u32, u32)> {
        self.image_buffer
            .as_ref()
            .map(|buffer| (buffer.width(), buffer.height()))
    }
}

impl Drop for SampleBuffer {
    fn drop(&mut self) {
        drop(self.image_buffer.take());
        if let Some(release) = self.release.take() {
            release();
        }
    }
}
