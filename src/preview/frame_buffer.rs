use image::RgbaImage;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A drawable as it looked when it was presented.
pub struct PresentedFrame {
    /// Presented pixels, top row first.
    pub pixels: RgbaImage,
    /// Presentation sequence number, starting at 1.
    pub sequence: u64,
}

/// Thread-safe ring of recently presented frames.
///
/// Stores up to `capacity` frames, overwriting the oldest when full. Frames
/// are wrapped in `Arc` so readers (snapshots, tests) get a cheap
/// reference-counted pointer instead of cloning the drawable.
pub struct FrameBuffer {
    frames: Mutex<Vec<Option<Arc<PresentedFrame>>>>,
    capacity: usize,
    write_idx: Mutex<usize>,
    sequence: AtomicU64,
}

impl FrameBuffer {
    /// Create a new ring buffer with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let frames = (0..capacity).map(|_| None).collect();
        Self {
            frames: Mutex::new(frames),
            capacity,
            write_idx: Mutex::new(0),
            sequence: AtomicU64::new(0),
        }
    }

    /// Record a presented drawable, overwriting the oldest entry if full.
    /// Returns the sequence number assigned to it.
    pub fn push(&self, pixels: RgbaImage) -> u64 {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        if self.capacity == 0 {
            return sequence;
        }
        let mut frames = self.frames.lock();
        let mut idx = self.write_idx.lock();
        frames[*idx] = Some(Arc::new(PresentedFrame { pixels, sequence }));
        *idx = (*idx + 1) % self.capacity;
        sequence
    }

    /// Count a presentation whose pixels were not kept.
    pub fn advance(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Number of frames presented so far.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// Most recently presented frame, if any.
    pub fn latest(&self) -> Option<Arc<PresentedFrame>> {
        if self.capacity == 0 {
            return None;
        }
        let frames = self.frames.lock();
        let idx = self.write_idx.lock();
        let latest_idx = if *idx == 0 {
            self.capacity - 1
        } else {
            *idx - 1
        };
        frames[latest_idx].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(value: u8) -> RgbaImage {
        RgbaImage::from_pixel(2, 2, image::Rgba([value, value, value, 255]))
    }

    #[test]
    fn frame_buffer_returns_none_when_empty() {
        let buf = FrameBuffer::new(3);
        assert!(buf.latest().is_none());
        assert_eq!(buf.sequence(), 0);
    }

    #[test]
    fn frame_buffer_stores_and_retrieves_latest() {
        let buf = FrameBuffer::new(3);
        buf.push(solid(1));
        buf.push(solid(2));

        let latest = buf.latest().unwrap();
        assert_eq!(latest.pixels.get_pixel(0, 0).0[0], 2);
        assert_eq!(latest.sequence, 2);
    }

    #[test]
    fn frame_buffer_overwrites_oldest_when_full() {
        let buf = FrameBuffer::new(3);
        for value in 1..=4 {
            buf.push(solid(value));
        }
        let latest = buf.latest().unwrap();
        assert_eq!(latest.pixels.get_pixel(0, 0).0[0], 4);
        assert_eq!(buf.sequence(), 4);
    }

    #[test]
    fn zero_capacity_still_counts_presentations() {
        let buf = FrameBuffer::new(0);
        assert_eq!(buf.push(solid(1)), 1);
        assert!(buf.latest().is_none());
    }

    #[test]
    fn advance_counts_without_storing() {
        let buf = FrameBuffer::new(3);
        assert_eq!(buf.advance(), 1);
        assert_eq!(buf.push(solid(1)), 2);
        assert_eq!(buf.latest().unwrap().sequence, 2);
    }

    #[test]
    fn latest_returns_shared_frame() {
        let buf = FrameBuffer::new(3);
        buf.push(solid(42));
        let a = buf.latest().unwrap();
        let b = buf.latest().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn frame_buffer_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<FrameBuffer>();
    }
}
