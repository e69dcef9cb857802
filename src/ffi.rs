//! C ABI for hosts that own the capture delegate and the view.
//!
//! The host creates a processor with a table of callbacks, then pushes every
//! NV12 frame its capture delegate receives through
//! [`glcam_processor_process_nv12`]. The processor rotates the frame and
//! calls back into the host to bind, draw and display. Every pushed frame
//! ends with exactly one `release_frame` callback carrying the host's token,
//! whether it was presented or dropped.
//!
//! ```c
//! GlcamHostCallbacks cb = { ctx, bind, draw, display, release };
//! GlcamProcessor *p = glcam_processor_new(cb, 400.0, 300.0, 2.0);
//! glcam_processor_process_nv12(p, &frame, sample_ref);
//! glcam_processor_free(p);
//! ```

use std::ffi::c_void;
use std::sync::Arc;
use tracing::debug;

use crate::camera::frame::{plane_span, PixelBuffer, PlaneLayout, SampleBuffer};
use crate::camera::pool::PooledBuffer;
use crate::camera::types::PixelFormat;
use crate::preview::context::{ContextId, ThreadContextBinding};
use crate::preview::error::{PreviewError, Result};
use crate::preview::geometry::{Rect, Size};
use crate::preview::image::Image;
use crate::preview::processor::FrameProcessor;
use crate::preview::surface::PresentationSurface;

pub type GlcamBindFn = unsafe extern "C" fn(user_data: *mut c_void) -> bool;

/// Draw `width`x`height` RGBA pixels (top row first) into the destination
/// rectangle, given in y-up drawable pixels.
pub type GlcamDrawFn = unsafe extern "C" fn(
    user_data: *mut c_void,
    pixels: *const u8,
    width: u32,
    height: u32,
    dest_x: f64,
    dest_y: f64,
    dest_width: f64,
    dest_height: f64,
) -> bool;

pub type GlcamDisplayFn = unsafe extern "C" fn(user_data: *mut c_void) -> bool;

pub type GlcamReleaseFn = unsafe extern "C" fn(user_data: *mut c_void, frame_token: *mut c_void);

/// Host callbacks. All four are required.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct GlcamHostCallbacks {
    pub user_data: *mut c_void,
    pub bind_drawable: Option<GlcamBindFn>,
    pub draw_rgba: Option<GlcamDrawFn>,
    pub display: Option<GlcamDisplayFn>,
    pub release_frame: Option<GlcamReleaseFn>,
}

/// One bi-planar NV12 frame as the host's capture delegate sees it.
#[repr(C)]
pub struct GlcamNv12Frame {
    pub width: u32,
    pub height: u32,
    pub luma: *const u8,
    pub luma_bytes_per_row: usize,
    pub chroma: *const u8,
    pub chroma_bytes_per_row: usize,
    pub timestamp_us: u64,
}

/// Opaque processor handle.
pub struct GlcamProcessor {
    processor: FrameProcessor<HostSurface>,
    release: GlcamReleaseFn,
    user_data: *mut c_void,
}

/// Surface that forwards to the host callbacks.
struct HostSurface {
    context: ContextId,
    drawable: (u32, u32),
    user_data: *mut c_void,
    bind: GlcamBindFn,
    draw: GlcamDrawFn,
    display: GlcamDisplayFn,
}

// SAFETY: the host promises its callbacks and `user_data` may be used from
// whichever thread it calls `glcam_processor_process_nv12` on.
unsafe impl Send for HostSurface {}

impl PresentationSurface for HostSurface {
    fn context(&self) -> ContextId {
        self.context
    }

    fn drawable_size(&self) -> (u32, u32) {
        self.drawable
    }

    fn bind_drawable(&mut self) -> Result<()> {
        // SAFETY: callback and user_data come from the host's callback table.
        if unsafe { (self.bind)(self.user_data) } {
            Ok(())
        } else {
            Err(PreviewError::Host("bind_drawable"))
        }
    }

    fn draw_image(&mut self, image: &Image<'_>, dest: Rect, source: Rect) -> Result<()> {
        let pixels = image.render_rgba(source)?;
        let (width, height) = pixels.dimensions();
        // SAFETY: `pixels` outlives the call; the host copies what it needs.
        let drawn = unsafe {
            (self.draw)(
                self.user_data,
                pixels.as_raw().as_ptr(),
                width,
                height,
                dest.x,
                dest.y,
                dest.width,
                dest.height,
            )
        };
        if drawn {
            Ok(())
        } else {
            Err(PreviewError::Host("draw_rgba"))
        }
    }

    fn display(&mut self) -> Result<()> {
        // SAFETY: see `bind_drawable`.
        if unsafe { (self.display)(self.user_data) } {
            Ok(())
        } else {
            Err(PreviewError::Host("display"))
        }
    }
}

/// Hands the frame token back to the host once the sample is dropped.
struct HostRelease {
    callback: GlcamReleaseFn,
    user_data: *mut c_void,
    token: *mut c_void,
}

// SAFETY: as for `HostSurface`.
unsafe impl Send for HostRelease {}

impl HostRelease {
    fn fire(self) {
        // SAFETY: callback, user_data and token were supplied by the host.
        unsafe { (self.callback)(self.user_data, self.token) }
    }
}

/// Copy the host's planes into an owned pixel buffer, or `None` if the
/// frame description is unusable.
///
/// # Safety
///
/// Non-null plane pointers must be valid for their described rows.
unsafe fn copy_nv12(frame: &GlcamNv12Frame) -> Option<PixelBuffer> {
    let format = PixelFormat::Nv12;
    if frame.width == 0 || frame.height == 0 || frame.luma.is_null() || frame.chroma.is_null() {
        return None;
    }

    let mut data = Vec::new();
    let mut planes = Vec::with_capacity(2);
    for (plane, (ptr, bytes_per_row)) in [
        (frame.luma, frame.luma_bytes_per_row),
        (frame.chroma, frame.chroma_bytes_per_row),
    ]
    .into_iter()
    .enumerate()
    {
        let (min_row, rows) = format.plane_geometry(plane, frame.width, frame.height);
        if bytes_per_row < min_row {
            return None;
        }
        let len = plane_span(bytes_per_row, rows, min_row)?;
        planes.push(PlaneLayout {
            offset: data.len(),
            bytes_per_row,
        });
        // SAFETY: the caller guarantees `len` readable bytes at `ptr`.
        data.extend_from_slice(unsafe { std::slice::from_raw_parts(ptr, len) });
    }

    Some(PixelBuffer::new(
        format,
        frame.width,
        frame.height,
        planes,
        PooledBuffer::detached(data),
    ))
}

/// Create a processor drawing into a `view_width`x`view_height` view at
/// `display_scale` pixels per point. Returns null if a callback is missing
/// or the geometry is empty.
///
/// # Safety
///
/// The callbacks must stay callable with `user_data` until the processor is
/// freed, from the thread frames are pushed on.
#[no_mangle]
pub unsafe extern "C" fn glcam_processor_new(
    callbacks: GlcamHostCallbacks,
    view_width: f64,
    view_height: f64,
    display_scale: f64,
) -> *mut GlcamProcessor {
    let (Some(bind), Some(draw), Some(display), Some(release)) = (
        callbacks.bind_drawable,
        callbacks.draw_rgba,
        callbacks.display,
        callbacks.release_frame,
    ) else {
        return std::ptr::null_mut();
    };

    let target = Size::new(view_width, view_height).scaled(display_scale);
    if !(target.width.is_finite() && target.height.is_finite()) || target.is_empty() {
        return std::ptr::null_mut();
    }

    let surface = HostSurface {
        context: ContextId::next(),
        drawable: target.to_pixels(),
        user_data: callbacks.user_data,
        bind,
        draw,
        display,
    };
    debug!(
        context = surface.context.as_u64(),
        width = surface.drawable.0,
        height = surface.drawable.1,
        "created host processor"
    );
    let processor = FrameProcessor::new(
        surface,
        Arc::new(ThreadContextBinding),
        Size::new(view_width, view_height),
        display_scale,
    );

    Box::into_raw(Box::new(GlcamProcessor {
        processor,
        release,
        user_data: callbacks.user_data,
    }))
}

/// Rotate and present one frame. `release_frame` is called with
/// `frame_token` exactly once before this returns, even when the frame is
/// null or malformed (such frames count as dropped).
///
/// # Safety
///
/// `processor` must come from [`glcam_processor_new`] and not be freed.
/// `frame`, if non-null, must point to a valid frame whose plane pointers
/// cover the described rows for the duration of the call.
#[no_mangle]
pub unsafe extern "C" fn glcam_processor_process_nv12(
    processor: *mut GlcamProcessor,
    frame: *const GlcamNv12Frame,
    frame_token: *mut c_void,
) {
    // SAFETY: caller guarantees `processor` is live and not aliased.
    let Some(handle) = (unsafe { processor.as_mut() }) else {
        return;
    };
    let release = HostRelease {
        callback: handle.release,
        user_data: handle.user_data,
        token: frame_token,
    };

    // SAFETY: caller guarantees `frame` is null or valid.
    let frame = unsafe { frame.as_ref() };
    let timestamp_us = frame.map_or(0, |f| f.timestamp_us);
    // SAFETY: plane pointers are valid per the caller's contract.
    let sample = match frame.and_then(|f| unsafe { copy_nv12(f) }) {
        Some(buffer) => SampleBuffer::new(buffer, timestamp_us),
        None => SampleBuffer::without_image(timestamp_us),
    };

    handle
        .processor
        .process(sample.with_release_hook(move || release.fire()));
}

/// Frames dropped so far (malformed input or host callback failure).
///
/// # Safety
///
/// `processor` must be null or come from [`glcam_processor_new`].
#[no_mangle]
pub unsafe extern "C" fn glcam_processor_dropped_frames(processor: *const GlcamProcessor) -> u64 {
    // SAFETY: caller guarantees `processor` is null or live.
    unsafe { processor.as_ref() }.map_or(0, |handle| {
        handle.processor.stats().lock().drop_count()
    })
}

/// Frames presented so far.
///
/// # Safety
///
/// As for [`glcam_processor_dropped_frames`].
#[no_mangle]
pub unsafe extern "C" fn glcam_processor_presented_frames(
    processor: *const GlcamProcessor,
) -> u64 {
    // SAFETY: caller guarantees `processor` is null or live.
    unsafe { processor.as_ref() }.map_or(0, |handle| {
        handle.processor.stats().lock().frame_count()
    })
}

/// Free a processor. Null is ignored.
///
/// # Safety
///
/// `processor` must be null or come from [`glcam_processor_new`], and must
/// not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn glcam_processor_free(processor: *mut GlcamProcessor) {
    if !processor.is_null() {
        // SAFETY: pointer came from `Box::into_raw` in `glcam_processor_new`.
        drop(unsafe { Box::from_raw(processor) });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Host {
        binds: usize,
        draws: Vec<(u32, u32, [f64; 4])>,
        displays: usize,
        released: Vec<usize>,
        fail_display: bool,
    }

    fn host(user_data: *mut c_void) -> &'static Mutex<Host> {
        unsafe { &*(user_data as *const Mutex<Host>) }
    }

    unsafe extern "C" fn bind(user_data: *mut c_void) -> bool {
        host(user_data).lock().unwrap().binds += 1;
        true
    }

    #[allow(clippy::too_many_arguments)]
    unsafe extern "C" fn draw(
        user_data: *mut c_void,
        pixels: *const u8,
        width: u32,
        height: u32,
        x: f64,
        y: f64,
        w: f64,
        h: f64,
    ) -> bool {
        assert!(!pixels.is_null());
        host(user_data)
            .lock()
            .unwrap()
            .draws
            .push((width, height, [x, y, w, h]));
        true
    }

    unsafe extern "C" fn display(user_data: *mut c_void) -> bool {
        let mut host = host(user_data).lock().unwrap();
        host.displays += 1;
        !host.fail_display
    }

    unsafe extern "C" fn release(user_data: *mut c_void, token: *mut c_void) {
        host(user_data).lock().unwrap().released.push(token as usize);
    }

    fn callbacks(host: &'static Mutex<Host>) -> GlcamHostCallbacks {
        GlcamHostCallbacks {
            user_data: host as *const Mutex<Host> as *mut c_void,
            bind_drawable: Some(bind),
            draw_rgba: Some(draw),
            display: Some(display),
            release_frame: Some(release),
        }
    }

    fn leaked_host() -> &'static Mutex<Host> {
        Box::leak(Box::new(Mutex::new(Host::default())))
    }

    /// Grey 4x2 NV12 frame with padded rows.
    struct Planes {
        luma: Vec<u8>,
        chroma: Vec<u8>,
    }

    impl Planes {
        fn grey() -> Self {
            Self {
                luma: vec![128; 8 * 2],
                chroma: vec![128; 8],
            }
        }

        fn frame(&self) -> GlcamNv12Frame {
            GlcamNv12Frame {
                width: 4,
                height: 2,
                luma: self.luma.as_ptr(),
                luma_bytes_per_row: 8,
                chroma: self.chroma.as_ptr(),
                chroma_bytes_per_row: 8,
                timestamp_us: 0,
            }
        }
    }

    #[test]
    fn missing_callback_returns_null() {
        let host = leaked_host();
        let mut cb = callbacks(host);
        cb.display = None;
        let processor = unsafe { glcam_processor_new(cb, 400.0, 300.0, 2.0) };
        assert!(processor.is_null());
    }

    #[test]
    fn valid_frame_is_rotated_presented_and_released() {
        let host = leaked_host();
        let planes = Planes::grey();
        unsafe {
            let processor = glcam_processor_new(callbacks(host), 400.0, 300.0, 2.0);
            assert!(!processor.is_null());

            glcam_processor_process_nv12(processor, &planes.frame(), 7 as *mut c_void);

            assert_eq!(glcam_processor_presented_frames(processor), 1);
            assert_eq!(glcam_processor_dropped_frames(processor), 0);
            glcam_processor_free(processor);
        }

        let host = host.lock().unwrap();
        assert_eq!(host.binds, 1);
        assert_eq!(host.displays, 1);
        assert_eq!(host.draws, vec![(2, 4, [0.0, 0.0, 800.0, 600.0])]);
        assert_eq!(host.released, vec![7]);
    }

    #[test]
    fn null_frame_is_dropped_and_still_released() {
        let host = leaked_host();
        unsafe {
            let processor = glcam_processor_new(callbacks(host), 400.0, 300.0, 2.0);
            glcam_processor_process_nv12(processor, std::ptr::null(), 42 as *mut c_void);
            assert_eq!(glcam_processor_dropped_frames(processor), 1);
            glcam_processor_free(processor);
        }

        let host = host.lock().unwrap();
        assert_eq!(host.binds, 0);
        assert!(host.draws.is_empty());
        assert_eq!(host.displays, 0);
        assert_eq!(host.released, vec![42]);
    }

    #[test]
    fn short_row_stride_is_dropped() {
        let host = leaked_host();
        let planes = Planes::grey();
        let mut frame = planes.frame();
        frame.luma_bytes_per_row = 2;
        unsafe {
            let processor = glcam_processor_new(callbacks(host), 400.0, 300.0, 2.0);
            glcam_processor_process_nv12(processor, &frame, 1 as *mut c_void);
            assert_eq!(glcam_processor_dropped_frames(processor), 1);
            glcam_processor_free(processor);
        }
        assert_eq!(host.lock().unwrap().released, vec![1]);
    }

    #[test]
    fn overflowing_strides_are_dropped_without_panicking() {
        let planes = Planes::grey();
        let strides = [usize::MAX, isize::MAX as usize, usize::MAX / 2 + 1];
        for (token, luma) in strides.into_iter().enumerate() {
            let host = leaked_host();
            let mut frame = planes.frame();
            frame.luma_bytes_per_row = luma;
            unsafe {
                let processor = glcam_processor_new(callbacks(host), 400.0, 300.0, 2.0);
                glcam_processor_process_nv12(processor, &frame, token as *mut c_void);
                assert_eq!(glcam_processor_dropped_frames(processor), 1, "stride {luma}");
                assert_eq!(glcam_processor_presented_frames(processor), 0);
                glcam_processor_free(processor);
            }
            let host = host.lock().unwrap();
            assert!(host.draws.is_empty());
            assert_eq!(host.released, vec![token]);
        }
    }

    #[test]
    fn fractional_scale_draws_inside_drawable() {
        let host = leaked_host();
        let planes = Planes::grey();
        unsafe {
            let processor = glcam_processor_new(callbacks(host), 414.0, 736.0, 2.608);
            assert!(!processor.is_null());
            glcam_processor_process_nv12(processor, &planes.frame(), 5 as *mut c_void);
            assert_eq!(glcam_processor_presented_frames(processor), 1);
            glcam_processor_free(processor);
        }
        let host = host.lock().unwrap();
        assert_eq!(host.draws, vec![(2, 4, [0.0, 0.0, 1080.0, 1919.0])]);
    }

    #[test]
    fn host_failure_counts_as_dropped() {
        let host = leaked_host();
        host.lock().unwrap().fail_display = true;
        let planes = Planes::grey();
        unsafe {
            let processor = glcam_processor_new(callbacks(host), 400.0, 300.0, 2.0);
            glcam_processor_process_nv12(processor, &planes.frame(), 3 as *mut c_void);
            assert_eq!(glcam_processor_dropped_frames(processor), 1);
            assert_eq!(glcam_processor_presented_frames(processor), 0);
            glcam_processor_free(processor);
        }
        assert_eq!(host.lock().unwrap().released, vec![3]);
    }

    #[test]
    fn null_processor_is_ignored() {
        unsafe {
            glcam_processor_process_nv12(std::ptr::null_mut(), std::ptr::null(), std::ptr::null_mut());
            assert_eq!(glcam_processor_dropped_frames(std::ptr::null()), 0);
            glcam_processor_free(std::ptr::null_mut());
        }
    }
}
