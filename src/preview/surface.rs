use super::context::ContextId;
use super::error::Result;
use super::geometry::Rect;
use super::image::Image;

/// Drawable owned by the view layer that frames are presented into.
///
/// Per frame the processor calls `bind_drawable`, one `draw_image`, then
/// `display`. All three run on the capture delivery thread with the
/// surface's context current.
pub trait PresentationSurface: Send {
    /// Rendering context draw calls into this surface require.
    fn context(&self) -> ContextId;

    /// Drawable size in pixels.
    fn drawable_size(&self) -> (u32, u32);

    /// Bind the drawable as the render target for the following draws.
    fn bind_drawable(&mut self) -> Result<()>;

    /// Draw the `source` region of `image` into `dest` (drawable pixels, y-up).
    fn draw_image(&mut self, image: &Image<'_>, dest: Rect, source: Rect) -> Result<()>;

    /// Present the drawable.
    fn display(&mut self) -> Result<()>;
}

impl<S: PresentationSurface + ?Sized> PresentationSurface for Box<S> {
    fn context(&self) -> ContextId {
        (**self).context()
    }

    fn drawable_size(&self) -> (u32, u32) {
        (**self).drawable_size()
    }

    fn bind_drawable(&mut self) -> Result<()> {
        (**self).bind_drawable()
    }

    fn draw_image(&mut self, image: &Image<'_>, dest: Rect, source: Rect) -> Result<()> {
        (**self).draw_image(image, dest, source)
    }

    fn display(&mut self) -> Result<()> {
        (**self).display()
    }
}
