use thiserror::Error;

/// Errors raised while turning a frame into a presented image.
///
/// None of these cross a frame boundary: the processor records them and moves
/// on to the next frame.
#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("sample carries no image buffer")]
    MissingImageBuffer,

    #[error("invalid pixel buffer: {0}")]
    InvalidBuffer(String),

    #[error("transform is not invertible")]
    DegenerateTransform,

    #[error("empty draw region {width}x{height}")]
    EmptyRegion { width: u32, height: u32 },

    #[error("drawable is not bound")]
    DrawableNotBound,

    #[error("resize failed: {0}")]
    Resize(String),

    #[error("GPU error: {0}")]
    Gpu(String),

    #[error("host callback `{0}` reported failure")]
    Host(&'static str),

    #[error("no frame has been presented yet")]
    NothingPresented,

    #[error("image encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("failed to write snapshot: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, PreviewError>;
