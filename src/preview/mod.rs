// Preview pipeline: rotate each captured frame and present it on a surface.

pub mod context;
pub mod convert;
pub mod error;
pub mod frame_buffer;
pub mod geometry;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod image;
pub mod processor;
pub mod snapshot;
pub mod software;
pub mod surface;
