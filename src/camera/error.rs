use thiserror::Error;

/// Camera subsystem errors.
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("no camera devices available")]
    NoDevices,

    #[error("device acquisition failed: {0}")]
    Acquisition(String),

    #[error("device enumeration failed: {0}")]
    Enumeration(String),

    #[error("unsupported session preset {preset} for {device}")]
    UnsupportedPreset { device: String, preset: String },

    #[error("session configuration failed: {0}")]
    Configuration(String),

    #[error("failed to spawn delivery thread: {0}")]
    Thread(#[from] std::io::Error),
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, CameraError>;
