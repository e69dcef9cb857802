use crate::camera::error::{CameraError, Result};
use crate::camera::frame::PixelBuffer;
use crate::camera::types::{CameraDevice, DeviceId, FormatDescriptor};

/// Platform-agnostic camera backend trait.
///
/// Provides device enumeration, format queries and opening a device for
/// streaming. Platform capture stacks plug in here; the crate ships the
/// synthetic [`DummyBackend`](crate::camera::dummy::DummyBackend).
pub trait CameraBackend: Send + Sync {
    /// Enumerate all currently connected camera devices.
    fn enumerate_devices(&self) -> Result<Vec<CameraDevice>>;

    /// The device a session uses when none is configured: the first
    /// connected one.
    fn default_device(&self) -> Result<CameraDevice> {
        self.enumerate_devices()?
            .into_iter()
            .find(|device| device.is_connected)
            .ok_or(CameraError::NoDevices)
    }

    /// Get supported video formats for a device.
    fn get_formats(&self, id: &DeviceId) -> Result<Vec<FormatDescriptor>>;

    /// Acquire the device and prepare it to produce frames in `format`.
    fn open_stream(&self, id: &DeviceId, format: &FormatDescriptor)
        -> Result<Box<dyn FrameSource>>;
}

/// Frame producer for one opened device.
///
/// Owned by the session's delivery thread and called serially.
pub trait FrameSource: Send {
    /// Format every frame is produced in.
    fn format(&self) -> &FormatDescriptor;

    /// Write frame number `sequence` into `buffer`, which is laid out for
    /// [`format`](Self::format).
    fn fill(&mut self, buffer: &mut PixelBuffer, sequence: u64) -> Result<()>;
}

/// Backend with no devices, for hosts without a capture stack.
pub struct NullBackend;

impl CameraBackend for NullBackend {
    fn enumerate_devices(&self) -> Result<Vec<CameraDevice>> {
        Ok(vec![])
    }

    fn get_formats(&self, id: &DeviceId) -> Result<Vec<FormatDescriptor>> {
        Err(CameraError::DeviceNotFound(id.to_string()))
    }

    fn open_stream(
        &self,
        id: &DeviceId,
        _format: &FormatDescriptor,
    ) -> Result<Box<dyn FrameSource>> {
        Err(CameraError::DeviceNotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Mock backend for testing the trait's provided methods.
    struct MockBackend {
        devices: Vec<CameraDevice>,
    }

    impl CameraBackend for MockBackend {
        fn enumerate_devices(&self) -> Result<Vec<CameraDevice>> {
            Ok(self.devices.clone())
        }

        fn get_formats(&self, _id: &DeviceId) -> Result<Vec<FormatDescriptor>> {
            Ok(vec![])
        }

        fn open_stream(
            &self,
            id: &DeviceId,
            _format: &FormatDescriptor,
        ) -> Result<Box<dyn FrameSource>> {
            Err(CameraError::Acquisition(id.to_string()))
        }
    }

    fn device(id: &str, is_connected: bool) -> CameraDevice {
        CameraDevice {
            id: DeviceId::new(id),
            name: format!("Camera {id}"),
            is_connected,
        }
    }

    #[test]
    fn default_device_skips_disconnected() {
        let backend = MockBackend {
            devices: vec![device("front", false), device("back", true)],
        };
        assert_eq!(backend.default_device().unwrap().id.as_str(), "back");
    }

    #[test]
    fn default_device_without_devices_fails() {
        let backend = MockBackend { devices: vec![] };
        assert!(matches!(
            backend.default_device(),
            Err(CameraError::NoDevices)
        ));
    }

    #[test]
    fn null_backend_has_nothing_to_open() {
        let backend = NullBackend;
        assert!(backend.enumerate_devices().unwrap().is_empty());
        assert!(matches!(
            backend.default_device(),
            Err(CameraError::NoDevices)
        ));
        assert!(matches!(
            backend.get_formats(&DeviceId::new("x")),
            Err(CameraError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn trait_object_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Box<dyn CameraBackend>>();
    }
}
