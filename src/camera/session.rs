use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::camera::backend::{CameraBackend, FrameSource};
use crate::camera::error::{CameraError, Result};
use crate::camera::frame::{PixelBuffer, SampleBuffer};
use crate::camera::pool::BufferPool;
use crate::camera::types::{DeviceId, FormatDescriptor, PixelFormat, SessionPreset};
use crate::diagnostics::stats::{DiagnosticSnapshot, DiagnosticStats, DropReason};
use crate::preview::processor::FrameSink;

/// Longest time the delivery thread sleeps before rechecking shutdown.
const MAX_IDLE_SLEEP: Duration = Duration::from_millis(50);

/// Slowest supported delivery: one frame an hour.
const MAX_FRAME_INTERVAL: Duration = Duration::from_secs(3600);

/// Time between frames at `fps`, or a configuration error when the rate is
/// not positive or outside what the delivery thread can pace.
pub fn frame_interval(fps: f32) -> Result<Duration> {
    let invalid = || CameraError::Configuration(format!("invalid frame rate {fps} fps"));
    if !(fps.is_finite() && fps > 0.0) {
        return Err(invalid());
    }
    let interval = Duration::try_from_secs_f64(1.0 / f64::from(fps)).map_err(|_| invalid())?;
    if interval.is_zero() || interval > MAX_FRAME_INTERVAL {
        return Err(invalid());
    }
    Ok(interval)
}

/// Callback type for reporting capture errors to the host.
/// Arguments: (device_id, error_message).
pub type ErrorCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Capture configuration applied before the session starts.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub preset: SessionPreset,
    pub pixel_format: PixelFormat,
    /// Delivery rate; `None` uses the rate the device advertises.
    pub fps: Option<f32>,
    /// Drop frames whose delivery time passed while the previous frame was
    /// still being processed, instead of delivering them late.
    pub discard_late_frames: bool,
    /// Frame buffers in flight at once.
    pub pool_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            preset: SessionPreset::default(),
            pixel_format: PixelFormat::Nv12,
            fps: None,
            discard_late_frames: true,
            pool_size: 3,
        }
    }
}

/// Configuration for the frame watchdog timer.
struct WatchdogConfig {
    /// Maximum time to wait for the delivery thread to set `running = true`.
    startup_timeout: Duration,
    /// Time to wait for the first frame after the session is running.
    frame_timeout: Duration,
    /// Poll interval for the watchdog thread.
    poll_interval: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(30),
            frame_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Everything the delivery thread owns.
struct Delivery {
    source: Box<dyn FrameSource>,
    sink: Box<dyn FrameSink>,
    pool: BufferPool,
    stats: Arc<Mutex<DiagnosticStats>>,
    running: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    delivered: Arc<AtomicU64>,
    interval: Duration,
    discard_late_frames: bool,
}

/// Active capture session for a single camera.
///
/// Frames are produced on one named delivery thread
/// (`video-queue-<device>`) and handed to the sink serially, each in a
/// buffer checked out of the session's pool.
pub struct CaptureSession {
    device_id: DeviceId,
    format: FormatDescriptor,
    pool: BufferPool,
    running: Arc<AtomicBool>,
    /// Signals the delivery thread and the watchdog to exit.
    shutdown: Arc<AtomicBool>,
    delivered: Arc<AtomicU64>,
    thread: Option<JoinHandle<()>>,
    watchdog: Option<JoinHandle<()>>,
    stats: Arc<Mutex<DiagnosticStats>>,
}

impl CaptureSession {
    /// Configure `device` on `backend` and start delivering frames to
    /// `sink`.
    ///
    /// Configuration and device acquisition failures are logged once and
    /// returned; no frames are delivered in that case. If `on_error` is
    /// provided it is called with `(device_id, error_msg)` when the running
    /// session fails.
    pub fn start(
        backend: &dyn CameraBackend,
        device: &DeviceId,
        config: SessionConfig,
        sink: impl FrameSink + 'static,
        stats: Arc<Mutex<DiagnosticStats>>,
        on_error: Option<ErrorCallback>,
    ) -> Result<Self> {
        Self::start_with_watchdog(
            backend,
            device,
            config,
            Box::new(sink),
            stats,
            on_error,
            WatchdogConfig::default(),
        )
        .inspect_err(|e| error!("failed to start capture session for {device}: {e}"))
    }

    fn start_with_watchdog(
        backend: &dyn CameraBackend,
        device: &DeviceId,
        config: SessionConfig,
        sink: Box<dyn FrameSink>,
        stats: Arc<Mutex<DiagnosticStats>>,
        on_error: Option<ErrorCallback>,
        watchdog_config: WatchdogConfig,
    ) -> Result<Self> {
        let (format, interval) = Self::configure(backend, device, &config)?;
        let source = backend.open_stream(device, &format)?;
        info!(
            device = %device,
            preset = %config.preset,
            pixel_format = %format.pixel_format,
            fps = format.fps,
            "capture device acquired"
        );

        let pool = BufferPool::new(
            config.pool_size,
            format.pixel_format.packed_len(format.width, format.height),
        );
        let running = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(AtomicBool::new(false));
        let delivered = Arc::new(AtomicU64::new(0));

        let delivery = Delivery {
            source,
            sink,
            pool: pool.clone(),
            stats: Arc::clone(&stats),
            running: Arc::clone(&running),
            shutdown: Arc::clone(&shutdown),
            delivered: Arc::clone(&delivered),
            interval,
            discard_late_frames: config.discard_late_frames,
        };

        let thread = {
            let device_id = device.clone();
            let on_error = on_error.clone();
            std::thread::Builder::new()
                .name(format!("video-queue-{device}"))
                .spawn(move || {
                    info!("delivery thread starting for {device_id}");
                    if let Err(e) = delivery.run() {
                        error!("capture failed for {device_id}: {e}");
                        if let Some(cb) = &on_error {
                            cb(device_id.as_str(), &e.to_string());
                        }
                    }
                    info!("delivery thread exiting for {device_id}");
                })?
        };

        let watchdog = {
            let device_id = device.clone();
            let delivered = Arc::clone(&delivered);
            let running = Arc::clone(&running);
            let shutdown = Arc::clone(&shutdown);
            std::thread::Builder::new()
                .name(format!("watchdog-{device}"))
                .spawn(move || {
                    Self::run_watchdog_with_config(
                        device_id.as_str(),
                        &delivered,
                        &running,
                        &shutdown,
                        on_error.as_ref(),
                        watchdog_config,
                    );
                })
        };
        let watchdog = match watchdog {
            Ok(handle) => handle,
            Err(e) => {
                shutdown.store(true, Ordering::Relaxed);
                let _ = thread.join();
                return Err(CameraError::Thread(e));
            }
        };

        Ok(Self {
            device_id: device.clone(),
            format,
            pool,
            running,
            shutdown,
            delivered,
            thread: Some(thread),
            watchdog: Some(watchdog),
            stats,
        })
    }

    /// Pick the device format for the requested preset and pixel format,
    /// and the delivery interval for its frame rate.
    fn configure(
        backend: &dyn CameraBackend,
        device: &DeviceId,
        config: &SessionConfig,
    ) -> Result<(FormatDescriptor, Duration)> {
        if config.pool_size == 0 {
            return Err(CameraError::Configuration(
                "buffer pool needs at least one buffer".to_string(),
            ));
        }
        let mut format = backend
            .get_formats(device)?
            .into_iter()
            .find(|f| f.matches(config.preset) && f.pixel_format == config.pixel_format)
            .ok_or_else(|| CameraError::UnsupportedPreset {
                device: device.to_string(),
                preset: format!("{} {}", config.preset, config.pixel_format),
            })?;
        if let Some(fps) = config.fps {
            format.fps = fps;
        }
        let interval = frame_interval(format.fps)?;
        Ok((format, interval))
    }

    /// Check if the capture session is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Return the device ID for this session.
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Format frames are delivered in.
    pub fn format(&self) -> &FormatDescriptor {
        &self.format
    }

    /// Frames handed to the sink so far.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// The pool frames are delivered in.
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Take a snapshot of diagnostic stats for this session.
    pub fn diagnostics(&self) -> DiagnosticSnapshot {
        self.stats.lock().snapshot()
    }

    /// Watchdog: waits for the delivery thread to start running, then checks
    /// that frames arrive within `frame_timeout`. Fires `on_error` and stops
    /// the session if the camera produces no frames.
    fn run_watchdog_with_config(
        device_id: &str,
        delivered: &AtomicU64,
        running: &AtomicBool,
        shutdown: &AtomicBool,
        on_error: Option<&ErrorCallback>,
        config: WatchdogConfig,
    ) {
        let WatchdogConfig {
            startup_timeout,
            frame_timeout,
            poll_interval,
        } = config;

        // Phase 1: wait for the delivery thread to come up.
        let start = Instant::now();
        loop {
            if shutdown.load(Ordering::Relaxed) {
                return;
            }
            if running.load(Ordering::Relaxed) {
                break;
            }
            if start.elapsed() >= startup_timeout {
                // The delivery thread reports its own failure.
                return;
            }
            std::thread::sleep(poll_interval);
        }

        // Phase 2: wait for at least one frame within frame_timeout.
        let deadline = Instant::now() + frame_timeout;
        loop {
            if shutdown.load(Ordering::Relaxed) || !running.load(Ordering::Relaxed) {
                return;
            }
            if delivered.load(Ordering::Relaxed) > 0 {
                return;
            }
            if Instant::now() >= deadline {
                warn!(
                    "watchdog: no frames received within {}ms for {device_id}",
                    frame_timeout.as_millis()
                );
                if let Some(cb) = on_error {
                    cb(
                        device_id,
                        &format!(
                            "Camera produces no frames ({}ms timeout)",
                            frame_timeout.as_millis()
                        ),
                    );
                }
                running.store(false, Ordering::Relaxed);
                shutdown.store(true, Ordering::Relaxed);
                return;
            }
            std::thread::sleep(poll_interval);
        }
    }

    /// Stop the capture session and join its threads. A frame already being
    /// processed finishes first. Idempotent.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let was_started = self.thread.is_some();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.watchdog.take() {
            let _ = handle.join();
        }
        self.running.store(false, Ordering::Relaxed);
        if was_started {
            info!(
                device = %self.device_id,
                delivered = self.delivered(),
                "capture session stopped"
            );
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Delivery {
    /// Deliver frames until shutdown. Frames are due every `interval`;
    /// deadlines that pass while the sink is busy are either discarded or
    /// delivered back to back.
    fn run(mut self) -> Result<()> {
        self.running.store(true, Ordering::Relaxed);
        let FormatDescriptor {
            width,
            height,
            pixel_format,
            ..
        } = self.source.format().clone();
        let mut next_due = Instant::now();
        let mut sequence = 0u64;

        while !self.shutdown.load(Ordering::Relaxed) {
            let now = Instant::now();
            if now < next_due {
                std::thread::sleep((next_due - now).min(MAX_IDLE_SLEEP));
                continue;
            }

            if self.discard_late_frames {
                let missed = ((now - next_due).as_secs_f64() / self.interval.as_secs_f64()) as u64;
                if missed > 0 {
                    debug!(missed, "discarding late frames");
                    let mut stats = self.stats.lock();
                    for _ in 0..missed {
                        stats.record_drop(DropReason::Late);
                    }
                    sequence += missed;
                    next_due += self.interval.mul_f64(missed as f64);
                }
            }
            next_due += self.interval;
            sequence += 1;

            let Some(storage) = self.pool.acquire() else {
                debug!(sequence, "buffer pool exhausted, dropping frame");
                self.stats.lock().record_drop(DropReason::PoolExhausted);
                continue;
            };
            let mut buffer = PixelBuffer::packed(pixel_format, width, height, storage);
            if let Err(e) = self.source.fill(&mut buffer, sequence) {
                self.running.store(false, Ordering::Relaxed);
                return Err(e);
            }

            let timestamp_us = self.stats.lock().clock_us();
            self.sink.on_frame(SampleBuffer::new(buffer, timestamp_us));
            self.delivered.fetch_add(1, Ordering::Relaxed);
        }

        self.running.store(false, Ordering::Relaxed);
        Ok(())
    }
}
