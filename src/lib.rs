pub mod camera;
pub mod diagnostics;
pub mod ffi;
pub mod preview;
pub mod settings;

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use camera::backend::CameraBackend;
use camera::dummy::DummyBackend;
use camera::error::CameraError;
use camera::session::CaptureSession;
use camera::types::DeviceId;
use diagnostics::stats::DiagnosticStats;
use preview::context::ThreadContextBinding;
use preview::error::PreviewError;
use preview::frame_buffer::FrameBuffer;
use preview::processor::FrameProcessor;
use preview::software::SoftwareSurface;
use preview::surface::PresentationSurface;
use settings::store::{SettingsError, SettingsStore};
use settings::types::{PreviewSettings, Renderer};

/// Environment variable naming the settings file.
pub const SETTINGS_ENV: &str = "GLCAM_SETTINGS";
const DEFAULT_SETTINGS_FILE: &str = "glcam-preview.json";
const DEFAULT_LOG_FILTER: &str = "glcam_preview_lib=info,glcam_preview=info";
const REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Anything that ends a preview run early.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Camera(#[from] CameraError),

    #[error(transparent)]
    Preview(#[from] PreviewError),

    #[error("failed to start async runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Open the configured camera and preview it until Ctrl-C or the configured
/// run time elapses.
pub fn run() -> Result<(), RunError> {
    init_tracing();

    let store = SettingsStore::open(settings_path(std::env::var_os(SETTINGS_ENV)))?;
    let settings = store.get();

    let backend = DummyBackend::new();
    let device = match &settings.device_id {
        Some(id) => DeviceId::new(id.as_str()),
        None => backend.default_device()?.id,
    };

    let stats = Arc::new(Mutex::new(DiagnosticStats::new()));
    let (surface, presented) = build_surface(&settings);
    let (width, height) = surface.drawable_size();
    let processor = FrameProcessor::new(
        surface,
        Arc::new(ThreadContextBinding),
        settings.view_bounds,
        settings.display_scale,
    )
    .with_rotation(settings.rotation)
    .with_content_mode(settings.content_mode)
    .with_stats(Arc::clone(&stats));

    info!(
        device = %device,
        preset = %settings.preset,
        width,
        height,
        "starting preview"
    );
    let mut session = CaptureSession::start(
        &backend,
        &device,
        settings.session_config(),
        processor,
        Arc::clone(&stats),
        None,
    )?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(wait_for_shutdown(
        Arc::clone(&stats),
        settings.run_seconds.map(Duration::from_secs),
    ));

    session.stop();
    let snapshot = session.diagnostics();
    info!(
        frames = snapshot.frame_count,
        dropped = snapshot.drop_count,
        fps = snapshot.fps,
        latency_ms = snapshot.latency_ms,
        "preview finished"
    );
    if let Ok(json) = serde_json::to_string(&snapshot) {
        info!("diagnostics: {json}");
    }

    if let Some(path) = &settings.snapshot_path {
        preview::snapshot::write_latest(&presented, path)?;
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .try_init();
}

fn settings_path(configured: Option<OsString>) -> PathBuf {
    configured
        .filter(|path| !path.is_empty())
        .map_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE), PathBuf::from)
}

type BuiltSurface = (Box<dyn PresentationSurface>, Arc<FrameBuffer>);

/// Build the configured surface, falling back to software rendering when
/// no GPU is available.
fn build_surface(settings: &PreviewSettings) -> BuiltSurface {
    let (width, height) = settings.drawable_size();
    if settings.renderer == Renderer::Gpu {
        if let Some(built) = gpu_surface(width, height, settings.snapshot_path.is_some()) {
            return built;
        }
    }
    let surface = SoftwareSurface::new(width, height);
    let presented = surface.presented();
    (Box::new(surface), presented)
}

#[cfg(feature = "gpu")]
fn gpu_surface(width: u32, height: u32, readback: bool) -> Option<BuiltSurface> {
    match preview::gpu::GpuSurface::new(width, height, readback) {
        Ok(surface) => {
            info!(adapter = surface.adapter_name(), "using GPU surface");
            let presented = surface.presented();
            Some((Box::new(surface), presented))
        }
        Err(e) => {
            warn!("GPU surface unavailable, using software rendering: {e}");
            None
        }
    }
}

#[cfg(not(feature = "gpu"))]
fn gpu_surface(_width: u32, _height: u32, _readback: bool) -> Option<BuiltSurface> {
    warn!("built without the `gpu` feature, using software rendering");
    None
}

/// Wait for Ctrl-C or `run_for`, logging diagnostics periodically.
async fn wait_for_shutdown(stats: Arc<Mutex<DiagnosticStats>>, run_for: Option<Duration>) {
    let deadline = run_for.map(|d| tokio::time::Instant::now() + d);
    let mut report = tokio::time::interval(REPORT_INTERVAL);
    report.tick().await;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                match result {
                    Ok(()) => info!("Ctrl-C received, stopping preview"),
                    Err(e) => warn!("failed to listen for Ctrl-C: {e}"),
                }
                return;
            }
            _ = sleep_until(deadline) => {
                info!("run time elapsed, stopping preview");
                return;
            }
            _ = report.tick() => {
                let snapshot = stats.lock().snapshot();
                info!(
                    frames = snapshot.frame_count,
                    dropped = snapshot.drop_count,
                    fps = snapshot.fps,
                    "preview running"
                );
            }
        }
    }
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_path_defaults_when_unset_or_empty() {
        assert_eq!(settings_path(None), PathBuf::from("glcam-preview.json"));
        assert_eq!(
            settings_path(Some(OsString::new())),
            PathBuf::from("glcam-preview.json")
        );
        assert_eq!(
            settings_path(Some(OsString::from("/tmp/custom.json"))),
            PathBuf::from("/tmp/custom.json")
        );
    }

    #[test]
    fn software_renderer_builds_scaled_surface() {
        let settings = PreviewSettings {
            renderer: Renderer::Software,
            ..PreviewSettings::default()
        };
        let (surface, presented) = build_surface(&settings);
        assert_eq!(surface.drawable_size(), (800, 600));
        assert_eq!(presented.sequence(), 0);
    }

    #[tokio::test]
    async fn shutdown_wait_ends_after_run_time() {
        let stats = Arc::new(Mutex::new(DiagnosticStats::new()));
        tokio::time::timeout(
            Duration::from_secs(5),
            wait_for_shutdown(stats, Some(Duration::from_millis(20))),
        )
        .await
        .unwrap();
    }

    #[test]
    fn software_pipeline_presents_dummy_frames() {
        let backend = DummyBackend::new();
        let surface = SoftwareSurface::new(60, 80);
        let presented = surface.presented();
        let stats = Arc::new(Mutex::new(DiagnosticStats::new()));
        let processor = FrameProcessor::new(
            surface,
            Arc::new(ThreadContextBinding),
            preview::geometry::Size::new(60.0, 80.0),
            1.0,
        )
        .with_stats(Arc::clone(&stats));
        let config = camera::session::SessionConfig {
            preset: camera::types::SessionPreset::Vga640x480,
            fps: Some(60.0),
            ..Default::default()
        };

        let mut session = CaptureSession::start(
            &backend,
            &DummyBackend::device_id(),
            config,
            processor,
            Arc::clone(&stats),
            None,
        )
        .unwrap();
        std::thread::sleep(Duration::from_millis(300));
        session.stop();

        assert!(stats.lock().frame_count() > 0);
        let frame = presented.latest().unwrap();
        assert_eq!(frame.pixels.dimensions(), (60, 80));
        assert_eq!(session.pool().outstanding(), 0);
    }
}
